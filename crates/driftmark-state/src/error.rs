//! Control store error types.

/// Errors produced by [`ControlStore`](crate::ControlStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Underlying storage failure.
    #[error("control store error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Storage failure with the failing operation named.
    #[error("{context}: {source}")]
    BackendContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("control store lock poisoned")]
    LockPoisoned,
}

impl StateError {
    /// Wrap a backend error.
    pub fn backend(e: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(e))
    }

    /// Wrap a backend error, naming the failing operation.
    pub fn backend_context(
        context: impl Into<String>,
        e: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BackendContext {
            context: context.into(),
            source: Box::new(e),
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StateError>;

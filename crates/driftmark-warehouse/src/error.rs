//! Warehouse error types.

/// Errors produced by [`Warehouse`](crate::Warehouse) operations.
#[derive(Debug, thiserror::Error)]
pub enum WarehouseError {
    /// Underlying storage failure.
    #[error("warehouse error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Storage failure with the failing operation named.
    #[error("{context}: {source}")]
    BackendContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A constraint violation where the merge expected none. Indicates
    /// a fault in the merge decision, never retried or swallowed.
    #[error("merge constraint violated: {context}")]
    Constraint { context: String },

    /// Malformed row data (null business key, type mismatch against
    /// the declared column type).
    #[error("data error: {0}")]
    Data(String),

    /// File-system I/O failure (e.g. creating the database directory).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal mutex was poisoned by a panicked thread.
    #[error("warehouse lock poisoned")]
    LockPoisoned,
}

impl WarehouseError {
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
pub type Result<T> = std::result::Result<T, WarehouseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_names_operation() {
        let err = WarehouseError::Constraint {
            context: "close version 7".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("merge constraint violated"), "got: {msg}");
        assert!(msg.contains("close version 7"), "got: {msg}");
    }

    #[test]
    fn backend_context_names_operation() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "nope");
        let err = WarehouseError::backend_context("upsert: execute", inner);
        assert!(err.to_string().contains("upsert: execute"));
    }

    #[test]
    fn data_error_displays() {
        let err = WarehouseError::Data("null business key".into());
        assert!(err.to_string().contains("null business key"));
    }
}

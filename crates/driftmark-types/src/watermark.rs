//! Extraction watermarks.
//!
//! A [`Watermark`] records the highest `created_at` / `modified_at`
//! values already processed for a pipeline, bounding the next
//! incremental extraction. Watermarks only ever advance: every mutation
//! takes a componentwise maximum.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// High-water marks for one pipeline's source timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Watermark {
    /// Highest `created_at` seen in any processed source row.
    pub max_created_at: DateTime<Utc>,
    /// Highest `modified_at` seen in any processed source row.
    pub max_modified_at: DateTime<Utc>,
}

impl Watermark {
    /// The sentinel watermark for a pipeline that has never run.
    ///
    /// Both components sit at the Unix epoch, so the first extraction
    /// degenerates to a full load.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            max_created_at: DateTime::UNIX_EPOCH,
            max_modified_at: DateTime::UNIX_EPOCH,
        }
    }

    /// Whether this watermark is still the initial sentinel.
    #[must_use]
    pub fn is_initial(&self) -> bool {
        *self == Self::initial()
    }

    /// Fold one source row's timestamps into the watermark.
    ///
    /// Each component moves only if the observed value is larger.
    pub fn observe(&mut self, created_at: DateTime<Utc>, modified_at: DateTime<Utc>) {
        if created_at > self.max_created_at {
            self.max_created_at = created_at;
        }
        if modified_at > self.max_modified_at {
            self.max_modified_at = modified_at;
        }
    }

    /// Componentwise maximum of two watermarks.
    #[must_use]
    pub fn merged(&self, other: &Watermark) -> Watermark {
        Watermark {
            max_created_at: self.max_created_at.max(other.max_created_at),
            max_modified_at: self.max_modified_at.max(other.max_modified_at),
        }
    }
}

/// One entry of the persisted watermark log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatermarkEntry {
    pub watermark: Watermark,
    /// When this entry was appended (informational).
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, s).unwrap()
    }

    #[test]
    fn initial_is_epoch() {
        let wm = Watermark::initial();
        assert_eq!(wm.max_created_at, DateTime::UNIX_EPOCH);
        assert_eq!(wm.max_modified_at, DateTime::UNIX_EPOCH);
        assert!(wm.is_initial());
    }

    #[test]
    fn observe_advances_each_component_independently() {
        let mut wm = Watermark::initial();
        wm.observe(ts(10), ts(5));
        assert_eq!(wm.max_created_at, ts(10));
        assert_eq!(wm.max_modified_at, ts(5));

        wm.observe(ts(3), ts(20));
        assert_eq!(wm.max_created_at, ts(10));
        assert_eq!(wm.max_modified_at, ts(20));
        assert!(!wm.is_initial());
    }

    #[test]
    fn observe_never_regresses() {
        let mut wm = Watermark::initial();
        wm.observe(ts(30), ts(30));
        wm.observe(ts(1), ts(1));
        assert_eq!(wm.max_created_at, ts(30));
        assert_eq!(wm.max_modified_at, ts(30));
    }

    #[test]
    fn merged_takes_componentwise_max() {
        let mut a = Watermark::initial();
        a.observe(ts(10), ts(2));
        let mut b = Watermark::initial();
        b.observe(ts(4), ts(8));

        let m = a.merged(&b);
        assert_eq!(m.max_created_at, ts(10));
        assert_eq!(m.max_modified_at, ts(8));
        assert_eq!(m, b.merged(&a));
    }

    #[test]
    fn serde_roundtrip() {
        let mut wm = Watermark::initial();
        wm.observe(ts(7), ts(9));
        let json = serde_json::to_string(&wm).unwrap();
        let back: Watermark = serde_json::from_str(&json).unwrap();
        assert_eq!(wm, back);
    }
}

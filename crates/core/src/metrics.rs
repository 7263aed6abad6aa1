use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Write operations reported to a [`StoreMetrics`] sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOp {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteOutcome {
    Success,
    Conflict,
    Invalid,
    Failure,
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Success => "success",
            Self::Conflict => "conflict",
            Self::Invalid => "invalid",
            Self::Failure => "failure",
        })
    }
}

impl WriteOutcome {
    pub fn of<T>(result: &crate::error::Result<T>) -> Self {
        use crate::error::ErrorKind;
        match result {
            Ok(_) => Self::Success,
            Err(e) => match e.kind() {
                ErrorKind::OptimisticLock | ErrorKind::Conflict => Self::Conflict,
                ErrorKind::Validation | ErrorKind::NotFound => Self::Invalid,
                _ => Self::Failure,
            },
        }
    }
}

/// Observability sink for cache and write activity.
pub trait StoreMetrics: Send + Sync {
    fn cache_hit(&self, org_id: i64);
    fn cache_miss(&self, org_id: i64);
    fn write_outcome(&self, op: WriteOp, outcome: WriteOutcome);
}

pub struct NoopMetrics;

impl StoreMetrics for NoopMetrics {
    fn cache_hit(&self, _org_id: i64) {}
    fn cache_miss(&self, _org_id: i64) {}
    fn write_outcome(&self, _op: WriteOp, _outcome: WriteOutcome) {}
}

/// Process-local counters, handy for tests and debug endpoints.
#[derive(Default)]
pub struct AtomicMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
}

impl AtomicMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes_ok(&self) -> u64 {
        self.writes_ok.load(Ordering::Relaxed)
    }

    pub fn writes_failed(&self) -> u64 {
        self.writes_failed.load(Ordering::Relaxed)
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

impl StoreMetrics for AtomicMetrics {
    fn cache_hit(&self, _org_id: i64) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_miss(&self, _org_id: i64) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn write_outcome(&self, _op: WriteOp, outcome: WriteOutcome) {
        match outcome {
            WriteOutcome::Success => self.writes_ok.fetch_add(1, Ordering::Relaxed),
            _ => self.writes_failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleStoreError;

    #[test]
    fn hit_rate_calculation() {
        let m = AtomicMetrics::new();
        assert_eq!(m.hit_rate(), 0.0);
        m.cache_hit(1);
        m.cache_hit(1);
        m.cache_hit(2);
        m.cache_miss(1);
        assert!((m.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn outcome_from_result() {
        let ok: crate::error::Result<()> = Ok(());
        assert_eq!(WriteOutcome::of(&ok), WriteOutcome::Success);

        let conflict: crate::error::Result<()> = Err(RuleStoreError::OptimisticLock {
            uid: "u".into(),
            version: 1,
        });
        assert_eq!(WriteOutcome::of(&conflict), WriteOutcome::Conflict);

        let invalid: crate::error::Result<()> = Err(RuleStoreError::Validation("x".into()));
        assert_eq!(WriteOutcome::of(&invalid), WriteOutcome::Invalid);
    }
}

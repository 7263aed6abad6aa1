//! Persistence for alert rules: SQL and in-memory back-ends, the versioned
//! writer, the per-organization rule cache and the [`AlertRuleStore`]
//! repository that ties them together.

pub mod backend;
pub mod cache;
pub mod dialect;
pub mod json_cache;
pub mod lock;
pub mod metrics;
pub mod row;
pub mod select;
pub mod store;
pub mod uid;
pub mod writer;

pub use backend::{MemoryBackend, PostgresBackend, RuleBackend, RuleTransaction};
pub use cache::{CacheBackend, CacheError, LruCacheBackend, RuleCache};
pub use dialect::{Dialect, GlobLabelPredicates, JsonLabelPredicates, LabelPredicateBuilder};
pub use json_cache::JsonDecodeCache;
pub use lock::{HeldLock, MemoryLock, NamedLock, NoopLock, PostgresLock};
pub use metrics::RecorderMetrics;
pub use select::{ContinueCursor, GroupCursor, RuleSelect};
pub use store::AlertRuleStore;
pub use writer::{UpsertRule, WriterSettings};

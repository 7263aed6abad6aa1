//! Shared vocabulary for the alert-rule store: the rule model, field-level
//! diffs, query shapes, the error taxonomy, configuration and the traits
//! implemented by collaborators (rule readers, folder resolvers, metrics).

pub mod config;
pub mod diff;
pub mod error;
pub mod metrics;
pub mod model;
pub mod query;
pub mod reader;

pub use config::Config;
pub use diff::*;
pub use error::*;
pub use metrics::*;
pub use model::*;
pub use query::*;
pub use reader::*;

//! Rule-group planning for the alert-rule store.
//!
//! This crate provides:
//! - A Prometheus-style label matcher DSL
//! - In-memory filters applied after the SQL pre-filter
//! - Structural validation of rules before they are written
//! - Reconciliation of a submitted group against stored state

pub mod filters;
pub mod matcher;
pub mod reconcile;
pub mod validation;

pub use filters::{apply_in_memory_filters, has_any_filters, RuleFilter};
pub use matcher::{parse_matchers, LabelMatcher, MatcherError};
pub use reconcile::{calculate_changes, update_calculated_rule_fields, GroupDelta, RuleDelta};
pub use validation::{validate_alert_rule, ValidationError, ValidationResult};

//! Specialist analyzer agents.
//!
//! Each analyzer reacts to `data.updated`, computes its specialty from
//! the store, caches the latest result in-agent and publishes a
//! completion event correlated to the triggering update. The value
//! analyst joins the other three into composite rankings.

pub mod dc;
pub mod fixtures;
pub mod value;
pub mod xg;

pub use dc::DcAnalyst;
pub use fixtures::FixtureAnalyst;
pub use value::ValueAnalyst;
pub use xg::XgAnalyst;

/// True when an `analysis.requested` payload targets this specialty.
pub(crate) fn analysis_requested_for(requested: Option<&str>, specialty: &str) -> bool {
    matches!(requested, Some(kind) if kind == specialty || kind == "all")
}

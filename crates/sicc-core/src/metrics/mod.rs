//! Metrics
//!
//! Performance samples per pattern and sub-agent, rolled up into the
//! intelligence report.

mod reporter;
mod types;

pub use reporter::MetricsReporter;
pub use types::*;

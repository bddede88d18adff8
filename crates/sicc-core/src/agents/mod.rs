//! Sub-Agents
//!
//! Specialised agents (discovery, sales, support) and the router that
//! places admitted patterns on them.

mod router;
mod types;

pub use router::{RouteSuggestion, SubAgentRouter};
pub use types::*;

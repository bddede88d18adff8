//! Pattern Application
//!
//! Serves admitted patterns back into live conversations.

mod engine;
mod types;

pub use engine::BehaviorEngine;
pub use types::*;

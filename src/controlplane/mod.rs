//! Control Plane Module
//!
//! Turns LUN requests into backing stores, target bindings and ACLs, and
//! exposes the whole lifecycle over REST.

pub mod api;
pub mod backends;
pub mod orchestrator;
pub mod saga;

pub use api::*;
pub use backends::*;
pub use orchestrator::*;
pub use saga::{RollbackReport, Saga};

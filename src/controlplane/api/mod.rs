//! API Module
//!
//! REST adapter over the orchestrator.

pub mod rest;
pub mod server;

pub use rest::*;
pub use server::*;

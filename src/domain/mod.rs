//! Domain layer - Core types and port definitions
//!
//! This module defines the data model and the traits (ports) that host
//! adapters implement, following hexagonal architecture principles.

pub mod ports;

pub use ports::*;

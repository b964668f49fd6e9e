//! Host adapters
//!
//! Command execution against the local storage stack and parsing of the
//! tools' text output.

pub mod executor;
pub mod parse;

pub use executor::SystemExecutor;

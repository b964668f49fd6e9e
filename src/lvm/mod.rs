//! Volume manager integration

pub mod manager;

pub use manager::LvmManager;

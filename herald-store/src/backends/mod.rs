//! Backend storage implementations
//!
//! - `memory`: `DashMap` tables, for tests, dry runs and single-process deployments

pub mod memory;

pub use memory::MemoryStore;

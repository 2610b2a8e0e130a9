//! Core runflow library (backends, executor, event routing, stores).

pub mod backends;
pub mod core;
pub mod store;

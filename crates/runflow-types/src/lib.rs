//! Shared runflow types (run records, settings, stream events).

pub mod event;
pub mod run;

//! Core module: backend-agnostic run orchestration.
//!
//! This module contains:
//! - `executor`: Run lifecycle driver and cancellation
//! - `sink`: Per-run event fan-out to subscribers

pub mod executor;
pub mod sink;

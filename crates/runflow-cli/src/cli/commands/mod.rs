//! CLI command handlers.

pub mod check_auth;
pub mod run;
pub mod runs;

//! TestBridge CLI
//!
//! Starts the application server around `cypress` / `playwright` runs.

pub mod commands;
pub mod output;

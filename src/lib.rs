//! Alcohol tracker client library
//!
//! Exposes the offline cache, the data endpoint client and the CLI for use in
//! the binary and in integration tests.

pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod notify;

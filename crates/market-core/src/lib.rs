//! Market Core Library
//!
//! Shared domain types, error kinds and configuration for the tradeguard
//! risk-and-execution control core.

pub mod config;
pub mod error;
pub mod types;

pub use error::{Error, Result};

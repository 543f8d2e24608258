//! Core types and configuration for the auction replay system.
//!
//! This crate provides shared types used across all other crates:
//! - Auction records, partner reference data and bid fields
//! - Per-auction candidates, outcomes and the serialized rerun summary
//! - Configuration structures
//! - Common error types

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

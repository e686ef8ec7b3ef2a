//! # CUSH Common Library
//!
//! Shared code for the CUSH harvesting crates including:
//! - Database pool/schema initialization and shared models
//! - Common error type
//! - Configuration loading
//! - Year-month period handling

pub mod config;
pub mod db;
pub mod error;
pub mod yearmon;

pub use error::{Error, Result};
pub use yearmon::YearMon;

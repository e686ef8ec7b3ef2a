//! Shared SQLite database access

pub mod init;
pub mod models;

pub use init::{create_all_tables, init_database};

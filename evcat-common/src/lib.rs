//! # evcat Common Library
//!
//! Shared code for the event catalog tools:
//! - Error and result types
//! - Root folder and TOML configuration resolution
//! - Database initialization, schema and row models
//! - Settings and run-history persistence

pub mod config;
pub mod db;
pub mod error;

pub use error::{Error, Result};

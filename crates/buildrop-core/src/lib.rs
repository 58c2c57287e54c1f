//! `buildrop` Core Library
//!
//! Shared functionality for `buildrop` components:
//! - Domain model for apps and releases (platform, signing type, status)
//! - Configuration resolution and hierarchy
//! - `SQLite` pool helpers and timestamps
//! - Common error types and tracing setup

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use model::{Platform, ReleaseStatus, SigningType};

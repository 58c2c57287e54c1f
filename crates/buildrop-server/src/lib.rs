//! `buildrop` OTA install server.
//!
//! Issues install links for uploaded builds, serves the iOS installer
//! manifest and the artifact itself with installer-correct headers, and
//! explains through a diagnostics endpoint why an install would fail.

pub mod auth;
pub mod blob;
pub mod diagnostics;
pub mod download;
pub mod error;
pub mod ingest;
pub mod install_link;
pub mod manifest;
pub mod origin;
pub mod request;
pub mod routes;
pub mod storage;

//! `SQLite` persistence for apps, releases, memberships and download logs.

mod db;
mod models;
mod queries;

#[cfg(test)]
mod tests;

pub use buildrop_core::db::DatabaseError;
pub use db::Database;
pub use models::*;

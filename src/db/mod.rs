//! Database module for Uptrail.
//!
//! Provides SQLite storage with embedded migrations.

mod models;
mod repository;
mod store;

pub use models::*;
pub use repository::*;
pub use store::*;

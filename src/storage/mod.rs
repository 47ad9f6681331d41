//! On-disk chain snapshot

pub mod database;

pub use database::Database;

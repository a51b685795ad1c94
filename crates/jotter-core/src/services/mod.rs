//! Services shared by Jotter front ends.

mod database;

pub use database::DatabaseService;

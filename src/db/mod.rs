//! Local database control
//!
//! Owns the lifecycle of the colocated mysqld: one-time initialization
//! and account seeding, configured starts and stops, the primary and
//! follower role transitions, and the physical backup/restore paths.

pub mod backup;
pub mod replication;
pub mod server;

pub use server::{DbError, InitOutcome, MysqlServer};

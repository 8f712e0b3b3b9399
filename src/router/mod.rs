//! Query-router control

pub mod proxysql;

pub use proxysql::{ProxysqlAdmin, RouterError};

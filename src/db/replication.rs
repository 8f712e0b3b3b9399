//! Replication role transitions
//!
//! A node is either the writable primary or a read-only follower of the
//! current leader. Transitions always pass through here so the
//! read-only flags and the replica configuration stay consistent.

use tracing::{debug, error, info};

use crate::db::server::{DbError, MysqlServer};

/// IO-thread state of a follower that has nothing left to fetch.
const IO_THREAD_IDLE: &str = "Waiting for master to send event";
/// SQL-thread state of a follower that has applied its whole relay log.
const SQL_THREAD_IDLE: &str = "Slave has read all relay log; waiting for more updates";

impl MysqlServer {
    /// Point replication at the given leader and go read-only.
    pub async fn make_follower(&self, leader_ip: &str) -> Result<(), DbError> {
        info!(leader = %leader_ip, "setting up replication");

        let replication = self.replication_account()?;
        self.exec_as_root("STOP SLAVE").await?;
        self.exec_no_log(
            &format!(
                "CHANGE MASTER TO MASTER_HOST = '{leader_ip}', MASTER_PORT = 3306, \
                 MASTER_USER = '{0}', MASTER_PASSWORD = '{1}', \
                 MASTER_AUTO_POSITION = 1, GET_MASTER_PUBLIC_KEY = 1",
                replication.user, replication.password
            ),
            "configure replication source",
        )
        .await?;
        self.exec_as_root("START SLAVE").await?;

        info!("setting server to read-only");
        self.exec_as_root("SET GLOBAL read_only = 1").await?;
        self.exec_as_root("SET GLOBAL super_read_only = 1").await?;

        Ok(())
    }

    /// Drop any replica configuration and accept writes.
    ///
    /// Run on every path that makes this node the primary: fresh init,
    /// restore-as-first-leader, and promotion. A restored backup can
    /// carry the previous owner's replica state, which must not survive.
    pub async fn clear_replication(&self) -> Result<(), DbError> {
        debug!("removing replication configuration");
        self.exec_as_root("STOP SLAVE").await?;
        self.exec_as_root("RESET SLAVE ALL").await?;

        info!("setting server to read-write");
        self.exec_as_root("SET GLOBAL super_read_only = 0").await?;
        self.exec_as_root("SET GLOBAL read_only = 0").await?;

        Ok(())
    }

    /// The leader address replication is currently configured against,
    /// or `None` when this node is not a follower.
    pub async fn configured_leader_ip(&self) -> Result<Option<String>, DbError> {
        let rows = self.query_as_root("SHOW SLAVE STATUS").await?;
        if rows.len() != 1 {
            return Ok(None);
        }

        let host: Option<String> = rows[0].get("Master_Host");
        if host.is_none() {
            error!("slave status row carries no Master_Host");
        }
        Ok(host)
    }

    /// Whether the relay log is fully fetched and applied.
    pub async fn replication_caught_up(&self) -> Result<bool, DbError> {
        let rows = self.query_as_root("SHOW SLAVE STATUS").await?;
        if rows.len() != 1 {
            return Ok(false);
        }

        let io_state: Option<String> = rows[0].get("Slave_IO_State");
        let sql_state: Option<String> = rows[0].get("Slave_SQL_Running_State");
        debug!(io_state = ?io_state, sql_state = ?sql_state, "follower state");

        Ok(is_caught_up(io_state.as_deref(), sql_state.as_deref()))
    }
}

/// Both replication threads idle and waiting means the follower has
/// nothing left to apply. Any other combination is "behind".
fn is_caught_up(io_state: Option<&str>, sql_state: Option<&str>) -> bool {
    io_state == Some(IO_THREAD_IDLE) && sql_state == Some(SQL_THREAD_IDLE)
}

#[cfg(test)]
#[path = "replication_test.rs"]
mod tests;

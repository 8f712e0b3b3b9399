//! ProxySQL controller
//!
//! ProxySQL sits in front of the fleet and splits client traffic:
//! writes to the replication leader's hostgroup, reads to the reader
//! hostgroup derived from it. Its admin interface speaks the MySQL
//! protocol on a separate port; every configuration section is applied
//! to the runtime and persisted to disk so it survives a router
//! restart.

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, Credentials, DbSettings};
use crate::process::{self, ProcessError};

const ADMIN_HOST: &str = "127.0.0.1";
const ADMIN_PORT: u16 = 6032;
const ADMIN_USER: &str = "admin";
const ADMIN_PASSWORD: &str = "admin";

const WRITER_HOSTGROUP: u32 = 1;
const READER_HOSTGROUP: u32 = 2;
const BACKEND_PORT: u16 = 3306;

const INIT_SCRIPT: &str = "/etc/init.d/proxysql";

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("proxysql admin query failed: {0}")]
    Sql(#[from] mysql_async::Error),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Cached view of the backend servers programmed into the router.
///
/// `plan` is pure; `commit` is called only after the router accepted
/// the new list, so a failed update is retried on the next pass.
#[derive(Debug, Default)]
struct BackendSet {
    current: Option<Vec<String>>,
}

impl BackendSet {
    /// Sorted target list when it differs from what is programmed.
    fn plan(&self, mut nodes: Vec<String>) -> Option<Vec<String>> {
        nodes.sort();
        if self.current.as_ref() == Some(&nodes) {
            return None;
        }
        Some(nodes)
    }

    fn commit(&mut self, nodes: Vec<String>) {
        self.current = Some(nodes);
    }
}

pub struct ProxysqlAdmin {
    application: Option<Credentials>,
    replication: Option<Credentials>,
    backends: BackendSet,
}

impl ProxysqlAdmin {
    pub fn new(settings: &DbSettings) -> Self {
        Self {
            application: settings.application.clone(),
            replication: settings.replication.clone(),
            backends: BackendSet::default(),
        }
    }

    /// Start the ProxySQL service.
    pub async fn start() -> Result<(), ProcessError> {
        info!("starting proxysql");
        process::run(INIT_SCRIPT, ["start"]).await
    }

    async fn connect(&self) -> Result<Conn, mysql_async::Error> {
        let opts = OptsBuilder::default()
            .ip_or_hostname(ADMIN_HOST)
            .tcp_port(ADMIN_PORT)
            .user(Some(ADMIN_USER))
            .pass(Some(ADMIN_PASSWORD));
        Conn::new(opts).await
    }

    /// Program the router's static configuration.
    ///
    /// Idempotent: rules and users are replaced wholesale, so a
    /// re-initialization converges to the same state.
    pub async fn initial_setup(&self) -> Result<(), RouterError> {
        let application = self
            .application
            .as_ref()
            .ok_or(ConfigError::MissingEnv("MYSQL_APPLICATION_USER"))?;
        let replication = self
            .replication
            .as_ref()
            .ok_or(ConfigError::MissingEnv("MYSQL_REPLICATION_USER"))?;

        info!("applying proxysql initial configuration");
        let mut conn = self.connect().await?;

        // Monitor account: ProxySQL probes backend health and
        // replication lag with the replication user.
        conn.query_drop(format!(
            "UPDATE global_variables SET variable_value = '{}' \
             WHERE variable_name = 'mysql-monitor_username'",
            replication.user
        ))
        .await?;
        conn.query_drop(format!(
            "UPDATE global_variables SET variable_value = '{}' \
             WHERE variable_name = 'mysql-monitor_password'",
            replication.password
        ))
        .await?;
        conn.query_drop("LOAD MYSQL VARIABLES TO RUNTIME").await?;
        conn.query_drop("SAVE MYSQL VARIABLES TO DISK").await?;

        // Reader hostgroup derives from the writer via the replication
        // hostgroup mapping: read-only backends are placed into the
        // reader group automatically.
        conn.query_drop(format!(
            "REPLACE INTO mysql_replication_hostgroups \
             (writer_hostgroup, reader_hostgroup, comment) \
             VALUES ({WRITER_HOSTGROUP}, {READER_HOSTGROUP}, 'mysql cluster')"
        ))
        .await?;
        conn.query_drop("LOAD MYSQL SERVERS TO RUNTIME").await?;
        conn.query_drop("SAVE MYSQL SERVERS TO DISK").await?;

        // Route SELECTs to the readers, except locking reads. The
        // FOR-UPDATE rule has the lower rule_id and is evaluated first.
        conn.query_drop("DELETE FROM mysql_query_rules").await?;
        conn.query_drop(format!(
            "INSERT INTO mysql_query_rules \
             (rule_id, active, match_digest, destination_hostgroup, apply) \
             VALUES (1, 1, '^SELECT.*FOR UPDATE', {WRITER_HOSTGROUP}, 1)"
        ))
        .await?;
        conn.query_drop(format!(
            "INSERT INTO mysql_query_rules \
             (rule_id, active, match_digest, destination_hostgroup, apply) \
             VALUES (2, 1, '^SELECT.*', {READER_HOSTGROUP}, 1)"
        ))
        .await?;
        conn.query_drop("LOAD MYSQL QUERY RULES TO RUNTIME").await?;
        conn.query_drop("SAVE MYSQL QUERY RULES TO DISK").await?;

        // The application account clients authenticate with.
        conn.query_drop(format!(
            "REPLACE INTO mysql_users (username, password, default_hostgroup) \
             VALUES ('{}', '{}', {WRITER_HOSTGROUP})",
            application.user, application.password
        ))
        .await?;
        conn.query_drop("LOAD MYSQL USERS TO RUNTIME").await?;
        conn.query_drop("SAVE MYSQL USERS TO DISK").await?;

        conn.disconnect().await?;
        info!("proxysql configuration applied");
        Ok(())
    }

    /// Reconcile the backend-server list with live membership.
    ///
    /// A set identical to what is already programmed is a no-op.
    /// Returns whether a reconciliation was performed.
    pub async fn update_backends(&mut self, nodes: Vec<String>) -> Result<bool, RouterError> {
        let Some(target) = self.backends.plan(nodes) else {
            debug!("backend list unchanged");
            return Ok(false);
        };

        info!(backends = ?target, "updating proxysql backend list");
        let mut conn = self.connect().await?;

        conn.query_drop("DELETE FROM mysql_servers").await?;
        for ip in &target {
            conn.query_drop(format!(
                "INSERT INTO mysql_servers (hostgroup_id, hostname, port) \
                 VALUES ({WRITER_HOSTGROUP}, '{ip}', {BACKEND_PORT})"
            ))
            .await?;
        }
        conn.query_drop("LOAD MYSQL SERVERS TO RUNTIME").await?;
        conn.query_drop("SAVE MYSQL SERVERS TO DISK").await?;

        conn.disconnect().await?;
        self.backends.commit(target);
        Ok(true)
    }
}

#[cfg(test)]
#[path = "proxysql_test.rs"]
mod tests;

//! Lifecycle and SQL admin channel of the local MySQL server

use std::path::PathBuf;
use std::time::Duration;

use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Row};
use thiserror::Error;
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, Credentials, DbSettings};
use crate::process::{self, ProcessError};
use crate::store::StoreError;

const DATA_DIR: &str = "/var/lib/mysql";
const SOCKET_PATH: &str = "/var/run/mysqld/mysqld.sock";
const DROPIN_CONFIG: &str = "/etc/mysql/conf.d/zz_cluster.cnf";
/// Presence of this transaction-log file marks the data dir initialized.
pub(super) const SENTINEL_FILE: &str = "ib_logfile0";

const MYSQLD_BINARY: &str = "/usr/sbin/mysqld";
const SERVER_BINARY: &str = "/usr/bin/mysqld_safe";
pub(super) const XTRABACKUP_BINARY: &str = "/usr/bin/xtrabackup";

const ADMIN_DATABASE: &str = "mysql";
/// How long a freshly started server may take to accept connections.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(120);
const CONNECT_POLL: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum DbError {
    #[error("mysql query failed: {0}")]
    Sql(#[from] mysql_async::Error),

    #[error("{0} failed")]
    Statement(String),

    #[error("server did not accept connections within {0:?}")]
    StartTimeout(Duration),

    #[error("database initialization failed: {0}")]
    InitFailed(String),

    #[error("backup failed: {0}")]
    BackupFailed(String),

    #[error("restore failed: {0}")]
    RestoreFailed(String),

    #[error("restored archive is not a database backup")]
    RestoreInvalid,

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cluster coordination failed: {0}")]
    Cluster(#[from] crate::cluster::ClusterError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, PartialEq, Eq)]
pub enum InitOutcome {
    Initialized,
    AlreadyInitialized,
}

/// Controller for the colocated mysqld.
///
/// Cheap to clone; background backup tasks take their own copy. The
/// per-purpose accounts are optional at construction and validated by
/// the operations that use them, so a plain stop or start does not
/// depend on the backup or replication variables being set.
#[derive(Clone)]
pub struct MysqlServer {
    pub(super) data_dir: PathBuf,
    socket: PathBuf,
    config_path: PathBuf,
    pub(super) root_password: String,
    application: Option<Credentials>,
    backup: Option<Credentials>,
    replication: Option<Credentials>,
}

impl MysqlServer {
    pub fn new(settings: &DbSettings) -> Self {
        Self {
            data_dir: PathBuf::from(DATA_DIR),
            socket: PathBuf::from(SOCKET_PATH),
            config_path: PathBuf::from(DROPIN_CONFIG),
            root_password: settings.root_password.clone(),
            application: settings.application.clone(),
            backup: settings.backup.clone(),
            replication: settings.replication.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn test_instance(base: &std::path::Path) -> Self {
        Self {
            data_dir: base.join("data"),
            socket: base.join("mysqld.sock"),
            config_path: base.join("zz_cluster.cnf"),
            root_password: "root-pw".to_string(),
            application: None,
            backup: Some(Credentials {
                user: "backup".to_string(),
                password: "backup-pw".to_string(),
            }),
            replication: Some(Credentials {
                user: "repl".to_string(),
                password: "repl-pw".to_string(),
            }),
        }
    }

    /// The xtrabackup account, required by the backup and restore paths.
    pub(super) fn backup_account(&self) -> Result<&Credentials, DbError> {
        self.backup
            .as_ref()
            .ok_or(DbError::Config(ConfigError::MissingEnv("MYSQL_BACKUP_USER")))
    }

    /// The replication account, required to become a follower.
    pub(super) fn replication_account(&self) -> Result<&Credentials, DbError> {
        self.replication
            .as_ref()
            .ok_or(DbError::Config(ConfigError::MissingEnv(
                "MYSQL_REPLICATION_USER",
            )))
    }

    /// Whether the data dir has ever been initialized.
    pub fn is_initialized(&self) -> bool {
        self.data_dir.join(SENTINEL_FILE).is_file()
    }

    /// Initialize an empty data dir and seed the operational accounts.
    ///
    /// A data dir that already carries the sentinel file is left alone.
    /// The server is started once without a root password, the accounts
    /// are created, and the server is shut down cleanly again.
    pub async fn init_if_fresh(&self, server_id: u64) -> Result<InitOutcome, DbError> {
        info!("initializing mysql data directory");

        if self.is_initialized() {
            info!("mysql is already initialized, skipping");
            return Ok(InitOutcome::AlreadyInitialized);
        }

        process::run(MYSQLD_BINARY, ["--initialize-insecure", "--user=mysql"])
            .await
            .map_err(|error| DbError::InitFailed(error.to_string()))?;

        self.build_configuration(server_id)?;
        let mut server = process::spawn(SERVER_BINARY, ["--user=mysql"])?;

        // During the first launch the server only listens on the socket
        // and root has no password yet.
        self.wait_for_connection(None).await?;
        self.seed_accounts().await?;

        debug!("initial setup done, shutting the server down");
        match self.exec(Some(&self.root_password), "SHUTDOWN").await {
            Ok(()) => {}
            Err(error) if is_connection_lost(&error) => {}
            Err(error) => return Err(error.into()),
        }
        server
            .wait()
            .await
            .map_err(|error| DbError::InitFailed(error.to_string()))?;

        info!("mysql database initialized");
        Ok(InitOutcome::Initialized)
    }

    async fn seed_accounts(&self) -> Result<(), DbError> {
        if let Some(app) = &self.application {
            debug!("creating application user");
            // The password plugin must stay mysql_native_password so
            // ProxySQL can proxy the account.
            for host in ["localhost", "%"] {
                self.exec_insecure(
                    &format!(
                        "CREATE USER '{0}'@'{host}' IDENTIFIED WITH mysql_native_password BY '{1}'",
                        app.user, app.password
                    ),
                    "create application user",
                )
                .await?;
                self.exec_insecure(
                    &format!("GRANT ALL PRIVILEGES ON *.* TO '{0}'@'{host}'", app.user),
                    "grant application user",
                )
                .await?;
            }
        } else {
            warn!("application credentials not configured, skipping account");
        }

        debug!("creating backup user");
        let backup = self.backup_account()?;
        self.exec_insecure(
            &format!(
                "CREATE USER '{0}'@'localhost' IDENTIFIED BY '{1}'",
                backup.user, backup.password
            ),
            "create backup user",
        )
        .await?;
        self.exec_insecure(
            &format!(
                "GRANT BACKUP_ADMIN, PROCESS, RELOAD, LOCK TABLES, REPLICATION CLIENT \
                 ON *.* TO '{0}'@'localhost'",
                backup.user
            ),
            "grant backup user",
        )
        .await?;
        self.exec_insecure(
            &format!(
                "GRANT SELECT ON performance_schema.log_status TO '{0}'@'localhost'",
                backup.user
            ),
            "grant backup user log access",
        )
        .await?;

        debug!("creating replication user");
        let replication = self.replication_account()?;
        self.exec_insecure(
            &format!(
                "CREATE USER '{0}'@'%' IDENTIFIED BY '{1}'",
                replication.user, replication.password
            ),
            "create replication user",
        )
        .await?;
        self.exec_insecure(
            &format!(
                "GRANT REPLICATION SLAVE ON *.* TO '{0}'@'%'",
                replication.user
            ),
            "grant replication user",
        )
        .await?;

        debug!("setting root permissions");
        self.exec_insecure(
            &format!(
                "CREATE USER 'root'@'%' IDENTIFIED BY '{0}'",
                self.root_password
            ),
            "create remote root user",
        )
        .await?;
        self.exec_insecure(
            "GRANT ALL PRIVILEGES ON *.* TO 'root'@'%' WITH GRANT OPTION",
            "grant remote root user",
        )
        .await?;
        self.exec_insecure(
            &format!(
                "ALTER USER 'root'@'localhost' IDENTIFIED BY '{0}'",
                self.root_password
            ),
            "set local root password",
        )
        .await?;

        Ok(())
    }

    /// Write the drop-in config fragment for this node.
    pub fn build_configuration(&self, server_id: u64) -> Result<(), DbError> {
        debug!(server_id, path = %self.config_path.display(), "writing server configuration");
        std::fs::write(&self.config_path, render_config(server_id))?;
        Ok(())
    }

    /// Start the server and wait until it accepts connections.
    pub async fn start(&self, server_id: u64) -> Result<Child, DbError> {
        self.build_configuration(server_id)?;

        info!("starting mysql server");
        let child = process::spawn(SERVER_BINARY, ["--user=mysql"])?;
        self.wait_for_connection(Some(&self.root_password)).await?;
        Ok(child)
    }

    /// Stop the server via `SHUTDOWN`.
    ///
    /// A server fresh out of initialization still accepts passwordless
    /// root over the socket; try that first and fall back to the root
    /// password when rejected.
    pub async fn stop(&self) -> Result<(), DbError> {
        info!("stopping mysql server");

        match self.exec(None, "SHUTDOWN").await {
            Ok(()) => Ok(()),
            Err(error) if is_connection_lost(&error) => Ok(()),
            Err(_) => {
                debug!("passwordless shutdown rejected, retrying with root credentials");
                match self.exec(Some(&self.root_password), "SHUTDOWN").await {
                    Ok(()) => Ok(()),
                    Err(error) if is_connection_lost(&error) => Ok(()),
                    Err(error) => Err(error.into()),
                }
            }
        }
    }

    /// Version string of the running server.
    pub async fn version(&self) -> Result<String, DbError> {
        let rows = self.query_as_root("SELECT VERSION()").await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|row| row.get(0))
            .unwrap_or_else(|| "unknown".to_string()))
    }

    /// Execute a statement over the root admin channel.
    pub async fn exec_as_root(&self, sql: &str) -> Result<(), DbError> {
        self.exec(Some(&self.root_password), sql)
            .await
            .map_err(DbError::Sql)
    }

    /// Execute a statement whose text embeds credentials.
    ///
    /// The server error may echo the statement back, so the failure is
    /// reported under the given label instead.
    pub async fn exec_no_log(&self, sql: &str, label: &str) -> Result<(), DbError> {
        self.exec(Some(&self.root_password), sql)
            .await
            .map_err(|error| {
                error!(step = label, kind = %error_kind(&error), "statement failed");
                DbError::Statement(label.to_string())
            })
    }

    /// Query over the root admin channel.
    pub async fn query_as_root(&self, sql: &str) -> Result<Vec<Row>, DbError> {
        let mut conn = self.connect("root", Some(&self.root_password)).await?;
        let rows: Vec<Row> = conn.query(sql).await?;
        conn.disconnect().await?;
        Ok(rows)
    }

    /// Setup-phase statement: passwordless root, credential-safe errors.
    async fn exec_insecure(&self, sql: &str, label: &str) -> Result<(), DbError> {
        self.exec(None, sql).await.map_err(|error| {
            error!(step = label, kind = %error_kind(&error), "statement failed");
            DbError::Statement(label.to_string())
        })
    }

    async fn exec(&self, password: Option<&str>, sql: &str) -> Result<(), mysql_async::Error> {
        let mut conn = self.connect("root", password).await?;
        conn.query_drop(sql).await?;
        conn.disconnect().await?;
        Ok(())
    }

    async fn connect(
        &self,
        user: &str,
        password: Option<&str>,
    ) -> Result<Conn, mysql_async::Error> {
        let opts = OptsBuilder::default()
            .socket(Some(self.socket.to_string_lossy()))
            .user(Some(user))
            .pass(password)
            .db_name(Some(ADMIN_DATABASE));
        Conn::new(opts).await
    }

    async fn wait_for_connection(&self, password: Option<&str>) -> Result<(), DbError> {
        let deadline = tokio::time::Instant::now() + CONNECT_TIMEOUT;
        let mut last_error = None;

        while tokio::time::Instant::now() < deadline {
            match self.connect("root", password).await {
                Ok(conn) => {
                    let _ = conn.disconnect().await;
                    debug!("mysql connection established");
                    return Ok(());
                }
                Err(error) => {
                    last_error = Some(error);
                    tokio::time::sleep(CONNECT_POLL).await;
                }
            }
        }

        error!(
            timeout = ?CONNECT_TIMEOUT,
            last_error = ?last_error,
            "unable to connect to mysql"
        );
        Err(DbError::StartTimeout(CONNECT_TIMEOUT))
    }
}

pub(super) fn is_connection_lost(error: &mysql_async::Error) -> bool {
    matches!(error, mysql_async::Error::Io(_))
}

/// Short classification for logs that must not carry the server message.
fn error_kind(error: &mysql_async::Error) -> &'static str {
    match error {
        mysql_async::Error::Server(_) => "server",
        mysql_async::Error::Io(_) => "io",
        mysql_async::Error::Driver(_) => "driver",
        _ => "other",
    }
}

/// Render the drop-in config fragment for the given server id.
fn render_config(server_id: u64) -> String {
    format!(
        "# DO NOT EDIT - This file was generated automatically\n\
         [mysqld]\n\
         server_id={server_id}\n\
         gtid_mode=ON\n\
         enforce-gtid-consistency=ON\n"
    )
}

#[cfg(test)]
#[path = "server_test.rs"]
mod tests;

//! Environment-based configuration
//!
//! Configuration arrives through environment variables, loaded when the
//! selected operation needs them: a plain `mysql_stop` must not fail
//! over an unset object-store key. Each collaborating subsystem has its
//! own settings struct with its own loader; `join_or_bootstrap` loads
//! all of them, strictly, before any cluster work starts. A missing
//! required variable is reported by name so the operator can fix the
//! deployment manifest.

use thiserror::Error;

/// Interface used for the node identity when `MCM_BIND_INTERFACE` is unset.
pub const DEFAULT_BIND_INTERFACE: &str = "eth0";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    MissingEnv(&'static str),

    #[error("no IPv4 address found on interface {0}")]
    NoAddress(String),

    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[from] std::io::Error),
}

/// A username/password pair for one of the operational accounts.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

/// Interface whose IPv4 address identifies this node in the cluster.
pub fn bind_interface() -> String {
    std::env::var("MCM_BIND_INTERFACE").unwrap_or_else(|_| DEFAULT_BIND_INTERFACE.to_string())
}

/// Launch settings for the local Consul agent.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Interface the agent binds to.
    pub bind_interface: String,
    /// Address of an existing Consul server to join.
    pub bootstrap_server: String,
}

impl AgentSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            bind_interface: required("CONSUL_BIND_INTERFACE")?,
            bootstrap_server: required("CONSUL_BOOTSTRAP_SERVER")?,
        })
    }
}

/// Object-store connection settings.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    pub access_key: String,
    pub secret_key: String,
}

impl StoreSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: required("MINIO_URL")?,
            access_key: required("MINIO_ACCESS_KEY")?,
            secret_key: required("MINIO_SECRET_KEY")?,
        })
    }
}

/// Settings for the local database and its operational accounts.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub root_password: String,
    /// Account used by xtrabackup.
    pub backup: Option<Credentials>,
    /// Account the followers replicate with; also ProxySQL's monitor user.
    pub replication: Option<Credentials>,
    /// Account proxied to clients. Required for router setup only.
    pub application: Option<Credentials>,
}

impl DbSettings {
    /// Load with only the root password required.
    ///
    /// Operations validate the accounts they actually touch, so e.g.
    /// stopping the server works without the backup credentials set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            root_password: required("MYSQL_ROOT_PASSWORD")?,
            backup: optional_credentials("MYSQL_BACKUP_USER", "MYSQL_BACKUP_PASSWORD"),
            replication: optional_credentials(
                "MYSQL_REPLICATION_USER",
                "MYSQL_REPLICATION_PASSWORD",
            ),
            application: optional_credentials(
                "MYSQL_APPLICATION_USER",
                "MYSQL_APPLICATION_PASSWORD",
            ),
        })
    }

    /// Strict load for `join_or_bootstrap`.
    ///
    /// The backup and replication accounts are seeded and used during
    /// bootstrap, so their absence must surface before any cluster work
    /// starts rather than halfway through it.
    pub fn cluster_from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            root_password: required("MYSQL_ROOT_PASSWORD")?,
            backup: Some(Credentials {
                user: required("MYSQL_BACKUP_USER")?,
                password: required("MYSQL_BACKUP_PASSWORD")?,
            }),
            replication: Some(Credentials {
                user: required("MYSQL_REPLICATION_USER")?,
                password: required("MYSQL_REPLICATION_PASSWORD")?,
            }),
            application: optional_credentials(
                "MYSQL_APPLICATION_USER",
                "MYSQL_APPLICATION_PASSWORD",
            ),
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnv(name))
}

fn optional_credentials(user_var: &str, password_var: &str) -> Option<Credentials> {
    match (std::env::var(user_var), std::env::var(password_var)) {
        (Ok(user), Ok(password)) => Some(Credentials { user, password }),
        _ => None,
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

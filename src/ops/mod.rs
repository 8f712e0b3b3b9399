//! Operations selectable from the command line

pub mod bootstrap;
pub mod control;

use std::sync::Arc;

use tracing::info;

use crate::cluster::ConsulClient;
use crate::config::{self, AgentSettings, DbSettings, StoreSettings};
use crate::db::backup::default_backup_max_age;
use crate::db::MysqlServer;
use crate::net;
use crate::ops::control::ControlLoop;
use crate::router::ProxysqlAdmin;
use crate::store::BackupStore;

/// The operations this binary can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Join the existing cluster or bootstrap a new one, then supervise.
    JoinOrBootstrap,
    MysqlBackup,
    MysqlRestore,
    MysqlStart,
    MysqlStop,
    MysqlAutobackup,
    ProxysqlInit,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "join_or_bootstrap" => Some(Self::JoinOrBootstrap),
            "mysql_backup" => Some(Self::MysqlBackup),
            "mysql_restore" => Some(Self::MysqlRestore),
            "mysql_start" => Some(Self::MysqlStart),
            "mysql_stop" => Some(Self::MysqlStop),
            "mysql_autobackup" => Some(Self::MysqlAutobackup),
            "proxysql_init" => Some(Self::ProxysqlInit),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinOrBootstrap => "join_or_bootstrap",
            Self::MysqlBackup => "mysql_backup",
            Self::MysqlRestore => "mysql_restore",
            Self::MysqlStart => "mysql_start",
            Self::MysqlStop => "mysql_stop",
            Self::MysqlAutobackup => "mysql_autobackup",
            Self::ProxysqlInit => "proxysql_init",
        }
    }
}

/// Execute the selected operation.
///
/// Each arm loads only the settings it actually consumes; stopping the
/// local server must not require the object-store or cluster variables
/// to be present.
pub async fn run(operation: Operation) -> anyhow::Result<()> {
    match operation {
        Operation::JoinOrBootstrap => {
            let agent_settings = AgentSettings::from_env()?;
            let store_settings = StoreSettings::from_env()?;
            let db_settings = DbSettings::cluster_from_env()?;
            let bootstrapped =
                bootstrap::join_or_bootstrap(&agent_settings, &store_settings, &db_settings)
                    .await?;
            ControlLoop::new(bootstrapped).run().await
        }
        Operation::MysqlBackup => {
            let db = MysqlServer::new(&DbSettings::from_env()?);
            let store = BackupStore::new(&StoreSettings::from_env()?);
            db.backup(&store).await?;
            Ok(())
        }
        Operation::MysqlRestore => {
            let db = MysqlServer::new(&DbSettings::from_env()?);
            let store = BackupStore::new(&StoreSettings::from_env()?);
            db.restore(&store).await?;
            Ok(())
        }
        Operation::MysqlStart => {
            let db = MysqlServer::new(&DbSettings::from_env()?);
            let local_ip = net::local_ip(&config::bind_interface())?;
            let consul = ConsulClient::new(local_ip);
            let server_id = consul.allocate_server_id().await?;
            // The child keeps running after this process exits.
            let _server = db.start(server_id).await?;
            info!("mysql server is up");
            Ok(())
        }
        Operation::MysqlStop => {
            let db = MysqlServer::new(&DbSettings::from_env()?);
            db.stop().await?;
            Ok(())
        }
        Operation::MysqlAutobackup => {
            let db = MysqlServer::new(&DbSettings::from_env()?);
            let store = BackupStore::new(&StoreSettings::from_env()?);
            let local_ip = net::local_ip(&config::bind_interface())?;
            let consul = Arc::new(ConsulClient::new(local_ip));
            consul.create_health_lease().await?;
            // One-shot invocation: run the backup in the foreground so
            // it finishes before the process exits.
            if db.backup_due(&consul, &store, default_backup_max_age()).await? {
                db.backup(&store).await?;
            } else {
                info!("no backup needed");
            }
            Ok(())
        }
        Operation::ProxysqlInit => {
            let router = ProxysqlAdmin::new(&DbSettings::from_env()?);
            router.initial_setup().await?;
            Ok(())
        }
    }
}

#[cfg(test)]
#[path = "ops_test.rs"]
mod tests;

//! Startup: join the cluster or bootstrap a new one
//!
//! Runs once per process, before the control loop. Decides whether the
//! local database must be initialized from scratch, restored from the
//! newest backup, or held back until a peer produces one. Afterwards it
//! brings up the database and the router and registers the node.

use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use tracing::{info, warn};

use crate::cluster::{agent, ConsulClient, RenewTask};
use crate::config::{self, AgentSettings, DbSettings, StoreSettings};
use crate::db::MysqlServer;
use crate::net;
use crate::process::Supervised;
use crate::router::ProxysqlAdmin;
use crate::store::BackupStore;

/// Poll interval while waiting for a leaderless-but-populated cluster
/// to settle.
const STABILITY_POLL: Duration = Duration::from_secs(5);

/// Bounded wait for the first backup during a cold follower start.
const BACKUP_WAIT_RETRIES: u32 = 100;
const BACKUP_WAIT_PAUSE: Duration = Duration::from_secs(5);

/// What startup has to do to the local database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapPlan {
    /// First leader, nothing to restore: initialize an empty database.
    InitFresh,
    /// A backup exists: seed the local history from it.
    Restore,
    /// Not the leader and no base exists yet: wait for the leader's
    /// first backup, then restore it.
    WaitThenRestore,
}

fn plan(is_leader: bool, backup_exists: bool) -> BootstrapPlan {
    match (is_leader, backup_exists) {
        (true, false) => BootstrapPlan::InitFresh,
        (true, true) => BootstrapPlan::Restore,
        (false, true) => BootstrapPlan::Restore,
        (false, false) => BootstrapPlan::WaitThenRestore,
    }
}

/// Everything the control loop takes over after startup.
pub struct Bootstrapped {
    pub consul: Arc<ConsulClient>,
    pub db: MysqlServer,
    pub store: BackupStore,
    pub router: ProxysqlAdmin,
    pub renew: RenewTask,
    pub children: Vec<Supervised>,
}

/// Bring this node into the cluster. Any failure here is fatal.
pub async fn join_or_bootstrap(
    agent_settings: &AgentSettings,
    store_settings: &StoreSettings,
    db_settings: &DbSettings,
) -> anyhow::Result<Bootstrapped> {
    let local_ip = net::local_ip(&config::bind_interface())?;
    info!(ip = %local_ip, "node identity resolved");

    let agent_process = agent::start(agent_settings)?;
    let consul = Arc::new(ConsulClient::new(local_ip));
    consul.create_health_lease().await?;

    let store = BackupStore::new(store_settings);
    store.setup().await?;
    let backup_exists = store.backup_exists().await?;

    wait_for_stable_cluster(&consul).await?;

    let is_leader = consul.try_become_leader().await?;

    // Restore and the cold-backup wait can outlast the lease TTL; keep
    // the sessions alive from the background until the loop takes over.
    let renew = RenewTask::new();
    renew.start(consul.clone()).await;

    let db = MysqlServer::new(db_settings);
    let server_id = consul.allocate_server_id().await?;
    info!(server_id, leader = is_leader, backup = backup_exists, "bootstrap decision");

    match plan(is_leader, backup_exists) {
        BootstrapPlan::InitFresh => {
            db.init_if_fresh(server_id).await?;
        }
        BootstrapPlan::Restore => {
            db.restore(&store).await?;
        }
        BootstrapPlan::WaitThenRestore => {
            wait_for_first_backup(&consul, &store).await?;
            db.restore(&store).await?;
        }
    }

    ProxysqlAdmin::start().await?;
    let mysqld = db.start(server_id).await?;
    let router = ProxysqlAdmin::new(db_settings);
    router.initial_setup().await?;

    let version = db.version().await?;
    consul.register_node(&version, server_id).await?;

    // A restored backup can carry the previous primary's replica
    // configuration; the control loop re-targets followers explicitly.
    db.clear_replication().await?;
    consul.register_service(is_leader).await?;

    renew.stop().await;

    info!(leader = is_leader, "bootstrap complete");
    Ok(Bootstrapped {
        consul,
        db,
        store,
        router,
        renew,
        children: vec![
            Supervised::new("consul-agent", agent_process),
            Supervised::new("mysqld", mysqld),
        ],
    })
}

/// Hold until the cluster has a leader or is empty.
///
/// Peers without a leader means a failover is in flight; bootstrapping
/// onto a possibly stale local backup now could split history.
async fn wait_for_stable_cluster(consul: &ConsulClient) -> anyhow::Result<()> {
    loop {
        if consul.leader_ip().await?.is_some() {
            return Ok(());
        }
        let nodes = consul.list_nodes().await?;
        if nodes.is_empty() {
            return Ok(());
        }
        info!(
            nodes = ?nodes,
            "other nodes detected but no leader, waiting for the cluster to settle"
        );
        tokio::time::sleep(STABILITY_POLL).await;
    }
}

/// Poll for the leader's first backup, keeping our lease alive.
async fn wait_for_first_backup(
    consul: &ConsulClient,
    store: &BackupStore,
) -> anyhow::Result<()> {
    info!("no backup exists yet, waiting for the leader to produce one");

    for attempt in 1..=BACKUP_WAIT_RETRIES {
        match store.backup_exists().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(error) => warn!(attempt, %error, "backup check failed"),
        }
        consul.renew_all().await;
        tokio::time::sleep(BACKUP_WAIT_PAUSE).await;
    }

    bail!("no backup appeared after {BACKUP_WAIT_RETRIES} attempts")
}

#[cfg(test)]
#[path = "bootstrap_test.rs"]
mod tests;

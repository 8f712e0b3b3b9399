//! Steady-state control loop
//!
//! Wakes once per second to poll child liveness and runs at most one of
//! three timed duties per wake-up: the leader check (backend
//! reconciliation, promotion, follower re-targeting), the session
//! refresh, and the backup check. Failures inside a duty are logged and
//! retried on the next tick; a node that cannot self-heal loses its
//! lease and drops out of the cluster on its own.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::cluster::{ConsulClient, RenewTask};
use crate::db::backup::default_backup_max_age;
use crate::db::MysqlServer;
use crate::ops::bootstrap::Bootstrapped;
use crate::process::Supervised;
use crate::router::ProxysqlAdmin;
use crate::store::BackupStore;

const LOOP_PAUSE: Duration = Duration::from_secs(1);
const LEADER_CHECK_INTERVAL: Duration = Duration::from_secs(5);
const SESSION_REFRESH_INTERVAL: Duration = Duration::from_secs(5);
const BACKUP_CHECK_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tick {
    LeaderCheck,
    SessionRefresh,
    BackupCheck,
}

/// Multiplexes the three duty timers over a monotonic clock.
///
/// At most one duty fires per call, so no wake-up ever runs two duties
/// back to back; a second elapsed timer fires on the following call.
struct Timers {
    leader_check: Instant,
    session_refresh: Instant,
    backup_check: Instant,
}

impl Timers {
    fn new(now: Instant) -> Self {
        Self {
            leader_check: now,
            session_refresh: now,
            backup_check: now,
        }
    }

    fn due(&mut self, now: Instant) -> Option<Tick> {
        if now.saturating_duration_since(self.leader_check) >= LEADER_CHECK_INTERVAL {
            self.leader_check = now;
            return Some(Tick::LeaderCheck);
        }
        if now.saturating_duration_since(self.session_refresh) >= SESSION_REFRESH_INTERVAL {
            self.session_refresh = now;
            return Some(Tick::SessionRefresh);
        }
        if now.saturating_duration_since(self.backup_check) >= BACKUP_CHECK_INTERVAL {
            self.backup_check = now;
            return Some(Tick::BackupCheck);
        }
        None
    }
}

pub struct ControlLoop {
    consul: Arc<ConsulClient>,
    db: MysqlServer,
    store: BackupStore,
    router: ProxysqlAdmin,
    renew: RenewTask,
    children: Vec<Supervised>,
    /// Latched the first time replication reports caught up. Without
    /// the latch, transient lag would de-qualify a good failover
    /// candidate.
    able_to_promote: bool,
}

impl ControlLoop {
    pub fn new(bootstrapped: Bootstrapped) -> Self {
        Self {
            consul: bootstrapped.consul,
            db: bootstrapped.db,
            store: bootstrapped.store,
            router: bootstrapped.router,
            renew: bootstrapped.renew,
            children: bootstrapped.children,
            able_to_promote: false,
        }
    }

    /// Run until the process is killed.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("entering control loop");
        let mut timers = Timers::new(Instant::now());

        loop {
            tokio::time::sleep(LOOP_PAUSE).await;

            for child in &mut self.children {
                child.poll();
            }

            match timers.due(Instant::now()) {
                Some(Tick::LeaderCheck) => {
                    if let Err(error) = self.leader_check().await {
                        warn!(%error, "leader check failed, will retry");
                    }
                }
                Some(Tick::SessionRefresh) => {
                    self.consul.renew_all().await;
                }
                Some(Tick::BackupCheck) => {
                    // Listing a large bucket can take longer than the
                    // refresh cadence allows; keep the lease alive from
                    // the background for the duration.
                    self.renew.start(self.consul.clone()).await;
                    if let Err(error) = self
                        .db
                        .backup_if_due(&self.consul, &self.store, default_backup_max_age())
                        .await
                    {
                        warn!(%error, "backup check failed, will retry");
                    }
                    self.renew.stop().await;
                }
                None => {}
            }
        }
    }

    async fn leader_check(&mut self) -> anyhow::Result<()> {
        let nodes = self.consul.list_nodes().await?;
        self.router.update_backends(nodes).await?;

        if !self.able_to_promote && self.db.replication_caught_up().await? {
            info!("replication caught up, node can now promote");
            self.able_to_promote = true;
        }

        let mut leader = self.consul.is_leader().await?;

        if !leader && self.able_to_promote && self.consul.try_become_leader().await? {
            info!("promoted to replication leader");
            self.db.clear_replication().await?;
            self.consul.register_service(true).await?;
            leader = true;
        }

        if !leader {
            if let Some(real) = self.consul.leader_ip().await? {
                let configured = self.db.configured_leader_ip().await?;
                if configured.as_deref() != Some(real.as_str()) {
                    info!(
                        leader = %real,
                        configured = configured.as_deref().unwrap_or("none"),
                        "re-targeting replication"
                    );
                    self.db.make_follower(&real).await?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;

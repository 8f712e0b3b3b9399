//! Session auto-renewal
//!
//! Long blocking phases (restore, backup) would starve the main task's
//! renewal cadence and let the health lease expire, taking the node's
//! registration with it. During those phases a background task renews
//! every active session on a short interval. The task is started and
//! stopped repeatedly over the process lifetime; both are idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cluster::ConsulClient;

/// Renewal cadence, well under a third of the session TTL.
const RENEW_INTERVAL: Duration = Duration::from_secs(2);

pub struct RenewTask {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RenewTask {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start renewing in the background. A second start is a no-op.
    pub async fn start(&self, client: Arc<ConsulClient>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("session auto-renew already running");
            return;
        }

        info!("starting session auto-renew");
        let running = self.running.clone();
        let task = tokio::spawn(async move {
            // The first tick fires immediately, renewing on entry to the
            // blocking phase the caller is about to start.
            let mut interval = tokio::time::interval(RENEW_INTERVAL);
            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                client.renew_all().await;
            }
            debug!("session auto-renew task exited");
        });

        *self.handle.lock().await = Some(task);
    }

    /// Stop the background task and wait for it to finish.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(task) = self.handle.lock().await.take() {
            let _ = task.await;
        }
        info!("session auto-renew stopped");
    }
}

impl Default for RenewTask {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "renew_test.rs"]
mod tests;

//! Typed client for the Consul primitives the supervisor relies on
//!
//! Talks to the local agent's HTTP API. Every key this node owns is
//! acquired under its health session, so an expired lease removes the
//! node's registration and releases the replication-leader lock without
//! any cleanup code running here.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Address of the colocated Consul agent.
const AGENT_URL: &str = "http://127.0.0.1:8500";

/// Monotonic server-id counter, updated by compare-and-swap only.
const SERVER_ID_KEY: &str = "mcm/server_id";
/// Per-node registration keys live below this path.
const INSTANCES_PREFIX: &str = "mcm/instances/";
/// The single replication-leader lock key.
const LEADER_KEY: &str = "mcm/replication_leader";

/// Session name shown in the Consul UI.
const SESSION_NAME: &str = "mcm/instances";
/// Consul invalidates a session around 2x this value.
const SESSION_TTL: &str = "15s";
/// Released locks must be reclaimable immediately during failover.
const SESSION_LOCK_DELAY: &str = "0s";
/// Keys acquired under the session are deleted when it is invalidated.
const SESSION_BEHAVIOR: &str = "delete";

/// Retry bound for the server-id CAS loop.
const SERVER_ID_RETRIES: u32 = 100;
const SERVER_ID_RETRY_PAUSE: Duration = Duration::from_millis(250);

/// A freshly launched agent needs a moment to open its HTTP port.
const CONNECT_RETRIES: u32 = 30;
const CONNECT_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Name of the database service in the catalog.
const SERVICE_NAME: &str = "mysql";
const SERVICE_PORT: u16 = 3306;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("consul request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("consul agent did not become reachable")]
    AgentUnreachable,

    #[error("server-id allocation exhausted after {0} attempts")]
    ServerIdExhausted(u32),

    #[error("node registration {0} was not accepted under our session")]
    RegistrationConflict(String),

    #[error("no health session has been created")]
    SessionMissing,

    #[error("malformed value at {key}: {reason}")]
    MalformedValue { key: String, reason: String },

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Value of a node-registration key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub ip_address: String,
    pub server_id: u64,
    pub mysql_version: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServerIdRecord {
    last_used_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LeaderRecord {
    ip_address: String,
}

#[derive(Debug, Serialize)]
struct SessionRequest {
    #[serde(rename = "Name")]
    name: &'static str,
    #[serde(rename = "TTL")]
    ttl: &'static str,
    #[serde(rename = "LockDelay")]
    lock_delay: &'static str,
    #[serde(rename = "Behavior")]
    behavior: &'static str,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Value")]
    value: Option<String>,
    #[serde(rename = "ModifyIndex")]
    modify_index: u64,
    #[serde(rename = "Session")]
    session: Option<String>,
}

#[derive(Debug, Serialize)]
struct ServiceRegistration {
    #[serde(rename = "Name")]
    name: &'static str,
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Port")]
    port: u16,
    #[serde(rename = "Tags")]
    tags: Vec<&'static str>,
}

/// Handle to the membership layer.
///
/// Created once per process and threaded explicitly through bootstrap,
/// the control loop and background backup tasks.
pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
    local_ip: Ipv4Addr,
    health_session: RwLock<Option<String>>,
    active_sessions: RwLock<Vec<String>>,
}

impl ConsulClient {
    pub fn new(local_ip: Ipv4Addr) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: AGENT_URL.to_string(),
            local_ip,
            health_session: RwLock::new(None),
            active_sessions: RwLock::new(Vec::new()),
        }
    }

    /// The address this node advertises as its identity.
    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    /// Create the health session all owned keys are acquired under.
    ///
    /// Retries connection failures for a bounded time; the agent child
    /// is typically still opening its HTTP port when this runs.
    pub async fn create_health_lease(&self) -> Result<String, ClusterError> {
        let request = SessionRequest {
            name: SESSION_NAME,
            ttl: SESSION_TTL,
            lock_delay: SESSION_LOCK_DELAY,
            behavior: SESSION_BEHAVIOR,
        };

        for attempt in 1..=CONNECT_RETRIES {
            let response = self
                .http
                .put(format!("{}/v1/session/create", self.base_url))
                .json(&request)
                .send()
                .await;

            match response {
                Ok(response) => {
                    let session: SessionResponse =
                        response.error_for_status()?.json().await?;
                    info!(session = %session.id, "created health session");
                    self.remember_session(&session.id);
                    return Ok(session.id);
                }
                Err(error) if error.is_connect() => {
                    debug!(attempt, %error, "consul agent not reachable yet");
                    tokio::time::sleep(CONNECT_RETRY_PAUSE).await;
                }
                Err(error) => return Err(error.into()),
            }
        }

        Err(ClusterError::AgentUnreachable)
    }

    fn remember_session(&self, id: &str) {
        if let Ok(mut health) = self.health_session.write() {
            *health = Some(id.to_string());
        }
        if let Ok(mut sessions) = self.active_sessions.write() {
            sessions.push(id.to_string());
        }
    }

    fn health_session(&self) -> Result<String, ClusterError> {
        self.health_session
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(ClusterError::SessionMissing)
    }

    /// Synchronous renewal pass over every active session.
    ///
    /// Renewal failures are logged, not returned: a session that cannot
    /// be renewed will expire and the cluster reacts to that, so there
    /// is nothing for the caller to handle.
    pub async fn renew_all(&self) {
        let sessions = match self.active_sessions.read() {
            Ok(guard) => guard.clone(),
            Err(_) => return,
        };

        for session in sessions {
            debug!(session = %session, "renewing session");
            let result = self
                .http
                .put(format!("{}/v1/session/renew/{session}", self.base_url))
                .send()
                .await
                .and_then(|response| response.error_for_status());

            if let Err(error) = result {
                warn!(session = %session, %error, "session renewal failed");
            }
        }
    }

    /// Allocate a cluster-unique server id by compare-and-swap.
    pub async fn allocate_server_id(&self) -> Result<u64, ClusterError> {
        for attempt in 1..=SERVER_ID_RETRIES {
            match self.kv_get(SERVER_ID_KEY).await? {
                None => {
                    // First node: create the counter starting at 1.
                    let body = serde_json::to_string(&ServerIdRecord { last_used_id: 1 })?;
                    if self.kv_put_cas(SERVER_ID_KEY, &body, 0).await? {
                        debug!("created server-id counter, allocated id 1");
                        return Ok(1);
                    }
                    debug!(attempt, "server-id counter appeared concurrently, retrying");
                }
                Some(entry) => {
                    let Some(payload) = decode_value(&entry, SERVER_ID_KEY)? else {
                        // Present but empty; treat like a lost race.
                        warn!(attempt, "server-id counter exists but is empty, retrying");
                        tokio::time::sleep(SERVER_ID_RETRY_PAUSE).await;
                        continue;
                    };

                    let record: ServerIdRecord =
                        serde_json::from_slice(&payload).map_err(|error| {
                            ClusterError::MalformedValue {
                                key: SERVER_ID_KEY.to_string(),
                                reason: error.to_string(),
                            }
                        })?;

                    let next = ServerIdRecord {
                        last_used_id: record.last_used_id + 1,
                    };
                    let body = serde_json::to_string(&next)?;
                    if self
                        .kv_put_cas(SERVER_ID_KEY, &body, entry.modify_index)
                        .await?
                    {
                        debug!(server_id = next.last_used_id, "allocated server id");
                        return Ok(next.last_used_id);
                    }
                    debug!(attempt, "server-id CAS lost, retrying");
                }
            }
            tokio::time::sleep(SERVER_ID_RETRY_PAUSE).await;
        }

        Err(ClusterError::ServerIdExhausted(SERVER_ID_RETRIES))
    }

    /// Register this node under `mcm/instances/<ip>`, acquired by the
    /// health session so the key vanishes with the lease.
    pub async fn register_node(
        &self,
        mysql_version: &str,
        server_id: u64,
    ) -> Result<(), ClusterError> {
        let record = NodeRecord {
            ip_address: self.local_ip.to_string(),
            server_id,
            mysql_version: mysql_version.to_string(),
        };
        let key = format!("{INSTANCES_PREFIX}{}", self.local_ip);
        let session = self.health_session()?;

        let accepted = self
            .kv_put_acquire(&key, &serde_json::to_string(&record)?, &session)
            .await?;
        if !accepted {
            return Err(ClusterError::RegistrationConflict(key));
        }

        info!(ip = %self.local_ip, server_id, "registered node");
        Ok(())
    }

    /// Sorted list of the advertised addresses of all live nodes.
    pub async fn list_nodes(&self) -> Result<Vec<String>, ClusterError> {
        let entries = self.kv_list(INSTANCES_PREFIX).await?;

        let mut payloads = Vec::new();
        for entry in &entries {
            if let Some(payload) = decode_value(entry, INSTANCES_PREFIX)? {
                payloads.push(payload);
            }
        }

        Ok(collect_node_ips(&payloads))
    }

    /// Try to acquire the replication-leader key.
    ///
    /// Returns `true` only when this call actually took the lock. An
    /// existing key is never overwritten, even when we own it already.
    pub async fn try_become_leader(&self) -> Result<bool, ClusterError> {
        if self.kv_get(LEADER_KEY).await?.is_some() {
            debug!("replication leader already registered");
            return Ok(false);
        }

        let record = LeaderRecord {
            ip_address: self.local_ip.to_string(),
        };
        let session = self.health_session()?;
        let won = self
            .kv_put_acquire(LEADER_KEY, &serde_json::to_string(&record)?, &session)
            .await?;

        if won {
            info!(ip = %self.local_ip, "we are the new replication leader");
        } else {
            debug!("lost the replication-leader acquire race");
        }
        Ok(won)
    }

    /// Whether the leader key exists and is held by our health session.
    pub async fn is_leader(&self) -> Result<bool, ClusterError> {
        let Some(entry) = self.kv_get(LEADER_KEY).await? else {
            debug!("no replication leader registered");
            return Ok(false);
        };
        let session = self.health_session()?;
        Ok(entry.session.as_deref() == Some(session.as_str()))
    }

    /// Address stored in the leader key, if any.
    pub async fn leader_ip(&self) -> Result<Option<String>, ClusterError> {
        let Some(entry) = self.kv_get(LEADER_KEY).await? else {
            return Ok(None);
        };
        let Some(payload) = decode_value(&entry, LEADER_KEY)? else {
            return Ok(None);
        };

        let record: LeaderRecord =
            serde_json::from_slice(&payload).map_err(|error| ClusterError::MalformedValue {
                key: LEADER_KEY.to_string(),
                reason: error.to_string(),
            })?;
        Ok(Some(record.ip_address))
    }

    /// (Re)register the database in the service catalog with the role tag.
    pub async fn register_service(&self, leader: bool) -> Result<(), ClusterError> {
        let service_id = format!("{SERVICE_NAME}_{}", self.local_ip);

        let services: HashMap<String, serde_json::Value> = self
            .http
            .get(format!("{}/v1/agent/services", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if services.contains_key(&service_id) {
            debug!(service_id = %service_id, "deregistering stale service entry");
            self.http
                .put(format!(
                    "{}/v1/agent/service/deregister/{service_id}",
                    self.base_url
                ))
                .send()
                .await?
                .error_for_status()?;
        }

        let tag = if leader { "leader" } else { "follower" };
        let registration = ServiceRegistration {
            name: SERVICE_NAME,
            id: service_id.clone(),
            port: SERVICE_PORT,
            tags: vec![tag],
        };

        self.http
            .put(format!("{}/v1/agent/service/register", self.base_url))
            .json(&registration)
            .send()
            .await?
            .error_for_status()?;

        info!(service_id = %service_id, tag, "registered database service");
        Ok(())
    }

    async fn kv_get(&self, key: &str) -> Result<Option<KvEntry>, ClusterError> {
        let response = self
            .http
            .get(format!("{}/v1/kv/{key}", self.base_url))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let mut entries: Vec<KvEntry> = response.error_for_status()?.json().await?;
        Ok(if entries.is_empty() {
            None
        } else {
            Some(entries.swap_remove(0))
        })
    }

    async fn kv_list(&self, prefix: &str) -> Result<Vec<KvEntry>, ClusterError> {
        let response = self
            .http
            .get(format!("{}/v1/kv/{prefix}", self.base_url))
            .query(&[("recurse", "true")])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }

        Ok(response.error_for_status()?.json().await?)
    }

    async fn kv_put_cas(&self, key: &str, body: &str, index: u64) -> Result<bool, ClusterError> {
        let response = self
            .http
            .put(format!("{}/v1/kv/{key}", self.base_url))
            .query(&[("cas", index)])
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?.trim() == "true")
    }

    async fn kv_put_acquire(
        &self,
        key: &str,
        body: &str,
        session: &str,
    ) -> Result<bool, ClusterError> {
        let response = self
            .http
            .put(format!("{}/v1/kv/{key}", self.base_url))
            .query(&[("acquire", session)])
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;
        Ok(response.text().await?.trim() == "true")
    }
}

/// Decode a KV entry's base64 value; `None` for an absent or empty value.
fn decode_value(entry: &KvEntry, key: &str) -> Result<Option<Vec<u8>>, ClusterError> {
    match entry.value.as_deref() {
        None | Some("") => Ok(None),
        Some(encoded) => BASE64
            .decode(encoded)
            .map(Some)
            .map_err(|error| ClusterError::MalformedValue {
                key: key.to_string(),
                reason: error.to_string(),
            }),
    }
}

/// Extract the sorted advertised addresses from node-registration payloads.
///
/// A malformed registration is logged and skipped; one broken peer must
/// not hide the healthy ones.
fn collect_node_ips(payloads: &[Vec<u8>]) -> Vec<String> {
    let mut ips = Vec::with_capacity(payloads.len());
    for payload in payloads {
        match serde_json::from_slice::<NodeRecord>(payload) {
            Ok(record) => ips.push(record.ip_address),
            Err(error) => {
                error!(%error, "skipping malformed node registration");
            }
        }
    }
    ips.sort();
    ips
}

#[cfg(test)]
#[path = "consul_test.rs"]
mod tests;

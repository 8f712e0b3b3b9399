//! Cluster membership and coordination
//!
//! Everything the supervisor shares with its peers goes through the
//! local Consul agent: node registration, leader election via a
//! session-held lock key, the monotonic server-id counter and the
//! service catalog entries consumed by ProxySQL users.

pub mod agent;
pub mod consul;
pub mod renew;

pub use consul::{ClusterError, ConsulClient, NodeRecord};
pub use renew::RenewTask;

//! Local Consul agent launch
//!
//! The agent runs as a sibling OS process and joins the cluster through
//! the configured bootstrap server. Its exit is observed by the control
//! loop like any other supervised child.

use tokio::process::Child;
use tracing::info;

use crate::config::AgentSettings;
use crate::process::{self, ProcessError};

const CONSUL_BINARY: &str = "consul";
const AGENT_DATA_DIR: &str = "/tmp/consul";

/// Start the local Consul agent.
pub fn start(settings: &AgentSettings) -> Result<Child, ProcessError> {
    info!(
        join = %settings.bootstrap_server,
        interface = %settings.bind_interface,
        "starting consul agent"
    );

    let bind_template = format!("{{{{ GetInterfaceIP \"{}\" }}}}", settings.bind_interface);

    process::spawn(
        CONSUL_BINARY,
        [
            "agent",
            "--data-dir",
            AGENT_DATA_DIR,
            "--bind",
            &bind_template,
            "--join",
            &settings.bootstrap_server,
        ],
    )
}

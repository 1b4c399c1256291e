/**
 * STATUS PROBE - État réel des services OS
 *
 * RÔLE :
 * Répond à "ce service tourne-t-il vraiment ?" pour réconcilier l'état
 * enregistré d'une interface avec la réalité.
 *
 * FONCTIONNEMENT :
 * - Une sonde n'échoue jamais : service absent, hôte injoignable ou sortie
 *   illisible donnent RunState::Unknown
 * - CommandProbe lit la sortie de `systemctl is-active` ou `sc query`
 */

use crate::activation::{render_command, DEFAULT_NOT_FOUND_MARKERS};
use crate::models::InterfaceStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Ground-truth run state reported by a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Running,
    Stopped,
    Pending,
    Unknown,
}

impl RunState {
    /// Maps an observed state onto the lifecycle model, given what is recorded.
    /// A pending service keeps an in-flight Stopping, anything else reads as Starting.
    pub fn reconcile(self, current: InterfaceStatus) -> InterfaceStatus {
        match self {
            RunState::Running => InterfaceStatus::Running,
            RunState::Stopped => InterfaceStatus::Stopped,
            RunState::Pending => match current {
                InterfaceStatus::Stopping => InterfaceStatus::Stopping,
                _ => InterfaceStatus::Starting,
            },
            RunState::Unknown => InterfaceStatus::Unknown,
        }
    }
}

#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn query(&self, service: &str) -> RunState;
}

/// Probe running a status command such as `systemctl is-active {service}`
/// or `sc query {service}` and reading its output.
pub struct CommandProbe {
    status_command: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(status_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            status_command: status_command.into(),
            timeout,
        }
    }
}

#[async_trait]
impl StatusProbe for CommandProbe {
    async fn query(&self, service: &str) -> RunState {
        let argv = match render_command(&self.status_command, &[("{service}", service.to_string())]) {
            Ok(argv) => argv,
            Err(e) => {
                debug!(service, error = %e, "status command unusable");
                return RunState::Unknown;
            }
        };

        let run = Command::new(&argv[0]).args(&argv[1..]).kill_on_drop(true).output();
        match tokio::time::timeout(self.timeout, run).await {
            Ok(Ok(output)) => parse_run_state(&String::from_utf8_lossy(&output.stdout)),
            Ok(Err(e)) => {
                debug!(service, error = %e, "status command failed to spawn");
                RunState::Unknown
            }
            Err(_) => {
                debug!(service, timeout = ?self.timeout, "status command timed out");
                RunState::Unknown
            }
        }
    }
}

/// Reads `systemctl is-active`/`systemctl status` and `sc query` style output.
pub fn parse_run_state(output: &str) -> RunState {
    let text = output.to_lowercase();

    const PENDING: [&str; 5] = ["start_pending", "stop_pending", "activating", "deactivating", "pending"];
    const STOPPED: [&str; 4] = ["stopped", "inactive", "failed", "dead"];

    // "FAILED 1060" de sc.exe contient "failed" : l'absence passe avant l'arrêt
    if DEFAULT_NOT_FOUND_MARKERS.iter().any(|m| text.contains(m)) {
        RunState::Unknown
    } else if PENDING.iter().any(|w| text.contains(w)) {
        RunState::Pending
    } else if STOPPED.iter().any(|w| text.contains(w)) {
        RunState::Stopped
    } else if text.contains("running") || text.lines().any(|l| l.trim() == "active") {
        RunState::Running
    } else {
        RunState::Unknown
    }
}

/**
 * SIMULATION BACKEND - Activateur + sonde en mémoire
 *
 * RÔLE :
 * Remplace les vrais services OS quand aucun n'est disponible (poste de dev,
 * démo, tests). Chaque start/stop attend une latence configurable puis met à
 * jour un ensemble de services "en marche" que la sonde relit.
 *
 * PANNES SIMULÉES :
 * - failing_services : activation/désactivation refusée
 * - missing_services : service inexistant (ServiceNotFound, sonde Unknown)
 */

use crate::activation::{ActivationError, Activator};
use crate::models::Interface;
use crate::probe::{RunState, StatusProbe};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

/// Paramètres du backend simulé (section `backend` de kernel.yaml, kind: simulated)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatedConf {
    pub latency_ms: u64,
    pub failing_services: Vec<String>,
    pub missing_services: Vec<String>,
}

impl Default for SimulatedConf {
    fn default() -> Self {
        Self {
            latency_ms: 500,
            failing_services: vec![],
            missing_services: vec![],
        }
    }
}

pub struct SimulatedBackend {
    latency: Duration,
    failing: HashSet<String>,
    missing: HashSet<String>,
    running: Mutex<HashSet<String>>,
}

impl SimulatedBackend {
    pub fn new(conf: &SimulatedConf) -> Self {
        Self {
            latency: Duration::from_millis(conf.latency_ms),
            failing: conf.failing_services.iter().cloned().collect(),
            missing: conf.missing_services.iter().cloned().collect(),
            running: Mutex::new(HashSet::new()),
        }
    }

    /// Marque un service comme déjà en marche (état hérité d'un précédent run)
    pub fn mark_running(&self, service: &str) {
        self.running.lock().insert(service.to_string());
    }

    pub fn is_running(&self, service: &str) -> bool {
        self.running.lock().contains(service)
    }

    fn check(&self, service: &str) -> Result<(), ActivationError> {
        if self.missing.contains(service) {
            return Err(ActivationError::ServiceNotFound(service.to_string()));
        }
        if self.failing.contains(service) {
            return Err(ActivationError::Rejected(format!("simulated failure for {service}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Activator for SimulatedBackend {
    async fn activate(&self, interface: &Interface) -> Result<(), ActivationError> {
        tokio::time::sleep(self.latency).await;
        self.check(&interface.service_name)?;
        self.running.lock().insert(interface.service_name.clone());
        debug!(service = %interface.service_name, "simulated start");
        Ok(())
    }

    async fn deactivate(&self, interface: &Interface) -> Result<(), ActivationError> {
        tokio::time::sleep(self.latency).await;
        self.check(&interface.service_name)?;
        self.running.lock().remove(&interface.service_name);
        debug!(service = %interface.service_name, "simulated stop");
        Ok(())
    }
}

#[async_trait]
impl StatusProbe for SimulatedBackend {
    async fn query(&self, service: &str) -> RunState {
        if self.missing.contains(service) {
            return RunState::Unknown;
        }
        if self.is_running(service) {
            RunState::Running
        } else {
            RunState::Stopped
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterfaceType;

    fn backend() -> SimulatedBackend {
        SimulatedBackend::new(&SimulatedConf {
            latency_ms: 0,
            failing_services: vec!["bad".into()],
            missing_services: vec!["gone".into()],
        })
    }

    #[tokio::test]
    async fn test_start_stop_reflected_by_probe() {
        let sim = backend();
        let iface = Interface::new("Ping1", InterfaceType::Ping);

        assert_eq!(sim.query("Ping1").await, RunState::Stopped);
        sim.activate(&iface).await.unwrap();
        assert_eq!(sim.query("Ping1").await, RunState::Running);
        sim.deactivate(&iface).await.unwrap();
        assert_eq!(sim.query("Ping1").await, RunState::Stopped);
    }

    #[tokio::test]
    async fn test_simulated_failures() {
        let sim = backend();
        let bad = Interface::new("x", InterfaceType::Ufl).with_service("bad");
        let gone = Interface::new("y", InterfaceType::Ufl).with_service("gone");

        assert!(matches!(sim.activate(&bad).await, Err(ActivationError::Rejected(_))));
        assert!(!sim.is_running("bad"));
        assert!(matches!(sim.activate(&gone).await, Err(ActivationError::ServiceNotFound(_))));
        assert_eq!(sim.query("gone").await, RunState::Unknown);
    }
}

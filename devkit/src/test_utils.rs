/*!
Test Harness pour le kernel Pilot

Assemble un environnement complet en mémoire :
- bus + registre + coordinateur
- activateur scripté relié à une sonde statique
- enregistreur d'événements branché dès le départ
*/

use crate::recorder::EventRecorder;
use crate::scripted::{ScriptedActivator, StaticProbe};
use anyhow::Result;
use pilot_kernel::bus::NotificationBus;
use pilot_kernel::lifecycle::{LifecycleCoordinator, LifecycleSettings};
use pilot_kernel::models::{Interface, InterfaceStatus, InterfaceType};
use pilot_kernel::registry::InterfaceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct TestHarness {
    pub bus: Arc<NotificationBus>,
    pub registry: Arc<InterfaceRegistry>,
    pub activator: Arc<ScriptedActivator>,
    pub probe: Arc<StaticProbe>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub recorder: EventRecorder,
    pub cancel: CancellationToken,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Réglages rapides : pas de délai de restart, pas de monitor
    pub fn new() -> Self {
        Self::with_settings(LifecycleSettings {
            restart_settle_ms: 0,
            refresh_interval_secs: 0,
            ..LifecycleSettings::default()
        })
    }

    pub fn with_settings(settings: LifecycleSettings) -> Self {
        init_tracing();

        let bus = Arc::new(NotificationBus::new());
        let registry = Arc::new(InterfaceRegistry::new(bus.clone()));
        let probe = Arc::new(StaticProbe::default());
        let activator = Arc::new(ScriptedActivator::new());
        activator.mirror_into(probe.clone());

        let coordinator = Arc::new(LifecycleCoordinator::new(
            registry.clone(),
            activator.clone(),
            probe.clone(),
            settings,
        ));
        let recorder = EventRecorder::attach(&bus);

        Self {
            bus,
            registry,
            activator,
            probe,
            coordinator,
            recorder,
            cancel: CancellationToken::new(),
        }
    }

    /// Enregistre des interfaces Ping arrêtées, puis vide l'enregistreur
    pub fn with_interfaces(self, names: &[&str]) -> Result<Self> {
        for name in names {
            self.registry.register(Interface::new(*name, InterfaceType::Ping))?;
        }
        self.recorder.clear();
        Ok(self)
    }

    pub fn status_of(&self, name: &str) -> Option<InterfaceStatus> {
        self.registry.find(name).map(|i| i.status)
    }

    pub fn count_in(&self, status: InterfaceStatus) -> usize {
        self.registry.list().iter().filter(|i| i.status == status).count()
    }

    /// Attend qu'une interface atteigne un état (polling court)
    pub async fn wait_for_status(&self, name: &str, status: InterfaceStatus, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.status_of(name) == Some(status) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.status_of(name) == Some(status)
    }
}

/// Logs des tests via RUST_LOG, sans paniquer si déjà initialisé
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_harness_wires_activator_and_probe() {
        let h = TestHarness::new().with_interfaces(&["Ping1", "Ping2"]).unwrap();
        assert!(h.recorder.is_empty());

        h.coordinator.start("Ping1", &h.cancel).await.unwrap();
        assert_eq!(h.status_of("Ping1"), Some(InterfaceStatus::Running));
        assert_eq!(h.activator.activations(), 1);

        // la sonde reflète l'activation : un refresh ne change rien
        let changed = h.coordinator.refresh_status("Ping1", &h.cancel).await.unwrap();
        assert!(changed.is_none());
        assert_eq!(h.count_in(InterfaceStatus::Stopped), 1);
    }
}

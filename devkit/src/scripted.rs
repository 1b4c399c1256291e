/*!
Doublures scriptées d'activateur et de sonde

Permet de tester le coordinateur sans services OS :
- chaque service a un résultat programmé (succès, échec, absent, blocage)
- les appels sont comptés et journalisés pour les assertions
- une StaticProbe répond l'état qu'on lui a fixé
*/

use async_trait::async_trait;
use parking_lot::Mutex;
use pilot_kernel::activation::{ActivationError, Activator};
use pilot_kernel::models::Interface;
use pilot_kernel::probe::{RunState, StatusProbe};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Résultat programmé pour un service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeed,
    Fail(String),
    NotFound,
    /// Ne rend jamais la main (tests d'annulation et de timeout)
    Hang,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: CallKind,
    pub service: String,
}

#[derive(Default)]
pub struct ScriptedActivator {
    activate_outcomes: Mutex<HashMap<String, Outcome>>,
    deactivate_outcomes: Mutex<HashMap<String, Outcome>>,
    delay: Mutex<Duration>,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    mirror: Mutex<Option<Arc<StaticProbe>>>,
}

impl ScriptedActivator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Résultat de activate() pour ce service (Succeed par défaut)
    pub fn on_activate(&self, service: &str, outcome: Outcome) -> &Self {
        self.activate_outcomes.lock().insert(service.to_string(), outcome);
        self
    }

    /// Résultat de deactivate() pour ce service (Succeed par défaut)
    pub fn on_deactivate(&self, service: &str, outcome: Outcome) -> &Self {
        self.deactivate_outcomes.lock().insert(service.to_string(), outcome);
        self
    }

    /// Même résultat pour les deux sens
    pub fn script(&self, service: &str, outcome: Outcome) -> &Self {
        self.on_activate(service, outcome.clone());
        self.on_deactivate(service, outcome)
    }

    /// Latence appliquée avant chaque résultat
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Les succès mettent à jour la sonde (Running / Stopped)
    pub fn mirror_into(&self, probe: Arc<StaticProbe>) {
        *self.mirror.lock() = Some(probe);
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, service: &str) -> Vec<CallKind> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.service == service)
            .map(|c| c.kind)
            .collect()
    }

    async fn play(&self, kind: CallKind, interface: &Interface) -> Result<(), ActivationError> {
        let service = interface.service_name.clone();
        match kind {
            CallKind::Activate => self.activations.fetch_add(1, Ordering::SeqCst),
            CallKind::Deactivate => self.deactivations.fetch_add(1, Ordering::SeqCst),
        };
        self.calls.lock().push(Call {
            kind,
            service: service.clone(),
        });

        let outcome = match kind {
            CallKind::Activate => self.activate_outcomes.lock().get(&service).cloned(),
            CallKind::Deactivate => self.deactivate_outcomes.lock().get(&service).cloned(),
        }
        .unwrap_or(Outcome::Succeed);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Outcome::Succeed => {
                let mirror = self.mirror.lock().clone();
                if let Some(probe) = mirror {
                    let state = match kind {
                        CallKind::Activate => RunState::Running,
                        CallKind::Deactivate => RunState::Stopped,
                    };
                    probe.set(&service, state);
                }
                Ok(())
            }
            Outcome::Fail(reason) => Err(ActivationError::Rejected(reason)),
            Outcome::NotFound => Err(ActivationError::ServiceNotFound(service)),
            Outcome::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Activator for ScriptedActivator {
    async fn activate(&self, interface: &Interface) -> Result<(), ActivationError> {
        self.play(CallKind::Activate, interface).await
    }

    async fn deactivate(&self, interface: &Interface) -> Result<(), ActivationError> {
        self.play(CallKind::Deactivate, interface).await
    }
}

/// Sonde à états fixés ; un service jamais fixé répond `default`
pub struct StaticProbe {
    states: Mutex<HashMap<String, RunState>>,
    default: RunState,
    queries: AtomicUsize,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(RunState::Stopped)
    }
}

impl StaticProbe {
    pub fn new(default: RunState) -> Self {
        Self {
            states: Mutex::new(HashMap::new()),
            default,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, service: &str, state: RunState) {
        self.states.lock().insert(service.to_string(), state);
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StatusProbe for StaticProbe {
    async fn query(&self, service: &str) -> RunState {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.states.lock().get(service).copied().unwrap_or(self.default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilot_kernel::models::InterfaceType;

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let activator = ScriptedActivator::new();
        activator
            .on_activate("bad", Outcome::Fail("boom".into()))
            .on_deactivate("gone", Outcome::NotFound);

        let ok = Interface::new("ok", InterfaceType::Ping);
        let bad = Interface::new("bad", InterfaceType::Ping);
        let gone = Interface::new("gone", InterfaceType::Ping);

        assert!(activator.activate(&ok).await.is_ok());
        assert!(matches!(activator.activate(&bad).await, Err(ActivationError::Rejected(r)) if r == "boom"));
        assert!(matches!(activator.deactivate(&gone).await, Err(ActivationError::ServiceNotFound(_))));
        assert_eq!(activator.activations(), 2);
        assert_eq!(activator.deactivations(), 1);
        assert_eq!(activator.calls_for("bad"), vec![CallKind::Activate]);
    }

    #[tokio::test]
    async fn test_mirror_updates_probe() {
        let probe = Arc::new(StaticProbe::default());
        let activator = ScriptedActivator::new();
        activator.mirror_into(probe.clone());

        let iface = Interface::new("Ping1", InterfaceType::Ping);
        assert_eq!(probe.query("Ping1").await, RunState::Stopped);
        activator.activate(&iface).await.unwrap();
        assert_eq!(probe.query("Ping1").await, RunState::Running);
        assert_eq!(probe.queries(), 2);
    }

    #[tokio::test]
    async fn test_hang_never_returns() {
        let activator = ScriptedActivator::new();
        activator.script("stuck", Outcome::Hang);
        let iface = Interface::new("stuck", InterfaceType::Ufl);

        let res = tokio::time::timeout(Duration::from_millis(50), activator.activate(&iface)).await;
        assert!(res.is_err());
    }
}

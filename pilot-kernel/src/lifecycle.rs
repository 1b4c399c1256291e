/**
 * LIFECYCLE COORDINATOR - Machine à états des interfaces
 *
 * RÔLE :
 * Pilote les transitions Stopped → Starting → Running, Running → Stopping →
 * Stopped, et → Error, pour une interface ou en batch, en notifiant chaque
 * changement via le registre.
 *
 * FONCTIONNEMENT :
 * - Un verrou async par nom d'interface : au plus une transition en vol par
 *   interface (deux start() concurrents = une seule activation)
 * - Les seuls points de suspension : verrou, activation/désactivation, sonde,
 *   délai de stabilisation du restart
 * - Chaque opération reçoit un CancellationToken ; un timeout optionnel borne
 *   l'appel à l'activateur
 * - Opération unitaire : l'erreur remonte à l'appelant
 * - Opération batch : les erreurs sont collectées dans le BatchReport,
 *   jamais propagées, le batch va toujours au bout
 *
 * RESTART :
 * stop, délai fixe (2000 ms par défaut), puis start. Le start est tenté même
 * si le stop a échoué.
 */

use crate::activation::{ActivationError, Activator};
use crate::models::{Interface, InterfaceStatus, LifecycleAction, StatusTransition};
use crate::probe::StatusProbe;
use crate::registry::{InterfaceError, InterfaceRegistry};
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Que faire quand l'activateur répond "service inexistant"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingServicePolicy {
    /// Passage en Error (défaut)
    #[default]
    Fail,
    /// Considérer la transition réussie (mode démo sans services OS)
    AssumeSuccess,
}

/// Réglages du coordinateur (section `lifecycle` de kernel.yaml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    /// Délai entre stop et start lors d'un restart
    pub restart_settle_ms: u64,
    /// Borne optionnelle sur chaque appel à l'activateur
    pub operation_timeout_secs: Option<u64>,
    pub missing_service: MissingServicePolicy,
    /// Période du refresh automatique des états (0 = désactivé)
    pub refresh_interval_secs: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            restart_settle_ms: 2000,
            operation_timeout_secs: None,
            missing_service: MissingServicePolicy::Fail,
            refresh_interval_secs: 30,
        }
    }
}

impl LifecycleSettings {
    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

/// Résultat d'une interface dans un batch
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub name: String,
    pub ok: bool,
    pub status: Option<InterfaceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Rapport agrégé d'un start_all / stop_all
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub action: LifecycleAction,
    /// Transitions tentées (interfaces pas encore dans l'état cible)
    pub attempted: usize,
    /// Transitions tentées arrivées dans l'état cible
    pub succeeded: usize,
    /// Interfaces dans l'état cible une fois le batch terminé
    pub in_target: usize,
    pub outcomes: Vec<BatchOutcome>,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &BatchOutcome> {
        self.outcomes.iter().filter(|o| !o.ok)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Up,
    Down,
}

impl Direction {
    fn action(self) -> LifecycleAction {
        match self {
            Direction::Up => LifecycleAction::Start,
            Direction::Down => LifecycleAction::Stop,
        }
    }

    fn pending(self) -> InterfaceStatus {
        match self {
            Direction::Up => InterfaceStatus::Starting,
            Direction::Down => InterfaceStatus::Stopping,
        }
    }

    fn target(self) -> InterfaceStatus {
        match self {
            Direction::Up => InterfaceStatus::Running,
            Direction::Down => InterfaceStatus::Stopped,
        }
    }

    fn allowed_from(self, status: InterfaceStatus) -> bool {
        match self {
            Direction::Up => status.can_start(),
            Direction::Down => status.can_stop(),
        }
    }
}

enum Interrupted {
    Cancelled,
    Failed(ActivationError),
}

pub struct LifecycleCoordinator {
    registry: Arc<InterfaceRegistry>,
    activator: Arc<dyn Activator>,
    probe: Arc<dyn StatusProbe>,
    settings: LifecycleSettings,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<InterfaceRegistry>,
        activator: Arc<dyn Activator>,
        probe: Arc<dyn StatusProbe>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            registry,
            activator,
            probe,
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<InterfaceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Démarre une interface (Stopped/Error/Unknown → Starting → Running | Error)
    pub async fn start(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusTransition, InterfaceError> {
        self.drive(name, Direction::Up, cancel).await
    }

    /// Arrête une interface (Running/Error/Unknown → Stopping → Stopped | Error)
    pub async fn stop(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusTransition, InterfaceError> {
        self.drive(name, Direction::Down, cancel).await
    }

    /// stop, délai de stabilisation, puis start même si le stop a échoué
    pub async fn restart(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<StatusTransition, InterfaceError> {
        if let Err(e) = self.stop(name, cancel).await {
            warn!(interface = name, error = %e, "stop failed during restart, starting anyway");
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InterfaceError::Cancelled(name.to_string())),
            _ = tokio::time::sleep(self.settings.restart_settle()) => {}
        }

        self.start(name, cancel).await
    }

    pub async fn start_all(&self, cancel: &CancellationToken) -> BatchReport {
        self.run_batch(Direction::Up, cancel).await
    }

    pub async fn stop_all(&self, cancel: &CancellationToken) -> BatchReport {
        self.run_batch(Direction::Down, cancel).await
    }

    /// Interroge la sonde et réconcilie l'état enregistré.
    /// Retourne la transition appliquée, None si rien n'a changé.
    pub async fn refresh_status(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<StatusTransition>, InterfaceError> {
        let guard = self.acquire(name, cancel).await?;
        let result = self.refresh_locked(name, cancel).await;
        drop(guard);
        self.prune_lock(name);
        result
    }

    /// Refresh de toutes les interfaces en parallèle, retourne le nombre d'états corrigés
    pub async fn refresh_all_statuses(&self, cancel: &CancellationToken) -> usize {
        let names: Vec<String> = self.registry.list().into_iter().map(|i| i.name).collect();
        let runs = names.iter().map(|name| self.refresh_status(name, cancel));

        join_all(runs)
            .await
            .into_iter()
            .zip(&names)
            .filter(|(result, name)| match result {
                Ok(changed) => changed.is_some(),
                Err(e) => {
                    warn!(interface = %name, error = %e, "status refresh failed");
                    false
                }
            })
            .count()
    }

    async fn drive(
        &self,
        name: &str,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<StatusTransition, InterfaceError> {
        let guard = self.acquire(name, cancel).await?;
        let result = self.transition_locked(name, direction, cancel).await;
        drop(guard);
        self.prune_lock(name);
        result
    }

    async fn transition_locked(
        &self,
        name: &str,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<StatusTransition, InterfaceError> {
        let interface = self
            .registry
            .find(name)
            .ok_or_else(|| InterfaceError::NotFound(name.to_string()))?;

        if !direction.allowed_from(interface.status) {
            return Err(InterfaceError::InvalidTransition {
                name: name.to_string(),
                from: interface.status,
                action: direction.action(),
            });
        }

        self.registry.apply_transition(name, direction.pending(), None)?;

        match self.invoke(&interface, direction, cancel).await {
            Ok(()) => {
                info!(interface = name, status = %direction.target(), "transition complete");
                self.registry.apply_transition(name, direction.target(), None)
            }
            Err(Interrupted::Cancelled) => {
                warn!(interface = name, action = %direction.action(), "transition cancelled, real state unknown");
                self.registry
                    .apply_transition(name, InterfaceStatus::Unknown, Some("cancelled".to_string()))?;
                Err(InterfaceError::Cancelled(name.to_string()))
            }
            Err(Interrupted::Failed(ActivationError::ServiceNotFound(service)))
                if self.settings.missing_service == MissingServicePolicy::AssumeSuccess =>
            {
                warn!(interface = name, %service, "service not found, assuming success per policy");
                self.registry.apply_transition(name, direction.target(), None)
            }
            Err(Interrupted::Failed(source)) => {
                warn!(interface = name, action = %direction.action(), error = %source, "transition failed");
                self.registry
                    .apply_transition(name, InterfaceStatus::Error, Some(source.to_string()))?;
                Err(InterfaceError::ActivationFailure {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    async fn refresh_locked(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<StatusTransition>, InterfaceError> {
        let interface = self
            .registry
            .find(name)
            .ok_or_else(|| InterfaceError::NotFound(name.to_string()))?;

        let observed = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(InterfaceError::Cancelled(name.to_string())),
            state = self.probe.query(&interface.service_name) => state,
        };

        let reconciled = observed.reconcile(interface.status);
        if reconciled == interface.status {
            debug!(interface = name, status = %reconciled, "status unchanged");
            return Ok(None);
        }

        info!(interface = name, from = %interface.status, to = %reconciled, "status reconciled from probe");
        self.registry
            .apply_transition(name, reconciled, Some(format!("probe reported {observed:?}")))
            .map(Some)
    }

    async fn invoke(
        &self,
        interface: &Interface,
        direction: Direction,
        cancel: &CancellationToken,
    ) -> Result<(), Interrupted> {
        let call = async {
            match direction {
                Direction::Up => self.activator.activate(interface).await,
                Direction::Down => self.activator.deactivate(interface).await,
            }
        };

        let bounded = async {
            match self.settings.operation_timeout() {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ActivationError::TimedOut(limit))),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Interrupted::Cancelled),
            result = bounded => result.map_err(Interrupted::Failed),
        }
    }

    async fn run_batch(&self, direction: Direction, cancel: &CancellationToken) -> BatchReport {
        let target = direction.target();
        let selected: Vec<String> = self
            .registry
            .list()
            .into_iter()
            .filter(|i| i.status != target)
            .map(|i| i.name)
            .collect();

        info!(action = %direction.action(), count = selected.len(), "batch started");
        let runs = selected.iter().map(|name| self.drive(name, direction, cancel));
        let results = join_all(runs).await;

        let outcomes: Vec<BatchOutcome> = selected
            .into_iter()
            .zip(results)
            .map(|(name, result)| {
                let status = self.registry.find(&name).map(|i| i.status);
                match result {
                    Ok(_) => BatchOutcome { name, ok: true, status, error: None },
                    Err(e) => {
                        warn!(interface = %name, action = %direction.action(), error = %e, "batch item failed");
                        BatchOutcome { name, ok: false, status, error: Some(e.to_string()) }
                    }
                }
            })
            .collect();

        let report = BatchReport {
            action: direction.action(),
            attempted: outcomes.len(),
            succeeded: outcomes.iter().filter(|o| o.ok).count(),
            in_target: self.registry.list().iter().filter(|i| i.status == target).count(),
            outcomes,
        };
        info!(
            action = %report.action,
            attempted = report.attempted,
            succeeded = report.succeeded,
            in_target = report.in_target,
            "batch finished"
        );
        report
    }

    async fn acquire(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<OwnedMutexGuard<()>, InterfaceError> {
        let lock = self.locks.lock().entry(name.to_string()).or_default().clone();
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            guard = lock.lock_owned() => Some(guard),
        };
        match acquired {
            Some(guard) => Ok(guard),
            None => {
                // le futur lock_owned est déjà droppé : le verrou peut être oublié
                self.prune_lock(name);
                Err(InterfaceError::Cancelled(name.to_string()))
            }
        }
    }

    /// Oublie le verrou d'une interface désenregistrée quand plus personne ne l'attend
    fn prune_lock(&self, name: &str) {
        let mut locks = self.locks.lock();
        let idle = locks.get(name).is_some_and(|l| Arc::strong_count(l) == 1);
        if idle && self.registry.find(name).is_none() {
            locks.remove(name);
        }
    }
}

/// Refresh périodique des états, calqué sur le monitoring santé des plugins.
/// S'arrête quand le token est annulé.
pub fn spawn_status_monitor(
    coordinator: Arc<LifecycleCoordinator>,
    shutdown: CancellationToken,
) -> Option<JoinHandle<()>> {
    let period = coordinator.settings().refresh_interval_secs;
    if period == 0 {
        info!("status monitor disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(period));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let changed = coordinator.refresh_all_statuses(&shutdown).await;
                    if changed > 0 {
                        info!(changed, "status monitor reconciled interfaces");
                    }
                }
            }
        }
        debug!("status monitor stopped");
    }))
}

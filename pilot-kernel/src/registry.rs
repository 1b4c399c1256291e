/**
 * INTERFACE REGISTRY - Source de vérité unique des interfaces configurées
 *
 * RÔLE :
 * Possède toutes les entités `Interface` (clé = nom), garantit l'unicité et
 * publie les changements sur le NotificationBus.
 *
 * FONCTIONNEMENT :
 * - CRUD : register / deregister / find / list / update
 * - `list()` retourne un snapshot : l'appelant ne voit jamais la map vivante
 * - Les changements d'état passent par `apply_transition`, réservé au
 *   coordinateur de cycle de vie (horodatage + notification cohérents)
 * - Le verrou est toujours relâché avant la publication
 */

use crate::activation::ActivationError;
use crate::bus::{InterfaceEvent, NotificationBus, RegistryChange};
use crate::models::{Interface, InterfaceStatus, LifecycleAction, StatusTransition};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Erreurs possibles sur les opérations d'interface
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("Interface not found: {0}")]
    NotFound(String),
    #[error("Interface already registered: {0}")]
    DuplicateName(String),
    #[error("Invalid interface name: {0:?}")]
    InvalidName(String),
    #[error("Cannot {action} interface {name} while {from}")]
    InvalidTransition {
        name: String,
        from: InterfaceStatus,
        action: LifecycleAction,
    },
    #[error("Activation failed for {name}: {source}")]
    ActivationFailure {
        name: String,
        #[source]
        source: ActivationError,
    },
    #[error("Operation cancelled for {0}")]
    Cancelled(String),
}

pub struct InterfaceRegistry {
    interfaces: Mutex<HashMap<String, Interface>>,
    bus: Arc<NotificationBus>,
}

impl InterfaceRegistry {
    pub fn new(bus: Arc<NotificationBus>) -> Self {
        Self {
            interfaces: Mutex::new(HashMap::new()),
            bus,
        }
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    /// Enregistre une nouvelle interface, échoue si le nom existe déjà.
    /// L'état de cycle de vie fourni par l'appelant est ignoré : une
    /// interface neuve part toujours de Stopped, sans horodatage ni erreur.
    pub fn register(&self, mut interface: Interface) -> Result<(), InterfaceError> {
        if interface.name.trim().is_empty() {
            return Err(InterfaceError::InvalidName(interface.name));
        }
        interface.status = InterfaceStatus::Stopped;
        interface.last_started = None;
        interface.last_stopped = None;
        interface.last_error = None;

        let snapshot = {
            let mut map = self.interfaces.lock();
            if map.contains_key(&interface.name) {
                return Err(InterfaceError::DuplicateName(interface.name));
            }
            map.insert(interface.name.clone(), interface.clone());
            interface
        };

        info!(interface = %snapshot.name, kind = %snapshot.interface_type, "registered interface");
        self.publish_registry(snapshot, RegistryChange::Registered);
        Ok(())
    }

    /// Retire une interface ; no-op silencieux si absente
    pub fn deregister(&self, name: &str) -> Option<Interface> {
        let removed = self.interfaces.lock().remove(name);

        match &removed {
            Some(iface) => {
                if iface.status == InterfaceStatus::Running {
                    warn!(interface = name, "deregistered while running");
                } else {
                    info!(interface = name, "deregistered interface");
                }
                self.publish_registry(iface.clone(), RegistryChange::Deregistered);
            }
            None => debug!(interface = name, "deregister ignored, unknown interface"),
        }

        removed
    }

    pub fn find(&self, name: &str) -> Option<Interface> {
        self.interfaces.lock().get(name).cloned()
    }

    /// Snapshot trié par nom
    pub fn list(&self) -> Vec<Interface> {
        let mut list: Vec<Interface> = self.interfaces.lock().values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// Remplace la configuration d'une interface existante (identité = nom).
    /// Les champs possédés par le cycle de vie (status, horodatages, last_error)
    /// sont conservés.
    pub fn update(&self, interface: Interface) -> Result<Interface, InterfaceError> {
        let snapshot = {
            let mut map = self.interfaces.lock();
            let stored = map
                .get_mut(&interface.name)
                .ok_or_else(|| InterfaceError::NotFound(interface.name.clone()))?;

            let Interface { status, last_started, last_stopped, last_error, .. } = stored.clone();
            *stored = Interface {
                status,
                last_started,
                last_stopped,
                last_error,
                ..interface
            };
            stored.clone()
        };

        info!(interface = %snapshot.name, "updated interface");
        self.publish_registry(snapshot.clone(), RegistryChange::Updated);
        Ok(snapshot)
    }

    /// Remplace tout le contenu du registre (import de configuration).
    /// Rejette l'ensemble si deux interfaces partagent un nom.
    pub fn replace_all(&self, interfaces: Vec<Interface>) -> Result<usize, InterfaceError> {
        let mut seen = HashSet::new();
        for iface in &interfaces {
            if iface.name.trim().is_empty() {
                return Err(InterfaceError::InvalidName(iface.name.clone()));
            }
            if !seen.insert(iface.name.as_str()) {
                return Err(InterfaceError::DuplicateName(iface.name.clone()));
            }
        }

        let (removed, added): (Vec<Interface>, Vec<Interface>) = {
            let mut map = self.interfaces.lock();
            let removed = map.drain().map(|(_, v)| v).collect();
            for iface in &interfaces {
                map.insert(iface.name.clone(), iface.clone());
            }
            (removed, interfaces)
        };

        info!(removed = removed.len(), added = added.len(), "registry replaced");
        for iface in removed {
            self.publish_registry(iface, RegistryChange::Deregistered);
        }
        let count = added.len();
        for iface in added {
            self.publish_registry(iface, RegistryChange::Registered);
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.interfaces.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.lock().is_empty()
    }

    /// Nombre d'interfaces par état (tous les états présents, même à 0)
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts: BTreeMap<String, usize> = InterfaceStatus::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        for iface in self.interfaces.lock().values() {
            *counts.entry(iface.status.to_string()).or_default() += 1;
        }
        counts
    }

    /// Applique un changement d'état et publie StatusChanged.
    /// Running horodate last_started, Stopped horodate last_stopped,
    /// Error enregistre la raison dans last_error.
    pub(crate) fn apply_transition(
        &self,
        name: &str,
        to: InterfaceStatus,
        reason: Option<String>,
    ) -> Result<StatusTransition, InterfaceError> {
        let (snapshot, transition) = {
            let mut map = self.interfaces.lock();
            let iface = map
                .get_mut(name)
                .ok_or_else(|| InterfaceError::NotFound(name.to_string()))?;

            let transition = StatusTransition {
                from: iface.status,
                to,
                at: OffsetDateTime::now_utc(),
                reason: reason.clone(),
            };

            iface.status = to;
            match to {
                InterfaceStatus::Running => {
                    iface.last_started = Some(transition.at);
                    iface.last_error = None;
                }
                InterfaceStatus::Stopped => {
                    iface.last_stopped = Some(transition.at);
                    iface.last_error = None;
                }
                InterfaceStatus::Error | InterfaceStatus::Unknown => {
                    if reason.is_some() {
                        iface.last_error = reason;
                    }
                }
                InterfaceStatus::Starting | InterfaceStatus::Stopping => {}
            }

            (iface.clone(), transition)
        };

        debug!(interface = name, from = %transition.from, to = %transition.to, "status changed");
        self.bus.publish(&InterfaceEvent::StatusChanged {
            interface: snapshot,
            transition: transition.clone(),
        });
        Ok(transition)
    }

    fn publish_registry(&self, interface: Interface, change: RegistryChange) {
        self.bus.publish(&InterfaceEvent::RegistryChanged { interface, change });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterfaceType;

    fn registry_with_log() -> (InterfaceRegistry, Arc<Mutex<Vec<InterfaceEvent>>>) {
        let bus = Arc::new(NotificationBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        bus.subscribe(move |e| sink.lock().push(e.clone()));
        (InterfaceRegistry::new(bus), log)
    }

    #[test]
    fn test_register_and_find() {
        let (registry, log) = registry_with_log();
        registry.register(Interface::new("Ping1", InterfaceType::Ping)).unwrap();

        let found = registry.find("Ping1").unwrap();
        assert_eq!(found.interface_type, InterfaceType::Ping);
        assert!(registry.find("ping1").is_none(), "names are case-sensitive");
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (registry, log) = registry_with_log();
        registry.register(Interface::new("Ping1", InterfaceType::Ping)).unwrap();

        let err = registry
            .register(Interface::new("Ping1", InterfaceType::Perfmon))
            .unwrap_err();
        assert!(matches!(err, InterfaceError::DuplicateName(ref n) if n == "Ping1"));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find("Ping1").unwrap().interface_type, InterfaceType::Ping);
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_empty_name_rejected() {
        let (registry, _) = registry_with_log();
        assert!(matches!(
            registry.register(Interface::new("  ", InterfaceType::Custom)),
            Err(InterfaceError::InvalidName(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_resets_lifecycle_fields() {
        let (registry, log) = registry_with_log();
        let mut iface = Interface::new("Opc1", InterfaceType::OpcDa);
        iface.status = InterfaceStatus::Running;
        iface.last_started = Some(OffsetDateTime::now_utc());
        iface.last_stopped = Some(OffsetDateTime::now_utc());
        iface.last_error = Some("stale".into());
        registry.register(iface).unwrap();

        let found = registry.find("Opc1").unwrap();
        assert_eq!(found.status, InterfaceStatus::Stopped);
        assert!(found.last_started.is_none());
        assert!(found.last_stopped.is_none());
        assert!(found.last_error.is_none());
        assert!(matches!(
            log.lock().last(),
            Some(InterfaceEvent::RegistryChanged { change: RegistryChange::Registered, interface }) if interface.status == InterfaceStatus::Stopped
        ));
    }

    #[test]
    fn test_deregister_unknown_is_noop() {
        let (registry, log) = registry_with_log();
        assert!(registry.deregister("ghost").is_none());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_deregister_publishes() {
        let (registry, log) = registry_with_log();
        registry.register(Interface::new("Ufl1", InterfaceType::Ufl)).unwrap();
        let removed = registry.deregister("Ufl1").unwrap();

        assert_eq!(removed.name, "Ufl1");
        assert!(registry.is_empty());
        let log = log.lock();
        assert!(matches!(
            log.last(),
            Some(InterfaceEvent::RegistryChanged { change: RegistryChange::Deregistered, .. })
        ));
    }

    #[test]
    fn test_update_preserves_lifecycle_fields() {
        let (registry, _) = registry_with_log();
        registry.register(Interface::new("Opc1", InterfaceType::OpcDa)).unwrap();
        registry.apply_transition("Opc1", InterfaceStatus::Running, None).unwrap();
        let started = registry.find("Opc1").unwrap().last_started;

        let edited = Interface::new("Opc1", InterfaceType::OpcDa)
            .with_service("opcint7")
            .with_description("line 7");
        let updated = registry.update(edited).unwrap();

        assert_eq!(updated.service_name, "opcint7");
        assert_eq!(updated.status, InterfaceStatus::Running);
        assert_eq!(updated.last_started, started);
    }

    #[test]
    fn test_update_unknown_fails() {
        let (registry, _) = registry_with_log();
        assert!(matches!(
            registry.update(Interface::new("ghost", InterfaceType::Ping)),
            Err(InterfaceError::NotFound(_))
        ));
    }

    #[test]
    fn test_list_is_snapshot() {
        let (registry, _) = registry_with_log();
        registry.register(Interface::new("b", InterfaceType::Ping)).unwrap();
        registry.register(Interface::new("a", InterfaceType::Ping)).unwrap();

        let mut snapshot = registry.list();
        assert_eq!(snapshot.iter().map(|i| i.name.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        snapshot[0].status = InterfaceStatus::Running;
        assert_eq!(registry.find("a").unwrap().status, InterfaceStatus::Stopped);
    }

    #[test]
    fn test_transition_stamps() {
        let (registry, _) = registry_with_log();
        registry.register(Interface::new("Ping1", InterfaceType::Ping)).unwrap();

        registry
            .apply_transition("Ping1", InterfaceStatus::Error, Some("boom".into()))
            .unwrap();
        let iface = registry.find("Ping1").unwrap();
        assert_eq!(iface.last_error.as_deref(), Some("boom"));
        assert!(iface.last_started.is_none());

        registry.apply_transition("Ping1", InterfaceStatus::Running, None).unwrap();
        let iface = registry.find("Ping1").unwrap();
        assert!(iface.last_started.is_some());
        assert!(iface.last_error.is_none());

        registry.apply_transition("Ping1", InterfaceStatus::Stopped, None).unwrap();
        assert!(registry.find("Ping1").unwrap().last_stopped.is_some());
    }

    #[test]
    fn test_replace_all_rejects_duplicates_atomically() {
        let (registry, _) = registry_with_log();
        registry.register(Interface::new("keep", InterfaceType::Ping)).unwrap();

        let err = registry
            .replace_all(vec![
                Interface::new("x", InterfaceType::Ping),
                Interface::new("x", InterfaceType::Ufl),
            ])
            .unwrap_err();
        assert!(matches!(err, InterfaceError::DuplicateName(_)));
        assert!(registry.find("keep").is_some());

        assert_eq!(
            registry
                .replace_all(vec![Interface::new("y", InterfaceType::Rdbms)])
                .unwrap(),
            1
        );
        assert!(registry.find("keep").is_none());
        assert!(registry.find("y").is_some());
    }

    #[test]
    fn test_status_counts() {
        let (registry, _) = registry_with_log();
        registry.register(Interface::new("a", InterfaceType::Ping)).unwrap();
        registry.register(Interface::new("b", InterfaceType::Ping)).unwrap();
        registry.apply_transition("b", InterfaceStatus::Running, None).unwrap();

        let counts = registry.status_counts();
        assert_eq!(counts["Stopped"], 1);
        assert_eq!(counts["Running"], 1);
        assert_eq!(counts["Error"], 0);
    }
}

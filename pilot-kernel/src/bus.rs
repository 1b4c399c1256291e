/**
 * NOTIFICATION BUS - Observateurs des changements du registre et des états
 *
 * RÔLE :
 * Publish/subscribe minimal pour que l'UI, les logs ou le forwarding MQTT
 * apprennent les changements sans polling.
 *
 * FONCTIONNEMENT :
 * - `subscribe(handler)` enregistre un callback, retourne un SubscriptionId
 * - `publish(event)` appelle les handlers dans l'ordre d'abonnement,
 *   de manière synchrone dans l'appel de publication
 * - `subscribe_channel()` adapte le bus vers un channel tokio pour les
 *   consommateurs async
 *
 * Le verrou des handlers est relâché avant les appels : un handler peut
 * lire le registre ou se désabonner sans deadlock.
 */

use crate::models::{Interface, StatusTransition};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Nature d'un changement du registre
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryChange {
    Registered,
    Updated,
    Deregistered,
}

/// Événements publiés sur le bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum InterfaceEvent {
    RegistryChanged {
        interface: Interface,
        change: RegistryChange,
    },
    StatusChanged {
        interface: Interface,
        transition: StatusTransition,
    },
}

impl InterfaceEvent {
    pub fn interface(&self) -> &Interface {
        match self {
            InterfaceEvent::RegistryChanged { interface, .. } => interface,
            InterfaceEvent::StatusChanged { interface, .. } => interface,
        }
    }

    /// Transition portée par l'événement, None pour un RegistryChanged
    pub fn transition(&self) -> Option<&StatusTransition> {
        match self {
            InterfaceEvent::StatusChanged { transition, .. } => Some(transition),
            InterfaceEvent::RegistryChanged { .. } => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&InterfaceEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct NotificationBus {
    handlers: RwLock<Vec<(SubscriptionId, Handler)>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&InterfaceEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((id, Arc::new(handler)));
        id
    }

    /// Retourne false si l'abonnement n'existait plus
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        handlers.len() != before
    }

    /// Abonnement via channel non borné ; les envois vers un receiver fermé sont ignorés
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<InterfaceEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| {
            let _ = tx.send(event.clone());
        });
        (id, rx)
    }

    pub fn publish(&self, event: &InterfaceEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .read()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InterfaceStatus, InterfaceType};
    use parking_lot::Mutex;

    fn registered(name: &str) -> InterfaceEvent {
        InterfaceEvent::RegistryChanged {
            interface: Interface::new(name, InterfaceType::Ping),
            change: RegistryChange::Registered,
        }
    }

    #[test]
    fn test_handlers_called_in_subscription_order() {
        let bus = NotificationBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            bus.subscribe(move |_| seen.lock().push(tag));
        }

        bus.publish(&registered("Ping1"));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus = NotificationBus::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = count.clone();
        let id = bus.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });

        bus.publish(&registered("a"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&registered("b"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_channel_subscription_receives_events() {
        let bus = NotificationBus::new();
        let (_id, mut rx) = bus.subscribe_channel();

        let iface = Interface::new("Ufl1", InterfaceType::Ufl);
        bus.publish(&InterfaceEvent::StatusChanged {
            interface: iface,
            transition: StatusTransition::new(InterfaceStatus::Stopped, InterfaceStatus::Starting, None),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.interface().name, "Ufl1");
        assert_eq!(event.transition().unwrap().to, InterfaceStatus::Starting);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(registered("Ping1")).unwrap();
        assert_eq!(json["event"], "registry_changed");
        assert_eq!(json["change"], "registered");
        assert_eq!(json["interface"]["name"], "Ping1");
    }
}

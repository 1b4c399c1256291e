/*!
Enregistreur d'événements du bus

S'abonne au NotificationBus et garde une copie de chaque événement pour
les assertions. Se désabonne tout seul quand il est droppé.
*/

use parking_lot::Mutex;
use pilot_kernel::bus::{InterfaceEvent, NotificationBus, RegistryChange, SubscriptionId};
use pilot_kernel::models::InterfaceStatus;
use std::sync::Arc;

pub struct EventRecorder {
    bus: Arc<NotificationBus>,
    id: SubscriptionId,
    events: Arc<Mutex<Vec<InterfaceEvent>>>,
}

impl EventRecorder {
    pub fn attach(bus: &Arc<NotificationBus>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let id = bus.subscribe(move |event| sink.lock().push(event.clone()));
        Self {
            bus: bus.clone(),
            id,
            events,
        }
    }

    pub fn events(&self) -> Vec<InterfaceEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Transitions (from, to) notifiées pour une interface, dans l'ordre
    pub fn transitions_for(&self, name: &str) -> Vec<(InterfaceStatus, InterfaceStatus)> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.interface().name == name)
            .filter_map(|e| e.transition().map(|t| (t.from, t.to)))
            .collect()
    }

    pub fn registry_changes_for(&self, name: &str) -> Vec<RegistryChange> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                InterfaceEvent::RegistryChanged { interface, change } if interface.name == name => Some(*change),
                _ => None,
            })
            .collect()
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

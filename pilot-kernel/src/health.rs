use crate::registry::InterfaceRegistry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;

#[derive(Debug, Serialize, Deserialize)]
pub struct KernelHealth {
    pub uptime_seconds: u64,
    pub interfaces_total: usize,
    pub interfaces_by_status: BTreeMap<String, usize>,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

/// Compteurs de santé du kernel, partagés entre l'API et le forwarder MQTT
#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            // pas de broker tant que le forwarder n'a pas démarré
            mqtt_status: Arc::new(Mutex::new("disabled".to_string())),
        }
    }

    pub fn mark_mqtt_connecting(&self) {
        *self.mqtt_status.lock() = "connecting".to_string();
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn mark_mqtt_disconnected(&self) {
        *self.mqtt_status.lock() = "disconnected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn get_health(&self, registry: &InterfaceRegistry) -> KernelHealth {
        let interfaces_by_status = registry.status_counts();
        KernelHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            interfaces_total: interfaces_by_status.values().sum(),
            interfaces_by_status,
            memory_usage_mb: resident_memory_mb().unwrap_or(0.0),
            mqtt_status: self.mqtt_status.lock().clone(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Mémoire résidente du process courant via sysinfo
fn resident_memory_mb() -> Option<f32> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_process(pid);
    let bytes = system.process(pid)?.memory();
    Some(bytes as f32 / (1024.0 * 1024.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::NotificationBus;
    use crate::models::{Interface, InterfaceType};

    #[test]
    fn test_health_counts_interfaces() {
        let registry = InterfaceRegistry::new(Arc::new(NotificationBus::new()));
        registry.register(Interface::new("Ping1", InterfaceType::Ping)).unwrap();
        registry.register(Interface::new("Ufl1", InterfaceType::Ufl)).unwrap();

        let tracker = HealthTracker::new();
        let health = tracker.get_health(&registry);
        assert_eq!(health.interfaces_total, 2);
        assert_eq!(health.interfaces_by_status["Stopped"], 2);
        assert_eq!(health.interfaces_by_status["Running"], 0);
        assert_eq!(health.mqtt_status, "disabled");
    }

    #[test]
    fn test_mqtt_reconnects_tracked() {
        let tracker = HealthTracker::new();
        let registry = InterfaceRegistry::new(Arc::new(NotificationBus::new()));
        tracker.increment_reconnects();
        tracker.increment_reconnects();
        let health = tracker.get_health(&registry);
        assert_eq!(health.mqtt_reconnects, 2);
        assert_eq!(health.mqtt_status, "reconnecting");

        tracker.mark_mqtt_connected();
        assert_eq!(tracker.get_health(&registry).mqtt_status, "connected");
    }

    #[test]
    fn test_resident_memory_read() {
        assert!(resident_memory_mb().is_some_and(|mb| mb > 0.0));
    }
}

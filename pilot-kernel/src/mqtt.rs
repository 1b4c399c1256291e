use crate::bus::{InterfaceEvent, NotificationBus};
use crate::config::MqttConf;
use crate::health::HealthTracker;
use crate::registry::InterfaceRegistry;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const STATUS_TOPIC: &str = "pilot/interfaces/status@v1";
pub const REGISTRY_TOPIC: &str = "pilot/interfaces/registry@v1";
pub const HEALTH_TOPIC: &str = "pilot/kernel/health@v1";

const HEALTH_PERIOD: Duration = Duration::from_secs(30);

pub fn topic_for(event: &InterfaceEvent) -> &'static str {
    match event {
        InterfaceEvent::StatusChanged { .. } => STATUS_TOPIC,
        InterfaceEvent::RegistryChanged { .. } => REGISTRY_TOPIC,
    }
}

/// Relaie les événements du bus vers le broker et publie la santé du kernel.
/// L'eventloop est pollée dans le même select : les publications passent par
/// try_publish pour ne jamais attendre une file pleine.
pub fn spawn_event_forwarder(
    conf: MqttConf,
    bus: Arc<NotificationBus>,
    registry: Arc<InterfaceRegistry>,
    health: HealthTracker,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let (sub_id, mut events) = bus.subscribe_channel();

    tokio::spawn(async move {
        let mut opts = MqttOptions::new("pilot-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        health.mark_mqtt_connecting();
        info!(host = %conf.host, port = conf.port, "mqtt forwarder started");

        let mut interval = tokio::time::interval(HEALTH_PERIOD);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(event) = events.recv() => {
                    match serde_json::to_vec(&event) {
                        Ok(payload) => {
                            if let Err(e) = client.try_publish(topic_for(&event), QoS::AtLeastOnce, false, payload) {
                                warn!(interface = %event.interface().name, error = %e, "event dropped");
                            }
                        }
                        Err(e) => warn!(error = %e, "event not serializable"),
                    }
                }
                _ = interval.tick() => {
                    let snapshot = health.get_health(&registry);
                    if let Ok(payload) = serde_json::to_vec(&snapshot) {
                        match client.try_publish(HEALTH_TOPIC, QoS::AtLeastOnce, false, payload) {
                            Ok(()) => debug!(uptime = snapshot.uptime_seconds, interfaces = snapshot.interfaces_total, "kernel health published"),
                            Err(e) => warn!(error = %e, "kernel health not published"),
                        }
                    }
                }
                polled = eventloop.poll() => {
                    match polled {
                        Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                            health.mark_mqtt_connected();
                            info!("mqtt connected");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(error = %e, "mqtt error, retrying");
                            health.increment_reconnects();
                            tokio::select! {
                                _ = shutdown.cancelled() => break,
                                _ = tokio::time::sleep(Duration::from_secs(2)) => {}
                            }
                        }
                    }
                }
            }
        }

        bus.unsubscribe(sub_id);
        let _ = client.try_disconnect();
        health.mark_mqtt_disconnected();
        info!("mqtt forwarder stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::RegistryChange;
    use crate::models::{Interface, InterfaceStatus, InterfaceType, StatusTransition};

    #[test]
    fn test_topics_by_event_kind() {
        let iface = Interface::new("Ping1", InterfaceType::Ping);
        let registered = InterfaceEvent::RegistryChanged {
            interface: iface.clone(),
            change: RegistryChange::Registered,
        };
        let status = InterfaceEvent::StatusChanged {
            interface: iface,
            transition: StatusTransition::new(InterfaceStatus::Stopped, InterfaceStatus::Starting, None),
        };
        assert_eq!(topic_for(&registered), REGISTRY_TOPIC);
        assert_eq!(topic_for(&status), STATUS_TOPIC);
    }

    #[tokio::test]
    async fn test_forwarder_stops_and_unsubscribes() {
        let bus = Arc::new(NotificationBus::new());
        let registry = Arc::new(InterfaceRegistry::new(bus.clone()));
        let health = HealthTracker::new();
        let shutdown = CancellationToken::new();

        let conf = MqttConf { host: "127.0.0.1".into(), port: 1 };
        let handle = spawn_event_forwarder(conf, bus.clone(), registry, health.clone(), shutdown.clone());
        assert_eq!(bus.subscriber_count(), 1);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(health.get_health(&InterfaceRegistry::new(bus)).mqtt_status, "disconnected");
    }
}

/**
 * PILOT KERNEL - Point d'entrée du service de pilotage des interfaces PI
 *
 * RÔLE : Assemble config, backend d'activation, registre, coordinateur,
 * monitoring des états, forwarder MQTT et API REST.
 *
 * DÉMARRAGE : document de configuration chargé, états relus sur les services
 * réels, puis API ouverte. ARRÊT (Ctrl-C) : token annulé, document sauvegardé.
 */

use anyhow::{Context, Result};
use parking_lot::Mutex;
use pilot_kernel::bus::NotificationBus;
use pilot_kernel::config::load_config;
use pilot_kernel::document::ConfigurationDocument;
use pilot_kernel::health::HealthTracker;
use pilot_kernel::http::{build_router, AppState};
use pilot_kernel::lifecycle::{spawn_status_monitor, LifecycleCoordinator};
use pilot_kernel::mqtt::spawn_event_forwarder;
use pilot_kernel::network::check_server;
use pilot_kernel::registry::InterfaceRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env optionnel
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pilot_kernel=info")))
        .init();

    let config = Arc::new(load_config().await);
    let shutdown = CancellationToken::new();

    let (activator, probe) = config.backend.build();
    let bus = Arc::new(NotificationBus::new());
    let registry = Arc::new(InterfaceRegistry::new(bus.clone()));
    let coordinator = Arc::new(LifecycleCoordinator::new(
        registry.clone(),
        activator,
        probe,
        config.lifecycle.clone(),
    ));

    // document de configuration
    let document = ConfigurationDocument::load(&config.data_file)
        .await
        .with_context(|| format!("loading {}", config.data_file.display()))?;
    let loaded = registry
        .replace_all(document.interfaces.clone())
        .context("registering interfaces from configuration document")?;
    info!(interfaces = loaded, path = %config.data_file.display(), "configuration document loaded");

    let changed = coordinator.refresh_all_statuses(&shutdown).await;
    info!(changed, "initial status refresh done");
    let monitor = spawn_status_monitor(coordinator.clone(), shutdown.child_token());

    let health = HealthTracker::new();
    let forwarder = config.mqtt.clone().map(|mqtt| {
        spawn_event_forwarder(mqtt, bus.clone(), registry.clone(), health.clone(), shutdown.child_token())
    });

    let server = check_server(&config.pi_server).await;
    if server.reachable {
        info!(host = %server.host, port = server.port, "PI server reachable");
    } else {
        warn!(host = %server.host, port = server.port, "PI server unreachable");
    }

    let api_key = std::env::var("PILOT_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_none() {
        warn!("PILOT_API_KEY not set, every route except /health will answer 401");
    }

    let document = Arc::new(Mutex::new(document));
    let app = build_router(AppState {
        registry: registry.clone(),
        coordinator,
        health,
        config: config.clone(),
        document: document.clone(),
        api_key,
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(&config.api.bind)
        .await
        .with_context(|| format!("binding {}", config.api.bind))?;
    info!(bind = %config.api.bind, "pilot kernel listening");

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                _ = stop.cancelled() => {}
            }
            stop.cancel();
        })
        .await
        .context("http server")?;

    shutdown.cancel();
    if let Some(handle) = monitor {
        let _ = handle.await;
    }
    if let Some(handle) = forwarder {
        let _ = handle.await;
    }

    let snapshot = document.lock().snapshot(&registry);
    snapshot
        .save(&config.data_file)
        .await
        .with_context(|| format!("saving {}", config.data_file.display()))?;
    info!(path = %config.data_file.display(), "configuration document saved");
    Ok(())
}

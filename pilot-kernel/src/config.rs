use crate::activation::{Activator, CommandActivator};
use crate::lifecycle::LifecycleSettings;
use crate::network::PiServerConf;
use crate::probe::{CommandProbe, StatusProbe};
use crate::simulation::{SimulatedBackend, SimulatedConf};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tracing::{info, warn};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct KernelConfig {
    pub api: ApiConf,
    pub lifecycle: LifecycleSettings,
    pub backend: BackendConf,
    pub pi_server: PiServerConf,
    pub mqtt: Option<MqttConf>,
    /// Document de configuration JSON (interfaces, points, settings)
    pub data_file: PathBuf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ApiConf {
    pub bind: String,
}

impl Default for ApiConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

/// Backend d'activation + sonde
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConf {
    Simulated(SimulatedConf),
    Command(CommandConf),
}

impl Default for BackendConf {
    fn default() -> Self {
        BackendConf::Simulated(SimulatedConf::default())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommandConf {
    pub start_command: String,  // ex: "systemctl start {service}"
    pub stop_command: String,   // ex: "systemctl stop {service}"
    pub status_command: String, // ex: "systemctl is-active {service}"
    #[serde(default)]
    pub not_found_markers: Vec<String>,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
}

impl BackendConf {
    /// Construit l'activateur et la sonde correspondant au backend configuré
    pub fn build(&self) -> (Arc<dyn Activator>, Arc<dyn StatusProbe>) {
        match self {
            BackendConf::Simulated(conf) => {
                let sim = Arc::new(SimulatedBackend::new(conf));
                (sim.clone(), sim)
            }
            BackendConf::Command(conf) => {
                let activator = CommandActivator::new(&conf.start_command, &conf.stop_command)
                    .with_not_found_markers(conf.not_found_markers.clone());
                let probe = CommandProbe::new(&conf.status_command, Duration::from_secs(conf.probe_timeout_secs));
                (Arc::new(activator), Arc::new(probe))
            }
        }
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            api: ApiConf::default(),
            lifecycle: LifecycleSettings::default(),
            backend: BackendConf::default(),
            pi_server: PiServerConf::default(),
            mqtt: None,
            data_file: PathBuf::from("./data/pilot.json"),
        }
    }
}

pub fn parse_config(txt: &str) -> Result<KernelConfig, serde_yaml::Error> {
    if txt.trim().is_empty() {
        return Ok(KernelConfig::default());
    }
    serde_yaml::from_str(txt)
}

pub async fn load_config() -> KernelConfig {
    let path = std::env::var("PILOT_KERNEL_CONFIG").unwrap_or_else(|_| "kernel.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt).unwrap_or_else(|e| {
            warn!(%path, error = %e, "invalid config, using defaults");
            KernelConfig::default()
        })
    } else {
        info!(%path, "no config file, using defaults");
        KernelConfig::default()
    }
}

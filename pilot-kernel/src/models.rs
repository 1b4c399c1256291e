/**
 * MODÈLES - Entités du domaine interfaces PI
 *
 * RÔLE :
 * Définit l'entité `Interface` (unité de collecte nommée et typée), son état
 * de cycle de vie et la valeur `StatusTransition` utilisée pour l'audit et les
 * notifications.
 *
 * IDENTITÉ :
 * Le nom est la seule identité canonique (clé du registre, sensible à la casse).
 * Le champ `id` est une métadonnée non autoritaire conservée pour l'export.
 */

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// Famille d'interface de collecte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterfaceType {
    Ping,
    OpcDa,
    OpcAe,
    Ufl,
    Rdbms,
    Perfmon,
    UniInt,
    Custom,
}

impl InterfaceType {
    pub const ALL: [InterfaceType; 8] = [
        InterfaceType::Ping,
        InterfaceType::OpcDa,
        InterfaceType::OpcAe,
        InterfaceType::Ufl,
        InterfaceType::Rdbms,
        InterfaceType::Perfmon,
        InterfaceType::UniInt,
        InterfaceType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceType::Ping => "Ping",
            InterfaceType::OpcDa => "OpcDa",
            InterfaceType::OpcAe => "OpcAe",
            InterfaceType::Ufl => "Ufl",
            InterfaceType::Rdbms => "Rdbms",
            InterfaceType::Perfmon => "Perfmon",
            InterfaceType::UniInt => "UniInt",
            InterfaceType::Custom => "Custom",
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceType {
    type Err = String;

    /// Accepte "OpcDa", "opc-da", "OPC_DA"...
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        InterfaceType::ALL
            .into_iter()
            .find(|t| normalize(t.as_str()) == wanted)
            .ok_or_else(|| format!("unknown interface type: {s}"))
    }
}

/// État de cycle de vie d'une interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InterfaceStatus {
    /// État initial
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    /// Dernière activation/désactivation en échec (raison dans `last_error`)
    Error,
    /// État réel inconnu, il faut un refresh ou une nouvelle transition pour en sortir
    Unknown,
}

impl InterfaceStatus {
    pub const ALL: [InterfaceStatus; 6] = [
        InterfaceStatus::Stopped,
        InterfaceStatus::Starting,
        InterfaceStatus::Running,
        InterfaceStatus::Stopping,
        InterfaceStatus::Error,
        InterfaceStatus::Unknown,
    ];

    /// start() n'est permis que depuis Stopped, Error ou Unknown
    pub fn can_start(&self) -> bool {
        matches!(self, InterfaceStatus::Stopped | InterfaceStatus::Error | InterfaceStatus::Unknown)
    }

    /// stop() n'est permis que depuis Running, Error ou Unknown
    pub fn can_stop(&self) -> bool {
        matches!(self, InterfaceStatus::Running | InterfaceStatus::Error | InterfaceStatus::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InterfaceStatus::Stopped => "Stopped",
            InterfaceStatus::Starting => "Starting",
            InterfaceStatus::Running => "Running",
            InterfaceStatus::Stopping => "Stopping",
            InterfaceStatus::Error => "Error",
            InterfaceStatus::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for InterfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InterfaceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize(s);
        InterfaceStatus::ALL
            .into_iter()
            .find(|st| normalize(st.as_str()) == wanted)
            .ok_or_else(|| format!("unknown interface status: {s}"))
    }
}

/// Opération de cycle de vie demandée par un appelant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
    Refresh,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Restart => "restart",
            LifecycleAction::Refresh => "refresh",
        };
        f.write_str(s)
    }
}

/// Interface de collecte configurée
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interface {
    /// Métadonnée secondaire, jamais utilisée comme clé
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Nom unique dans le registre
    pub name: String,
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
    #[serde(default)]
    pub status: InterfaceStatus,
    /// Nom du service OS interrogé par la sonde et piloté par l'activateur
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_started: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_stopped: Option<OffsetDateTime>,
    #[serde(default)]
    pub point_count: u32,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Raison du dernier passage en Error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl Interface {
    /// Nouvelle interface arrêtée, service_name = nom par défaut
    pub fn new(name: impl Into<String>, interface_type: InterfaceType) -> Self {
        let name = name.into();
        Self {
            id: Uuid::new_v4(),
            service_name: name.clone(),
            name,
            interface_type,
            status: InterfaceStatus::Stopped,
            enabled: true,
            description: None,
            last_started: None,
            last_stopped: None,
            point_count: 0,
            properties: HashMap::new(),
            last_error: None,
        }
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_point_count(mut self, point_count: u32) -> Self {
        self.point_count = point_count;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Changement d'état horodaté, payload des notifications StatusChanged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub from: InterfaceStatus,
    pub to: InterfaceStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusTransition {
    pub fn new(from: InterfaceStatus, to: InterfaceStatus, reason: Option<String>) -> Self {
        Self { from, to, at: OffsetDateTime::now_utc(), reason }
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/**
 * ACTIVATION - Capacité externe qui démarre/arrête le processus réel d'une interface
 *
 * RÔLE :
 * Le coordinateur ne sait pas comment on démarre un service OS. Il appelle
 * un `Activator` ; l'implémentation décide (commande shell, simulation...).
 *
 * COMMANDES :
 * Templates découpés avec shell-words puis substitués argument par argument :
 *   start_command: "systemctl start {service}"
 *   stop_command:  "sc stop {service}"
 * Placeholders : {service}, {name}, {type}. La substitution se fait après le
 * découpage, un nom contenant des espaces reste un seul argument.
 */

use crate::models::Interface;
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Erreurs possibles de l'action externe start/stop
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("service not found: {0}")]
    ServiceNotFound(String),
    #[error("command `{command}` exited with code {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid command template: {0}")]
    InvalidCommand(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Activator: Send + Sync {
    async fn activate(&self, interface: &Interface) -> Result<(), ActivationError>;
    async fn deactivate(&self, interface: &Interface) -> Result<(), ActivationError>;
}

/// Marqueurs de sortie signifiant "service inexistant" (systemctl, sc.exe code 1060)
pub const DEFAULT_NOT_FOUND_MARKERS: [&str; 5] = ["not found", "could not be found", "does not exist", "not-found", "1060"];

/// Activateur qui exécute des commandes OS configurées
pub struct CommandActivator {
    start_command: String,
    stop_command: String,
    not_found_markers: Vec<String>,
}

impl CommandActivator {
    pub fn new(start_command: impl Into<String>, stop_command: impl Into<String>) -> Self {
        Self {
            start_command: start_command.into(),
            stop_command: stop_command.into(),
            not_found_markers: DEFAULT_NOT_FOUND_MARKERS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_not_found_markers(mut self, markers: Vec<String>) -> Self {
        if !markers.is_empty() {
            self.not_found_markers = markers.into_iter().map(|m| m.to_lowercase()).collect();
        }
        self
    }

    async fn run(&self, template: &str, interface: &Interface) -> Result<(), ActivationError> {
        let argv = render_command(template, &interface_placeholders(interface))?;
        let command = argv.join(" ");
        debug!(interface = %interface.name, %command, "running activation command");

        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| ActivationError::Spawn { command: command.clone(), source })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let stdout = String::from_utf8_lossy(&output.stdout).to_lowercase();
        let combined = format!("{} {}", stderr.to_lowercase(), stdout);
        if self.not_found_markers.iter().any(|m| combined.contains(m.as_str())) {
            return Err(ActivationError::ServiceNotFound(interface.service_name.clone()));
        }

        Err(ActivationError::CommandFailed {
            command,
            code: output.status.code(),
            stderr,
        })
    }
}

#[async_trait]
impl Activator for CommandActivator {
    async fn activate(&self, interface: &Interface) -> Result<(), ActivationError> {
        self.run(&self.start_command, interface).await
    }

    async fn deactivate(&self, interface: &Interface) -> Result<(), ActivationError> {
        self.run(&self.stop_command, interface).await
    }
}

/// Placeholders disponibles pour une interface
pub fn interface_placeholders(interface: &Interface) -> Vec<(&'static str, String)> {
    vec![
        ("{service}", interface.service_name.clone()),
        ("{name}", interface.name.clone()),
        ("{type}", interface.interface_type.to_string()),
    ]
}

/// Découpe un template façon shell puis substitue les placeholders dans chaque argument
pub fn render_command(
    template: &str,
    placeholders: &[(&str, String)],
) -> Result<Vec<String>, ActivationError> {
    let words = shell_words::split(template)
        .map_err(|e| ActivationError::InvalidCommand(format!("{template}: {e}")))?;
    if words.is_empty() {
        return Err(ActivationError::InvalidCommand("empty command".to_string()));
    }

    Ok(words.iter().map(|word| substitute(word, placeholders)).collect())
}

/// Substitution en une passe : une valeur insérée n'est jamais relue
fn substitute(word: &str, placeholders: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while !rest.is_empty() {
        match placeholders.iter().find(|(key, _)| rest.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &rest[key.len()..];
            }
            None => {
                let mut chars = rest.chars();
                if let Some(c) = chars.next() {
                    out.push(c);
                }
                rest = chars.as_str();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterfaceType;

    #[test]
    fn test_render_does_not_expand_inserted_values() {
        let iface = Interface::new("Ufl1", InterfaceType::Ufl).with_service("svc-{name}-{type}");
        let argv = render_command("ctl {service} {name}", &interface_placeholders(&iface)).unwrap();
        assert_eq!(argv, vec!["ctl", "svc-{name}-{type}", "Ufl1"]);
    }

    #[test]
    fn test_render_keeps_spaced_names_as_one_argument() {
        let iface = Interface::new("Ping 1", InterfaceType::Ping).with_service("PI Ping Service");
        let argv = render_command("sc start {service}", &interface_placeholders(&iface)).unwrap();
        assert_eq!(argv, vec!["sc", "start", "PI Ping Service"]);
    }

    #[test]
    fn test_render_all_placeholders() {
        let iface = Interface::new("opc1", InterfaceType::OpcDa).with_service("opcint1");
        let argv = render_command(
            "/opt/pi/ctl.sh --kind={type} '{name}' {service}",
            &interface_placeholders(&iface),
        )
        .unwrap();
        assert_eq!(argv, vec!["/opt/pi/ctl.sh", "--kind=OpcDa", "opc1", "opcint1"]);
    }

    #[test]
    fn test_render_rejects_bad_templates() {
        assert!(matches!(render_command("", &[]), Err(ActivationError::InvalidCommand(_))));
        assert!(matches!(
            render_command("start 'unterminated", &[]),
            Err(ActivationError::InvalidCommand(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_activator_success_and_failure() {
        let iface = Interface::new("Ping1", InterfaceType::Ping);
        let activator = CommandActivator::new("true", "false");

        assert!(activator.activate(&iface).await.is_ok());
        assert!(matches!(
            activator.deactivate(&iface).await,
            Err(ActivationError::CommandFailed { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_activator_detects_missing_service() {
        let iface = Interface::new("Ping1", InterfaceType::Ping).with_service("pi-ping");
        let activator = CommandActivator::new(
            "sh -c 'echo \"Unit {service}.service not found.\" >&2; exit 5'",
            "true",
        );

        match activator.activate(&iface).await {
            Err(ActivationError::ServiceNotFound(service)) => assert_eq!(service, "pi-ping"),
            other => panic!("expected ServiceNotFound, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_activator_missing_binary() {
        let iface = Interface::new("Ping1", InterfaceType::Ping);
        let activator = CommandActivator::new("/nonexistent/pilot-ctl start", "true");
        assert!(matches!(
            activator.activate(&iface).await,
            Err(ActivationError::Spawn { .. })
        ));
    }
}

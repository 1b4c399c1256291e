use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::net::TcpStream;
use tracing::debug;

/// Port PI Data Archive par défaut
pub const DEFAULT_PI_PORT: u16 = 5450;

/// Serveur PI cible (section `pi_server` de kernel.yaml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PiServerConf {
    pub host: String,
    pub port: u16,
    pub timeout_ms: u64,
}

impl Default for PiServerConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_PI_PORT,
            timeout_ms: 3000,
        }
    }
}

impl PiServerConf {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize)]
pub struct Reachability {
    pub host: String,
    pub port: u16,
    pub reachable: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
}

/// Test de connexion TCP, ne lève jamais d'erreur : tout échec vaut false.
/// Sert uniquement à autoriser ou non une tentative de connexion.
pub async fn reachable(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(host, port, error = %e, "server unreachable");
            false
        }
        Err(_) => {
            debug!(host, port, ?timeout, "server connect timed out");
            false
        }
    }
}

pub async fn check_server(conf: &PiServerConf) -> Reachability {
    Reachability {
        host: conf.host.clone(),
        port: conf.port,
        reachable: reachable(&conf.host, conf.port, conf.timeout()).await,
        checked_at: OffsetDateTime::now_utc(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(reachable("127.0.0.1", port, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_unreachable_never_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!reachable("127.0.0.1", port, Duration::from_secs(1)).await);
        assert!(!reachable("host.invalid", DEFAULT_PI_PORT, Duration::from_millis(200)).await);
    }

    #[test]
    fn test_default_conf_targets_pi_port() {
        let conf = PiServerConf::default();
        assert_eq!(conf.port, 5450);
        assert_eq!(conf.timeout(), Duration::from_secs(3));
    }
}

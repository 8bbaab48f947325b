use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ShieldConfig {
    pub mqtt: MqttConf,
    pub sync: SyncConf,
    pub http: HttpConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub topic_prefix: String,       // ex: "shield" -> shield/incidents/changes@v1
    pub query_timeout_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SyncConf {
    pub incidents: String,
    pub units: String,
    pub logs: String,
    pub incident_cap: usize,
    pub log_cap: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConf {
    pub bind: String,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            client_id: "shield-dashboard".into(),
            keep_alive_secs: 15,
            topic_prefix: "shield".into(),
            query_timeout_secs: 10,
        }
    }
}

impl Default for SyncConf {
    fn default() -> Self {
        Self {
            incidents: "incidents".into(),
            units: "units".into(),
            logs: "logs".into(),
            incident_cap: 50,
            log_cap: 50,
        }
    }
}

impl Default for HttpConf {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8080".into() }
    }
}

impl ShieldConfig {
    /// Strict variant: any IO or YAML problem is reported.
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let txt = fs::read_to_string(path).await?;
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(&txt)?)
    }
}

/// Loads `.env`, then the YAML file named by `SHIELD_CONFIG` (default `shield.yaml`).
/// Missing or broken files fall back to defaults.
pub async fn load_config() -> ShieldConfig {
    dotenvy::dotenv().ok();
    let path = std::env::var("SHIELD_CONFIG").unwrap_or_else(|_| "shield.yaml".into());
    if !Path::new(&path).exists() {
        warn!("[config] no {}, using default config", path);
        return ShieldConfig::default();
    }

    ShieldConfig::from_file(&path).await.unwrap_or_else(|e| {
        warn!("[config] invalid config {}: {}", path, e);
        ShieldConfig::default()
    })
}

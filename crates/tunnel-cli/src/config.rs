use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Server-side configuration (spec.md §6, §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub require_client_auth: bool,
    pub credential_file: PathBuf,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_max_sessions() -> usize {
    16
}

fn default_queue_depth() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:44350".parse().expect("valid default bind addr"),
            cert_file: PathBuf::from("server.crt"),
            key_file: PathBuf::from("server.key"),
            ca_file: None,
            require_client_auth: false,
            credential_file: PathBuf::from("credentials.json"),
            max_sessions: default_max_sessions(),
            queue_depth: default_queue_depth(),
        }
    }
}

/// Client-side configuration (spec.md §6, §10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_addr: SocketAddr,
    pub server_name: String,
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default = "default_verify_server")]
    pub verify_server: bool,
    pub username: String,
    pub password: String,
}

fn default_verify_server() -> bool {
    true
}

pub fn load_server_config(path: &std::path::Path) -> anyhow::Result<ServerConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading server config {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

pub fn load_client_config(path: &std::path::Path) -> anyhow::Result<ClientConfig> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("reading client config {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

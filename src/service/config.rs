use std::path::Path;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub static GLOBAL_CONFIG: OnceCell<ServerConfig> = OnceCell::new();
pub fn global_config() -> &'static ServerConfig {
    GLOBAL_CONFIG.get().unwrap()
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct GeneralConfig {
    pub server_id: u32,
    pub log_dir: String,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    /// port accepting client connections
    pub client_port: u16,
    /// port accepting connections from peer servers
    pub server_port: u16,
    pub max_connection: usize,
    /// declared package lengths above this are rejected as malformed
    pub max_package_size: usize,
    /// default chunk size requested from the transport while no package
    /// header is known yet
    pub read_buffer_size: usize,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct PeerConfig {
    pub node_id: u32,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub cluster: ClusterConfig,
}

impl ServerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<ServerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let server_config: ServerConfig = settings.try_deserialize()?;

        Ok(server_config)
    }
}

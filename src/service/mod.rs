pub use app_error::{AppError, AppResult};
pub use config::{
    global_config, ClusterConfig, GeneralConfig, NetworkConfig, PeerConfig, ServerConfig,
    GLOBAL_CONFIG,
};
pub use database::Database;
pub use server::{Server, TYPE_ACK, TYPE_PING};
pub use shutdown::Shutdown;
pub use tracing_config::{setup_local_tracing, setup_tracing, LogGuard};

mod app_error;
mod config;
mod database;
mod server;
mod shutdown;
mod tracing_config;

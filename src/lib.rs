mod cluster;
mod network;
mod service;

pub use cluster::{ServerNode, User, NODE_CONNECTED};
pub use network::{
    AccumulationBuffer, Connection, ConnectionRole, Origin, Package, PackageHandler, PackageHeader,
    ReadState, Reassembler, HEADER_SIZE,
};
pub use service::{
    global_config, setup_local_tracing, setup_tracing, AppError, AppResult, ClusterConfig,
    Database, GeneralConfig, LogGuard, NetworkConfig, PeerConfig, Server, ServerConfig, Shutdown,
    GLOBAL_CONFIG, TYPE_ACK, TYPE_PING,
};

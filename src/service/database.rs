use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tokio::{runtime, signal};
use tracing::{error, info, trace, warn};

use crate::cluster::ServerNode;
use crate::network::{Connection, ConnectionRole, Origin, Package, PackageHandler};
use crate::AppError;
use crate::AppResult;

use super::server::{next_connection_id, ConnectionHandler, Server, TYPE_PING};
use super::global_config;

/// Top-level orchestration: builds the runtime, binds the client and
/// inter-server listeners, links the configured peers and coordinates
/// graceful shutdown.
#[derive(Default)]
pub struct Database {}

impl Database {
    pub fn new() -> Self {
        Database {}
    }

    // Graceful shutdown sequence:
    // 1. ctrl-c cancels the accept loops inside `run_servers`.
    // 2. The shutdown broadcast tells every connection handler to stop
    //    reading; in-flight dispatches finish and their responses are sent.
    // 3. Once every handler has dropped its completion sender, the receiver
    //    below resolves and the process exits.
    pub fn start(&mut self) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

        rt.block_on(Self::run_servers(
            notify_shutdown.clone(),
            shutdown_complete_tx,
        ))?;

        // accept loops are done, tell the connection handlers to finish
        let _ = notify_shutdown.send(());
        drop(notify_shutdown);

        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        info!("database shutdown complete");
        Ok(())
    }

    async fn run_servers(
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
    ) -> AppResult<()> {
        let network_config = &global_config().network;
        let client_address = format!("{}:{}", network_config.ip, network_config.client_port);
        let server_address = format!("{}:{}", network_config.ip, network_config.server_port);

        let client_listener = Self::bind(&client_address).await?;
        let server_listener = Self::bind(&server_address).await?;
        info!("listening for clients on {}", client_address);
        info!("listening for peer servers on {}", server_address);

        let peers: Arc<Vec<Arc<ServerNode>>> = Arc::new(
            global_config()
                .cluster
                .peers
                .iter()
                .map(|peer| Arc::new(ServerNode::new(peer.node_id, peer.host.clone(), peer.port)))
                .collect(),
        );

        let limit_connections = Arc::new(Semaphore::new(network_config.max_connection));

        let client_server = Server::new(
            client_listener,
            ConnectionRole::Client,
            limit_connections.clone(),
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
            Arc::new(Vec::new()),
        );
        let peer_server = Server::new(
            server_listener,
            ConnectionRole::Server,
            limit_connections,
            notify_shutdown.clone(),
            shutdown_complete_tx.clone(),
            peers.clone(),
        );

        for node in peers.iter() {
            let node = node.clone();
            let notify_shutdown = notify_shutdown.clone();
            let shutdown_complete_tx = shutdown_complete_tx.clone();
            tokio::spawn(async move {
                if let Err(err) =
                    link_peer(node.clone(), notify_shutdown, shutdown_complete_tx).await
                {
                    error!("failed to link peer {}: {}", node.node_id, err);
                }
            });
        }

        tokio::select! {
            res = client_server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "failed to accept client connection");
                }
            }
            res = peer_server.run() => {
                if let Err(err) = res {
                    error!(cause = %err, "failed to accept server connection");
                }
            }
            _ = signal::ctrl_c() => {
                info!("get shutdown signal");
            }
        }

        Ok(())
    }

    async fn bind(address: &str) -> AppResult<TcpListener> {
        match TcpListener::bind(address).await {
            Ok(listener) => Ok(listener),
            Err(err) => {
                let error_msg = format!(
                    "Failed to bind server to address: {} - Error: {}",
                    address, err
                );
                error!(error_msg);
                Err(AppError::IllegalState(error_msg))
            }
        }
    }
}

/// Opens the outbound backend connection to one configured peer, announces
/// this server with a ping and leaves the read loop running to resolve
/// responses against the node's pending correlations.
async fn link_peer(
    node: Arc<ServerNode>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
) -> AppResult<()> {
    let stream = TcpStream::connect(node.address()).await?;
    let network_config = &global_config().network;
    let connection_id = next_connection_id();
    let (reader, write_half) = stream.into_split();

    let resolver = node.clone();
    let on_package: PackageHandler = Box::new(move |package: &Package| {
        if !resolver.complete_request(package.clone()) {
            warn!(
                "no pending request for correlation id {}",
                package.header.correlation_id
            );
        }
        None
    });

    let mut connection = Connection::new(
        connection_id,
        ConnectionRole::Backend,
        reader,
        network_config.read_buffer_size,
        network_config.max_package_size,
        on_package,
    );
    connection.attach_origin(Origin::Backend(node.clone()))?;

    // announce ourselves before handing the socket to the read loop
    let (correlation_id, response_rx) = node.register_request();
    let mut writer = BufWriter::new(write_half);
    let ping = Package::new(correlation_id, TYPE_PING, Bytes::new());
    writer.write_all(&ping.encode()).await?;
    writer.flush().await?;

    let mut handler =
        ConnectionHandler::new(notify_shutdown, shutdown_complete_tx, connection, writer);
    tokio::spawn(async move {
        if let Err(err) = handler.handle_connection().await {
            error!("backend connection error: {:?}", err);
        }
    });

    match time::timeout(Duration::from_secs(5), response_rx).await {
        Ok(Ok(ack)) => {
            info!(
                "peer {} answered startup ping (message_type: {})",
                node.node_id, ack.header.message_type
            );
            Ok(())
        }
        Ok(Err(_)) => Err(AppError::IllegalState(format!(
            "pending request to peer {} was cancelled",
            node.node_id
        ))),
        Err(_) => Err(AppError::DetailedIoError(format!(
            "peer {} did not answer startup ping",
            node.node_id
        ))),
    }
}

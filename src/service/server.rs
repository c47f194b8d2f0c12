use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::time::{self, Duration};
use tracing::{debug, error, warn};

use crate::cluster::ServerNode;
use crate::network::{Connection, ConnectionRole, Origin, Package, PackageHandler};
use crate::{AppError, AppResult};

use super::{global_config, Shutdown};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// message types understood by the default dispatch
pub const TYPE_PING: u8 = 1;
pub const TYPE_ACK: u8 = 2;

pub(crate) fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Default completion callback: pings are answered with an ack carrying the
/// same correlation id, anything else is logged and dropped. A dropped
/// package never produces a response, so its correlation id stays
/// unanswered on the peer side.
pub(crate) fn default_handler(connection_id: u64) -> PackageHandler {
    Box::new(move |package: &Package| match package.header.message_type {
        TYPE_PING => Some(Package::new(
            package.header.correlation_id,
            TYPE_ACK,
            Bytes::new(),
        )),
        message_type => {
            warn!(
                "connection {} received unsupported package type {}, dropping it",
                connection_id, message_type
            );
            None
        }
    })
}

// drives one connection: read loop on one side, response writes on the other
pub(crate) struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection: Connection<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl ConnectionHandler {
    pub(crate) fn new(
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        connection: Connection<OwnedReadHalf>,
        writer: BufWriter<OwnedWriteHalf>,
    ) -> ConnectionHandler {
        ConnectionHandler {
            notify_shutdown,
            _shutdown_complete_tx: shutdown_complete_tx,
            connection,
            writer,
        }
    }

    pub(crate) async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            // a clean close between packages returns None; a transport error
            // or a close mid-package returns Err and tears the connection down
            let maybe_package = tokio::select! {
                res = self.connection.read_package() => res?,
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
            };

            let package = match maybe_package {
                Some(package) => package,
                None => break,
            };

            if let Some(response) = self.connection.dispatch(&package) {
                self.writer.write_all(&response.encode()).await.map_err(|e| {
                    AppError::DetailedIoError(format!("write response error: {}", e))
                })?;
                self.writer
                    .flush()
                    .await
                    .map_err(|e| AppError::DetailedIoError(format!("flush response error: {}", e)))?;
            }
        }
        debug!("connection handler exit read loop");

        Ok(())
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection handler dropped");
    }
}

/// Accept loop for one listening socket. All accepted connections get the
/// role the listener was created with.
pub struct Server {
    listener: TcpListener,
    role: ConnectionRole,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    peers: Arc<Vec<Arc<ServerNode>>>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        role: ConnectionRole,
        limit_connections: Arc<Semaphore>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        peers: Arc<Vec<Arc<ServerNode>>>,
    ) -> Server {
        Server {
            listener,
            role,
            limit_connections,
            notify_shutdown,
            shutdown_complete_tx,
            peers,
        }
    }

    /// Accepts connections until the listener fails. Each connection is
    /// limited by the shared semaphore, assigned a process-unique id and
    /// driven by its own task.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self) -> AppResult<()> {
        let network_config = &global_config().network;

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .unwrap();

            let socket = self.accept().await?;
            let peer_addr = socket.peer_addr().ok();

            let connection_id = next_connection_id();
            debug!(
                "accepted {:?} connection {} from {:?}",
                self.role, connection_id, peer_addr
            );

            let (reader, writer) = socket.into_split();
            let mut connection = Connection::new(
                connection_id,
                self.role,
                reader,
                network_config.read_buffer_size,
                network_config.max_package_size,
                default_handler(connection_id),
            );

            if self.role == ConnectionRole::Server {
                self.attach_peer_origin(&mut connection, peer_addr.map(|addr| addr.ip()));
            }

            let mut handler = ConnectionHandler::new(
                self.notify_shutdown.clone(),
                self.shutdown_complete_tx.clone(),
                connection,
                BufWriter::new(writer),
            );

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("connection error: {:?}", err);
                }
                // whether gracefully or unexpectedly closed, release the slot
                drop(permit);
            });
        }
    }

    // an inbound server connection is matched to a configured peer by its
    // remote address; binding the origin also sets the node's back-pointer
    fn attach_peer_origin(
        &self,
        connection: &mut Connection<OwnedReadHalf>,
        remote_ip: Option<std::net::IpAddr>,
    ) {
        let Some(remote_ip) = remote_ip else {
            warn!("server connection {} has no peer address", connection.id());
            return;
        };
        let matched = self
            .peers
            .iter()
            .find(|node| node.host == remote_ip.to_string());
        match matched {
            Some(node) => {
                if let Err(err) = connection.attach_origin(Origin::Server(node.clone())) {
                    error!("failed to attach server origin: {:?}", err);
                }
            }
            None => {
                warn!(
                    "server connection {} from {} matches no configured peer",
                    connection.id(),
                    remote_ip
                );
            }
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::Accept(format!(
                            "accept tcp connection error: {}",
                            err
                        )));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("{:?} listener dropped", self.role);
    }
}

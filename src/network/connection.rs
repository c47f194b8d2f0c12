use std::io::{self, ErrorKind};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use super::package::Package;
use super::reassembler::Reassembler;
use crate::cluster::{ServerNode, User};
use crate::{AppError, AppResult};

/// The fixed category of a connection, assigned when the socket is
/// established and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// inbound connection from a database client
    Client,
    /// outbound connection to a peer server
    Backend,
    /// inbound connection from a peer server
    Server,
}

/// The externally-owned entity a connection acts on behalf of. The variant
/// carries the counted reference and must match the connection role.
#[derive(Debug)]
pub enum Origin {
    Client(Arc<User>),
    Backend(Arc<ServerNode>),
    Server(Arc<ServerNode>),
}

impl Origin {
    pub fn role(&self) -> ConnectionRole {
        match self {
            Origin::Client(_) => ConnectionRole::Client,
            Origin::Backend(_) => ConnectionRole::Backend,
            Origin::Server(_) => ConnectionRole::Server,
        }
    }
}

/// Invoked once for every fully reassembled package. The package is only
/// borrowed for the duration of the call; an implementation that needs the
/// data afterwards must copy it out. An optional response package is
/// written back on the same connection by the caller.
pub type PackageHandler = Box<dyn FnMut(&Package) -> Option<Package> + Send>;

/// Per-socket state: role, reassembly buffer, completion callback and the
/// optional origin reference. Exactly one instance exists per open socket;
/// dropping it runs the role-specific teardown.
pub struct Connection<R> {
    id: u64,
    role: ConnectionRole,
    reader: R,
    reassembler: Reassembler,
    on_package: PackageHandler,
    origin: Option<Origin>,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    pub fn new(
        id: u64,
        role: ConnectionRole,
        reader: R,
        read_buffer_size: usize,
        max_package_size: usize,
        on_package: PackageHandler,
    ) -> Connection<R> {
        Connection {
            id,
            role,
            reader,
            reassembler: Reassembler::new(read_buffer_size, max_package_size),
            on_package,
            origin: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn role(&self) -> ConnectionRole {
        self.role
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Attaches the origin after the role-specific handshake. For the
    /// server role this also binds the node's connection back-pointer.
    pub fn attach_origin(&mut self, origin: Origin) -> AppResult<()> {
        if origin.role() != self.role {
            return Err(AppError::IllegalState(format!(
                "{:?} origin attached to {:?} connection {}",
                origin.role(),
                self.role,
                self.id
            )));
        }
        if self.origin.is_some() {
            return Err(AppError::IllegalState(format!(
                "origin already attached to connection {}",
                self.id
            )));
        }
        if let Origin::Server(node) = &origin {
            node.bind_connection(self.id);
        }
        self.origin = Some(origin);
        Ok(())
    }

    /// Reads from the socket until one package completes.
    ///
    /// Each pass asks the reassembler how many bytes the transport may
    /// deliver and reads at most that much, so a known package is never
    /// overshot by the read itself. Returns `None` when the peer closed
    /// the stream between packages; closing mid-package is an error, as is
    /// any transport failure. In both error cases buffered partial data is
    /// discarded and the caller is expected to release the connection.
    pub async fn read_package(&mut self) -> AppResult<Option<Package>> {
        loop {
            let capacity = self.reassembler.read_capacity();
            let mut chunk = BytesMut::with_capacity(capacity);
            let bytes_read = self
                .reader
                .read_buf(&mut (&mut chunk).limit(capacity))
                .await?;
            if bytes_read == 0 {
                return if self.reassembler.is_idle() {
                    // peer closed the connection between packages
                    Ok(None)
                } else {
                    // peer closed the connection while sending a package
                    self.reassembler.discard();
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
            if let Some(package) = self.reassembler.accept_chunk(&chunk)? {
                return Ok(Some(package));
            }
        }
    }

    /// Hands a completed package to the registered callback.
    pub fn dispatch(&mut self, package: &Package) -> Option<Package> {
        (self.on_package)(package)
    }
}

impl<R> Drop for Connection<R> {
    fn drop(&mut self) {
        debug!("closing {:?} connection {}", self.role, self.id);
        match self.origin.take() {
            // the counted reference is released when the Arc drops
            Some(Origin::Client(_user)) => {}
            Some(Origin::Backend(_node)) => {}
            Some(Origin::Server(node)) => {
                // unlink the peer descriptor before releasing the reference
                node.clear_connection();
                node.cancel_pending();
            }
            None => {}
        }
    }
}

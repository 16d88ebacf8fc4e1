//! # Transport Layer
//!
//! Message-oriented channels between table nodes. The protocol layer sees a
//! connection as an ordered stream of opaque frames in each direction; how
//! frames are carried is up to the [`Transport`] implementation.
//!
//! ## Implementations
//! - **Local**: in-process channels, for tests and same-process sessions
//! - **TCP**: tokio sockets with length-delimited framing
//!
//! Dropping every [`FrameSender`] of a connection closes it; the peer then
//! sees its receiver end.

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

use crate::error::Result;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Factory for listeners and outbound connections, injected into the node
/// controller.
pub trait Transport: Send + Sync + 'static {
    fn listen<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Listener>>;

    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Connection>>;
}

/// Sending half of a connection. Sends never block.
#[derive(Debug, Clone)]
pub struct FrameSender {
    peer: String,
    tx: mpsc::UnboundedSender<Bytes>,
}

impl FrameSender {
    pub(crate) fn new(peer: impl Into<String>, tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self {
            peer: peer.into(),
            tx,
        }
    }

    /// Queues `frame`. Returns `false` once the connection is gone.
    pub fn send(&self, frame: Bytes) -> bool {
        self.tx.send(frame).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

/// An open connection to one peer.
#[derive(Debug)]
pub struct Connection {
    sender: FrameSender,
    receiver: mpsc::UnboundedReceiver<Bytes>,
}

impl Connection {
    pub(crate) fn new(sender: FrameSender, receiver: mpsc::UnboundedReceiver<Bytes>) -> Self {
        Self { sender, receiver }
    }

    pub fn peer(&self) -> &str {
        self.sender.peer()
    }

    pub fn split(self) -> (FrameSender, mpsc::UnboundedReceiver<Bytes>) {
        (self.sender, self.receiver)
    }
}

/// Accepted connections for a bound address. Dropping it stops accepting.
#[derive(Debug)]
pub struct Listener {
    local_addr: String,
    incoming: mpsc::UnboundedReceiver<Connection>,
    shutdown: CancellationToken,
}

impl Listener {
    pub(crate) fn new(
        local_addr: String,
        incoming: mpsc::UnboundedReceiver<Connection>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            local_addr,
            incoming,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> &str {
        &self.local_addr
    }

    /// Next inbound connection, or `None` once the listener is closed.
    pub async fn accept(&mut self) -> Option<Connection> {
        tokio::select! {
            _ = self.shutdown.cancelled() => None,
            connection = self.incoming.recv() => connection,
        }
    }

    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

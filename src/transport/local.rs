//! In-process transport.
//!
//! Addresses are `(host, port)` pairs in a registry shared by clones of one
//! [`LocalTransport`]. A connection is two cross-wired unbounded channels, so
//! frames arrive in order and a dropped sender is seen as end of stream.

use crate::error::Result;
use crate::transport::{Connection, FrameSender, Listener, Transport};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// First port handed out when listening on port 0
const EPHEMERAL_PORT_START: u16 = 49152;

type Registry = HashMap<(String, u16), mpsc::UnboundedSender<Connection>>;

#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    inner: Arc<LocalShared>,
}

#[derive(Debug)]
struct LocalShared {
    listeners: Mutex<Registry>,
    next_port: AtomicU16,
    next_client: AtomicU16,
}

impl Default for LocalShared {
    fn default() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_port: AtomicU16::new(EPHEMERAL_PORT_START),
            next_client: AtomicU16::new(1),
        }
    }
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[instrument(skip(self))]
    fn bind(&self, host: &str, port: u16) -> Result<Listener> {
        let mut registry = self.registry();
        let port = if port == 0 {
            self.inner.next_port.fetch_add(1, Ordering::Relaxed)
        } else {
            port
        };
        let key = (host.to_string(), port);
        if registry.get(&key).is_some_and(|tx| !tx.is_closed()) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                crate::error::constants::ERR_ADDRESS_IN_USE,
            )
            .into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        registry.insert(key, tx);
        let local_addr = format!("{host}:{port}");
        debug!(addr = %local_addr, "local listener bound");
        Ok(Listener::new(local_addr, rx, CancellationToken::new()))
    }

    #[instrument(skip(self))]
    fn open(&self, host: &str, port: u16) -> Result<Connection> {
        let registry = self.registry();
        let acceptor = registry
            .get(&(host.to_string(), port))
            .filter(|tx| !tx.is_closed())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    crate::error::constants::ERR_CONNECTION_REFUSED,
                )
            })?;

        let client_id = self.inner.next_client.fetch_add(1, Ordering::Relaxed);
        let client_addr = format!("local-client-{client_id}");
        let server_addr = format!("{host}:{port}");

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let server_side = Connection::new(FrameSender::new(client_addr, to_client), from_client);
        let client_side = Connection::new(FrameSender::new(server_addr, to_server), from_server);

        acceptor.send(server_side).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                crate::error::constants::ERR_CONNECTION_REFUSED,
            )
        })?;
        Ok(client_side)
    }
}

impl Transport for LocalTransport {
    fn listen<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Listener>> {
        let result = self.bind(host, port);
        async move { result }.boxed()
    }

    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Connection>> {
        let result = self.open(host, port);
        async move { result }.boxed()
    }
}

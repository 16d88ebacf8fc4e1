//! TCP transport with length-delimited framing.
//!
//! Each socket is bridged to a [`Connection`] by one task that forwards
//! queued outbound frames and inbound frames until either side closes.

use crate::config::{NetworkSettings, DEFAULT_MAX_FRAME_SIZE};
use crate::error::Result;
use crate::transport::{Connection, FrameSender, Listener, Transport};
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct TcpTransport {
    max_frame_size: usize,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl TcpTransport {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// Transport framed with the configured frame size limit.
    pub fn from_settings(settings: &NetworkSettings) -> Self {
        Self::new(settings.max_frame_size)
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(self.max_frame_size)
            .new_codec()
    }

    #[instrument(skip(self))]
    async fn bind(&self, host: &str, port: u16) -> Result<Listener> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?.to_string();
        info!(addr = %local_addr, "Listening for table connections");

        let shutdown = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(accept_loop(listener, tx, shutdown.clone(), self.clone()));
        Ok(Listener::new(local_addr, rx, shutdown))
    }

    #[instrument(skip(self))]
    async fn open(&self, host: &str, port: u16) -> Result<Connection> {
        let stream = TcpStream::connect((host, port)).await?;
        let peer = stream.peer_addr()?.to_string();
        debug!(peer = %peer, "Connected");
        Ok(bridge(stream, peer, self.codec()))
    }
}

impl Transport for TcpTransport {
    fn listen<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Listener>> {
        self.bind(host, port).boxed()
    }

    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Connection>> {
        self.open(host, port).boxed()
    }
}

async fn accept_loop(
    listener: TcpListener,
    incoming: mpsc::UnboundedSender<Connection>,
    shutdown: CancellationToken,
    transport: TcpTransport,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    info!(peer = %addr, "New connection established");
                    let connection = bridge(stream, addr.to_string(), transport.codec());
                    if incoming.send(connection).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                }
            }
        }
    }
    debug!("Accept loop stopped");
}

fn bridge(stream: TcpStream, peer: String, codec: LengthDelimitedCodec) -> Connection {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Bytes>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Bytes>();
    let (mut sink, mut frames) = Framed::new(stream, codec).split();
    let task_peer = peer.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                outgoing = out_rx.recv() => match outgoing {
                    Some(frame) => {
                        if let Err(e) = sink.send(frame).await {
                            warn!(peer = %task_peer, error = %e, "Send failed");
                            break;
                        }
                    }
                    None => break,
                },
                incoming = frames.next() => match incoming {
                    Some(Ok(frame)) => {
                        if in_tx.send(frame.freeze()).is_err() {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(peer = %task_peer, error = %e, "Read failed");
                        break;
                    }
                    None => break,
                },
            }
        }
        let _ = sink.close().await;
        debug!(peer = %task_peer, "Connection closed");
    });

    Connection::new(FrameSender::new(peer, out_tx), in_rx)
}

//! Host side of a table session.

use crate::error::{constants, SessionFailure};
use crate::node::controller::NodeShared;
use crate::node::Player;
use crate::protocol::auth::Password;
use crate::protocol::handshake::{HostHandshake, Outcome};
use crate::protocol::message::{Envelope, Message, Stop};
use crate::protocol::tag::NO_TAG;
use crate::transport::{Connection, FrameSender, Listener};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Close,
}

/// Accepts connections until the session is cancelled.
pub(crate) async fn accept_loop(
    shared: Arc<NodeShared>,
    mut listener: Listener,
    password: Arc<Password>,
    session: u64,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(session, "Accept loop stopping");
                break;
            }
            accepted = listener.accept() => match accepted {
                Some(connection) => {
                    shared.metrics.connection_established();
                    info!(peer = %connection.peer(), "New connection established");
                    tokio::spawn(serve_peer(
                        Arc::clone(&shared),
                        connection,
                        Arc::clone(&password),
                        session,
                        cancel.child_token(),
                    ));
                }
                None => {
                    warn!(session, "Listener closed");
                    break;
                }
            }
        }
    }
    listener.close();
}

struct PeerService {
    shared: Arc<NodeShared>,
    sender: FrameSender,
    handshake: HostHandshake,
    password: Arc<Password>,
    session: u64,
    admitted: Option<String>,
}

#[instrument(skip_all, fields(peer = %connection.peer(), session = session))]
async fn serve_peer(
    shared: Arc<NodeShared>,
    connection: Connection,
    password: Arc<Password>,
    session: u64,
    cancel: CancellationToken,
) {
    let (sender, mut inbound) = connection.split();
    let timeout = shared.settings.handshake_timeout;
    let mut service = PeerService {
        handshake: HostHandshake::new(shared.settings.protocol_version),
        shared,
        sender,
        password,
        session,
        admitted: None,
    };
    service.shared.metrics.handshake_attempt();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = &mut deadline, if service.admitted.is_none() => {
                service.on_timeout();
                break;
            }
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    if service.on_frame(&frame) == Flow::Close {
                        break;
                    }
                }
                None => {
                    debug!("Peer closed connection");
                    break;
                }
            }
        }
    }
    service.finish();
}

impl PeerService {
    fn on_timeout(&mut self) {
        warn!(timeout = ?self.shared.settings.handshake_timeout, "Handshake timed out");
        self.handshake.abort();
        self.shared.metrics.handshake_failed();
        self.deliver(vec![Envelope::new(
            NO_TAG,
            Message::Stop(Stop {
                error: Some(SessionFailure::HandshakeTimeout),
            }),
        )]);
    }

    fn on_frame(&mut self, frame: &[u8]) -> Flow {
        self.shared.metrics.message_received();
        let envelope = match Envelope::decode(frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                self.shared.metrics.message_dropped();
                return Flow::Continue;
            }
        };

        match &envelope.message {
            Message::Stop(stop) => {
                info!(player = ?self.admitted, error = ?stop.error, "Peer stopped");
                return Flow::Close;
            }
            Message::PlayersUpdated(_) => {
                warn!("Dropping roster update sent by a peer");
                self.shared.metrics.message_dropped();
                return Flow::Continue;
            }
            other if self.admitted.is_some() => {
                debug!(message = other.kind(), "Dropping handshake message after authentication");
                self.shared.metrics.message_dropped();
                return Flow::Continue;
            }
            _ => {}
        }

        let step = self.handshake.handle(envelope, &self.password);
        if !self.deliver(step.outgoing) {
            return Flow::Close;
        }
        match step.outcome {
            Outcome::Continue | Outcome::Established { .. } => Flow::Continue,
            Outcome::Ignored => {
                self.shared.metrics.message_dropped();
                Flow::Continue
            }
            Outcome::Verified { player_name } => self.admit(player_name),
            Outcome::Failed(failure) => {
                self.shared.metrics.handshake_failed();
                warn!(error = %failure, "Handshake failed");
                Flow::Close
            }
        }
    }

    /// Seats the player, then tells it so, then announces the new roster.
    /// The roster broadcast must not overtake `EndAuthentication`.
    fn admit(&mut self, player_name: String) -> Flow {
        let admission = self.shared.player_connected(
            Player::editor(player_name.clone()),
            self.sender.clone(),
            self.session,
        );
        let accepted = admission.is_ok();
        let step = self.handshake.complete(admission);

        if !accepted {
            self.deliver(step.outgoing);
            self.shared.metrics.handshake_failed();
            return Flow::Close;
        }

        self.admitted = Some(player_name);
        if !self.deliver(step.outgoing) {
            return Flow::Close;
        }
        self.shared.metrics.handshake_success();
        info!(player = ?self.admitted, version = ?self.handshake.chosen_version(), "Player joined");
        self.shared.players_changed();
        Flow::Continue
    }

    fn deliver(&self, outgoing: Vec<Envelope>) -> bool {
        for envelope in outgoing {
            let frame = match envelope.encode() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to encode message");
                    return false;
                }
            };
            if !self.sender.send(frame) {
                debug!("{}", constants::ERR_CONNECTION_CLOSED);
                return false;
            }
            self.shared.metrics.message_sent();
        }
        true
    }

    fn finish(self) {
        if let Some(name) = &self.admitted {
            self.shared.player_disconnected(name, self.session);
        }
        self.shared.metrics.connection_closed();
    }
}

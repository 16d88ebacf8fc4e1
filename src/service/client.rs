//! Joining side of a table session.

use crate::error::{constants, SessionFailure};
use crate::node::controller::NodeShared;
use crate::protocol::auth::Password;
use crate::protocol::handshake::{ClientHandshake, Outcome};
use crate::protocol::message::{Envelope, Message, Stop};
use crate::protocol::tag::NO_TAG;
use crate::transport::{Connection, FrameSender};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// An authenticated link to the host and the negotiated protocol version.
pub(crate) type HostLink = (FrameSender, UnboundedReceiver<Bytes>, u32);

/// Runs Hello and authentication against the host within the configured
/// handshake timeout. Frames the host sends after `EndAuthentication` stay
/// queued in the returned receiver.
pub(crate) async fn authenticate(
    shared: &NodeShared,
    connection: Connection,
    player_name: &str,
    password: &mut Password,
) -> Result<HostLink, SessionFailure> {
    let (sender, mut inbound) = connection.split();
    let mut handshake = ClientHandshake::new(player_name, shared.settings.protocol_version);

    let exchange = exchange(shared, &sender, &mut inbound, &mut handshake, password);
    match tokio::time::timeout(shared.settings.handshake_timeout, exchange).await {
        Ok(Ok(version)) => Ok((sender, inbound, version)),
        Ok(Err(failure)) => Err(failure),
        Err(_) => {
            warn!(timeout = ?shared.settings.handshake_timeout, "Handshake timed out");
            let stop = Envelope::new(
                NO_TAG,
                Message::Stop(Stop {
                    error: Some(SessionFailure::HandshakeTimeout),
                }),
            );
            // Best effort; the connection is dropped either way.
            let _ = send(shared, &sender, stop);
            Err(SessionFailure::HandshakeTimeout)
        }
    }
}

async fn exchange(
    shared: &NodeShared,
    sender: &FrameSender,
    inbound: &mut UnboundedReceiver<Bytes>,
    handshake: &mut ClientHandshake,
    password: &mut Password,
) -> Result<u32, SessionFailure> {
    send(shared, sender, handshake.start())?;

    while let Some(frame) = inbound.recv().await {
        shared.metrics.message_received();
        let envelope = match Envelope::decode(&frame) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable frame");
                shared.metrics.message_dropped();
                continue;
            }
        };
        if let Message::Stop(stop) = &envelope.message {
            return Err(stop.error.clone().unwrap_or(SessionFailure::PeerStopped));
        }

        let step = handshake.handle(envelope, password);
        for envelope in step.outgoing {
            send(shared, sender, envelope)?;
        }
        match step.outcome {
            Outcome::Established { protocol_version } => return Ok(protocol_version),
            Outcome::Failed(failure) => return Err(failure),
            Outcome::Ignored => shared.metrics.message_dropped(),
            Outcome::Continue | Outcome::Verified { .. } => {}
        }
    }
    Err(SessionFailure::ConnectionLost)
}

fn send(shared: &NodeShared, sender: &FrameSender, envelope: Envelope) -> Result<(), SessionFailure> {
    let frame = envelope.encode().map_err(|e| {
        error!(error = %e, "Failed to encode message");
        SessionFailure::ConnectionLost
    })?;
    if !sender.send(frame) {
        debug!("{}", constants::ERR_CONNECTION_CLOSED);
        return Err(SessionFailure::ConnectionLost);
    }
    shared.metrics.message_sent();
    Ok(())
}

/// Follows the host until either side stops. Roster updates replace the
/// local roster; anything else is dropped.
pub(crate) async fn run_session(
    shared: Arc<NodeShared>,
    mut inbound: UnboundedReceiver<Bytes>,
    session: u64,
    cancel: CancellationToken,
) {
    let cause = loop {
        tokio::select! {
            _ = cancel.cancelled() => break None,
            frame = inbound.recv() => {
                let Some(frame) = frame else {
                    break Some(SessionFailure::ConnectionLost);
                };
                shared.metrics.message_received();
                match Envelope::decode(&frame) {
                    Ok(Envelope { message: Message::PlayersUpdated(update), .. }) => {
                        debug!(players = update.players.len(), "Roster update from host");
                        shared.mirror_roster(update.players, session);
                    }
                    Ok(Envelope { message: Message::Stop(stop), .. }) => {
                        break Some(stop.error.unwrap_or(SessionFailure::PeerStopped));
                    }
                    Ok(other) => {
                        warn!(message = other.message.kind(), "Dropping unexpected message");
                        shared.metrics.message_dropped();
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable frame");
                        shared.metrics.message_dropped();
                    }
                }
            }
        }
    };

    if let Some(cause) = cause {
        info!(error = %cause, "Host connection ended");
        shared.end_session(Some(session), Some(cause), false);
    }
    shared.metrics.connection_closed();
}

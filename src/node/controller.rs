//! Connection lifecycle and roster ownership.
//!
//! State transitions use compare-and-set on an atomic, so a second `host()`
//! or `join()` racing the first fails with
//! [`ProtocolError::IllegalConnectionState`] instead of interleaving. Events
//! are fired after every internal lock has been released.

use crate::config::{NetworkSettings, SessionConfig};
use crate::error::{ProtocolError, Result, SessionFailure};
use crate::node::player::{validate_player_name, Player, Roster};
use crate::node::{ConnectionState, NetworkEvent, NodeRole};
use crate::protocol::message::{Envelope, Message, PlayersUpdated, Stop};
use crate::protocol::tag::NO_TAG;
use crate::service::{client, peer};
use crate::transport::{FrameSender, Transport};
use crate::utils::listeners::{ListenerId, ListenerRegistry};
use crate::utils::metrics::{Metrics, MetricsSnapshot};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

struct ActiveSession {
    id: u64,
    role: NodeRole,
    cancel: CancellationToken,
    local_addr: Option<String>,
    table: String,
    /// Client only: link to the host
    host: Option<FrameSender>,
}

/// State shared between the controller handle and its connection tasks.
pub(crate) struct NodeShared {
    transport: Arc<dyn Transport>,
    pub(crate) settings: NetworkSettings,
    pub(crate) metrics: Arc<Metrics>,
    state: AtomicU8,
    next_session: AtomicU64,
    session: Mutex<Option<ActiveSession>>,
    roster: Mutex<Roster>,
    listeners: ListenerRegistry<NetworkEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NodeShared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: ConnectionState, to: ConnectionState) -> Result<()> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| ProtocolError::IllegalConnectionState(ConnectionState::from_u8(actual)))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn is_current(&self, session: u64) -> bool {
        lock(&self.session).as_ref().map(|s| s.id) == Some(session)
    }

    /// Seats a verified player. Listeners and peers learn about it from
    /// [`players_changed`](Self::players_changed), which the caller invokes
    /// once the player has been told it was accepted.
    pub(crate) fn player_connected(
        &self,
        player: Player,
        sender: FrameSender,
        session: u64,
    ) -> std::result::Result<(), SessionFailure> {
        if !self.is_current(session) || self.state() != ConnectionState::Connected {
            return Err(SessionFailure::PeerStopped);
        }
        lock(&self.roster).admit(player, Some(sender), session)
    }

    pub(crate) fn player_disconnected(&self, name: &str, session: u64) {
        let released = lock(&self.roster).release(name, session);
        if released {
            info!(player = %name, "Player left");
            self.players_changed();
        }
    }

    /// Replaces the roster with the host's list.
    pub(crate) fn mirror_roster(&self, players: Vec<Player>, session: u64) {
        if !self.is_current(session) {
            return;
        }
        lock(&self.roster).mirror(players, session);
        self.players_changed();
    }

    /// Broadcasts the roster to admitted peers and fires `PlayersUpdated`.
    /// Suppressed unless connected.
    pub(crate) fn players_changed(&self) {
        if self.state() != ConnectionState::Connected {
            debug!("Roster update suppressed while not connected");
            return;
        }
        let (players, senders) = {
            let roster = lock(&self.roster);
            (roster.players(), roster.senders())
        };

        if !senders.is_empty() {
            let update = Envelope::new(
                NO_TAG,
                Message::PlayersUpdated(PlayersUpdated {
                    players: players.clone(),
                }),
            );
            match update.encode() {
                Ok(frame) => {
                    for sender in senders {
                        if sender.send(frame.clone()) {
                            self.metrics.message_sent();
                        } else {
                            // The peer's own task notices the closed channel.
                            debug!(peer = %sender.peer(), "Roster broadcast skipped closed connection");
                        }
                    }
                }
                Err(e) => error!(error = %e, "Failed to encode roster update"),
            }
        }

        self.listeners
            .notify(&NetworkEvent::PlayersUpdated { players });
    }

    /// Ends the session `expected` (or whichever is active when `None`).
    /// Returns `false` when there was nothing to end.
    pub(crate) fn end_session(
        &self,
        expected: Option<u64>,
        error: Option<SessionFailure>,
        notify_peers: bool,
    ) -> bool {
        if let Some(id) = expected {
            if !self.is_current(id) {
                return false;
            }
        }
        if self.transition(ConnectionState::Connected, ConnectionState::Disconnecting).is_err() {
            return false;
        }

        let session = lock(&self.session).take();
        let peers = {
            let mut roster = lock(&self.roster);
            let senders = roster.senders();
            roster.clear();
            senders
        };

        if let Some(session) = session {
            if notify_peers {
                let links: Vec<FrameSender> = match session.role {
                    NodeRole::Host => peers,
                    NodeRole::Client => session.host.iter().cloned().collect(),
                };
                self.send_stop(&links);
            }
            session.cancel.cancel();
            info!(session = session.id, role = ?session.role, error = ?error, "Session ended");
        }

        self.set_state(ConnectionState::Disconnected);
        self.listeners.notify(&NetworkEvent::Disconnected { error });
        true
    }

    fn send_stop(&self, links: &[FrameSender]) {
        let frame = match Envelope::new(NO_TAG, Message::Stop(Stop { error: None })).encode() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to encode stop");
                return;
            }
        };
        for link in links {
            if link.send(frame.clone()) {
                self.metrics.message_sent();
            }
        }
    }
}

/// Handle to the local table node. Clones share one node.
#[derive(Clone)]
pub struct NodeController {
    inner: Arc<NodeShared>,
}

impl NodeController {
    pub fn new(transport: Arc<dyn Transport>, settings: NetworkSettings) -> Self {
        Self {
            inner: Arc::new(NodeShared {
                transport,
                settings,
                metrics: Arc::new(Metrics::new()),
                state: AtomicU8::new(ConnectionState::Disconnected as u8),
                next_session: AtomicU64::new(0),
                session: Mutex::new(None),
                roster: Mutex::new(Roster::default()),
                listeners: ListenerRegistry::new(),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn role(&self) -> Option<NodeRole> {
        lock(&self.inner.session).as_ref().map(|s| s.role)
    }

    /// Address the host is listening on, e.g. to learn the port chosen for
    /// port 0.
    pub fn local_addr(&self) -> Option<String> {
        lock(&self.inner.session)
            .as_ref()
            .and_then(|s| s.local_addr.clone())
    }

    pub fn table(&self) -> Option<String> {
        lock(&self.inner.session).as_ref().map(|s| s.table.clone())
    }

    pub fn players(&self) -> Vec<Player> {
        lock(&self.inner.roster).players()
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Opens a table and starts admitting players.
    #[instrument(skip(self, config), fields(host = %config.host_name, port = config.port, player = %config.local_player_name))]
    pub async fn host(&self, config: SessionConfig) -> Result<()> {
        let shared = &self.inner;
        shared.transition(ConnectionState::Disconnected, ConnectionState::Connecting)?;

        if let Err(failure) = validate_player_name(&config.local_player_name) {
            shared.set_state(ConnectionState::Disconnected);
            return Err(failure.into());
        }
        let listener = match shared.transport.listen(&config.host_name, config.port).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(error = %e, "Could not open table");
                shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        let session = shared.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        let local_addr = listener.local_addr().to_string();
        {
            let mut roster = lock(&shared.roster);
            roster.clear();
            roster.admit(Player::host(config.local_player_name.clone()), None, session)?;
        }
        *lock(&shared.session) = Some(ActiveSession {
            id: session,
            role: NodeRole::Host,
            cancel: cancel.clone(),
            local_addr: Some(local_addr.clone()),
            table: config.local_table.clone(),
            host: None,
        });

        shared.set_state(ConnectionState::Connected);
        info!(addr = %local_addr, table = %config.local_table, "Hosting table");
        shared.listeners.notify(&NetworkEvent::Connected {
            role: NodeRole::Host,
        });
        shared.players_changed();

        tokio::spawn(peer::accept_loop(
            Arc::clone(shared),
            listener,
            Arc::new(config.password),
            session,
            cancel,
        ));
        Ok(())
    }

    /// Connects to a host and authenticates. On a handshake failure the
    /// connection is dropped, `Disconnected` fires with the cause, and the
    /// cause is returned.
    #[instrument(skip(self, config), fields(host = %config.host_name, port = config.port, player = %config.local_player_name))]
    pub async fn join(&self, config: SessionConfig) -> Result<()> {
        let shared = &self.inner;
        shared.transition(ConnectionState::Disconnected, ConnectionState::Connecting)?;

        let SessionConfig {
            host_name,
            port,
            mut password,
            local_player_name,
            local_table,
        } = config;

        let connection = match shared.transport.connect(&host_name, port).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!(error = %e, "Could not reach host");
                shared.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        shared.metrics.connection_established();
        shared.metrics.handshake_attempt();
        let authenticated =
            client::authenticate(shared, connection, &local_player_name, &mut password).await;
        drop(password);

        let (sender, inbound, version) = match authenticated {
            Ok(link) => link,
            Err(failure) => {
                shared.metrics.handshake_failed();
                shared.metrics.connection_closed();
                shared.set_state(ConnectionState::Disconnected);
                warn!(error = %failure, "Join failed");
                shared.listeners.notify(&NetworkEvent::Disconnected {
                    error: Some(failure.clone()),
                });
                return Err(failure.into());
            }
        };
        shared.metrics.handshake_success();

        let session = shared.next_session.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        lock(&shared.roster).mirror(vec![Player::editor(local_player_name)], session);
        *lock(&shared.session) = Some(ActiveSession {
            id: session,
            role: NodeRole::Client,
            cancel: cancel.clone(),
            local_addr: None,
            table: local_table,
            host: Some(sender),
        });

        shared.set_state(ConnectionState::Connected);
        info!(version, "Joined table");
        shared.listeners.notify(&NetworkEvent::Connected {
            role: NodeRole::Client,
        });

        tokio::spawn(client::run_session(Arc::clone(shared), inbound, session, cancel));
        Ok(())
    }

    /// Leaves the session, telling peers first. A no-op unless connected.
    pub fn disconnect(&self) {
        if !self.inner.end_session(None, None, true) {
            debug!(state = ?self.state(), "Disconnect ignored");
        }
    }
}

impl Drop for NodeShared {
    fn drop(&mut self) {
        if let Some(session) = lock(&self.session).take() {
            session.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::protocol::auth::Password;
    use crate::transport::LocalTransport;

    fn controller(transport: &LocalTransport) -> NodeController {
        NodeController::new(Arc::new(transport.clone()), NetworkSettings::default())
    }

    #[tokio::test]
    async fn test_second_host_rejected_while_connected() {
        let transport = LocalTransport::new();
        let node = controller(&transport);
        node.host(SessionConfig::new("table", 1, Password::new("pw"), "alice"))
            .await
            .unwrap();
        let err = node
            .host(SessionConfig::new("table", 2, Password::new("pw"), "alice"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IllegalConnectionState(ConnectionState::Connected)
        ));
        assert_eq!(node.players().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_noop_when_disconnected() {
        let transport = LocalTransport::new();
        let node = controller(&transport);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        node.add_listener(move |event| lock(&sink).push(event.clone()));

        node.disconnect();
        assert!(lock(&events).is_empty());
        assert_eq!(node.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_listen_returns_to_disconnected() {
        let transport = LocalTransport::new();
        let _taken = transport.listen("table", 5).await.unwrap();
        let node = controller(&transport);
        assert!(node
            .host(SessionConfig::new("table", 5, Password::new("pw"), "alice"))
            .await
            .is_err());
        assert_eq!(node.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_host_disconnect_fires_clean_event() {
        let transport = LocalTransport::new();
        let node = controller(&transport);
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        node.add_listener(move |event| lock(&sink).push(event.clone()));

        node.host(SessionConfig::new("table", 3, Password::new("pw"), "alice"))
            .await
            .unwrap();
        assert_eq!(node.role(), Some(NodeRole::Host));
        node.disconnect();

        let events = lock(&events).clone();
        assert_eq!(
            events.first(),
            Some(&NetworkEvent::Connected {
                role: NodeRole::Host
            })
        );
        assert_eq!(
            events.last(),
            Some(&NetworkEvent::Disconnected { error: None })
        );
        assert!(node.players().is_empty());
        assert_eq!(node.role(), None);
    }
}

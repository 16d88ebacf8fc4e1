//! # Table Node
//!
//! A node is the local participant of a table session, either hosting it or
//! joined to a host. [`NodeController`] owns the connection lifecycle and
//! the player roster and reports changes to registered listeners.
//!
//! ## Lifecycle
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnecting -> Disconnected
//!                      \-> Disconnected (transport or handshake failure)
//! ```

pub mod controller;
pub mod player;

pub use controller::NodeController;
pub use player::{Player, PlayerRole};

use crate::error::SessionFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Disconnecting = 3,
}

impl ConnectionState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            3 => ConnectionState::Disconnecting,
            _ => ConnectionState::Disconnected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Host,
    Client,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkEvent {
    Connected {
        role: NodeRole,
    },
    /// `error` is `None` for a local, clean disconnect.
    Disconnected {
        error: Option<SessionFailure>,
    },
    PlayersUpdated {
        players: Vec<Player>,
    },
}

//! Players and the roster of a table session.

use crate::error::SessionFailure;
use crate::transport::FrameSender;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Longest accepted player name, in characters
pub const MAX_PLAYER_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PlayerRole {
    /// Owns the table and admits other players
    Host,
    /// May edit the table state
    Editor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub name: String,
    pub roles: BTreeSet<PlayerRole>,
}

impl Player {
    pub fn new(name: impl Into<String>, roles: impl IntoIterator<Item = PlayerRole>) -> Self {
        Self {
            name: name.into(),
            roles: roles.into_iter().collect(),
        }
    }

    pub fn host(name: impl Into<String>) -> Self {
        Self::new(name, [PlayerRole::Host, PlayerRole::Editor])
    }

    pub fn editor(name: impl Into<String>) -> Self {
        Self::new(name, [PlayerRole::Editor])
    }

    pub fn has_role(&self, role: PlayerRole) -> bool {
        self.roles.contains(&role)
    }
}

/// Checks a name offered during authentication.
pub fn validate_player_name(name: &str) -> Result<(), SessionFailure> {
    let trimmed = name.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() == name.len()
        && name.chars().count() <= MAX_PLAYER_NAME_LEN
        && !name.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(SessionFailure::InvalidPlayerName(name.to_string()))
    }
}

struct Seat {
    player: Player,
    /// Channel to the player's connection; `None` for the local player and
    /// for players mirrored from the host.
    sender: Option<FrameSender>,
    session: u64,
}

/// Admitted players keyed by name. Owned by the node controller.
#[derive(Default)]
pub(crate) struct Roster {
    seats: BTreeMap<String, Seat>,
}

impl Roster {
    pub(crate) fn clear(&mut self) {
        self.seats.clear();
    }

    pub(crate) fn admit(
        &mut self,
        player: Player,
        sender: Option<FrameSender>,
        session: u64,
    ) -> Result<(), SessionFailure> {
        if self.seats.contains_key(&player.name) {
            return Err(SessionFailure::PlayerAlreadyConnected(player.name));
        }
        self.seats.insert(
            player.name.clone(),
            Seat {
                player,
                sender,
                session,
            },
        );
        Ok(())
    }

    /// Removes `name` if it was admitted during `session`.
    pub(crate) fn release(&mut self, name: &str, session: u64) -> bool {
        match self.seats.get(name) {
            Some(seat) if seat.session == session => {
                self.seats.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Replaces the roster with a list mirrored from the host.
    pub(crate) fn mirror(&mut self, players: Vec<Player>, session: u64) {
        self.seats = players
            .into_iter()
            .map(|player| {
                (
                    player.name.clone(),
                    Seat {
                        player,
                        sender: None,
                        session,
                    },
                )
            })
            .collect();
    }

    pub(crate) fn players(&self) -> Vec<Player> {
        self.seats.values().map(|seat| seat.player.clone()).collect()
    }

    pub(crate) fn senders(&self) -> Vec<FrameSender> {
        self.seats
            .values()
            .filter_map(|seat| seat.sender.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.seats.len()
    }
}

//! # Error Types
//!
//! Error handling for the command engine and the table network.
//!
//! ## Error Categories
//! - **State errors** ([`EngineError`]): caller contract violations such as
//!   mutating outside a transaction or undoing with an empty history
//! - **Command errors** ([`CommandError`]): failures raised by a command body
//! - **Persistence errors** ([`PersistenceError`]): malformed mementos
//! - **Session failures** ([`SessionFailure`]): protocol outcomes that end a
//!   connection; serialisable so they can travel on the wire
//! - **Protocol errors** ([`ProtocolError`]): everything else on the network side
//!
//! ## Example Usage
//! ```rust
//! use table_session::error::{ProtocolError, SessionFailure};
//! use tracing::warn;
//!
//! fn report(err: &ProtocolError) {
//!     match err {
//!         ProtocolError::Session(SessionFailure::AuthenticationFailed) => {
//!             warn!("wrong table password")
//!         }
//!         other => warn!(error = %other, "network error"),
//!     }
//! }
//! ```

use crate::core::serialization::FormatError;
use crate::engine::attribute::AttributeName;
use crate::node::ConnectionState;
use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Engine worker errors
    pub const ERR_WORKER_REENTRY: &str =
        "Blocking wait on a command issued from the engine worker itself";
    pub const ERR_LISTENER_PANIC: &str = "Listener panicked; notification skipped";

    /// Persistence errors
    pub const ERR_HISTORY_SLOT_TYPE: &str = "Command history slot does not hold history entries";
    pub const ERR_ATTRIBUTE_SLOT_TYPE: &str = "Attribute slot holds history entries";

    /// Connection errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection closed";
    pub const ERR_ADDRESS_IN_USE: &str = "Address already in use";
    pub const ERR_CONNECTION_REFUSED: &str = "Connection refused";

    /// Handshake errors
    pub const ERR_UNEXPECTED_TAG: &str = "Reply tag does not match the pending request";
    pub const ERR_PASSWORD_CONSUMED: &str = "Password already wiped";
}

/// State and infrastructure errors raised by the command engine.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("A transaction is already active")]
    TransactionAlreadyActive,

    #[error("No transaction is active")]
    TransactionNotActive,

    #[error("The active transaction is not writable")]
    TransactionNotWritable,

    #[error("Attribute {0} does not exist")]
    AttributeAbsent(AttributeName),

    #[error("Attribute {0} already exists")]
    AttributePresent(AttributeName),

    #[error("Nothing to undo")]
    UndoUnavailable,

    #[error("Nothing to redo")]
    RedoUnavailable,

    #[error("Command engine has shut down")]
    Shutdown,

    #[error("Blocking wait on a command issued from the engine worker itself")]
    WorkerReentry,

    #[error("Failed to start engine worker: {0}")]
    WorkerSpawn(#[source] io::Error),

    #[error("Command '{command}' failed: {source}")]
    Command {
        command: String,
        #[source]
        source: CommandError,
    },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Failure raised by a command body.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error(transparent)]
    State(Box<EngineError>),

    #[error("{0}")]
    Failed(String),

    #[error("Command panicked: {0}")]
    Panicked(String),
}

impl CommandError {
    pub fn failed(message: impl Into<String>) -> Self {
        CommandError::Failed(message.into())
    }
}

impl From<EngineError> for CommandError {
    fn from(err: EngineError) -> Self {
        CommandError::State(Box::new(err))
    }
}

/// Malformed or disallowed memento content. Loading fails as a whole.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    #[error("Illegal attribute name: '{0}'")]
    IllegalAttributeName(String),

    #[error("Transient attribute present: '{0}'")]
    TransientAttributePresent(String),

    #[error("Memento has no command history entry")]
    MissingHistory,

    #[error("Malformed memento: {0}")]
    Malformed(String),

    #[error("Unknown command kind: '{0}'")]
    UnknownCommandKind(String),

    #[error("Invalid command record '{kind}': {reason}")]
    InvalidCommandRecord { kind: String, reason: String },

    #[error("Encoding error: {0}")]
    Encoding(String),
}

impl From<FormatError> for PersistenceError {
    fn from(err: FormatError) -> Self {
        PersistenceError::Encoding(err.to_string())
    }
}

/// Protocol outcome that terminates a session.
///
/// Travels inside `HelloResponse`, `EndAuthentication` and `Stop` and is the
/// cause reported by `NetworkEvent::Disconnected`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionFailure {
    #[error("Unsupported protocol version {requested} (supported {minimum}..={maximum})")]
    UnsupportedVersion {
        requested: u32,
        minimum: u32,
        maximum: u32,
    },

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Player '{0}' is already connected")]
    PlayerAlreadyConnected(String),

    #[error("Invalid player name: '{0}'")]
    InvalidPlayerName(String),

    #[error("Handshake timed out")]
    HandshakeTimeout,

    #[error("Peer stopped the session")]
    PeerStopped,

    #[error("Connection lost")]
    ConnectionLost,
}

// ProtocolError is the primary error type for all network operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("Illegal connection state: {0:?}")]
    IllegalConnectionState(ConnectionState),

    #[error("Unknown message id: {0}")]
    UnknownMessage(u16),

    #[error(transparent)]
    Session(#[from] SessionFailure),

    #[error("Authentication key error: {0}")]
    KeyError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Type alias for Results using EngineError
pub type EngineResult<T> = std::result::Result<T, EngineError>;

//! # table-session
//!
//! Shared tabletop state with a transactional, undoable command engine and
//! password-authenticated table sessions between a host and its players.
//!
//! ## Command engine
//! All state changes go through commands executed one at a time on a
//! dedicated worker. Each command runs inside a transaction; failures roll
//! back and successful application changes land in an undo history.
//!
//! ```rust,no_run
//! use table_session::config::EngineConfig;
//! use table_session::engine::{AttributeName, CommandEngine, CommandKind, Value};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = CommandEngine::new(&EngineConfig::default())?;
//! engine.execute_blocking(CommandKind::write("place-token", |ctx| {
//!     ctx.add(AttributeName::application("token.1"), Value::Integer(4))?;
//!     Ok(Value::Null)
//! }))?;
//! engine.undo().wait()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Table network
//! A [`NodeController`](node::NodeController) hosts a table or joins one
//! over any [`Transport`](transport::Transport). Joining runs a versioned
//! Hello followed by a salted HMAC challenge/response; the password is wiped
//! as soon as it has been used.
//!
//! ## Module layout
//! - [`engine`]: transactional state, history, command engine, mementos
//! - [`protocol`]: wire messages, tags, authentication, handshake
//! - [`node`]: connection lifecycle and player roster
//! - [`transport`]: in-process and TCP frame transports
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: listeners, logging, metrics

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod node;
pub mod protocol;
mod service;
pub mod transport;
pub mod utils;

pub use config::{EngineConfig, NetworkSettings, NodeConfig, SessionConfig};
pub use engine::{CommandEngine, CommandKind, EngineEvent};
pub use error::{EngineError, ProtocolError, SessionFailure};
pub use node::{ConnectionState, NetworkEvent, NodeController, NodeRole, Player};
pub use protocol::auth::Password;
pub use transport::{LocalTransport, TcpTransport, Transport};

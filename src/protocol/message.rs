//! # Wire Messages
//!
//! Every frame is `{id, tag, payload}`: `id` selects the message kind, `tag`
//! correlates a reply with its request, and `payload` is the bincode-encoded
//! message body.
//!
//! ```text
//! HelloRequest ----------------------------->
//!              <----------------------------- HelloResponse (same tag)
//!              <----------------------------- BeginAuthenticationRequest (new tag)
//! BeginAuthenticationResponse (same tag) --->
//!              <----------------------------- EndAuthentication (same tag)
//! ```
//!
//! `PlayersUpdated` and `Stop` are untagged notifications.

use crate::core::serialization::{MultiFormat, SerializationFormat};
use crate::error::{ProtocolError, Result, SessionFailure};
use crate::node::player::Player;
use crate::protocol::tag::Tag;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Highest protocol version this build speaks
pub const PROTOCOL_VERSION: u32 = 1;

/// Oldest protocol version a host still accepts
pub const MIN_PROTOCOL_VERSION: u32 = 1;

/// Message identifiers
pub mod ids {
    pub const HELLO_REQUEST: u16 = 1;
    pub const HELLO_RESPONSE: u16 = 2;
    pub const BEGIN_AUTHENTICATION_REQUEST: u16 = 3;
    pub const BEGIN_AUTHENTICATION_RESPONSE: u16 = 4;
    pub const END_AUTHENTICATION: u16 = 5;
    pub const PLAYERS_UPDATED: u16 = 6;
    pub const STOP: u16 = 7;
}

/// Outer wire structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: u16,
    pub tag: Tag,
    pub payload: Vec<u8>,
}

impl MultiFormat for Frame {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloRequest {
    pub supported_protocol_version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloResponse {
    /// Chosen protocol version, or why none could be chosen
    pub outcome: std::result::Result<u32, SessionFailure>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginAuthenticationRequest {
    pub challenge: Vec<u8>,
    pub salt: Vec<u8>,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeginAuthenticationResponse {
    pub player_name: String,
    pub response: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndAuthentication {
    pub error: Option<SessionFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayersUpdated {
    pub players: Vec<Player>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    pub error: Option<SessionFailure>,
}

// Authentication material is kept out of logs.
impl std::fmt::Debug for BeginAuthenticationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeginAuthenticationRequest")
            .field("challenge_len", &self.challenge.len())
            .field("salt_len", &self.salt.len())
            .finish()
    }
}

impl std::fmt::Debug for BeginAuthenticationResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeginAuthenticationResponse")
            .field("player_name", &self.player_name)
            .field("response_len", &self.response.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    HelloRequest(HelloRequest),
    HelloResponse(HelloResponse),
    BeginAuthenticationRequest(BeginAuthenticationRequest),
    BeginAuthenticationResponse(BeginAuthenticationResponse),
    EndAuthentication(EndAuthentication),
    PlayersUpdated(PlayersUpdated),
    Stop(Stop),
}

impl Message {
    pub fn id(&self) -> u16 {
        match self {
            Message::HelloRequest(_) => ids::HELLO_REQUEST,
            Message::HelloResponse(_) => ids::HELLO_RESPONSE,
            Message::BeginAuthenticationRequest(_) => ids::BEGIN_AUTHENTICATION_REQUEST,
            Message::BeginAuthenticationResponse(_) => ids::BEGIN_AUTHENTICATION_RESPONSE,
            Message::EndAuthentication(_) => ids::END_AUTHENTICATION,
            Message::PlayersUpdated(_) => ids::PLAYERS_UPDATED,
            Message::Stop(_) => ids::STOP,
        }
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Message::HelloRequest(_) => "HelloRequest",
            Message::HelloResponse(_) => "HelloResponse",
            Message::BeginAuthenticationRequest(_) => "BeginAuthenticationRequest",
            Message::BeginAuthenticationResponse(_) => "BeginAuthenticationResponse",
            Message::EndAuthentication(_) => "EndAuthentication",
            Message::PlayersUpdated(_) => "PlayersUpdated",
            Message::Stop(_) => "Stop",
        }
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let body = match self {
            Message::HelloRequest(body) => bincode::serialize(body)?,
            Message::HelloResponse(body) => bincode::serialize(body)?,
            Message::BeginAuthenticationRequest(body) => bincode::serialize(body)?,
            Message::BeginAuthenticationResponse(body) => bincode::serialize(body)?,
            Message::EndAuthentication(body) => bincode::serialize(body)?,
            Message::PlayersUpdated(body) => bincode::serialize(body)?,
            Message::Stop(body) => bincode::serialize(body)?,
        };
        Ok(body)
    }

    fn decode_body(id: u16, payload: &[u8]) -> Result<Self> {
        let message = match id {
            ids::HELLO_REQUEST => Message::HelloRequest(bincode::deserialize(payload)?),
            ids::HELLO_RESPONSE => Message::HelloResponse(bincode::deserialize(payload)?),
            ids::BEGIN_AUTHENTICATION_REQUEST => {
                Message::BeginAuthenticationRequest(bincode::deserialize(payload)?)
            }
            ids::BEGIN_AUTHENTICATION_RESPONSE => {
                Message::BeginAuthenticationResponse(bincode::deserialize(payload)?)
            }
            ids::END_AUTHENTICATION => Message::EndAuthentication(bincode::deserialize(payload)?),
            ids::PLAYERS_UPDATED => Message::PlayersUpdated(bincode::deserialize(payload)?),
            ids::STOP => Message::Stop(bincode::deserialize(payload)?),
            other => return Err(ProtocolError::UnknownMessage(other)),
        };
        Ok(message)
    }
}

/// A message with its correlation tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: Tag,
    pub message: Message,
}

impl Envelope {
    pub fn new(tag: Tag, message: Message) -> Self {
        Self { tag, message }
    }

    pub fn encode(&self) -> Result<Bytes> {
        let frame = Frame {
            id: self.message.id(),
            tag: self.tag,
            payload: self.message.encode_body()?,
        };
        Ok(Bytes::from(frame.serialize_format(SerializationFormat::Bincode)?))
    }

    /// Fails with [`ProtocolError::UnknownMessage`] for ids this build does
    /// not know; callers log and drop such frames.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let frame = Frame::deserialize_format(data, SerializationFormat::Bincode)?;
        let message = Message::decode_body(frame.id, &frame.payload)?;
        Ok(Self {
            tag: frame.tag,
            message,
        })
    }
}

//! # Table Protocol
//!
//! Typed messages, correlation tags, password authentication, and the
//! host/client handshake state machines.
//!
//! ## Components
//! - **Message**: wire frames and message bodies
//! - **Tag**: cyclic request tags in `[1, 1023]`
//! - **Auth**: salted HMAC challenge/response
//! - **Handshake**: Hello and authentication exchange for both roles

pub mod auth;
pub mod handshake;
pub mod message;
pub mod tag;

#[cfg(test)]
mod tests;

pub use handshake::{ClientHandshake, HostHandshake, Outcome, Step};
pub use message::{Envelope, Message, PROTOCOL_VERSION};
pub use tag::{Tag, TagGenerator, NO_TAG};

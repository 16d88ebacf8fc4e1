//! # Connection Services
//!
//! Per-connection tasks spawned by the node controller.
//!
//! - **Peer**: host side, one task per accepted connection
//! - **Client**: the joining side's handshake and session loop
//!
//! Both read frames from a transport [`Connection`](crate::transport::Connection),
//! drive the protocol state machines, and report roster changes back to the
//! controller. Undecodable or unexpected frames are logged and dropped; only
//! a handshake failure, a `Stop` or a closed channel ends a connection.

pub(crate) mod client;
pub(crate) mod peer;

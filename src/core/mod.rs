//! # Core Components
//!
//! Serialization formats shared by mementos and wire frames.
//!
//! ## Formats
//! - **Bincode**: compact binary, used on the wire
//! - **JSON**: human-readable mementos

pub mod serialization;

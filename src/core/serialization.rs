//! # Serialization Formats
//!
//! Abstraction over the serialization formats used for wire frames and
//! engine mementos.
//!
//! ## Formats
//! - **Bincode**: compact binary, the default for frames and mementos
//! - **JSON**: human-readable, for inspecting or hand-editing saved state
//!
//! A one-byte format header can be prefixed so stored data can be decoded
//! without knowing how it was written.
//!
//! ## Usage
//! ```ignore
//! use table_session::core::serialization::{MultiFormat, SerializationFormat};
//!
//! let bytes = memento.serialize_with_header(SerializationFormat::Json)?;
//! let (restored, format) = Memento::deserialize_with_header(&bytes)?;
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Supported serialization formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SerializationFormat {
    /// Binary compact format (default, fastest)
    #[default]
    Bincode,
    /// Human-readable JSON format (debugging, interop)
    Json,
}

impl SerializationFormat {
    /// Get the format identifier byte
    pub fn format_byte(self) -> u8 {
        match self {
            SerializationFormat::Bincode => 0x01,
            SerializationFormat::Json => 0x02,
        }
    }

    /// Detect format from identifier byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(SerializationFormat::Bincode),
            0x02 => Some(SerializationFormat::Json),
            _ => None,
        }
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            SerializationFormat::Bincode => "Bincode",
            SerializationFormat::Json => "JSON",
        }
    }
}

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("{format} serialize error: {reason}")]
    Serialize { format: &'static str, reason: String },

    #[error("{format} deserialize error: {reason}")]
    Deserialize { format: &'static str, reason: String },

    #[error("Empty data")]
    Empty,

    #[error("Unknown format byte: {0}")]
    UnknownFormat(u8),
}

/// Trait for types that support multiple serialization formats
pub trait MultiFormat: Serialize + for<'de> Deserialize<'de> + Sized {
    /// Serialize to bytes using the specified format
    fn serialize_format(&self, format: SerializationFormat) -> Result<Vec<u8>, FormatError> {
        let result = match format {
            SerializationFormat::Bincode => bincode::serialize(self).map_err(|e| e.to_string()),
            SerializationFormat::Json => serde_json::to_vec(self).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| FormatError::Serialize {
            format: format.name(),
            reason,
        })
    }

    /// Serialize to bytes with format header
    fn serialize_with_header(&self, format: SerializationFormat) -> Result<Vec<u8>, FormatError> {
        let mut data = vec![format.format_byte()];
        let mut payload = self.serialize_format(format)?;
        data.append(&mut payload);
        Ok(data)
    }

    /// Deserialize from bytes using the specified format
    fn deserialize_format(data: &[u8], format: SerializationFormat) -> Result<Self, FormatError> {
        let result = match format {
            SerializationFormat::Bincode => bincode::deserialize(data).map_err(|e| e.to_string()),
            SerializationFormat::Json => serde_json::from_slice(data).map_err(|e| e.to_string()),
        };
        result.map_err(|reason| FormatError::Deserialize {
            format: format.name(),
            reason,
        })
    }

    /// Deserialize from bytes with format header
    fn deserialize_with_header(data: &[u8]) -> Result<(Self, SerializationFormat), FormatError> {
        let (&first, rest) = data.split_first().ok_or(FormatError::Empty)?;
        let format = SerializationFormat::from_byte(first).ok_or(FormatError::UnknownFormat(first))?;
        let value = Self::deserialize_format(rest, format)?;
        Ok((value, format))
    }
}

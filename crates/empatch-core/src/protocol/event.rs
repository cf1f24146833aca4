//! HCI event parsing.
//!
//! The uploader only needs Command Complete: every vendor command it sends is
//! answered with one, carrying the echoed opcode and a status byte.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::HCI_EVENT_COMMAND_COMPLETE;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("Event too short: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("Unexpected event code 0x{0:02X}")]
    UnexpectedEvent(u8),
    #[error("Parameter length {declared} does not match {actual} received")]
    LengthMismatch { declared: usize, actual: usize },
}

/// Parsed HCI Command Complete event.
#[derive(Clone, PartialEq, Eq)]
pub struct CommandComplete {
    /// Number of HCI command packets the controller accepts.
    pub num_packets: u8,
    pub opcode: u16,
    /// First return parameter; zero means success.
    pub status: u8,
    /// Return parameters after the status byte.
    pub return_params: Vec<u8>,
}

impl CommandComplete {
    /// Event code + length + packets + opcode + status.
    pub const MIN_LEN: usize = 6;

    /// Parse an event packet (without H4 indicator).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        if bytes.len() < Self::MIN_LEN {
            return Err(EventError::TooShort {
                expected: Self::MIN_LEN,
                actual: bytes.len(),
            });
        }
        if bytes[0] != HCI_EVENT_COMMAND_COMPLETE {
            return Err(EventError::UnexpectedEvent(bytes[0]));
        }
        let declared = bytes[1] as usize;
        if declared != bytes.len() - 2 {
            return Err(EventError::LengthMismatch {
                declared,
                actual: bytes.len() - 2,
            });
        }
        Ok(Self {
            num_packets: bytes[2],
            opcode: LittleEndian::read_u16(&bytes[3..5]),
            status: bytes[5],
            return_params: bytes[6..].to_vec(),
        })
    }

    /// Build the raw event bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MIN_LEN + self.return_params.len());
        buf.push(HCI_EVENT_COMMAND_COMPLETE);
        buf.push((4 + self.return_params.len()) as u8);
        buf.push(self.num_packets);
        buf.extend_from_slice(&self.opcode.to_le_bytes());
        buf.push(self.status);
        buf.extend_from_slice(&self.return_params);
        buf
    }

    pub fn is_success(&self) -> bool {
        self.status == 0
    }
}

impl fmt::Debug for CommandComplete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandComplete(opcode=0x{:04X}, status=0x{:02X})",
            self.opcode, self.status
        )
    }
}

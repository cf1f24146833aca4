//! HCI transport abstraction.
//!
//! The host stack owns the link to the controller. The uploader only needs to
//! push command frames and read back the events they produce.

use crate::protocol::{CommandComplete, EventError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Malformed event: {0}")]
    Event(#[from] EventError),

    #[error("Controller disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// Abstract HCI transport interface.
pub trait HciTransport: Send + Sync {
    /// Send one HCI command packet (opcode, length, parameters).
    fn send_command(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read the next HCI event packet.
    fn read_event(&self) -> Result<Vec<u8>, TransportError>;

    /// Read and parse a Command Complete event.
    fn read_command_complete(&self) -> Result<CommandComplete, TransportError> {
        let bytes = self.read_event()?;
        if bytes.is_empty() {
            return Err(TransportError::ReadFailed("Empty event".into()));
        }
        Ok(CommandComplete::from_bytes(&bytes)?)
    }

    /// Check if the controller is still reachable.
    fn is_connected(&self) -> bool;
}

//! Mock HCI transport for testing and dry runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use byteorder::{ByteOrder, LittleEndian};

use super::traits::{HciTransport, TransportError};
use crate::protocol::CommandComplete;

/// Mock transport capturing sent commands and replaying queued events.
pub struct MockTransport {
    /// Queued events to return on read.
    event_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    /// Captured command frames.
    write_log: Arc<Mutex<Vec<Vec<u8>>>>,
    /// Answer every command with a successful Command Complete.
    auto_ack: bool,
    /// Status to report for a given opcode in auto-ack mode.
    status_overrides: Arc<Mutex<Vec<(u16, u8)>>>,
    connected: Arc<Mutex<bool>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            event_queue: Arc::new(Mutex::new(VecDeque::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            auto_ack: false,
            status_overrides: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(Mutex::new(true)),
        }
    }

    /// Mock that acknowledges every command with status 0.
    pub fn auto_ack() -> Self {
        Self {
            auto_ack: true,
            ..Self::new()
        }
    }

    /// Queue a raw event to be returned on next read.
    pub fn queue_event(&self, event: &[u8]) {
        self.event_queue.lock().unwrap().push_back(event.to_vec());
    }

    /// Queue a Command Complete for `opcode`.
    pub fn queue_command_complete(&self, opcode: u16, status: u8) {
        let cc = CommandComplete {
            num_packets: 1,
            opcode,
            status,
            return_params: Vec::new(),
        };
        self.queue_event(&cc.to_bytes());
    }

    /// In auto-ack mode, answer the first command with `opcode` using `status`.
    pub fn fail_next(&self, opcode: u16, status: u8) {
        self.status_overrides.lock().unwrap().push((opcode, status));
    }

    /// Get all captured command frames.
    pub fn get_writes(&self) -> Vec<Vec<u8>> {
        self.write_log.lock().unwrap().clone()
    }

    /// Opcodes of all captured frames.
    pub fn sent_opcodes(&self) -> Vec<u16> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.len() >= 2)
            .map(|f| LittleEndian::read_u16(&f[0..2]))
            .collect()
    }

    /// Simulate controller disconnect.
    pub fn disconnect(&self) {
        *self.connected.lock().unwrap() = false;
    }

    pub fn reconnect(&self) {
        *self.connected.lock().unwrap() = true;
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HciTransport for MockTransport {
    fn send_command(&self, frame: &[u8]) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        if frame.len() < 3 {
            return Err(TransportError::WriteFailed(format!(
                "Short command frame ({} bytes)",
                frame.len()
            )));
        }
        self.write_log.lock().unwrap().push(frame.to_vec());

        if self.auto_ack {
            let opcode = LittleEndian::read_u16(&frame[0..2]);
            let mut overrides = self.status_overrides.lock().unwrap();
            let status = match overrides.iter().position(|&(op, _)| op == opcode) {
                Some(i) => overrides.remove(i).1,
                None => 0,
            };
            drop(overrides);
            self.queue_command_complete(opcode, status);
        }
        Ok(())
    }

    fn read_event(&self) -> Result<Vec<u8>, TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.event_queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TransportError::Timeout { timeout_ms: 1000 })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }
}

//! Chunked patch upload state machine.
//!
//! The host calls [`UploadSession::next_command`] once per outgoing command
//! opportunity. Each call writes exactly one HCI command into the caller's
//! buffer, or reports that there is nothing left to send.

use std::fmt;

use tracing::{debug, error, info};

use crate::checksum::crc32;
use crate::container::{ContainerError, ContainerHeader};
use crate::protocol::command::{
    CommandError, cpu_reset_command, patch_continue_command, patch_continue_len,
    patch_start_command, patch_start_len,
};
use crate::protocol::constants::{MemoryBank, PATCH_CONTINUE_CHUNK, PATCH_START_CHUNK};

/// Where the upload stands within the current container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadPhase {
    /// Next byte at the cursor is a container header (or the blob end).
    #[default]
    AwaitingContainerStart,
    /// Inside a container whose first segment was already sent.
    ContinuingSegment,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadPhase::AwaitingContainerStart => write!(f, "AWAITING_CONTAINER_START"),
            UploadPhase::ContinuingSegment => write!(f, "CONTINUING_SEGMENT"),
        }
    }
}

/// Outcome of one [`UploadSession::next_command`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextCommand {
    /// A command of this many bytes was written to the buffer.
    Command(usize),
    /// Every container was uploaded and the CPU reset was issued.
    Done,
    /// The blob is malformed; nothing more will be sent.
    Aborted(ContainerError),
}

/// Upload progress through one patch blob.
#[derive(Debug, Clone)]
pub struct UploadSession<'a> {
    blob: &'a [u8],
    cursor: usize,
    container_end: usize,
    sequence: u16,
    phase: UploadPhase,
    reset_sent: bool,
    aborted: Option<ContainerError>,
    bank: MemoryBank,
    containers_started: usize,
    commands_sent: usize,
}

impl<'a> UploadSession<'a> {
    /// Start a session at the beginning of `blob`.
    pub fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            cursor: 0,
            container_end: 0,
            sequence: 1,
            phase: UploadPhase::AwaitingContainerStart,
            reset_sent: false,
            aborted: None,
            bank: MemoryBank::default(),
            containers_started: 0,
            commands_sent: 0,
        }
    }

    /// Rewind to the start of the blob. There is no resume; a restart
    /// uploads everything again.
    pub fn reset(&mut self) {
        *self = Self::new(self.blob);
    }

    /// Produce the next command into `buf`.
    ///
    /// A buffer too short for the command about to be produced is rejected
    /// before anything is written and without changing the session.
    pub fn next_command(&mut self, buf: &mut [u8]) -> Result<NextCommand, CommandError> {
        debug!(
            pos = self.cursor,
            container_end = self.container_end,
            blob_size = self.blob.len(),
            phase = %self.phase,
            "Next patch command"
        );

        if let Some(reason) = self.aborted {
            return Ok(NextCommand::Aborted(reason));
        }

        if self.cursor >= self.blob.len() {
            if self.reset_sent {
                return Ok(NextCommand::Done);
            }
            let len = cpu_reset_command(buf)?;
            self.reset_sent = true;
            self.commands_sent += 1;
            info!(
                containers = self.containers_started,
                "Patch upload complete, sending CPU reset"
            );
            return Ok(NextCommand::Command(len));
        }

        match self.phase {
            UploadPhase::AwaitingContainerStart => self.start_container(buf),
            UploadPhase::ContinuingSegment => self.continue_container(buf),
        }
    }

    fn start_container(&mut self, buf: &mut [u8]) -> Result<NextCommand, CommandError> {
        let header = match ContainerHeader::parse(self.blob, self.cursor) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "Malformed patch container, aborting upload");
                self.aborted = Some(e);
                return Ok(NextCommand::Aborted(e));
            }
        };

        let n = PATCH_START_CHUNK.min(header.end() - self.cursor);
        let expected = patch_start_len(n);
        if buf.len() < expected {
            return Err(CommandError::BufferTooSmall {
                expected,
                actual: buf.len(),
            });
        }

        let segment = &self.blob[self.cursor..self.cursor + n];
        let crc = crc32(segment);
        let len = patch_start_command(buf, self.bank, crc, segment)?;

        info!(
            index = self.containers_started,
            offset = header.offset,
            length = header.length,
            "Starting patch container"
        );
        self.container_end = header.end();
        self.sequence = 1;
        self.containers_started += 1;
        self.commands_sent += 1;
        self.cursor += n;
        if self.cursor < self.container_end {
            self.phase = UploadPhase::ContinuingSegment;
        }
        Ok(NextCommand::Command(len))
    }

    fn continue_container(&mut self, buf: &mut [u8]) -> Result<NextCommand, CommandError> {
        let n = PATCH_CONTINUE_CHUNK.min(self.container_end - self.cursor);
        let expected = patch_continue_len(n);
        if buf.len() < expected {
            return Err(CommandError::BufferTooSmall {
                expected,
                actual: buf.len(),
            });
        }

        let segment = &self.blob[self.cursor..self.cursor + n];
        let crc = crc32(segment);
        let len = patch_continue_command(buf, self.sequence, crc, segment)?;

        self.sequence = self.sequence.wrapping_add(1);
        self.commands_sent += 1;
        self.cursor += n;
        if self.cursor >= self.container_end {
            debug!(end = self.container_end, "Container done, maybe another one");
            self.phase = UploadPhase::AwaitingContainerStart;
        }
        Ok(NextCommand::Command(len))
    }

    /// Byte offset of the next byte to upload.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn phase(&self) -> UploadPhase {
        self.phase
    }

    /// Sequence number the next continue segment will carry.
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn reset_sent(&self) -> bool {
        self.reset_sent
    }

    pub fn abort_reason(&self) -> Option<ContainerError> {
        self.aborted
    }

    /// Containers whose start segment has been produced.
    pub fn containers_started(&self) -> usize {
        self.containers_started
    }

    /// Commands produced so far, CPU reset included.
    pub fn commands_sent(&self) -> usize {
        self.commands_sent
    }
}

//! Patch container scanning.
//!
//! A patch blob is one or more containers laid back to back. Each container
//! starts with an 8-byte header:
//!
//! | Offset | Size | Field                                  |
//! |--------|------|----------------------------------------|
//! | 0      | 4    | Magic `0x656D3933` (LE, "39me")        |
//! | 4      | 4    | Length in bytes, header included (LE)  |
//!
//! The whole container, header included, is what gets uploaded.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use crate::protocol::constants::{
    CONTAINER_HEADER_LEN, CONTAINER_MAGIC, PATCH_CONTINUE_CHUNK, PATCH_START_CHUNK,
};

/// Reasons a container cannot be uploaded.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerError {
    #[error("Expected magic 0x{expected:08X} at offset {offset} but got 0x{found:08X}")]
    BadMagic {
        offset: usize,
        expected: u32,
        found: u32,
    },
    #[error("Truncated header at offset {offset}: {remaining} bytes left")]
    TruncatedHeader { offset: usize, remaining: usize },
    #[error("Container at offset {offset} declares length {declared}, below header size")]
    InvalidLength { offset: usize, declared: u32 },
    #[error("Container at offset {offset} ends at {end}, past blob end {blob_len}")]
    Overrun {
        offset: usize,
        end: usize,
        blob_len: usize,
    },
}

/// A validated container header located in a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Offset of the header within the blob.
    pub offset: usize,
    /// Declared length, header included.
    pub length: u32,
}

impl ContainerHeader {
    /// Parse and validate the container header at `offset`.
    pub fn parse(blob: &[u8], offset: usize) -> Result<Self, ContainerError> {
        let remaining = blob.len().saturating_sub(offset);
        if remaining < CONTAINER_HEADER_LEN {
            return Err(ContainerError::TruncatedHeader { offset, remaining });
        }

        let magic = LittleEndian::read_u32(&blob[offset..offset + 4]);
        if magic != CONTAINER_MAGIC {
            return Err(ContainerError::BadMagic {
                offset,
                expected: CONTAINER_MAGIC,
                found: magic,
            });
        }

        let length = LittleEndian::read_u32(&blob[offset + 4..offset + 8]);
        if (length as usize) < CONTAINER_HEADER_LEN {
            return Err(ContainerError::InvalidLength {
                offset,
                declared: length,
            });
        }

        let end = offset
            .checked_add(length as usize)
            .filter(|&end| end <= blob.len())
            .ok_or(ContainerError::Overrun {
                offset,
                end: offset.saturating_add(length as usize),
                blob_len: blob.len(),
            })?;
        debug_assert!(end > offset);

        Ok(Self { offset, length })
    }

    /// One past the last byte of the container.
    pub fn end(&self) -> usize {
        self.offset + self.length as usize
    }

    /// Payload size without the header.
    pub fn payload_len(&self) -> usize {
        self.length as usize - CONTAINER_HEADER_LEN
    }

    /// Number of patch commands (one start, N continues) needed to upload it.
    pub fn segment_count(&self) -> usize {
        let rest = (self.length as usize).saturating_sub(PATCH_START_CHUNK);
        1 + rest.div_ceil(PATCH_CONTINUE_CHUNK)
    }
}

/// Iterator over the containers of a blob. Stops after the first error.
#[derive(Debug)]
pub struct Containers<'a> {
    blob: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Containers<'a> {
    pub fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for Containers<'_> {
    type Item = Result<ContainerHeader, ContainerError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.blob.len() {
            return None;
        }
        match ContainerHeader::parse(self.blob, self.offset) {
            Ok(header) => {
                self.offset = header.end();
                Some(Ok(header))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Validate every container of a blob.
pub fn scan(blob: &[u8]) -> Result<Vec<ContainerHeader>, ContainerError> {
    Containers::new(blob).collect()
}

/// Build a container with a correct header around `payload`.
#[cfg(test)]
pub(crate) fn build_container(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(CONTAINER_HEADER_LEN + payload.len());
    out.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
    out.extend_from_slice(&((CONTAINER_HEADER_LEN + payload.len()) as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

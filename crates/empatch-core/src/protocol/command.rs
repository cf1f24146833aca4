//! HCI command frame encoders.
//!
//! Every frame starts with a little-endian opcode and a one-byte parameter
//! length. Encoders write into a caller-provided buffer and return the number
//! of bytes written; a buffer that cannot hold the frame is rejected before
//! anything is written.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::warn;

use super::constants::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Segment of {len} bytes exceeds maximum of {max}")]
    SegmentTooLarge { len: usize, max: usize },
    #[error("Baud rate {0} not found in table")]
    UnsupportedBaudRate(u32),
    #[error("Invalid BD address: {0}")]
    InvalidBdAddr(String),
}

/// Bluetooth device address, stored in display order (most significant first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdAddr(pub [u8; 6]);

impl BdAddr {
    pub const LEN: usize = 6;

    /// Address bytes in HCI wire order (least significant first).
    pub fn to_wire(&self) -> [u8; 6] {
        let mut out = self.0;
        out.reverse();
        out
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

impl FromStr for BdAddr {
    type Err = CommandError;

    /// Accepts `AA:BB:CC:DD:EE:FF` or `AA-BB-CC-DD-EE-FF`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split([':', '-']).collect();
        if parts.len() != Self::LEN {
            return Err(CommandError::InvalidBdAddr(s.to_string()));
        }
        let mut addr = [0u8; 6];
        for (slot, part) in addr.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(CommandError::InvalidBdAddr(s.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| CommandError::InvalidBdAddr(s.to_string()))?;
        }
        Ok(Self(addr))
    }
}

fn ensure_capacity(buf: &[u8], expected: usize) -> Result<(), CommandError> {
    if buf.len() < expected {
        return Err(CommandError::BufferTooSmall {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn write_header(buf: &mut [u8], opcode: u16, param_len: usize) {
    LittleEndian::write_u16(&mut buf[0..2], opcode);
    buf[2] = param_len as u8;
}

/// Frame length of a Write Patch Start carrying `data_len` raw bytes.
pub const fn patch_start_len(data_len: usize) -> usize {
    HCI_COMMAND_HEADER_LEN + PATCH_START_OVERHEAD + data_len
}

/// Frame length of a Write Patch Continue carrying `data_len` raw bytes.
pub const fn patch_continue_len(data_len: usize) -> usize {
    HCI_COMMAND_HEADER_LEN + PATCH_CONTINUE_OVERHEAD + data_len
}

/// Write Patch Start: `bank | crc32 | data`.
pub fn patch_start_command(
    buf: &mut [u8],
    bank: MemoryBank,
    crc: u32,
    data: &[u8],
) -> Result<usize, CommandError> {
    if data.len() > PATCH_START_CHUNK {
        return Err(CommandError::SegmentTooLarge {
            len: data.len(),
            max: PATCH_START_CHUNK,
        });
    }
    let len = patch_start_len(data.len());
    ensure_capacity(buf, len)?;

    write_header(buf, HCI_OPCODE_EM_WRITE_PATCH_START, PATCH_START_OVERHEAD + data.len());
    buf[3] = bank as u8;
    LittleEndian::write_u32(&mut buf[4..8], crc);
    buf[8..len].copy_from_slice(data);
    Ok(len)
}

/// Write Patch Continue: `sequence | crc32 | data`.
pub fn patch_continue_command(
    buf: &mut [u8],
    sequence: u16,
    crc: u32,
    data: &[u8],
) -> Result<usize, CommandError> {
    if data.len() > PATCH_CONTINUE_CHUNK {
        return Err(CommandError::SegmentTooLarge {
            len: data.len(),
            max: PATCH_CONTINUE_CHUNK,
        });
    }
    let len = patch_continue_len(data.len());
    ensure_capacity(buf, len)?;

    write_header(
        buf,
        HCI_OPCODE_EM_WRITE_PATCH_CONTINUE,
        PATCH_CONTINUE_OVERHEAD + data.len(),
    );
    LittleEndian::write_u16(&mut buf[3..5], sequence);
    LittleEndian::write_u32(&mut buf[5..9], crc);
    buf[9..len].copy_from_slice(data);
    Ok(len)
}

/// CPU Reset, no parameters.
pub fn cpu_reset_command(buf: &mut [u8]) -> Result<usize, CommandError> {
    ensure_capacity(buf, HCI_COMMAND_HEADER_LEN)?;
    write_header(buf, HCI_OPCODE_EM_CPU_RESET, 0);
    Ok(HCI_COMMAND_HEADER_LEN)
}

/// Write Patch Abort, no parameters.
pub fn patch_abort_command(buf: &mut [u8]) -> Result<usize, CommandError> {
    ensure_capacity(buf, HCI_COMMAND_HEADER_LEN)?;
    write_header(buf, HCI_OPCODE_EM_WRITE_PATCH_ABORT, 0);
    Ok(HCI_COMMAND_HEADER_LEN)
}

/// Set BD Address. The address goes out in wire order.
pub fn bd_addr_command(addr: &BdAddr, buf: &mut [u8]) -> Result<usize, CommandError> {
    let len = HCI_COMMAND_HEADER_LEN + BdAddr::LEN;
    ensure_capacity(buf, len)?;
    write_header(buf, HCI_OPCODE_EM_SET_BD_ADDR, BdAddr::LEN);
    buf[3..len].copy_from_slice(&addr.to_wire());
    Ok(len)
}

/// Index of `rate` in [`BAUD_RATES`]. Reserved zero slots never match.
pub fn baud_rate_index(rate: u32) -> Option<u8> {
    if rate == 0 {
        return None;
    }
    BAUD_RATES
        .iter()
        .position(|&r| r == rate)
        .map(|i| i as u8)
}

/// Set UART Baud Rate. Unsupported rates leave the buffer untouched.
pub fn baud_rate_command(rate: u32, buf: &mut [u8]) -> Result<usize, CommandError> {
    let Some(index) = baud_rate_index(rate) else {
        warn!(rate, "Baud rate not found in table");
        return Err(CommandError::UnsupportedBaudRate(rate));
    };
    let len = HCI_COMMAND_HEADER_LEN + 1;
    ensure_capacity(buf, len)?;
    write_header(buf, HCI_OPCODE_EM_SET_UART_BAUD_RATE, 1);
    buf[3] = index;
    Ok(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patch_start_layout() {
        let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
        let len = patch_start_command(&mut buf, MemoryBank::Iram1, 0xDEADBEEF, b"abc").unwrap();
        assert_eq!(len, 11);
        assert_eq!(
            &buf[..len],
            &[0x27, 0xFC, 8, 0x00, 0xEF, 0xBE, 0xAD, 0xDE, b'a', b'b', b'c']
        );
    }

    #[test]
    fn test_patch_continue_layout() {
        let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
        let len = patch_continue_command(&mut buf, 0x0102, 0x11223344, &[0xAA; 2]).unwrap();
        assert_eq!(len, 11);
        assert_eq!(
            &buf[..len],
            &[0x28, 0xFC, 8, 0x02, 0x01, 0x44, 0x33, 0x22, 0x11, 0xAA, 0xAA]
        );
    }

    #[test]
    fn test_segment_too_large() {
        let mut buf = [0u8; 128];
        let data = [0u8; PATCH_CONTINUE_CHUNK + 1];
        assert_eq!(
            patch_continue_command(&mut buf, 1, 0, &data),
            Err(CommandError::SegmentTooLarge {
                len: 59,
                max: PATCH_CONTINUE_CHUNK
            })
        );
        assert!(patch_start_command(&mut buf, MemoryBank::Iram1, 0, &data).is_ok());
    }

    #[test]
    fn test_buffer_too_small_leaves_buffer() {
        let mut buf = [0x55u8; 10];
        let err = patch_start_command(&mut buf, MemoryBank::Iram1, 0, &[1; 3]).unwrap_err();
        assert_eq!(
            err,
            CommandError::BufferTooSmall {
                expected: 11,
                actual: 10
            }
        );
        assert_eq!(buf, [0x55u8; 10]);
    }

    #[test]
    fn test_reset_and_abort() {
        let mut buf = [0u8; 3];
        assert_eq!(cpu_reset_command(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x32, 0xFC, 0x00]);
        assert_eq!(patch_abort_command(&mut buf).unwrap(), 3);
        assert_eq!(buf, [0x29, 0xFC, 0x00]);
        assert!(cpu_reset_command(&mut [0u8; 2]).is_err());
    }

    #[test]
    fn test_bd_addr_reversed() {
        let addr: BdAddr = "00:1B:DC:07:32:F1".parse().unwrap();
        let mut buf = [0u8; 16];
        let len = bd_addr_command(&addr, &mut buf).unwrap();
        assert_eq!(len, 9);
        assert_eq!(
            &buf[..len],
            &[0x02, 0xFC, 0x06, 0xF1, 0x32, 0x07, 0xDC, 0x1B, 0x00]
        );
        assert_eq!(addr.to_string(), "00:1B:DC:07:32:F1");
    }

    #[test]
    fn test_bd_addr_parse_errors() {
        assert!("00:11:22:33:44".parse::<BdAddr>().is_err());
        assert!("00:11:22:33:44:GG".parse::<BdAddr>().is_err());
        assert!("000:11:22:33:44:55".parse::<BdAddr>().is_err());
        assert_eq!(
            "aa-bb-cc-dd-ee-ff".parse::<BdAddr>().unwrap(),
            BdAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
        );
    }

    #[test]
    fn test_baud_rate_table() {
        for (index, &rate) in BAUD_RATES.iter().enumerate() {
            if rate == 0 {
                continue;
            }
            let mut buf = [0u8; 8];
            let len = baud_rate_command(rate, &mut buf).unwrap();
            assert_eq!(len, 4);
            assert_eq!(&buf[..2], &[0x07, 0xFC]);
            assert_eq!(buf[2], 1);
            assert_eq!(buf[3] as usize, index);
        }
    }

    #[test]
    fn test_unsupported_baud_rate() {
        for rate in [0, 1, 4800, 115_201, 3_000_000] {
            let mut buf = [0xEEu8; 8];
            assert_eq!(
                baud_rate_command(rate, &mut buf),
                Err(CommandError::UnsupportedBaudRate(rate))
            );
            assert_eq!(buf, [0xEEu8; 8]);
        }
        assert_eq!(baud_rate_index(9_600), Some(3));
    }
}

//! CRC-32 over patch segments.
//!
//! Standard reflected CRC-32 (polynomial 0xEDB88320), processed one nibble at
//! a time against a 16-entry table. The result is identical to the usual
//! 256-entry implementation.

static CRC32_TABLE: [u32; 16] = [
    0x00000000, 0x1DB71064, 0x3B6E20C8, 0x26D930AC, 0x76DC4190, 0x6B6B51F4, 0x4DB26158,
    0x5005713C, 0xEDB88320, 0xF00F9344, 0xD6D6A3E8, 0xCB61B38C, 0x9B64C2B0, 0x86D3D2D4,
    0xA00AE278, 0xBDBDF21C,
];

/// Incremental CRC-32.
#[derive(Debug, Clone, Copy)]
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    pub const fn new() -> Self {
        Self { state: 0xFFFF_FFFF }
    }

    pub fn update(&mut self, bytes: &[u8]) -> &mut Self {
        for &b in bytes {
            self.state = (self.state >> 4) ^ CRC32_TABLE[((self.state ^ b as u32) & 0x0F) as usize];
            self.state =
                (self.state >> 4) ^ CRC32_TABLE[((self.state ^ (b >> 4) as u32) & 0x0F) as usize];
        }
        self
    }

    pub fn finalize(&self) -> u32 {
        !self.state
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot CRC-32 of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    Crc32::new().update(bytes).finalize()
}

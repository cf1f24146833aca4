//! Protocol constants for the EM Microelectronic EM9301/EM9304 vendor commands.

// ============================================================================
// HCI framing
// ============================================================================

/// Vendor-specific Opcode Group Field.
pub const OGF_VENDOR: u16 = 0x3F;

/// Build an HCI opcode from its group and command fields.
#[inline]
pub const fn opcode(ogf: u16, ocf: u16) -> u16 {
    ocf | (ogf << 10)
}

/// Opcode (2 bytes) + parameter length (1 byte).
pub const HCI_COMMAND_HEADER_LEN: usize = 3;

/// H4 packet indicator for an HCI command.
pub const H4_COMMAND_INDICATOR: u8 = 0x01;

/// HCI Command Complete event code.
pub const HCI_EVENT_COMMAND_COMPLETE: u8 = 0x0E;

// ============================================================================
// Vendor Opcodes
// ============================================================================

/// Set public BD address.
pub const HCI_OPCODE_EM_SET_BD_ADDR: u16 = opcode(OGF_VENDOR, 0x02);

/// Set UART baud rate (by table index).
pub const HCI_OPCODE_EM_SET_UART_BAUD_RATE: u16 = opcode(OGF_VENDOR, 0x07);

/// First segment of a patch container.
pub const HCI_OPCODE_EM_WRITE_PATCH_START: u16 = 0xFC27;

/// Follow-up segment of a patch container.
pub const HCI_OPCODE_EM_WRITE_PATCH_CONTINUE: u16 = 0xFC28;

/// Drop a partially written patch container.
pub const HCI_OPCODE_EM_WRITE_PATCH_ABORT: u16 = 0xFC29;

/// Restart the chipset CPU so the uploaded patches take effect.
pub const HCI_OPCODE_EM_CPU_RESET: u16 = 0xFC32;

// ============================================================================
// Patch Containers
// ============================================================================

/// Container tag, read little-endian from the first 4 bytes ("39me" on disk).
pub const CONTAINER_MAGIC: u32 = 0x656D_3933;

/// Magic (4 bytes) + length (4 bytes).
pub const CONTAINER_HEADER_LEN: usize = 8;

/// Raw bytes carried by a Write Patch Start command.
pub const PATCH_START_CHUNK: usize = 59;

/// Raw bytes carried by a Write Patch Continue command.
pub const PATCH_CONTINUE_CHUNK: usize = 58;

/// Bank + CRC.
pub const PATCH_START_OVERHEAD: usize = 5;

/// Sequence number + CRC.
pub const PATCH_CONTINUE_OVERHEAD: usize = 6;

/// Largest frame the upload engine ever produces (start and continue are equal).
pub const MAX_PATCH_COMMAND_LEN: usize =
    HCI_COMMAND_HEADER_LEN + PATCH_START_OVERHEAD + PATCH_START_CHUNK;

/// Target memory for Write Patch Start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MemoryBank {
    /// Instruction RAM 1, the only bank the loader writes to.
    #[default]
    Iram1 = 0x00,
}

// ============================================================================
// UART
// ============================================================================

/// Supported baud rates, indexed by the value sent in Set UART Baud Rate.
/// Zero entries are reserved slots.
pub static BAUD_RATES: [u32; 15] = [
    0, 0, 0, 9_600, 14_400, 19_200, 28_800, 38_400, 57_600, 76_800, 115_200, 230_400, 460_800,
    921_600, 1_843_200,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_opcodes() {
        assert_eq!(HCI_OPCODE_EM_SET_BD_ADDR, 0xFC02);
        assert_eq!(HCI_OPCODE_EM_SET_UART_BAUD_RATE, 0xFC07);
        assert_eq!(MAX_PATCH_COMMAND_LEN, 67);
        assert_eq!(
            HCI_COMMAND_HEADER_LEN + PATCH_CONTINUE_OVERHEAD + PATCH_CONTINUE_CHUNK,
            MAX_PATCH_COMMAND_LEN
        );
    }

    #[test]
    fn test_magic_bytes() {
        assert_eq!(&CONTAINER_MAGIC.to_le_bytes(), b"39me");
    }
}

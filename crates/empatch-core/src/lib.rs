//! empatch-core: EM9301/EM9304 firmware patch upload in Rust.
//!
//! Uploads a patch container blob to an EM Microelectronic Bluetooth
//! controller through its vendor HCI commands, one bounded segment per
//! command, each carrying a CRC-32 of its bytes.
//!
//! # Architecture
//!
//! - **Protocol**: Opcodes, command encoders, Command Complete parsing
//! - **Checksum**: Nibble-table CRC-32
//! - **Container**: Patch container header validation and scanning
//! - **State**: The upload state machine ([`UploadSession`])
//! - **Transport**: HCI transport abstraction (plus a mock)
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level uploader ([`PatchUploader`])
//!
//! # Example
//!
//! ```no_run
//! use empatch_core::{MAX_PATCH_COMMAND_LEN, NextCommand, UploadSession};
//!
//! let blob = std::fs::read("patch.bin").unwrap();
//! let mut session = UploadSession::new(&blob);
//! let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
//! while let NextCommand::Command(len) = session.next_command(&mut buf).unwrap() {
//!     println!("{:02X?}", &buf[..len]);
//! }
//! ```

pub mod checksum;
pub mod container;
pub mod events;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use checksum::{Crc32, crc32};
pub use container::{ContainerError, ContainerHeader, Containers};
pub use events::{
    LogLevel, NullObserver, TracingObserver, UploadEvent, UploadObserver, UploadStage,
};
pub use protocol::{
    BdAddr, CommandComplete, CommandError, MAX_PATCH_COMMAND_LEN, baud_rate_command,
    bd_addr_command,
};
pub use session::{PatchUploader, UploadConfig, UploadReport};
pub use state::{NextCommand, UploadPhase, UploadSession};
pub use transport::{HciTransport, MockTransport, TransportError};

//! Protocol module - EM93xx vendor HCI command definitions.

pub mod command;
pub mod constants;
pub mod event;

pub use command::{
    BdAddr, CommandError, baud_rate_command, bd_addr_command, cpu_reset_command,
    patch_abort_command, patch_continue_command, patch_start_command,
};
pub use constants::*;
pub use event::{CommandComplete, EventError};

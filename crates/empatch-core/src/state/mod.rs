//! State machine module.

pub mod machine;

pub use machine::{NextCommand, UploadPhase, UploadSession};

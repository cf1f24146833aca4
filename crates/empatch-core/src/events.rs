//! Event system for UI decoupling.
//!
//! Lets the CLI (or any other front end) follow an upload without being tied
//! to the driver.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Upload phases as seen by a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStage {
    /// Reconfiguring the UART baud rate.
    BaudRate,
    /// Sending patch segments.
    PatchUpload,
    /// CPU reset issued.
    CpuReset,
    /// Setting the public BD address.
    BdAddr,
    /// All operations complete.
    Complete,
    /// Error state.
    Error,
}

impl fmt::Display for UploadStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadStage::BaudRate => write!(f, "Baud Rate"),
            UploadStage::PatchUpload => write!(f, "Patch Upload"),
            UploadStage::CpuReset => write!(f, "CPU Reset"),
            UploadStage::BdAddr => write!(f, "BD Address"),
            UploadStage::Complete => write!(f, "Complete"),
            UploadStage::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the uploader.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Stage changed.
    StageChanged { from: UploadStage, to: UploadStage },
    /// A container's start segment was sent.
    ContainerStarted { index: usize, offset: usize },
    /// Progress through the blob.
    Progress { current: u64, total: u64 },
    /// Command sent to the controller.
    CommandSent { opcode: u16, length: usize },
    /// Command Complete received.
    CommandComplete { opcode: u16, status: u8 },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Error occurred.
    Error { message: String },
    /// All operations completed successfully.
    Complete,
}

/// Observer trait for receiving upload events.
pub trait UploadObserver: Send + Sync {
    fn on_event(&self, event: &UploadEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl UploadObserver for NullObserver {
    fn on_event(&self, _event: &UploadEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl UploadObserver for TracingObserver {
    fn on_event(&self, event: &UploadEvent) {
        match event {
            UploadEvent::StageChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Stage changed");
            }
            UploadEvent::ContainerStarted { index, offset } => {
                tracing::info!(index, offset, "Container started");
            }
            UploadEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(progress = %format!("{}%", pct), current, total, "Progress");
            }
            UploadEvent::CommandSent { opcode, length } => {
                tracing::trace!(opcode = %format!("{:04X}", opcode), len = length, "HCI command");
            }
            UploadEvent::CommandComplete { opcode, status } => {
                tracing::trace!(opcode = %format!("{:04X}", opcode), status, "Command complete");
            }
            UploadEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            UploadEvent::Error { message } => {
                tracing::error!("Error: {}", message);
            }
            UploadEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}

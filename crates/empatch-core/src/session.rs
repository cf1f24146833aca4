//! Patch uploader - drives an upload session through an HCI transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow, bail};
use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::events::{
    LogLevel, NullObserver, TracingObserver, UploadEvent, UploadObserver, UploadStage,
};
use crate::protocol::command::{
    BdAddr, CommandError, baud_rate_command, bd_addr_command, patch_abort_command,
};
use crate::protocol::constants::*;
use crate::protocol::event::CommandComplete;
use crate::state::machine::{NextCommand, UploadSession};
use crate::transport::HciTransport;

/// Configuration for a patch upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Path to the patch container blob.
    pub patch_path: Option<PathBuf>,
    /// UART baud rate to switch to before uploading.
    pub baud_rate: Option<u32>,
    /// Public BD address to set after the CPU reset (`AA:BB:CC:DD:EE:FF`).
    pub bd_addr: Option<String>,
    /// Wait for a Command Complete after every command.
    pub wait_for_complete: bool,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            patch_path: None,
            baud_rate: None,
            bd_addr: None,
            wait_for_complete: true,
        }
    }
}

impl UploadConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: UploadConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Summary of a finished upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    /// Containers uploaded.
    pub containers: usize,
    /// Patch commands sent, CPU reset included.
    pub commands: usize,
    /// Blob bytes uploaded.
    pub bytes: usize,
    /// Whether the baud rate command was sent.
    pub baud_rate_set: bool,
    /// Whether the BD address command was sent.
    pub bd_addr_set: bool,
}

/// Orchestrates baud rate, patch upload, CPU reset and BD address.
pub struct PatchUploader<O: UploadObserver> {
    config: UploadConfig,
    observer: Arc<O>,
}

impl PatchUploader<TracingObserver> {
    /// Create an uploader with the default tracing observer.
    pub fn new(config: UploadConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl PatchUploader<NullObserver> {
    /// Create an uploader that emits no events.
    pub fn silent(config: UploadConfig) -> Self {
        Self::with_observer(config, Arc::new(NullObserver))
    }
}

impl<O: UploadObserver> PatchUploader<O> {
    /// Create an uploader with a custom observer.
    pub fn with_observer(config: UploadConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    /// Read the blob named by `patch_path`.
    pub fn load_blob(&self) -> Result<Vec<u8>> {
        let path = self
            .config
            .patch_path
            .as_deref()
            .ok_or_else(|| anyhow!("No patch path configured"))?;
        info!(path = %path.display(), "Loading patch blob");
        Ok(std::fs::read(path)?)
    }

    /// Run the complete upload against `transport`.
    #[instrument(skip(self, transport, blob), fields(blob_len = blob.len()))]
    pub fn run<T: HciTransport>(&self, transport: &T, blob: &[u8]) -> Result<UploadReport> {
        let bd_addr = self
            .config
            .bd_addr
            .as_deref()
            .map(str::parse::<BdAddr>)
            .transpose()?;

        let mut report = UploadReport::default();
        let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
        let mut stage = if self.config.baud_rate.is_some() {
            UploadStage::BaudRate
        } else {
            UploadStage::PatchUpload
        };

        if let Some(rate) = self.config.baud_rate {
            match baud_rate_command(rate, &mut buf) {
                Ok(len) => {
                    self.exchange_checked(transport, &buf[..len], &mut stage)?;
                    info!(rate, "UART baud rate set");
                    report.baud_rate_set = true;
                }
                Err(CommandError::UnsupportedBaudRate(_)) => {
                    self.log(
                        LogLevel::Warn,
                        format!("Baud rate {} unsupported, keeping current rate", rate),
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.advance(&mut stage, UploadStage::PatchUpload);
        self.upload_patch(transport, blob, &mut stage, &mut report)?;

        if let Some(addr) = bd_addr {
            self.advance(&mut stage, UploadStage::BdAddr);
            let len = bd_addr_command(&addr, &mut buf)?;
            self.exchange_checked(transport, &buf[..len], &mut stage)?;
            info!(addr = %addr, "BD address set");
            report.bd_addr_set = true;
        }

        self.advance(&mut stage, UploadStage::Complete);
        self.emit(UploadEvent::Complete);
        Ok(report)
    }

    fn upload_patch<T: HciTransport>(
        &self,
        transport: &T,
        blob: &[u8],
        stage: &mut UploadStage,
        report: &mut UploadReport,
    ) -> Result<()> {
        let mut session = UploadSession::new(blob);
        let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
        let total = blob.len() as u64;

        loop {
            let offset = session.cursor();
            let started = session.containers_started();

            match session.next_command(&mut buf)? {
                NextCommand::Command(len) => {
                    let frame = &buf[..len];
                    let opcode = LittleEndian::read_u16(&frame[0..2]);

                    if session.containers_started() > started {
                        self.emit(UploadEvent::ContainerStarted {
                            index: started,
                            offset,
                        });
                    }
                    if opcode == HCI_OPCODE_EM_CPU_RESET {
                        self.advance(stage, UploadStage::CpuReset);
                    }

                    if let Some(cc) = self.exchange(transport, frame)?
                        && !cc.is_success()
                    {
                        if opcode != HCI_OPCODE_EM_CPU_RESET {
                            self.abort_patch(transport);
                        }
                        return Err(self.fail(
                            stage,
                            format!(
                                "Controller rejected 0x{:04X} at offset {} with status 0x{:02X}",
                                opcode, offset, cc.status
                            ),
                        ));
                    }

                    self.emit(UploadEvent::Progress {
                        current: session.cursor() as u64,
                        total,
                    });
                }
                NextCommand::Done => break,
                NextCommand::Aborted(reason) => {
                    return Err(self.fail(stage, format!("Malformed patch blob: {}", reason)));
                }
            }
        }

        report.containers = session.containers_started();
        report.commands = session.commands_sent();
        report.bytes = session.cursor();
        info!(
            containers = report.containers,
            commands = report.commands,
            bytes = report.bytes,
            "Patch upload finished"
        );
        Ok(())
    }

    /// Tell the controller to drop the container being written.
    fn abort_patch<T: HciTransport>(&self, transport: &T) {
        let mut buf = [0u8; HCI_COMMAND_HEADER_LEN];
        let result = patch_abort_command(&mut buf)
            .map_err(anyhow::Error::from)
            .and_then(|len| self.exchange(transport, &buf[..len]));
        if let Err(e) = result {
            warn!(error = %e, "Write Patch Abort failed");
        }
    }

    /// Send a command and, if configured, wait for its Command Complete.
    fn exchange<T: HciTransport>(
        &self,
        transport: &T,
        frame: &[u8],
    ) -> Result<Option<CommandComplete>> {
        let opcode = LittleEndian::read_u16(&frame[0..2]);
        transport.send_command(frame)?;
        self.emit(UploadEvent::CommandSent {
            opcode,
            length: frame.len(),
        });

        if !self.config.wait_for_complete {
            return Ok(None);
        }

        let cc = transport.read_command_complete()?;
        self.emit(UploadEvent::CommandComplete {
            opcode: cc.opcode,
            status: cc.status,
        });
        if cc.opcode != opcode {
            bail!(
                "Command Complete for 0x{:04X} while waiting for 0x{:04X}",
                cc.opcode,
                opcode
            );
        }
        Ok(Some(cc))
    }

    fn exchange_checked<T: HciTransport>(
        &self,
        transport: &T,
        frame: &[u8],
        stage: &mut UploadStage,
    ) -> Result<()> {
        if let Some(cc) = self.exchange(transport, frame)?
            && !cc.is_success()
        {
            return Err(self.fail(
                stage,
                format!(
                    "Controller rejected 0x{:04X} with status 0x{:02X}",
                    cc.opcode, cc.status
                ),
            ));
        }
        Ok(())
    }

    fn fail(&self, stage: &mut UploadStage, message: String) -> anyhow::Error {
        self.advance(stage, UploadStage::Error);
        self.emit(UploadEvent::Error {
            message: message.clone(),
        });
        anyhow!(message)
    }

    /// Move to `to`, emitting a change event unless already there.
    fn advance(&self, stage: &mut UploadStage, to: UploadStage) {
        if *stage == to {
            return;
        }
        self.emit(UploadEvent::StageChanged { from: *stage, to });
        *stage = to;
    }

    fn emit(&self, event: UploadEvent) {
        self.observer.on_event(&event);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.emit(UploadEvent::Log {
            level,
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::build_container;
    use crate::transport::MockTransport;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<UploadEvent>>,
    }

    impl UploadObserver for RecordingObserver {
        fn on_event(&self, event: &UploadEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    impl RecordingObserver {
        fn stage_changes(&self) -> Vec<(UploadStage, UploadStage)> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter_map(|e| match e {
                    UploadEvent::StageChanged { from, to } => Some((*from, *to)),
                    _ => None,
                })
                .collect()
        }
    }

    fn two_containers() -> Vec<u8> {
        let mut blob = build_container(&[0x11; 100]);
        blob.extend(build_container(&[0x22; 20]));
        blob
    }

    #[test]
    fn test_full_upload() {
        let blob = two_containers();
        let mock = MockTransport::auto_ack();
        let config = UploadConfig {
            baud_rate: Some(921_600),
            bd_addr: Some("00:1B:DC:07:32:F1".into()),
            ..Default::default()
        };
        let report = PatchUploader::silent(config).run(&mock, &blob).unwrap();

        assert_eq!(
            mock.sent_opcodes(),
            vec![
                HCI_OPCODE_EM_SET_UART_BAUD_RATE,
                HCI_OPCODE_EM_WRITE_PATCH_START,
                HCI_OPCODE_EM_WRITE_PATCH_CONTINUE,
                HCI_OPCODE_EM_WRITE_PATCH_START,
                HCI_OPCODE_EM_CPU_RESET,
                HCI_OPCODE_EM_SET_BD_ADDR,
            ]
        );
        assert_eq!(mock.get_writes()[0][3], 13);
        assert_eq!(
            report,
            UploadReport {
                containers: 2,
                commands: 4,
                bytes: blob.len(),
                baud_rate_set: true,
                bd_addr_set: true,
            }
        );
    }

    #[test]
    fn test_unsupported_baud_rate_is_skipped() {
        let blob = build_container(&[0; 10]);
        let mock = MockTransport::auto_ack();
        let config = UploadConfig {
            baud_rate: Some(12_345),
            ..Default::default()
        };
        let report = PatchUploader::silent(config).run(&mock, &blob).unwrap();
        assert!(!report.baud_rate_set);
        assert_eq!(
            mock.sent_opcodes(),
            vec![HCI_OPCODE_EM_WRITE_PATCH_START, HCI_OPCODE_EM_CPU_RESET]
        );
    }

    #[test]
    fn test_malformed_blob_fails() {
        let mut blob = build_container(&[0; 10]);
        blob[0] = 0;
        let mock = MockTransport::auto_ack();
        let observer = Arc::new(RecordingObserver::default());
        let uploader = PatchUploader::with_observer(UploadConfig::default(), observer.clone());

        let err = uploader.run(&mock, &blob).unwrap_err();
        assert!(err.to_string().contains("Malformed patch blob"));
        assert!(mock.get_writes().is_empty());
        assert!(
            observer
                .events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, UploadEvent::Error { .. }))
        );
        assert_eq!(
            observer.stage_changes(),
            vec![(UploadStage::PatchUpload, UploadStage::Error)]
        );
    }

    #[test]
    fn test_rejected_segment_sends_abort() {
        let blob = build_container(&[0x33; 200]);
        let mock = MockTransport::auto_ack();
        mock.fail_next(HCI_OPCODE_EM_WRITE_PATCH_CONTINUE, 0x01);
        let observer = Arc::new(RecordingObserver::default());

        let err = PatchUploader::with_observer(UploadConfig::default(), observer.clone())
            .run(&mock, &blob)
            .unwrap_err();
        assert!(err.to_string().contains("status 0x01"));
        assert_eq!(
            observer.stage_changes().last(),
            Some(&(UploadStage::PatchUpload, UploadStage::Error))
        );
        assert_eq!(
            mock.sent_opcodes(),
            vec![
                HCI_OPCODE_EM_WRITE_PATCH_START,
                HCI_OPCODE_EM_WRITE_PATCH_CONTINUE,
                HCI_OPCODE_EM_WRITE_PATCH_ABORT,
            ]
        );
    }

    #[test]
    fn test_rejected_bd_addr_enters_error_stage() {
        let blob = build_container(&[0; 10]);
        let mock = MockTransport::auto_ack();
        mock.fail_next(HCI_OPCODE_EM_SET_BD_ADDR, 0x12);
        let observer = Arc::new(RecordingObserver::default());
        let config = UploadConfig {
            bd_addr: Some("00:11:22:33:44:55".into()),
            ..Default::default()
        };

        assert!(
            PatchUploader::with_observer(config, observer.clone())
                .run(&mock, &blob)
                .is_err()
        );
        assert_eq!(
            observer.stage_changes().last(),
            Some(&(UploadStage::BdAddr, UploadStage::Error))
        );
    }

    #[test]
    fn test_stage_sequence() {
        let blob = build_container(&[0; 10]);

        let observer = Arc::new(RecordingObserver::default());
        PatchUploader::with_observer(UploadConfig::default(), observer.clone())
            .run(&MockTransport::auto_ack(), &blob)
            .unwrap();
        assert_eq!(
            observer.stage_changes(),
            vec![
                (UploadStage::PatchUpload, UploadStage::CpuReset),
                (UploadStage::CpuReset, UploadStage::Complete),
            ]
        );

        let observer = Arc::new(RecordingObserver::default());
        let config = UploadConfig {
            baud_rate: Some(115_200),
            ..Default::default()
        };
        PatchUploader::with_observer(config, observer.clone())
            .run(&MockTransport::auto_ack(), &blob)
            .unwrap();
        assert_eq!(
            observer.stage_changes(),
            vec![
                (UploadStage::BaudRate, UploadStage::PatchUpload),
                (UploadStage::PatchUpload, UploadStage::CpuReset),
                (UploadStage::CpuReset, UploadStage::Complete),
            ]
        );
    }

    #[test]
    fn test_mismatched_command_complete() {
        let blob = build_container(&[0; 10]);
        let mock = MockTransport::new();
        mock.queue_command_complete(HCI_OPCODE_EM_CPU_RESET, 0);

        let err = PatchUploader::silent(UploadConfig::default())
            .run(&mock, &blob)
            .unwrap_err();
        assert!(err.to_string().contains("while waiting for 0xFC27"));
    }

    #[test]
    fn test_fire_and_forget() {
        let blob = two_containers();
        let mock = MockTransport::new();
        let config = UploadConfig {
            wait_for_complete: false,
            ..Default::default()
        };
        let report = PatchUploader::silent(config).run(&mock, &blob).unwrap();
        assert_eq!(report.commands, 4);
        assert_eq!(mock.get_writes().len(), 4);
    }

    #[test]
    fn test_progress_events() {
        let blob = two_containers();
        let mock = MockTransport::auto_ack();
        let observer = Arc::new(RecordingObserver::default());
        PatchUploader::with_observer(UploadConfig::default(), observer.clone())
            .run(&mock, &blob)
            .unwrap();

        let events = observer.events.lock().unwrap();
        let starts: Vec<(usize, usize)> = events
            .iter()
            .filter_map(|e| match e {
                UploadEvent::ContainerStarted { index, offset } => Some((*index, *offset)),
                _ => None,
            })
            .collect();
        assert_eq!(starts, vec![(0, 0), (1, 108)]);

        let last_progress = events
            .iter()
            .rev()
            .find_map(|e| match e {
                UploadEvent::Progress { current, total } => Some((*current, *total)),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress, (blob.len() as u64, blob.len() as u64));
        assert!(matches!(events.last(), Some(UploadEvent::Complete)));
    }

    #[test]
    fn test_invalid_bd_addr_rejected_before_sending() {
        let mock = MockTransport::auto_ack();
        let config = UploadConfig {
            bd_addr: Some("not-an-address".into()),
            ..Default::default()
        };
        assert!(
            PatchUploader::silent(config)
                .run(&mock, &build_container(&[]))
                .is_err()
        );
        assert!(mock.get_writes().is_empty());
    }

    #[test]
    fn test_load_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.bin");
        let blob = two_containers();
        std::fs::write(&path, &blob).unwrap();

        let config = UploadConfig {
            patch_path: Some(path.clone()),
            ..Default::default()
        };
        assert_eq!(PatchUploader::silent(config).load_blob().unwrap(), blob);
        assert!(
            PatchUploader::silent(UploadConfig::default())
                .load_blob()
                .is_err()
        );
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.toml");
        let config = UploadConfig {
            patch_path: Some("patch.bin".into()),
            baud_rate: Some(115_200),
            bd_addr: None,
            wait_for_complete: false,
        };
        config.save_to_file(&path).unwrap();

        let loaded = UploadConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.patch_path, Some(PathBuf::from("patch.bin")));
        assert_eq!(loaded.baud_rate, Some(115_200));
        assert!(!loaded.wait_for_complete);

        std::fs::write(&path, "baud_rate = 921600\n").unwrap();
        let partial = UploadConfig::load_from_file(&path).unwrap();
        assert!(partial.wait_for_complete);
        assert_eq!(partial.patch_path, None);
    }
}

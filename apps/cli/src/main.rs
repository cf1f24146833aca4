use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use empatch_core::protocol::H4_COMMAND_INDICATOR;
use empatch_core::{
    BdAddr, Containers, MAX_PATCH_COMMAND_LEN, MockTransport, NextCommand, PatchUploader,
    UploadConfig, UploadSession, baud_rate_command, bd_addr_command,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "EM93xx patch upload tool", long_about = None)]
struct Args {
    /// TOML file with upload defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the containers of a patch blob
    Info {
        /// Patch blob (defaults to `patch_path` from the config)
        blob: Option<PathBuf>,
    },
    /// Print every command the upload would send
    Frames {
        blob: Option<PathBuf>,
        /// Write the commands as an H4 stream instead of printing them
        #[arg(long)]
        h4: Option<PathBuf>,
    },
    /// Print the Set UART Baud Rate command
    Baud { rate: u32 },
    /// Print the Set BD Address command
    BdAddr { addr: BdAddr },
    /// Run the full upload against a simulated controller
    Simulate {
        blob: Option<PathBuf>,
        #[arg(long)]
        baud_rate: Option<u32>,
        #[arg(long)]
        bd_addr: Option<String>,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => UploadConfig::load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => UploadConfig::default(),
    };

    match args.command {
        Commands::Info { blob } => {
            let data = read_blob(blob, &config)?;
            info(&data)
        }
        Commands::Frames { blob, h4 } => {
            let data = read_blob(blob, &config)?;
            frames(&data, h4)
        }
        Commands::Baud { rate } => {
            let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
            let len = baud_rate_command(rate, &mut buf)?;
            println!("{}", hex(&buf[..len]));
            Ok(())
        }
        Commands::BdAddr { addr } => {
            let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
            let len = bd_addr_command(&addr, &mut buf)?;
            println!("{}", hex(&buf[..len]));
            Ok(())
        }
        Commands::Simulate {
            blob,
            baud_rate,
            bd_addr,
        } => {
            if baud_rate.is_some() {
                config.baud_rate = baud_rate;
            }
            if bd_addr.is_some() {
                config.bd_addr = bd_addr;
            }
            let data = read_blob(blob, &config)?;
            let transport = MockTransport::auto_ack();
            let report = PatchUploader::new(config).run(&transport, &data)?;
            info!(
                containers = report.containers,
                commands = report.commands,
                bytes = report.bytes,
                "Simulated upload complete"
            );
            Ok(())
        }
    }
}

fn read_blob(path: Option<PathBuf>, config: &UploadConfig) -> Result<Vec<u8>> {
    let path = match path {
        Some(p) => p,
        None => match &config.patch_path {
            Some(p) => p.clone(),
            None => bail!("No patch blob given (pass a path or set patch_path in the config)"),
        },
    };
    info!(path = %path.display(), "Loading patch blob");
    std::fs::read(&path).with_context(|| format!("reading {}", path.display()))
}

fn info(blob: &[u8]) -> Result<()> {
    println!("Blob size: {} bytes", blob.len());
    let mut commands = 0;
    for (index, header) in Containers::new(blob).enumerate() {
        let header = header?;
        println!(
            "  #{:<3} offset 0x{:06X}  length {:>6}  segments {}",
            index,
            header.offset,
            header.length,
            header.segment_count()
        );
        commands += header.segment_count();
    }
    println!("Commands: {} (+1 CPU reset)", commands);
    Ok(())
}

fn frames(blob: &[u8], h4: Option<PathBuf>) -> Result<()> {
    let mut out: Box<dyn Write> = match &h4 {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };

    let mut session = UploadSession::new(blob);
    let mut buf = [0u8; MAX_PATCH_COMMAND_LEN];
    loop {
        match session.next_command(&mut buf)? {
            NextCommand::Command(len) => {
                if h4.is_some() {
                    out.write_all(&[H4_COMMAND_INDICATOR])?;
                    out.write_all(&buf[..len])?;
                } else {
                    writeln!(out, "{}", hex(&buf[..len]))?;
                }
            }
            NextCommand::Done => break,
            NextCommand::Aborted(reason) => bail!("Malformed patch blob: {}", reason),
        }
    }
    out.flush()?;
    info!(commands = session.commands_sent(), "Frames written");
    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

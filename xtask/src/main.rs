use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Dump the upload frames of a patch blob
    Frames {
        /// Patch blob
        blob: String,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    println!("{}...", what);
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => cargo(&["build"], "Building project"),
        Commands::Test => cargo(&["test", "--workspace"], "Running tests"),
        Commands::Frames { blob } => cargo(
            &["run", "-p", "empatch-cli", "--", "frames", blob.as_str()],
            "Running CLI",
        ),
    }
}

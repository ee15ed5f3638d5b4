//! CLI module for arbscribe
//!
//! Command-line interface for the execution-event backend. It uses clap for
//! argument parsing and provides a structured command pattern: each
//! subcommand owns an `XxxArgs` struct and an `XxxCommand` that executes it
//! against the shared data directory.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

use crate::data_paths::{DataPaths, DEFAULT_DATA_DIR};
use crate::logging::{init_logging, LoggingConfig};

use commands::reconcile::{ReconcileArgs, ReconcileCommand};
use commands::serve::{ServeArgs, ServeCommand};
use commands::show::{ShowArgs, ShowCommand};
use commands::version::{VersionArgs, VersionCommand};

#[derive(Parser)]
#[command(name = "arbscribe")]
#[command(version)]
#[command(about = "Execution-event log, reconciliation and live fan-out backend", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory path (default: ./data)
    #[arg(long, global = true, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collapse duplicate records in execution log partitions
    Reconcile(ReconcileArgs),

    /// Run the live subscriber hub and follow the execution log
    Serve(ServeArgs),

    /// Display one partition's records
    Show(ShowArgs),

    /// Show version information
    Version(VersionArgs),
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let data_paths = DataPaths::new(&self.data_dir);

        // Ensure all directories exist
        data_paths.ensure_directories()?;
        init_logging(LoggingConfig::new(data_paths.clone(), self.verbose > 0))?;

        match self.command {
            Commands::Reconcile(args) => ReconcileCommand::new(args).execute(data_paths).await,
            Commands::Serve(args) => ServeCommand::new(args).execute(data_paths).await,
            Commands::Show(args) => ShowCommand::new(args).execute(data_paths).await,
            Commands::Version(args) => VersionCommand::new(args).execute(data_paths).await,
        }
    }
}

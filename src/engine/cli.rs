//! ctsync CLI Module
//! Command-line interface for the log-list updater

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::config::{Config, ConfigError};

#[derive(Parser, Debug)]
#[command(name = "ctsync")]
#[command(author = "ctsync Team")]
#[command(version)]
#[command(about = "Verified Certificate Transparency log-list updater", long_about = None)]
pub struct Cli {
    /// Data directory (defaults to the platform data directory)
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a default configuration into the data directory
    Init {
        /// Base64 ED25519 public key that signs log lists
        #[arg(long)]
        public_key: Option<String>,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Show per-version update state
    Status,

    /// Run one update cycle now
    Update {
        /// Only update this compatibility version
        #[arg(long = "compat-version")]
        compat_version: Option<String>,

        /// Ignore backoff and refresh intervals (requires --compat-version)
        #[arg(long, requires = "compat_version")]
        force: bool,
    },

    /// Delete all stored update state
    Reset,

    /// Run the updater service with its local HTTP adapter
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to
        #[arg(long)]
        host: Option<String>,
    },
}

impl Cli {
    pub fn get_data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Config::default_data_dir(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update_with_force() {
        let cli = Cli::parse_from(["ctsync", "--data-dir", "/tmp/ct", "update", "--compat-version", "v2", "--force"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/ct")));
        match cli.command {
            Commands::Update { compat_version, force } => {
                assert_eq!(compat_version.as_deref(), Some("v2"));
                assert!(force);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_force_requires_version() {
        assert!(Cli::try_parse_from(["ctsync", "update", "--force"]).is_err());
    }

    #[test]
    fn test_json_format_flag() {
        let cli = Cli::parse_from(["ctsync", "status", "--format", "json"]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(cli.command, Commands::Status));
    }
}

//! CLI argument definitions for scanlog-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Every override flag takes precedence over the config file and
//! `SCANLOG_*` environment variables.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use scanlog_core::config::ScanlogConfig;

/// Scan event collector daemon.
///
/// Accepts newline-delimited scan events over TCP and stores each
/// event as its own file, flagging final-result records.
#[derive(Parser, Debug)]
#[command(name = "scanlog-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to scanlog.toml configuration file.
    ///
    /// When omitted, built-in defaults plus environment overrides are used.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Override the TCP port to listen on.
    #[arg(long)]
    pub port: Option<u16>,

    /// Override the directory event files are written to.
    #[arg(long)]
    pub log_dir: Option<String>,

    /// Override the number of concurrent persistence workers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Validate configuration and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Build the effective configuration.
    ///
    /// Layers defaults, the config file (if given), `SCANLOG_*` variables,
    /// and these flags in that order, then validates the result once.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// final configuration is invalid.
    pub async fn resolve_config(&self) -> Result<ScanlogConfig> {
        let mut config = match &self.config {
            Some(path) => ScanlogConfig::load(path)
                .await
                .with_context(|| format!("failed to load config '{}'", path.display()))?,
            None => ScanlogConfig::from_env(),
        };
        self.apply_overrides(&mut config);
        config.validate().context("invalid configuration")?;
        Ok(config)
    }

    /// Apply command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut ScanlogConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level.clone_from(level);
        }
        if let Some(format) = &self.log_format {
            config.general.log_format.clone_from(format);
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(dir) = &self.log_dir {
            config.storage.log_dir.clone_from(dir);
        }
        if let Some(workers) = self.workers {
            config.pool.workers = workers;
        }
    }
}

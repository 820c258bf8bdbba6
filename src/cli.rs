//! Command-line interface definitions for the tackboard server binary.

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

/// Top-level command-line interface definition.
#[derive(Debug, Parser)]
#[command(name = env!("CARGO_PKG_NAME"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = env!("CARGO_PKG_DESCRIPTION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Launch the application server.
    Serve(ServeArgs),
}

/// Arguments for the serve command.
#[derive(Debug, Parser)]
pub struct ServeArgs {
    /// Path to the configuration file
    #[arg(short, long, default_value = "tackboard.toml")]
    pub config: String,

    /// Optional override for the public port (overrides port in config)
    #[arg(long)]
    pub port: Option<u16>,

    /// Disable multi-tenant authentication and accept only this token.
    /// Intended for local single-user setups.
    #[arg(long, env = "TACKBOARD_SINGLE_USER_TOKEN", hide_env_values = true)]
    pub single_user_token: Option<String>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,
}

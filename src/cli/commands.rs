//! CLI commands and argument parsing

use crate::types::Method;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Admin portal API client
#[derive(Parser, Debug)]
#[command(name = "portal-client")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the API base URL
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Override the credentials file
    #[arg(long, global = true)]
    pub credentials: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Log in and store the returned tokens
    Login {
        /// Account email
        #[arg(long)]
        email: String,

        /// Account password (falls back to PORTAL_PASSWORD)
        #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored tokens
    Logout,

    /// Show which tokens are stored
    Status {
        /// Also print the tokens as Set-Cookie values
        #[arg(long)]
        cookies: bool,
    },

    /// Send an authenticated request
    Request {
        /// HTTP method
        method: Method,

        /// Path relative to the base URL, or a full URL
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,

        /// Query parameter (key=value), repeatable
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,

        /// Override max rate-limit retries
        #[arg(long)]
        retries: Option<u32>,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Compact JSON
    Json,
    /// Human-readable output
    Pretty,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

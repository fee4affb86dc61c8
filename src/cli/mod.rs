//! CLI module
//!
//! Command-line interface for the portal API.
//!
//! # Commands
//!
//! - `login` - Log in and store the returned tokens
//! - `logout` - Forget the stored tokens
//! - `status` - Show which tokens are stored
//! - `request` - Send an authenticated request

mod commands;
mod runner;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;

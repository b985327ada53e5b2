// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::{Parser, Subcommand};

const QUICKSTART_HELP: &str = "\
Get started:
  tether status                       Check both backend endpoints
  tether call echo '{\"v\": 1}'         Make a one-shot call
  tether session \"Summarize README\"   Run one agent turn";

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(version)]
#[command(about = "Client for local command and agent-session backends")]
#[command(after_help = QUICKSTART_HELP)]
pub struct Cli {
    /// Path to the config file [default: <config dir>/tether/config.toml]
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging (overridden by TETHER_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Make a one-shot call on the command endpoint
    Call {
        /// Method name
        method: String,
        /// Parameters as a JSON value
        params: Option<String>,
    },

    /// Run one turn of an agent session
    Session {
        /// Prompt to send
        prompt: String,

        /// Model to use
        #[arg(long)]
        model: Option<String>,

        /// Working directory for the session
        #[arg(long)]
        cwd: Option<String>,

        /// System prompt for a new session
        #[arg(long)]
        system_prompt: Option<String>,

        /// Resume an existing session instead of creating one
        #[arg(long, value_name = "ID", conflicts_with_all = ["system_prompt", "cwd"])]
        resume: Option<String>,
    },

    /// Connect to both endpoints and report their state
    Status,

    /// Print the effective configuration
    Config,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;

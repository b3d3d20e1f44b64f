//! Command-line interface definitions for kosctl.

use clap::{Parser, Subcommand};

/// Control surface for a simulated KOS machine.
#[derive(Parser)]
#[command(name = "kosctl", version, about)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Path to a TOML config file (falls back to built-in defaults for any
    /// field it omits, or entirely if the path doesn't exist).
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// `tracing` filter directive, overriding the config file's `log_level`.
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Command {
    /// Boot a `Core` and run every built-in scenario, printing pass/fail.
    Demo,
    /// Boot a `Core` and run one named scenario (`s1` through `s6`).
    Run(RunArgs),
    /// Print the resolved configuration as TOML.
    Configure,
}

/// Arguments for the `run` subcommand.
#[derive(Parser)]
pub struct RunArgs {
    /// Scenario name: one of `s1`..`s6`.
    pub scenario: String,
}

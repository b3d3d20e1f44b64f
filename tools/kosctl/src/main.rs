//! kosctl: boots a simulated KOS machine and drives it from the command
//! line — a host-side harness for exercising a [`kos_kernel::Core`]
//! directly, the way `gluon`/`hadron-build` drive the real kernel through
//! QEMU.

mod cli;
mod scenarios;

use anyhow::{bail, Result};
use clap::Parser;
use kos_kernel::CoreConfig;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    init_tracing(cli.log_level.as_deref());

    match cli.command {
        cli::Command::Demo => cmd_demo(),
        cli::Command::Run(args) => cmd_run(&args.scenario),
        cli::Command::Configure => cmd_configure(cli.config.as_deref()),
    }
}

fn init_tracing(level: Option<&str>) {
    let filter = level.map_or_else(|| "info".to_string(), str::to_string);
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Runs every scenario, printing a pass/fail line for each, and exits
/// non-zero if any failed.
fn cmd_demo() -> Result<()> {
    let mut failures = 0usize;
    for scenario in scenarios::ALL {
        match (scenario.run)() {
            Ok(()) => println!("{:<4} PASS", scenario.name),
            Err(e) => {
                println!("{:<4} FAIL  {e}", scenario.name);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        bail!("{failures} scenario(s) failed");
    }
    Ok(())
}

fn cmd_run(name: &str) -> Result<()> {
    let scenario = scenarios::by_name(name).ok_or_else(|| anyhow::anyhow!("unknown scenario: {name}"))?;
    (scenario.run)()?;
    println!("{:<4} PASS", scenario.name);
    Ok(())
}

fn cmd_configure(path: Option<&str>) -> Result<()> {
    let config = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            CoreConfig::from_toml(&text)?
        }
        None => CoreConfig::default(),
    };
    print!("{}", config.to_toml()?);
    Ok(())
}

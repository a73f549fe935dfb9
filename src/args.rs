//! Command line argument parsing for the SMC bridge

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// SMC Bridge
///
/// Talks to the privileged SMC helper daemon to read temperatures and
/// control fans, with curve-based target speeds.
#[derive(Parser)]
#[command(name = "smc-bridge")]
#[command(about = "Client bridge to the privileged SMC helper")]
#[command(version)]
pub struct Args {
    /// Increase verbosity (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Install and authorize the helper (prompts for consent)
    Install,
    /// Remove the helper (prompts for consent)
    Uninstall,
    /// Show helper status
    Status,
    /// Show the helper version
    Version,
    /// List temperature sensors
    Sensors,
    /// Read a raw SMC key
    ReadKey {
        /// Four-character SMC key, e.g. TC0P
        key: String,
    },
    /// List fans
    Fans,
    /// Pin a fan to a fixed speed
    SetSpeed {
        /// Fan index
        index: u8,
        /// Target speed in RPM
        rpm: u32,
    },
    /// Return a fan to automatic control
    Auto {
        /// Fan index
        index: u8,
    },
    /// Fan curve profile management
    Curve {
        #[command(subcommand)]
        command: CurveCommands,
    },
    /// Drive a fan from a curve profile until interrupted
    Watch {
        /// Curve profile file (defaults to the built-in standard curve)
        #[arg(long)]
        profile: Option<PathBuf>,
        /// Temperature sensor key to follow
        #[arg(long, default_value = "TC0P")]
        sensor: String,
        /// Fan index to drive
        #[arg(long, default_value_t = 0)]
        fan: u8,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 2000)]
        interval_ms: u64,
    },
}

#[derive(Subcommand)]
pub enum CurveCommands {
    /// Validate a curve profile file
    Validate {
        /// Curve profile file
        file: PathBuf,
    },
    /// Evaluate a curve at a temperature
    Eval {
        /// Temperature in Celsius
        temp: f64,
        /// Curve profile file (defaults to the built-in standard curve)
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Print a curve's points
    Show {
        /// Curve profile file (defaults to the built-in standard curve)
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

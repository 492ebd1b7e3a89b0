use std::path::PathBuf;

use clap::Parser;

use crate::common::utils::ArgDuration;
use crate::output::Outputs;

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets output formatting
    #[arg(
        long,
        env = "GRIDQ_OUTPUT_MODE",
        default_value_t = Outputs::Cli,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "GRIDQ_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,

    /// Driver configuration file (TOML)
    #[arg(
        long,
        value_hint = clap::ValueHint::FilePath,
        env = "GRIDQ_CONFIG",
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub config: Option<PathBuf>,
}

// Root CLI options
#[derive(Parser)]
#[command(
    about,
    version,
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Runs a single scheduling epoch over a snapshot and prints its orders
    Dispatch(DispatchOpts),
    /// Re-reads a snapshot periodically and schedules it until interrupted
    Watch(WatchOpts),
}

#[derive(Parser)]
pub struct DispatchOpts {
    /// Cluster snapshot (JSON)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub snapshot: PathBuf,

    /// Overrides the epoch time stored in the snapshot (seconds)
    #[arg(long)]
    pub now: Option<u64>,

    /// Also prints the epoch statistics and booked reservations
    #[arg(long)]
    pub summary: bool,
}

#[derive(Parser)]
pub struct WatchOpts {
    /// Cluster snapshot (JSON), read again before every epoch
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub snapshot: PathBuf,

    /// Time between two epochs [default: taken from the config file, otherwise 15s]
    #[arg(long)]
    pub interval: Option<ArgDuration>,

    /// Stops after this many epochs
    #[arg(long)]
    pub max_epochs: Option<u64>,
}

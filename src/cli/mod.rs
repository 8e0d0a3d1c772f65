use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,

    /// Path to the TOML configuration file.
    #[arg(
        long,
        short = 'c',
        env = "PG_DRILL_CONFIG",
        default_value = "/etc/pg_drill/config.toml"
    )]
    pub config: PathBuf,

    /// Run one backup cycle (and one restore drill, when configured) and exit.
    #[arg(long)]
    pub once: bool,

    /// Dump without uploading, pruning or drilling.
    #[arg(long)]
    pub dry_run: bool,
}

use clap::{Parser, Subcommand};
use utils::version;

use crate::config::watch::{KubeArgs, WatchArgs};

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the nodes of a job as JSON, ordered by type and index
    Snapshot(KubeArgs),
    /// Stream node events of a job as JSON lines until interrupted
    Watch(Box<WatchArgs>),
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "loadsim", about = "MQTT synthetic traffic generator and latency harness")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run publishers and/or subscribers from a settings file
    Run(RunArgs),
    /// Summarize the logs of a finished run
    Collect(CollectArgs),
    /// Latency statistics from subscriber sidecar files
    Latency(LatencyArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    Pub,
    Sub,
    Both,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Settings file (JSON, or TOML with a .toml extension)
    #[arg(short = 'f', long = "settings", env = "LOADSIM_SETTINGS")]
    pub settings: PathBuf,

    #[arg(short, long, value_enum, default_value = "both")]
    pub mode: Mode,

    /// Directory for subscriber logs and publisher.log
    #[arg(short, long, default_value = "logs", env = "LOADSIM_OUTPUT")]
    pub output: PathBuf,

    /// Seconds to keep subscribers up after the last publisher finishes
    #[arg(long, default_value_t = 2.0)]
    pub linger: f64,

    /// Use the in-process broker instead of connecting out
    #[arg(long)]
    pub loopback: bool,
}

#[derive(Args, Clone, Debug)]
pub struct CollectArgs {
    /// Directory containing subscriber logs
    #[arg(short, long, default_value = "logs")]
    pub logdir: PathBuf,

    /// Publisher event log [default: <logdir>/publisher.log]
    #[arg(short, long)]
    pub publog: Option<PathBuf>,
}

#[derive(Args, Clone, Debug)]
pub struct LatencyArgs {
    /// Directory with *.latency.csv files
    pub dir: PathBuf,

    /// Second run to compare against
    pub dir2: Option<PathBuf>,

    #[arg(long, default_value = "Run 1")]
    pub name1: String,

    #[arg(long, default_value = "Run 2")]
    pub name2: String,

    /// Where latency_statistics.csv is written
    #[arg(short, long, default_value = "latency_analysis")]
    pub output: PathBuf,
}

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::consts::{DEFAULT_GRACEFUL_STOP_SECS, DEFAULT_REQUEST_TIMEOUT_SECS};

#[derive(ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to a YAML scenario file (stages, services, complexity, pause)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run a single iteration with one VU and print its checks
    #[arg(long)]
    pub once: bool,

    /// Value of the `complexity` query parameter sent to every service
    #[arg(long)]
    pub complexity: Option<u64>,

    /// Pause after each request in milliseconds
    #[arg(long)]
    pub pause_ms: Option<u64>,

    /// Request timeout in seconds (at least 1)
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Time in-flight iterations get to finish once the ramp ends, in seconds
    #[arg(long, default_value_t = DEFAULT_GRACEFUL_STOP_SECS)]
    pub graceful_stop: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

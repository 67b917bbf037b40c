use clap::Parser;
use std::path::PathBuf;

use crate::config::DataSource;

/// statecast: relay live state from a running game into a pollable snapshot
///
/// Flags override values from the config file.
#[derive(Parser, Debug)]
#[command(name = "statecast", version)]
#[command(about = "Read live JSON state from a pipe or file and serve it over HTTP", long_about = None)]
pub struct Cli {
    /// Config file (defaults to ./statecast.toml when present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind the HTTP server to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind the HTTP server to
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds of invalid input tolerated before the snapshot is cleared
    #[arg(long)]
    pub stream_timeout: Option<u64>,

    /// Where state updates come from
    #[arg(long, value_enum)]
    pub data_source: Option<DataSource>,

    /// Pipe or Unix socket endpoint to connect to
    #[arg(long)]
    pub pipe_name: Option<String>,

    /// File to watch when the data source is `file`
    #[arg(long)]
    pub file_path: Option<PathBuf>,

    /// Read buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Write diagnostic logs to the configured debug file
    #[arg(long, default_value_t = false)]
    pub debug: bool,
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

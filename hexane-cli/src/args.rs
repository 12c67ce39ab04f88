//! CLI argument parsing

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "hexaned")]
#[command(version, about = "A flexible DHCPv6 server", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    pub config: PathBuf,

    /// Validate the configuration and build the pipeline, then exit
    #[arg(long)]
    pub check: bool,

    /// Stay attached to the terminal and log to stderr at info level
    #[arg(short, long)]
    pub foreground: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The tracing filter directive for the chosen verbosity
    pub fn log_filter(&self) -> &'static str {
        let base = u8::from(self.foreground);
        match base + self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}

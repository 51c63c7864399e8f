//! CLI entrypoint (§6.1).

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(
    name = "chainwatch-server",
    about = "Multi-chain address-activity notification hub",
    version
)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, default_value = "./config.json")]
    pub config: String,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Increase log verbosity. Repeatable: -v, -vv, -vvv.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

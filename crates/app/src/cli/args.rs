pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "opcsign")]
#[command(about = "Sign, verify and timestamp OPC packages such as VSIX extensions")]
#[command(version)]
pub struct Args {
    /// Path to the config file (defaults to <config dir>/opcsign/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    #[command(subcommand)]
    pub command: crate::Command,
}

// CLI modules
mod cli;
mod config;
mod logging;

use clap::{Parser, Subcommand};
use cli::args::Args;
use cli::op::{ExitStatus, Op, OpContext};
use cli::{List, Sign, Timestamp, Unsign, Verify, Version};
use config::AppConfig;

command_enum! {
    (Sign, Sign),
    (Unsign, Unsign),
    (List, List),
    (Verify, Verify),
    (Timestamp, Timestamp),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match AppConfig::load(args.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    let guard = logging::init_logging(config.log_level(args.log_level));

    let ctx = OpContext::new(config);

    // Ctrl-C abandons an in-flight timestamp request
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };

    // flush buffered log lines before exiting
    drop(guard);
    std::process::exit(code);
}

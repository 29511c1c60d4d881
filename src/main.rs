mod cli;
mod config;
mod connector;
mod environment;
mod error;
mod jobs;
mod provider;
mod session;
mod ssh;
mod staging;
mod submit;
#[cfg(test)]
mod testing;
pub mod utils;
mod worker;

use clap::Parser;
use console::style;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use error::HarnessError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "farmprobe=debug"
    } else {
        "farmprobe=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    if let Err(e) = cli.execute().await {
        eprintln!("{} {}", style("error:").red().bold(), e.root());
        if let HarnessError::TeardownAfterFailure { teardown, .. } = &e {
            eprintln!("{} {}", style("teardown:").red().bold(), teardown);
        }
        std::process::exit(1);
    }
}

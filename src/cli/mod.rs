pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{ConfigBuilder, ConfigLayer, HarnessConfig};
use crate::error::Result;

#[derive(Parser)]
#[command(name = "farmprobe")]
#[command(version)]
#[command(about = "End-to-end validation for render job submissions")]
#[command(long_about = "Provision a disposable render worker, install the adaptor, submit every test job bundle and check the results.\n\nThe worker is torn down on every exit path.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/farmprobe/config.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Compute provider (digitalocean, docker)
    #[arg(short, long, global = true)]
    pub provider: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision a worker, submit every job bundle and verify the results
    Run {
        /// Only submit the named bundle
        #[arg(short, long)]
        bundle: Option<String>,

        /// Region for the worker
        #[arg(short, long)]
        region: Option<String>,

        /// Instance type for the worker
        #[arg(long)]
        instance_type: Option<String>,
    },

    /// Provision a target, run one command on it and tear it down
    Exec {
        /// Command to execute
        command: String,

        /// Seconds between status polls
        #[arg(long)]
        interval: Option<u64>,

        /// Polls before giving up
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Run every job bundle on this machine with the local job runner
    Local {
        /// Only run the named bundle
        #[arg(short, long)]
        bundle: Option<String>,
    },

    /// List the job bundles found in the bundle directory
    Bundles,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration, secrets masked
    Show,
}

impl Cli {
    /// Merge the config file, the environment and the global flags.
    pub fn load_config(&self, extra: ConfigLayer) -> Result<HarnessConfig> {
        ConfigBuilder::new()
            .file_or_default(self.config.as_deref())?
            .layer(ConfigLayer {
                provider: self.provider.clone(),
                ..Default::default()
            })
            .layer(extra)
            .build()
    }

    pub async fn execute(self) -> Result<()> {
        match &self.command {
            Commands::Run {
                bundle,
                region,
                instance_type,
            } => {
                let config = self.load_config(ConfigLayer {
                    region: region.clone(),
                    instance_type: instance_type.clone(),
                    ..Default::default()
                })?;
                commands::run::execute(config, bundle.clone()).await
            }
            Commands::Exec {
                command,
                interval,
                attempts,
            } => {
                let config = self.load_config(ConfigLayer {
                    poll_interval: interval.map(|secs| format!("{}s", secs)),
                    max_attempts: *attempts,
                    ..Default::default()
                })?;
                commands::exec::execute(&config, command).await
            }
            Commands::Local { bundle } => {
                let config = self.load_config(ConfigLayer::default())?;
                commands::local::execute(&config, bundle.as_deref()).await
            }
            Commands::Bundles => {
                let config = self.load_config(ConfigLayer::default())?;
                commands::bundles::execute(&config)
            }
            Commands::Config { command } => match command {
                ConfigCommands::Show => {
                    let config = self.load_config(ConfigLayer::default())?;
                    commands::config::show(&config, self.config.as_deref())
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_exec_with_globals() {
        let cli = Cli::parse_from([
            "farmprobe",
            "exec",
            "uname -a",
            "--attempts",
            "3",
            "--provider",
            "docker",
            "-v",
        ]);

        assert!(cli.verbose);
        assert_eq!(cli.provider.as_deref(), Some("docker"));
        match cli.command {
            Commands::Exec {
                command, attempts, ..
            } => {
                assert_eq!(command, "uname -a");
                assert_eq!(attempts, Some(3));
            }
            _ => panic!("expected exec"),
        }
    }

    #[test]
    fn test_flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "provider: digitalocean\nregion: ams3\n").unwrap();

        let cli = Cli::parse_from([
            "farmprobe",
            "--config",
            path.to_str().unwrap(),
            "--provider",
            "docker",
            "bundles",
        ]);
        let config = cli
            .load_config(ConfigLayer {
                region: Some("sfo3".to_string()),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.provider, "docker");
        assert_eq!(config.region, "sfo3");
    }
}

use std::path::Path;

use console::style;

use crate::config::HarnessConfig;
use crate::error::Result;

pub fn show(config: &HarnessConfig, explicit: Option<&Path>) -> Result<()> {
    println!("{}", style("Effective Configuration").bold().cyan());
    println!();
    for line in config.redacted().to_yaml()?.lines() {
        println!("  {}", line);
    }
    println!();

    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => HarnessConfig::config_path()?,
    };
    if path.exists() {
        println!("Config file: {}", style(path.display()).dim());
    } else {
        println!(
            "Config file: {} {}",
            style(path.display()).dim(),
            style("(not found, using defaults and environment)").yellow()
        );
    }

    Ok(())
}

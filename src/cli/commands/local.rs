use console::style;

use super::select_bundles;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::submit::{discover_bundles, run_local};

pub async fn execute(config: &HarnessConfig, only: Option<&str>) -> Result<()> {
    let bundles = select_bundles(discover_bundles(&config.bundles_dir)?, only)?;
    let timeout = config.local_timeout_duration();

    let mut failed = 0;
    for bundle in &bundles {
        println!(
            "  {} {} {}",
            style("◐").cyan(),
            style(&bundle.name).white().bold(),
            style(bundle.path.display()).dim()
        );
        match run_local(&config.local_runner, bundle, timeout).await {
            Ok(()) => println!("  {} {}", style("✓").green().bold(), bundle.name),
            Err(e) => {
                failed += 1;
                println!("  {} {}", style("✕").red().bold(), e);
            }
        }
    }

    if failed > 0 {
        return Err(HarnessError::LocalRun(format!(
            "{} of {} bundles failed",
            failed,
            bundles.len()
        )));
    }
    Ok(())
}

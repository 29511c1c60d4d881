use console::style;

use crate::config::HarnessConfig;
use crate::error::Result;
use crate::submit::discover_bundles;

pub fn execute(config: &HarnessConfig) -> Result<()> {
    let bundles = discover_bundles(&config.bundles_dir)?;

    if bundles.is_empty() {
        println!(
            "{} in {}",
            style("No job bundles found").dim(),
            config.bundles_dir.display()
        );
        return Ok(());
    }

    println!("{}", style("Job bundles").bold().cyan());
    println!();
    for bundle in bundles.values() {
        let job_name = bundle
            .load_template()
            .ok()
            .and_then(|t| t.get("name").and_then(|n| n.as_str()).map(str::to_string));
        println!(
            "  {:<32} {}",
            style(&bundle.name).white(),
            match job_name {
                Some(name) => style(name).dim(),
                None => style("(no template)".to_string()).yellow(),
            }
        );
    }
    println!();
    println!("{} bundles", bundles.len());

    Ok(())
}

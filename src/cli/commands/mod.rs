pub mod bundles;
pub mod config;
pub mod exec;
pub mod local;
pub mod run;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::staging::{ArtifactStore, HttpArtifactStore};
use crate::submit::JobBundle;

const BANNER: &str = r#"
   ┌─┐┌─┐┬─┐┌┬┐┌─┐┬─┐┌─┐┌┐ ┌─┐
   ├┤ ├─┤├┬┘│││├─┘├┬┘│ │├┴┐├┤
   └  ┴ ┴┴└─┴ ┴┴  ┴└─└─┘└─┘└─┘
"#;

pub fn print_banner() {
    println!("{}", style(BANNER).cyan());
}

/// Spinner for long waits. Hidden when stderr is not a terminal.
pub fn spinner(message: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("  {spinner:.cyan} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.into());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Artifact store for staged file mappings, when one is configured.
pub fn staging_store(config: &HarnessConfig) -> Result<Option<Arc<dyn ArtifactStore>>> {
    match &config.staging_endpoint {
        Some(endpoint) => {
            let store = HttpArtifactStore::new(endpoint, config.staging_token.clone())?;
            Ok(Some(Arc::new(store)))
        }
        None => Ok(None),
    }
}

pub fn target_name(purpose: &str) -> String {
    format!(
        "farmprobe-{}-{}",
        purpose,
        chrono::Utc::now().format("%Y%m%d-%H%M%S")
    )
}

/// Keep only the bundle called `only`, if given.
pub fn select_bundles(
    mut bundles: BTreeMap<String, JobBundle>,
    only: Option<&str>,
) -> Result<Vec<JobBundle>> {
    let selected: Vec<JobBundle> = match only {
        Some(name) => match bundles.remove(name) {
            Some(bundle) => vec![bundle],
            None => {
                return Err(HarnessError::Config(format!(
                    "No job bundle named '{}'. Available: {}",
                    name,
                    bundles.keys().cloned().collect::<Vec<_>>().join(", ")
                )))
            }
        },
        None => bundles.into_values().collect(),
    };

    if selected.is_empty() {
        return Err(HarnessError::Config("No job bundles found".to_string()));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundles() -> BTreeMap<String, JobBundle> {
        ["render_cube", "layered_scene"]
            .into_iter()
            .map(|name| (name.to_string(), JobBundle::new(name, format!("/b/{}", name))))
            .collect()
    }

    #[test]
    fn test_select_all_bundles_sorted() {
        let selected = select_bundles(bundles(), None).unwrap();
        let names: Vec<&str> = selected.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["layered_scene", "render_cube"]);
    }

    #[test]
    fn test_select_named_bundle() {
        let selected = select_bundles(bundles(), Some("render_cube")).unwrap();
        assert_eq!(selected.len(), 1);

        let err = select_bundles(bundles(), Some("teapot")).unwrap_err();
        assert!(err.to_string().contains("layered_scene, render_cube"));
    }

    #[test]
    fn test_select_from_empty() {
        assert!(select_bundles(BTreeMap::new(), None).is_err());
    }

    #[test]
    fn test_target_name() {
        assert!(target_name("worker").starts_with("farmprobe-worker-"));
    }

    #[test]
    fn test_staging_store_optional() {
        let config = HarnessConfig::default();
        assert!(staging_store(&config).unwrap().is_none());

        let config = HarnessConfig {
            staging_endpoint: Some("https://staging.example.com".to_string()),
            ..Default::default()
        };
        assert!(staging_store(&config).unwrap().is_some());
    }
}

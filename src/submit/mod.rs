//! Job bundles and the tools that run them.

mod cli;
mod local;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use cli::SubmitCli;
pub use local::run_local;

use crate::error::{HarnessError, Result};

/// Directory name that marks a test case as carrying a job bundle.
pub const EXPECTED_BUNDLE_DIR: &str = "expected_job_bundle";

/// A job bundle directory on the local machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobBundle {
    pub name: String,
    pub path: PathBuf,
}

impl JobBundle {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }

    /// The bundle's `template.yaml`, parsed but not validated.
    pub fn load_template(&self) -> Result<serde_yaml::Value> {
        let path = self.path.join("template.yaml");
        let content = std::fs::read_to_string(&path).map_err(|e| {
            HarnessError::Submission(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

/// Every test case under `dir` that contains an `expected_job_bundle`
/// directory, keyed by test case name.
pub fn discover_bundles(dir: &Path) -> Result<BTreeMap<String, JobBundle>> {
    if !dir.is_dir() {
        return Err(HarnessError::Config(format!(
            "Job bundle directory {} does not exist. Set JOB_BUNDLE_TESTS_DIR",
            dir.display()
        )));
    }

    let mut bundles = BTreeMap::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let bundle_dir = entry.path().join(EXPECTED_BUNDLE_DIR);
        if !bundle_dir.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        bundles.insert(name.clone(), JobBundle::new(name, bundle_dir));
    }

    tracing::debug!("Found {} job bundles in {}", bundles.len(), dir.display());
    Ok(bundles)
}

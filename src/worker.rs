//! Render worker installation.
//!
//! Resolves the installer artifacts on the local machine, maps them onto
//! the target and builds the chain that configures the worker agent.

use std::path::{Path, PathBuf};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::provider::{FileMapping, NetworkPlacement, TargetSpec};
use crate::session::CommandChain;
use crate::utils::expand_wildcard;

pub const MAYA_ARCHIVE_DESTINATION: &str = "/MayaIO2023.run";
pub const CONFIGURE_SCRIPT_DESTINATION: &str = "/tmp/configure-maya-worker.sh";

/// Local artifacts the worker install needs, with their target paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifacts {
    pub maya_archive: PathBuf,
    pub adaptor_whl: PathBuf,
    /// Where the wheel lands on the target
    pub adaptor_whl_destination: String,
    pub configure_script: PathBuf,
}

/// Resolve the adaptor wheel wildcard and check the other artifacts exist.
pub fn resolve_artifacts(config: &HarnessConfig) -> Result<ResolvedArtifacts> {
    let matches = expand_wildcard(&config.adaptor_whl)?;
    let adaptor_whl = match matches.as_slice() {
        [single] => single.clone(),
        [] => {
            return Err(HarnessError::Config(format!(
                "No adaptor wheel matches '{}'. Set DEADLINE_CLOUD_FOR_MAYA_WHL",
                config.adaptor_whl
            )))
        }
        many => {
            return Err(HarnessError::Config(format!(
                "Expected one adaptor wheel for '{}', found {}",
                config.adaptor_whl,
                many.len()
            )))
        }
    };

    let file_name = adaptor_whl
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            HarnessError::Config(format!("Invalid wheel path {}", adaptor_whl.display()))
        })?;
    let adaptor_whl_destination = format!("/tmp/{}", file_name);

    let maya_archive = config.maya_archive.clone().ok_or_else(|| {
        HarnessError::Config(
            "Maya 2023 is required but was not provided. Set MAYA_2023_ARCHIVE_PATH".to_string(),
        )
    })?;
    require_file(&maya_archive, "Maya archive")?;
    require_file(&config.configure_script, "configure script")?;

    Ok(ResolvedArtifacts {
        maya_archive,
        adaptor_whl,
        adaptor_whl_destination,
        configure_script: config.configure_script.clone(),
    })
}

fn require_file(path: &Path, what: &str) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(HarnessError::Config(format!(
            "{} not found at {}",
            what,
            path.display()
        )))
    }
}

/// Target description for a worker, artifacts mapped ahead of any extra
/// mappings from the config.
pub fn build_target_spec(
    name: &str,
    config: &HarnessConfig,
    artifacts: &ResolvedArtifacts,
) -> TargetSpec {
    let mappings = vec![
        FileMapping::new(&artifacts.maya_archive, MAYA_ARCHIVE_DESTINATION),
        FileMapping::new(
            &artifacts.adaptor_whl,
            artifacts.adaptor_whl_destination.clone(),
        ),
        FileMapping::new(&artifacts.configure_script, CONFIGURE_SCRIPT_DESTINATION),
    ];
    target_spec(name, config, mappings)
}

/// Target description with only the mappings from the config.
pub fn plain_target_spec(name: &str, config: &HarnessConfig) -> TargetSpec {
    target_spec(name, config, Vec::new())
}

fn target_spec(name: &str, config: &HarnessConfig, mut mappings: Vec<FileMapping>) -> TargetSpec {
    mappings.extend(config.file_mappings.iter().cloned());

    let mut spec = TargetSpec::new(name, &config.region, &config.instance_type)
        .with_image(config.image_spec())
        .with_network(NetworkPlacement {
            subnet_id: config.subnet_id.clone(),
            security_group_id: config.security_group_id.clone(),
        })
        .with_file_mappings(mappings)
        .with_os_user(&config.ssh_user)
        .with_label("purpose", "e2e");

    if let Some(bucket) = &config.bootstrap_bucket {
        spec = spec.with_bootstrap_bucket(bucket);
    }
    if let Some(profile) = &config.instance_profile {
        spec = spec.with_instance_profile(profile);
    }
    for command in &config.user_data_commands {
        spec = spec.with_user_data_command(command);
    }
    spec
}

/// Chain that configures the worker agent on target `target_id`.
pub fn install_chain(
    target_id: &str,
    config: &HarnessConfig,
    artifacts: &ResolvedArtifacts,
) -> CommandChain {
    CommandChain::new()
        .step(format!("chmod +x {}", CONFIGURE_SCRIPT_DESTINATION))
        .export("INSTANCE_ID", target_id)
        .export("WORKER_USER", &config.worker_user)
        .export("JOB_USER", &config.job_user)
        .export("MAYA_ADAPTOR_WHL_PATH", &artifacts.adaptor_whl_destination)
        .step(CONFIGURE_SCRIPT_DESTINATION)
}

//! Harness configuration.
//!
//! Built once per run from layers, later layers winning field by field:
//! built-in defaults, the YAML file, environment variables, then per-run
//! overrides from the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::provider::{FileMapping, ImageSpec, ProviderType};
use crate::session::PollPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessConfig {
    pub provider: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,
    pub region: String,
    pub instance_type: String,
    /// `ubuntu:<version>`, `debian:<version>` or a provider image ID
    pub image: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_token: Option<String>,

    pub ssh_user: String,
    pub ssh_key_path: String,

    /// Extra mappings on top of the worker artifacts
    #[serde(default)]
    pub file_mappings: Vec<FileMapping>,
    #[serde(default)]
    pub user_data_commands: Vec<String>,

    pub poll_interval: String,
    pub max_attempts: u32,
    pub install_max_attempts: u32,

    pub configure_script: PathBuf,
    pub worker_user: String,
    pub job_user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maya_archive: Option<PathBuf>,
    /// Wildcard that must match exactly one adaptor wheel
    pub adaptor_whl: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_token: Option<String>,
    pub bundles_dir: PathBuf,
    pub submit_cli: String,
    pub job_poll_interval: String,
    pub job_max_attempts: u32,

    pub local_runner: String,
    pub local_timeout: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            provider: "digitalocean".to_string(),
            api_token: String::new(),
            api_base: None,
            region: "nyc1".to_string(),
            instance_type: "s-2vcpu-4gb".to_string(),
            image: "ubuntu:24.04".to_string(),
            subnet_id: None,
            security_group_id: None,
            instance_profile: None,
            bootstrap_bucket: None,
            staging_endpoint: None,
            staging_token: None,
            ssh_user: "root".to_string(),
            ssh_key_path: "~/.ssh/id_ed25519".to_string(),
            file_mappings: Vec::new(),
            user_data_commands: Vec::new(),
            poll_interval: "10s".to_string(),
            max_attempts: 60,
            install_max_attempts: 200,
            configure_script: PathBuf::from("assets/configure-maya-worker.sh"),
            worker_user: "deadline-worker".to_string(),
            job_user: "jobuser".to_string(),
            maya_archive: None,
            adaptor_whl: "dist/deadline_cloud_for_maya*.whl".to_string(),
            farm_id: None,
            queue_id: None,
            jobs_endpoint: None,
            jobs_token: None,
            bundles_dir: PathBuf::from("job_bundle_output_tests"),
            submit_cli: "deadline".to_string(),
            job_poll_interval: "15s".to_string(),
            job_max_attempts: 240,
            local_runner: "openjd".to_string(),
            local_timeout: "5s".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn config_dir() -> Result<PathBuf> {
        let home = std::env::var("HOME")
            .map_err(|_| HarnessError::Config("HOME environment variable not set".to_string()))?;
        Ok(PathBuf::from(home).join(".config").join("farmprobe"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.yaml"))
    }

    pub fn provider_type(&self) -> Option<ProviderType> {
        ProviderType::from_name(&self.provider)
    }

    pub fn image_spec(&self) -> ImageSpec {
        if let Some(version) = self.image.strip_prefix("ubuntu:") {
            ImageSpec::ubuntu(version)
        } else if let Some(version) = self.image.strip_prefix("debian:") {
            ImageSpec::debian(version)
        } else {
            ImageSpec::custom(&self.image)
        }
    }

    /// Polling for ordinary commands.
    pub fn command_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval_duration(), self.max_attempts)
    }

    /// Polling for the worker install chain.
    pub fn install_policy(&self) -> PollPolicy {
        PollPolicy::new(self.poll_interval_duration(), self.install_max_attempts)
    }

    /// Polling for submitted jobs.
    pub fn job_policy(&self) -> PollPolicy {
        let interval = parse_duration(&self.job_poll_interval).unwrap_or(Duration::from_secs(15));
        PollPolicy::new(interval, self.job_max_attempts)
    }

    pub fn local_timeout_duration(&self) -> Duration {
        parse_duration(&self.local_timeout).unwrap_or(Duration::from_secs(5))
    }

    fn poll_interval_duration(&self) -> Duration {
        parse_duration(&self.poll_interval).unwrap_or(Duration::from_secs(10))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.provider_type().is_none() {
            return Err(HarnessError::Config(format!(
                "Unknown provider '{}'. Supported providers: {:?}",
                self.provider,
                ProviderType::supported_names()
            )));
        }

        for (field, value) in [
            ("poll_interval", &self.poll_interval),
            ("job_poll_interval", &self.job_poll_interval),
            ("local_timeout", &self.local_timeout),
        ] {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                _ => {
                    return Err(HarnessError::Config(format!(
                        "Invalid {} '{}'. Use format like '10s', '5m', or '30'",
                        field, value
                    )))
                }
            }
        }

        for (field, value) in [
            ("max_attempts", self.max_attempts),
            ("install_max_attempts", self.install_max_attempts),
            ("job_max_attempts", self.job_max_attempts),
        ] {
            if value == 0 {
                return Err(HarnessError::Config(format!("{} must be at least 1", field)));
            }
        }

        if self.worker_user.is_empty() || self.job_user.is_empty() {
            return Err(HarnessError::Config(
                "worker_user and job_user must be set".to_string(),
            ));
        }

        Ok(())
    }

    /// Farm and queue IDs, which job submission cannot do without.
    pub fn farm_and_queue(&self) -> Result<(&str, &str)> {
        match (self.farm_id.as_deref(), self.queue_id.as_deref()) {
            (Some(farm), Some(queue)) => Ok((farm, queue)),
            _ => Err(HarnessError::Config(
                "farm_id and queue_id are required. Set FARMPROBE_FARM_ID and FARMPROBE_QUEUE_ID"
                    .to_string(),
            )),
        }
    }

    /// Copy with every secret masked, for display.
    pub fn redacted(&self) -> Self {
        let mask = |s: &str| {
            if s.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        };
        Self {
            api_token: mask(&self.api_token),
            staging_token: self.staging_token.as_deref().map(mask),
            jobs_token: self.jobs_token.as_deref().map(mask),
            ..self.clone()
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// One configuration layer. Unset fields leave earlier layers untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigLayer {
    pub provider: Option<String>,
    pub api_token: Option<String>,
    pub api_base: Option<String>,
    pub region: Option<String>,
    pub instance_type: Option<String>,
    pub image: Option<String>,
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
    pub instance_profile: Option<String>,
    pub bootstrap_bucket: Option<String>,
    pub staging_endpoint: Option<String>,
    pub staging_token: Option<String>,
    pub ssh_user: Option<String>,
    pub ssh_key_path: Option<String>,
    /// Appended to the mappings of earlier layers
    pub file_mappings: Vec<FileMapping>,
    /// Appended to the commands of earlier layers
    pub user_data_commands: Vec<String>,
    pub poll_interval: Option<String>,
    pub max_attempts: Option<u32>,
    pub install_max_attempts: Option<u32>,
    pub configure_script: Option<PathBuf>,
    pub worker_user: Option<String>,
    pub job_user: Option<String>,
    pub maya_archive: Option<PathBuf>,
    pub adaptor_whl: Option<String>,
    pub farm_id: Option<String>,
    pub queue_id: Option<String>,
    pub jobs_endpoint: Option<String>,
    pub jobs_token: Option<String>,
    pub bundles_dir: Option<PathBuf>,
    pub submit_cli: Option<String>,
    pub job_poll_interval: Option<String>,
    pub job_max_attempts: Option<u32>,
    pub local_runner: Option<String>,
    pub local_timeout: Option<String>,
}

macro_rules! overlay {
    ($layer:ident, $config:ident, [$($field:ident),* $(,)?], [$($opt:ident),* $(,)?]) => {
        $(
            if let Some(value) = $layer.$field {
                $config.$field = value;
            }
        )*
        $(
            if $layer.$opt.is_some() {
                $config.$opt = $layer.$opt;
            }
        )*
    };
}

impl ConfigLayer {
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| HarnessError::Config(format!("Invalid config: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Layer made of the environment variables the harness understands.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());
        Self {
            provider: var("FARMPROBE_PROVIDER"),
            api_token: var("FARMPROBE_API_TOKEN"),
            farm_id: var("FARMPROBE_FARM_ID"),
            queue_id: var("FARMPROBE_QUEUE_ID"),
            subnet_id: var("FARMPROBE_SUBNET_ID"),
            security_group_id: var("FARMPROBE_SECURITY_GROUP_ID"),
            bootstrap_bucket: var("FARMPROBE_BOOTSTRAP_BUCKET"),
            staging_endpoint: var("FARMPROBE_STAGING_ENDPOINT"),
            staging_token: var("FARMPROBE_STAGING_TOKEN"),
            jobs_endpoint: var("FARMPROBE_JOBS_ENDPOINT"),
            jobs_token: var("FARMPROBE_JOBS_TOKEN"),
            maya_archive: var("MAYA_2023_ARCHIVE_PATH").map(PathBuf::from),
            adaptor_whl: var("DEADLINE_CLOUD_FOR_MAYA_WHL"),
            bundles_dir: var("JOB_BUNDLE_TESTS_DIR").map(PathBuf::from),
            ..Default::default()
        }
    }

    pub fn apply_to(self, config: &mut HarnessConfig) {
        let layer = self;
        overlay!(
            layer,
            config,
            [
                provider,
                api_token,
                region,
                instance_type,
                image,
                ssh_user,
                ssh_key_path,
                poll_interval,
                max_attempts,
                install_max_attempts,
                configure_script,
                worker_user,
                job_user,
                adaptor_whl,
                bundles_dir,
                submit_cli,
                job_poll_interval,
                job_max_attempts,
                local_runner,
                local_timeout,
            ],
            [
                api_base,
                subnet_id,
                security_group_id,
                instance_profile,
                bootstrap_bucket,
                staging_endpoint,
                staging_token,
                maya_archive,
                farm_id,
                queue_id,
                jobs_endpoint,
                jobs_token,
            ]
        );
        config.file_mappings.extend(layer.file_mappings);
        config.user_data_commands.extend(layer.user_data_commands);
    }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String>>;

/// Assembles a [`HarnessConfig`] from its layers.
pub struct ConfigBuilder {
    files: Vec<ConfigLayer>,
    overrides: Vec<ConfigLayer>,
    env: EnvLookup,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            overrides: Vec::new(),
            env: Box::new(|name| std::env::var(name).ok()),
        }
    }

    /// Replace the process environment, mostly for tests.
    pub fn with_env(mut self, lookup: impl Fn(&str) -> Option<String> + 'static) -> Self {
        self.env = Box::new(lookup);
        self
    }

    pub fn file(mut self, path: &Path) -> Result<Self> {
        self.files.push(ConfigLayer::from_file(path)?);
        Ok(self)
    }

    /// Load `path` if given, otherwise the default config file when it exists.
    pub fn file_or_default(self, path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => self.file(path),
            None => {
                let default = HarnessConfig::config_path()?;
                if default.exists() {
                    tracing::debug!("Loading config from {}", default.display());
                    self.file(&default)
                } else {
                    Ok(self)
                }
            }
        }
    }

    pub fn layer(mut self, layer: ConfigLayer) -> Self {
        self.overrides.push(layer);
        self
    }

    pub fn build(self) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::default();

        for layer in self.files {
            layer.apply_to(&mut config);
        }
        ConfigLayer::from_env(&self.env).apply_to(&mut config);
        for layer in self.overrides {
            layer.apply_to(&mut config);
        }

        if config.api_token.is_empty() {
            if let Some(var) = config.provider_type().and_then(|p| p.token_env_var()) {
                if let Some(token) = (self.env)(var) {
                    config.api_token = token;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(hours) = s.strip_suffix('h') {
        hours.parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else if let Some(minutes) = s.strip_suffix('m') {
        minutes.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(seconds) = s.strip_suffix('s') {
        seconds.parse::<u64>().ok().map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

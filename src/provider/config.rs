//! Provider configuration types.
//!
//! These describe a disposable target independently of the platform that
//! runs it. Each provider maps them onto its own API.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A local file that must be present on the target at a fixed destination.
///
/// Mappings are fixed when the target spec is built and applied once during
/// provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMapping {
    source: PathBuf,
    destination: String,
}

impl FileMapping {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// Where the target is placed on the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPlacement {
    pub subnet_id: Option<String>,
    pub security_group_id: Option<String>,
}

/// Everything needed to provision one disposable target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Target name, also used as a label on the instance
    pub name: String,

    /// Region/datacenter location
    pub region: String,

    /// Instance shape identifier
    pub instance_type: String,

    /// Base image specification (provider resolves to actual image ID)
    pub image: ImageSpec,

    pub network: NetworkPlacement,

    /// Ordered file mappings, applied once during provisioning
    pub file_mappings: Vec<FileMapping>,

    /// Bucket the mapped files are staged through
    pub bootstrap_bucket: Option<String>,

    /// Identity the instance runs with, if the platform has one
    pub instance_profile: Option<String>,

    /// Login user on the target
    pub os_user: String,

    /// Extra shell commands appended to the bootstrap user data
    pub user_data_commands: Vec<String>,

    /// Rendered bootstrap user data (filled in by the session)
    pub user_data: Option<String>,

    pub labels: BTreeMap<String, String>,
}

impl TargetSpec {
    /// Create a new target spec with required fields
    pub fn new(
        name: impl Into<String>,
        region: impl Into<String>,
        instance_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            instance_type: instance_type.into(),
            image: ImageSpec::default(),
            network: NetworkPlacement::default(),
            file_mappings: Vec::new(),
            bootstrap_bucket: None,
            instance_profile: None,
            os_user: "root".to_string(),
            user_data_commands: Vec::new(),
            user_data: None,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_image(mut self, image: ImageSpec) -> Self {
        self.image = image;
        self
    }

    pub fn with_network(mut self, network: NetworkPlacement) -> Self {
        self.network = network;
        self
    }

    pub fn with_file_mapping(mut self, mapping: FileMapping) -> Self {
        self.file_mappings.push(mapping);
        self
    }

    pub fn with_file_mappings(mut self, mappings: impl IntoIterator<Item = FileMapping>) -> Self {
        self.file_mappings.extend(mappings);
        self
    }

    pub fn with_bootstrap_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bootstrap_bucket = Some(bucket.into());
        self
    }

    pub fn with_instance_profile(mut self, profile: impl Into<String>) -> Self {
        self.instance_profile = Some(profile.into());
        self
    }

    pub fn with_os_user(mut self, user: impl Into<String>) -> Self {
        self.os_user = user.into();
        self
    }

    pub fn with_user_data_command(mut self, command: impl Into<String>) -> Self {
        self.user_data_commands.push(command.into());
        self
    }

    pub fn with_user_data(mut self, user_data: impl Into<String>) -> Self {
        self.user_data = Some(user_data.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Image specification that providers resolve to their specific format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageSpec {
    /// Ubuntu LTS version (e.g., "24.04")
    Ubuntu(String),

    /// Debian version (e.g., "12")
    Debian(String),

    /// Provider-specific image ID or slug
    Custom(String),
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self::Ubuntu("24.04".to_string())
    }
}

impl ImageSpec {
    pub fn ubuntu(version: impl Into<String>) -> Self {
        Self::Ubuntu(version.into())
    }

    pub fn debian(version: impl Into<String>) -> Self {
        Self::Debian(version.into())
    }

    pub fn custom(id: impl Into<String>) -> Self {
        Self::Custom(id.into())
    }
}

/// How a provider gets file mappings onto a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingStrategy {
    /// Upload to the staging bucket, download during bootstrap
    Staged,
    /// Mount the local files directly when the target is created
    BindMount,
}

/// Timeout configuration for provider operations.
#[derive(Debug, Clone)]
pub struct ProviderTimeouts {
    /// How long to wait for an instance to become ready
    pub instance_ready: Duration,

    /// Interval between status poll requests
    pub poll_interval: Duration,

    /// HTTP request timeout
    pub http_request: Duration,

    /// How long to wait for the SSH port and login
    pub ssh_connect: Duration,

    /// How long bootstrap user data may take
    pub bootstrap: Duration,
}

impl Default for ProviderTimeouts {
    fn default() -> Self {
        Self {
            instance_ready: Duration::from_secs(300),
            poll_interval: Duration::from_secs(5),
            http_request: Duration::from_secs(30),
            ssh_connect: Duration::from_secs(300),
            bootstrap: Duration::from_secs(1800),
        }
    }
}

impl ProviderTimeouts {
    /// Calculate max attempts for an operation given poll interval
    pub fn max_attempts(&self, operation_timeout: Duration) -> u32 {
        (operation_timeout.as_millis() / self.poll_interval.as_millis().max(1)).max(1) as u32
    }

    pub fn instance_ready_attempts(&self) -> u32 {
        self.max_attempts(self.instance_ready)
    }

    pub fn bootstrap_attempts(&self) -> u32 {
        self.max_attempts(self.bootstrap)
    }
}

/// Supported compute providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    DigitalOcean,
    Docker,
}

impl ProviderType {
    pub fn all() -> &'static [ProviderType] {
        &[Self::DigitalOcean, Self::Docker]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalOcean => "digitalocean",
            Self::Docker => "docker",
        }
    }

    pub fn supported_names() -> Vec<String> {
        Self::all().iter().map(|p| p.as_str().to_string()).collect()
    }

    /// Parse provider type from string
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "digitalocean" | "do" => Some(Self::DigitalOcean),
            "docker" | "local" => Some(Self::Docker),
            _ => None,
        }
    }

    /// Environment variable holding the API token, if the provider needs one
    pub fn token_env_var(&self) -> Option<&'static str> {
        match self {
            Self::DigitalOcean => Some("DIGITALOCEAN_TOKEN"),
            Self::Docker => None,
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            format!(
                "Unknown provider '{}'. Supported: {:?}",
                s,
                Self::supported_names()
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_spec_builder_keeps_mapping_order() {
        let spec = TargetSpec::new("probe-1", "nyc1", "s-2vcpu-4gb")
            .with_image(ImageSpec::ubuntu("24.04"))
            .with_file_mapping(FileMapping::new("/a/MayaIO2023.run", "/MayaIO2023.run"))
            .with_file_mapping(FileMapping::new("/a/adaptor.whl", "/tmp/adaptor.whl"))
            .with_bootstrap_bucket("bootstrap-bucket")
            .with_label("farmprobe", "true");

        assert_eq!(spec.name, "probe-1");
        assert_eq!(spec.file_mappings.len(), 2);
        assert_eq!(spec.file_mappings[0].destination(), "/MayaIO2023.run");
        assert_eq!(spec.file_mappings[1].destination(), "/tmp/adaptor.whl");
        assert_eq!(spec.bootstrap_bucket.as_deref(), Some("bootstrap-bucket"));
        assert_eq!(spec.labels.get("farmprobe"), Some(&"true".to_string()));
    }

    #[test]
    fn test_image_spec_default() {
        assert_eq!(ImageSpec::default(), ImageSpec::Ubuntu("24.04".to_string()));
    }

    #[test]
    fn test_provider_timeouts_max_attempts() {
        let timeouts = ProviderTimeouts::default();
        assert_eq!(timeouts.instance_ready_attempts(), 60);
        assert_eq!(timeouts.bootstrap_attempts(), 360);
    }

    #[test]
    fn test_provider_type_from_name() {
        assert_eq!(
            ProviderType::from_name("digitalocean"),
            Some(ProviderType::DigitalOcean)
        );
        assert_eq!(ProviderType::from_name("DO"), Some(ProviderType::DigitalOcean));
        assert_eq!(ProviderType::from_name("local"), Some(ProviderType::Docker));
        assert_eq!(ProviderType::from_name("ec2"), None);
    }

    #[test]
    fn test_provider_type_token_env_var() {
        assert_eq!(
            ProviderType::DigitalOcean.token_env_var(),
            Some("DIGITALOCEAN_TOKEN")
        );
        assert_eq!(ProviderType::Docker.token_env_var(), None);
    }
}

//! Compute provider abstraction layer.
//!
//! The `Provider` trait is the contract the session uses to create, inspect
//! and terminate disposable targets, and to open a command channel to them.
//!
//! ```text
//! ┌─────────────────┐
//! │ ProviderRegistry│  ← Creates providers by name
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  dyn Provider   │  ← Common interface
//! └────────┬────────┘
//!          │
//!    ┌─────┴─────┐
//!    ▼           ▼
//! ┌──────┐   ┌────────┐
//! │  DO  │   │ Docker │  ← Implementations
//! └──────┘   └────────┘
//! ```

pub mod config;
pub mod digitalocean;
pub mod docker;
pub mod error;
pub mod registry;

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use config::{
    FileMapping, ImageSpec, MappingStrategy, NetworkPlacement, ProviderTimeouts, ProviderType,
    TargetSpec,
};
pub use error::{ProviderError, ProviderResult};
pub use registry::{ProviderRegistry, ProviderSettings};

use crate::config::HarnessConfig;
use crate::connector::CommandRunner;
use crate::error::Result;

/// Instance returned by provider operations.
#[derive(Debug, Clone)]
pub struct ProviderInstance {
    /// Provider-specific instance ID
    pub id: String,

    /// Reachable IP address (0.0.0.0 until assigned)
    pub ip: IpAddr,

    pub status: InstanceStatus,

    pub created_at: DateTime<Utc>,
}

/// Instance lifecycle status as reported by the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum InstanceStatus {
    New,
    Active,
    Off,
    Unknown(String),
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::New => write!(f, "new"),
            InstanceStatus::Active => write!(f, "active"),
            InstanceStatus::Off => write!(f, "off"),
            InstanceStatus::Unknown(s) => write!(f, "{}", s),
        }
    }
}

/// Core trait that all compute providers implement.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a new instance.
    ///
    /// Returns as soon as the platform has accepted the request and assigned
    /// an ID. Use `wait_ready` to wait for the instance to come up.
    async fn create_instance(&self, spec: &TargetSpec) -> ProviderResult<ProviderInstance>;

    /// Finish placing a freshly created instance (firewalls, start-up).
    ///
    /// Called once the caller has recorded the instance ID, so a failure here
    /// leaves cleanup to the caller's `destroy_instance`.
    async fn prepare_instance(
        &self,
        _instance: &ProviderInstance,
        _spec: &TargetSpec,
    ) -> ProviderResult<()> {
        Ok(())
    }

    /// Destroy an instance.
    ///
    /// Destroying an instance that no longer exists succeeds.
    async fn destroy_instance(&self, id: &str) -> ProviderResult<()>;

    /// Get instance details by ID, or `None` if it doesn't exist.
    async fn get_instance(&self, id: &str) -> ProviderResult<Option<ProviderInstance>>;

    /// Wait for an instance to be ready (active status + address assigned).
    async fn wait_ready(&self, id: &str) -> ProviderResult<ProviderInstance>;

    /// Open the channel commands are dispatched through.
    async fn command_runner(&self, instance: &ProviderInstance) -> Result<Arc<dyn CommandRunner>>;

    /// How file mappings reach the target.
    fn mapping_strategy(&self) -> MappingStrategy {
        MappingStrategy::Staged
    }

    /// Command that blocks until bootstrap user data has finished, if any.
    fn bootstrap_command(&self) -> Option<&'static str> {
        None
    }

    /// Poll budget for the bootstrap command.
    fn timeouts(&self) -> &ProviderTimeouts;
}

/// Create a provider from harness configuration.
pub fn create_provider(config: &HarnessConfig) -> Result<Arc<dyn Provider>> {
    let registry = ProviderRegistry::with_defaults();
    let settings = ProviderSettings::from(config);

    let provider = registry.create_by_name(&config.provider, &settings)?;
    Ok(Arc::from(provider))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_status_display() {
        assert_eq!(InstanceStatus::New.to_string(), "new");
        assert_eq!(InstanceStatus::Active.to_string(), "active");
        assert_eq!(InstanceStatus::Off.to_string(), "off");
        assert_eq!(
            InstanceStatus::Unknown("custom".to_string()).to_string(),
            "custom"
        );
    }

    #[test]
    fn test_create_provider_rejects_unknown_name() {
        let config = HarnessConfig {
            provider: "ec2".to_string(),
            ..Default::default()
        };
        let err = create_provider(&config).err().unwrap();
        assert!(err.to_string().contains("Unknown provider: ec2"));
    }
}

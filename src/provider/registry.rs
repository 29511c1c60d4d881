//! Provider registry for dynamic provider creation.
//!
//! Providers register a factory under their `ProviderType`; the harness
//! creates them by the name found in its configuration.

use std::collections::HashMap;
use std::sync::Arc;

use super::config::{ProviderTimeouts, ProviderType};
use super::error::{ProviderError, ProviderResult};
use super::Provider;
use crate::config::HarnessConfig;
use crate::ssh::SshConfig;

/// Settings every factory receives.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub token: String,
    /// Override for the provider API base URL
    pub api_base: Option<String>,
    pub timeouts: ProviderTimeouts,
    pub ssh: SshConfig,
}

impl From<&HarnessConfig> for ProviderSettings {
    fn from(config: &HarnessConfig) -> Self {
        Self {
            token: config.api_token.clone(),
            api_base: config.api_base.clone(),
            timeouts: ProviderTimeouts::default(),
            ssh: SshConfig::from(config),
        }
    }
}

/// Factory trait for creating provider instances.
pub trait ProviderFactory: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn create(&self, settings: &ProviderSettings) -> ProviderResult<Box<dyn Provider>>;
}

/// Registry for provider factories.
pub struct ProviderRegistry {
    factories: HashMap<ProviderType, Arc<dyn ProviderFactory>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with all built-in providers registered
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(super::digitalocean::DigitalOceanFactory);
        registry.register(super::docker::DockerFactory);
        registry
    }

    pub fn register<F: ProviderFactory + 'static>(&mut self, factory: F) {
        self.factories
            .insert(factory.provider_type(), Arc::new(factory));
    }

    pub fn create(
        &self,
        provider_type: ProviderType,
        settings: &ProviderSettings,
    ) -> ProviderResult<Box<dyn Provider>> {
        let factory = self.factories.get(&provider_type).ok_or_else(|| {
            ProviderError::other(format!("Provider {} not registered", provider_type))
        })?;

        factory.create(settings)
    }

    /// Create a provider by name string
    pub fn create_by_name(
        &self,
        name: &str,
        settings: &ProviderSettings,
    ) -> ProviderResult<Box<dyn Provider>> {
        let provider_type =
            ProviderType::from_name(name).ok_or_else(|| ProviderError::UnknownProvider {
                name: name.to_string(),
                supported: ProviderType::supported_names(),
            })?;

        self.create(provider_type, settings)
    }

    pub fn is_registered(&self, provider_type: ProviderType) -> bool {
        self.factories.contains_key(&provider_type)
    }
}

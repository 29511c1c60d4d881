//! DigitalOcean droplet provider.
//!
//! Subnets map to a VPC, security groups to a cloud firewall the droplet is
//! attached to after creation. Commands are dispatched over SSH.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::config::{ImageSpec, ProviderTimeouts, ProviderType, TargetSpec};
use super::error::{ProviderError, ProviderResult};
use super::registry::{ProviderFactory, ProviderSettings};
use super::{InstanceStatus, Provider, ProviderInstance};
use crate::connector::{CommandRunner, SshRunner};
use crate::environment::cloud_init::BOOTSTRAP_WAIT_COMMAND;
use crate::ssh::SshConfig;

const DEFAULT_API_BASE: &str = "https://api.digitalocean.com/v2";
const PROVIDER_NAME: &str = "digitalocean";

#[derive(Debug)]
pub struct DigitalOceanProvider {
    client: Client,
    token: String,
    base_url: String,
    timeouts: ProviderTimeouts,
    ssh: SshConfig,
}

impl DigitalOceanProvider {
    pub fn new(settings: &ProviderSettings) -> ProviderResult<Self> {
        let base_url = settings.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);
        Self::with_base_url(settings, base_url)
    }

    pub fn with_base_url(settings: &ProviderSettings, base_url: &str) -> ProviderResult<Self> {
        if settings.token.is_empty() {
            return Err(ProviderError::auth(
                PROVIDER_NAME,
                "API token is required. Set FARMPROBE_API_TOKEN or DIGITALOCEAN_TOKEN",
            ));
        }

        let client = Client::builder()
            .timeout(settings.timeouts.http_request)
            .build()?;

        Ok(Self {
            client,
            token: settings.token.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            timeouts: settings.timeouts.clone(),
            ssh: settings.ssh.clone(),
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    fn resolve_image(image: &ImageSpec) -> String {
        match image {
            ImageSpec::Ubuntu(version) => format!("ubuntu-{}-x64", version.replace('.', "-")),
            ImageSpec::Debian(version) => format!("debian-{}-x64", version),
            ImageSpec::Custom(id) => id.clone(),
        }
    }

    fn tags_for(spec: &TargetSpec) -> Vec<String> {
        let mut tags = vec!["farmprobe".to_string()];
        tags.extend(spec.labels.iter().map(|(k, v)| {
            format!("{}:{}", k, v)
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, ':' | '-' | '_') {
                        c
                    } else {
                        '-'
                    }
                })
                .collect()
        }));
        tags.dedup();
        tags
    }

    async fn error_from(response: Response, operation: &str) -> ProviderError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        ProviderError::from_response(PROVIDER_NAME, operation, status, retry_after, &body)
    }
}

#[derive(Debug, Serialize)]
struct CreateDropletRequest {
    name: String,
    region: String,
    size: String,
    image: String,
    ssh_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vpc_uuid: Option<String>,
    tags: Vec<String>,
    monitoring: bool,
}

#[derive(Debug, Serialize)]
struct FirewallDropletsRequest {
    droplet_ids: Vec<u64>,
}

#[derive(Debug, Deserialize)]
struct DropletResponse {
    droplet: DropletData,
}

#[derive(Debug, Deserialize)]
struct DropletData {
    id: u64,
    status: String,
    created_at: String,
    networks: Networks,
}

#[derive(Debug, Deserialize)]
struct Networks {
    v4: Vec<NetworkV4>,
}

#[derive(Debug, Deserialize)]
struct NetworkV4 {
    ip_address: String,
    #[serde(rename = "type")]
    network_type: String,
}

#[derive(Debug, Deserialize)]
struct SshKeysResponse {
    ssh_keys: Vec<SshKeyData>,
}

#[derive(Debug, Deserialize)]
struct SshKeyData {
    id: u64,
}

impl DropletData {
    fn to_instance(&self) -> ProviderInstance {
        let ip = self
            .get_public_ip()
            .unwrap_or(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));

        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|e| {
                tracing::warn!(
                    "Failed to parse droplet created_at '{}': {}. Using current time.",
                    self.created_at,
                    e
                );
                Utc::now()
            });

        let status = match self.status.as_str() {
            "new" => InstanceStatus::New,
            "active" => InstanceStatus::Active,
            "off" => InstanceStatus::Off,
            s => InstanceStatus::Unknown(s.to_string()),
        };

        ProviderInstance {
            id: self.id.to_string(),
            ip,
            status,
            created_at,
        }
    }

    fn get_public_ip(&self) -> Option<IpAddr> {
        self.networks
            .v4
            .iter()
            .find(|n| n.network_type == "public")
            .and_then(|n| n.ip_address.parse().ok())
    }
}

#[async_trait]
impl Provider for DigitalOceanProvider {
    fn name(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn create_instance(&self, spec: &TargetSpec) -> ProviderResult<ProviderInstance> {
        if let Some(profile) = &spec.instance_profile {
            tracing::warn!(
                "Instance profile '{}' has no DigitalOcean equivalent and is ignored",
                profile
            );
        }

        let ssh_keys = self.get_ssh_key_ids().await?;

        let request = CreateDropletRequest {
            name: spec.name.clone(),
            region: spec.region.clone(),
            size: spec.instance_type.clone(),
            image: Self::resolve_image(&spec.image),
            ssh_keys,
            user_data: spec.user_data.clone(),
            vpc_uuid: spec.network.subnet_id.clone(),
            tags: Self::tags_for(spec),
            monitoring: true,
        };

        let response = self
            .client
            .post(format!("{}/droplets", self.base_url))
            .header("Authorization", self.auth_header())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "create droplet").await);
        }

        let data: DropletResponse = response.json().await?;
        let droplet_id = data.droplet.id;
        tracing::info!("Created droplet {} ({})", droplet_id, spec.name);

        Ok(data.droplet.to_instance())
    }

    async fn prepare_instance(
        &self,
        instance: &ProviderInstance,
        spec: &TargetSpec,
    ) -> ProviderResult<()> {
        let Some(firewall_id) = &spec.network.security_group_id else {
            return Ok(());
        };
        let droplet_id = instance.id.parse::<u64>().map_err(|_| {
            ProviderError::other(format!("'{}' is not a droplet ID", instance.id))
        })?;
        self.attach_firewall(firewall_id, droplet_id).await
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        let response = self
            .client
            .delete(format!("{}/droplets/{}", self.base_url, id))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            return Err(Self::error_from(response, "destroy droplet").await);
        }

        Ok(())
    }

    async fn get_instance(&self, id: &str) -> ProviderResult<Option<ProviderInstance>> {
        let response = self
            .client
            .get(format!("{}/droplets/{}", self.base_url, id))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Ok(None);
        }

        if !response.status().is_success() {
            return Err(Self::error_from(response, "get droplet").await);
        }

        let data: DropletResponse = response.json().await?;
        Ok(Some(data.droplet.to_instance()))
    }

    async fn wait_ready(&self, id: &str) -> ProviderResult<ProviderInstance> {
        let max_attempts = self.timeouts.instance_ready_attempts().max(1);

        for _ in 0..max_attempts {
            match self.get_instance(id).await {
                Ok(Some(instance))
                    if instance.status == InstanceStatus::Active
                        && !instance.ip.is_unspecified() =>
                {
                    return Ok(instance);
                }
                Ok(Some(_)) => {}
                Ok(None) => return Err(ProviderError::not_found("droplet", id)),
                Err(e) if e.is_retryable() => {
                    tracing::warn!("Polling droplet {} failed, retrying: {}", id, e);
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }

        Err(ProviderError::timeout(
            format!("waiting for droplet {}", id),
            self.timeouts.instance_ready,
        ))
    }

    async fn command_runner(
        &self,
        instance: &ProviderInstance,
    ) -> crate::error::Result<Arc<dyn CommandRunner>> {
        let runner = SshRunner::connect(
            &instance.ip.to_string(),
            &self.ssh,
            self.timeouts.ssh_connect,
        )
        .await?;
        Ok(Arc::new(runner))
    }

    fn bootstrap_command(&self) -> Option<&'static str> {
        Some(BOOTSTRAP_WAIT_COMMAND)
    }

    fn timeouts(&self) -> &ProviderTimeouts {
        &self.timeouts
    }
}

impl DigitalOceanProvider {
    /// Fetches SSH key IDs from the DigitalOcean account.
    ///
    /// Returns an empty list if fetching fails, so creation can continue with
    /// keys injected through user data instead.
    async fn get_ssh_key_ids(&self) -> ProviderResult<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/account/keys", self.base_url))
            .header("Authorization", self.auth_header())
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(
                "Failed to fetch SSH keys from DigitalOcean (HTTP {}). \
                 Droplet will be created without pre-configured SSH keys.",
                response.status()
            );
            return Ok(vec![]);
        }

        let data: SshKeysResponse = response.json().await?;
        let keys: Vec<String> = data.ssh_keys.into_iter().map(|k| k.id.to_string()).collect();
        tracing::debug!("Found {} SSH key(s) in DigitalOcean account", keys.len());

        Ok(keys)
    }

    async fn attach_firewall(&self, firewall_id: &str, droplet_id: u64) -> ProviderResult<()> {
        let response = self
            .client
            .post(format!("{}/firewalls/{}/droplets", self.base_url, firewall_id))
            .header("Authorization", self.auth_header())
            .json(&FirewallDropletsRequest {
                droplet_ids: vec![droplet_id],
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, "attach firewall").await);
        }

        tracing::debug!("Attached firewall {} to droplet {}", firewall_id, droplet_id);
        Ok(())
    }
}

pub struct DigitalOceanFactory;

impl ProviderFactory for DigitalOceanFactory {
    fn provider_type(&self) -> ProviderType {
        ProviderType::DigitalOcean
    }

    fn create(&self, settings: &ProviderSettings) -> ProviderResult<Box<dyn Provider>> {
        Ok(Box::new(DigitalOceanProvider::new(settings)?))
    }
}

//! Docker provider implementation.
//!
//! Runs a target as a local container through the Docker API (bollard).
//! File mappings become read-only bind mounts, so nothing is staged.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{CreateImageOptions, ListImagesOptions};
use bollard::models::HostConfig;
use bollard::Docker;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;

use super::config::{ImageSpec, MappingStrategy, ProviderTimeouts, ProviderType, TargetSpec};
use super::error::{ProviderError, ProviderResult};
use super::registry::{ProviderFactory, ProviderSettings};
use super::{InstanceStatus, Provider, ProviderInstance};
use crate::connector::{docker::exec, CommandRunner, DockerRunner};

/// Docker provider implementation using bollard.
///
/// Communicates with the Docker daemon via its Unix socket.
pub struct DockerProvider {
    client: Docker,
    timeouts: ProviderTimeouts,
}

impl DockerProvider {
    pub fn new(timeouts: ProviderTimeouts) -> ProviderResult<Self> {
        let client = Docker::connect_with_socket_defaults()
            .map_err(|e| ProviderError::other(format!("Failed to connect to Docker socket: {}", e)))?;

        Ok(Self { client, timeouts })
    }

    /// Pull an image if not present locally.
    async fn ensure_image(&self, image: &str) -> ProviderResult<()> {
        let filters: HashMap<String, Vec<String>> =
            HashMap::from([("reference".to_string(), vec![image.to_string()])]);

        let images = self
            .client
            .list_images(Some(ListImagesOptions {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| ProviderError::other(format!("Failed to list images: {}", e)))?;

        if !images.is_empty() {
            tracing::debug!("Image {} already exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image {}...", image);
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        self.client
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| ProviderError::other(format!("Failed to pull image {}: {}", image, e)))?;

        Ok(())
    }

    /// Run the user data commands in order, stopping at the first failure.
    async fn run_user_data(&self, container_id: &str, spec: &TargetSpec) -> ProviderResult<()> {
        for command in &spec.user_data_commands {
            tracing::debug!("Running user data command: {}", command);
            let result = exec(&self.client, container_id, &spec.os_user, command)
                .await
                .map_err(|e| ProviderError::other(e.to_string()))?;
            if !result.success() {
                return Err(ProviderError::other(format!(
                    "User data command failed with exit code {}: {}",
                    result.exit_code, command
                )));
            }
        }
        Ok(())
    }
}

fn resolve_image(spec: &ImageSpec) -> String {
    match spec {
        ImageSpec::Ubuntu(version) => format!("ubuntu:{}", version),
        ImageSpec::Debian(version) => format!("debian:{}", version),
        ImageSpec::Custom(id) => id.clone(),
    }
}

/// Read-only bind mounts for every file mapping, in order.
fn bind_mounts(spec: &TargetSpec) -> Vec<String> {
    spec.file_mappings
        .iter()
        .map(|m| format!("{}:{}:ro", m.source().display(), m.destination()))
        .collect()
}

fn container_labels(spec: &TargetSpec) -> HashMap<String, String> {
    let mut labels = HashMap::new();
    labels.insert("farmprobe".to_string(), "true".to_string());
    labels.insert("farmprobe.target".to_string(), spec.name.clone());
    for (k, v) in &spec.labels {
        labels.insert(k.clone(), v.clone());
    }
    labels
}

fn container_status(state: Option<&str>) -> InstanceStatus {
    match state {
        Some("running") => InstanceStatus::Active,
        Some("created") => InstanceStatus::New,
        Some("exited") | Some("dead") => InstanceStatus::Off,
        Some(s) => InstanceStatus::Unknown(s.to_string()),
        None => InstanceStatus::Unknown("unknown".to_string()),
    }
}

fn is_missing(e: &bollard::errors::Error) -> bool {
    let text = e.to_string();
    text.contains("404") || text.contains("No such container")
}

fn localhost() -> std::net::IpAddr {
    std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST)
}

#[async_trait]
impl Provider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create_instance(&self, spec: &TargetSpec) -> ProviderResult<ProviderInstance> {
        for mapping in &spec.file_mappings {
            if !mapping.source().exists() {
                return Err(ProviderError::invalid_config(
                    "file_mappings",
                    format!("{} does not exist", mapping.source().display()),
                ));
            }
        }
        if spec.network.security_group_id.is_some() {
            tracing::debug!("Security groups do not apply to local containers");
        }

        let name = format!("{}-{}", spec.name, &uuid::Uuid::new_v4().to_string()[..8]);
        let image = resolve_image(&spec.image);
        self.ensure_image(&image).await?;

        let config = Config {
            image: Some(image),
            labels: Some(container_labels(spec)),
            host_config: Some(HostConfig {
                binds: Some(bind_mounts(spec)),
                network_mode: spec.network.subnet_id.clone(),
                ..Default::default()
            }),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            tty: Some(true),
            ..Default::default()
        };

        let container = self
            .client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| ProviderError::other(format!("Failed to create container: {}", e)))?;

        tracing::info!(
            "Container {} created (id: {})",
            name,
            &container.id[..12.min(container.id.len())]
        );

        Ok(ProviderInstance {
            id: container.id,
            ip: localhost(),
            status: InstanceStatus::New,
            created_at: Utc::now(),
        })
    }

    async fn prepare_instance(
        &self,
        instance: &ProviderInstance,
        spec: &TargetSpec,
    ) -> ProviderResult<()> {
        self.client
            .start_container(&instance.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| ProviderError::other(format!("Failed to start container: {}", e)))?;
        self.run_user_data(&instance.id, spec).await
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        // Already stopped containers are fine
        let _ = self
            .client
            .stop_container(id, Some(StopContainerOptions { t: 5 }))
            .await;

        match self
            .client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => {}
            Err(e) if is_missing(&e) => {}
            Err(e) => {
                return Err(ProviderError::other(format!(
                    "Failed to remove container: {}",
                    e
                )))
            }
        }

        tracing::info!("Container {} destroyed", &id[..12.min(id.len())]);
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> ProviderResult<Option<ProviderInstance>> {
        match self.client.inspect_container(id, None).await {
            Ok(info) => {
                let state = info.state.as_ref().and_then(|s| {
                    s.status
                        .as_ref()
                        .map(|status| format!("{:?}", status).to_lowercase())
                });
                let created_at = info
                    .created
                    .as_ref()
                    .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);

                Ok(Some(ProviderInstance {
                    id: info.id.unwrap_or_else(|| id.to_string()),
                    ip: localhost(),
                    status: container_status(state.as_deref()),
                    created_at,
                }))
            }
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(ProviderError::other(format!(
                "Failed to inspect container: {}",
                e
            ))),
        }
    }

    async fn wait_ready(&self, id: &str) -> ProviderResult<ProviderInstance> {
        let max_attempts = self.timeouts.instance_ready_attempts().max(1);

        for _ in 0..max_attempts {
            match self.get_instance(id).await? {
                Some(instance) if instance.status == InstanceStatus::Active => return Ok(instance),
                Some(instance) if instance.status == InstanceStatus::Off => {
                    return Err(ProviderError::other(format!(
                        "Container {} exited before becoming ready",
                        id
                    )))
                }
                Some(_) => {}
                None => return Err(ProviderError::not_found("container", id)),
            }
            tokio::time::sleep(self.timeouts.poll_interval).await;
        }

        Err(ProviderError::timeout(
            format!("waiting for container {}", id),
            self.timeouts.instance_ready,
        ))
    }

    async fn command_runner(
        &self,
        instance: &ProviderInstance,
    ) -> crate::error::Result<Arc<dyn CommandRunner>> {
        Ok(Arc::new(DockerRunner::new(self.client.clone(), &instance.id)))
    }

    fn mapping_strategy(&self) -> MappingStrategy {
        MappingStrategy::BindMount
    }

    fn timeouts(&self) -> &ProviderTimeouts {
        &self.timeouts
    }
}

/// Factory for creating Docker providers.
pub struct DockerFactory;

impl ProviderFactory for DockerFactory {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Docker
    }

    fn create(&self, settings: &ProviderSettings) -> ProviderResult<Box<dyn Provider>> {
        // No token, the daemon is reached through the local socket
        Ok(Box::new(DockerProvider::new(settings.timeouts.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::config::FileMapping;

    #[test]
    fn test_resolve_image() {
        assert_eq!(resolve_image(&ImageSpec::ubuntu("24.04")), "ubuntu:24.04");
        assert_eq!(resolve_image(&ImageSpec::debian("12")), "debian:12");
        assert_eq!(
            resolve_image(&ImageSpec::custom("rockylinux:9")),
            "rockylinux:9"
        );
    }

    #[test]
    fn test_bind_mounts_are_read_only_and_ordered() {
        let spec = TargetSpec::new("probe", "local", "local")
            .with_file_mapping(FileMapping::new("/data/MayaIO2023.run", "/MayaIO2023.run"))
            .with_file_mapping(FileMapping::new("/dist/adaptor.whl", "/tmp/adaptor.whl"));

        assert_eq!(
            bind_mounts(&spec),
            vec![
                "/data/MayaIO2023.run:/MayaIO2023.run:ro".to_string(),
                "/dist/adaptor.whl:/tmp/adaptor.whl:ro".to_string(),
            ]
        );
    }

    #[test]
    fn test_container_labels_include_target_name() {
        let spec = TargetSpec::new("probe-1", "local", "local").with_label("run", "nightly");
        let labels = container_labels(&spec);
        assert_eq!(labels.get("farmprobe"), Some(&"true".to_string()));
        assert_eq!(labels.get("farmprobe.target"), Some(&"probe-1".to_string()));
        assert_eq!(labels.get("run"), Some(&"nightly".to_string()));
    }

    #[test]
    fn test_container_status_mapping() {
        assert_eq!(container_status(Some("running")), InstanceStatus::Active);
        assert_eq!(container_status(Some("created")), InstanceStatus::New);
        assert_eq!(container_status(Some("exited")), InstanceStatus::Off);
        assert_eq!(container_status(Some("dead")), InstanceStatus::Off);
        assert_eq!(
            container_status(Some("paused")),
            InstanceStatus::Unknown("paused".to_string())
        );
    }

    #[test]
    fn test_factory_type() {
        assert_eq!(DockerFactory.provider_type(), ProviderType::Docker);
    }
}

//! In-memory providers, runners and stores for exercising sessions.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::connector::{
    CommandResult, CommandRunner, CommandStatus, InvocationId, InvocationTable,
};
use crate::error::{HarnessError, Result};
use crate::provider::{
    InstanceStatus, MappingStrategy, Provider, ProviderError, ProviderInstance, ProviderResult,
    ProviderTimeouts, TargetSpec,
};
use crate::staging::{ArtifactStore, StagedArtifact};

/// What a [`MockRunner`] does with a command. `None` never finishes.
pub type Responder = Box<dyn Fn(&str) -> Option<CommandResult> + Send + Sync>;

pub fn ok(stdout: &str) -> Option<CommandResult> {
    Some(CommandResult {
        exit_code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    })
}

pub fn exit(code: i32) -> Option<CommandResult> {
    Some(CommandResult {
        exit_code: code,
        stdout: String::new(),
        stderr: format!("exit {}", code),
    })
}

/// Runner that answers from a closure and records what was sent.
pub struct MockRunner {
    respond: Responder,
    sent: Mutex<Vec<String>>,
    invocations: Mutex<HashMap<InvocationId, String>>,
    polls: AtomicUsize,
}

impl MockRunner {
    pub fn new(respond: impl Fn(&str) -> Option<CommandResult> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            sent: Mutex::new(Vec::new()),
            invocations: Mutex::new(HashMap::new()),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(|_| ok(""))
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn send_command(&self, command: &str) -> Result<InvocationId> {
        let id = InvocationId::new();
        self.sent.lock().unwrap().push(command.to_string());
        self.invocations
            .lock()
            .unwrap()
            .insert(id.clone(), command.to_string());
        Ok(id)
    }

    async fn poll_command(&self, id: &InvocationId) -> Result<CommandStatus> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let command = self
            .invocations
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| HarnessError::InvalidState(format!("Unknown invocation {}", id)))?;

        Ok(match (self.respond)(&command) {
            Some(result) => CommandStatus::finished(result),
            None => CommandStatus::in_progress(),
        })
    }
}

/// Runner that really executes commands with the local `sh`.
#[derive(Default)]
pub struct LocalRunner {
    table: InvocationTable,
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn send_command(&self, command: &str) -> Result<InvocationId> {
        let command = command.to_string();
        Ok(self
            .table
            .spawn(async move {
                let output = tokio::process::Command::new("sh")
                    .arg("-c")
                    .arg(&command)
                    .output()
                    .await?;
                Ok(CommandResult {
                    exit_code: output.status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                })
            })
            .await)
    }

    async fn poll_command(&self, id: &InvocationId) -> Result<CommandStatus> {
        self.table.status(id).await
    }
}

/// Provider that keeps instances in memory.
pub struct MockProvider {
    runner: Arc<dyn CommandRunner>,
    strategy: MappingStrategy,
    timeouts: ProviderTimeouts,
    fail_create: bool,
    fail_prepare: bool,
    fail_ready: bool,
    fail_destroy: bool,
    next_id: AtomicUsize,
    created: Mutex<Vec<TargetSpec>>,
    destroyed: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            strategy: MappingStrategy::Staged,
            timeouts: ProviderTimeouts {
                poll_interval: Duration::from_millis(1),
                instance_ready: Duration::from_secs(5),
                ..Default::default()
            },
            fail_create: false,
            fail_prepare: false,
            fail_ready: false,
            fail_destroy: false,
            next_id: AtomicUsize::new(1),
            created: Mutex::new(Vec::new()),
            destroyed: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_ready(mut self) -> Self {
        self.fail_ready = true;
        self
    }

    pub fn failing_destroy(mut self) -> Self {
        self.fail_destroy = true;
        self
    }

    pub fn with_strategy(mut self, strategy: MappingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn created(&self) -> Vec<TargetSpec> {
        self.created.lock().unwrap().clone()
    }

    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }

    fn instance(id: &str) -> ProviderInstance {
        ProviderInstance {
            id: id.to_string(),
            ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            status: InstanceStatus::Active,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn create_instance(&self, spec: &TargetSpec) -> ProviderResult<ProviderInstance> {
        self.created.lock().unwrap().push(spec.clone());
        if self.fail_create {
            return Err(ProviderError::invalid_config(
                "instance_type",
                format!("{} is not offered", spec.instance_type),
            ));
        }
        let id = format!("i-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(Self::instance(&id))
    }

    async fn prepare_instance(
        &self,
        instance: &ProviderInstance,
        _spec: &TargetSpec,
    ) -> ProviderResult<()> {
        if self.fail_prepare {
            return Err(ProviderError::api(
                500,
                format!("attach firewall to {}: boom", instance.id),
            ));
        }
        Ok(())
    }

    async fn destroy_instance(&self, id: &str) -> ProviderResult<()> {
        self.destroyed.lock().unwrap().push(id.to_string());
        if self.fail_destroy {
            return Err(ProviderError::api(500, "terminate rejected"));
        }
        Ok(())
    }

    async fn get_instance(&self, id: &str) -> ProviderResult<Option<ProviderInstance>> {
        Ok(Some(Self::instance(id)))
    }

    async fn wait_ready(&self, id: &str) -> ProviderResult<ProviderInstance> {
        if self.fail_ready {
            return Err(ProviderError::timeout(
                format!("waiting for {}", id),
                self.timeouts.instance_ready,
            ));
        }
        Ok(Self::instance(id))
    }

    async fn command_runner(&self, _instance: &ProviderInstance) -> Result<Arc<dyn CommandRunner>> {
        Ok(Arc::clone(&self.runner))
    }

    fn mapping_strategy(&self) -> MappingStrategy {
        self.strategy
    }

    fn timeouts(&self) -> &ProviderTimeouts {
        &self.timeouts
    }
}

/// Store that records uploads and deletions.
#[derive(Default)]
pub struct MockStore {
    uploads: Mutex<Vec<(String, String)>>,
    deletes: Mutex<Vec<(String, String)>>,
}

impl MockStore {
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn deletes(&self) -> Vec<(String, String)> {
        self.deletes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactStore for MockStore {
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<StagedArtifact> {
        if !local.exists() {
            return Err(HarnessError::Staging(format!("{} missing", local.display())));
        }
        // Give concurrent sessions a chance to interleave
        tokio::task::yield_now().await;
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(StagedArtifact {
            bucket: bucket.to_string(),
            key: key.to_string(),
            url: format!("mock://{}/{}", bucket, key),
            download_header: None,
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        self.deletes
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string()));
        Ok(())
    }
}

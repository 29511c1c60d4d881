//! Remote execution sessions.
//!
//! A [`RemoteExecutionSession`] owns exactly one disposable target. It
//! provisions the target, applies the file mappings, dispatches commands with
//! fixed-interval polling and tears everything down again.
//!
//! ```text
//! Unprovisioned ─start─▶ Provisioning ─▶ Running ─stop─▶ Stopping ─▶ Stopped
//!                             │             │
//!                             └──▶ Failed ◀─┘
//! ```
//!
//! Prefer [`with_session`], which guarantees `stop` on every exit path.

mod chain;
mod scope;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::{CommandResult, CommandRunner};
use crate::environment::generate_cloud_init;
use crate::error::{HarnessError, Result};
use crate::provider::{
    FileMapping, MappingStrategy, NetworkPlacement, Provider, ProviderInstance, TargetSpec,
};
use crate::staging::{staging_key, ArtifactStore, StagedArtifact, StagedMapping};
use crate::utils::shell_quote;

pub use chain::CommandChain;
pub use scope::with_session;

/// Fixed-interval polling budget for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    pub fn from_secs(interval_secs: u64, max_attempts: u32) -> Self {
        Self::new(Duration::from_secs(interval_secs), max_attempts)
    }

    /// Roughly how long a command may run before it times out.
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_secs(10, 60)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetState {
    Unprovisioned,
    Provisioning,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unprovisioned => "unprovisioned",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// A provisioned target, owned by the session that created it.
#[derive(Debug, Clone)]
pub struct ExecutionTarget {
    name: String,
    network: NetworkPlacement,
    file_mappings: Vec<FileMapping>,
    instance: ProviderInstance,
}

impl ExecutionTarget {
    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &NetworkPlacement {
        &self.network
    }

    pub fn file_mappings(&self) -> &[FileMapping] {
        &self.file_mappings
    }

    pub fn ip(&self) -> std::net::IpAddr {
        self.instance.ip
    }
}

pub struct RemoteExecutionSession {
    session_id: String,
    provider: Arc<dyn Provider>,
    store: Option<Arc<dyn ArtifactStore>>,
    state: TargetState,
    /// Set as soon as the platform hands out an ID, before readiness
    instance_id: Option<String>,
    target: Option<ExecutionTarget>,
    runner: Option<Arc<dyn CommandRunner>>,
    staged: Vec<StagedArtifact>,
    teardown_attempted: bool,
}

impl RemoteExecutionSession {
    pub fn new(provider: Arc<dyn Provider>, store: Option<Arc<dyn ArtifactStore>>) -> Self {
        let session_id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self {
            session_id,
            provider,
            store,
            state: TargetState::Unprovisioned,
            instance_id: None,
            target: None,
            runner: None,
            staged: Vec::new(),
            teardown_attempted: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    pub fn target(&self) -> Option<&ExecutionTarget> {
        self.target.as_ref()
    }

    /// Provision a target and wait until every file mapping is in place.
    pub async fn start(&mut self, spec: TargetSpec) -> Result<&ExecutionTarget> {
        if self.state != TargetState::Unprovisioned {
            return Err(HarnessError::InvalidState(format!(
                "start called on a {} session",
                self.state
            )));
        }

        let name = spec.name.clone();
        self.state = TargetState::Provisioning;
        tracing::info!(
            "Provisioning {} on {} (session {})",
            name,
            self.provider.name(),
            self.session_id
        );

        match self.provision(spec).await {
            Ok(target) => {
                self.state = TargetState::Running;
                tracing::info!("Target {} ({}) is running", target.name(), target.id());
                Ok(&*self.target.insert(target))
            }
            Err(e) => {
                self.state = TargetState::Failed;
                tracing::error!("Provisioning {} failed: {}", name, e);
                Err(match e {
                    e @ HarnessError::Provisioning { .. } => e,
                    other => HarnessError::provisioning(name, other),
                })
            }
        }
    }

    async fn provision(&mut self, mut spec: TargetSpec) -> Result<ExecutionTarget> {
        let provider = Arc::clone(&self.provider);

        let staged = self.stage_mappings(&spec).await?;
        if provider.mapping_strategy() == MappingStrategy::Staged {
            spec.user_data = Some(generate_cloud_init(
                &self.session_id,
                &staged,
                &spec.user_data_commands,
            )?);
        }

        let created = provider.create_instance(&spec).await?;
        self.instance_id = Some(created.id.clone());
        tracing::debug!(
            "Instance {} accepted at {}, waiting for it to be ready",
            created.id,
            created.created_at.to_rfc3339()
        );
        provider.prepare_instance(&created, &spec).await?;

        let instance = provider.wait_ready(&created.id).await?;
        let runner = provider.command_runner(&instance).await?;
        self.runner = Some(Arc::clone(&runner));

        let timeouts = provider.timeouts();
        if let Some(command) = provider.bootstrap_command() {
            tracing::info!("Waiting for bootstrap on {}", instance.id);
            let policy = PollPolicy::new(timeouts.poll_interval, timeouts.bootstrap_attempts());
            execute(runner.as_ref(), command, policy).await?;
        }

        let policy = PollPolicy::new(
            timeouts.poll_interval,
            timeouts.instance_ready_attempts().max(1),
        );
        verify_mappings(runner.as_ref(), &spec.file_mappings, policy).await?;

        Ok(ExecutionTarget {
            name: spec.name,
            network: spec.network,
            file_mappings: spec.file_mappings,
            instance,
        })
    }

    /// Upload mapped files under this session's key prefix.
    async fn stage_mappings(&mut self, spec: &TargetSpec) -> Result<Vec<StagedMapping>> {
        if spec.file_mappings.is_empty()
            || self.provider.mapping_strategy() != MappingStrategy::Staged
        {
            return Ok(Vec::new());
        }

        let store = self.store.clone().ok_or_else(|| {
            HarnessError::Staging("file mappings need an artifact store".to_string())
        })?;
        let bucket = spec.bootstrap_bucket.clone().ok_or_else(|| {
            HarnessError::Staging("file mappings need a bootstrap bucket".to_string())
        })?;

        let mut staged = Vec::with_capacity(spec.file_mappings.len());
        for (index, mapping) in spec.file_mappings.iter().enumerate() {
            if !mapping.source().is_file() {
                return Err(HarnessError::Staging(format!(
                    "{} is not a file",
                    mapping.source().display()
                )));
            }

            let key = staging_key(&self.session_id, index, mapping.source());
            tracing::info!("Staging {} as {}", mapping.source().display(), key);
            let artifact = store.upload(mapping.source(), &bucket, &key).await?;
            self.staged.push(artifact.clone());
            staged.push(StagedMapping {
                artifact,
                destination: mapping.destination().to_string(),
            });
        }

        Ok(staged)
    }

    /// Dispatch a command on the running target and poll until it finishes.
    ///
    /// Never retries. A non-zero exit or an exhausted budget is returned as an
    /// error and leaves the target running.
    pub async fn run_command(&mut self, command: &str, policy: PollPolicy) -> Result<CommandResult> {
        if self.state != TargetState::Running {
            return Err(HarnessError::InvalidState(format!(
                "cannot run commands on a {} target",
                self.state
            )));
        }
        let runner = self
            .runner
            .clone()
            .ok_or_else(|| HarnessError::InvalidState("no command channel".to_string()))?;
        tracing::debug!("Running with a budget of {:?}: {}", policy.budget(), command);

        match execute(runner.as_ref(), command, policy).await {
            Ok(result) => Ok(result),
            Err(e @ HarnessError::CommandExecution { .. })
            | Err(e @ HarnessError::CommandTimeout { .. }) => Err(e),
            Err(e) => {
                self.state = TargetState::Failed;
                Err(e)
            }
        }
    }

    /// Run every step of `chain` as a single command.
    pub async fn run_chain(
        &mut self,
        chain: &CommandChain,
        policy: PollPolicy,
    ) -> Result<CommandResult> {
        if chain.is_empty() {
            return Err(HarnessError::InvalidState(
                "command chain has no steps".to_string(),
            ));
        }
        self.run_command(&chain.join(), policy).await
    }

    /// Tear the target down and remove staged objects.
    ///
    /// A no-op on a session that never produced a target or is already
    /// stopped. Teardown failures are logged and returned.
    pub async fn stop(&mut self) -> Result<()> {
        match self.state {
            TargetState::Unprovisioned | TargetState::Stopped => {
                tracing::debug!("Session {} has nothing to stop", self.session_id);
                return Ok(());
            }
            TargetState::Stopping => {
                return Err(HarnessError::InvalidState(
                    "stop is already in progress".to_string(),
                ));
            }
            TargetState::Provisioning | TargetState::Running | TargetState::Failed => {}
        }

        self.state = TargetState::Stopping;
        self.teardown_attempted = true;
        self.runner = None;

        let mut outcome = Ok(());
        if let Some(id) = self.instance_id.clone() {
            tracing::info!("Terminating target {}", id);
            match self.provider.destroy_instance(&id).await {
                Ok(()) => self.instance_id = None,
                Err(e) => {
                    outcome = Err(HarnessError::Teardown {
                        target: id,
                        source: Box::new(e.into()),
                    });
                }
            }
        }

        self.remove_staged().await;

        match outcome {
            Ok(()) => {
                self.state = TargetState::Stopped;
                tracing::info!("Session {} stopped", self.session_id);
                Ok(())
            }
            Err(e) => {
                tracing::error!("{}", e);
                self.state = TargetState::Failed;
                Err(e)
            }
        }
    }

    async fn remove_staged(&mut self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        for artifact in self.staged.drain(..) {
            if let Err(e) = store.delete(&artifact.bucket, &artifact.key).await {
                tracing::warn!("Failed to remove staged object {}: {}", artifact.key, e);
            }
        }
    }
}

impl Drop for RemoteExecutionSession {
    fn drop(&mut self) {
        if self.teardown_attempted {
            return;
        }
        let Some(id) = self.instance_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::warn!("Session dropped without stop, destroying {} in background", id);
                let provider = Arc::clone(&self.provider);
                handle.spawn(async move {
                    if let Err(e) = provider.destroy_instance(&id).await {
                        tracing::error!("Failed to destroy leaked target {}: {}", id, e);
                    }
                });
            }
            Err(_) => tracing::error!("Session dropped without stop, target {} leaked", id),
        }
    }
}

/// Dispatch `command` and poll it: sleep, poll, repeat up to the budget.
pub(crate) async fn execute(
    runner: &dyn CommandRunner,
    command: &str,
    policy: PollPolicy,
) -> Result<CommandResult> {
    let id = runner.send_command(command).await?;
    tracing::debug!("Invocation {}: {}", id, command);

    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(policy.interval).await;

        let status = runner.poll_command(&id).await?;
        tracing::debug!(
            "Invocation {} poll {}/{}: {}",
            id,
            attempt,
            policy.max_attempts,
            status.state
        );

        if let Some(result) = status.into_result() {
            if result.success() {
                return Ok(result);
            }
            return Err(HarnessError::CommandExecution {
                command: command.to_string(),
                result: Box::new(result),
            });
        }
    }

    Err(HarnessError::CommandTimeout {
        command: command.to_string(),
        attempts: policy.max_attempts,
        interval: policy.interval,
    })
}

async fn verify_mappings(
    runner: &dyn CommandRunner,
    mappings: &[FileMapping],
    policy: PollPolicy,
) -> Result<()> {
    let chain = mappings.iter().fold(CommandChain::new(), |chain, m| {
        chain.step(format!("test -e {}", shell_quote(m.destination())))
    });
    if chain.is_empty() {
        return Ok(());
    }

    match execute(runner, &chain.join(), policy).await {
        Ok(_) => Ok(()),
        Err(HarnessError::CommandExecution { command, .. }) => Err(HarnessError::Staging(
            format!("file mappings missing on target: {}", command),
        )),
        Err(e) => Err(e),
    }
}

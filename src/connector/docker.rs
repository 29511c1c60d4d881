//! Command runner for local Docker targets.
//!
//! Commands run through the bollard exec API inside the target container.

use async_trait::async_trait;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use futures::StreamExt;

use super::{CommandResult, CommandRunner, CommandStatus, InvocationId, InvocationTable};
use crate::error::{HarnessError, Result};

/// Runs commands inside one container.
pub struct DockerRunner {
    client: Docker,
    container_id: String,
    user: String,
    table: InvocationTable,
}

impl DockerRunner {
    pub fn new(client: Docker, container_id: &str) -> Self {
        Self::with_user(client, container_id, "root")
    }

    pub fn with_user(client: Docker, container_id: &str, user: &str) -> Self {
        Self {
            client,
            container_id: container_id.to_string(),
            user: user.to_string(),
            table: InvocationTable::new(),
        }
    }
}

/// Execute a non-interactive command and wait for its exit code.
pub async fn exec(
    client: &Docker,
    container_id: &str,
    user: &str,
    command: &str,
) -> Result<CommandResult> {
    let exec = client
        .create_exec(
            container_id,
            CreateExecOptions {
                cmd: Some(vec!["sh", "-c", command]),
                user: Some(user),
                attach_stdout: Some(true),
                attach_stderr: Some(true),
                ..Default::default()
            },
        )
        .await
        .map_err(|e| HarnessError::Other(anyhow::anyhow!("Failed to create exec: {}", e)))?;

    let output = client
        .start_exec(&exec.id, None::<StartExecOptions>)
        .await
        .map_err(|e| HarnessError::Other(anyhow::anyhow!("Failed to start exec: {}", e)))?;

    let (stdout, stderr) = match output {
        StartExecResults::Attached { mut output, .. } => {
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();

            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(bollard::container::LogOutput::StdOut { message }) => {
                        stdout.extend(message);
                    }
                    Ok(bollard::container::LogOutput::StdErr { message }) => {
                        stderr.extend(message);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("Error reading exec output: {}", e);
                    }
                }
            }

            (
                String::from_utf8_lossy(&stdout).to_string(),
                String::from_utf8_lossy(&stderr).to_string(),
            )
        }
        StartExecResults::Detached => {
            return Err(HarnessError::Other(anyhow::anyhow!(
                "Unexpected detached exec"
            )));
        }
    };

    let inspect = client
        .inspect_exec(&exec.id)
        .await
        .map_err(|e| HarnessError::Other(anyhow::anyhow!("Failed to inspect exec: {}", e)))?;

    Ok(CommandResult {
        exit_code: inspect.exit_code.unwrap_or(-1) as i32,
        stdout,
        stderr,
    })
}

#[async_trait]
impl CommandRunner for DockerRunner {
    async fn send_command(&self, command: &str) -> Result<InvocationId> {
        let client = self.client.clone();
        let container_id = self.container_id.clone();
        let user = self.user.clone();
        let command = command.to_string();

        let id = self
            .table
            .spawn(async move { exec(&client, &container_id, &user, &command).await })
            .await;
        tracing::debug!("Dispatched invocation {} to container {}", id, self.container_id);
        Ok(id)
    }

    async fn poll_command(&self, id: &InvocationId) -> Result<CommandStatus> {
        self.table.status(id).await
    }
}

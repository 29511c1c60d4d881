//! Command channels into a running target.
//!
//! A [`CommandRunner`] accepts a shell command, hands back an invocation ID
//! straight away and reports progress when polled. The session owns the
//! polling loop; runners only record what happened.

pub mod docker;
pub mod ssh;

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{HarnessError, Result};

pub use docker::DockerRunner;
pub use ssh::SshRunner;

/// Identifier of one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a dispatched command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvocationState {
    Pending,
    InProgress,
    Success,
    Failed,
    Cancelled,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Success => "Success",
            Self::Failed => "Failed",
            Self::Cancelled => "Cancelled",
        };
        write!(f, "{}", s)
    }
}

/// Output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// What a poll reports about an invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub state: InvocationState,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandStatus {
    pub fn pending() -> Self {
        Self {
            state: InvocationState::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn in_progress() -> Self {
        Self {
            state: InvocationState::InProgress,
            ..Self::pending()
        }
    }

    /// Status for a command that ran to completion.
    pub fn finished(result: CommandResult) -> Self {
        let state = if result.success() {
            InvocationState::Success
        } else {
            InvocationState::Failed
        };
        Self {
            state,
            exit_code: Some(result.exit_code),
            stdout: result.stdout,
            stderr: result.stderr,
        }
    }

    /// Status for a command whose channel broke before it reported back.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self {
            state: InvocationState::Cancelled,
            exit_code: None,
            stdout: String::new(),
            stderr: reason.into(),
        }
    }

    /// The final result, once the invocation is terminal.
    pub fn into_result(self) -> Option<CommandResult> {
        if !self.state.is_terminal() {
            return None;
        }
        Some(CommandResult {
            exit_code: self.exit_code.unwrap_or(-1),
            stdout: self.stdout,
            stderr: self.stderr,
        })
    }
}

/// Channel commands are dispatched through once a target is running.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Dispatch a command without waiting for it to finish.
    async fn send_command(&self, command: &str) -> Result<InvocationId>;

    /// Report the current status of a dispatched command.
    async fn poll_command(&self, id: &InvocationId) -> Result<CommandStatus>;
}

/// Shared record of invocations for runners that execute in background tasks.
#[derive(Clone, Default)]
pub struct InvocationTable {
    entries: Arc<Mutex<HashMap<InvocationId, CommandStatus>>>,
}

impl InvocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` in the background and record its outcome under a new ID.
    pub async fn spawn<F>(&self, work: F) -> InvocationId
    where
        F: Future<Output = Result<CommandResult>> + Send + 'static,
    {
        let id = InvocationId::new();
        self.entries
            .lock()
            .await
            .insert(id.clone(), CommandStatus::in_progress());

        let entries = Arc::clone(&self.entries);
        let task_id = id.clone();
        tokio::spawn(async move {
            let status = match work.await {
                Ok(result) => CommandStatus::finished(result),
                Err(e) => {
                    tracing::debug!("Invocation {} lost its channel: {}", task_id, e);
                    CommandStatus::cancelled(e.to_string())
                }
            };
            entries.lock().await.insert(task_id, status);
        });

        id
    }

    /// Current status of `id`. A terminal status is handed out once, then
    /// the entry is dropped.
    pub async fn status(&self, id: &InvocationId) -> Result<CommandStatus> {
        let mut entries = self.entries.lock().await;
        let status = entries
            .get(id)
            .cloned()
            .ok_or_else(|| HarnessError::InvalidState(format!("Unknown invocation {}", id)))?;
        if status.state.is_terminal() {
            entries.remove(id);
        }
        Ok(status)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_invocation_state_terminal() {
        assert!(!InvocationState::Pending.is_terminal());
        assert!(!InvocationState::InProgress.is_terminal());
        assert!(InvocationState::Success.is_terminal());
        assert!(InvocationState::Failed.is_terminal());
        assert!(InvocationState::Cancelled.is_terminal());
    }

    #[test]
    fn test_finished_status_maps_exit_code() {
        let ok = CommandStatus::finished(CommandResult {
            exit_code: 0,
            stdout: "hi\n".to_string(),
            stderr: String::new(),
        });
        assert_eq!(ok.state, InvocationState::Success);

        let failed = CommandStatus::finished(CommandResult {
            exit_code: 3,
            ..Default::default()
        });
        assert_eq!(failed.state, InvocationState::Failed);
        assert_eq!(failed.exit_code, Some(3));
    }

    #[test]
    fn test_into_result_only_when_terminal() {
        assert!(CommandStatus::in_progress().into_result().is_none());

        let cancelled = CommandStatus::cancelled("channel closed")
            .into_result()
            .unwrap();
        assert_eq!(cancelled.exit_code, -1);
        assert_eq!(cancelled.stderr, "channel closed");
    }

    #[tokio::test]
    async fn test_table_records_outcome() {
        let table = InvocationTable::new();
        let id = table
            .spawn(async {
                Ok(CommandResult {
                    exit_code: 0,
                    stdout: "done".to_string(),
                    stderr: String::new(),
                })
            })
            .await;

        let mut status = table.status(&id).await.unwrap();
        for _ in 0..50 {
            if status.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = table.status(&id).await.unwrap();
        }

        assert_eq!(status.state, InvocationState::Success);
        assert_eq!(status.stdout, "done");

        // Finished invocations are forgotten once reported
        assert!(table.entries.lock().await.is_empty());
        assert!(matches!(
            table.status(&id).await,
            Err(HarnessError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_table_marks_transport_error_cancelled() {
        let table = InvocationTable::new();
        let id = table
            .spawn(async { Err(HarnessError::Ssh("connection reset".to_string())) })
            .await;

        let mut status = table.status(&id).await.unwrap();
        for _ in 0..50 {
            if status.state.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = table.status(&id).await.unwrap();
        }

        assert_eq!(status.state, InvocationState::Cancelled);
        assert!(status.stderr.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_unknown_invocation_is_rejected() {
        let table = InvocationTable::new();
        let result = table.status(&InvocationId::new()).await;
        assert!(matches!(result, Err(HarnessError::InvalidState(_))));
    }
}

use std::time::Duration;

use thiserror::Error;

use crate::connector::CommandResult;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target creation was rejected or the target failed its readiness checks.
    #[error("Provisioning of {target} failed: {reason}")]
    Provisioning { target: String, reason: String },

    /// A dispatched command finished with a non-zero exit code.
    #[error("Command failed with exit code {}: {command}", .result.exit_code)]
    CommandExecution {
        command: String,
        result: Box<CommandResult>,
    },

    /// The polling budget ran out before the command reached a terminal state.
    #[error("Command did not finish after {attempts} polls every {interval:?}: {command}")]
    CommandTimeout {
        command: String,
        attempts: u32,
        interval: Duration,
    },

    #[error("Failed to stop target {target}: {source}")]
    Teardown {
        target: String,
        #[source]
        source: Box<HarnessError>,
    },

    /// The session body failed and the teardown that followed failed too.
    #[error("{original} (teardown also failed: {teardown})")]
    TeardownAfterFailure {
        original: Box<HarnessError>,
        teardown: Box<HarnessError>,
    },

    #[error("Invalid target state: {0}")]
    InvalidState(String),

    #[error("Provider error: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("Artifact staging failed: {0}")]
    Staging(String),

    #[error("SSH connection error: {0}")]
    Ssh(String),

    #[error("Job submission failed: {0}")]
    Submission(String),

    #[error("Job {job_id} finished with status {status}:\n{logs}")]
    JobFailed {
        job_id: String,
        status: String,
        logs: String,
    },

    #[error("Local bundle run failed: {0}")]
    LocalRun(String),

    #[error("Job {job_id} did not complete after {attempts} polls")]
    JobTimeout { job_id: String, attempts: u32 },

    #[error("API request failed: {0}")]
    Api(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("SSH protocol error: {0}")]
    SshProtocol(#[from] russh::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl HarnessError {
    pub fn provisioning(target: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Provisioning {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// The original failure, looking through a teardown wrapper.
    pub fn root(&self) -> &HarnessError {
        match self {
            Self::TeardownAfterFailure { original, .. } => original.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failed_result() -> CommandResult {
        CommandResult {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        }
    }

    #[test]
    fn test_command_execution_display_includes_exit_code_and_command() {
        let err = HarnessError::CommandExecution {
            command: "a && b".to_string(),
            result: Box::new(failed_result()),
        };
        assert_eq!(err.to_string(), "Command failed with exit code 2: a && b");
    }

    #[test]
    fn test_timeout_display() {
        let err = HarnessError::CommandTimeout {
            command: "sleep 999".to_string(),
            attempts: 3,
            interval: Duration::from_secs(10),
        };
        assert!(err.to_string().contains("after 3 polls every 10s"));
    }

    #[test]
    fn test_teardown_after_failure_keeps_both() {
        let err = HarnessError::TeardownAfterFailure {
            original: Box::new(HarnessError::Submission("exit 1".to_string())),
            teardown: Box::new(HarnessError::Teardown {
                target: "i-1".to_string(),
                source: Box::new(HarnessError::Config("api down".to_string())),
            }),
        };
        let text = err.to_string();
        assert!(text.contains("Job submission failed: exit 1"));
        assert!(text.contains("Failed to stop target i-1"));
        assert!(matches!(err.root(), HarnessError::Submission(_)));
    }
}

use tokio::process::Command;

use super::JobBundle;
use crate::error::{HarnessError, Result};
use crate::utils::truncate;

/// Wrapper around the job submission command line tool.
#[derive(Debug, Clone)]
pub struct SubmitCli {
    program: String,
}

impl SubmitCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Submit `bundle` to a farm queue, returning the new job ID.
    pub async fn submit(&self, bundle: &JobBundle, farm_id: &str, queue_id: &str) -> Result<String> {
        tracing::info!("Submitting bundle {} to queue {}", bundle.name, queue_id);

        let output = Command::new(&self.program)
            .args(["bundle", "submit"])
            .arg(&bundle.path)
            .args(["--farm-id", farm_id, "--queue-id", queue_id, "--yes"])
            .output()
            .await
            .map_err(|e| {
                HarnessError::Submission(format!("Failed to execute {}: {}", self.program, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(HarnessError::Submission(format!(
                "{} exited with {}: {}",
                self.program,
                output.status.code().unwrap_or(-1),
                truncate(stderr.trim(), 2000)
            )));
        }

        let job_id = parse_job_id(&stdout).ok_or_else(|| {
            HarnessError::Submission(format!("{} printed no job ID", self.program))
        })?;
        tracing::info!("Bundle {} submitted as {}", bundle.name, job_id);
        Ok(job_id)
    }
}

/// The job ID is the last non-empty line the submission tool prints,
/// without trailing whitespace.
pub fn parse_job_id(stdout: &str) -> Option<String> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .last()
        .map(|line| line.trim_end().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_tool(dir: &Path, body: &str) -> String {
        let path = dir.join("deadline");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_parse_job_id() {
        assert_eq!(
            parse_job_id("line1\nline2\nJOB-abc123\n").as_deref(),
            Some("JOB-abc123")
        );
        assert_eq!(parse_job_id("Submitted\njob-1\n\n  \n").as_deref(), Some("job-1"));
        assert_eq!(parse_job_id("\n\n"), None);
        assert_eq!(
            parse_job_id("Submitted:\n  job-7 \r\n").as_deref(),
            Some("  job-7")
        );
    }

    #[tokio::test]
    async fn test_submit_passes_arguments_and_parses_id() {
        let dir = tempfile::tempdir().unwrap();
        let args_file = dir.path().join("args");
        let tool = fake_tool(
            dir.path(),
            &format!(
                "echo \"$@\" > {}\necho 'Submitting to Queue: queue-1'\necho job-7f3a",
                args_file.display()
            ),
        );
        let bundle = JobBundle::new("cube", dir.path().join("cube"));

        let job_id = SubmitCli::new(tool)
            .submit(&bundle, "farm-1", "queue-1")
            .await
            .unwrap();

        assert_eq!(job_id, "job-7f3a");
        let args = std::fs::read_to_string(args_file).unwrap();
        assert_eq!(
            args.trim(),
            format!(
                "bundle submit {} --farm-id farm-1 --queue-id queue-1 --yes",
                dir.path().join("cube").display()
            )
        );
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "echo 'queue not found' >&2\nexit 2");
        let bundle = JobBundle::new("cube", dir.path());

        let err = SubmitCli::new(tool)
            .submit(&bundle, "farm-1", "queue-1")
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("exited with 2"));
        assert!(message.contains("queue not found"));
    }

    #[tokio::test]
    async fn test_submit_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let bundle = JobBundle::new("cube", dir.path());

        let err = SubmitCli::new(tool)
            .submit(&bundle, "farm-1", "queue-1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no job ID"));
    }

    #[tokio::test]
    async fn test_submit_missing_program() {
        let bundle = JobBundle::new("cube", "/tmp");
        let err = SubmitCli::new("/nonexistent/deadline")
            .submit(&bundle, "farm-1", "queue-1")
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Submission(_)));
    }
}

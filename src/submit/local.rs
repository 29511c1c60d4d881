use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::JobBundle;
use crate::error::{HarnessError, Result};

/// Run a bundle on this machine with the Open Job Description runner.
///
/// Output goes straight to the terminal. The run must exit cleanly within
/// `timeout`; a run still going at the deadline is killed.
pub async fn run_local(runner: &str, bundle: &JobBundle, timeout: Duration) -> Result<()> {
    tracing::info!("Running bundle {} locally with {}", bundle.name, runner);

    let mut child = Command::new(runner)
        .arg("run")
        .arg(&bundle.path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| HarnessError::LocalRun(format!("Failed to execute {}: {}", runner, e)))?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            let status = status?;
            if status.success() {
                Ok(())
            } else {
                Err(HarnessError::LocalRun(format!(
                    "{} exited with {} for bundle {}",
                    runner,
                    status.code().unwrap_or(-1),
                    bundle.name
                )))
            }
        }
        Err(_) => {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill {}: {}", runner, e);
            }
            Err(HarnessError::LocalRun(format!(
                "bundle {} still running after {:?}",
                bundle.name, timeout
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    fn fake_runner(dir: &Path, body: &str) -> String {
        let path = dir.join("openjd");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_run_local_success() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let runner = fake_runner(
            dir.path(),
            &format!("[ \"$1\" = run ] && touch {}", marker.display()),
        );
        let bundle = JobBundle::new("cube", dir.path());

        run_local(&runner, &bundle, Duration::from_secs(5)).await.unwrap();
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_run_local_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), "exit 4");
        let bundle = JobBundle::new("cube", dir.path());

        let err = run_local(&runner, &bundle, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exited with 4"));
    }

    #[tokio::test]
    async fn test_run_local_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let runner = fake_runner(dir.path(), "sleep 30");
        let bundle = JobBundle::new("cube", dir.path());

        let err = run_local(&runner, &bundle, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("still running"));
    }
}

//! Job query and log service.
//!
//! After a bundle is submitted the harness polls the job until its tasks
//! reach a terminal status, then fetches the session logs to decide the
//! outcome.

mod http;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use http::HttpJobService;

use crate::error::{HarnessError, Result};
use crate::session::PollPolicy;

/// Aggregate status of a job's task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskRunStatus {
    Pending,
    Ready,
    Assigned,
    Starting,
    Scheduled,
    Running,
    Interrupting,
    Suspended,
    Canceled,
    Failed,
    Succeeded,
    NotCompatible,
    #[serde(other)]
    Unknown,
}

impl TaskRunStatus {
    /// No further progress will happen on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Suspended | Self::Canceled | Self::Failed | Self::Succeeded | Self::NotCompatible
        )
    }
}

impl fmt::Display for TaskRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Assigned => "ASSIGNED",
            Self::Starting => "STARTING",
            Self::Scheduled => "SCHEDULED",
            Self::Running => "RUNNING",
            Self::Interrupting => "INTERRUPTING",
            Self::Suspended => "SUSPENDED",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
            Self::Succeeded => "SUCCEEDED",
            Self::NotCompatible => "NOT_COMPATIBLE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDetails {
    pub job_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub lifecycle_status: String,
    pub task_run_status: TaskRunStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Log events of a job, stream name to events in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobLogs {
    pub logs: BTreeMap<String, Vec<LogEvent>>,
}

impl JobLogs {
    pub fn event_count(&self) -> usize {
        self.logs.values().map(Vec::len).sum()
    }

    /// Every message, stream by stream, one per line.
    pub fn text(&self) -> String {
        self.logs
            .values()
            .flatten()
            .map(|event| event.message.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Where a job lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub farm_id: String,
    pub queue_id: String,
    pub job_id: String,
}

impl JobRef {
    pub fn new(farm_id: &str, queue_id: &str, job_id: &str) -> Self {
        Self {
            farm_id: farm_id.to_string(),
            queue_id: queue_id.to_string(),
            job_id: job_id.to_string(),
        }
    }
}

#[async_trait]
pub trait JobService: Send + Sync {
    async fn get_job_details(&self, job: &JobRef) -> Result<JobDetails>;

    async fn get_logs(&self, job: &JobRef) -> Result<JobLogs>;
}

/// Poll `job` at a fixed interval until its tasks reach a terminal status.
pub async fn wait_until_complete(
    service: &dyn JobService,
    job: &JobRef,
    policy: PollPolicy,
) -> Result<JobDetails> {
    for attempt in 1..=policy.max_attempts {
        let details = service.get_job_details(job).await?;
        tracing::debug!(
            "Job {} poll {}/{}: {}",
            job.job_id,
            attempt,
            policy.max_attempts,
            details.task_run_status
        );
        if details.task_run_status.is_terminal() {
            tracing::info!("Job {} finished: {}", job.job_id, details.task_run_status);
            return Ok(details);
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(HarnessError::JobTimeout {
        job_id: job.job_id.clone(),
        attempts: policy.max_attempts,
    })
}

/// Pass when every task succeeded, otherwise fail with the job's logs.
pub fn verify_job(details: &JobDetails, logs: &JobLogs) -> Result<()> {
    if details.task_run_status == TaskRunStatus::Succeeded {
        return Ok(());
    }
    Err(HarnessError::JobFailed {
        job_id: details.job_id.clone(),
        status: details.task_run_status.to_string(),
        logs: logs.text(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct ScriptedJobs {
        statuses: Mutex<Vec<TaskRunStatus>>,
        calls: Mutex<u32>,
    }

    impl ScriptedJobs {
        fn new(statuses: Vec<TaskRunStatus>) -> Self {
            Self {
                statuses: Mutex::new(statuses),
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl JobService for ScriptedJobs {
        async fn get_job_details(&self, job: &JobRef) -> Result<JobDetails> {
            *self.calls.lock().unwrap() += 1;
            let mut statuses = self.statuses.lock().unwrap();
            let status = if statuses.len() > 1 {
                statuses.remove(0)
            } else {
                statuses[0]
            };
            Ok(details(&job.job_id, status))
        }

        async fn get_logs(&self, _job: &JobRef) -> Result<JobLogs> {
            Ok(JobLogs::default())
        }
    }

    fn details(job_id: &str, status: TaskRunStatus) -> JobDetails {
        JobDetails {
            job_id: job_id.to_string(),
            name: None,
            lifecycle_status: "CREATE_COMPLETE".to_string(),
            task_run_status: status,
            created_at: None,
            ended_at: None,
        }
    }

    fn event(message: &str) -> LogEvent {
        LogEvent {
            timestamp: Utc::now(),
            message: message.to_string(),
        }
    }

    fn job() -> JobRef {
        JobRef::new("farm-1", "queue-1", "job-1")
    }

    #[test]
    fn test_status_parsing() {
        let status: TaskRunStatus = serde_json::from_str("\"NOT_COMPATIBLE\"").unwrap();
        assert_eq!(status, TaskRunStatus::NotCompatible);
        let status: TaskRunStatus = serde_json::from_str("\"SOMETHING_NEW\"").unwrap();
        assert_eq!(status, TaskRunStatus::Unknown);
        assert!(!TaskRunStatus::Running.is_terminal());
        assert!(TaskRunStatus::Failed.is_terminal());
    }

    #[test]
    fn test_logs_text_keeps_stream_order() {
        let mut logs = JobLogs::default();
        logs.logs.insert(
            "session-1".to_string(),
            vec![event("Rendering frame 1"), event("Rendering frame 2")],
        );
        logs.logs
            .insert("session-2".to_string(), vec![event("Exit code 0")]);

        assert_eq!(logs.event_count(), 3);
        assert_eq!(
            logs.text(),
            "Rendering frame 1\nRendering frame 2\nExit code 0"
        );
    }

    #[tokio::test]
    async fn test_wait_until_complete() {
        let service = ScriptedJobs::new(vec![
            TaskRunStatus::Ready,
            TaskRunStatus::Running,
            TaskRunStatus::Succeeded,
        ]);
        let details = wait_until_complete(&service, &job(), PollPolicy::new(Duration::from_millis(1), 10))
            .await
            .unwrap();

        assert_eq!(details.task_run_status, TaskRunStatus::Succeeded);
        assert_eq!(*service.calls.lock().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_until_complete_times_out() {
        let service = ScriptedJobs::new(vec![TaskRunStatus::Running]);
        let started = tokio::time::Instant::now();

        let err = wait_until_complete(&service, &job(), PollPolicy::from_secs(15, 4))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::JobTimeout { attempts: 4, .. }));
        assert_eq!(*service.calls.lock().unwrap(), 4);
        assert_eq!(started.elapsed(), Duration::from_secs(45));
    }

    #[test]
    fn test_verify_job() {
        let logs = JobLogs {
            logs: BTreeMap::from([(
                "session-1".to_string(),
                vec![event("MayaAdaptor: scene not found")],
            )]),
        };

        assert!(verify_job(&details("job-1", TaskRunStatus::Succeeded), &logs).is_ok());

        let err = verify_job(&details("job-1", TaskRunStatus::Failed), &logs).unwrap_err();
        match err {
            HarnessError::JobFailed {
                job_id,
                status,
                logs,
            } => {
                assert_eq!(job_id, "job-1");
                assert_eq!(status, "FAILED");
                assert!(logs.contains("scene not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;

use super::{JobDetails, JobLogs, JobRef, JobService};
use crate::error::{HarnessError, Result};

/// Job service reached over its JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpJobService {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpJobService {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        if base_url.is_empty() {
            return Err(HarnessError::Config(
                "Jobs endpoint is required. Set FARMPROBE_JOBS_ENDPOINT".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn job_url(&self, job: &JobRef) -> String {
        format!(
            "{}/farms/{}/queues/{}/jobs/{}",
            self.base_url, job.farm_id, job.queue_id, job.job_id
        )
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, job: &JobRef) -> Result<T> {
        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(HarnessError::Submission(format!(
                "Job {} not found in queue {}",
                job.job_id, job.queue_id
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarnessError::Other(anyhow::anyhow!(
                "Jobs API returned {} for {}: {}",
                status,
                url,
                body
            )));
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn get_job_details(&self, job: &JobRef) -> Result<JobDetails> {
        self.get_json(&self.job_url(job), job).await
    }

    async fn get_logs(&self, job: &JobRef) -> Result<JobLogs> {
        let url = format!("{}/logs", self.job_url(job));
        self.get_json(&url, job).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{wait_until_complete, TaskRunStatus};
    use crate::session::PollPolicy;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const JOB_PATH: &str = "/farms/farm-1/queues/queue-1/jobs/job-1";

    fn job() -> JobRef {
        JobRef::new("farm-1", "queue-1", "job-1")
    }

    fn job_body(status: &str) -> serde_json::Value {
        serde_json::json!({
            "jobId": "job-1",
            "name": "render_cube",
            "lifecycleStatus": "CREATE_COMPLETE",
            "taskRunStatus": status,
            "createdAt": "2026-10-17T09:00:00Z"
        })
    }

    #[tokio::test]
    async fn test_get_job_details() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JOB_PATH))
            .and(header("Authorization", "Bearer jobs-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("RUNNING")))
            .mount(&server)
            .await;

        let service = HttpJobService::new(&server.uri(), Some("jobs-token".to_string())).unwrap();
        let details = service.get_job_details(&job()).await.unwrap();

        assert_eq!(details.job_id, "job-1");
        assert_eq!(details.name.as_deref(), Some("render_cube"));
        assert_eq!(details.task_run_status, TaskRunStatus::Running);
        assert!(details.created_at.is_some());
    }

    #[tokio::test]
    async fn test_get_logs() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("{}/logs", JOB_PATH)))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "logs": {
                    "session-1": [
                        {"timestamp": "2026-10-17T09:01:00Z", "message": "Starting MayaAdaptor"},
                        {"timestamp": "2026-10-17T09:02:00Z", "message": "Render complete"}
                    ]
                }
            })))
            .mount(&server)
            .await;

        let service = HttpJobService::new(&server.uri(), None).unwrap();
        let logs = service.get_logs(&job()).await.unwrap();

        assert_eq!(logs.event_count(), 2);
        assert_eq!(logs.text(), "Starting MayaAdaptor\nRender complete");
    }

    #[tokio::test]
    async fn test_missing_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JOB_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let service = HttpJobService::new(&server.uri(), None).unwrap();
        let err = service.get_job_details(&job()).await.unwrap_err();
        assert!(err.to_string().contains("Job job-1 not found"));
    }

    #[tokio::test]
    async fn test_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JOB_PATH))
            .respond_with(ResponseTemplate::new(503).set_body_string("throttled"))
            .mount(&server)
            .await;

        let service = HttpJobService::new(&server.uri(), None).unwrap();
        let err = service.get_job_details(&job()).await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
    }

    #[tokio::test]
    async fn test_wait_against_http_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JOB_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("RUNNING")))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(JOB_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(job_body("SUCCEEDED")))
            .mount(&server)
            .await;

        let service = HttpJobService::new(&server.uri(), None).unwrap();
        let details = wait_until_complete(
            &service,
            &job(),
            PollPolicy::new(Duration::from_millis(1), 5),
        )
        .await
        .unwrap();
        assert_eq!(details.task_run_status, TaskRunStatus::Succeeded);
    }

    #[test]
    fn test_requires_endpoint() {
        assert!(HttpJobService::new("", None).is_err());
    }
}

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Body, Client};
use tokio_util::io::ReaderStream;

use super::{ArtifactStore, StagedArtifact};
use crate::error::{HarnessError, Result};

/// Bucket store speaking plain HTTP: `PUT`/`DELETE {endpoint}/{bucket}/{key}`.
#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpArtifactStore {
    pub fn new(endpoint: &str, token: Option<String>) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(HarnessError::Config(
                "Staging endpoint is required to stage file mappings. Set FARMPROBE_STAGING_ENDPOINT"
                    .to_string(),
            ));
        }

        let client = Client::builder()
            // Installer archives are large
            .timeout(Duration::from_secs(1800))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header("Authorization", format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<StagedArtifact> {
        let read_err = |e: std::io::Error| {
            HarnessError::Staging(format!("Failed to read {}: {}", local.display(), e))
        };
        let file = tokio::fs::File::open(local).await.map_err(read_err)?;
        let length = file.metadata().await.map_err(read_err)?.len();

        let url = self.object_url(bucket, key);
        tracing::debug!("Uploading {} ({} bytes) to {}", local.display(), length, url);

        // Installer archives run to several GB
        let body = Body::wrap_stream(ReaderStream::new(file));
        let response = self
            .authorized(self.client.put(&url))
            .header("Content-Type", "application/octet-stream")
            .header("Content-Length", length)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HarnessError::Staging(format!(
                "Upload of {} failed: {} - {}",
                key, status, text
            )));
        }

        Ok(StagedArtifact {
            bucket: bucket.to_string(),
            key: key.to_string(),
            url,
            download_header: self
                .token
                .as_ref()
                .map(|token| format!("Authorization: Bearer {}", token)),
        })
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let response = self
            .authorized(self.client.delete(self.object_url(bucket, key)))
            .send()
            .await?;

        if !response.status().is_success() && response.status().as_u16() != 404 {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(HarnessError::Staging(format!(
                "Delete of {} failed: {} - {}",
                key, status, text
            )));
        }

        Ok(())
    }
}

//! Command runner over SSH.
//!
//! Every dispatched command gets its own channel on a shared connection and
//! runs in a background task; polling reads the recorded outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandRunner, CommandStatus, InvocationId, InvocationTable};
use crate::error::Result;
use crate::ssh::{self, SshClient, SshConfig};

pub struct SshRunner {
    client: Arc<SshClient>,
    table: InvocationTable,
}

impl SshRunner {
    /// Connect to `host`, waiting up to `timeout` for the login to work.
    pub async fn connect(host: &str, config: &SshConfig, timeout: Duration) -> Result<Self> {
        tracing::debug!("Opening SSH channel to {}@{}", config.user, host);
        let client = ssh::connect_when_ready(host, 22, config, timeout).await?;
        Ok(Self::from_client(client))
    }

    pub fn from_client(client: SshClient) -> Self {
        Self {
            client: Arc::new(client),
            table: InvocationTable::new(),
        }
    }

    pub fn host(&self) -> &str {
        self.client.host()
    }
}

#[async_trait]
impl CommandRunner for SshRunner {
    async fn send_command(&self, command: &str) -> Result<InvocationId> {
        let client = Arc::clone(&self.client);
        let command = command.to_string();
        let id = self
            .table
            .spawn(async move { client.exec(&command).await })
            .await;
        tracing::debug!("Dispatched invocation {} to {}", id, self.host());
        Ok(id)
    }

    async fn poll_command(&self, id: &InvocationId) -> Result<CommandStatus> {
        self.table.status(id).await
    }
}

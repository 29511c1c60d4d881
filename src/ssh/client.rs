//! SSH client implementation using russh.
//!
//! Provides connection management and authentication.

use std::net::ToSocketAddrs;
use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Handle};
use tokio::net::UnixStream;
use tokio::sync::Mutex;

use crate::connector::CommandResult;
use crate::error::{HarnessError, Result};
use crate::ssh::config::{HostKeyPolicy, SshConfig};

/// SSH client wrapper over russh.
pub struct SshClient {
    session: Arc<Mutex<Handle<ClientHandler>>>,
    host: String,
}

impl SshClient {
    /// Connect to an SSH server.
    pub async fn connect(host: &str, port: u16, config: &SshConfig) -> Result<Self> {
        let russh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            // Installs can run for a long time without output
            keepalive_interval: Some(std::time::Duration::from_secs(15)),
            keepalive_max: 4,
            ..Default::default()
        });

        let addr = format!("{}:{}", host, port)
            .to_socket_addrs()
            .map_err(|e| HarnessError::Ssh(format!("Failed to resolve {}: {}", host, e)))?
            .next()
            .ok_or_else(|| HarnessError::Ssh(format!("No address found for {}", host)))?;

        let handler = ClientHandler {
            host_key_policy: config.host_key_policy,
        };

        let mut session = client::connect(russh_config, addr, handler)
            .await
            .map_err(|e| HarnessError::Ssh(format!("Connection failed: {}", e)))?;

        Self::authenticate(&mut session, config).await?;

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            host: host.to_string(),
        })
    }

    /// Authenticate with the agent first, then with the key file.
    async fn authenticate(session: &mut Handle<ClientHandler>, config: &SshConfig) -> Result<()> {
        match Self::auth_with_agent(session, config).await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                tracing::debug!("Agent authentication: server rejected all keys");
            }
            Err(e) => {
                tracing::debug!("Agent authentication failed: {}", e);
            }
        }

        Self::auth_with_key_file(session, config).await
    }

    async fn auth_with_agent(
        session: &mut Handle<ClientHandler>,
        config: &SshConfig,
    ) -> Result<bool> {
        let socket_path = std::env::var("SSH_AUTH_SOCK")
            .map_err(|_| HarnessError::Ssh("SSH_AUTH_SOCK not set".to_string()))?;

        let stream = UnixStream::connect(&socket_path)
            .await
            .map_err(|e| HarnessError::Ssh(format!("Failed to connect to agent: {}", e)))?;

        let mut agent = russh_keys::agent::client::AgentClient::connect(stream);

        let identities = agent
            .request_identities()
            .await
            .map_err(|e| HarnessError::Ssh(format!("Failed to get agent identities: {}", e)))?;

        tracing::debug!("Agent has {} identities", identities.len());

        for identity in identities {
            let auth_result = session
                .authenticate_publickey_with(&config.user, identity, &mut agent)
                .await;

            match auth_result {
                Ok(true) => return Ok(true),
                Ok(false) => continue,
                Err(e) => {
                    tracing::debug!("Agent auth error: {}", e);
                    continue;
                }
            }
        }

        Ok(false)
    }

    async fn auth_with_key_file(
        session: &mut Handle<ClientHandler>,
        config: &SshConfig,
    ) -> Result<()> {
        let key = russh_keys::load_secret_key(&config.key_path, None).map_err(|e| {
            HarnessError::Ssh(format!(
                "Failed to load key {}: {}",
                config.key_path.display(),
                e
            ))
        })?;

        let authenticated = session
            .authenticate_publickey(&config.user, Arc::new(key))
            .await
            .map_err(|e| HarnessError::Ssh(format!("Authentication failed: {}", e)))?;

        if authenticated {
            Ok(())
        } else {
            Err(HarnessError::Ssh(format!(
                "Authentication as {} was rejected. Key may require a passphrase - use ssh-add first.",
                config.user
            )))
        }
    }

    /// Execute a command on the remote host (non-interactive).
    pub async fn exec(&self, command: &str) -> Result<CommandResult> {
        let session = self.session.lock().await;
        crate::ssh::exec::exec_command(&session, command).await
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Client handler for russh connection callbacks.
pub struct ClientHandler {
    pub host_key_policy: HostKeyPolicy,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = HarnessError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_policy {
            HostKeyPolicy::AcceptAny => Ok(true),
        }
    }
}

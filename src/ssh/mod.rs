//! Pure Rust SSH transport for cloud targets.
//!
//! - [`client`] - connection management and authentication
//! - [`exec`] - remote command execution

mod client;
pub mod config;
mod exec;

pub use client::SshClient;
pub use config::SshConfig;

use std::time::Duration;

use tokio::net::TcpStream;

use crate::error::{HarnessError, Result};

/// Wait for the SSH port to accept TCP connections.
pub async fn wait_for_ssh(host: &str, port: u16, timeout: Duration) -> Result<()> {
    let start = tokio::time::Instant::now();
    let addr = format!("{}:{}", host, port);

    while start.elapsed() < timeout {
        match TcpStream::connect(&addr).await {
            Ok(_) => return Ok(()),
            Err(_) => {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    Err(HarnessError::Ssh(format!(
        "Timeout waiting for SSH port on {}",
        addr
    )))
}

/// Connect and authenticate, retrying until the login user exists.
///
/// Fresh instances open port 22 before cloud-init has created the user.
pub async fn connect_when_ready(
    host: &str,
    port: u16,
    config: &SshConfig,
    timeout: Duration,
) -> Result<SshClient> {
    wait_for_ssh(host, port, timeout).await?;

    let start = tokio::time::Instant::now();
    let mut last_error = None;

    while start.elapsed() < timeout {
        match SshClient::connect(host, port, config).await {
            Ok(client) => match client.exec("echo ok").await {
                Ok(output) if output.success() => return Ok(client),
                Ok(output) => {
                    last_error = Some(format!("probe exited with {}", output.exit_code));
                }
                Err(e) => last_error = Some(e.to_string()),
            },
            Err(e) => last_error = Some(e.to_string()),
        }

        tokio::time::sleep(Duration::from_secs(3)).await;
    }

    Err(HarnessError::Ssh(format!(
        "Timeout waiting for SSH login as {}@{}: {}",
        config.user,
        host,
        last_error.unwrap_or_else(|| "no attempt completed".to_string())
    )))
}

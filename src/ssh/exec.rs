//! Remote command execution.
//!
//! Non-interactive command execution with stdout/stderr capture.

use russh::client::Handle;
use russh::ChannelMsg;

use crate::connector::CommandResult;
use crate::error::{HarnessError, Result};
use crate::ssh::client::ClientHandler;

/// Wrap a command so it runs in a clean, non-interactive bash.
pub fn wrap_command(command: &str) -> String {
    format!(
        "bash --norc --noprofile -c '{}'",
        command.replace('\'', "'\\''")
    )
}

/// Execute a command on the remote host and wait for it to exit.
pub async fn exec_command(session: &Handle<ClientHandler>, command: &str) -> Result<CommandResult> {
    let wrapped_command = wrap_command(command);

    let mut channel = session
        .channel_open_session()
        .await
        .map_err(|e| HarnessError::Ssh(format!("Failed to open channel: {}", e)))?;

    channel
        .exec(true, wrapped_command.as_bytes())
        .await
        .map_err(|e| HarnessError::Ssh(format!("Failed to execute command: {}", e)))?;

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut exit_code: Option<u32> = None;

    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                if ext == 1 {
                    stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Close) | None => {
                break;
            }
            _ => {}
        }
    }

    // A channel that closes without an exit status was killed by a signal.
    let exit_code = exit_code.map(|c| c as i32).unwrap_or(-1);

    Ok(CommandResult {
        exit_code,
        stdout: String::from_utf8_lossy(&stdout).to_string(),
        stderr: String::from_utf8_lossy(&stderr).to_string(),
    })
}

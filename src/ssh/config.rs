//! SSH connection configuration.

use std::path::PathBuf;

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// SSH username.
    pub user: String,

    /// Path to the private key file.
    pub key_path: PathBuf,

    /// Host key verification policy.
    pub host_key_policy: HostKeyPolicy,
}

/// Host key verification policy.
///
/// Targets are created fresh for every session, so there is never a
/// previously recorded key to compare against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    #[default]
    AcceptAny,
}

impl SshConfig {
    pub fn new(user: impl Into<String>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            key_path: key_path.into(),
            host_key_policy: HostKeyPolicy::AcceptAny,
        }
    }
}

impl From<&crate::config::HarnessConfig> for SshConfig {
    fn from(config: &crate::config::HarnessConfig) -> Self {
        let key_path = shellexpand::tilde(&config.ssh_key_path).to_string();
        Self::new(&config.ssh_user, key_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssh_config_new() {
        let config = SshConfig::new("ec2-user", "/path/to/key");

        assert_eq!(config.user, "ec2-user");
        assert_eq!(config.key_path, PathBuf::from("/path/to/key"));
        assert_eq!(config.host_key_policy, HostKeyPolicy::AcceptAny);
    }

    #[test]
    fn test_ssh_config_from_harness_config() {
        let harness = crate::config::HarnessConfig {
            ssh_user: "worker".to_string(),
            ssh_key_path: "/keys/id_ed25519".to_string(),
            ..Default::default()
        };
        let config = SshConfig::from(&harness);
        assert_eq!(config.user, "worker");
        assert_eq!(config.key_path, PathBuf::from("/keys/id_ed25519"));
    }
}

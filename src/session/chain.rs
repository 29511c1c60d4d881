use std::fmt;

use crate::utils::shell_quote;

/// Shell steps that run as one unit, joined with `&&`.
///
/// The first failing step stops the chain, and the failure is reported
/// against the whole joined command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandChain {
    steps: Vec<String>,
}

impl CommandChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(mut self, command: impl Into<String>) -> Self {
        self.steps.push(command.into());
        self
    }

    /// Export an environment variable for the remaining steps.
    pub fn export(self, name: &str, value: &str) -> Self {
        let step = format!("export {}={}", name, shell_quote(value));
        self.step(step)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn join(&self) -> String {
        self.steps.join(" && ")
    }
}

impl fmt::Display for CommandChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.join())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_uses_and_operator() {
        let chain = CommandChain::new().step("a").step("b").step("c");
        assert_eq!(chain.join(), "a && b && c");
        assert_eq!(chain.len(), 3);
    }

    #[test]
    fn test_export_quotes_value() {
        let chain = CommandChain::new()
            .export("WORKER_USER", "deadline-worker")
            .export("NOTE", "two words");
        assert_eq!(
            chain.join(),
            "export WORKER_USER=deadline-worker && export NOTE='two words'"
        );
    }

    #[test]
    fn test_empty_chain() {
        let chain = CommandChain::new();
        assert!(chain.is_empty());
        assert_eq!(chain.to_string(), "");
    }
}

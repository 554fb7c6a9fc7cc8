//! Error types for Gas Town.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Address errors
    #[error("Invalid worker address {input:?}: {reason}")]
    InvalidAddress { input: String, reason: String },

    // Machine errors
    #[error("Machine not found: {0}")]
    MachineNotFound(String),

    #[error("Connection to {machine} failed: {reason}")]
    ConnectionFailed { machine: String, reason: String },

    #[error("Connection to {machine} lost")]
    ConnectionLost { machine: String },

    // Command errors
    #[error("Command `{command}` exited with status {exit_code}: {stderr}")]
    Command {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Command cancelled: {0}")]
    Cancelled(String),

    // Session errors
    #[error("Timeout waiting for response after {elapsed:?}")]
    Timeout { elapsed: Duration },

    // Scheduling errors
    #[error("Blocking status of {issue_id} is unknown: {reason}")]
    IndeterminateBlocking { issue_id: String, reason: String },

    #[error("Issue not found: {0}")]
    IssueNotFound(String),

    #[error("Convoy not found: {0}")]
    ConvoyNotFound(String),

    #[error("Issue {issue_id} cannot move from {from} to {to}")]
    InvalidTransition {
        issue_id: String,
        from: String,
        to: String,
    },

    #[error("Dispatch of {issue_id} failed ({}): {source}", source.kind())]
    DispatchFailed {
        issue_id: String,
        #[source]
        source: Box<Error>,
    },

    // Infrastructure errors
    #[error("Issue store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Short, stable label for the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidAddress { .. } => "parse",
            Error::MachineNotFound(_) | Error::IssueNotFound(_) | Error::ConvoyNotFound(_) => {
                "not_found"
            }
            Error::ConnectionFailed { .. } | Error::ConnectionLost { .. } => "connection",
            Error::Command { .. } => "command",
            Error::Cancelled(_) => "cancelled",
            Error::Timeout { .. } => "timeout",
            Error::IndeterminateBlocking { .. } => "indeterminate_blocking",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::DispatchFailed { source, .. } => source.kind(),
            Error::Store(_) => "store",
            Error::Config(_) => "config",
            Error::Io(_) => "io",
            Error::Serialization(_) => "serialization",
        }
    }

    /// True when the remote channel failed or went away, meaning the registry
    /// entry for the machine should be re-resolved.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::ConnectionFailed { .. } | Error::ConnectionLost { .. } => true,
            Error::DispatchFailed { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    pub fn dispatch_failed(issue_id: impl Into<String>, source: Error) -> Self {
        Error::DispatchFailed {
            issue_id: issue_id.into(),
            source: Box::new(source),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_failure_names_issue_and_kind() {
        let err = Error::dispatch_failed(
            "gt-abc",
            Error::ConnectionLost {
                machine: "gpu-1".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("gt-abc"));
        assert!(msg.contains("connection"));
        assert!(err.is_connection_error());
        assert_eq!(err.kind(), "connection");
    }

    #[test]
    fn test_timeout_reports_elapsed() {
        let err = Error::Timeout {
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "Timeout waiting for response after 30s");
    }
}

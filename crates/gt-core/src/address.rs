//! Structured worker addresses of the form `[machine:]rig/worker`.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

/// Machine name used when an address carries no machine segment.
pub const LOCAL_MACHINE: &str = "local";

static ADDRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:([^:/]+):)?([^/:]+)/([^/:]+)$").expect("worker address pattern is valid")
});

/// Identifies one worker: which machine it lives on, which rig, which worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerAddress {
    pub machine: String,
    pub rig: String,
    pub worker: String,
}

impl WorkerAddress {
    pub fn new(
        machine: impl Into<String>,
        rig: impl Into<String>,
        worker: impl Into<String>,
    ) -> Self {
        Self {
            machine: machine.into(),
            rig: rig.into(),
            worker: worker.into(),
        }
    }

    /// Parse `[machine:]rig/worker`.
    pub fn parse(input: &str) -> Result<Self> {
        let caps = ADDRESS_RE.captures(input).ok_or_else(|| Error::InvalidAddress {
            input: input.to_string(),
            reason: "expected [machine:]rig/worker".to_string(),
        })?;

        let machine = caps.get(1).map_or(LOCAL_MACHINE, |m| m.as_str());
        Ok(Self::new(machine, &caps[2], &caps[3]))
    }

    pub fn is_local(&self) -> bool {
        self.machine == LOCAL_MACHINE
    }

    /// Name of the tmux session the worker runs in.
    pub fn session_name(&self) -> String {
        format!("gt-{}-{}", self.rig, self.worker)
    }

    /// Inbox path relative to the machine's workspace root.
    pub fn inbox_path(&self) -> String {
        format!("{}/{}/mail/inbox.jsonl", self.rig, self.worker)
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_local() {
            write!(f, "{}/{}", self.rig, self.worker)
        } else {
            write!(f, "{}:{}/{}", self.machine, self.rig, self.worker)
        }
    }
}

impl FromStr for WorkerAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for WorkerAddress {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<WorkerAddress> for String {
    fn from(addr: WorkerAddress) -> Self {
        addr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_rig_worker_defaults_to_local() {
        for input in ["gastown/alpha", "frontend/nux", "a/b"] {
            let addr = WorkerAddress::parse(input).unwrap();
            assert_eq!(addr.machine, "local");
            assert!(addr.is_local());
        }
    }

    #[test]
    fn test_machine_prefix_yields_three_segments() {
        let addr: WorkerAddress = "gpu-box:gastown/alpha".parse().unwrap();
        assert_eq!(addr, WorkerAddress::new("gpu-box", "gastown", "alpha"));
        assert_eq!(addr.to_string(), "gpu-box:gastown/alpha");
    }

    #[test]
    fn test_malformed_addresses_fail() {
        for input in [
            "",
            "gastown",
            "gpu-box:gastown",
            "gastown/",
            "/alpha",
            "a:b:c/d",
            "gastown/alpha/extra",
            ":gastown/alpha",
        ] {
            let err = WorkerAddress::parse(input).unwrap_err();
            assert!(matches!(err, Error::InvalidAddress { .. }), "{input}");
        }
    }

    #[test]
    fn test_session_and_inbox_paths() {
        let addr = WorkerAddress::parse("gastown/alpha").unwrap();
        assert_eq!(addr.session_name(), "gt-gastown-alpha");
        assert_eq!(addr.inbox_path(), "gastown/alpha/mail/inbox.jsonl");
    }

    #[test]
    fn test_serde_uses_string_form() {
        let addr = WorkerAddress::parse("box:rig/w").unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"box:rig/w\"");
        let back: WorkerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
        assert!(serde_json::from_str::<WorkerAddress>("\"nope\"").is_err());
    }
}

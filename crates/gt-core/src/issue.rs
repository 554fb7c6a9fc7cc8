//! Tracked issues and convoys as seen by the dispatch engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a tracked issue. Statuses this engine does not act on are kept
/// verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IssueStatus {
    Open,
    InProgress,
    Hooked,
    Closed,
    Other(String),
}

impl IssueStatus {
    pub fn as_str(&self) -> &str {
        match self {
            IssueStatus::Open => "open",
            IssueStatus::InProgress => "in_progress",
            IssueStatus::Hooked => "hooked",
            IssueStatus::Closed => "closed",
            IssueStatus::Other(s) => s,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, IssueStatus::Closed)
    }
}

impl From<String> for IssueStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "open" => IssueStatus::Open,
            "in_progress" => IssueStatus::InProgress,
            "hooked" => IssueStatus::Hooked,
            "closed" => IssueStatus::Closed,
            _ => IssueStatus::Other(value),
        }
    }
}

impl From<&str> for IssueStatus {
    fn from(value: &str) -> Self {
        IssueStatus::from(value.to_string())
    }
}

impl From<IssueStatus> for String {
    fn from(status: IssueStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for IssueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work owned by the external issue store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: IssueStatus,
    /// Worker address string, empty when unassigned.
    #[serde(default)]
    pub assignee: String,
    /// Empty means `task`.
    #[serde(default)]
    pub issue_type: String,
}

impl TrackedIssue {
    pub fn new(id: impl Into<String>, status: impl Into<IssueStatus>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            status: status.into(),
            assignee: String::new(),
            issue_type: String::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = assignee.into();
        self
    }

    pub fn with_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue_type = issue_type.into();
        self
    }

    pub fn is_assigned(&self) -> bool {
        !self.assignee.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvoyStatus {
    Open,
    Closed,
}

/// A named group of issues delivered together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Convoy {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub status: ConvoyStatus,
    /// Tracked issue IDs in the order the convoy was built.
    #[serde(default)]
    pub tracks: Vec<String>,
}

impl Convoy {
    pub fn new(id: impl Into<String>, title: impl Into<String>, tracks: Vec<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: ConvoyStatus::Open,
            tracks,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == ConvoyStatus::Open
    }
}

/// A prerequisite edge: `issue` cannot start until `depends_on` is resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue: String,
    pub depends_on: String,
}

/// Query used to list issues by status and/or assignee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub status: Option<IssueStatus>,
    pub assignee: Option<String>,
}

impl IssueFilter {
    pub fn matches(&self, issue: &TrackedIssue) -> bool {
        self.status.as_ref().is_none_or(|s| *s == issue.status)
            && self.assignee.as_ref().is_none_or(|a| *a == issue.assignee)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_status_round_trips_unknown_values() {
        let issue: TrackedIssue =
            serde_json::from_str(r#"{"id":"gt-1","status":"blocked"}"#).unwrap();
        assert_eq!(issue.status, IssueStatus::Other("blocked".to_string()));
        assert_eq!(issue.issue_type, "");
        assert_eq!(issue.assignee, "");

        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["status"], "blocked");
    }

    #[test]
    fn test_filter() {
        let issue = TrackedIssue::new("gt-1", "open").with_assignee("gastown/alpha");
        let by_status = IssueFilter {
            status: Some(IssueStatus::Open),
            assignee: None,
        };
        let by_other = IssueFilter {
            status: None,
            assignee: Some("gastown/beta".to_string()),
        };
        assert!(by_status.matches(&issue));
        assert!(!by_other.matches(&issue));
        assert!(IssueFilter::default().matches(&issue));
    }
}

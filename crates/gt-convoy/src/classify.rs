//! Issue classification and ready-work selection.

use gt_core::{IssueStatus, TrackedIssue};

/// Whether an issue of this type can be slung to a worker. Container and
/// non-work types are not, and neither is any type this engine does not know.
pub fn is_slingable(issue_type: &str) -> bool {
    matches!(issue_type, "" | "task" | "bug" | "feature" | "chore")
}

/// Resolve a convoy tracking reference to an issue ID.
///
/// External references look like `external:<prefix>:<id>`; anything that
/// does not split into exactly three `:`-separated parts is returned as is.
pub fn extract_reference_id(reference: &str) -> &str {
    let parts: Vec<&str> = reference.split(':').collect();
    match parts.as_slice() {
        [_, _, id] => id,
        _ => reference,
    }
}

/// Open, unassigned and slingable.
pub fn is_ready(issue: &TrackedIssue) -> bool {
    issue.status == IssueStatus::Open && !issue.is_assigned() && is_slingable(&issue.issue_type)
}

/// The first ready issue, in the order given.
pub fn select_next_ready(issues: &[TrackedIssue]) -> Option<&TrackedIssue> {
    issues.iter().find(|issue| is_ready(issue))
}

//! Convoy checks run after an issue changes state.

use crate::blocking::is_blocked;
use crate::classify::{extract_reference_id, is_ready};
use gt_core::{IssueStatus, IssueStore, Result, TrackedIssue};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Inputs for [`check_convoys_for_issue`].
#[derive(Debug, Clone, Default)]
pub struct ConvoyCheck {
    /// Town root the check runs for.
    pub workspace: PathBuf,
    /// The issue whose state just changed.
    pub issue_id: String,
    pub issue_title: String,
    /// Extra arguments carried into every proposed sling.
    pub extra_args: Vec<String>,
    /// Only issues whose ID starts with `<prefix>-` are candidates. Empty
    /// means every issue.
    pub issue_prefix: String,
}

impl ConvoyCheck {
    pub fn new(workspace: impl Into<PathBuf>, issue_id: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            issue_id: issue_id.into(),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.issue_title = title.into();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.issue_prefix = prefix.into();
        self
    }

    pub fn with_extra_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    fn routable(&self, issue_id: &str) -> bool {
        self.issue_prefix.is_empty()
            || issue_id
                .strip_prefix(self.issue_prefix.as_str())
                .is_some_and(|rest| rest.starts_with('-'))
    }
}

/// What a convoy check decided for one convoy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvoyAction {
    /// Every tracked issue is closed; the convoy was closed.
    Closed { convoy_id: String },
    /// This issue is ready and unblocked and should be slung.
    Dispatch {
        convoy_id: String,
        issue: TrackedIssue,
        sling_args: Vec<String>,
    },
    /// A ready issue that must wait: blocked, or its status is unknown.
    Held {
        convoy_id: String,
        issue_id: String,
        reason: String,
    },
    /// Nothing to close and nothing to dispatch.
    Idle { convoy_id: String },
}

/// Re-examine every open convoy tracking `check.issue_id`.
///
/// Returns `Ok(None)` without touching anything when no store is configured.
/// A failure to find the tracking convoys is returned; later per-convoy store
/// failures are logged and leave that convoy out of the result. Callers
/// cancel by dropping the future.
pub async fn check_convoys_for_issue(
    store: Option<&dyn IssueStore>,
    check: &ConvoyCheck,
    logger: Option<&(dyn Fn(&str) + Sync)>,
) -> Result<Option<Vec<ConvoyAction>>> {
    // No store, no convoy checks.
    let Some(store) = store else {
        return Ok(None);
    };
    let log = |msg: &str| {
        info!(issue = %check.issue_id, "{}", msg);
        if let Some(logger) = logger {
            logger(msg);
        }
    };

    debug!(
        issue = %check.issue_id,
        town = %check.workspace.display(),
        "Checking convoys"
    );

    let convoys = store.convoys_tracking(&check.issue_id).await?;

    let mut actions = Vec::new();
    for convoy in convoys.into_iter().filter(|c| c.is_open()) {
        let tracked = match store.tracked_issues(&convoy.id).await {
            Ok(tracked) => tracked,
            Err(e) => {
                warn!(convoy = %convoy.id, error = %e, "Failed to load tracked issues");
                continue;
            }
        };

        if !tracked.is_empty() && tracked.iter().all(|i| i.status == IssueStatus::Closed) {
            let unresolved = convoy
                .tracks
                .iter()
                .map(|r| extract_reference_id(r))
                .find(|id| !tracked.iter().any(|i| i.id == *id));
            if let Some(missing) = unresolved {
                log(&format!(
                    "Convoy {}: {} is not in the issue store, leaving convoy open",
                    convoy.id, missing
                ));
                actions.push(ConvoyAction::Held {
                    convoy_id: convoy.id.clone(),
                    issue_id: missing.to_string(),
                    reason: "status unknown: not in issue store".to_string(),
                });
                continue;
            }

            let reason = if check.issue_title.is_empty() {
                format!("all tracked issues closed (last: {})", check.issue_id)
            } else {
                format!(
                    "all tracked issues closed (last: {} {})",
                    check.issue_id, check.issue_title
                )
            };
            match store.close_convoy(&convoy.id, &reason).await {
                Ok(()) => {
                    log(&format!("Convoy {} complete: {}", convoy.id, reason));
                    actions.push(ConvoyAction::Closed {
                        convoy_id: convoy.id,
                    });
                }
                Err(e) => warn!(convoy = %convoy.id, error = %e, "Failed to close convoy"),
            }
            continue;
        }

        let mut dispatched = false;
        for issue in tracked.iter().filter(|i| is_ready(i) && check.routable(&i.id)) {
            match is_blocked(Some(store), &issue.id).await {
                Ok(false) => {
                    log(&format!("Convoy {}: {} is ready", convoy.id, issue.id));
                    actions.push(ConvoyAction::Dispatch {
                        convoy_id: convoy.id.clone(),
                        issue: issue.clone(),
                        sling_args: check.extra_args.clone(),
                    });
                    dispatched = true;
                    break;
                }
                Ok(true) => {
                    log(&format!("Convoy {}: {} is blocked", convoy.id, issue.id));
                    actions.push(ConvoyAction::Held {
                        convoy_id: convoy.id.clone(),
                        issue_id: issue.id.clone(),
                        reason: "blocked".to_string(),
                    });
                }
                Err(e) => {
                    log(&format!("Convoy {}: holding {}: {}", convoy.id, issue.id, e));
                    actions.push(ConvoyAction::Held {
                        convoy_id: convoy.id.clone(),
                        issue_id: issue.id.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let held = actions
            .iter()
            .any(|a| matches!(a, ConvoyAction::Held { convoy_id, .. } if *convoy_id == convoy.id));
        if !dispatched && !held {
            actions.push(ConvoyAction::Idle {
                convoy_id: convoy.id,
            });
        }
    }

    Ok(Some(actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryIssueStore, JsonFileIssueStore};
    use gt_core::{Convoy, ConvoyStatus};
    use gt_transport::LocalTransport;
    use std::sync::{Arc, Mutex};

    fn ids(tracks: &[&str]) -> Vec<String> {
        tracks.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_no_store_returns_none() {
        let check = ConvoyCheck::new("/nonexistent/path", "gt-test")
            .with_title("test")
            .with_prefix("gt");
        assert!(check_convoys_for_issue(None, &check, None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_logger_is_silent() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-test", "closed"));
        store.insert_convoy(Convoy::new("hq-cv-1", "solo", ids(&["gt-test"])));

        let check = ConvoyCheck::new("/town", "gt-test");
        let actions = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            actions,
            vec![ConvoyAction::Closed {
                convoy_id: "hq-cv-1".to_string()
            }]
        );
        assert_eq!(store.snapshot().convoys[0].status, ConvoyStatus::Closed);
    }

    #[tokio::test]
    async fn test_dispatches_first_unblocked_ready_issue() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-a", "closed"));
        store.insert_issue(TrackedIssue::new("gt-epic", "open").with_type("epic"));
        store.insert_issue(TrackedIssue::new("gt-b", "open"));
        store.insert_issue(TrackedIssue::new("gt-c", "open"));
        store.insert_issue(TrackedIssue::new("gt-d", "open"));
        store.insert_convoy(Convoy::new(
            "hq-cv-1",
            "Auth",
            ids(&["gt-a", "gt-epic", "gt-b", "gt-c", "gt-d"]),
        ));
        store.add_dependency("gt-b", "gt-d");

        let messages = Mutex::new(Vec::new());
        let logger = |msg: &str| messages.lock().unwrap().push(msg.to_string());
        let check = ConvoyCheck::new("/town", "gt-a").with_extra_args(vec!["--naked".to_string()]);

        let actions = check_convoys_for_issue(Some(&store), &check, Some(&logger))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(actions.len(), 2);
        assert!(matches!(
            &actions[0],
            ConvoyAction::Held { issue_id, reason, .. } if issue_id == "gt-b" && reason == "blocked"
        ));
        match &actions[1] {
            ConvoyAction::Dispatch {
                issue, sling_args, ..
            } => {
                assert_eq!(issue.id, "gt-c");
                assert_eq!(sling_args, &vec!["--naked".to_string()]);
            }
            other => panic!("unexpected action: {other:?}"),
        }
        assert_eq!(messages.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_limits_candidates() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-a", "closed"));
        store.insert_issue(TrackedIssue::new("bd-x", "open"));
        store.insert_issue(TrackedIssue::new("gtx-y", "open"));
        store.insert_convoy(Convoy::new("hq-cv-2", "Mixed", ids(&["gt-a", "bd-x", "gtx-y"])));

        let check = ConvoyCheck::new("/town", "gt-a").with_prefix("gt");
        let actions = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            actions,
            vec![ConvoyAction::Idle {
                convoy_id: "hq-cv-2".to_string()
            }]
        );

        let check = ConvoyCheck::new("/town", "gt-a").with_prefix("bd");
        let actions = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(&actions[0], ConvoyAction::Dispatch { issue, .. } if issue.id == "bd-x"));
    }

    #[tokio::test]
    async fn test_unknown_prerequisite_holds_issue() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-a", "closed"));
        store.insert_issue(TrackedIssue::new("gt-b", "open"));
        store.insert_convoy(Convoy::new("hq-cv-3", "Gap", ids(&["gt-a", "gt-b", "gt-ghost"])));
        store.add_dependency("gt-b", "gt-ghost");

        let check = ConvoyCheck::new("/town", "gt-a");
        let actions = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], ConvoyAction::Held { issue_id, .. } if issue_id == "gt-b"));
    }

    #[tokio::test]
    async fn test_unresolved_reference_keeps_convoy_open() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-a", "closed"));
        store.insert_convoy(Convoy::new(
            "hq-cv-5",
            "Cross-rig",
            ids(&["gt-a", "external:bd:bd-xyz"]),
        ));

        let check = ConvoyCheck::new("/town", "gt-a");
        let actions = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            actions,
            vec![ConvoyAction::Held {
                convoy_id: "hq-cv-5".to_string(),
                issue_id: "bd-xyz".to_string(),
                reason: "status unknown: not in issue store".to_string(),
            }]
        );
        assert_eq!(store.snapshot().convoys[0].status, ConvoyStatus::Open);
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileIssueStore::new(Arc::new(LocalTransport::new()), &path);

        let check = ConvoyCheck::new("/town", "gt-a");
        let err = check_convoys_for_issue(Some(&store), &check, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[tokio::test]
    async fn test_closed_convoys_and_untracked_issues_are_ignored() {
        let store = InMemoryIssueStore::new();
        store.insert_issue(TrackedIssue::new("gt-a", "closed"));
        let mut convoy = Convoy::new("hq-cv-4", "Old", ids(&["gt-a"]));
        convoy.status = ConvoyStatus::Closed;
        store.insert_convoy(convoy);

        let check = ConvoyCheck::new("/town", "gt-a");
        assert!(check_convoys_for_issue(Some(&store), &check, None).await.unwrap().unwrap().is_empty());

        let check = ConvoyCheck::new("/town", "gt-loose");
        assert!(check_convoys_for_issue(Some(&store), &check, None).await.unwrap().unwrap().is_empty());
    }
}

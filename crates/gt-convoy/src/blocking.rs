//! Blocking checks for convoy-tracked issues.

use gt_core::{Error, IssueStore, Result};
use tracing::warn;

/// Whether `issue_id` is held back by an unresolved convoy-mate.
///
/// Without a store, or when the store cannot answer, the status is
/// `Error::IndeterminateBlocking` and the issue must not be dispatched.
pub async fn is_blocked(store: Option<&dyn IssueStore>, issue_id: &str) -> Result<bool> {
    let Some(store) = store else {
        return Err(Error::IndeterminateBlocking {
            issue_id: issue_id.to_string(),
            reason: "no issue store".to_string(),
        });
    };

    store.is_blocked(issue_id).await.map_err(|e| {
        warn!(issue = %issue_id, error = %e, "Could not determine blocking status");
        Error::IndeterminateBlocking {
            issue_id: issue_id.to_string(),
            reason: e.to_string(),
        }
    })
}

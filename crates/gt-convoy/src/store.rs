//! Issue store implementations.
//!
//! `InMemoryIssueStore` keeps everything in process; `JsonFileIssueStore`
//! keeps the same state as a JSON document on any machine, reached through a
//! transport. Both answer queries from a [`StoreState`] snapshot.

use crate::classify::extract_reference_id;
use async_trait::async_trait;
use gt_core::{
    Convoy, ConvoyStatus, Dependency, Error, IssueFilter, IssueStatus, IssueStore, Result,
    TrackedIssue, Transport,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Issues, convoys and dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreState {
    #[serde(default)]
    pub issues: Vec<TrackedIssue>,
    #[serde(default)]
    pub convoys: Vec<Convoy>,
    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

impl StoreState {
    fn issue(&self, id: &str) -> Option<&TrackedIssue> {
        self.issues.iter().find(|i| i.id == id)
    }

    fn convoy_tracks(convoy: &Convoy, issue_id: &str) -> bool {
        convoy
            .tracks
            .iter()
            .any(|r| extract_reference_id(r) == issue_id)
    }

    fn convoys_tracking(&self, issue_id: &str) -> Vec<Convoy> {
        self.convoys
            .iter()
            .filter(|c| Self::convoy_tracks(c, issue_id))
            .cloned()
            .collect()
    }

    fn tracked_issues(&self, convoy_id: &str) -> Result<Vec<TrackedIssue>> {
        let convoy = self
            .convoys
            .iter()
            .find(|c| c.id == convoy_id)
            .ok_or_else(|| Error::ConvoyNotFound(convoy_id.to_string()))?;

        // References to issues the store does not hold are skipped.
        Ok(convoy
            .tracks
            .iter()
            .filter_map(|r| self.issue(extract_reference_id(r)).cloned())
            .collect())
    }

    fn is_blocked(&self, issue_id: &str) -> Result<bool> {
        if self.issue(issue_id).is_none() {
            return Err(Error::IssueNotFound(issue_id.to_string()));
        }

        let convoys = self.convoys_tracking(issue_id);
        for dep in self.dependencies.iter().filter(|d| d.issue == issue_id) {
            if !convoys.iter().any(|c| Self::convoy_tracks(c, &dep.depends_on)) {
                continue;
            }
            let prerequisite = self.issue(&dep.depends_on).ok_or_else(|| {
                Error::Store(format!(
                    "{} depends on unknown issue {}",
                    issue_id, dep.depends_on
                ))
            })?;
            if !prerequisite.status.is_resolved() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn assign(&mut self, issue_id: &str, assignee: &str) -> Result<()> {
        let issue = self
            .issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| Error::IssueNotFound(issue_id.to_string()))?;

        if issue.status != IssueStatus::Open || issue.is_assigned() {
            let from = if issue.is_assigned() {
                format!("{} (assigned to {})", issue.status, issue.assignee)
            } else {
                issue.status.to_string()
            };
            return Err(Error::InvalidTransition {
                issue_id: issue_id.to_string(),
                from,
                to: IssueStatus::InProgress.to_string(),
            });
        }

        issue.status = IssueStatus::InProgress;
        issue.assignee = assignee.to_string();
        Ok(())
    }

    fn close_convoy(&mut self, convoy_id: &str) -> Result<()> {
        let convoy = self
            .convoys
            .iter_mut()
            .find(|c| c.id == convoy_id)
            .ok_or_else(|| Error::ConvoyNotFound(convoy_id.to_string()))?;
        convoy.status = ConvoyStatus::Closed;
        Ok(())
    }
}

/// Process-local issue store.
#[derive(Default)]
pub struct InMemoryIssueStore {
    state: RwLock<StoreState>,
}

impl InMemoryIssueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(state: StoreState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    pub fn snapshot(&self) -> StoreState {
        self.read().clone()
    }

    /// Insert or replace an issue.
    pub fn insert_issue(&self, issue: TrackedIssue) {
        let mut state = self.write();
        state.issues.retain(|i| i.id != issue.id);
        state.issues.push(issue);
    }

    /// Insert or replace a convoy.
    pub fn insert_convoy(&self, convoy: Convoy) {
        let mut state = self.write();
        state.convoys.retain(|c| c.id != convoy.id);
        state.convoys.push(convoy);
    }

    pub fn add_dependency(&self, issue: &str, depends_on: &str) {
        self.write().dependencies.push(Dependency {
            issue: issue.to_string(),
            depends_on: depends_on.to_string(),
        });
    }

    /// Apply an externally driven status change (close, hook, reopen).
    pub fn set_status(&self, issue_id: &str, status: impl Into<IssueStatus>) -> Result<()> {
        let mut state = self.write();
        let issue = state
            .issues
            .iter_mut()
            .find(|i| i.id == issue_id)
            .ok_or_else(|| Error::IssueNotFound(issue_id.to_string()))?;
        issue.status = status.into();
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl IssueStore for InMemoryIssueStore {
    async fn get_issue(&self, id: &str) -> Result<Option<TrackedIssue>> {
        Ok(self.read().issue(id).cloned())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<TrackedIssue>> {
        Ok(self
            .read()
            .issues
            .iter()
            .filter(|i| filter.matches(i))
            .cloned()
            .collect())
    }

    async fn convoys_tracking(&self, issue_id: &str) -> Result<Vec<Convoy>> {
        Ok(self.read().convoys_tracking(issue_id))
    }

    async fn tracked_issues(&self, convoy_id: &str) -> Result<Vec<TrackedIssue>> {
        self.read().tracked_issues(convoy_id)
    }

    async fn is_blocked(&self, issue_id: &str) -> Result<bool> {
        self.read().is_blocked(issue_id)
    }

    async fn assign(&self, issue_id: &str, assignee: &str) -> Result<()> {
        self.write().assign(issue_id, assignee)?;
        debug!(issue = %issue_id, assignee = %assignee, "Issue assigned");
        Ok(())
    }

    async fn close_convoy(&self, convoy_id: &str, reason: &str) -> Result<()> {
        self.write().close_convoy(convoy_id)?;
        info!(convoy = %convoy_id, reason = %reason, "Convoy closed");
        Ok(())
    }
}

/// Issue store persisted as a JSON document, read fresh on every call.
pub struct JsonFileIssueStore {
    transport: Arc<dyn Transport>,
    path: PathBuf,
    writes: tokio::sync::Mutex<()>,
}

impl JsonFileIssueStore {
    pub fn new(transport: Arc<dyn Transport>, path: impl Into<PathBuf>) -> Self {
        Self {
            transport,
            path: path.into(),
            writes: tokio::sync::Mutex::new(()),
        }
    }

    /// Current document contents. A missing file is an empty store.
    pub async fn load(&self) -> Result<StoreState> {
        if !self.transport.file_exists(&self.path).await? {
            return Ok(StoreState::default());
        }
        let bytes = self.transport.read_file(&self.path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::Store(format!("{}: {}", self.path.display(), e)))
    }

    pub async fn save(&self, state: &StoreState) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            self.transport.mkdir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(state)?;
        self.transport.write_file(&self.path, &json).await
    }

    async fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StoreState) -> Result<()> + Send,
    {
        let _guard = self.writes.lock().await;
        let mut state = self.load().await?;
        f(&mut state)?;
        self.save(&state).await
    }
}

#[async_trait]
impl IssueStore for JsonFileIssueStore {
    async fn get_issue(&self, id: &str) -> Result<Option<TrackedIssue>> {
        Ok(self.load().await?.issue(id).cloned())
    }

    async fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<TrackedIssue>> {
        Ok(self
            .load()
            .await?
            .issues
            .into_iter()
            .filter(|i| filter.matches(i))
            .collect())
    }

    async fn convoys_tracking(&self, issue_id: &str) -> Result<Vec<Convoy>> {
        Ok(self.load().await?.convoys_tracking(issue_id))
    }

    async fn tracked_issues(&self, convoy_id: &str) -> Result<Vec<TrackedIssue>> {
        self.load().await?.tracked_issues(convoy_id)
    }

    async fn is_blocked(&self, issue_id: &str) -> Result<bool> {
        self.load().await?.is_blocked(issue_id)
    }

    async fn assign(&self, issue_id: &str, assignee: &str) -> Result<()> {
        self.update(|state| state.assign(issue_id, assignee)).await?;
        debug!(issue = %issue_id, assignee = %assignee, "Issue assigned");
        Ok(())
    }

    async fn close_convoy(&self, convoy_id: &str, reason: &str) -> Result<()> {
        self.update(|state| state.close_convoy(convoy_id)).await?;
        info!(convoy = %convoy_id, reason = %reason, "Convoy closed");
        Ok(())
    }
}

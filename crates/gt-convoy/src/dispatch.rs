//! Handing ready issues to workers.

use crate::blocking::is_blocked;
use crate::check::ConvoyAction;
use crate::classify::{is_ready, is_slingable};
use gt_core::{
    Error, IssueStatus, IssueStore, MailMessage, MessageType, Result, TrackedIssue, WorkerAddress,
};
use gt_mail::{MailSender, new_message_id};
use gt_transport::MachineRegistry;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Assigns issues to workers, mails them the work and nudges their session.
pub struct Dispatcher {
    store: Arc<dyn IssueStore>,
    mail: Arc<dyn MailSender>,
    registry: Arc<MachineRegistry>,
    sender: String,
    assign_lock: Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn IssueStore>,
        mail: Arc<dyn MailSender>,
        registry: Arc<MachineRegistry>,
    ) -> Self {
        Self {
            store,
            mail,
            registry,
            sender: "mayor".to_string(),
            assign_lock: Mutex::new(()),
        }
    }

    /// Address used as the `from` of work mail.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Hand `issue` to `worker`. The assignment is the commit point: if it
    /// fails nothing else happens, and later failures leave the issue assigned.
    pub async fn dispatch(&self, issue: &TrackedIssue, worker: &WorkerAddress) -> Result<()> {
        let wrap = |e: Error| Error::dispatch_failed(&issue.id, e);
        // Mail and nudge both reach the worker's machine.
        let on_worker = |e: Error| {
            if e.is_connection_error() {
                self.registry.evict(&worker.machine);
            }
            wrap(e)
        };

        if !is_slingable(&issue.issue_type) {
            return Err(wrap(Error::InvalidTransition {
                issue_id: issue.id.clone(),
                from: format!("{} ({})", issue.status, issue.issue_type),
                to: IssueStatus::InProgress.to_string(),
            }));
        }

        {
            let _guard = self.assign_lock.lock().await;
            self.store
                .assign(&issue.id, &worker.to_string())
                .await
                .map_err(wrap)?;
        }
        info!(issue = %issue.id, worker = %worker, "Issue assigned");

        let subject = if issue.title.is_empty() {
            format!("Work: {}", issue.id)
        } else {
            format!("Work: {} {}", issue.id, issue.title)
        };
        let body = format!("You have been assigned {}.\n\n{}", issue.id, issue.title);
        let message = MailMessage::new(new_message_id(), &self.sender, worker.to_string(), subject, body)
            .with_type(MessageType::Task);
        self.mail.deliver(&message).await.map_err(on_worker)?;
        self.nudge(issue, worker).await.map_err(on_worker)?;

        Ok(())
    }

    async fn nudge(&self, issue: &TrackedIssue, worker: &WorkerAddress) -> Result<()> {
        let transport = self.registry.get_connection(&worker.machine).await?;
        let session = worker.session_name();
        if !transport.tmux_has_session(&session).await? {
            debug!(session = %session, "Worker session not running, mail only");
            return Ok(());
        }
        transport
            .tmux_send(&session, &format!("New work on your hook: {}. Check your mail.", issue.id))
            .await
    }

    /// The first ready issue in `convoy_id` that is known to be unblocked.
    pub async fn next_ready(&self, convoy_id: &str) -> Result<Option<TrackedIssue>> {
        let tracked = self.store.tracked_issues(convoy_id).await?;
        for issue in tracked.into_iter().filter(is_ready) {
            match is_blocked(Some(self.store.as_ref()), &issue.id).await {
                Ok(false) => return Ok(Some(issue)),
                Ok(true) => debug!(issue = %issue.id, "Skipping blocked issue"),
                Err(e) => warn!(issue = %issue.id, error = %e, "Skipping issue"),
            }
        }
        Ok(None)
    }

    /// Carry out the first `Dispatch` action against `worker`. Returns the
    /// dispatched issue ID, if any.
    pub async fn apply(
        &self,
        actions: &[ConvoyAction],
        worker: &WorkerAddress,
    ) -> Result<Option<String>> {
        let Some(issue) = actions.iter().find_map(|a| match a {
            ConvoyAction::Dispatch { issue, .. } => Some(issue),
            _ => None,
        }) else {
            return Ok(None);
        };
        self.dispatch(issue, worker).await?;
        Ok(Some(issue.id.clone()))
    }
}

//! Command handlers.

use anyhow::{Context, bail};
use console::style;
use gt_convoy::{
    ConvoyAction, ConvoyCheck, Dispatcher, JsonFileIssueStore, check_convoys_for_issue, is_blocked,
    is_slingable,
};
use gt_core::{Error, GtConfig, IssueStore, LOCAL_MACHINE, MessageType, Transport, WorkerAddress};
use gt_mail::MailRouter;
use gt_session::send_and_capture_response_with;
use gt_transport::MachineRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Town configuration plus the connections derived from it.
pub struct Town {
    pub config: GtConfig,
    pub registry: Arc<MachineRegistry>,
}

impl Town {
    pub fn new(config: GtConfig) -> anyhow::Result<Self> {
        let machines = config.machines().context("loading machine registry")?;
        Ok(Self {
            config,
            registry: Arc::new(MachineRegistry::new(machines)),
        })
    }

    async fn local(&self) -> anyhow::Result<Arc<dyn Transport>> {
        Ok(self.registry.get_connection(LOCAL_MACHINE).await?)
    }

    async fn issue_store(&self) -> anyhow::Result<Arc<JsonFileIssueStore>> {
        Ok(Arc::new(JsonFileIssueStore::new(
            self.local().await?,
            self.config.issues_path(),
        )))
    }
}

/// The chat message: the argument if given, otherwise all of `input`.
pub async fn read_message<R>(arg: Option<String>, mut input: R) -> anyhow::Result<String>
where
    R: AsyncRead + Unpin,
{
    let message = match arg {
        Some(message) => message,
        None => {
            let mut buf = String::new();
            input
                .read_to_string(&mut buf)
                .await
                .context("reading stdin")?;
            buf
        }
    };
    let message = message.trim().to_string();
    if message.is_empty() {
        bail!("message required: provide as argument or stdin");
    }
    Ok(message)
}

/// Send a message to the mayor session and print the reply on stdout.
pub async fn mayor_chat(
    town: &Town,
    message: Option<String>,
    timeout: Duration,
    quiet: bool,
) -> anyhow::Result<()> {
    let message = read_message(message, tokio::io::stdin()).await?;
    let transport = town.local().await?;
    let session = &town.config.mayor_session;

    let running = transport
        .tmux_has_session(session)
        .await
        .context("checking mayor status")?;
    if !running {
        bail!("Mayor session is not running. Start with: gt mayor start");
    }

    if !quiet {
        eprintln!("{} Sending message to Mayor...", style("→").dim());
    }

    let response = send_and_capture_response_with(
        transport.as_ref(),
        session,
        &message,
        timeout,
        &town.config.session,
    )
    .await
    .context("communicating with Mayor")?;

    println!("{response}");
    Ok(())
}

/// Deliver a notification to a worker's inbox.
pub async fn mail_send(
    town: &Town,
    from: &str,
    to: &str,
    subject: &str,
    body: &str,
) -> anyhow::Result<()> {
    let router = MailRouter::new(town.registry.clone());
    let message = router
        .send(from, to, subject, body, MessageType::Notification)
        .await
        .with_context(|| format!("sending mail to {to}"))?;

    println!(
        "{} Sent {} to {}",
        style("✓").green(),
        style(&message.id).bold(),
        to
    );
    Ok(())
}

/// Re-examine the convoys tracking `issue_id` and print what was decided.
pub async fn convoy_check(
    town: &Town,
    issue_id: &str,
    prefix: Option<String>,
) -> anyhow::Result<Vec<ConvoyAction>> {
    let store = town.issue_store().await?;
    let title = store
        .get_issue(issue_id)
        .await?
        .map(|issue| issue.title)
        .unwrap_or_default();

    let check = ConvoyCheck::new(&town.config.town_root, issue_id)
        .with_title(title)
        .with_prefix(prefix.unwrap_or_else(|| town.config.issue_prefix.clone()));

    let progress = |msg: &str| eprintln!("{} {}", style("→").dim(), msg);
    let actions = check_convoys_for_issue(Some(store.as_ref()), &check, Some(&progress))
        .await
        .with_context(|| format!("checking convoys for {issue_id}"))?
        .unwrap_or_default();

    if actions.is_empty() {
        println!("{} No open convoys track {}", style("i").blue(), issue_id);
    }
    for action in &actions {
        match action {
            ConvoyAction::Closed { convoy_id } => {
                println!("{} Convoy {} closed", style("✓").green(), style(convoy_id).bold());
            }
            ConvoyAction::Dispatch {
                convoy_id, issue, ..
            } => {
                println!(
                    "{} {} ready in {}: gt sling {} <worker>",
                    style("▶").cyan(),
                    style(&issue.id).bold(),
                    convoy_id,
                    issue.id
                );
            }
            ConvoyAction::Held {
                convoy_id,
                issue_id,
                reason,
            } => {
                println!(
                    "{} {} held in {}: {}",
                    style("!").yellow(),
                    issue_id,
                    convoy_id,
                    style(reason).dim()
                );
            }
            ConvoyAction::Idle { convoy_id } => {
                println!("{} Convoy {} has nothing ready", style("i").blue(), convoy_id);
            }
        }
    }
    Ok(actions)
}

/// Assign an issue to a worker, mail it the work and nudge its session.
pub async fn sling(town: &Town, issue_id: &str, worker: &str) -> anyhow::Result<()> {
    let address = WorkerAddress::parse(worker)?;
    let store = town.issue_store().await?;

    let issue = store
        .get_issue(issue_id)
        .await?
        .ok_or_else(|| Error::IssueNotFound(issue_id.to_string()))?;
    if !is_slingable(&issue.issue_type) {
        bail!("{issue_id} has type {:?} and cannot be slung", issue.issue_type);
    }
    let blocked = is_blocked(Some(store.as_ref()), issue_id)
        .await
        .with_context(|| format!("cannot sling {issue_id}"))?;
    if blocked {
        bail!("{issue_id} is blocked by an unfinished convoy-mate");
    }

    debug!(issue = %issue_id, worker = %address, "Slinging");
    let mail = Arc::new(MailRouter::new(town.registry.clone()));
    let dispatcher = Dispatcher::new(store, mail, town.registry.clone());
    dispatcher
        .dispatch(&issue, &address)
        .await
        .with_context(|| format!("slinging {issue_id} to {address}"))?;

    println!(
        "{} Slung {} to {}",
        style("✓").green(),
        style(issue_id).bold(),
        address
    );
    Ok(())
}

/// Print the configured machines.
pub fn machines_list(town: &Town) {
    let config = town.registry.config();
    println!("{}", style("Machines").bold());
    for name in config.names() {
        if let Some(machine) = config.get(name) {
            println!(
                "  {:<16} {:<6} {}",
                machine.name,
                style(machine.kind_name()).dim(),
                machine.workspace_root.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gt_convoy::StoreState;
    use gt_core::{Convoy, ConvoyStatus, Dependency, IssueStatus, TrackedIssue};
    use std::path::Path;

    fn town(root: &Path) -> Town {
        let config = GtConfig {
            town_root: root.to_path_buf(),
            ..GtConfig::default()
        };
        Town::new(config).unwrap()
    }

    fn write_store(root: &Path, state: &StoreState) {
        let path = root.join(".beads").join("issues.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_vec_pretty(state).unwrap()).unwrap();
    }

    fn read_store(root: &Path) -> StoreState {
        let bytes = std::fs::read(root.join(".beads").join("issues.json")).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn task(id: &str, status: IssueStatus) -> TrackedIssue {
        TrackedIssue::new(id, status).with_type("task").with_title(format!("work {id}"))
    }

    #[tokio::test]
    async fn test_read_message_prefers_argument() {
        let msg = read_message(Some("  status?  ".to_string()), &b"ignored"[..])
            .await
            .unwrap();
        assert_eq!(msg, "status?");

        let msg = read_message(None, &b"List all polecats\n"[..]).await.unwrap();
        assert_eq!(msg, "List all polecats");
    }

    #[tokio::test]
    async fn test_read_message_rejects_empty() {
        let err = read_message(None, &b"  \n"[..]).await.unwrap_err();
        assert!(err.to_string().contains("message required"));
    }

    #[tokio::test]
    async fn test_convoy_check_closes_and_proposes() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            &StoreState {
                issues: vec![
                    task("gt-1", IssueStatus::Closed),
                    task("gt-2", IssueStatus::Closed),
                    task("gt-3", IssueStatus::Open),
                    task("gt-4", IssueStatus::Open),
                ],
                convoys: vec![
                    Convoy::new("cv-done", "finished", vec!["gt-1".into(), "gt-2".into()]),
                    Convoy::new("cv-next", "ongoing", vec!["gt-2".into(), "gt-3".into(), "gt-4".into()]),
                ],
                dependencies: vec![],
            },
        );
        let town = town(dir.path());

        let actions = convoy_check(&town, "gt-2", None).await.unwrap();

        assert!(actions.contains(&ConvoyAction::Closed {
            convoy_id: "cv-done".to_string()
        }));
        let dispatched: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                ConvoyAction::Dispatch { issue, .. } => Some(issue.id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(dispatched, vec!["gt-3"]);

        let state = read_store(dir.path());
        let done = state.convoys.iter().find(|c| c.id == "cv-done").unwrap();
        assert_eq!(done.status, ConvoyStatus::Closed);
    }

    #[tokio::test]
    async fn test_convoy_check_without_store_file() {
        let dir = tempfile::tempdir().unwrap();
        let actions = convoy_check(&town(dir.path()), "gt-9", None).await.unwrap();
        assert!(actions.is_empty());
    }

    #[tokio::test]
    async fn test_sling_assigns_and_mails_local_worker() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            &StoreState {
                issues: vec![task("gt-7", IssueStatus::Open)],
                convoys: vec![Convoy::new("cv-1", "", vec!["gt-7".into()])],
                dependencies: vec![],
            },
        );
        let town = town(dir.path());

        sling(&town, "gt-7", "gastown/polecat-1").await.unwrap();

        let state = read_store(dir.path());
        let issue = state.issues.iter().find(|i| i.id == "gt-7").unwrap();
        assert_eq!(issue.assignee, "gastown/polecat-1");
        assert_eq!(issue.status, IssueStatus::InProgress);

        let inbox = std::fs::read_to_string(
            dir.path().join("gastown/polecat-1/mail/inbox.jsonl"),
        )
        .unwrap();
        let mail: serde_json::Value = serde_json::from_str(inbox.lines().next().unwrap()).unwrap();
        assert_eq!(mail["to"], "gastown/polecat-1");
        assert_eq!(mail["type"], "task");
    }

    #[tokio::test]
    async fn test_sling_refuses_blocked_issue() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            &StoreState {
                issues: vec![task("gt-1", IssueStatus::Open), task("gt-2", IssueStatus::Open)],
                convoys: vec![Convoy::new("cv-1", "", vec!["gt-1".into(), "gt-2".into()])],
                dependencies: vec![Dependency {
                    issue: "gt-2".to_string(),
                    depends_on: "gt-1".to_string(),
                }],
            },
        );
        let town = town(dir.path());

        let err = sling(&town, "gt-2", "gastown/polecat-1").await.unwrap_err();
        assert!(err.to_string().contains("blocked"));
        let state = read_store(dir.path());
        assert!(state.issues.iter().all(|i| i.assignee.is_empty()));
    }

    #[tokio::test]
    async fn test_convoy_check_reports_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".beads").join("issues.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();

        let err = convoy_check(&town(dir.path()), "gt-1", None).await.unwrap_err();
        assert!(format!("{err:#}").contains("Issue store error"));
    }

    #[tokio::test]
    async fn test_sling_refuses_unknown_blocking_status() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            &StoreState {
                issues: vec![task("gt-2", IssueStatus::Open)],
                convoys: vec![Convoy::new("cv-1", "", vec!["gt-2".into(), "gt-ghost".into()])],
                dependencies: vec![Dependency {
                    issue: "gt-2".to_string(),
                    depends_on: "gt-ghost".to_string(),
                }],
            },
        );
        let town = town(dir.path());

        let err = sling(&town, "gt-2", "gastown/p1").await.unwrap_err();
        assert!(format!("{err:#}").contains("unknown"));

        let state = read_store(dir.path());
        assert!(state.issues[0].assignee.is_empty());
        assert!(!dir.path().join("gastown/p1/mail/inbox.jsonl").exists());
    }

    #[tokio::test]
    async fn test_sling_refuses_non_slingable_type() {
        let dir = tempfile::tempdir().unwrap();
        write_store(
            dir.path(),
            &StoreState {
                issues: vec![task("gt-e", IssueStatus::Open).with_type("epic")],
                convoys: vec![],
                dependencies: vec![],
            },
        );
        let town = town(dir.path());

        let err = sling(&town, "gt-e", "gastown/p1").await.unwrap_err();
        assert!(err.to_string().contains("cannot be slung"));
        assert!(read_store(dir.path()).issues[0].assignee.is_empty());
    }

    #[tokio::test]
    async fn test_mail_send_to_unknown_machine_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = mail_send(&town(dir.path()), "mayor", "gpu-9:gastown/polecat-1", "hi", "there")
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("gpu-9"));
    }
}

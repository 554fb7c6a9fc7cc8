//! Gas Town Mail
//!
//! Routes mail records to worker inboxes on whichever machine the worker
//! lives on.

use async_trait::async_trait;
use gt_core::{MailMessage, MessageType, Result, WorkerAddress};
use gt_transport::MachineRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Something that can put a message in a worker's inbox.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn deliver(&self, message: &MailMessage) -> Result<()>;
}

/// A fresh message ID of the form `msg-<8 hex chars>`.
pub fn new_message_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("msg-{}", &id[..8])
}

/// Delivers mail by appending JSON lines to
/// `<workspace_root>/<rig>/<worker>/mail/inbox.jsonl` on the recipient's
/// machine.
pub struct MailRouter {
    registry: Arc<MachineRegistry>,
}

impl MailRouter {
    pub fn new(registry: Arc<MachineRegistry>) -> Self {
        Self { registry }
    }

    /// Inbox path for `address` on its machine.
    pub fn inbox_path(&self, address: &WorkerAddress) -> Result<PathBuf> {
        let machine = self.registry.machine(&address.machine)?;
        Ok(machine.workspace_root.join(address.inbox_path()))
    }

    /// Build a message with a fresh ID and deliver it.
    pub async fn send(
        &self,
        from: &str,
        to: &str,
        subject: &str,
        body: &str,
        message_type: MessageType,
    ) -> Result<MailMessage> {
        let message = MailMessage::new(new_message_id(), from, to, subject, body)
            .with_type(message_type);
        self.deliver(&message).await?;
        Ok(message)
    }
}

#[async_trait]
impl MailSender for MailRouter {
    async fn deliver(&self, message: &MailMessage) -> Result<()> {
        let address = WorkerAddress::parse(&message.to)?;
        let transport = self.registry.get_connection(&address.machine).await?;
        let inbox = self.inbox_path(&address)?;

        debug!(to = %address, inbox = %inbox.display(), "Delivering mail");

        if let Some(dir) = inbox.parent() {
            transport.mkdir_all(dir).await?;
        }

        let line = message.to_json_line()?;
        if let Err(e) = transport.append_file(&inbox, line.as_bytes()).await {
            warn!(id = %message.id, to = %address, error = %e, "Mail delivery failed");
            return Err(e);
        }

        info!(id = %message.id, from = %message.from, to = %address, "Mail delivered");
        Ok(())
    }
}

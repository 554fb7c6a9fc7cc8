//! Gas Town Core
//!
//! Domain types, port traits and error handling shared by every Gas Town
//! crate: worker addresses, machines, tracked issues and convoys, mail
//! records, town configuration, and the `Transport` / `IssueStore`
//! interfaces.

pub mod address;
pub mod config;
pub mod error;
pub mod issue;
pub mod machine;
pub mod mail;
pub mod ports;

pub use address::{LOCAL_MACHINE, WorkerAddress};
pub use config::{GtConfig, McpSettings, SessionConfig};
pub use error::{Error, Result};
pub use issue::{Convoy, ConvoyStatus, Dependency, IssueFilter, IssueStatus, TrackedIssue};
pub use machine::{CloudParams, Machine, MachineKind, MachinesConfig, SshParams};
pub use mail::{MailMessage, MessageType};
pub use ports::{ExecOptions, ExecOutput, IssueStore, Transport};

//! Gas Town Convoy Engine
//!
//! Decides which tracked issues can be handed to workers and hands them out:
//!
//! - Issue classification and first-ready selection
//! - Blocking checks against the issue store
//! - Convoy checks that close finished convoys and propose the next sling
//! - Dispatch: assignment, work mail and session nudge

pub mod blocking;
pub mod check;
pub mod classify;
pub mod dispatch;
pub mod store;

pub use blocking::is_blocked;
pub use check::{ConvoyAction, ConvoyCheck, check_convoys_for_issue};
pub use classify::{extract_reference_id, is_ready, is_slingable, select_next_ready};
pub use dispatch::Dispatcher;
pub use store::{InMemoryIssueStore, JsonFileIssueStore, StoreState};

//! Gas Town Transports
//!
//! Uniform command execution, file access and tmux control for local and
//! SSH-reachable machines, plus the registry that hands out one shared
//! transport per machine.

pub mod local;
pub mod registry;
pub mod ssh;
pub mod tmux;

mod locks;
mod process;

pub use local::LocalTransport;
pub use registry::{DefaultTransportFactory, MachineRegistry, TransportFactory};
pub use ssh::SshTransport;
pub use tmux::{command_line, shell_quote};

//! MCP server that hands tasks to the Gas Town mayor.

pub mod handlers;
pub mod mayor;
pub mod routes;
pub mod signature;
pub mod state;
pub mod tasks;

pub use routes::create_router;
pub use state::AppState;

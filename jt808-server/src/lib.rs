//! # jt808-server
//!
//! The JT/T 808 terminal gateway: terminal registry, registration and
//! authentication sessions, per-terminal connection tasks, operator command
//! orchestration over a local control channel, and the firmware upgrade
//! worker.

pub mod command;
pub mod config;
pub mod connection;
pub mod error;
pub mod registry;
pub mod server;
pub mod session;
pub mod upgrade;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use error::ServerError;
pub use registry::{PendingUpgrade, TerminalRegistry};
pub use server::Server;
pub use session::SessionState;

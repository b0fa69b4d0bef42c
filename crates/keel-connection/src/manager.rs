//! Connection manager: lifecycle orchestrator for the data-access layer
//!
//! The manager is the single owner of the pool handle and the connection
//! state. It wires the health monitor and reconnect scheduler together,
//! exposes query/transaction operations to callers, and participates in
//! graceful shutdown.
//!
//! A manager is constructed explicitly at the application's composition root
//! and passed by reference to anything needing data access; there is no
//! global singleton.

mod manager;
mod state;

#[cfg(test)]
mod tests;

pub use manager::ConnectionManager;
pub use state::{ManagerState, ManagerStatus};

//! Reconnect scheduling with exponential backoff
//!
//! Decides *when* and *how many times* pool initialization is retried after
//! a detected failure. Delays grow exponentially with optional jitter, and
//! after a bounded number of attempts the scheduler gives up, a fatal
//! condition surfaced to operators rather than silently retried forever.
//!
//! # Example
//!
//! ```ignore
//! use keel_connection::reconnect::ReconnectScheduler;
//! use keel_core::ReconnectPolicy;
//!
//! let scheduler = ReconnectScheduler::new(&ReconnectPolicy::default());
//! match scheduler.next_attempt() {
//!     ReconnectDecision::Scheduled { attempt, delay } => { /* sleep, retry */ }
//!     ReconnectDecision::GivenUp { attempts } => { /* page an operator */ }
//! }
//! ```

mod backoff;
mod scheduler;


pub use backoff::BackoffPolicy;
pub use scheduler::{ReconnectDecision, ReconnectScheduler};

//! Abuse protection for kickoff.
//!
//! - **Cooldowns**: per `(actor, action kind)` windows that stop an actor
//!   from hammering the roster or the admin commands
//! - **Outbound budget**: a governor token bucket shared by all chats, keeping
//!   refresh traffic under the transport's global send limit

pub mod rate_limit;

pub use rate_limit::{RateLimitManager, RateLimitStats};

//! Integration test common infrastructure.
//!
//! Provides an in-process dispatcher harness with fault-injecting stores,
//! and a wrapper that spawns the `kickoffd` binary and talks JSON lines to it.

pub mod harness;
pub mod server;

#[allow(unused_imports)]
pub use harness::{FlakyStore, Harness, action, admin};
#[allow(unused_imports)]
pub use server::TestServer;

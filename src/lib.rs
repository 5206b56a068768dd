//! kickoff - per-chat game sign-up coordinator
//!
//! Players join, leave or bring a guest against a fixed roster cap; when the
//! roster fills the players are split into two balanced teams. Each chat is
//! served by its own worker so concurrent sign-ups in one chat are applied
//! one at a time, while different chats proceed in parallel.
//!
//! Layers, leaf first:
//! - [`security`]: per-actor cooldowns and the outbound send budget
//! - [`store`]: durable sessions with compare-and-swap writes and retry
//! - [`state`]: the pure session state machine, team formation, rendering
//! - [`dispatch`]: per-chat workers and refresh debouncing
//! - [`gateway`]: line-delimited JSON over any async reader/writer pair

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod security;
pub mod state;
pub mod store;
pub mod telemetry;

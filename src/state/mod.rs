//! Game session state.
//!
//! Contains the persisted session model, the pure transition function,
//! the team formation engine and roster rendering.

mod machine;
mod render;
mod session;
mod teams;

pub use machine::{Action, ActionKind, Outcome, Rules, Signup, Transition, apply};
pub use render::{RosterSnapshot, roster_lines, snapshot};
pub use session::{
    ActorId, ChatId, Entry, EntryKind, RECENT_ACTIONS_CAP, Rating, ScheduleDetails, ScheduleKind,
    Session, SessionState,
};
pub use teams::{BenchSlot, Side, Slot, Teams, expand_slots, form_teams, snake_side};

//! Session state machine.
//!
//! `apply` is a pure function of (stored session, action, rules). It never
//! performs I/O, so the dispatcher can re-run it against a freshly loaded
//! session after a version conflict and get a consistent result.
//!
//! Team formation is coupled to the join that fills the roster: the same
//! transition moves the session Open -> Forming -> Formed. Teams are never
//! derived on read, so they can only be produced once per session.

use super::session::{
    ActorId, Entry, EntryKind, Rating, ScheduleKind, Session, SessionState,
};
use super::teams::{Teams, form_teams};
use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

/// Fixed parameters of every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rules {
    pub capacity: usize,
    pub guest_default_rating: Rating,
}

/// A registrant as seen by the state machine (rating already resolved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signup {
    pub actor_id: ActorId,
    pub display_name: String,
    pub rating: Rating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Start(ScheduleKind),
    Join(Signup),
    JoinWithGuest(Signup),
    Leave(ActorId),
    Cancel,
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Start(_) => "start",
            Self::Join(_) => "join",
            Self::JoinWithGuest(_) => "join_with_guest",
            Self::Leave(_) => "leave",
            Self::Cancel => "cancel",
        }
    }
}

/// Input to `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    /// Idempotency key; also becomes the session id on Start.
    pub id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: ActionKind,
}

/// What a successful action did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Started { schedule: ScheduleKind },
    Joined { remaining: usize },
    Left { remaining: usize },
    Cancelled,
    TeamsFormed { teams: Teams },
    /// The action id was already applied to this session; nothing changed.
    Replayed,
}

impl Outcome {
    /// False only for replays, which must not be written back.
    #[inline]
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Replayed)
    }
}

/// New session plus what happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub session: Session,
    pub outcome: Outcome,
}

/// Apply an action to the current session.
///
/// On success the returned session carries `version + 1` (except for
/// replays, which return the input unchanged).
pub fn apply(
    current: &Session,
    action: &Action,
    rules: &Rules,
) -> Result<Transition, ValidationError> {
    if current.has_applied(action.id) {
        return Ok(Transition {
            session: current.clone(),
            outcome: Outcome::Replayed,
        });
    }

    let (mut session, outcome) = match &action.kind {
        ActionKind::Start(schedule) => start(current, action, *schedule, rules)?,
        ActionKind::Join(signup) => join(current, action, signup, EntryKind::Solo, rules)?,
        ActionKind::JoinWithGuest(signup) => {
            join(current, action, signup, EntryKind::WithGuest, rules)?
        }
        ActionKind::Leave(actor_id) => leave(current, *actor_id)?,
        ActionKind::Cancel => cancel(current)?,
    };

    session.version = current.version + 1;
    session.record_action(action.id);
    Ok(Transition { session, outcome })
}

fn start(
    current: &Session,
    action: &Action,
    schedule: ScheduleKind,
    rules: &Rules,
) -> Result<(Session, Outcome), ValidationError> {
    if current.state.is_active() {
        return Err(ValidationError::SessionActive);
    }

    let session = Session {
        id: action.id,
        chat_id: current.chat_id,
        schedule: Some(schedule),
        state: SessionState::Open,
        roster: Vec::new(),
        capacity: rules.capacity,
        created_at: action.at,
        version: current.version,
        teams: None,
        // Kept so a late redelivery from the previous session stays a replay.
        recent_actions: current.recent_actions.clone(),
    };
    Ok((session, Outcome::Started { schedule }))
}

fn require_open(current: &Session) -> Result<(), ValidationError> {
    match current.state {
        SessionState::Open => Ok(()),
        SessionState::Idle => Err(ValidationError::NoActiveSession),
        // Forming never accepts roster changes; terminal states are immutable.
        SessionState::Forming | SessionState::Formed | SessionState::Cancelled => {
            Err(ValidationError::SessionClosed)
        }
    }
}

fn join(
    current: &Session,
    action: &Action,
    signup: &Signup,
    kind: EntryKind,
    rules: &Rules,
) -> Result<(Session, Outcome), ValidationError> {
    require_open(current)?;

    if current.entry_for(signup.actor_id).is_some() {
        return Err(ValidationError::DuplicateEntry(signup.actor_id));
    }

    let needed = kind.slots();
    let remaining = current.remaining_slots();
    if remaining < needed {
        return Err(ValidationError::RosterFull { needed, remaining });
    }

    let mut session = current.clone();
    session.roster.push(Entry {
        actor_id: signup.actor_id,
        display_name: signup.display_name.clone(),
        kind,
        rating: signup.rating,
        joined_at: action.at,
    });

    if session.used_slots() == session.capacity {
        session.state = SessionState::Forming;
        debug!(
            chat_id = session.chat_id,
            slots = session.capacity,
            "roster full, forming teams"
        );
        let teams = form_teams(&session.roster, rules.guest_default_rating);
        session.teams = Some(teams.clone());
        session.state = SessionState::Formed;
        return Ok((session, Outcome::TeamsFormed { teams }));
    }

    let remaining = session.remaining_slots();
    Ok((session, Outcome::Joined { remaining }))
}

fn leave(current: &Session, actor_id: ActorId) -> Result<(Session, Outcome), ValidationError> {
    require_open(current)?;

    let Some(position) = current.roster.iter().position(|e| e.actor_id == actor_id) else {
        return Err(ValidationError::NotFound(actor_id));
    };

    let mut session = current.clone();
    session.roster.remove(position);
    let remaining = session.remaining_slots();
    Ok((session, Outcome::Left { remaining }))
}

fn cancel(current: &Session) -> Result<(Session, Outcome), ValidationError> {
    match current.state {
        SessionState::Open | SessionState::Forming => {
            let mut session = current.clone();
            session.state = SessionState::Cancelled;
            Ok((session, Outcome::Cancelled))
        }
        SessionState::Idle => Err(ValidationError::NoActiveSession),
        SessionState::Formed | SessionState::Cancelled => Err(ValidationError::SessionClosed),
    }
}

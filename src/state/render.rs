//! Roster display snapshots sent to the chat transport.

use super::session::{ChatId, EntryKind, Session, SessionState};
use super::teams::{Side, Slot, Teams};
use serde::Serialize;
use uuid::Uuid;

/// Rendered state of one chat's session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RosterSnapshot {
    pub chat_id: ChatId,
    pub session_id: Uuid,
    pub state: SessionState,
    pub version: u64,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teams: Option<Teams>,
}

/// Build the display snapshot for a session.
pub fn snapshot(session: &Session) -> RosterSnapshot {
    let lines = match session.state {
        SessionState::Idle => vec!["No active play list.".to_string()],
        SessionState::Cancelled => vec!["Play cancelled.".to_string()],
        SessionState::Open | SessionState::Forming => roster_lines(session),
        SessionState::Formed => team_lines(session),
    };

    RosterSnapshot {
        chat_id: session.chat_id,
        session_id: session.id,
        state: session.state,
        version: session.version,
        lines,
        teams: session.teams.clone(),
    }
}

fn header(session: &Session) -> Option<String> {
    session.schedule.map(|kind| {
        let d = kind.details();
        format!("{} Play {} at {}", d.day, d.time, d.location)
    })
}

/// Numbered signup list with one line per slot, padded out to capacity.
///
/// A guest entry takes two numbers: the registrant tagged `(+1)` and the
/// guest right after, so the empty numbers left are the open slots.
pub fn roster_lines(session: &Session) -> Vec<String> {
    let mut lines = Vec::with_capacity(session.capacity + 2);
    lines.extend(header(session));
    lines.push("In List :".to_string());

    let mut taken = Vec::with_capacity(session.used_slots());
    for e in &session.roster {
        match e.kind {
            EntryKind::Solo => taken.push(e.display_name.clone()),
            EntryKind::WithGuest => {
                taken.push(format!("{} (+1)", e.display_name));
                taken.push(format!("guest of {}", e.display_name));
            }
        }
    }

    let visible = session.capacity.max(taken.len());
    let mut taken = taken.into_iter();
    for n in 1..=visible {
        match taken.next() {
            Some(name) => lines.push(format!("{n}. {name}")),
            None => lines.push(format!("{n}.")),
        }
    }
    lines
}

fn slot_line(slot: &Slot) -> String {
    if slot.guest {
        format!("- {} (+1)", slot.display_name)
    } else {
        format!("- {}", slot.display_name)
    }
}

fn team_lines(session: &Session) -> Vec<String> {
    let mut lines = Vec::new();
    lines.extend(header(session));
    lines.push("Play list is full! Teams have been created:".to_string());

    let Some(teams) = &session.teams else {
        return lines;
    };

    lines.push(String::new());
    lines.push("Team Black:".to_string());
    lines.extend(teams.black.iter().map(slot_line));
    lines.push(String::new());
    lines.push("Team White:".to_string());
    lines.extend(teams.white.iter().map(slot_line));

    if !teams.bench.is_empty() {
        lines.push(String::new());
        lines.push("Bench:".to_string());
        for b in &teams.bench {
            let side = match b.reserve_for {
                Side::Black => "Black",
                Side::White => "White",
            };
            lines.push(format!("{} (reserve for {side})", slot_line(&b.slot)));
        }
    }
    lines
}

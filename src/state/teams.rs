//! Balanced team formation.
//!
//! Splits a full roster into Black and White with a snake draft over
//! rating-sorted player slots. The algorithm is pure and deterministic:
//! the same roster always yields the same teams.

use super::session::{ActorId, Entry, EntryKind, Rating};
use serde::{Deserialize, Serialize};

/// Team colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Black,
    White,
}

/// One player position, traced back to the entry that registered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub actor_id: ActorId,
    pub display_name: String,
    pub rating: Rating,
    /// True for the second slot of a `WithGuest` entry.
    pub guest: bool,
}

/// A slot left over when the slot total is odd.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchSlot {
    pub slot: Slot,
    /// The team this substitute joins when someone drops out.
    pub reserve_for: Side,
}

/// Result of a formation run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Teams {
    pub black: Vec<Slot>,
    pub white: Vec<Slot>,
    #[serde(default)]
    pub bench: Vec<BenchSlot>,
}

impl Teams {
    pub fn total_rating(&self, side: Side) -> i64 {
        let slots = match side {
            Side::Black => &self.black,
            Side::White => &self.white,
        };
        slots.iter().map(|s| i64::from(s.rating)).sum()
    }
}

/// Side for the `pick`-th slot of the draft: B, W, W, B, B, W, W, B, ...
#[inline]
pub fn snake_side(pick: usize) -> Side {
    match pick % 4 {
        0 | 3 => Side::Black,
        _ => Side::White,
    }
}

/// Expand entries into individual slots in signup order.
///
/// A guest inherits `guest_rating`, not the registrant's score.
pub fn expand_slots(roster: &[Entry], guest_rating: Rating) -> Vec<Slot> {
    let mut slots = Vec::with_capacity(roster.len() * 2);
    for entry in roster {
        slots.push(Slot {
            actor_id: entry.actor_id,
            display_name: entry.display_name.clone(),
            rating: entry.rating,
            guest: false,
        });
        if entry.kind == EntryKind::WithGuest {
            slots.push(Slot {
                actor_id: entry.actor_id,
                display_name: entry.display_name.clone(),
                rating: guest_rating,
                guest: true,
            });
        }
    }
    slots
}

/// Partition a full roster into two teams.
///
/// Must only be called with a roster that fills the session exactly.
pub fn form_teams(roster: &[Entry], guest_rating: Rating) -> Teams {
    let mut slots = expand_slots(roster, guest_rating);
    debug_assert!(!slots.is_empty(), "team formation on an empty roster");

    // Stable: equal ratings keep signup order.
    slots.sort_by(|a, b| b.rating.cmp(&a.rating));

    let leftover = if slots.len() % 2 == 1 { slots.pop() } else { None };

    let mut teams = Teams::default();
    for (pick, slot) in slots.into_iter().enumerate() {
        match snake_side(pick) {
            Side::Black => teams.black.push(slot),
            Side::White => teams.white.push(slot),
        }
    }

    if let Some(slot) = leftover {
        let reserve_for = if teams.white.len() < teams.black.len() {
            Side::White
        } else {
            Side::Black
        };
        teams.bench.push(BenchSlot { slot, reserve_for });
    }

    teams
}

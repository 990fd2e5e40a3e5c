//! # praxis-types
//!
//! Shared type definitions for the Praxis experiment runtime.
//! This crate contains data structures used across praxis-net and
//! praxis-server: seat and group identifiers, chip colors, the fixed-point
//! currency type, and the session parameter model.

pub mod money;
pub mod params;

pub use money::{Money, RoundingPolicy};
pub use params::{MatchParams, ParamsError, SessionParams};

/// Index of a participant seat within a session. Stable for the whole run;
/// distinct from any transport-level connection identifier.
pub type SeatId = usize;

/// Index of a group within a session.
pub type GroupId = usize;

/// Chip color. Each seat is assigned one color per match; each auction is
/// run for one color at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    Blue,
    Red,
}

impl Color {
    /// Both colors, in the order auctions run within a round.
    pub const ALL: [Color; 2] = [Color::Blue, Color::Red];

    pub fn as_str(self) -> &'static str {
        match self {
            Color::Blue => "blue",
            Color::Red => "red",
        }
    }
}

impl std::fmt::Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A production schedule: ordered `(green, colored)` output pairs. The seat
/// picks an index; the pair at that index is credited to its account.
pub type ProductionFunction = Vec<(i64, i64)>;

/// Per-seat balance sheet maintained by the auction controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Account {
    pub dollars: Money,
    pub blue: i64,
    pub red: i64,
    pub green: i64,
    pub round_score: i64,
    pub match_score: i64,
}

impl Account {
    pub fn chips(&self, color: Color) -> i64 {
        match color {
            Color::Blue => self.blue,
            Color::Red => self.red,
        }
    }

    pub fn chips_mut(&mut self, color: Color) -> &mut i64 {
        match color {
            Color::Blue => &mut self.blue,
            Color::Red => &mut self.red,
        }
    }
}

//! Action Space
//!
//! The policy chooses between two directional trades.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Number of discrete actions
pub const NUM_ACTIONS: usize = 2;

/// Directional trade action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Expect the close at exit to be above the close at entry
    Up,
    /// Expect the close at exit to be below the close at entry
    Down,
}

impl Action {
    /// All actions in tie-break order (first listed wins a tie).
    pub fn all() -> &'static [Action; NUM_ACTIONS] {
        &[Action::Up, Action::Down]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Up => "Up",
            Action::Down => "Down",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "Up" | "UP" | "up" => Ok(Action::Up),
            "Down" | "DOWN" | "down" => Ok(Action::Down),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

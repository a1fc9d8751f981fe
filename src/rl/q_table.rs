//! Tabular value function keyed by policy state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::core::{Action, StateKey};

/// Value estimates for both actions in one state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QValues {
    pub up: f64,
    pub down: f64,
}

impl QValues {
    pub fn get(&self, action: Action) -> f64 {
        match action {
            Action::Up => self.up,
            Action::Down => self.down,
        }
    }

    pub fn get_mut(&mut self, action: Action) -> &mut f64 {
        match action {
            Action::Up => &mut self.up,
            Action::Down => &mut self.down,
        }
    }

    /// Highest-valued action; the first action in `Action::all()` wins ties.
    pub fn best_action(&self) -> Action {
        let mut best = Action::all()[0];
        for &action in Action::all().iter().skip(1) {
            if self.get(action) > self.get(best) {
                best = action;
            }
        }
        best
    }

    pub fn max_value(&self) -> f64 {
        self.get(self.best_action())
    }
}

/// State -> action values. Entries are created lazily at zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QTable {
    entries: HashMap<StateKey, QValues>,
}

impl QTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `state`, inserting zeros on first encounter.
    pub fn entry(&mut self, state: StateKey) -> &mut QValues {
        self.entries.entry(state).or_default()
    }

    pub fn get(&self, state: &StateKey) -> Option<&QValues> {
        self.entries.get(state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

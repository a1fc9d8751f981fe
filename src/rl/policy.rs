//! Epsilon-greedy policy over a Q-table with one-step temporal-difference updates.
//!
//! The table and RNG sit behind a single mutex so a value update is never
//! observed half-written by a concurrent action choice.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::config::PolicyConfig;
use super::core::{Action, StateKey};
use super::q_table::{QTable, QValues};

struct PolicyState {
    table: QTable,
    rng: StdRng,
}

/// Owned value table exposing only action choice and value updates.
pub struct PolicyEngine {
    learning_rate: f64,
    discount_factor: f64,
    exploration_rate: f64,
    state: Mutex<PolicyState>,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            learning_rate: config.learning_rate,
            discount_factor: config.discount_factor,
            exploration_rate: config.exploration_rate,
            state: Mutex::new(PolicyState {
                table: QTable::new(),
                rng,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn exploration_rate(&self) -> f64 {
        self.exploration_rate
    }

    /// Random action with probability `exploration_rate`, otherwise the
    /// highest-valued action. Unseen states are initialized to zero first.
    pub fn choose_action(&self, state: &StateKey) -> Action {
        let mut guard = self.lock();
        let PolicyState { table, rng } = &mut *guard;
        let values = *table.entry(*state);

        if rng.gen::<f64>() < self.exploration_rate {
            let action = Action::all()[rng.gen_range(0..Action::all().len())];
            debug!(%state, %action, "exploring");
            action
        } else {
            values.best_action()
        }
    }

    /// `Q[s][a] += lr * (reward + gamma * max(Q[s']) - Q[s][a])`.
    ///
    /// Returns the updated value.
    pub fn update(
        &self,
        state: &StateKey,
        action: Action,
        reward: f64,
        next_state: &StateKey,
    ) -> f64 {
        let mut guard = self.lock();
        let next_max = guard.table.entry(*next_state).max_value();
        let q = guard.table.entry(*state).get_mut(action);
        *q += self.learning_rate * (reward + self.discount_factor * next_max - *q);
        debug!(%state, %action, reward, value = *q, "q-value updated");
        *q
    }

    pub fn q_values(&self, state: &StateKey) -> Option<QValues> {
        self.lock().table.get(state).copied()
    }

    pub fn state_count(&self) -> usize {
        self.lock().table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(exploration_rate: f64, seed: u64) -> PolicyEngine {
        PolicyEngine::new(&PolicyConfig {
            exploration_rate,
            seed: Some(seed),
            ..Default::default()
        })
    }

    #[test]
    fn greedy_choice_on_unseen_state_is_up() {
        let policy = engine(0.0, 1);
        for i in 0..100 {
            let state = StateKey::price(100.0 + i as f64);
            assert_eq!(policy.choose_action(&state), Action::Up);
            assert_eq!(policy.q_values(&state), Some(QValues::default()));
        }
    }

    #[test]
    fn full_exploration_is_roughly_uniform() {
        let policy = engine(1.0, 7);
        let state = StateKey::price(1.0);
        policy.update(&state, Action::Up, 1.0, &state);

        let trials = 10_000;
        let ups = (0..trials)
            .filter(|_| policy.choose_action(&state) == Action::Up)
            .count();
        let share = ups as f64 / trials as f64;
        assert!((share - 0.5).abs() < 0.03, "up share {share}");
    }

    #[test]
    fn update_matches_formula_exactly() {
        let policy = engine(0.0, 3);
        let a = StateKey::price(10.0);
        let b = StateKey::price(11.0);

        // Q[a][Up] = 0 + 0.1 * (1 + 0.9 * 0 - 0)
        let v1 = policy.update(&a, Action::Up, 1.0, &b);
        assert_eq!(v1, 0.1 * (1.0 + 0.9 * 0.0 - 0.0));

        // Q[b][Down] = 0 + 0.1 * (-1 + 0.9 * max(Q[a]) - 0)
        let v2 = policy.update(&b, Action::Down, -1.0, &a);
        let expected_v2 = 0.1 * (-1.0 + 0.9 * v1 - 0.0);
        assert_eq!(v2, expected_v2);

        // Q[a][Up] += 0.1 * (1 + 0.9 * max(Q[b]) - Q[a][Up]); max(Q[b]) is Up = 0
        let v3 = policy.update(&a, Action::Up, 1.0, &b);
        assert_eq!(v3, v1 + 0.1 * (1.0 + 0.9 * 0.0 - v1));

        let qa = policy.q_values(&a).unwrap();
        assert_eq!(qa.up, v3);
        assert_eq!(qa.down, 0.0);
        assert_eq!(policy.q_values(&b).unwrap().down, expected_v2);
        assert_eq!(policy.state_count(), 2);
    }

    #[test]
    fn learned_values_steer_greedy_choice() {
        let policy = engine(0.0, 5);
        let s = StateKey::price(50.0);
        let next = StateKey::price(51.0);
        policy.update(&s, Action::Up, -1.0, &next);
        assert_eq!(policy.choose_action(&s), Action::Down);
    }
}

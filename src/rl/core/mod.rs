//! Core RL abstractions
//!
//! Fundamental types for state representation and actions.

pub mod action;
pub mod state;

pub use action::{Action, NUM_ACTIONS};
pub use state::{BinnedCloseEncoder, LastCloseEncoder, StateEncoder, StateEncoderConfig, StateKey};

//! Reinforcement Learning Module
//!
//! Tabular Q-learning that turns a window of candles into a directional trade.
//!
//! - **State Representation**: candles mapped to a hashable key by a pluggable encoder
//! - **Action Space**: Up / Down
//! - **Algorithm**: epsilon-greedy action choice, one-step TD value update

pub mod config;
pub mod core;
pub mod policy;
pub mod q_table;

pub use config::PolicyConfig;
pub use core::{
    Action, BinnedCloseEncoder, LastCloseEncoder, StateEncoder, StateEncoderConfig, StateKey,
    NUM_ACTIONS,
};
pub use policy::PolicyEngine;
pub use q_table::{QTable, QValues};

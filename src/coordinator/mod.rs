//! Runtime coordination
//!
//! Bootstraps the components from configuration and drives the
//! whole-minute cadence with periodic non-blocking retraining.

pub mod bootstrap;
pub mod scheduler;

pub use bootstrap::Runtime;
pub use scheduler::{until_next_minute, ScheduleConfig, Scheduler};

//! Utility functions.
//!
//! Panic isolation at the candidate trust boundary and phase timing.

pub mod guard;
pub mod timer;

pub use guard::{catch_panic, CaughtPanic};
pub use timer::{Phase, PhaseTimers};

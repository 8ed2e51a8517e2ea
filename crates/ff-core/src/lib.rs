//! ff-core: shared types, IDs, errors, configuration, clock, and event system.
//!
//! This crate is the foundational dependency for all other ff-* crates,
//! providing the job identifier, a unified error type, resource-class and
//! operation enums, application configuration, a swappable clock, and a
//! broadcast event bus.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ids;
pub mod media;

// Re-export the most commonly used items at the crate root.
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use ids::*;
pub use media::*;

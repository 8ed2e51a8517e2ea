//! Route handlers for the HTTP API.

pub mod convert;
pub mod events;
pub mod health;
pub mod metrics;
pub mod queue;

//! The reconciliation engine.
//!
//! [`collect`] gathers desired and actual state, [`plan`] turns it into an
//! ordered list of actions, [`apply`] executes those actions, and [`Syncer`]
//! wraps the three in a single execution slot.

pub mod apply;
pub mod collect;
pub mod error;
pub mod plan;
pub mod syncer;

#[cfg(test)]
mod fake;

pub use apply::{ApplyReport, apply};
pub use error::{Error, Result};
pub use plan::Policy;
pub use syncer::{LastRun, Syncer};

//! Grafana HTTP API client implementing the teamsync `Platform` trait.
//!
//! HTTP failures are classified into [`PlatformError`] variants here, so the
//! engine never has to look at response bodies.
//!
//! [`PlatformError`]: teamsync_core::platform::PlatformError

mod client;
mod wire;

pub mod error;

pub use client::{GrafanaClient, GrafanaConfig};
pub use error::{Error, Result};

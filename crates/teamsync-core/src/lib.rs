//! Core types and trait definitions for teamsync.
//!
//! No HTTP or database code lives here. The store, directory and platform
//! crates implement the traits defined in this crate, and the engine only
//! ever sees those traits.

// Trait methods spell out `+ Send` futures; impls use plain `async fn`.
#![allow(async_fn_in_trait)]

pub mod audit;
pub mod directory;
pub mod error;
pub mod identity;
pub mod org;
pub mod plan;
pub mod platform;
pub mod role;
pub mod store;

pub use error::{Error, Result};

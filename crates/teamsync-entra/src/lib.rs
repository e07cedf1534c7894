//! Microsoft Entra ID (Graph API) client implementing the teamsync
//! `Directory` trait.
//!
//! Authenticates with the OAuth2 client-credentials flow and follows
//! `@odata.nextLink` until every page has been read.

mod client;
mod token;

pub mod error;

pub use client::{EntraClient, EntraConfig};
pub use error::{Error, Result};

//! JSON admin API for teamsync.
//!
//! Exposes an axum [`Router`] over a shared [`Syncer`]: org and mapping
//! management, plan preview/apply, status and settings. Auth and transport
//! concerns are the caller's responsibility.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest_service("/api", teamsync_api::api_router(syncer.clone()))
//! ```

pub mod error;
pub mod mappings;
pub mod orgs;
pub mod plan;
pub mod status;

use std::sync::Arc;

use axum::{
  Router,
  routing::{delete, get, post, put},
};
use teamsync_core::{directory::Directory, platform::Platform, store::MappingStore};
use teamsync_engine::Syncer;

pub use error::ApiError;

/// Build the admin router for `syncer`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S, P, D>(syncer: Arc<Syncer<S, P, D>>) -> Router<()>
where
  S: MappingStore + 'static,
  P: Platform + 'static,
  D: Directory + 'static,
{
  Router::new()
    // Orgs
    .route("/orgs", get(orgs::list::<S, P, D>).post(orgs::create::<S, P, D>))
    .route("/orgs/{id}", delete(orgs::remove::<S, P, D>))
    // Mappings
    .route(
      "/mappings",
      get(mappings::list::<S, P, D>).post(mappings::create::<S, P, D>),
    )
    .route("/mappings/purge", post(mappings::purge::<S, P, D>))
    .route(
      "/mappings/{id}",
      get(mappings::get_one::<S, P, D>)
        .put(mappings::update::<S, P, D>)
        .delete(mappings::remove::<S, P, D>),
    )
    // Plan
    .route("/plan", get(plan::current::<S, P, D>).delete(plan::clear::<S, P, D>))
    .route("/plan/preview", post(plan::preview::<S, P, D>))
    .route("/plan/apply", post(plan::apply::<S, P, D>))
    .route("/plan/apply-selected", post(plan::apply_selected::<S, P, D>))
    .route("/plan/run", post(plan::run::<S, P, D>))
    // Operations
    .route("/status", get(status::status::<S, P, D>))
    .route("/settings/auto-sync", put(status::set_auto_sync::<S, P, D>))
    .route("/audit", get(status::audit::<S, P, D>))
    .route(
      "/directory/groups/{id}/members",
      get(status::group_members::<S, P, D>),
    )
    .route("/directory/users", get(status::directory_users::<S, P, D>))
    .with_state(syncer)
}

//! Route configuration.
//!
//! Dual surface: typed metadata handlers under `/_/api/v1`, and the blob
//! surface as the router fallback so blob names can never collide with
//! API routes.

use crate::auth::auth_middleware;
use crate::handlers;
use crate::state::AppState;
use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/fs", get(handlers::meta::get_meta_root))
        .route(
            "/fs/{*path}",
            get(handlers::meta::get_meta)
                .patch(handlers::meta::patch_meta)
                .post(handlers::mutate::post_fs),
        )
        .route("/streams", get(handlers::streams::list_streams))
        .route("/streams/{name}", get(handlers::streams::get_stream))
        .route("/system/sync", post(handlers::system::trigger_sync));

    Router::new()
        .nest("/_/api/v1", api_routes)
        // Everything else is the blob surface; unknown /_/api paths fall
        // through here and 404.
        .fallback(handlers::files::dispatch)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

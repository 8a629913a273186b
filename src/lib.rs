//! Depot server
//!
//! A self-hosted file-manager backend: a permission-gated virtual
//! filesystem rooted at a host directory, with resumable chunked uploads
//! and streaming multi-format archive export.

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod access;
pub mod archive;
pub mod config;
pub mod error;
pub mod files;
pub mod fsutil;
pub mod routes;
pub mod state;
pub mod upload;

pub use state::AppState;

/// Build the application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/health", routes::health::router())
        .nest("/api/resources", routes::resources::router())
        .route("/api/resources/", routes::resources::root_routes())
        .nest("/api/raw", routes::raw::router())
        .nest("/api/upload", routes::upload::router())
        .nest("/api/unzip", routes::raw::unzip_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

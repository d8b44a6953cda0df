//! Herb Finder
//!
//! Client core of a plant-discovery app together with the REST backend it talks
//! to. The client side tracks the signed-in identity, loads the post feed page by
//! page, keeps a user lookup table, and runs the upload, analyze and persist
//! pipeline for new posts. The backend is an axum service with SQLite
//! persistence, bearer-token auth and a chunked object store.

pub mod analysis;
pub mod api;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod feed;
pub mod lookup;
pub mod models;
pub mod remote;
pub mod request;
pub mod session;
pub mod storage;
pub mod submit;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use analysis::PlantAnalyzer;
use config::Config;
use db::Repository;
use storage::ObjectStorage;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub storage: Arc<ObjectStorage>,
    pub analyzer: Arc<dyn PlantAnalyzer>,
    pub config: Arc<Config>,
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Routes that require an id token
    let protected_routes = Router::new()
        // Users
        .route("/users", get(api::list_users))
        .route("/users/{id}/posts", get(api::list_user_posts))
        // Posts
        .route("/posts", get(api::list_posts).post(api::create_post))
        .route("/posts/{id}", get(api::get_post))
        .route("/posts/{id}/like", post(api::like_post))
        // Analysis
        .route("/analyze_plant_image", post(api::analyze_plant_image))
        // Object store writes
        .route("/storage/{*path}", post(api::upload_object))
        // Session
        .route("/auth/sign_out", post(api::sign_out))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::bearer_auth_layer,
        ));

    // Public routes
    let public_routes = Router::new()
        .route("/health", get(health_check))
        .route("/create_user", post(api::create_user))
        .route("/auth/sign_in", post(api::sign_in))
        .route("/auth/token", post(api::refresh_token))
        .route("/verify_token", post(api::verify_token))
        .route("/storage/{*path}", get(api::download_object));

    Router::new()
        .merge(protected_routes)
        .merge(public_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

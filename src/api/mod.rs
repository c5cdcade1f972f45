//! REST API over the artifact manager and servable model

pub mod handlers;
pub mod models;
pub mod routes;

pub use routes::{AppState, create_router};

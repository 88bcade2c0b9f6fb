use api_state::ApiState;
use axum::{extract::FromRef, routing::get, Router};
use routes::{
    health::{live, ready},
    search::search,
};

pub mod api_state;
pub mod error;
mod routes;

/// Search API plus liveness and readiness probes. Mount under `/api`.
///
/// Only `GET` is routed on `/search`; other methods get an empty 405.
pub fn api_routes<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    Router::new()
        .route("/search", get(search))
        .route("/live", get(live))
        .route("/ready", get(ready))
}

use axum::{routing::get, Json, Router};
use models::api::{ApiSuccessResponseBody, HealthResponse};

use crate::{app::AppState, prelude::*};

/// The routes for reading, creating and updating apps
mod apps;

/// Sets up the routes for the API.
#[instrument(skip(state))]
pub fn setup_routes(state: &AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.merge(apps::setup_routes())
		.with_state(state.clone())
}

/// Reports that the server is up
async fn health() -> Json<ApiSuccessResponseBody<HealthResponse>> {
	Json(ApiSuccessResponseBody::new(HealthResponse {}))
}

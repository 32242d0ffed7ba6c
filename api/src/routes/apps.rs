use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::StatusCode,
	routing::get,
	Json,
	Router,
};
use models::{
	api::{ApiSuccessResponseBody, GetAppResponse, ListAppsResponse, SaveAppResponse},
	app::{self, AppSpec},
	ValidationErrors,
};
use serde_json::Value;

use crate::{app::AppState, prelude::*, service};

/// The JSON body of a successful response
type ApiResponse<T> = Json<ApiSuccessResponseBody<T>>;

/// Sets up the app routes
pub fn setup_routes() -> Router<AppState> {
	Router::new()
		.route("/apps", get(list_apps).post(create_app))
		.route("/apps/:name", get(get_app).put(update_app))
}

/// Lists every app along with its live status
async fn list_apps(State(state): State<AppState>) -> Result<ApiResponse<ListAppsResponse>, AppError> {
	let apps = service::get_apps(&state).await?;
	Ok(Json(ApiSuccessResponseBody::new(ListAppsResponse { apps })))
}

/// Reads one app along with its live status
async fn get_app(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<ApiResponse<GetAppResponse>, AppError> {
	let app = service::get_app(&state, &name).await?;
	Ok(Json(ApiSuccessResponseBody::new(GetAppResponse { app })))
}

/// Creates a new app from the app spec in the body
async fn create_app(
	State(state): State<AppState>,
	body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, ApiResponse<SaveAppResponse>), AppError> {
	let spec = parse_spec(body)?;
	info!("Creating app `{}`", spec.name);

	let outcome = service::create_app(&state, spec.clone()).await?;

	Ok((
		StatusCode::CREATED,
		Json(ApiSuccessResponseBody::new(SaveAppResponse {
			app: spec,
			commit: outcome.commit_id(),
		})),
	))
}

/// Replaces the app spec of an existing app with the one in the body
async fn update_app(
	State(state): State<AppState>,
	Path(name): Path<String>,
	body: Result<Json<Value>, JsonRejection>,
) -> Result<ApiResponse<SaveAppResponse>, AppError> {
	let spec = parse_spec(body)?;
	info!("Updating app `{}`", name);

	let outcome = service::update_app(&state, &name, spec.clone()).await?;

	Ok(Json(ApiSuccessResponseBody::new(SaveAppResponse {
		app: spec,
		commit: outcome.commit_id(),
	})))
}

/// Validates a request body as an app spec. A body that is not JSON is
/// reported as an error on the whole document.
fn parse_spec(body: Result<Json<Value>, JsonRejection>) -> Result<AppSpec, AppError> {
	let Json(value) = body.map_err(|rejection| {
		let mut errors = ValidationErrors::default();
		errors.push("", rejection.body_text());
		AppError::Validation(errors)
	})?;
	Ok(app::validate(value)?)
}

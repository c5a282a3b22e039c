use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use maestro_core::settings;
use maestro_core::types::ServiceStatus;
use maestro_supervisor::supervisor::Supervisor;

use crate::google;

pub const SECRET_HEADER: &str = "x-maestro-secret";

#[derive(Clone)]
pub struct AppState {
	pub supervisor: Arc<Supervisor>,
	pub secret: Option<String>,
	pub api_port: u16,
	pub config_dir: PathBuf,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/update-settings", post(update_settings))
		.route("/google/oauth/start", get(oauth_start))
		.route("/google/oauth2callback", get(oauth_callback))
		.route("/api/services", get(list_services))
		.route("/api/services/{name}/logs", get(service_logs))
		.layer(CorsLayer::permissive())
		.with_state(state)
}

#[derive(Deserialize)]
struct UpdatePayload {
	#[serde(default)]
	updates: Vec<UpdateEntry>,
}

#[derive(Deserialize)]
struct UpdateEntry {
	app: String,
	#[serde(default)]
	env: HashMap<String, String>,
}

#[derive(Serialize)]
struct OkResponse {
	ok: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
	error: String,
}

async fn update_settings(
	State(state): State<AppState>,
	headers: HeaderMap,
	body: String,
) -> Result<Json<OkResponse>, (StatusCode, Json<ErrorResponse>)> {
	// Shared-secret gate, only when one is configured. Unset means open:
	// the default deployment is a single local machine.
	if let Some(expected) = &state.secret {
		let provided = headers
			.get(SECRET_HEADER)
			.and_then(|v| v.to_str().ok())
			.unwrap_or("");
		if provided != expected {
			return Err((
				StatusCode::UNAUTHORIZED,
				Json(ErrorResponse {
					error: "unauthorized".to_string(),
				}),
			));
		}
	}

	let payload: UpdatePayload = serde_json::from_str(&body).map_err(|e| {
		(
			StatusCode::BAD_REQUEST,
			Json(ErrorResponse {
				error: format!("invalid payload: {}", e),
			}),
		)
	})?;

	// Entries are independent; one bad entry never blocks the rest.
	for entry in &payload.updates {
		if let Err(e) = apply_entry(&state, entry).await {
			tracing::warn!("settings update for {} failed: {}", entry.app, e);
		}
	}

	Ok(Json(OkResponse { ok: true }))
}

async fn apply_entry(state: &AppState, entry: &UpdateEntry) -> Result<(), String> {
	let def = state
		.supervisor
		.service_def(&entry.app)
		.await
		.ok_or_else(|| format!("unknown service: {}", entry.app))?;
	settings::apply_update(&def, &state.supervisor.config.secrets_path, &entry.env)?;
	state.supervisor.restart_service(&entry.app).await?;
	Ok(())
}

async fn oauth_start(State(state): State<AppState>) -> Response {
	let client = match google::load_client(&state.config_dir) {
		Ok(client) => client,
		Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
	};
	let redirect_uri = google::redirect_uri(state.api_port);
	let url = google::auth_url(&client, &redirect_uri, &google::requested_scopes());

	Response::builder()
		.status(StatusCode::FOUND)
		.header(header::LOCATION, url)
		.body(axum::body::Body::empty())
		.unwrap()
}

#[derive(Deserialize)]
struct CallbackQuery {
	code: Option<String>,
}

async fn oauth_callback(
	State(state): State<AppState>,
	Query(query): Query<CallbackQuery>,
) -> Response {
	let Some(code) = query.code.filter(|c| !c.is_empty()) else {
		return (StatusCode::BAD_REQUEST, "missing code in callback").into_response();
	};

	let client = match google::load_client(&state.config_dir) {
		Ok(client) => client,
		Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e).into_response(),
	};
	let redirect_uri = google::redirect_uri(state.api_port);

	let token = match google::exchange_code(&client, &redirect_uri, &code).await {
		Ok(token) => token,
		Err(e) => {
			return (
				StatusCode::INTERNAL_SERVER_ERROR,
				Json(ErrorResponse { error: e }),
			)
				.into_response();
		}
	};

	if let Err(e) = google::install_token(&state.supervisor, &token).await {
		return (
			StatusCode::INTERNAL_SERVER_ERROR,
			Json(ErrorResponse { error: e }),
		)
			.into_response();
	}

	Html(
		"<html><body><h2>Google authorization complete</h2>\
		 <p>Tokens were saved for the email-sending service. You can close this window.</p>\
		 </body></html>",
	)
	.into_response()
}

async fn list_services(State(state): State<AppState>) -> Json<Vec<ServiceStatus>> {
	Json(state.supervisor.status().await)
}

async fn service_logs(
	State(state): State<AppState>,
	Path(name): Path<String>,
) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
	match state.supervisor.logs_snapshot(&name).await {
		Ok(snapshot) => Ok(String::from_utf8_lossy(&snapshot).to_string()),
		Err(e) => Err((StatusCode::NOT_FOUND, Json(ErrorResponse { error: e }))),
	}
}

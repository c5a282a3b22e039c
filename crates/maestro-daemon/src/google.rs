use maestro_core::settings;
use maestro_supervisor::supervisor::Supervisor;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_SCOPES: &str =
	"https://www.googleapis.com/auth/gmail.send https://www.googleapis.com/auth/gmail.readonly";
/// The service this flow provisions credentials for.
const TOKEN_SERVICE: &str = "email-sending";

#[derive(Debug, Clone)]
pub struct OAuthClient {
	pub client_id: String,
	pub client_secret: String,
}

#[derive(Debug, Default, Deserialize)]
struct ClientFile {
	web: Option<ClientKeys>,
	installed: Option<ClientKeys>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientKeys {
	client_id: Option<String>,
	client_secret: Option<String>,
}

/// Environment wins; otherwise the downloaded client JSON in the config dir.
pub fn load_client(config_dir: &Path) -> Result<OAuthClient, String> {
	let mut client_id = env_nonempty("GOOGLE_CLIENT_ID");
	let mut client_secret = env_nonempty("GOOGLE_CLIENT_SECRET");

	if client_id.is_none() || client_secret.is_none() {
		let path = config_dir.join("google_oauth_client.json");
		if let Ok(raw) = std::fs::read_to_string(&path) {
			if let Ok(cfg) = serde_json::from_str::<ClientFile>(&raw) {
				let keys = cfg.web.or(cfg.installed).unwrap_or_default();
				client_id = client_id.or(keys.client_id);
				client_secret = client_secret.or(keys.client_secret);
			}
		}
	}

	match (client_id, client_secret) {
		(Some(client_id), Some(client_secret)) => Ok(OAuthClient {
			client_id,
			client_secret,
		}),
		_ => Err(format!(
			"google oauth client not configured; set GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET or place google_oauth_client.json in {}",
			config_dir.display()
		)),
	}
}

pub fn redirect_uri(api_port: u16) -> String {
	env_nonempty("GOOGLE_REDIRECT_URI")
		.unwrap_or_else(|| format!("http://localhost:{}/google/oauth2callback", api_port))
}

pub fn requested_scopes() -> String {
	env_nonempty("GOOGLE_OAUTH_SCOPES").unwrap_or_else(|| DEFAULT_SCOPES.to_string())
}

pub fn auth_url(client: &OAuthClient, redirect_uri: &str, scopes: &str) -> String {
	let query = url::form_urlencoded::Serializer::new(String::new())
		.append_pair("client_id", &client.client_id)
		.append_pair("redirect_uri", redirect_uri)
		.append_pair("response_type", "code")
		.append_pair("scope", scopes)
		.append_pair("access_type", "offline")
		.append_pair("prompt", "consent")
		.finish();
	format!("{}?{}", AUTH_ENDPOINT, query)
}

/// Server-to-server exchange of the one-time authorization code. Upstream
/// failures are surfaced verbatim; the code is single-use, so no retry.
pub async fn exchange_code(
	client: &OAuthClient,
	redirect_uri: &str,
	code: &str,
) -> Result<serde_json::Value, String> {
	let http = reqwest::Client::builder()
		.build()
		.map_err(|e| format!("http client unavailable: {}", e))?;

	let params = [
		("code", code),
		("client_id", client.client_id.as_str()),
		("client_secret", client.client_secret.as_str()),
		("redirect_uri", redirect_uri),
		("grant_type", "authorization_code"),
	];
	let resp = http
		.post(TOKEN_ENDPOINT)
		.form(&params)
		.send()
		.await
		.map_err(|e| format!("token request failed: {}", e))?;

	let status = resp.status();
	let body = resp
		.text()
		.await
		.map_err(|e| format!("token response unreadable: {}", e))?;
	if !status.is_success() {
		return Err(format!("token exchange failed ({}): {}", status, body));
	}
	serde_json::from_str(&body).map_err(|e| format!("token response was not json: {}", e))
}

/// Persist token material where email-sending expects it, flip the provider
/// flag on, and restart the service so it picks the credential up.
pub async fn install_token(
	supervisor: &Arc<Supervisor>,
	token: &serde_json::Value,
) -> Result<(), String> {
	let def = supervisor
		.service_def(TOKEN_SERVICE)
		.await
		.ok_or_else(|| format!("unknown service: {}", TOKEN_SERVICE))?;

	let data = serde_json::to_string_pretty(token).map_err(|e| e.to_string())?;
	let out_path = def.dir.join("google_token.json");
	std::fs::write(&out_path, data)
		.map_err(|e| format!("failed to write {}: {}", out_path.display(), e))?;

	// Flag flip and restart are best-effort; the token itself is saved.
	let mut update = HashMap::new();
	update.insert("USE_GMAIL_API".to_string(), "true".to_string());
	if let Err(e) = settings::apply_update(&def, &supervisor.config.secrets_path, &update) {
		tracing::warn!("failed to enable gmail for {}: {}", TOKEN_SERVICE, e);
	}
	if let Err(e) = supervisor.restart_service(TOKEN_SERVICE).await {
		tracing::warn!("failed to restart {}: {}", TOKEN_SERVICE, e);
	}
	Ok(())
}

fn env_nonempty(key: &str) -> Option<String> {
	std::env::var(key).ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn auth_url_carries_the_flow_params() {
		let client = OAuthClient {
			client_id: "id-123".into(),
			client_secret: "supersekrit".into(),
		};
		let url = auth_url(&client, "http://localhost:4010/google/oauth2callback", "scope-a scope-b");
		assert!(url.starts_with(AUTH_ENDPOINT));
		assert!(url.contains("client_id=id-123"));
		assert!(url.contains("response_type=code"));
		assert!(url.contains("scope=scope-a+scope-b"));
		assert!(url.contains("access_type=offline"));
		assert!(url.contains("prompt=consent"));
		assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A4010%2Fgoogle%2Foauth2callback"));
		assert!(!url.contains("supersekrit"), "client secret never goes in the redirect");
	}

	#[test]
	fn client_loads_from_downloaded_json() {
		let dir = std::env::temp_dir().join("maestro-google-test-client");
		let _ = std::fs::create_dir_all(&dir);
		std::fs::write(
			dir.join("google_oauth_client.json"),
			r#"{"web":{"client_id":"file-id","client_secret":"file-secret"}}"#,
		)
		.unwrap();

		if std::env::var("GOOGLE_CLIENT_ID").is_err() {
			let client = load_client(&dir).unwrap();
			assert_eq!(client.client_id, "file-id");
			assert_eq!(client.client_secret, "file-secret");
		}

		let _ = std::fs::remove_dir_all(&dir);
	}

	#[test]
	fn missing_client_is_a_config_error() {
		let dir = std::env::temp_dir().join("maestro-google-test-missing");
		let _ = std::fs::create_dir_all(&dir);

		if std::env::var("GOOGLE_CLIENT_ID").is_err() {
			let err = load_client(&dir).unwrap_err();
			assert!(err.contains("GOOGLE_CLIENT_ID"));
		}

		let _ = std::fs::remove_dir_all(&dir);
	}
}

use crate::paths::config_dir;
use crate::types::ServiceDef;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct GlobalConfig {
	#[serde(default)]
	pub api: ApiConfig,
	#[serde(default)]
	pub logs: LogsConfig,
	#[serde(default)]
	pub apps: AppsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
	#[serde(default = "default_api_port")]
	pub port: u16,
	pub secret: Option<String>,
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			port: default_api_port(),
			secret: None,
		}
	}
}

fn default_api_port() -> u16 {
	4010
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsConfig {
	pub dir: Option<String>,
	#[serde(default = "default_max_size")]
	pub max_size_bytes: u64,
	#[serde(default = "default_max_age_days")]
	pub max_age_days: u32,
	#[serde(default = "default_max_files")]
	pub max_files: u32,
}

impl Default for LogsConfig {
	fn default() -> Self {
		Self {
			dir: None,
			max_size_bytes: default_max_size(),
			max_age_days: default_max_age_days(),
			max_files: default_max_files(),
		}
	}
}

fn default_max_size() -> u64 {
	10 * 1024 * 1024
}
fn default_max_age_days() -> u32 {
	7
}
fn default_max_files() -> u32 {
	5
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppsConfig {
	pub root: Option<String>,
}

impl GlobalConfig {
	pub fn api_port(&self) -> u16 {
		std::env::var("MAESTRO_API_PORT")
			.ok()
			.and_then(|v| v.parse().ok())
			.unwrap_or(self.api.port)
	}

	pub fn api_secret(&self) -> Option<String> {
		std::env::var("MAESTRO_SECRET")
			.ok()
			.filter(|v| !v.is_empty())
			.or_else(|| self.api.secret.clone())
	}

	pub fn apps_root(&self) -> PathBuf {
		if let Ok(dir) = std::env::var("MAESTRO_APPS_ROOT") {
			return expand_tilde(&dir);
		}
		match &self.apps.root {
			Some(root) => expand_tilde(root),
			None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
		}
	}

	pub fn log_dir(&self) -> PathBuf {
		match &self.logs.dir {
			Some(dir) => expand_tilde(dir),
			None => crate::paths::log_dir(),
		}
	}
}

pub fn load_global_config() -> GlobalConfig {
	let path = config_dir().join("config.toml");
	if path.exists() {
		match std::fs::read_to_string(&path) {
			Ok(content) => match toml::from_str(&content) {
				Ok(config) => return config,
				Err(e) => tracing::warn!("failed to parse {}: {}", path.display(), e),
			},
			Err(e) => tracing::warn!("failed to read {}: {}", path.display(), e),
		}
	}
	GlobalConfig::default()
}

/// The fleet is fixed: four app services laid out under the apps root.
pub fn builtin_services(apps_root: &Path) -> Vec<ServiceDef> {
	[
		("scraper", "scraper-app", 3001),
		("email-sending", "email-sending-app", 3002),
		("email-writing", "email-writing-app", 3003),
		("task-management", "task-management-app", 3004),
	]
	.into_iter()
	.map(|(name, dir, port)| ServiceDef {
		name: name.to_string(),
		dir: apps_root.join(dir),
		command: "node src/app.js".to_string(),
		default_port: port,
	})
	.collect()
}

pub fn expand_tilde(path: &str) -> PathBuf {
	if let Some(rest) = path.strip_prefix("~/") {
		if let Ok(home) = std::env::var("HOME") {
			return PathBuf::from(home).join(rest);
		}
	}
	PathBuf::from(path)
}

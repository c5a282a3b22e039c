use std::collections::HashMap;
use std::path::Path;

/// Per-service secret material, kept in one JSON file apart from the plaintext
/// settings. This is a background trust store, not a security boundary: a
/// missing or corrupt file reads as empty so supervision keeps going.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
	entries: HashMap<String, HashMap<String, String>>,
}

impl SecretStore {
	pub fn load(path: &Path) -> Self {
		let raw = match std::fs::read_to_string(path) {
			Ok(raw) => raw,
			Err(_) => return Self::default(),
		};
		match serde_json::from_str(&raw) {
			Ok(entries) => Self { entries },
			Err(e) => {
				tracing::warn!("ignoring malformed secret store {}: {}", path.display(), e);
				Self::default()
			}
		}
	}

	/// Rewrite the whole store. Failure is logged only; the in-memory update
	/// already happened and the next save retries the full state.
	pub fn save(&self, path: &Path) {
		let data = match serde_json::to_string_pretty(&self.entries) {
			Ok(data) => data,
			Err(e) => {
				tracing::warn!("failed to serialize secret store: {}", e);
				return;
			}
		};
		if let Some(parent) = path.parent() {
			let _ = std::fs::create_dir_all(parent);
		}
		if let Err(e) = std::fs::write(path, data) {
			tracing::warn!("failed to write secret store {}: {}", path.display(), e);
		}
	}

	pub fn get(&self, service: &str) -> HashMap<String, String> {
		self.entries.get(service).cloned().unwrap_or_default()
	}

	pub fn insert(&mut self, service: &str, key: String, value: String) {
		self.entries
			.entry(service.to_string())
			.or_default()
			.insert(key, value);
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

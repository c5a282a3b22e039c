use crate::envfile;
use crate::secrets::SecretStore;
use crate::types::ServiceDef;
use std::collections::HashMap;
use std::path::Path;

/// Keys that never land in a service's plaintext `.env`; they live only in
/// the secret store.
pub const SENSITIVE_KEYS: [&str; 5] = [
	"LLM_GEMINI_API_KEY",
	"LLM_OPENAI_API_KEY",
	"GOOGLE_CLIENT_ID",
	"GOOGLE_CLIENT_SECRET",
	"GOOGLE_REFRESH_TOKEN",
];

pub fn is_sensitive(key: &str) -> bool {
	SENSITIVE_KEYS.contains(&key)
}

/// Overlay in increasing precedence: base env, plaintext settings, secrets.
pub fn merge_env(
	base: HashMap<String, String>,
	file_vars: HashMap<String, String>,
	secrets: HashMap<String, String>,
) -> HashMap<String, String> {
	let mut env = base;
	env.extend(file_vars);
	env.extend(secrets);
	env
}

/// The environment a spawn should run with. Both file sources are re-read
/// from disk on every call: a restart is exactly how a settings change takes
/// effect, so there is no cache to go stale.
pub fn service_env(def: &ServiceDef, secrets_path: &Path) -> HashMap<String, String> {
	merge_env(
		std::env::vars().collect(),
		envfile::load_env_file(&def.dir.join(".env")),
		SecretStore::load(secrets_path).get(&def.name),
	)
}

pub fn resolve_port(env: &HashMap<String, String>, default_port: u16) -> u16 {
	env.get("PORT")
		.and_then(|v| v.parse().ok())
		.unwrap_or(default_port)
}

/// Split an update into its plaintext and secret destinations. Unknown keys
/// default to plaintext.
pub fn partition_update(
	update: &HashMap<String, String>,
) -> (HashMap<String, String>, HashMap<String, String>) {
	let mut plain = HashMap::new();
	let mut secret = HashMap::new();
	for (key, value) in update {
		if is_sensitive(key) {
			secret.insert(key.clone(), value.clone());
		} else {
			plain.insert(key.clone(), value.clone());
		}
	}
	(plain, secret)
}

/// Persist one service's settings update: the secret part goes to the store,
/// the rest is merged into the service's `.env` (keys not named in the update
/// are preserved).
pub fn apply_update(
	def: &ServiceDef,
	secrets_path: &Path,
	update: &HashMap<String, String>,
) -> Result<(), String> {
	let (plain, secret) = partition_update(update);

	if !secret.is_empty() {
		let mut store = SecretStore::load(secrets_path);
		for (key, value) in secret {
			store.insert(&def.name, key, value);
		}
		store.save(secrets_path);
	}

	let env_path = def.dir.join(".env");
	let mut vars = envfile::load_env_file(&env_path);
	vars.extend(plain);
	envfile::save_env_file(&env_path, &vars)
}

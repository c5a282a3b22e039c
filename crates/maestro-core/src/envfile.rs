use std::collections::HashMap;
use std::path::Path;

/// Read a service's `.env` file. A missing or unreadable file is an empty map;
/// supervision never blocks on plaintext settings.
pub fn load_env_file(path: &Path) -> HashMap<String, String> {
	match std::fs::read_to_string(path) {
		Ok(raw) => parse(&raw),
		Err(_) => HashMap::new(),
	}
}

pub fn parse(raw: &str) -> HashMap<String, String> {
	let mut out = HashMap::new();
	for line in raw.lines() {
		let line = line.trim();
		if line.is_empty() || line.starts_with('#') {
			continue;
		}
		let Some(eq) = line.find('=') else { continue };
		let key = line[..eq].trim();
		if key.is_empty() {
			continue;
		}
		let mut value = line[eq + 1..].trim();
		if value.len() >= 2
			&& ((value.starts_with('"') && value.ends_with('"'))
				|| (value.starts_with('\'') && value.ends_with('\'')))
		{
			value = &value[1..value.len() - 1];
		}
		out.insert(key.to_string(), value.to_string());
	}
	out
}

/// Rewrite the whole file. Keys are sorted (a HashMap has no stable order) and
/// embedded newlines are escaped so every entry stays on one line.
pub fn save_env_file(path: &Path, vars: &HashMap<String, String>) -> Result<(), String> {
	let mut keys: Vec<&String> = vars.keys().collect();
	keys.sort();
	let mut out = String::new();
	for key in keys {
		out.push_str(key);
		out.push('=');
		out.push_str(&vars[key].replace('\n', "\\n"));
		out.push('\n');
	}
	std::fs::write(path, out).map_err(|e| format!("failed to write {}: {}", path.display(), e))
}

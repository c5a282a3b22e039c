use std::path::PathBuf;

pub fn state_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
		PathBuf::from(dir).join("maestro")
	} else if let Some(home) = home_dir() {
		home.join(".local").join("state").join("maestro")
	} else {
		PathBuf::from("/tmp/maestro")
	}
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join("maestro")
	} else if let Some(home) = home_dir() {
		home.join(".config").join("maestro")
	} else {
		PathBuf::from("/tmp/maestro/config")
	}
}

pub fn log_dir() -> PathBuf {
	state_dir().join("logs")
}

pub fn secrets_path() -> PathBuf {
	state_dir().join("secrets.json")
}

pub fn pid_path() -> PathBuf {
	state_dir().join("daemon.pid")
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

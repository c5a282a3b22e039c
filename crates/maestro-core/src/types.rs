use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One supervised app service. Built once at daemon start, never mutated.
#[derive(Debug, Clone)]
pub struct ServiceDef {
	pub name: String,
	pub dir: PathBuf,
	pub command: String,
	pub default_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ServiceState {
	Stopped,
	Starting,
	Running { pid: u32, port: u16 },
	/// Died on its own; waiting out the crash back-off.
	Crashed { exit_code: i32, restarts: u32 },
	/// Killed by the supervisor itself; waiting out the short restart delay.
	Restarting,
}

impl ServiceState {
	pub fn is_running(&self) -> bool {
		matches!(self, ServiceState::Running { .. })
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
	pub name: String,
	pub state: ServiceState,
	pub pid: Option<u32>,
}

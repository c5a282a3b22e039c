use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::{watch, RwLock};

use maestro_core::settings;
use maestro_core::types::{ServiceDef, ServiceState, ServiceStatus};

use crate::health::{HealthConfig, HealthMonitor};
use crate::output::LogSink;

pub const CRASH_BACKOFF_BASE_MS: u64 = 1000;
pub const CRASH_BACKOFF_CAP_MS: u64 = 60_000;
pub const INTENTIONAL_RESTART_DELAY_MS: u64 = 1000;

pub struct SupervisorConfig {
	pub log_dir: PathBuf,
	pub max_log_size: u64,
	pub secrets_path: PathBuf,
	pub health: HealthConfig,
}

/// Owns every service's runner state. Constructed once at start-up and handed
/// to the control plane; there are no ambient globals.
pub struct Supervisor {
	services: RwLock<HashMap<String, Runner>>,
	pub config: SupervisorConfig,
}

/// Supervisory bookkeeping for one service. The child handle itself lives in
/// the service's loop task; nothing else touches it.
struct Runner {
	def: ServiceDef,
	state: ServiceState,
	expected_exit: Arc<AtomicBool>,
	sink: LogSink,
	cancel: Option<watch::Sender<bool>>,
}

impl Supervisor {
	pub fn new(config: SupervisorConfig) -> Arc<Self> {
		Arc::new(Self {
			services: RwLock::new(HashMap::new()),
			config,
		})
	}

	/// Begin supervising a service: register its runner and spawn the loop
	/// task that owns the child process from here on.
	pub async fn start_service(self: &Arc<Self>, def: ServiceDef) -> Result<String, String> {
		{
			let services = self.services.read().await;
			if let Some(runner) = services.get(&def.name) {
				if runner.cancel.is_some() {
					return Ok(format!("{}: already supervised", def.name));
				}
			}
		}

		let sink = LogSink::new(&self.config.log_dir, &def.name, self.config.max_log_size);
		let expected_exit = Arc::new(AtomicBool::new(false));
		let (cancel_tx, cancel_rx) = watch::channel(false);

		{
			let mut services = self.services.write().await;
			services.insert(
				def.name.clone(),
				Runner {
					def: def.clone(),
					state: ServiceState::Starting,
					expected_exit: Arc::clone(&expected_exit),
					sink: sink.clone(),
					cancel: Some(cancel_tx),
				},
			);
		}

		let sup = Arc::clone(self);
		let name = def.name.clone();
		tokio::spawn(async move {
			run_service_loop(sup, def, expected_exit, sink, cancel_rx).await;
		});

		Ok(format!("{}: starting", name))
	}

	/// Stop supervising: cancel the loop and ask the child's process group to
	/// terminate. The crash counter is untouched; only shutdown comes here.
	pub async fn stop_service(self: &Arc<Self>, name: &str) -> Result<String, String> {
		let mut services = self.services.write().await;
		let runner = services
			.get_mut(name)
			.ok_or_else(|| format!("unknown service: {}", name))?;

		if let Some(cancel) = runner.cancel.take() {
			let _ = cancel.send(true);
		}
		if let ServiceState::Running { pid, .. } = runner.state {
			kill_process_tree(pid);
		}
		runner.state = ServiceState::Stopped;

		Ok(format!("{}: stopped", name))
	}

	/// Supervised restart: mark the coming exit as ours, then signal the
	/// child. The loop's exit handling restarts without back-off and picks up
	/// the current on-disk configuration.
	pub async fn restart_service(self: &Arc<Self>, name: &str) -> Result<String, String> {
		let services = self.services.read().await;
		let runner = services
			.get(name)
			.ok_or_else(|| format!("unknown service: {}", name))?;

		match runner.state {
			ServiceState::Running { pid, .. } => {
				runner.expected_exit.store(true, Ordering::SeqCst);
				kill_process_tree(pid);
				Ok(format!("{}: restarting", name))
			}
			ServiceState::Stopped => Err(format!("{}: not supervised", name)),
			// A restart is already pending; it will read the fresh config.
			_ => Ok(format!("{}: restart already scheduled", name)),
		}
	}

	pub async fn status(&self) -> Vec<ServiceStatus> {
		let services = self.services.read().await;
		let mut result: Vec<ServiceStatus> = services
			.values()
			.map(|runner| {
				let pid = match runner.state {
					ServiceState::Running { pid, .. } => Some(pid),
					_ => None,
				};
				ServiceStatus {
					name: runner.def.name.clone(),
					state: runner.state.clone(),
					pid,
				}
			})
			.collect();
		result.sort_by(|a, b| a.name.cmp(&b.name));
		result
	}

	pub async fn service_def(&self, name: &str) -> Option<ServiceDef> {
		let services = self.services.read().await;
		services.get(name).map(|runner| runner.def.clone())
	}

	pub async fn logs_snapshot(&self, name: &str) -> Result<Vec<u8>, String> {
		let services = self.services.read().await;
		let runner = services
			.get(name)
			.ok_or_else(|| format!("unknown service: {}", name))?;
		Ok(runner.sink.snapshot().await)
	}

	/// Stop every runner. The caller owns the grace period.
	pub async fn shutdown(self: &Arc<Self>) {
		let names: Vec<String> = self.services.read().await.keys().cloned().collect();
		for name in names {
			let _ = self.stop_service(&name).await;
		}
	}
}

/// One task per service owns the whole lifecycle, so at most one live child
/// and one pending restart can exist for it.
async fn run_service_loop(
	supervisor: Arc<Supervisor>,
	def: ServiceDef,
	expected_exit: Arc<AtomicBool>,
	sink: LogSink,
	mut cancel: watch::Receiver<bool>,
) {
	let mut restarts: u32 = 0;

	loop {
		if *cancel.borrow() {
			return;
		}

		// Settings and secrets are read from disk on every start; a restart
		// is how configuration changes take effect.
		let env = settings::service_env(&def, &supervisor.config.secrets_path);
		let port = settings::resolve_port(&env, def.default_port);

		update_state(&supervisor, &def.name, ServiceState::Starting).await;
		sink.line(&format!("starting {} (restarts={})", def.name, restarts))
			.await;

		let mut child = match spawn_service(&def, &env) {
			Ok(child) => child,
			Err(e) => {
				sink.line(&format!("failed to spawn {}: {}", def.name, e))
					.await;
				restarts += 1;
				let delay = crash_backoff_ms(restarts);
				update_state(
					&supervisor,
					&def.name,
					ServiceState::Crashed {
						exit_code: -1,
						restarts,
					},
				)
				.await;
				sink.line(&format!("restarting in {}ms", delay)).await;
				tokio::select! {
					_ = tokio::time::sleep(Duration::from_millis(delay)) => {}
					_ = cancel.changed() => return,
				}
				continue;
			}
		};

		let pid = child.id().unwrap_or(0);
		update_state(&supervisor, &def.name, ServiceState::Running { pid, port }).await;
		sink.line(&format!("started {} (pid {}, port {})", def.name, pid, port))
			.await;

		if let Some(stdout) = child.stdout.take() {
			let out = sink.clone();
			tokio::spawn(async move {
				pipe_output(stdout, out).await;
			});
		}
		if let Some(stderr) = child.stderr.take() {
			let out = sink.clone();
			tokio::spawn(async move {
				pipe_output(stderr, out).await;
			});
		}

		let (probe_cancel_tx, probe_cancel_rx) = watch::channel(false);
		{
			let monitor = HealthMonitor::new(
				def.name.clone(),
				port,
				pid,
				Arc::clone(&expected_exit),
				sink.clone(),
				supervisor.config.health.clone(),
			);
			tokio::spawn(async move {
				monitor.run(probe_cancel_rx).await;
			});
		}

		let exit_result = tokio::select! {
			status = child.wait() => status,
			_ = cancel.changed() => {
				let _ = probe_cancel_tx.send(true);
				// stop() may have raced the spawn; signal the tree ourselves
				// and reap before leaving.
				kill_process_tree(pid);
				let _ = child.wait().await;
				sink.line(&format!("stopped {}", def.name)).await;
				return;
			}
		};

		let _ = probe_cancel_tx.send(true);

		if *cancel.borrow() {
			update_state(&supervisor, &def.name, ServiceState::Stopped).await;
			sink.line(&format!("stopped {}", def.name)).await;
			return;
		}

		let code = match &exit_result {
			Ok(status) => status.code().unwrap_or(-1),
			Err(_) => -1,
		};
		sink.line(&format!("{} exited (code {})", def.name, code))
			.await;

		let delay = if expected_exit.swap(false, Ordering::SeqCst) {
			// We killed it ourselves; the previous process was reachable, so
			// restart quickly and forgive past crashes.
			restarts = 0;
			update_state(&supervisor, &def.name, ServiceState::Restarting).await;
			sink.line(&format!(
				"intentional restart in {}ms",
				INTENTIONAL_RESTART_DELAY_MS
			))
			.await;
			INTENTIONAL_RESTART_DELAY_MS
		} else {
			restarts += 1;
			let delay = crash_backoff_ms(restarts);
			update_state(
				&supervisor,
				&def.name,
				ServiceState::Crashed {
					exit_code: code,
					restarts,
				},
			)
			.await;
			sink.line(&format!("restarting in {}ms", delay)).await;
			delay
		};

		tokio::select! {
			_ = tokio::time::sleep(Duration::from_millis(delay)) => {}
			_ = cancel.changed() => return,
		}
	}
}

/// Exponential back-off for spontaneous crashes, capped at one minute.
pub fn crash_backoff_ms(restarts: u32) -> u64 {
	(CRASH_BACKOFF_BASE_MS << restarts.min(6)).min(CRASH_BACKOFF_CAP_MS)
}

fn spawn_service(def: &ServiceDef, env: &HashMap<String, String>) -> Result<Child, String> {
	let mut cmd = Command::new("sh");
	cmd.args(["-c", &def.command])
		.current_dir(&def.dir)
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		// Own process group, so the whole tree can be signalled.
		.process_group(0);
	cmd.envs(env);

	cmd.spawn().map_err(|e| format!("spawn failed: {}", e))
}

async fn pipe_output<R: tokio::io::AsyncRead + Unpin>(mut reader: R, output: LogSink) {
	let mut buf = [0u8; 4096];
	loop {
		match reader.read(&mut buf).await {
			Ok(0) => break,
			Ok(n) => output.write(&buf[..n]).await,
			Err(_) => break,
		}
	}
}

async fn update_state(supervisor: &Supervisor, service: &str, state: ServiceState) {
	let mut services = supervisor.services.write().await;
	if let Some(runner) = services.get_mut(service) {
		runner.state = state;
	}
}

pub fn kill_process_tree(pid: u32) {
	use nix::sys::signal::{killpg, Signal};
	use nix::unistd::Pid;
	let pgid = Pid::from_raw(pid as i32);
	let _ = killpg(pgid, Signal::SIGTERM);
	// Give the tree a moment, then force kill.
	std::thread::spawn(move || {
		std::thread::sleep(Duration::from_secs(3));
		let _ = killpg(pgid, Signal::SIGKILL);
	});
}

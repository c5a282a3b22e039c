use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::output::LogSink;
use crate::supervisor::kill_process_tree;

/// Liveness-probe timing. The defaults are the contract; tests shrink them,
/// nothing else does.
#[derive(Debug, Clone)]
pub struct HealthConfig {
	pub warmup: Duration,
	pub poll_interval: Duration,
	pub probe_timeout: Duration,
	pub failure_threshold: u32,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			warmup: Duration::from_secs(2),
			poll_interval: Duration::from_secs(15),
			probe_timeout: Duration::from_secs(5),
			failure_threshold: 2,
		}
	}
}

/// Polls one child's `/health` endpoint and signals the process group once
/// the failure threshold is hit. Detection only: restart scheduling belongs
/// to the service loop, which also spawns a fresh monitor for every child.
pub struct HealthMonitor {
	service: String,
	port: u16,
	pid: u32,
	expected_exit: Arc<AtomicBool>,
	sink: LogSink,
	config: HealthConfig,
}

impl HealthMonitor {
	pub fn new(
		service: String,
		port: u16,
		pid: u32,
		expected_exit: Arc<AtomicBool>,
		sink: LogSink,
		config: HealthConfig,
	) -> Self {
		Self {
			service,
			port,
			pid,
			expected_exit,
			sink,
			config,
		}
	}

	pub async fn run(self, mut cancel: watch::Receiver<bool>) {
		let client = match reqwest::Client::builder()
			.timeout(self.config.probe_timeout)
			.build()
		{
			Ok(client) => client,
			Err(e) => {
				tracing::warn!("health probes for {} unavailable: {}", self.service, e);
				return;
			}
		};

		// Let the child bind its listener before the first probe.
		tokio::select! {
			_ = tokio::time::sleep(self.config.warmup) => {}
			_ = cancel.changed() => return,
		}

		let url = format!("http://127.0.0.1:{}/health", self.port);
		let mut failures: u32 = 0;

		loop {
			tokio::select! {
				_ = tokio::time::sleep(self.config.poll_interval) => {}
				_ = cancel.changed() => return,
			}

			match probe(&client, &url).await {
				Ok(()) => {
					if failures > 0 {
						self.sink
							.line(&format!("health recovered for {}", self.service))
							.await;
					}
					failures = 0;
				}
				Err(err) => {
					failures += 1;
					self.sink
						.line(&format!(
							"health check failed for {} (count={}): {}",
							self.service, failures, err
						))
						.await;
					if failures >= self.config.failure_threshold {
						self.sink
							.line(&format!(
								"health failing for {}, requesting restart",
								self.service
							))
							.await;
						// Flag first, so the exit handler classifies this
						// kill as ours.
						self.expected_exit.store(true, Ordering::SeqCst);
						kill_process_tree(self.pid);
						return;
					}
				}
			}
		}
	}
}

async fn probe(client: &reqwest::Client, url: &str) -> Result<(), String> {
	let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
	if resp.status().is_success() {
		Ok(())
	} else {
		Err(format!("unhealthy status {}", resp.status()))
	}
}

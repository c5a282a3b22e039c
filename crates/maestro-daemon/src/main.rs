mod api;
mod google;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use maestro_core::{config, paths};
use maestro_supervisor::logs;
use maestro_supervisor::supervisor::{Supervisor, SupervisorConfig};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().init();

	let global = config::load_global_config();
	let apps_root = global.apps_root();
	let log_dir = global.log_dir();

	let state_dir = paths::state_dir();
	let _ = std::fs::create_dir_all(&state_dir);
	let _ = std::fs::write(paths::pid_path(), std::process::id().to_string());

	// Initial log expiry, then hourly.
	logs::expire_logs(&log_dir, global.logs.max_age_days, global.logs.max_files);
	{
		let log_dir = log_dir.clone();
		let logs_cfg = global.logs.clone();
		tokio::spawn(async move {
			loop {
				tokio::time::sleep(Duration::from_secs(3600)).await;
				logs::expire_logs(&log_dir, logs_cfg.max_age_days, logs_cfg.max_files);
			}
		});
	}

	let supervisor = Supervisor::new(SupervisorConfig {
		log_dir,
		max_log_size: global.logs.max_size_bytes,
		secrets_path: paths::secrets_path(),
		health: Default::default(),
	});

	for def in config::builtin_services(&apps_root) {
		match supervisor.start_service(def).await {
			Ok(msg) => tracing::info!("{}", msg),
			Err(e) => tracing::error!("{}", e),
		}
	}

	let api_port = global.api_port();
	let state = api::AppState {
		supervisor: Arc::clone(&supervisor),
		secret: global.api_secret(),
		api_port,
		config_dir: paths::config_dir(),
	};
	let app = api::router(state);

	let addr = SocketAddr::from(([127, 0, 0, 1], api_port));
	// The control listener is the one thing the daemon cannot run without.
	let listener = match tokio::net::TcpListener::bind(addr).await {
		Ok(listener) => listener,
		Err(e) => {
			tracing::error!("failed to bind control api on {}: {}", addr, e);
			std::process::exit(1);
		}
	};
	tracing::info!("daemon started (pid {})", std::process::id());
	tracing::info!("control api listening on {}", addr);

	let server = tokio::spawn(async move {
		if let Err(e) = axum::serve(listener, app).await {
			tracing::error!("control api error: {}", e);
		}
	});

	shutdown_signal().await;
	tracing::info!("shutting down");
	supervisor.shutdown().await;

	// Children were asked to terminate; give them a grace period and exit
	// whether or not they confirmed.
	tokio::time::sleep(SHUTDOWN_GRACE).await;
	server.abort();
	let _ = std::fs::remove_file(paths::pid_path());
}

async fn shutdown_signal() {
	use tokio::signal::unix::{signal, SignalKind};

	let mut term = match signal(SignalKind::terminate()) {
		Ok(term) => term,
		Err(e) => {
			tracing::warn!("no SIGTERM handler: {}", e);
			let _ = tokio::signal::ctrl_c().await;
			return;
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {}
		_ = term.recv() => {}
	}
}

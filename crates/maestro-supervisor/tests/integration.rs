use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use maestro_core::secrets::SecretStore;
use maestro_core::types::{ServiceDef, ServiceState};
use maestro_supervisor::health::HealthConfig;
use maestro_supervisor::supervisor::{crash_backoff_ms, Supervisor, SupervisorConfig};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("maestro-sup-test-{}-{}", n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn test_supervisor(root: &PathBuf, health: HealthConfig) -> Arc<Supervisor> {
	Supervisor::new(SupervisorConfig {
		log_dir: root.join("logs"),
		max_log_size: 1024 * 1024,
		secrets_path: root.join("secrets.json"),
		health,
	})
}

fn stub(name: &str, dir: &PathBuf, command: &str, default_port: u16) -> ServiceDef {
	ServiceDef {
		name: name.to_string(),
		dir: dir.clone(),
		command: command.to_string(),
		default_port,
	}
}

async fn state_of(sup: &Arc<Supervisor>, name: &str) -> ServiceState {
	sup.status()
		.await
		.into_iter()
		.find(|s| s.name == name)
		.map(|s| s.state)
		.expect("service not registered")
}

fn running_pid(state: &ServiceState) -> u32 {
	match state {
		ServiceState::Running { pid, .. } => *pid,
		other => panic!("expected Running, got {:?}", other),
	}
}

/// A port that nothing listens on: bind, read it, drop the listener.
async fn free_port() -> u16 {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().port()
}

// --- Back-off schedule ---

#[test]
fn backoff_doubles_and_caps() {
	assert_eq!(crash_backoff_ms(1), 2000);
	assert_eq!(crash_backoff_ms(2), 4000);
	assert_eq!(crash_backoff_ms(3), 8000);
	assert_eq!(crash_backoff_ms(5), 32000);
	assert_eq!(crash_backoff_ms(6), 60000);
	assert_eq!(crash_backoff_ms(7), 60000);
	assert_eq!(crash_backoff_ms(40), 60000);
}

// --- Lifecycle ---

#[tokio::test]
async fn start_and_stop() {
	let root = temp_dir("start-stop");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "sleep 60", 1)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert!(state_of(&sup, "svc").await.is_running());

	sup.stop_service("svc").await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	assert_eq!(state_of(&sup, "svc").await, ServiceState::Stopped);

	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn start_twice_is_a_noop() {
	let root = temp_dir("twice");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "sleep 60", 1)).await.unwrap();
	let msg = sup.start_service(stub("svc", &root, "sleep 60", 1)).await.unwrap();
	assert!(msg.contains("already supervised"));

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn stop_unknown_service_errors() {
	let root = temp_dir("unknown");
	let sup = test_supervisor(&root, HealthConfig::default());
	assert!(sup.stop_service("nosuch").await.is_err());
	assert!(sup.restart_service("nosuch").await.is_err());
	assert!(sup.logs_snapshot("nosuch").await.is_err());
	let _ = std::fs::remove_dir_all(&root);
}

// --- Crash handling ---

#[tokio::test]
async fn crashes_count_up_and_respect_backoff() {
	let root = temp_dir("crash");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "exit 7", 1)).await.unwrap();

	// First crash lands quickly; first back-off window is 2s.
	tokio::time::sleep(Duration::from_millis(400)).await;
	assert_eq!(
		state_of(&sup, "svc").await,
		ServiceState::Crashed { exit_code: 7, restarts: 1 }
	);

	// Still waiting inside the first window.
	tokio::time::sleep(Duration::from_millis(1000)).await;
	assert_eq!(
		state_of(&sup, "svc").await,
		ServiceState::Crashed { exit_code: 7, restarts: 1 }
	);

	// Restarted at ~2s, crashed again, second window is 4s.
	tokio::time::sleep(Duration::from_millis(1600)).await;
	assert_eq!(
		state_of(&sup, "svc").await,
		ServiceState::Crashed { exit_code: 7, restarts: 2 }
	);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn clean_exit_still_restarts_with_backoff() {
	let root = temp_dir("cleanexit");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "true", 1)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(400)).await;

	// Supervised services are long-running; exiting at all counts as a crash.
	assert_eq!(
		state_of(&sup, "svc").await,
		ServiceState::Crashed { exit_code: 0, restarts: 1 }
	);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

// --- Intentional restarts ---

#[tokio::test]
async fn supervised_restart_skips_backoff_and_resets_counter() {
	let root = temp_dir("intentional");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "sleep 60", 1)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	let first_pid = running_pid(&state_of(&sup, "svc").await);

	sup.restart_service("svc").await.unwrap();

	// The exit was marked expected: short fixed delay, no back-off.
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert_eq!(state_of(&sup, "svc").await, ServiceState::Restarting);

	tokio::time::sleep(Duration::from_millis(1300)).await;
	let second_pid = running_pid(&state_of(&sup, "svc").await);
	assert_ne!(first_pid, second_pid);

	// An external kill right after is classified as a crash: the expected
	// flag was consumed and the counter had been reset.
	nix::sys::signal::kill(
		nix::unistd::Pid::from_raw(second_pid as i32),
		nix::sys::signal::Signal::SIGKILL,
	)
	.unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;
	assert_eq!(
		state_of(&sup, "svc").await,
		ServiceState::Crashed { exit_code: -1, restarts: 1 }
	);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

// --- Health monitoring ---

#[tokio::test]
async fn failing_health_probes_trigger_a_supervised_restart() {
	let root = temp_dir("health-fail");
	let health = HealthConfig {
		warmup: Duration::from_millis(100),
		poll_interval: Duration::from_millis(300),
		probe_timeout: Duration::from_millis(500),
		failure_threshold: 2,
	};
	let sup = test_supervisor(&root, health);

	// Nothing listens on the resolved port: every probe is connection-refused.
	let port = free_port().await;
	sup.start_service(stub("svc", &root, "sleep 60", port)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	let first_pid = running_pid(&state_of(&sup, "svc").await);

	// Two failed probes (at ~400ms and ~700ms) kill the child; the restart
	// is intentional, so the short delay applies.
	tokio::time::sleep(Duration::from_millis(700)).await;
	assert_eq!(state_of(&sup, "svc").await, ServiceState::Restarting);

	tokio::time::sleep(Duration::from_millis(1000)).await;
	let second_pid = running_pid(&state_of(&sup, "svc").await);
	assert_ne!(first_pid, second_pid);

	let snapshot = sup.logs_snapshot("svc").await.unwrap();
	let text = String::from_utf8_lossy(&snapshot);
	assert!(text.contains("health check failed"), "log was: {}", text);
	assert!(text.contains("requesting restart"), "log was: {}", text);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn healthy_service_is_left_alone() {
	let root = temp_dir("health-ok");
	let health = HealthConfig {
		warmup: Duration::from_millis(50),
		poll_interval: Duration::from_millis(100),
		probe_timeout: Duration::from_millis(500),
		failure_threshold: 2,
	};
	let sup = test_supervisor(&root, health);

	// Minimal health endpoint: answer 200 to anything.
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let port = listener.local_addr().unwrap().port();
	let server = tokio::spawn(async move {
		use tokio::io::{AsyncReadExt, AsyncWriteExt};
		loop {
			let Ok((mut stream, _)) = listener.accept().await else { break };
			tokio::spawn(async move {
				let mut buf = [0u8; 1024];
				let _ = stream.read(&mut buf).await;
				let _ = stream
					.write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok")
					.await;
			});
		}
	});

	sup.start_service(stub("svc", &root, "sleep 60", port)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;
	let pid = running_pid(&state_of(&sup, "svc").await);

	// Several successful poll rounds later the same child is still up.
	tokio::time::sleep(Duration::from_millis(700)).await;
	assert_eq!(running_pid(&state_of(&sup, "svc").await), pid);

	let snapshot = sup.logs_snapshot("svc").await.unwrap();
	let text = String::from_utf8_lossy(&snapshot);
	assert!(!text.contains("requesting restart"), "log was: {}", text);

	server.abort();
	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

// --- Environment merge at spawn ---

#[tokio::test]
async fn merged_env_reaches_the_child() {
	let root = temp_dir("env");
	let app_dir = root.join("app");
	std::fs::create_dir_all(&app_dir).unwrap();
	let sup = test_supervisor(&root, HealthConfig::default());

	std::fs::write(app_dir.join(".env"), "MY_SETTING=hello123\n").unwrap();
	let mut store = SecretStore::default();
	store.insert("svc", "MY_TOKEN".to_string(), "sekret99".to_string());
	store.save(&root.join("secrets.json"));

	sup.start_service(stub("svc", &app_dir, "echo $MY_SETTING $MY_TOKEN", 1))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;

	let snapshot = sup.logs_snapshot("svc").await.unwrap();
	let text = String::from_utf8_lossy(&snapshot);
	assert!(text.contains("hello123 sekret99"), "log was: {}", text);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

#[tokio::test]
async fn secrets_shadow_plaintext_settings() {
	let root = temp_dir("shadow");
	let app_dir = root.join("app");
	std::fs::create_dir_all(&app_dir).unwrap();
	let sup = test_supervisor(&root, HealthConfig::default());

	std::fs::write(app_dir.join(".env"), "SHARED_KEY=from-file\n").unwrap();
	let mut store = SecretStore::default();
	store.insert("svc", "SHARED_KEY".to_string(), "from-store".to_string());
	store.save(&root.join("secrets.json"));

	sup.start_service(stub("svc", &app_dir, "echo value=$SHARED_KEY", 1))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;

	let snapshot = sup.logs_snapshot("svc").await.unwrap();
	let text = String::from_utf8_lossy(&snapshot);
	assert!(text.contains("value=from-store"), "log was: {}", text);

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

// --- Port resolution ---

#[tokio::test]
async fn port_comes_from_merged_env() {
	let root = temp_dir("port");
	let app_dir = root.join("app");
	std::fs::create_dir_all(&app_dir).unwrap();
	let sup = test_supervisor(&root, HealthConfig::default());

	std::fs::write(app_dir.join(".env"), "PORT=9321\n").unwrap();
	sup.start_service(stub("svc", &app_dir, "sleep 60", 3001)).await.unwrap();
	tokio::time::sleep(Duration::from_millis(300)).await;

	match state_of(&sup, "svc").await {
		ServiceState::Running { port, .. } => assert_eq!(port, 9321),
		other => panic!("expected Running, got {:?}", other),
	}

	let _ = sup.stop_service("svc").await;
	let _ = std::fs::remove_dir_all(&root);
}

// --- Log files ---

#[tokio::test]
async fn lifecycle_events_and_output_land_in_the_log_file() {
	let root = temp_dir("logfile");
	let sup = test_supervisor(&root, HealthConfig::default());

	sup.start_service(stub("svc", &root, "echo hello-from-child", 1))
		.await
		.unwrap();
	tokio::time::sleep(Duration::from_millis(500)).await;
	let _ = sup.stop_service("svc").await;

	let raw = std::fs::read_to_string(root.join("logs").join("svc.log")).unwrap();
	assert!(raw.contains("starting svc"), "log was: {}", raw);
	assert!(raw.contains("hello-from-child"), "log was: {}", raw);
	assert!(raw.contains("[maestro "), "log was: {}", raw);

	let _ = std::fs::remove_dir_all(&root);
}

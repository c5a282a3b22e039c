use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::logs;

const RING_BUFFER_SIZE: usize = 64 * 1024;

/// Append-only log for one service, plus an in-memory tail for the control
/// plane. Writes are observational only; a failed file write never affects
/// supervision.
#[derive(Clone)]
pub struct LogSink {
	ring: Arc<Mutex<VecDeque<u8>>>,
	writer: Arc<Mutex<LogWriter>>,
}

struct LogWriter {
	file: Option<File>,
	path: PathBuf,
	bytes_written: u64,
	max_size: u64,
	log_dir: PathBuf,
	service: String,
}

impl LogSink {
	pub fn new(log_dir: &Path, service: &str, max_size: u64) -> Self {
		let _ = fs::create_dir_all(log_dir);
		let path = logs::log_path(log_dir, service);

		let file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&path)
			.ok();
		let bytes_written = file
			.as_ref()
			.and_then(|f| f.metadata().ok())
			.map(|m| m.len())
			.unwrap_or(0);

		Self {
			ring: Arc::new(Mutex::new(VecDeque::with_capacity(RING_BUFFER_SIZE))),
			writer: Arc::new(Mutex::new(LogWriter {
				file,
				path,
				bytes_written,
				max_size,
				log_dir: log_dir.to_path_buf(),
				service: service.to_string(),
			})),
		}
	}

	/// Raw child output, appended as-is.
	pub async fn write(&self, data: &[u8]) {
		{
			let mut ring = self.ring.lock().await;
			for &byte in data {
				if ring.len() >= RING_BUFFER_SIZE {
					ring.pop_front();
				}
				ring.push_back(byte);
			}
		}

		let mut writer = self.writer.lock().await;
		writer.write(data);
	}

	/// One timestamped supervisor event line.
	pub async fn line(&self, msg: &str) {
		let stamped = format!("[maestro {}] {}\n", logs::now_stamp(), msg);
		self.write(stamped.as_bytes()).await;
	}

	/// Tail of everything written, bounded by the ring buffer.
	pub async fn snapshot(&self) -> Vec<u8> {
		let ring = self.ring.lock().await;
		ring.iter().copied().collect()
	}
}

impl LogWriter {
	fn write(&mut self, data: &[u8]) {
		if let Some(ref mut file) = self.file {
			let _ = file.write_all(data);

			self.bytes_written += data.len() as u64;
			if self.bytes_written >= self.max_size {
				self.rotate();
			}
		}
	}

	fn rotate(&mut self) {
		if let Some(file) = self.file.take() {
			drop(file);
		}

		let rotated = logs::rotated_log_name(&self.log_dir, &self.service);
		let _ = fs::rename(&self.path, self.log_dir.join(rotated));

		self.file = OpenOptions::new()
			.create(true)
			.append(true)
			.open(&self.path)
			.ok();
		self.bytes_written = 0;
	}
}

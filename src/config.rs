//! Configuration snapshots: load, validate, env overlay, debounced hot-reload.
//!
//! The file lives at `<workspace>/.cursorcli-mcp/config.json`. A missing file
//! is seeded with pretty-printed defaults. Invalid content falls back to the
//! defaults rather than wedging the server. Snapshots are immutable; consumers
//! clone the current `Arc` and read it for the duration of one operation.

use notify::{RecursiveMode, Watcher};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ServerError;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const DEBOUNCE: Duration = Duration::from_millis(200);

static SEMVER: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"^\d+\.\d+\.\d+(-[0-9A-Za-z.-]+)?(\+[0-9A-Za-z.-]+)?$").expect("semver regex")
});

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
	pub server: ServerSection,
	pub tools: ToolsSection,
	pub logging: LoggingSection,
	pub security: SecuritySection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSection {
	pub name: String,
	pub version: String,
	pub max_concurrent_requests: usize,
	pub request_timeout_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsSection {
	pub allowed_tools: Vec<String>,
	pub file_operations: FileOpsSection,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileOpsSection {
	pub max_file_size: u64,
	pub allowed_directories: Vec<String>,
	pub blocked_patterns: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingSection {
	pub level: LogLevel,
	pub outputs: Vec<LogOutput>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub log_file: Option<String>,
	pub max_log_size: u64,
	pub rotation_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
	Debug,
	Info,
	Warn,
	Error,
}

impl LogLevel {
	pub fn as_filter(self) -> &'static str {
		match self {
			LogLevel::Debug => "debug",
			LogLevel::Info => "info",
			LogLevel::Warn => "warn",
			LogLevel::Error => "error",
		}
	}

	fn parse(value: &str) -> Option<Self> {
		match value {
			"debug" => Some(LogLevel::Debug),
			"info" => Some(LogLevel::Info),
			"warn" => Some(LogLevel::Warn),
			"error" => Some(LogLevel::Error),
			_ => None,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogOutput {
	#[serde(rename = "console")]
	Console,
	#[serde(rename = "file")]
	File,
	#[serde(rename = "cursor-output-panel")]
	CursorOutputPanel,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecuritySection {
	pub enforce_project_root: bool,
	pub allow_destructive_operations: bool,
}

impl Default for ConfigSnapshot {
	fn default() -> Self {
		Self {
			server: ServerSection {
				name: "mcp-workspace".to_string(),
				version: env!("CARGO_PKG_VERSION").to_string(),
				max_concurrent_requests: 10,
				request_timeout_ms: 5000,
			},
			tools: ToolsSection {
				allowed_tools: vec!["*".to_string()],
				file_operations: FileOpsSection {
					max_file_size: 10 * MIB,
					allowed_directories: vec![".".to_string()],
					blocked_patterns: vec![
						".git/**".to_string(),
						"**/*.pem".to_string(),
						"**/.env".to_string(),
					],
				},
			},
			logging: LoggingSection {
				level: LogLevel::Info,
				outputs: vec![LogOutput::Console],
				log_file: None,
				max_log_size: 10 * MIB,
				rotation_count: 5,
			},
			security: SecuritySection {
				enforce_project_root: true,
				allow_destructive_operations: false,
			},
		}
	}
}

pub fn validate(snapshot: &ConfigSnapshot) -> Result<(), ServerError> {
	if snapshot.server.name.trim().is_empty() {
		return Err(ServerError::internal("config: server.name must not be empty"));
	}
	if !SEMVER.is_match(&snapshot.server.version) {
		return Err(ServerError::internal(format!(
			"config: server.version is not semver: {}",
			snapshot.server.version
		)));
	}
	if !(1..=100).contains(&snapshot.server.max_concurrent_requests) {
		return Err(ServerError::internal(format!(
			"config: server.maxConcurrentRequests out of range 1-100: {}",
			snapshot.server.max_concurrent_requests
		)));
	}
	if !(1000..=60_000).contains(&snapshot.server.request_timeout_ms) {
		return Err(ServerError::internal(format!(
			"config: server.requestTimeoutMs out of range 1000-60000: {}",
			snapshot.server.request_timeout_ms
		)));
	}
	if snapshot.tools.allowed_tools.is_empty() {
		return Err(ServerError::internal("config: tools.allowedTools must not be empty"));
	}
	let max_file_size = snapshot.tools.file_operations.max_file_size;
	if !(KIB..=100 * MIB).contains(&max_file_size) {
		return Err(ServerError::internal(format!(
			"config: tools.fileOperations.maxFileSize out of range 1KiB-100MiB: {}",
			max_file_size
		)));
	}
	if snapshot.logging.outputs.is_empty() {
		return Err(ServerError::internal("config: logging.outputs must not be empty"));
	}
	if !(MIB..=100 * MIB).contains(&snapshot.logging.max_log_size) {
		return Err(ServerError::internal(format!(
			"config: logging.maxLogSize out of range 1-100MiB: {}",
			snapshot.logging.max_log_size
		)));
	}
	if !(1..=30).contains(&snapshot.logging.rotation_count) {
		return Err(ServerError::internal(format!(
			"config: logging.rotationCount out of range 1-30: {}",
			snapshot.logging.rotation_count
		)));
	}
	Ok(())
}

fn overlay_env(snapshot: &mut ConfigSnapshot, lookup: &dyn Fn(&str) -> Option<String>) {
	if let Some(value) = lookup("MCP_LOG_LEVEL") {
		if let Some(level) = LogLevel::parse(value.trim()) {
			snapshot.logging.level = level;
		}
	}
	if let Some(value) = lookup("MCP_MAX_CONCURRENT_REQUESTS") {
		if let Ok(parsed) = value.trim().parse::<usize>() {
			if (1..=100).contains(&parsed) {
				snapshot.server.max_concurrent_requests = parsed;
			}
		}
	}
	if let Some(value) = lookup("MCP_REQUEST_TIMEOUT_MS") {
		if let Ok(parsed) = value.trim().parse::<u64>() {
			if (1000..=60_000).contains(&parsed) {
				snapshot.server.request_timeout_ms = parsed;
			}
		}
	}
	if let Some(value) = lookup("MCP_ENFORCE_PROJECT_ROOT") {
		if let Some(parsed) = parse_bool(&value) {
			snapshot.security.enforce_project_root = parsed;
		}
	}
	if let Some(value) = lookup("MCP_ALLOW_DESTRUCTIVE_OPERATIONS") {
		if let Some(parsed) = parse_bool(&value) {
			snapshot.security.allow_destructive_operations = parsed;
		}
	}
}

fn parse_bool(value: &str) -> Option<bool> {
	match value.trim().to_lowercase().as_str() {
		"1" | "true" | "yes" => Some(true),
		"0" | "false" | "no" => Some(false),
		_ => None,
	}
}

pub type ConfigCallback = Box<dyn Fn(Arc<ConfigSnapshot>) + Send + Sync>;

pub struct ConfigManager {
	path: PathBuf,
	current: RwLock<Arc<ConfigSnapshot>>,
	load_lock: Mutex<()>,
	generation: AtomicU64,
	file_reads: AtomicU64,
	subscribers: Mutex<Vec<ConfigCallback>>,
	watcher: Mutex<Option<notify::RecommendedWatcher>>,
}

impl ConfigManager {
	pub fn new(workspace_root: &Path) -> Self {
		Self {
			path: workspace_root.join(".cursorcli-mcp").join("config.json"),
			current: RwLock::new(Arc::new(ConfigSnapshot::default())),
			load_lock: Mutex::new(()),
			generation: AtomicU64::new(0),
			file_reads: AtomicU64::new(0),
			subscribers: Mutex::new(Vec::new()),
			watcher: Mutex::new(None),
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn current(&self) -> Arc<ConfigSnapshot> {
		self.current.read().expect("config lock").clone()
	}

	/// Load from disk, seed defaults when absent, overlay env, swap the
	/// snapshot. Concurrent callers share one file read.
	pub fn load(&self) -> Arc<ConfigSnapshot> {
		let seen = self.generation.load(Ordering::Acquire);
		let _guard = self.load_lock.lock().expect("load lock");
		if self.generation.load(Ordering::Acquire) != seen {
			return self.current();
		}
		let mut snapshot = self.read_or_init();
		overlay_env(&mut snapshot, &|key| std::env::var(key).ok());
		let snapshot = Arc::new(snapshot);
		*self.current.write().expect("config lock") = snapshot.clone();
		self.generation.fetch_add(1, Ordering::Release);
		snapshot
	}

	fn read_or_init(&self) -> ConfigSnapshot {
		if !self.path.exists() {
			let defaults = ConfigSnapshot::default();
			if let Err(err) = self.write_defaults(&defaults) {
				warn!("cannot seed default config at {}: {}", self.path.display(), err);
			}
			return defaults;
		}
		self.file_reads.fetch_add(1, Ordering::Relaxed);
		let content = match std::fs::read_to_string(&self.path) {
			Ok(content) => content,
			Err(err) => {
				warn!("cannot read config {}: {}; using defaults", self.path.display(), err);
				return ConfigSnapshot::default();
			}
		};
		let parsed: ConfigSnapshot = match serde_json::from_str(&content) {
			Ok(parsed) => parsed,
			Err(err) => {
				warn!("config {} does not parse: {}; using defaults", self.path.display(), err);
				return ConfigSnapshot::default();
			}
		};
		if let Err(err) = validate(&parsed) {
			warn!("{}; using defaults", err);
			return ConfigSnapshot::default();
		}
		parsed
	}

	fn write_defaults(&self, defaults: &ConfigSnapshot) -> std::io::Result<()> {
		if let Some(parent) = self.path.parent() {
			std::fs::create_dir_all(parent)?;
		}
		let pretty = serde_json::to_string_pretty(defaults).expect("serialize defaults");
		std::fs::write(&self.path, pretty)
	}

	pub fn subscribe(&self, callback: ConfigCallback) {
		self.subscribers.lock().expect("subscribers lock").push(callback);
	}

	/// Watch the config file and reload on change, debounced at 200ms.
	pub fn watch(self: &Arc<Self>) -> Result<(), ServerError> {
		let mut slot = self.watcher.lock().expect("watcher lock");
		if slot.is_some() {
			return Ok(());
		}
		let dir = self.path
			.parent()
			.map(|parent| parent.to_path_buf())
			.ok_or_else(|| ServerError::internal("config path has no parent"))?;
		std::fs::create_dir_all(&dir)
			.map_err(|err| ServerError::internal_with("cannot create config dir", err.into()))?;
		let (tx, rx) = std::sync::mpsc::channel::<notify::Result<notify::Event>>();
		let mut watcher = notify::recommended_watcher(tx)
			.map_err(|err| ServerError::internal_with("cannot create watcher", err.into()))?;
		watcher
			.watch(&dir, RecursiveMode::NonRecursive)
			.map_err(|err| ServerError::internal_with("cannot watch config dir", err.into()))?;
		let manager = Arc::clone(self);
		std::thread::spawn(move || {
			for event in rx.iter() {
				match event {
					Ok(event) => {
						if !touches_config(&event, &manager.path) {
							continue;
						}
					}
					Err(err) => {
						warn!("config watch error: {}", err);
						continue;
					}
				}
				// Drain the burst; editors fire several events per save.
				while rx.recv_timeout(DEBOUNCE).is_ok() {}
				debug!("config change detected, reloading");
				let snapshot = manager.load();
				let subscribers = manager.subscribers.lock().expect("subscribers lock");
				for callback in subscribers.iter() {
					callback(snapshot.clone());
				}
			}
		});
		*slot = Some(watcher);
		Ok(())
	}

	pub fn stop(&self) {
		self.watcher.lock().expect("watcher lock").take();
	}

	#[cfg(test)]
	fn file_reads(&self) -> u64 {
		self.file_reads.load(Ordering::Relaxed)
	}
}

fn touches_config(event: &notify::Event, path: &Path) -> bool {
	event.paths.is_empty() || event.paths.iter().any(|candidate| candidate == path)
}

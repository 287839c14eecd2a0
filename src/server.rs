//! Server core: lifecycle, protocol state machine, dispatch.
//!
//! One client, one stdio session. Frames are dispatched in arrival order;
//! tool calls run concurrently in spawned tasks and their responses are
//! funneled back through a channel so the single run loop is the only writer.
//! On EOF the session drains in-flight calls for a bounded window, then
//! cancels whatever is left.

use anyhow::{anyhow, Result};
use once_cell::sync::OnceCell;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::{ConfigManager, ConfigSnapshot, LogOutput};
use crate::error::ServerError;
use crate::executor::ToolExecutor;
use crate::protocol::{ErrorObject, Request, Response};
use crate::registry::ToolRegistry;
use crate::sandbox::PathSandbox;
use crate::tools;
use crate::tools::editor::{EditorPort, MockEditor};
use crate::tools::model::ModelTracker;
use crate::tools::ToolContext;
use crate::transport::{StdioTransport, TransportEvent};

pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

const DRAIN_BUDGET: Duration = Duration::from_secs(5);

static LOG_RELOAD: OnceCell<reload::Handle<EnvFilter, tracing_subscriber::Registry>> = OnceCell::new();

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
	Uninitialized,
	Initialized,
	Draining,
	Closed,
}

#[derive(Clone, Debug)]
pub struct ClientInfo {
	pub name: String,
	pub version: String,
}

pub struct ServerOptions {
	pub root: PathBuf,
}

pub fn load_options() -> Result<ServerOptions> {
	let mut root: Option<String> = None;
	let mut args = std::env::args().skip(1);
	while let Some(arg) = args.next() {
		match arg.as_str() {
			"--root" => {
				let value = args.next().ok_or_else(|| anyhow!("--root requires a value"))?;
				root = Some(value);
			}
			_ => return Err(anyhow!("unknown argument: {}", arg)),
		}
	}
	if root.is_none() {
		if let Ok(env_root) = std::env::var("MCP_WORKSPACE_ROOT") {
			if !env_root.trim().is_empty() {
				root = Some(env_root);
			}
		}
	}
	let root = match root {
		Some(root) => PathBuf::from(root),
		None => std::env::current_dir()?,
	};
	Ok(ServerOptions {
		root
	})
}

pub fn init_tracing(config: &ConfigSnapshot) {
	let (filter, handle) = reload::Layer::new(EnvFilter::new(config.logging.level.as_filter()));
	let registry = tracing_subscriber::registry().with(filter);
	let console = config.logging.outputs.iter().any(|output| {
		matches!(output, LogOutput::Console | LogOutput::CursorOutputPanel)
	});
	let file_writer = if config.logging.outputs.contains(&LogOutput::File) {
		config.logging.log_file.as_ref().and_then(|path| open_log_file(path, config.logging.max_log_size))
	}
	else {
		None
	};
	// stdout carries the protocol; logs go to stderr.
	let console_layer = if console {
		Some(tracing_subscriber::fmt::layer().with_target(false).with_writer(std::io::stderr))
	}
	else {
		None
	};
	let file_layer = file_writer.map(|writer| {
		tracing_subscriber::fmt::layer().with_target(false).with_ansi(false).with_writer(writer)
	});
	let _ = registry.with(console_layer).with(file_layer).try_init();
	let _ = LOG_RELOAD.set(handle);
}

fn open_log_file(path: &str, max_size: u64) -> Option<Arc<std::fs::File>> {
	if let Ok(meta) = std::fs::metadata(path) {
		if meta.len() > max_size {
			let _ = std::fs::write(path, b"");
		}
	}
	match std::fs::OpenOptions::new().create(true).append(true).open(path) {
		Ok(file) => Some(Arc::new(file)),
		Err(err) => {
			eprintln!("cannot open log file {}: {}", path, err);
			None
		}
	}
}

/// Process-wide uncaught-fault hook. Installing again replaces the previous
/// hook rather than stacking on it.
pub fn install_panic_hook() {
	std::panic::set_hook(Box::new(|info| {
		error!("uncaught fault: {}", info);
		eprintln!("uncaught fault: {}", info);
		std::process::exit(1);
	}));
}

pub struct Server {
	root: PathBuf,
	config: Arc<ConfigManager>,
	registry: Arc<RwLock<ToolRegistry>>,
	executor: Arc<ToolExecutor>,
	sandbox: Arc<RwLock<Arc<PathSandbox>>>,
	editor: Arc<dyn EditorPort>,
	model: Arc<ModelTracker>,
	server_name: String,
	server_version: String,
	session_id: String,
	state: SessionState,
	client: Option<ClientInfo>,
	protocol_version: Option<String>,
	shutdown: CancellationToken,
	in_flight: usize,
}

impl Server {
	pub fn new(root: &std::path::Path) -> Result<Self, ServerError> {
		let config = Arc::new(ConfigManager::new(root));
		let snapshot = config.load();
		let mut registry = ToolRegistry::new();
		tools::file::register(&mut registry)?;
		tools::project::register(&mut registry)?;
		tools::editor::register(&mut registry)?;
		tools::model::register(&mut registry)?;
		registry.apply_allowlist(&snapshot.tools.allowed_tools);
		let registry = Arc::new(RwLock::new(registry));
		let executor = Arc::new(ToolExecutor::new(
			registry.clone(),
			snapshot.server.max_concurrent_requests
		));
		let sandbox = PathSandbox::new(
			root,
			&snapshot.tools.file_operations.blocked_patterns,
			snapshot.security.enforce_project_root
		)?;
		Ok(Self {
			root: root.to_path_buf(),
			config,
			registry,
			executor,
			sandbox: Arc::new(RwLock::new(Arc::new(sandbox))),
			editor: Arc::new(MockEditor::new()),
			model: Arc::new(ModelTracker::new()),
			server_name: snapshot.server.name.clone(),
			server_version: snapshot.server.version.clone(),
			session_id: uuid::Uuid::new_v4().to_string(),
			state: SessionState::Uninitialized,
			client: None,
			protocol_version: None,
			shutdown: CancellationToken::new(),
			in_flight: 0,
		})
	}

	pub fn state(&self) -> SessionState {
		self.state
	}

	pub fn client_info(&self) -> Option<&ClientInfo> {
		self.client.as_ref()
	}

	pub fn protocol_version(&self) -> Option<&str> {
		self.protocol_version.as_deref()
	}

	/// Re-apply a new snapshot without tearing down the session: allowlist,
	/// concurrency limit, sandbox denylist, log level.
	pub fn hook_reload(&self) {
		let registry = self.registry.clone();
		let executor = self.executor.clone();
		let sandbox = self.sandbox.clone();
		let root = self.root.clone();
		self.config.subscribe(Box::new(move |snapshot| {
			registry
				.write()
				.expect("registry lock")
				.apply_allowlist(&snapshot.tools.allowed_tools);
			executor.update_limit(snapshot.server.max_concurrent_requests);
			match PathSandbox::new(
				&root,
				&snapshot.tools.file_operations.blocked_patterns,
				snapshot.security.enforce_project_root
			) {
				Ok(rebuilt) => {
					*sandbox.write().expect("sandbox lock") = Arc::new(rebuilt);
				}
				Err(err) => warn!("keeping previous sandbox: {}", err),
			}
			if let Some(handle) = LOG_RELOAD.get() {
				let _ = handle.reload(EnvFilter::new(snapshot.logging.level.as_filter()));
			}
			info!("configuration reloaded");
		}));
	}

	pub async fn run_loop<R, W>(
		&mut self,
		mut transport: StdioTransport<R, W>) -> Result<(), ServerError>
	where
		R: AsyncBufRead + Unpin,
		W: AsyncWrite + Unpin, {
		transport.start()?;
		info!(
			"session {} ready at {}",
			self.session_id,
			self.root.display()
		);
		let (tx, mut rx) = mpsc::unbounded_channel::<Option<Response>>();
		loop {
			tokio::select! {
				event = transport.next_event() => {
					match event {
						Some(TransportEvent::Frame(value)) => {
							if let Some(response) = self.dispatch(value, &tx) {
								if let Err(err) = transport.send(&response).await {
									warn!("cannot write response: {}", err);
								}
							}
						}
						Some(TransportEvent::InvalidFrame(detail)) => {
							// No id is recoverable from a non-JSON line, so no
							// reply; surface as an event and keep reading.
							warn!("invalid frame: {}", detail);
						}
						None => break,
					}
				}
				outcome = rx.recv() => {
					let Some(maybe_response) = outcome else {
						break;
					};
					self.in_flight = self.in_flight.saturating_sub(1);
					if let Some(response) = maybe_response {
						if let Err(err) = transport.send(&response).await {
							warn!("cannot write response: {}", err);
						}
					}
				}
			}
		}
		self.state = SessionState::Draining;
		debug!("stdin closed, draining {} in-flight call(s)", self.in_flight);
		let drain_deadline = tokio::time::Instant::now() + DRAIN_BUDGET;
		while self.in_flight > 0 {
			match tokio::time::timeout_at(drain_deadline, rx.recv()).await {
				Ok(Some(maybe_response)) => {
					self.in_flight = self.in_flight.saturating_sub(1);
					if let Some(response) = maybe_response {
						if let Err(err) = transport.send(&response).await {
							warn!("cannot write response: {}", err);
						}
					}
				}
				Ok(None) => break,
				Err(_) => {
					warn!("drain budget elapsed with {} call(s) pending", self.in_flight);
					break;
				}
			}
		}
		self.shutdown.cancel();
		self.state = SessionState::Closed;
		transport.close();
		info!("session {} closed", self.session_id);
		Ok(())
	}

	/// Dispatch one frame. Returns an immediate response for protocol-level
	/// methods; `tools/call` is handed to a task and answers via the channel.
	fn dispatch(
		&mut self,
		value: Value,
		tx: &mpsc::UnboundedSender<Option<Response>>) -> Option<Response> {
		let req: Request = match serde_json::from_value(value.clone()) {
			Ok(req) => req,
			Err(err) => {
				let id = value.get("id").cloned().unwrap_or(Value::Null);
				return Some(Response::err(
					id,
					&ServerError::InvalidFrame {
						detail: err.to_string()
					}
				));
			}
		};
		if req.is_notification() {
			self.handle_notification(&req, tx);
			return None;
		}
		let id = req.id.clone().unwrap_or(Value::Null);
		match req.method.as_str() {
			"initialize" => Some(self.handle_initialize(id, &req.params)),
			_ if self.state == SessionState::Uninitialized => {
				Some(Response::err(id, &ServerError::NotInitialized))
			}
			"tools/list" => {
				let tools = self.registry.read().expect("registry lock").list();
				Some(Response::ok(id, json!({ "tools": tools })))
			}
			"tools/call" => {
				self.spawn_call(Some(id), &req.params, tx);
				None
			}
			_ => Some(Response {
				jsonrpc: "2.0",
				id,
				result: None,
				error: Some(ErrorObject {
					code: -32601,
					message: format!("method not found: {}", req.method),
					data: None,
				}),
			}),
		}
	}

	fn handle_notification(&mut self, req: &Request, tx: &mpsc::UnboundedSender<Option<Response>>) {
		match req.method.as_str() {
			"notifications/initialized" => {
				debug!("client reports initialized");
			}
			"tools/call" if self.state == SessionState::Initialized => {
				// Executed for effect; a notification never gets a reply.
				self.spawn_call(None, &req.params, tx);
			}
			other => {
				debug!("ignoring notification {}", other);
			}
		}
	}

	fn handle_initialize(&mut self, id: Value, params: &Value) -> Response {
		if self.state != SessionState::Uninitialized {
			return Response::err(
				id,
				&ServerError::internal("initialize received after handshake")
			);
		}
		let requested = params
			.get("protocolVersion")
			.and_then(Value::as_str)
			.unwrap_or("");
		if !SUPPORTED_PROTOCOL_VERSIONS.iter().any(|version| *version == requested) {
			return Response::err(
				id,
				&ServerError::UnsupportedProtocolVersion {
					requested: requested.to_string()
				}
			);
		}
		let client = ClientInfo {
			name: params
				.pointer("/clientInfo/name")
				.and_then(Value::as_str)
				.unwrap_or("")
				.to_string(),
			version: params
				.pointer("/clientInfo/version")
				.and_then(Value::as_str)
				.unwrap_or("")
				.to_string(),
		};
		info!("client {} {} connected", client.name, client.version);
		self.client = Some(client);
		self.protocol_version = Some(requested.to_string());
		self.state = SessionState::Initialized;
		Response::ok(
			id,
			json!({
				"protocolVersion": requested,
				"capabilities": {
					"tools": {},
					"logging": {}
				},
				"serverInfo": {
					"name": self.server_name.clone(),
					"version": self.server_version.clone()
				}
			})
		)
	}

	fn spawn_call(
		&mut self,
		id: Option<Value>,
		params: &Value,
		tx: &mpsc::UnboundedSender<Option<Response>>) {
		if self.state == SessionState::Draining || self.state == SessionState::Closed {
			if let Some(id) = id {
				let _ = tx.send(Some(Response::err(id, &ServerError::ServerShuttingDown)));
				self.in_flight += 1;
			}
			return;
		}
		let name = match params.get("name").and_then(Value::as_str) {
			Some(name) => name.to_string(),
			None => {
				if let Some(id) = id {
					let _ = tx.send(Some(Response::err(
						id,
						&ServerError::invalid_field("name", "required field missing")
					)));
					self.in_flight += 1;
				}
				return;
			}
		};
		let args = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
		let context = ToolContext {
			sandbox: self.sandbox.read().expect("sandbox lock").clone(),
			config: self.config.current(),
			editor: self.editor.clone(),
			model: self.model.clone(),
			cancel: self.shutdown.child_token(),
		};
		let executor = self.executor.clone();
		let tx = tx.clone();
		self.in_flight += 1;
		tokio::spawn(async move {
			let outcome = executor.execute(&name, args, context).await;
			let response = id.map(|id| {
				match outcome {
					Ok(result) => Response::ok(id, result),
					Err(err) => Response::err(id, &err),
				}
			});
			let _ = tx.send(response);
		});
	}
}

/// Build the server over real stdio and run it to EOF.
pub async fn run(options: ServerOptions) -> Result<()> {
	let mut server = Server::new(&options.root)?;
	init_tracing(&server.config.current());
	server.hook_reload();
	server.config.watch()?;
	let transport = StdioTransport::stdio();
	server.run_loop(transport).await?;
	server.config.stop();
	Ok(())
}

use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

struct RpcClient {
	child: Child,
	stdin: Option<ChildStdin>,
	stdout: BufReader<ChildStdout>,
	next_id: u64,
}

impl RpcClient {
	fn spawn(root: &Path) -> Self {
		Self::spawn_with(root, &[])
	}

	fn spawn_with(root: &Path, envs: &[(&str, &str)]) -> Self {
		let bin = env!("CARGO_BIN_EXE_mcp-workspace");
		let mut command = Command::new(bin);
		command
			.arg("--root")
			.arg(root)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped());
		for (key, value) in envs {
			command.env(key, value);
		}
		let mut child = command.spawn().expect("spawn mcp-workspace");
		let stdin = child.stdin
			.take()
			.expect("stdin");
		let stdout = child.stdout
			.take()
			.expect("stdout");
		Self {
			child,
			stdin: Some(stdin),
			stdout: BufReader::new(stdout),
			next_id: 1
		}
	}

	fn send_line(&mut self, line: &str) {
		let stdin = self.stdin.as_mut().expect("stdin");
		writeln!(stdin, "{}", line).expect("write request");
		stdin.flush().expect("flush request");
	}

	fn send(&mut self, method: &str, params: Value) -> Value {
		let id = self.next_id;
		self.next_id += 1;
		let req = json!({
			"jsonrpc": "2.0",
			"id": id,
			"method": method,
			"params": params
		});
		let line = serde_json::to_string(&req).expect("serialize request");
		self.send_line(&line);
		let mut resp_line = String::new();
		loop {
			resp_line.clear();
			let bytes = self.stdout
				.read_line(&mut resp_line)
				.expect("read response");
			if bytes == 0 {
				panic!("mcp-workspace exited unexpectedly");
			}
			let trimmed = resp_line.trim();
			if trimmed.is_empty() {
				continue;
			}
			let parsed: Value = match serde_json::from_str(trimmed) {
				Ok(value) => value,
				Err(_) => continue,
			};
			if parsed.get("id").and_then(Value::as_u64) == Some(id) {
				return parsed;
			}
		}
	}

	fn initialize(&mut self) -> Value {
		self.send(
			"initialize",
			json!({
				"protocolVersion": "2024-11-05",
				"capabilities": {},
				"clientInfo": { "name": "integration", "version": "0.0.1" }
			})
		)
	}

	fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
		self.send("tools/call", json!({
			"name": name,
			"arguments": arguments
		}))
	}
}

impl Drop for RpcClient {
	fn drop(&mut self) {
		let _ = self.child.kill();
	}
}

fn write_text(path: &Path, contents: &str) {
	std::fs::create_dir_all(path.parent().unwrap()).expect("create parent");
	std::fs::write(path, contents).expect("write file");
}

fn write_config(root: &Path, config: &Value) {
	let dir = root.join(".cursorcli-mcp");
	std::fs::create_dir_all(&dir).expect("config dir");
	std::fs::write(
		dir.join("config.json"),
		serde_json::to_string_pretty(config).expect("serialize config")
	).expect("write config");
}

fn base_config() -> Value {
	json!({
		"server": {
			"name": "mcp-workspace",
			"version": "0.1.0",
			"maxConcurrentRequests": 10,
			"requestTimeoutMs": 5000
		},
		"tools": {
			"allowedTools": ["*"],
			"fileOperations": {
				"maxFileSize": 10485760,
				"allowedDirectories": ["."],
				"blockedPatterns": [".git/**", "**/*.pem", "**/.env"]
			}
		},
		"logging": {
			"level": "info",
			"outputs": ["console"],
			"maxLogSize": 10485760,
			"rotationCount": 5
		},
		"security": {
			"enforceProjectRoot": true,
			"allowDestructiveOperations": false
		}
	})
}

#[test]
fn initialize_handshake_succeeds() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	let resp = client.initialize();
	let result = resp.get("result").expect("result");
	assert_eq!(
		result.get("protocolVersion").and_then(Value::as_str),
		Some("2024-11-05")
	);
	assert_eq!(
		result.pointer("/serverInfo/name").and_then(Value::as_str),
		Some("mcp-workspace")
	);
	assert!(result.pointer("/capabilities/tools").is_some());
	assert!(result.pointer("/capabilities/logging").is_some());
}

#[test]
fn unsupported_protocol_version_keeps_session_uninitialized() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	let resp = client.send(
		"initialize",
		json!({
			"protocolVersion": "1999-01-01",
			"capabilities": {},
			"clientInfo": { "name": "t", "version": "0" }
		})
	);
	let error = resp.get("error").expect("error");
	assert_eq!(error.get("code").and_then(Value::as_i64), Some(-32600));
	assert_eq!(
		error.pointer("/data/errorCode").and_then(Value::as_str),
		Some("UNSUPPORTED_PROTOCOL_VERSION")
	);
	assert_eq!(
		error.pointer("/data/requestedVersion").and_then(Value::as_str),
		Some("1999-01-01")
	);
	// A correct handshake still goes through afterwards.
	let resp = client.initialize();
	assert!(resp.get("result").is_some());
}

#[test]
fn tools_list_before_initialize_is_rejected() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	let resp = client.send("tools/list", json!({}));
	let error = resp.get("error").expect("error");
	assert_eq!(error.get("code").and_then(Value::as_i64), Some(-32600));
	assert_eq!(
		error.pointer("/data/errorCode").and_then(Value::as_str),
		Some("NOT_INITIALIZED")
	);
}

#[test]
fn read_write_list_round_trip() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("write_file", json!({
		"path": "notes/todo.txt",
		"content": "ship it",
		"createDirs": true
	}));
	let result = resp.get("result").expect("result");
	assert!(result.get("isError").is_none());
	let resp = client.call_tool("read_file", json!({ "path": "notes/todo.txt" }));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("content").and_then(Value::as_str), Some("ship it"));
	assert_eq!(structured.get("truncated").and_then(Value::as_bool), Some(false));
	let resp = client.call_tool("list_directory", json!({ "path": "notes" }));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("count").and_then(Value::as_u64), Some(1));
	assert_eq!(
		structured.pointer("/entries/0/name").and_then(Value::as_str),
		Some("todo.txt")
	);
}

#[test]
fn path_traversal_is_reported_without_touching_the_file() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("read_file", json!({ "path": "../etc/passwd" }));
	let result = resp.get("result").expect("result");
	assert_eq!(result.get("isError").and_then(Value::as_bool), Some(true));
	assert_eq!(
		result.pointer("/structuredContent/code").and_then(Value::as_str),
		Some("PATH_TRAVERSAL")
	);
	assert_eq!(
		result.pointer("/structuredContent/attemptedPath").and_then(Value::as_str),
		Some("../etc/passwd")
	);
}

#[test]
fn blocked_patterns_reject_reads() {
	let root = tempfile::tempdir().expect("tempdir");
	write_text(&root.path().join("secrets/api.pem"), "key material");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("read_file", json!({ "path": "secrets/api.pem" }));
	let result = resp.get("result").expect("result");
	assert_eq!(result.get("isError").and_then(Value::as_bool), Some(true));
	assert_eq!(
		result.pointer("/structuredContent/code").and_then(Value::as_str),
		Some("BLOCKED_PATTERN")
	);
}

#[test]
fn invalid_frames_are_skipped_and_the_session_continues() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	client.send_line("not json");
	let resp = client.send("tools/list", json!({}));
	let tools = resp.pointer("/result/tools").and_then(Value::as_array).expect("tools");
	assert!(!tools.is_empty());
}

#[test]
fn allowlist_limits_the_visible_tools() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut config = base_config();
	config["tools"]["allowedTools"] = json!(["read_file", "get_project_info"]);
	write_config(root.path(), &config);
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.send("tools/list", json!({}));
	let tools = resp.pointer("/result/tools").and_then(Value::as_array).expect("tools");
	let names: Vec<&str> = tools
		.iter()
		.filter_map(|tool| tool.get("name").and_then(Value::as_str))
		.collect();
	assert_eq!(names.len(), 2);
	assert!(names.contains(&"read_file"));
	assert!(names.contains(&"get_project_info"));
	let resp = client.call_tool("write_file", json!({ "path": "x.txt", "content": "x" }));
	let error = resp.get("error").expect("error");
	assert_eq!(
		error.pointer("/data/errorCode").and_then(Value::as_str),
		Some("TOOL_DISABLED")
	);
}

#[test]
fn config_reload_changes_the_tool_surface_without_restart() {
	let root = tempfile::tempdir().expect("tempdir");
	write_config(root.path(), &base_config());
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.send("tools/list", json!({}));
	let before = resp.pointer("/result/tools").and_then(Value::as_array).expect("tools").len();
	assert!(before > 1);
	let mut config = base_config();
	config["tools"]["allowedTools"] = json!(["read_file"]);
	write_config(root.path(), &config);
	let deadline = Instant::now() + Duration::from_secs(5);
	loop {
		std::thread::sleep(Duration::from_millis(150));
		let resp = client.send("tools/list", json!({}));
		let count = resp.pointer("/result/tools").and_then(Value::as_array).expect("tools").len();
		if count == 1 {
			break;
		}
		if Instant::now() > deadline {
			panic!("allowlist reload not observed; still {} tools", count);
		}
	}
}

#[test]
fn destructive_operations_are_gated_by_config_and_env_overlay() {
	let root = tempfile::tempdir().expect("tempdir");
	write_text(&root.path().join("doomed.txt"), "bye");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("delete_file", json!({ "path": "doomed.txt" }));
	let result = resp.get("result").expect("result");
	assert_eq!(result.get("isError").and_then(Value::as_bool), Some(true));
	assert_eq!(
		result.pointer("/structuredContent/code").and_then(Value::as_str),
		Some("PERMISSION_DENIED")
	);
	assert!(root.path().join("doomed.txt").exists());
	drop(client);
	let mut client = RpcClient::spawn_with(
		root.path(),
		&[("MCP_ALLOW_DESTRUCTIVE_OPERATIONS", "true")]
	);
	client.initialize();
	let resp = client.call_tool("delete_file", json!({ "path": "doomed.txt" }));
	let result = resp.get("result").expect("result");
	assert!(result.get("isError").is_none());
	assert!(!root.path().join("doomed.txt").exists());
}

#[test]
fn invalid_arguments_are_a_protocol_error_not_a_tool_result() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("read_file", json!({ "path": 42 }));
	let error = resp.get("error").expect("error");
	assert_eq!(error.get("code").and_then(Value::as_i64), Some(-32602));
	assert_eq!(
		error.pointer("/data/errorCode").and_then(Value::as_str),
		Some("INVALID_ARGUMENTS")
	);
	assert_eq!(
		error.pointer("/data/field").and_then(Value::as_str),
		Some("path")
	);
}

#[test]
fn project_tools_see_the_workspace() {
	let root = tempfile::tempdir().expect("tempdir");
	write_text(
		&root.path().join("Cargo.toml"),
		"[package]\nname = \"sample\"\nversion = \"1.0.0\"\n"
	);
	write_text(&root.path().join("src/main.rs"), "fn main() {}\n");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("get_project_info", json!({}));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("kind").and_then(Value::as_str), Some("cargo"));
	assert_eq!(structured.get("name").and_then(Value::as_str), Some("sample"));
	let resp = client.call_tool("search_files", json!({ "pattern": "*.rs" }));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(
		structured.get("matches"),
		Some(&json!(["src/main.rs"]))
	);
	let resp = client.call_tool("workspace_tree", json!({}));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	let tree = structured.get("tree").and_then(Value::as_str).expect("tree");
	assert!(tree.contains("src/"));
	assert!(tree.contains("main.rs"));
}

#[test]
fn editor_tools_edit_through_the_facade() {
	let root = tempfile::tempdir().expect("tempdir");
	write_text(&root.path().join("draft.txt"), "hello world\n");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("open_in_editor", json!({ "path": "draft.txt" }));
	assert!(resp.get("result").is_some());
	let resp = client.call_tool("insert_text", json!({
		"path": "draft.txt",
		"line": 1,
		"column": 7,
		"text": "wide "
	}));
	assert!(resp.pointer("/result/isError").is_none());
	assert_eq!(
		std::fs::read_to_string(root.path().join("draft.txt")).expect("read"),
		"hello wide world\n"
	);
	let resp = client.call_tool("get_active_file", json!({}));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert!(
		structured
		.get("path")
		.and_then(Value::as_str)
		.expect("path")
		.ends_with("draft.txt")
	);
}

#[test]
fn usage_stats_aggregate_over_the_session() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	client.call_tool("record_model_usage", json!({
		"model": "gpt-4o",
		"inputTokens": 1000,
		"outputTokens": 500,
		"durationMs": 800
	}));
	client.call_tool("record_model_usage", json!({
		"model": "claude-3.5-sonnet",
		"inputTokens": 2000,
		"outputTokens": 1000,
		"durationMs": 1200
	}));
	let resp = client.call_tool("get_usage_stats", json!({}));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("sessionCount").and_then(Value::as_u64), Some(2));
	assert_eq!(structured.get("totalTokens").and_then(Value::as_u64), Some(4500));
	let models = structured.get("models").and_then(Value::as_array).expect("models");
	assert_eq!(models.len(), 2);
	let resp = client.call_tool("get_current_model", json!({}));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(
		structured.get("id").and_then(Value::as_str),
		Some("claude-3.5-sonnet")
	);
}

#[test]
fn max_file_size_boundary_is_exact() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut config = base_config();
	config["tools"]["fileOperations"]["maxFileSize"] = json!(2048);
	write_config(root.path(), &config);
	std::fs::write(root.path().join("exact.bin"), vec![b'a'; 2048]).expect("write");
	std::fs::write(root.path().join("over.bin"), vec![b'a'; 2049]).expect("write");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	let resp = client.call_tool("read_file", json!({ "path": "exact.bin" }));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("count").and_then(Value::as_u64), Some(2048));
	assert_eq!(structured.get("truncated").and_then(Value::as_bool), Some(false));
	let resp = client.call_tool("read_file", json!({ "path": "over.bin" }));
	let structured = resp.pointer("/result/structuredContent").expect("structured");
	assert_eq!(structured.get("count").and_then(Value::as_u64), Some(2048));
	assert_eq!(structured.get("truncated").and_then(Value::as_bool), Some(true));
}

#[test]
fn clean_shutdown_on_eof() {
	let root = tempfile::tempdir().expect("tempdir");
	let mut client = RpcClient::spawn(root.path());
	client.initialize();
	client.stdin.take();
	let status = client.child.wait().expect("wait");
	assert!(status.success());
}

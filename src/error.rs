//! Closed error taxonomy and its deterministic JSON-RPC mapping.

use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServerError {
	#[error("invalid arguments: {detail}")]
	InvalidArguments {
		field: Option<String>,
		detail: String,
	},
	#[error("relative path escapes the workspace root: {attempted}")]
	PathTraversal { attempted: String },
	#[error("absolute path outside the workspace root: {attempted}")]
	OutsideRoot { attempted: String },
	#[error("path matches a blocked pattern: {attempted}")]
	BlockedPattern { attempted: String },
	#[error("not found: {path}")]
	NotFound { path: String },
	#[error("permission denied: {path}")]
	PermissionDenied { path: String },
	#[error("call timed out after {timeout_ms}ms")]
	Timeout { timeout_ms: u64 },
	#[error("concurrency limit of {limit} exceeded")]
	ConcurrencyLimitExceeded { limit: usize },
	#[error("tool not found: {name}")]
	ToolNotFound { name: String },
	#[error("tool disabled: {name}")]
	ToolDisabled { name: String },
	#[error("unsupported protocol version: {requested}")]
	UnsupportedProtocolVersion { requested: String },
	#[error("server not initialized")]
	NotInitialized,
	#[error("invalid frame: {detail}")]
	InvalidFrame { detail: String },
	#[error("transport not connected")]
	NotConnected,
	#[error("server is shutting down")]
	ServerShuttingDown,
	#[error("{context}")]
	Internal {
		context: String,
		#[source]
		source: Option<Box<dyn std::error::Error + Send + Sync>>,
	},
}

impl ServerError {
	pub fn internal(context: impl Into<String>) -> Self {
		Self::Internal {
			context: context.into(),
			source: None,
		}
	}

	pub fn internal_with(context: impl Into<String>, source: anyhow::Error) -> Self {
		Self::Internal {
			context: context.into(),
			source: Some(source.into()),
		}
	}

	pub fn invalid_arguments(detail: impl Into<String>) -> Self {
		Self::InvalidArguments {
			field: None,
			detail: detail.into(),
		}
	}

	pub fn invalid_field(field: impl Into<String>, detail: impl Into<String>) -> Self {
		Self::InvalidArguments {
			field: Some(field.into()),
			detail: detail.into(),
		}
	}

	pub fn from_io(err: std::io::Error, path: &str) -> Self {
		match err.kind() {
			std::io::ErrorKind::NotFound => Self::NotFound {
				path: path.to_string()
			},
			std::io::ErrorKind::PermissionDenied => Self::PermissionDenied {
				path: path.to_string()
			},
			_ => Self::Internal {
				context: format!("io error on {}: {}", path, err),
				source: Some(err.into()),
			},
		}
	}

	pub fn code(&self) -> &'static str {
		match self {
			Self::InvalidArguments { .. } => "INVALID_ARGUMENTS",
			Self::PathTraversal { .. } => "PATH_TRAVERSAL",
			Self::OutsideRoot { .. } => "OUTSIDE_ROOT",
			Self::BlockedPattern { .. } => "BLOCKED_PATTERN",
			Self::NotFound { .. } => "NOT_FOUND",
			Self::PermissionDenied { .. } => "PERMISSION_DENIED",
			Self::Timeout { .. } => "TIMEOUT",
			Self::ConcurrencyLimitExceeded { .. } => "CONCURRENCY_LIMIT_EXCEEDED",
			Self::ToolNotFound { .. } => "TOOL_NOT_FOUND",
			Self::ToolDisabled { .. } => "TOOL_DISABLED",
			Self::UnsupportedProtocolVersion { .. } => "UNSUPPORTED_PROTOCOL_VERSION",
			Self::NotInitialized => "NOT_INITIALIZED",
			Self::InvalidFrame { .. } => "INVALID_FRAME",
			Self::NotConnected => "NOT_CONNECTED",
			Self::ServerShuttingDown => "SERVER_SHUTTING_DOWN",
			Self::Internal { .. } => "INTERNAL_ERROR",
		}
	}

	pub fn rpc_code(&self) -> i64 {
		match self {
			Self::InvalidArguments { .. } => -32602,
			Self::PathTraversal { .. }
			| Self::OutsideRoot { .. }
			| Self::BlockedPattern { .. }
			| Self::NotFound { .. }
			| Self::ToolNotFound { .. }
			| Self::ToolDisabled { .. }
			| Self::UnsupportedProtocolVersion { .. }
			| Self::NotInitialized
			| Self::ServerShuttingDown => -32600,
			Self::Timeout { .. }
			| Self::ConcurrencyLimitExceeded { .. }
			| Self::PermissionDenied { .. }
			| Self::NotConnected
			| Self::Internal { .. } => -32603,
			Self::InvalidFrame { .. } => -32700,
		}
	}

	pub fn data(&self) -> Value {
		let mut obj = serde_json::Map::new();
		obj.insert("errorCode".to_string(), Value::String(self.code().to_string()));
		match self {
			Self::InvalidArguments { field, .. } => {
				if let Some(field) = field {
					obj.insert("field".to_string(), Value::String(field.clone()));
				}
			}
			Self::PathTraversal { attempted }
			| Self::OutsideRoot { attempted }
			| Self::BlockedPattern { attempted } => {
				obj.insert("attemptedPath".to_string(), Value::String(attempted.clone()));
			}
			Self::NotFound { path } | Self::PermissionDenied { path } => {
				obj.insert("path".to_string(), Value::String(path.clone()));
			}
			Self::Timeout { timeout_ms } => {
				obj.insert("timeoutMs".to_string(), json!(timeout_ms));
			}
			Self::ConcurrencyLimitExceeded { limit } => {
				obj.insert("limit".to_string(), json!(limit));
			}
			Self::ToolNotFound { name } | Self::ToolDisabled { name } => {
				obj.insert("tool".to_string(), Value::String(name.clone()));
			}
			Self::UnsupportedProtocolVersion { requested } => {
				obj.insert("requestedVersion".to_string(), Value::String(requested.clone()));
			}
			_ => {}
		}
		if !is_production() {
			obj.insert("stack".to_string(), Value::String(self.chain()));
		}
		Value::Object(obj)
	}

	fn chain(&self) -> String {
		let mut out = self.to_string();
		let mut source = std::error::Error::source(self);
		while let Some(err) = source {
			out.push_str("\ncaused by: ");
			out.push_str(&err.to_string());
			source = err.source();
		}
		out
	}
}

fn is_production() -> bool {
	std::env::var("MCP_ENV").map(|value| value == "production").unwrap_or(false)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rpc_codes_follow_the_mapping_table() {
		assert_eq!(ServerError::invalid_arguments("x").rpc_code(), -32602);
		assert_eq!(
			ServerError::PathTraversal {
				attempted: "../x".to_string()
			}.rpc_code(),
			-32600
		);
		assert_eq!(
			ServerError::Timeout {
				timeout_ms: 5000
			}.rpc_code(),
			-32603
		);
		assert_eq!(
			ServerError::InvalidFrame {
				detail: "bad".to_string()
			}.rpc_code(),
			-32700
		);
		assert_eq!(ServerError::NotInitialized.rpc_code(), -32600);
		assert_eq!(
			ServerError::ConcurrencyLimitExceeded {
				limit: 3
			}.rpc_code(),
			-32603
		);
	}

	#[test]
	fn data_carries_the_attempted_path() {
		let err = ServerError::PathTraversal {
			attempted: "../etc/passwd".to_string()
		};
		let data = err.data();
		assert_eq!(data.get("errorCode").and_then(Value::as_str), Some("PATH_TRAVERSAL"));
		assert_eq!(
			data.get("attemptedPath").and_then(Value::as_str),
			Some("../etc/passwd")
		);
	}

	#[test]
	fn data_carries_timeout_and_limit_context() {
		let data = ServerError::Timeout {
			timeout_ms: 1234
		}.data();
		assert_eq!(data.get("timeoutMs").and_then(Value::as_u64), Some(1234));
		let data = ServerError::ConcurrencyLimitExceeded {
			limit: 7
		}.data();
		assert_eq!(data.get("limit").and_then(Value::as_u64), Some(7));
	}

	#[test]
	fn io_errors_classify_by_kind() {
		let err = ServerError::from_io(
			std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
			"a.txt"
		);
		assert!(matches!(err, ServerError::NotFound { .. }));
		let err = ServerError::from_io(
			std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
			"a.txt"
		);
		assert!(matches!(err, ServerError::PermissionDenied { .. }));
	}
}

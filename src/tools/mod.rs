pub mod editor;
pub mod file;
pub mod model;
pub mod project;

use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigSnapshot;
use crate::error::ServerError;
use crate::registry::ToolHandler;
use crate::sandbox::PathSandbox;

/// Borrowed collaborators for the duration of one call.
#[derive(Clone)]
pub struct ToolContext {
	pub sandbox: Arc<PathSandbox>,
	pub config: Arc<ConfigSnapshot>,
	pub editor: Arc<dyn editor::EditorPort>,
	pub model: Arc<model::ModelTracker>,
	pub cancel: CancellationToken,
}

/// Adapt an async handler into a registry handler. Domain failures become an
/// `isError` tool result; the transport-level response stays a success.
pub fn wrap<F, Fut>(f: F) -> ToolHandler
where
	F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Value, ServerError>> + Send + 'static, {
	Arc::new(move |args, context| {
		let fut = f(args, context);
		Box::pin(async move {
			match fut.await {
				Ok(result) => Ok(result),
				Err(err) => Ok(error_result(&err)),
			}
		})
	})
}

pub fn text_result(message: impl Into<String>, structured: Value) -> Value {
	let message: String = message.into();
	json!({
		"content": [
			{
				"type": "text",
				"text": message
			}
		],
		"structuredContent": structured
	})
}

/// Handler-level domain failures become an `isError` tool result rather than
/// a JSON-RPC error, carrying the same code and context the mapper would.
pub fn error_result(err: &ServerError) -> Value {
	let mut structured = serde_json::Map::new();
	structured.insert("code".to_string(), Value::String(err.code().to_string()));
	if let Value::Object(data) = err.data() {
		for (key, value) in data {
			if key != "errorCode" && key != "stack" {
				structured.insert(key, value);
			}
		}
	}
	json!({
		"isError": true,
		"structuredContent": Value::Object(structured),
		"content": [
			{
				"type": "text",
				"text": err.to_string()
			}
		]
	})
}

#[cfg(test)]
pub(crate) mod test_support {
	use super::*;
	use std::path::Path;

	pub fn context_for(
		root: &Path,
		mutate: impl FnOnce(&mut ConfigSnapshot)) -> ToolContext {
		let mut config = ConfigSnapshot::default();
		mutate(&mut config);
		let sandbox = PathSandbox::new(
			root,
			&config.tools.file_operations.blocked_patterns,
			config.security.enforce_project_root
		).expect("sandbox");
		ToolContext {
			sandbox: Arc::new(sandbox),
			config: Arc::new(config),
			editor: Arc::new(editor::MockEditor::new()),
			model: Arc::new(model::ModelTracker::new()),
			cancel: CancellationToken::new(),
		}
	}

	pub fn context_in(
		mutate: impl FnOnce(&mut ConfigSnapshot)) -> (ToolContext, tempfile::TempDir) {
		let root = tempfile::tempdir().expect("tempdir");
		let context = context_for(root.path(), mutate);
		(context, root)
	}
}

//! Editor control: a port trait the IDE implements, a mock that applies edits
//! to on-disk buffers, and the tools that drive it. Positions are 1-based
//! lines and columns, columns counted in characters.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::ServerError;
use crate::registry::{FieldKind, ToolRegistry, ToolSchema};
use crate::tools::{text_result, wrap, ToolContext};

#[async_trait]
pub trait EditorPort: Send + Sync {
	async fn is_ready(&self) -> bool;
	async fn open_file(&self, path: &Path) -> Result<(), ServerError>;
	async fn active_file(&self) -> Option<PathBuf>;
	async fn insert_text(
		&self,
		path: &Path,
		line: usize,
		column: usize,
		text: &str) -> Result<(), ServerError>;
	async fn replace_range(
		&self,
		path: &Path,
		start_line: usize,
		start_column: usize,
		end_line: usize,
		end_column: usize,
		text: &str) -> Result<String, ServerError>;
}

#[derive(Default)]
struct MockEditorState {
	buffers: HashMap<PathBuf, String>,
	active: Option<PathBuf>,
}

/// In-memory editor backed by the file system: buffers load from disk on open
/// and edits write straight back.
#[derive(Default)]
pub struct MockEditor {
	state: Mutex<MockEditorState>,
}

impl MockEditor {
	pub fn new() -> Self {
		Self::default()
	}

	fn load_buffer(&self, path: &Path) -> Result<String, ServerError> {
		{
			let state = self.state.lock().expect("editor lock");
			if let Some(buffer) = state.buffers.get(path) {
				return Ok(buffer.clone());
			}
		}
		std::fs::read_to_string(path)
			.map_err(|err| ServerError::from_io(err, &path.display().to_string()))
	}

	fn store_buffer(&self, path: &Path, content: String) -> Result<(), ServerError> {
		std::fs::write(path, &content)
			.map_err(|err| ServerError::from_io(err, &path.display().to_string()))?;
		let mut state = self.state.lock().expect("editor lock");
		state.buffers.insert(path.to_path_buf(), content);
		Ok(())
	}
}

#[async_trait]
impl EditorPort for MockEditor {
	async fn is_ready(&self) -> bool {
		true
	}

	async fn open_file(&self, path: &Path) -> Result<(), ServerError> {
		let content = std::fs::read_to_string(path)
			.map_err(|err| ServerError::from_io(err, &path.display().to_string()))?;
		let mut state = self.state.lock().expect("editor lock");
		state.buffers.insert(path.to_path_buf(), content);
		state.active = Some(path.to_path_buf());
		Ok(())
	}

	async fn active_file(&self) -> Option<PathBuf> {
		self.state.lock().expect("editor lock").active.clone()
	}

	async fn insert_text(
		&self,
		path: &Path,
		line: usize,
		column: usize,
		text: &str) -> Result<(), ServerError> {
		let buffer = self.load_buffer(path)?;
		let at = position_to_offset(&buffer, line, column)?;
		let mut updated = buffer;
		updated.insert_str(at, text);
		self.store_buffer(path, updated)
	}

	async fn replace_range(
		&self,
		path: &Path,
		start_line: usize,
		start_column: usize,
		end_line: usize,
		end_column: usize,
		text: &str) -> Result<String, ServerError> {
		let buffer = self.load_buffer(path)?;
		let start = position_to_offset(&buffer, start_line, start_column)?;
		let end = position_to_offset(&buffer, end_line, end_column)?;
		if end < start {
			return Err(ServerError::invalid_arguments("end position precedes start position"));
		}
		let replaced = buffer[start..end].to_string();
		let mut updated = buffer;
		updated.replace_range(start..end, text);
		self.store_buffer(path, updated)?;
		Ok(replaced)
	}
}

/// Byte offset of a 1-based line/column position. The column may sit one past
/// the end of the line; the line may be one past the last when the column is 1.
fn position_to_offset(content: &str, line: usize, column: usize) -> Result<usize, ServerError> {
	if line == 0 || column == 0 {
		return Err(ServerError::invalid_arguments("line and column are 1-based"));
	}
	let mut offset = 0usize;
	let mut current = 1usize;
	for candidate in content.split_inclusive('\n') {
		if current == line {
			return column_offset(candidate, offset, column);
		}
		offset += candidate.len();
		current += 1;
	}
	// One line past the end addresses the start of a would-be trailing line.
	if line == current && column == 1 {
		return Ok(offset);
	}
	Err(ServerError::invalid_arguments(format!(
		"line {} is out of range ({} line(s))",
		line,
		current.saturating_sub(1)
	)))
}

fn column_offset(line_text: &str, line_start: usize, column: usize) -> Result<usize, ServerError> {
	let body = line_text.trim_end_matches(['\n', '\r']);
	let mut remaining = column - 1;
	for (index, _) in body.char_indices() {
		if remaining == 0 {
			return Ok(line_start + index);
		}
		remaining -= 1;
	}
	if remaining == 0 {
		return Ok(line_start + body.len());
	}
	Err(ServerError::invalid_arguments(format!(
		"column {} is out of range for a {}-character line",
		column,
		body.chars().count()
	)))
}

pub fn register(registry: &mut ToolRegistry) -> Result<(), ServerError> {
	registry.register(
		"editor_status",
		"Report whether the editor is ready and which file is active",
		ToolSchema::new(),
		wrap(editor_status)
	)?;
	registry.register(
		"open_in_editor",
		"Open a workspace file in the editor and make it active",
		ToolSchema::new()
			.field("path", FieldKind::String, "File to open, relative to the workspace root."),
		wrap(open_in_editor)
	)?;
	registry.register(
		"get_active_file",
		"Return the path of the file the editor currently has focused",
		ToolSchema::new(),
		wrap(get_active_file)
	)?;
	registry.register(
		"insert_text",
		"Insert text at a 1-based line and column position",
		ToolSchema::new()
			.field("path", FieldKind::String, "File to edit.")
			.field("line", FieldKind::Integer, "1-based line.")
			.field("column", FieldKind::Integer, "1-based column, counted in characters.")
			.field("text", FieldKind::String, "Text to insert."),
		wrap(insert_text)
	)?;
	registry.register(
		"replace_text",
		"Replace a 1-based line/column range with new text",
		ToolSchema::new()
			.field("path", FieldKind::String, "File to edit.")
			.field("startLine", FieldKind::Integer, "1-based start line.")
			.field("startColumn", FieldKind::Integer, "1-based start column.")
			.field("endLine", FieldKind::Integer, "1-based end line.")
			.field("endColumn", FieldKind::Integer, "1-based end column (exclusive).")
			.field("text", FieldKind::String, "Replacement text."),
		wrap(replace_text)
	)?;
	Ok(())
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ServerError> {
	args.get(name)
		.and_then(Value::as_str)
		.ok_or_else(|| ServerError::invalid_field(name.to_string(), "required field missing"))
}

fn required_position(args: &Value, name: &str) -> Result<usize, ServerError> {
	args.get(name)
		.and_then(Value::as_u64)
		.map(|value| value as usize)
		.ok_or_else(|| ServerError::invalid_field(name.to_string(), "required field missing"))
}

async fn editor_status(_args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let ready = context.editor.is_ready().await;
	let active = context.editor.active_file().await;
	let mut structured = serde_json::Map::new();
	structured.insert("ready".to_string(), Value::Bool(ready));
	if let Some(active) = &active {
		structured.insert("activeFile".to_string(), Value::String(active.display().to_string()));
	}
	Ok(text_result(
		if ready {
			"Editor is ready."
		}
		else {
			"Editor is not ready."
		},
		Value::Object(structured)
	))
}

async fn open_in_editor(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let resolved = context.sandbox.validate(path)?;
	context.editor.open_file(&resolved).await?;
	Ok(text_result(
		format!("Opened {}.", path),
		json!({
			"path": path,
		})
	))
}

async fn get_active_file(_args: Value, context: ToolContext) -> Result<Value, ServerError> {
	match context.editor.active_file().await {
		Some(active) => Ok(text_result(
			format!("Active file is {}.", active.display()),
			json!({
				"path": active.display().to_string(),
			})
		)),
		None => Ok(text_result("No active file.", json!({ "path": Value::Null }))),
	}
}

async fn insert_text(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let line = required_position(&args, "line")?;
	let column = required_position(&args, "column")?;
	let text = required_str(&args, "text")?;
	let resolved = context.sandbox.validate(path)?;
	context.editor.insert_text(&resolved, line, column, text).await?;
	Ok(text_result(
		format!("Inserted {} character(s) at {}:{}:{}.", text.chars().count(), path, line, column),
		json!({
			"path": path,
			"line": line,
			"column": column,
		})
	))
}

async fn replace_text(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let start_line = required_position(&args, "startLine")?;
	let start_column = required_position(&args, "startColumn")?;
	let end_line = required_position(&args, "endLine")?;
	let end_column = required_position(&args, "endColumn")?;
	let text = required_str(&args, "text")?;
	let resolved = context.sandbox.validate(path)?;
	let replaced = context.editor
		.replace_range(
			&resolved,
			start_line,
			start_column,
			end_line,
			end_column,
			text
		)
		.await?;
	Ok(text_result(
		format!("Replaced {} character(s) in {}.", replaced.chars().count(), path),
		json!({
			"path": path,
			"replaced": replaced,
		})
	))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::tools::test_support::context_in;

	#[test]
	fn positions_map_to_byte_offsets() {
		let content = "abc\ndef\n";
		assert_eq!(position_to_offset(content, 1, 1).expect("pos"), 0);
		assert_eq!(position_to_offset(content, 1, 4).expect("pos"), 3);
		assert_eq!(position_to_offset(content, 2, 2).expect("pos"), 5);
		assert_eq!(position_to_offset(content, 3, 1).expect("pos"), 8);
		assert!(position_to_offset(content, 0, 1).is_err());
		assert!(position_to_offset(content, 1, 6).is_err());
		assert!(position_to_offset(content, 5, 1).is_err());
	}

	#[test]
	fn positions_count_characters_not_bytes() {
		let content = "héllo\n";
		let offset = position_to_offset(content, 1, 3).expect("pos");
		assert_eq!(&content[offset..offset + 1], "l");
	}

	#[tokio::test]
	async fn open_then_status_reports_the_active_file() {
		let (context, root) = context_in(|_| {});
		std::fs::write(root.path().join("main.rs"), "fn main() {}\n").expect("write");
		open_in_editor(json!({"path": "main.rs"}), context.clone()).await.expect("open");
		let result = editor_status(json!({}), context.clone()).await.expect("status");
		let structured = result.get("structuredContent").expect("structured");
		assert_eq!(structured.get("ready").and_then(Value::as_bool), Some(true));
		assert!(
			structured
			.get("activeFile")
			.and_then(Value::as_str)
			.expect("active")
			.ends_with("main.rs")
		);
		let result = get_active_file(json!({}), context).await.expect("active");
		let structured = result.get("structuredContent").expect("structured");
		assert!(structured.get("path").and_then(Value::as_str).expect("path").ends_with("main.rs"));
	}

	#[tokio::test]
	async fn insert_writes_through_to_disk() {
		let (context, root) = context_in(|_| {});
		std::fs::write(root.path().join("note.txt"), "hello world\n").expect("write");
		insert_text(
			json!({"path": "note.txt", "line": 1, "column": 7, "text": "brave "}),
			context
		).await.expect("insert");
		assert_eq!(
			std::fs::read_to_string(root.path().join("note.txt")).expect("read"),
			"hello brave world\n"
		);
	}

	#[tokio::test]
	async fn replace_returns_the_replaced_text() {
		let (context, root) = context_in(|_| {});
		std::fs::write(root.path().join("code.rs"), "let x = 1;\nlet y = 2;\n").expect("write");
		let result = replace_text(
			json!({
				"path": "code.rs",
				"startLine": 1, "startColumn": 9,
				"endLine": 1, "endColumn": 10,
				"text": "42"
			}),
			context
		).await.expect("replace");
		let structured = result.get("structuredContent").expect("structured");
		assert_eq!(structured.get("replaced").and_then(Value::as_str), Some("1"));
		assert_eq!(
			std::fs::read_to_string(root.path().join("code.rs")).expect("read"),
			"let x = 42;\nlet y = 2;\n"
		);
	}

	#[tokio::test]
	async fn out_of_range_positions_are_invalid_arguments() {
		let (context, root) = context_in(|_| {});
		std::fs::write(root.path().join("short.txt"), "one\n").expect("write");
		let err = insert_text(
			json!({"path": "short.txt", "line": 9, "column": 1, "text": "x"}),
			context
		).await.expect_err("out of range");
		assert!(matches!(err, ServerError::InvalidArguments { .. }));
	}
}

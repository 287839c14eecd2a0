//! File operation tools: read, write, list, delete.
//!
//! Every path goes through the sandbox; reads serve the range
//! `[offset, min(offset+length, size, offset+maxFileSize))` and report
//! `truncated` when any requested byte was omitted. Destructive operations
//! (overwrite, delete) require `security.allowDestructiveOperations`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::ServerError;
use crate::registry::{FieldKind, ToolRegistry, ToolSchema};
use crate::tools::{text_result, wrap, ToolContext};

pub fn register(registry: &mut ToolRegistry) -> Result<(), ServerError> {
	registry.register(
		"read_file",
		"Read a file from the workspace with optional byte range and encoding",
		ToolSchema::new()
			.field("path", FieldKind::String, "Path relative to the workspace root, or absolute inside it.")
			.optional("offset", FieldKind::Integer, "Byte offset to start reading from. Default 0.")
			.optional("length", FieldKind::Integer, "Maximum number of bytes to read.")
			.optional(
				"encoding",
				FieldKind::StringEnum(vec!["utf-8", "utf-16le", "binary"]),
				"Content encoding. binary returns base64. Default utf-8."
			),
		wrap(read_file)
	)?;
	registry.register(
		"write_file",
		"Write a file in the workspace (overwrite requires destructive operations)",
		ToolSchema::new()
			.field("path", FieldKind::String, "Path relative to the workspace root, or absolute inside it.")
			.field("content", FieldKind::String, "Content to write; base64 when encoding is binary.")
			.optional(
				"encoding",
				FieldKind::StringEnum(vec!["utf-8", "utf-16le", "binary"]),
				"Content encoding. Default utf-8."
			)
			.optional("createDirs", FieldKind::Boolean, "Create missing parent directories."),
		wrap(write_file)
	)?;
	registry.register(
		"list_directory",
		"List directory entries with kind and size",
		ToolSchema::new()
			.field("path", FieldKind::String, "Directory path relative to the workspace root.")
			.optional("includeHidden", FieldKind::Boolean, "Include dotfile entries. Default false."),
		wrap(list_directory)
	)?;
	registry.register(
		"delete_file",
		"Delete a file or directory recursively (requires destructive operations)",
		ToolSchema::new()
			.field("path", FieldKind::String, "Path to delete."),
		wrap(delete_file)
	)?;
	Ok(())
}

fn required_str<'a>(args: &'a Value, name: &str) -> Result<&'a str, ServerError> {
	args.get(name)
		.and_then(Value::as_str)
		.ok_or_else(|| ServerError::invalid_field(name.to_string(), "required field missing"))
}

async fn read_file(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let encoding = args.get("encoding").and_then(Value::as_str).unwrap_or("utf-8");
	let offset = args.get("offset").and_then(Value::as_u64).unwrap_or(0);
	let length = args.get("length").and_then(Value::as_u64);
	let resolved = context.sandbox.validate(path)?;
	let meta = tokio::fs::metadata(&resolved)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	if meta.is_dir() {
		return Err(ServerError::invalid_field("path", "path is a directory"));
	}
	let size = meta.len();
	let cap = context.config.tools.file_operations.max_file_size;
	let start = offset.min(size);
	let requested_end = match length {
		Some(length) => size.min(offset.saturating_add(length)),
		None => size,
	};
	let end = requested_end.min(offset.saturating_add(cap));
	let truncated = end < requested_end;
	let mut file = tokio::fs::File::open(&resolved)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	file.seek(std::io::SeekFrom::Start(start))
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	let mut buf = Vec::new();
	file.take(end.saturating_sub(start))
		.read_to_end(&mut buf)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	let content = match encoding {
		"utf-16le" => decode_utf16le(&buf),
		"binary" => BASE64.encode(&buf),
		_ => String::from_utf8_lossy(&buf).to_string(),
	};
	let count = buf.len();
	Ok(text_result(
		format!("Read {} byte(s) from {}.", count, path),
		json!({
			"path": path,
			"size": size,
			"offset": start,
			"count": count,
			"encoding": encoding,
			"truncated": truncated,
			"content": content,
		})
	))
}

async fn write_file(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let content = required_str(&args, "content")?;
	let encoding = args.get("encoding").and_then(Value::as_str).unwrap_or("utf-8");
	let create_dirs = args.get("createDirs").and_then(Value::as_bool).unwrap_or(false);
	let resolved = context.sandbox.validate(path)?;
	let payload = match encoding {
		"binary" => BASE64
			.decode(content)
			.map_err(|err| ServerError::invalid_field("content", format!("invalid base64: {}", err)))?,
		"utf-16le" => encode_utf16le(content),
		_ => content.as_bytes().to_vec(),
	};
	let cap = context.config.tools.file_operations.max_file_size;
	if payload.len() as u64 > cap {
		return Err(ServerError::invalid_field(
			"content",
			format!("content is {} bytes, maxFileSize is {}", payload.len(), cap)
		));
	}
	let existed = tokio::fs::metadata(&resolved).await.is_ok();
	if existed && !context.config.security.allow_destructive_operations {
		return Err(ServerError::PermissionDenied {
			path: path.to_string()
		});
	}
	if create_dirs {
		if let Some(parent) = resolved.parent() {
			tokio::fs::create_dir_all(parent)
				.await
				.map_err(|err| ServerError::from_io(err, path))?;
		}
	}
	tokio::fs::write(&resolved, &payload)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	Ok(text_result(
		format!("Wrote {} byte(s) to {}.", payload.len(), path),
		json!({
			"path": path,
			"bytes": payload.len(),
			"created": !existed,
		})
	))
}

async fn list_directory(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	let include_hidden = args.get("includeHidden").and_then(Value::as_bool).unwrap_or(false);
	let resolved = context.sandbox.validate(path)?;
	let mut dir = tokio::fs::read_dir(&resolved)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	let mut entries = Vec::new();
	while let Some(entry) = dir
		.next_entry()
		.await
		.map_err(|err| ServerError::from_io(err, path))? {
		let name = entry.file_name().to_string_lossy().to_string();
		if !include_hidden && name.starts_with('.') {
			continue;
		}
		let meta = entry
			.metadata()
			.await
			.map_err(|err| ServerError::from_io(err, path))?;
		let kind = if meta.is_dir() {
			"dir"
		}
		else if meta.is_symlink() {
			"symlink"
		}
		else {
			"file"
		};
		let mut record = serde_json::Map::new();
		record.insert("name".to_string(), Value::String(name));
		record.insert("kind".to_string(), Value::String(kind.to_string()));
		if meta.is_file() {
			record.insert("size".to_string(), json!(meta.len()));
		}
		entries.push(Value::Object(record));
	}
	entries.sort_by(|a, b| {
		let a_name = a.get("name").and_then(Value::as_str).unwrap_or("");
		let b_name = b.get("name").and_then(Value::as_str).unwrap_or("");
		a_name.cmp(b_name)
	});
	let count = entries.len();
	Ok(text_result(
		format!("Listed {} entr{} in {}.", count, if count == 1 { "y" } else { "ies" }, path),
		json!({
			"path": path,
			"entries": entries,
			"count": count,
		})
	))
}

async fn delete_file(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let path = required_str(&args, "path")?;
	if !context.config.security.allow_destructive_operations {
		return Err(ServerError::PermissionDenied {
			path: path.to_string()
		});
	}
	let resolved = context.sandbox.validate(path)?;
	let meta = tokio::fs::metadata(&resolved)
		.await
		.map_err(|err| ServerError::from_io(err, path))?;
	if meta.is_dir() {
		tokio::fs::remove_dir_all(&resolved)
			.await
			.map_err(|err| ServerError::from_io(err, path))?;
	}
	else {
		tokio::fs::remove_file(&resolved)
			.await
			.map_err(|err| ServerError::from_io(err, path))?;
	}
	Ok(text_result(
		format!("Deleted {}.", path),
		json!({
			"path": path,
		})
	))
}

fn decode_utf16le(bytes: &[u8]) -> String {
	let units: Vec<u16> = bytes
		.chunks_exact(2)
		.map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
		.collect();
	String::from_utf16_lossy(&units)
}

fn encode_utf16le(text: &str) -> Vec<u8> {
	let mut out = Vec::with_capacity(text.len() * 2);
	for unit in text.encode_utf16() {
		out.extend_from_slice(&unit.to_le_bytes());
	}
	out
}

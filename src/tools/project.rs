//! Project introspection tools: manifest detection, glob search, tree view.

use globset::GlobBuilder;
use ignore::WalkBuilder;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::ServerError;
use crate::registry::{FieldKind, ToolRegistry, ToolSchema};
use crate::tools::{text_result, wrap, ToolContext};

const DEFAULT_TREE_DEPTH: usize = 5;
const DEFAULT_SEARCH_LIMIT: usize = 200;

pub fn register(registry: &mut ToolRegistry) -> Result<(), ServerError> {
	registry.register(
		"get_project_info",
		"Describe the workspace: root, project kind, manifest name and version",
		ToolSchema::new(),
		wrap(get_project_info)
	)?;
	registry.register(
		"search_files",
		"Find files matching a glob pattern, honoring .gitignore",
		ToolSchema::new()
			.field("pattern", FieldKind::String, "Glob pattern matched against workspace-relative paths.")
			.optional("maxResults", FieldKind::Integer, "Maximum number of matches to return. Default 200."),
		wrap(search_files)
	)?;
	registry.register(
		"workspace_tree",
		"Render the workspace as an indented tree, honoring .gitignore",
		ToolSchema::new()
			.optional("maxDepth", FieldKind::Integer, "Maximum directory depth. Default 5.")
			.optional("exclude", FieldKind::String, "Comma-separated glob patterns to leave out."),
		wrap(workspace_tree)
	)?;
	Ok(())
}

async fn get_project_info(_args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let root = context.sandbox.root().to_path_buf();
	let mut kind = "unknown";
	let mut name = None;
	let mut version = None;
	let mut manifests = Vec::new();
	if root.join("Cargo.toml").is_file() {
		kind = "cargo";
		manifests.push("Cargo.toml");
		if let Ok(content) = tokio::fs::read_to_string(root.join("Cargo.toml")).await {
			let (parsed_name, parsed_version) = scan_cargo_manifest(&content);
			name = parsed_name;
			version = parsed_version;
		}
	}
	else if root.join("package.json").is_file() {
		kind = "npm";
		manifests.push("package.json");
		if let Ok(content) = tokio::fs::read_to_string(root.join("package.json")).await {
			if let Ok(parsed) = serde_json::from_str::<Value>(&content) {
				name = parsed.get("name").and_then(Value::as_str).map(|text| text.to_string());
				version = parsed.get("version").and_then(Value::as_str).map(|text| text.to_string());
			}
		}
	}
	else if root.join("pyproject.toml").is_file() {
		kind = "python";
		manifests.push("pyproject.toml");
	}
	else if root.join("go.mod").is_file() {
		kind = "go";
		manifests.push("go.mod");
	}
	let mut structured = serde_json::Map::new();
	structured.insert("root".to_string(), Value::String(root.display().to_string()));
	structured.insert("kind".to_string(), Value::String(kind.to_string()));
	structured.insert(
		"manifests".to_string(),
		Value::Array(manifests.iter().map(|entry| Value::String(entry.to_string())).collect())
	);
	if let Some(name) = &name {
		structured.insert("name".to_string(), Value::String(name.clone()));
	}
	if let Some(version) = &version {
		structured.insert("version".to_string(), Value::String(version.clone()));
	}
	let label = name.as_deref().unwrap_or("workspace");
	Ok(text_result(
		format!("Project {} ({}).", label, kind),
		Value::Object(structured)
	))
}

/// Line scan for `name`/`version` inside the `[package]` table. Enough for
/// project info; not a TOML parser.
fn scan_cargo_manifest(content: &str) -> (Option<String>, Option<String>) {
	let mut in_package = false;
	let mut name = None;
	let mut version = None;
	for line in content.lines() {
		let trimmed = line.trim();
		if trimmed.starts_with('[') {
			in_package = trimmed == "[package]";
			continue;
		}
		if !in_package {
			continue;
		}
		if let Some(value) = toml_string_value(trimmed, "name") {
			name = Some(value);
		}
		else if let Some(value) = toml_string_value(trimmed, "version") {
			version = Some(value);
		}
	}
	(name, version)
}

fn toml_string_value(line: &str, key: &str) -> Option<String> {
	let rest = line.strip_prefix(key)?.trim_start();
	let rest = rest.strip_prefix('=')?.trim();
	let rest = rest.strip_prefix('"')?;
	rest.split('"').next().map(|value| value.to_string())
}

async fn search_files(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let pattern = args
		.get("pattern")
		.and_then(Value::as_str)
		.ok_or_else(|| ServerError::invalid_field("pattern", "required field missing"))?
		.to_string();
	let limit = args
		.get("maxResults")
		.and_then(Value::as_u64)
		.map(|value| value as usize)
		.unwrap_or(DEFAULT_SEARCH_LIMIT);
	let matcher = GlobBuilder::new(&pattern)
		.literal_separator(false)
		.build()
		.map_err(|err| ServerError::invalid_field("pattern", format!("invalid glob: {}", err)))?
		.compile_matcher();
	let sandbox = context.sandbox.clone();
	let root = sandbox.root().to_path_buf();
	let cancel = context.cancel.clone();
	// The walk is blocking I/O; keep it off the protocol loop.
	let outcome = tokio::task::spawn_blocking(move || {
		let mut matches = Vec::new();
		let mut truncated = false;
		let mut builder = WalkBuilder::new(&root);
		builder.hidden(true);
		builder.git_ignore(true);
		builder.require_git(false);
		builder.sort_by_file_name(|a, b| a.cmp(b));
		for entry in builder.build() {
			if cancel.is_cancelled() {
				break;
			}
			let entry = match entry {
				Ok(entry) => entry,
				Err(_) => continue,
			};
			let path = entry.path();
			if path == root {
				continue;
			}
			if !entry.file_type().map(|kind| kind.is_file()).unwrap_or(false) {
				continue;
			}
			let rel = posix_display(&root, path);
			if sandbox.is_blocked(&rel) {
				continue;
			}
			if !matcher.is_match(&rel) {
				continue;
			}
			if matches.len() >= limit {
				truncated = true;
				break;
			}
			matches.push(rel);
		}
		(matches, truncated)
	})
	.await
	.map_err(|err| ServerError::internal_with("search walk failed", err.into()))?;
	let (matches, truncated) = outcome;
	let count = matches.len();
	Ok(text_result(
		if truncated {
			format!("Found {} file(s). Results truncated at limit {}.", count, limit)
		}
		else {
			format!("Found {} file(s).", count)
		},
		json!({
			"pattern": pattern,
			"matches": matches,
			"count": count,
			"truncated": truncated,
		})
	))
}

async fn workspace_tree(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let max_depth = args
		.get("maxDepth")
		.and_then(Value::as_u64)
		.map(|value| value as usize)
		.unwrap_or(DEFAULT_TREE_DEPTH);
	let exclude: Vec<String> = args
		.get("exclude")
		.and_then(Value::as_str)
		.map(|text| {
			text.split(',')
				.map(|part| part.trim().to_string())
				.filter(|part| !part.is_empty())
				.collect()
		})
		.unwrap_or_default();
	let mut exclude_builder = globset::GlobSetBuilder::new();
	for pattern in &exclude {
		let glob = GlobBuilder::new(pattern)
			.literal_separator(false)
			.build()
			.map_err(|err| ServerError::invalid_field("exclude", format!("invalid glob: {}", err)))?;
		exclude_builder.add(glob);
	}
	let exclude_set = exclude_builder
		.build()
		.map_err(|err| ServerError::invalid_field("exclude", format!("invalid glob set: {}", err)))?;
	let has_excludes = !exclude.is_empty();
	let sandbox = context.sandbox.clone();
	let root = sandbox.root().to_path_buf();
	let outcome = tokio::task::spawn_blocking(move || {
		let mut tree = String::new();
		let mut entries = 0usize;
		let mut builder = WalkBuilder::new(&root);
		builder.hidden(true);
		builder.git_ignore(true);
		builder.require_git(false);
		builder.max_depth(Some(max_depth));
		builder.sort_by_file_name(|a, b| a.cmp(b));
		for entry in builder.build() {
			let entry = match entry {
				Ok(entry) => entry,
				Err(_) => continue,
			};
			let path = entry.path();
			if path == root {
				continue;
			}
			let rel = posix_display(&root, path);
			if sandbox.is_blocked(&rel) {
				continue;
			}
			if has_excludes && exclude_set.is_match(&rel) {
				continue;
			}
			let depth = entry.depth();
			let name = entry.file_name().to_string_lossy();
			let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
			tree.push_str(&"  ".repeat(depth.saturating_sub(1)));
			tree.push_str(&name);
			if is_dir {
				tree.push('/');
			}
			tree.push('\n');
			entries += 1;
		}
		(tree, entries)
	})
	.await
	.map_err(|err| ServerError::internal_with("tree walk failed", err.into()))?;
	let (tree, entries) = outcome;
	Ok(text_result(
		format!("Workspace tree with {} entr{} (max depth {}).", entries, if entries == 1 { "y" } else { "ies" }, max_depth),
		json!({
			"tree": tree,
			"entries": entries,
			"maxDepth": max_depth,
		})
	))
}

fn posix_display(root: &Path, path: &Path) -> String {
	let rel = path.strip_prefix(root).unwrap_or(path);
	rel.components()
		.map(|part| part.as_os_str().to_string_lossy().to_string())
		.collect::<Vec<_>>()
		.join("/")
}

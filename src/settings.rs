//! IDE settings: the `mcpServers` map and `${VAR}` expansion for its `env`
//! blocks. Strict mode fails on a missing variable; lenient mode substitutes
//! the empty string and logs a warning.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

use crate::error::ServerError;

static VAR_REF: Lazy<Regex> = Lazy::new(|| {
	Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("var regex")
});

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeSettings {
	#[serde(default)]
	pub mcp_servers: HashMap<String, McpServerEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerEntry {
	pub command: String,
	#[serde(default)]
	pub args: Vec<String>,
	#[serde(default)]
	pub env: HashMap<String, String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub disabled: Option<bool>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cwd: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExpandMode {
	Strict,
	Lenient,
}

pub fn load(path: &Path) -> Result<IdeSettings, ServerError> {
	let content = std::fs::read_to_string(path)
		.map_err(|err| ServerError::from_io(err, &path.display().to_string()))?;
	serde_json::from_str(&content)
		.map_err(|err| ServerError::internal(format!("settings {} do not parse: {}", path.display(), err)))
}

/// Expand `${VAR}` references in an entry's env block against the process
/// environment.
pub fn resolve_env(
	entry: &McpServerEntry,
	mode: ExpandMode) -> Result<HashMap<String, String>, ServerError> {
	resolve_env_with(entry, mode, &|key| std::env::var(key).ok())
}

fn resolve_env_with(
	entry: &McpServerEntry,
	mode: ExpandMode,
	lookup: &dyn Fn(&str) -> Option<String>) -> Result<HashMap<String, String>, ServerError> {
	let mut resolved = HashMap::new();
	for (key, template) in &entry.env {
		resolved.insert(key.clone(), expand(template, mode, lookup)?);
	}
	Ok(resolved)
}

fn expand(
	template: &str,
	mode: ExpandMode,
	lookup: &dyn Fn(&str) -> Option<String>) -> Result<String, ServerError> {
	let mut out = String::new();
	let mut last = 0usize;
	for capture in VAR_REF.captures_iter(template) {
		let whole = capture.get(0).expect("match");
		let name = capture.get(1).expect("group").as_str();
		out.push_str(&template[last..whole.start()]);
		match lookup(name) {
			Some(value) => out.push_str(&value),
			None => {
				if mode == ExpandMode::Strict {
					return Err(ServerError::internal(format!(
						"environment variable {} is not set",
						name
					)));
				}
				warn!("environment variable {} is not set; substituting empty string", name);
			}
		}
		last = whole.end();
	}
	out.push_str(&template[last..]);
	Ok(out)
}

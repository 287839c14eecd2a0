//! Path authorization against the workspace root.
//!
//! Every path a tool touches goes through [`PathSandbox::validate`]. The root
//! is resolved through the OS physical-path operation once at construction;
//! candidates are normalized, re-resolved physically (so a symlink inside the
//! root cannot point out of it) and compared against that root. Relative
//! inputs that escape classify as `PathTraversal`, absolute inputs outside the
//! root as `OutsideRoot`, and denylist hits as `BlockedPattern`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Component, Path, PathBuf};

use crate::error::ServerError;

pub struct PathSandbox {
	root: PathBuf,
	blocked: Option<GlobSet>,
	enforce_root: bool,
}

impl PathSandbox {
	pub fn new(root: &Path, blocked_patterns: &[String], enforce_root: bool) -> Result<Self, ServerError> {
		let absolute = if root.is_absolute() {
			root.to_path_buf()
		}
		else {
			std::env::current_dir()
				.map_err(|err| ServerError::internal_with("cannot resolve current dir", err.into()))?
				.join(root)
		};
		let normalized = normalize_path(&absolute);
		let resolved = normalized.canonicalize().unwrap_or(normalized);
		Ok(Self {
			root: resolved,
			blocked: build_blocked_set(blocked_patterns)?,
			enforce_root,
		})
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Denylist check on an already root-relative, forward-slash path.
	pub fn is_blocked(&self, rel: &str) -> bool {
		self.blocked
			.as_ref()
			.map(|set| set.is_match(rel))
			.unwrap_or(false)
	}

	pub fn validate(&self, input: &str) -> Result<PathBuf, ServerError> {
		let cleaned = to_native_separators(input);
		let raw = Path::new(&cleaned);
		let was_relative = raw.is_relative();
		let candidate = if was_relative {
			self.root.join(raw)
		}
		else {
			raw.to_path_buf()
		};
		let normalized = normalize_path(&candidate);
		let resolved = resolve_physical(&normalized);
		if !resolved.starts_with(&self.root) {
			if !self.enforce_root && !was_relative {
				return Ok(resolved);
			}
			if was_relative {
				return Err(ServerError::PathTraversal {
					attempted: input.to_string()
				});
			}
			return Err(ServerError::OutsideRoot {
				attempted: input.to_string()
			});
		}
		if let Some(blocked) = &self.blocked {
			let rel = posix_relative(&self.root, &resolved);
			if !rel.is_empty() && blocked.is_match(&rel) {
				return Err(ServerError::BlockedPattern {
					attempted: input.to_string()
				});
			}
		}
		Ok(resolved)
	}
}

fn build_blocked_set(patterns: &[String]) -> Result<Option<GlobSet>, ServerError> {
	if patterns.is_empty() {
		return Ok(None);
	}
	let mut builder = GlobSetBuilder::new();
	for pattern in patterns {
		let glob = GlobBuilder::new(pattern)
			.literal_separator(true)
			.build()
			.map_err(|err| ServerError::internal(format!("invalid blocked pattern {}: {}", pattern, err)))?;
		builder.add(glob);
	}
	let set = builder
		.build()
		.map_err(|err| ServerError::internal(format!("invalid blocked pattern set: {}", err)))?;
	Ok(Some(set))
}

fn to_native_separators(input: &str) -> String {
	if std::path::MAIN_SEPARATOR == '/' {
		input.replace('\\', "/")
	}
	else {
		input.replace('/', "\\")
	}
}

/// Physical resolution for targets that may not exist yet: canonicalize the
/// deepest existing ancestor and rejoin the remaining components.
fn resolve_physical(normalized: &Path) -> PathBuf {
	if let Ok(resolved) = normalized.canonicalize() {
		return resolved;
	}
	let mut ancestor = normalized.to_path_buf();
	let mut suffix: Vec<std::ffi::OsString> = Vec::new();
	loop {
		if let Ok(resolved) = ancestor.canonicalize() {
			let mut out = resolved;
			for part in suffix.iter().rev() {
				out.push(part);
			}
			return out;
		}
		match (ancestor.file_name(), ancestor.parent()) {
			(Some(name), Some(parent)) => {
				suffix.push(name.to_os_string());
				ancestor = parent.to_path_buf();
			}
			_ => return normalized.to_path_buf(),
		}
	}
}

fn posix_relative(root: &Path, path: &Path) -> String {
	let rel = match path.strip_prefix(root) {
		Ok(rel) => rel,
		Err(_) => path,
	};
	rel.components()
		.map(|part| part.as_os_str().to_string_lossy().to_string())
		.collect::<Vec<_>>()
		.join("/")
}

pub fn normalize_path(path: &Path) -> PathBuf {
	let mut stack: Vec<std::ffi::OsString> = Vec::new();
	let mut prefix: Option<std::ffi::OsString> = None;
	let mut absolute = false;
	for component in path.components() {
		match component {
			Component::Prefix(prefix_component) => {
				prefix = Some(prefix_component.as_os_str().to_os_string());
			}
			Component::RootDir => {
				absolute = true;
				stack.clear();
			}
			Component::CurDir => {}
			Component::ParentDir => {
				if !stack.is_empty() {
					stack.pop();
				}
				else if !absolute {
					stack.push(std::ffi::OsString::from(".."));
				}
			}
			Component::Normal(part) => stack.push(part.to_os_string()),
		}
	}
	let mut out = PathBuf::new();
	if let Some(prefix) = prefix {
		out.push(prefix);
	}
	if absolute {
		out.push(Path::new("/"));
	}
	for part in stack {
		out.push(part);
	}
	out
}

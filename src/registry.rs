//! Tool registry: name → (schema, handler, enabled).
//!
//! One schema declaration drives both runtime argument validation and the
//! JSON Schema fragment emitted by `tools/list`. Lookup is by name; listing
//! follows insertion order so test output stays deterministic.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::ServerError;
use crate::tools::ToolContext;

#[derive(Clone, Debug)]
pub enum FieldKind {
	String,
	Integer,
	Number,
	Boolean,
	StringEnum(Vec<&'static str>),
}

impl FieldKind {
	fn type_name(&self) -> &'static str {
		match self {
			FieldKind::String | FieldKind::StringEnum(_) => "string",
			FieldKind::Integer => "integer",
			FieldKind::Number => "number",
			FieldKind::Boolean => "boolean",
		}
	}

	fn accepts(&self, value: &Value) -> bool {
		match self {
			FieldKind::String => value.is_string(),
			FieldKind::Integer => value.is_i64() || value.is_u64(),
			FieldKind::Number => value.is_number(),
			FieldKind::Boolean => value.is_boolean(),
			FieldKind::StringEnum(options) => value
				.as_str()
				.map(|text| options.iter().any(|option| *option == text))
				.unwrap_or(false),
		}
	}
}

#[derive(Clone, Debug)]
pub struct FieldSpec {
	name: &'static str,
	kind: FieldKind,
	description: &'static str,
	required: bool,
}

#[derive(Clone, Debug, Default)]
pub struct ToolSchema {
	fields: Vec<FieldSpec>,
}

impl ToolSchema {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn field(mut self, name: &'static str, kind: FieldKind, description: &'static str) -> Self {
		self.fields.push(FieldSpec {
			name,
			kind,
			description,
			required: true,
		});
		self
	}

	pub fn optional(mut self, name: &'static str, kind: FieldKind, description: &'static str) -> Self {
		self.fields.push(FieldSpec {
			name,
			kind,
			description,
			required: false,
		});
		self
	}

	pub fn validate(&self, args: &Value) -> Result<(), ServerError> {
		let map = match args {
			Value::Object(map) => map,
			Value::Null => {
				if let Some(missing) = self.fields.iter().find(|field| field.required) {
					return Err(ServerError::invalid_field(missing.name, "required field missing"));
				}
				return Ok(());
			}
			other => {
				return Err(ServerError::invalid_arguments(format!(
					"arguments must be an object, got {}",
					json_type(other)
				)));
			}
		};
		for field in &self.fields {
			match map.get(field.name) {
				None | Some(Value::Null) => {
					if field.required {
						return Err(ServerError::invalid_field(field.name, "required field missing"));
					}
				}
				Some(value) => {
					if !field.kind.accepts(value) {
						return Err(ServerError::invalid_field(
							field.name,
							format!(
								"expected {}, got {}",
								field.kind.type_name(),
								json_type(value)
							)
						));
					}
				}
			}
		}
		Ok(())
	}

	pub fn to_json_schema(&self) -> Value {
		let mut properties = serde_json::Map::new();
		let mut required = Vec::new();
		for field in &self.fields {
			let mut spec = serde_json::Map::new();
			spec.insert("type".to_string(), Value::String(field.kind.type_name().to_string()));
			if !field.description.is_empty() {
				spec.insert("description".to_string(), Value::String(field.description.to_string()));
			}
			if let FieldKind::StringEnum(options) = &field.kind {
				spec.insert(
					"enum".to_string(),
					Value::Array(options.iter().map(|option| Value::String(option.to_string())).collect())
				);
			}
			properties.insert(field.name.to_string(), Value::Object(spec));
			if field.required {
				required.push(Value::String(field.name.to_string()));
			}
		}
		let mut schema = serde_json::Map::new();
		schema.insert("type".to_string(), Value::String("object".to_string()));
		schema.insert("properties".to_string(), Value::Object(properties));
		if !required.is_empty() {
			schema.insert("required".to_string(), Value::Array(required));
		}
		Value::Object(schema)
	}
}

fn json_type(value: &Value) -> &'static str {
	match value {
		Value::Null => "null",
		Value::Bool(_) => "boolean",
		Value::Number(_) => "number",
		Value::String(_) => "string",
		Value::Array(_) => "array",
		Value::Object(_) => "object",
	}
}

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, ServerError>> + Send>>;
pub type ToolHandler = Arc<dyn Fn(Value, ToolContext) -> HandlerFuture + Send + Sync>;

pub struct ToolEntry {
	pub description: String,
	pub schema: ToolSchema,
	pub handler: ToolHandler,
	pub enabled: bool,
}

#[derive(Default)]
pub struct ToolRegistry {
	entries: HashMap<String, ToolEntry>,
	order: Vec<String>,
}

impl ToolRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(
		&mut self,
		name: &str,
		description: &str,
		schema: ToolSchema,
		handler: ToolHandler) -> Result<(), ServerError> {
		if name.trim().is_empty() {
			return Err(ServerError::internal("tool name must not be empty"));
		}
		if self.entries.contains_key(name) {
			return Err(ServerError::internal(format!("tool already registered: {}", name)));
		}
		self.entries.insert(
			name.to_string(),
			ToolEntry {
				description: description.to_string(),
				schema,
				handler,
				enabled: true,
			}
		);
		self.order.push(name.to_string());
		Ok(())
	}

	pub fn unregister(&mut self, name: &str) -> Result<(), ServerError> {
		if self.entries.remove(name).is_none() {
			return Err(ServerError::ToolNotFound {
				name: name.to_string()
			});
		}
		self.order.retain(|entry| entry != name);
		Ok(())
	}

	pub fn enable(&mut self, name: &str) -> Result<(), ServerError> {
		self.set_enabled(name, true)
	}

	pub fn disable(&mut self, name: &str) -> Result<(), ServerError> {
		self.set_enabled(name, false)
	}

	fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ServerError> {
		match self.entries.get_mut(name) {
			Some(entry) => {
				entry.enabled = enabled;
				Ok(())
			}
			None => Err(ServerError::ToolNotFound {
				name: name.to_string()
			}),
		}
	}

	pub fn get(&self, name: &str) -> Option<&ToolEntry> {
		self.entries.get(name)
	}

	/// Enable exactly the tools the allowlist names; `*` enables everything.
	pub fn apply_allowlist(&mut self, allowed: &[String]) {
		let wildcard = allowed.iter().any(|entry| entry == "*");
		for (name, entry) in self.entries.iter_mut() {
			entry.enabled = wildcard || allowed.iter().any(|allowed_name| allowed_name == name);
		}
	}

	/// Enabled tools in registration order, shaped for `tools/list`.
	pub fn list(&self) -> Vec<Value> {
		self.order
			.iter()
			.filter_map(|name| {
				let entry = self.entries.get(name)?;
				if !entry.enabled {
					return None;
				}
				Some(json!({
					"name": name,
					"description": entry.description,
					"inputSchema": entry.schema.to_json_schema(),
				}))
			})
			.collect()
	}
}

//! Model telemetry: current model descriptor, in-memory usage recording and
//! aggregated statistics. Nothing here is persisted; the stats live and die
//! with the process.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::ServerError;
use crate::registry::{FieldKind, ToolRegistry, ToolSchema};
use crate::tools::{text_result, wrap, ToolContext};

#[derive(Clone, Debug)]
pub struct ModelDescriptor {
	pub id: &'static str,
	pub provider: &'static str,
	pub input_cost_per_1k: f64,
	pub output_cost_per_1k: f64,
}

static MODEL_CATALOG: Lazy<Vec<ModelDescriptor>> = Lazy::new(|| {
	vec![
	ModelDescriptor {
		id: "gpt-4o",
		provider: "openai",
		input_cost_per_1k: 0.0025,
		output_cost_per_1k: 0.01,
	},
	ModelDescriptor {
		id: "gpt-4o-mini",
		provider: "openai",
		input_cost_per_1k: 0.00015,
		output_cost_per_1k: 0.0006,
	},
	ModelDescriptor {
		id: "claude-3.5-sonnet",
		provider: "anthropic",
		input_cost_per_1k: 0.003,
		output_cost_per_1k: 0.015,
	},
	ModelDescriptor {
		id: "claude-3.5-haiku",
		provider: "anthropic",
		input_cost_per_1k: 0.0008,
		output_cost_per_1k: 0.004,
	},
	]
});

pub fn lookup_model(id: &str) -> Option<&'static ModelDescriptor> {
	MODEL_CATALOG.iter().find(|model| model.id == id)
}

#[derive(Clone, Debug)]
struct UsageRecord {
	model: String,
	input_tokens: u64,
	output_tokens: u64,
	duration_ms: u64,
	at: DateTime<Utc>,
}

#[derive(Default)]
pub struct ModelTracker {
	current: Mutex<Option<String>>,
	records: Mutex<Vec<UsageRecord>>,
}

impl ModelTracker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn current_model(&self) -> ModelDescriptor {
		let current = self.current.lock().expect("model lock");
		current
			.as_deref()
			.and_then(lookup_model)
			.cloned()
			.unwrap_or_else(|| MODEL_CATALOG[0].clone())
	}

	pub fn set_current(&self, id: &str) {
		*self.current.lock().expect("model lock") = Some(id.to_string());
	}

	pub fn record(&self, model: &str, input_tokens: u64, output_tokens: u64, duration_ms: u64) {
		self.records.lock().expect("records lock").push(UsageRecord {
			model: model.to_string(),
			input_tokens,
			output_tokens,
			duration_ms,
			at: Utc::now(),
		});
	}

	/// Aggregate view: session count, token totals, cost estimated from each
	/// recorded model's own rates, average durations overall and per model.
	pub fn stats(&self) -> Value {
		let records = self.records.lock().expect("records lock");
		let session_count = records.len();
		let mut input_total = 0u64;
		let mut output_total = 0u64;
		let mut duration_total = 0u64;
		let mut cost_total = 0f64;
		let mut per_model: BTreeMap<String, (u64, u64, u64, u64, f64)> = BTreeMap::new();
		for record in records.iter() {
			input_total += record.input_tokens;
			output_total += record.output_tokens;
			duration_total += record.duration_ms;
			let cost = estimate_cost(&record.model, record.input_tokens, record.output_tokens);
			cost_total += cost;
			let entry = per_model.entry(record.model.clone()).or_insert((0, 0, 0, 0, 0.0));
			entry.0 += 1;
			entry.1 += record.input_tokens;
			entry.2 += record.output_tokens;
			entry.3 += record.duration_ms;
			entry.4 += cost;
		}
		let average_duration = if session_count == 0 {
			0.0
		}
		else {
			duration_total as f64 / session_count as f64
		};
		let models: Vec<Value> = per_model
			.into_iter()
			.map(|(model, (count, input, output, duration, cost))| {
				json!({
					"model": model,
					"count": count,
					"inputTokens": input,
					"outputTokens": output,
					"estimatedCost": round_cost(cost),
					"averageDurationMs": duration as f64 / count as f64,
				})
			})
			.collect();
		let last_recorded = records.last().map(|record| record.at.to_rfc3339());
		json!({
			"sessionCount": session_count,
			"inputTokens": input_total,
			"outputTokens": output_total,
			"totalTokens": input_total + output_total,
			"estimatedCost": round_cost(cost_total),
			"averageDurationMs": average_duration,
			"models": models,
			"lastRecordedAt": last_recorded,
		})
	}
}

fn estimate_cost(model: &str, input_tokens: u64, output_tokens: u64) -> f64 {
	match lookup_model(model) {
		Some(descriptor) => {
			input_tokens as f64 / 1000.0 * descriptor.input_cost_per_1k
				+ output_tokens as f64 / 1000.0 * descriptor.output_cost_per_1k
		}
		None => 0.0,
	}
}

fn round_cost(cost: f64) -> f64 {
	(cost * 1_000_000.0).round() / 1_000_000.0
}

pub fn register(registry: &mut ToolRegistry) -> Result<(), ServerError> {
	registry.register(
		"get_current_model",
		"Describe the model currently selected for this session",
		ToolSchema::new(),
		wrap(get_current_model)
	)?;
	registry.register(
		"record_model_usage",
		"Record one model invocation: tokens in and out, wall-clock duration",
		ToolSchema::new()
			.field("model", FieldKind::String, "Model identifier, e.g. gpt-4o.")
			.field("inputTokens", FieldKind::Integer, "Prompt tokens consumed.")
			.field("outputTokens", FieldKind::Integer, "Completion tokens produced.")
			.field("durationMs", FieldKind::Integer, "Wall-clock duration in milliseconds."),
		wrap(record_model_usage)
	)?;
	registry.register(
		"get_usage_stats",
		"Aggregate recorded usage: sessions, tokens, estimated cost, durations",
		ToolSchema::new(),
		wrap(get_usage_stats)
	)?;
	Ok(())
}

async fn get_current_model(_args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let model = context.model.current_model();
	Ok(text_result(
		format!("Current model is {}.", model.id),
		json!({
			"id": model.id,
			"provider": model.provider,
			"inputCostPer1k": model.input_cost_per_1k,
			"outputCostPer1k": model.output_cost_per_1k,
		})
	))
}

async fn record_model_usage(args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let model = args
		.get("model")
		.and_then(Value::as_str)
		.ok_or_else(|| ServerError::invalid_field("model", "required field missing"))?;
	let input_tokens = args.get("inputTokens").and_then(Value::as_u64).unwrap_or(0);
	let output_tokens = args.get("outputTokens").and_then(Value::as_u64).unwrap_or(0);
	let duration_ms = args.get("durationMs").and_then(Value::as_u64).unwrap_or(0);
	context.model.set_current(model);
	context.model.record(model, input_tokens, output_tokens, duration_ms);
	Ok(text_result(
		format!(
			"Recorded {} tokens in, {} out for {}.",
			input_tokens, output_tokens, model
		),
		json!({
			"model": model,
			"inputTokens": input_tokens,
			"outputTokens": output_tokens,
			"durationMs": duration_ms,
		})
	))
}

async fn get_usage_stats(_args: Value, context: ToolContext) -> Result<Value, ServerError> {
	let stats = context.model.stats();
	let sessions = stats.get("sessionCount").and_then(Value::as_u64).unwrap_or(0);
	Ok(text_result(
		format!("{} recorded session(s).", sessions),
		stats
	))
}

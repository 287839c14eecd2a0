use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServerError;

#[derive(Debug, Deserialize)]
pub struct Request {
	#[serde(default)]
	pub jsonrpc: String,
	// An explicit `"id": null` is still a request; only a missing id makes a
	// notification, so null must survive deserialization.
	#[serde(default, deserialize_with = "some_value")]
	pub id: Option<Value>,
	pub method: String,
	#[serde(default)]
	pub params: Value,
}

fn some_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
	D: serde::Deserializer<'de>, {
	Value::deserialize(deserializer).map(Some)
}

impl Request {
	pub fn is_notification(&self) -> bool {
		self.id.is_none()
	}
}

#[derive(Debug, Serialize)]
pub struct Response {
	pub jsonrpc: &'static str,
	pub id: Value,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorObject>,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
	pub code: i64,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

impl Response {
	pub fn ok(id: Value, result: Value) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(id: Value, err: &ServerError) -> Self {
		Self {
			jsonrpc: "2.0",
			id,
			result: None,
			error: Some(ErrorObject {
				code: err.rpc_code(),
				message: err.to_string(),
				data: Some(err.data()),
			}),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn response_echoes_the_request_id_including_null() {
		let resp = Response::ok(Value::Null, json!({}));
		let encoded = serde_json::to_value(&resp).expect("serialize");
		assert_eq!(encoded.get("id"), Some(&Value::Null));
		assert_eq!(encoded.get("jsonrpc").and_then(Value::as_str), Some("2.0"));
	}

	#[test]
	fn error_response_carries_code_and_data() {
		let err = ServerError::NotInitialized;
		let resp = Response::err(json!(4), &err);
		let encoded = serde_json::to_value(&resp).expect("serialize");
		assert_eq!(
			encoded.pointer("/error/code").and_then(Value::as_i64),
			Some(-32600)
		);
		assert_eq!(
			encoded.pointer("/error/data/errorCode").and_then(Value::as_str),
			Some("NOT_INITIALIZED")
		);
		assert!(encoded.get("result").is_none());
	}

	#[test]
	fn request_without_id_is_a_notification() {
		let req: Request = serde_json::from_value(json!({
			"jsonrpc": "2.0",
			"method": "notifications/initialized"
		})).expect("parse");
		assert!(req.is_notification());
	}

	#[test]
	fn explicit_null_id_is_still_a_request() {
		let req: Request = serde_json::from_value(json!({
			"jsonrpc": "2.0",
			"id": null,
			"method": "tools/list"
		})).expect("parse");
		assert!(!req.is_notification());
		assert_eq!(req.id, Some(Value::Null));
	}
}

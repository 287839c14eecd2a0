//! Tool executor: admission, validation, deadline racing, cancellation.
//!
//! Admission is reject-when-full: a call that finds no permit immediately
//! available fails with `ConcurrencyLimitExceeded` instead of queueing, so the
//! protocol loop keeps draining stdin under overload. The permit is released
//! at the timeout point even though the handler task may still be running;
//! its late result is dropped with the join handle.

use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ServerError;
use crate::registry::ToolRegistry;
use crate::tools::ToolContext;

pub struct ExecutionTicket {
	pub tool: String,
	pub deadline: Instant,
	pub cancel: CancellationToken,
	_permit: OwnedSemaphorePermit,
}

pub struct ToolExecutor {
	registry: Arc<RwLock<ToolRegistry>>,
	semaphore: RwLock<Arc<Semaphore>>,
	limit: AtomicUsize,
}

impl ToolExecutor {
	pub fn new(registry: Arc<RwLock<ToolRegistry>>, limit: usize) -> Self {
		Self {
			registry,
			semaphore: RwLock::new(Arc::new(Semaphore::new(limit))),
			limit: AtomicUsize::new(limit),
		}
	}

	/// Swap in a fresh semaphore; in-flight permits drain on the old one.
	pub fn update_limit(&self, limit: usize) {
		if self.limit.swap(limit, Ordering::AcqRel) == limit {
			return;
		}
		*self.semaphore.write().expect("semaphore lock") = Arc::new(Semaphore::new(limit));
		debug!("concurrency limit now {}", limit);
	}

	pub async fn execute(
		&self,
		name: &str,
		args: Value,
		context: ToolContext) -> Result<Value, ServerError> {
		let (schema, handler) = {
			let registry = self.registry.read().expect("registry lock");
			let entry = registry.get(name).ok_or_else(|| ServerError::ToolNotFound {
				name: name.to_string()
			})?;
			if !entry.enabled {
				return Err(ServerError::ToolDisabled {
					name: name.to_string()
				});
			}
			(entry.schema.clone(), entry.handler.clone())
		};
		let semaphore = self.semaphore.read().expect("semaphore lock").clone();
		let permit = semaphore.try_acquire_owned().map_err(|_| {
			ServerError::ConcurrencyLimitExceeded {
				limit: self.limit.load(Ordering::Acquire)
			}
		})?;
		schema.validate(&args)?;
		let timeout_ms = context.config.server.request_timeout_ms;
		let ticket = ExecutionTicket {
			tool: name.to_string(),
			deadline: Instant::now() + Duration::from_millis(timeout_ms),
			cancel: context.cancel.clone(),
			_permit: permit,
		};
		let mut task = tokio::spawn((handler)(args, context));
		match tokio::time::timeout_at(ticket.deadline, &mut task).await {
			Ok(Ok(result)) => result,
			Ok(Err(join_err)) => Err(ServerError::internal_with(
				format!("tool {} panicked", ticket.tool),
				join_err.into()
			)),
			Err(_) => {
				warn!("tool {} timed out after {}ms", ticket.tool, timeout_ms);
				ticket.cancel.cancel();
				// The task keeps running if it ignores the token; dropping the
				// handle drops its eventual result.
				Err(ServerError::Timeout {
					timeout_ms
				})
			}
		}
	}
}

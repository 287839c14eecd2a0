//! Newline-delimited JSON frames over a byte stream.
//!
//! One JSON value per line, UTF-8, `\n` terminated. Blank lines are skipped;
//! a line that does not parse yields an [`TransportEvent::InvalidFrame`] event
//! and the stream keeps going. EOF yields a single `None`.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter, Lines, Stdin, Stdout};

use crate::error::ServerError;
use crate::protocol::Response;

#[derive(Debug)]
pub enum TransportEvent {
	Frame(Value),
	InvalidFrame(String),
}

pub struct StdioTransport<R, W> {
	lines: Lines<R>,
	writer: W,
	started: bool,
	closed: bool,
}

impl StdioTransport<BufReader<Stdin>, BufWriter<Stdout>> {
	pub fn stdio() -> Self {
		Self::new(BufReader::new(tokio::io::stdin()), BufWriter::new(tokio::io::stdout()))
	}
}

impl<R, W> StdioTransport<R, W>
where
	R: AsyncBufRead + Unpin,
	W: AsyncWrite + Unpin, {
	pub fn new(reader: R, writer: W) -> Self {
		Self {
			lines: reader.lines(),
			writer,
			started: false,
			closed: false,
		}
	}

	pub fn start(&mut self) -> Result<(), ServerError> {
		if self.closed {
			return Err(ServerError::NotConnected);
		}
		self.started = true;
		Ok(())
	}

	/// Next inbound event, or `None` once the stream has ended.
	pub async fn next_event(&mut self) -> Option<TransportEvent> {
		if self.closed {
			return None;
		}
		loop {
			match self.lines.next_line().await {
				Ok(Some(line)) => {
					let trimmed = line.trim();
					if trimmed.is_empty() {
						continue;
					}
					match serde_json::from_str::<Value>(trimmed) {
						Ok(value) => return Some(TransportEvent::Frame(value)),
						Err(err) => {
							return Some(TransportEvent::InvalidFrame(err.to_string()));
						}
					}
				}
				Ok(None) => {
					self.closed = true;
					return None;
				}
				Err(err) => {
					return Some(TransportEvent::InvalidFrame(format!("read error: {}", err)));
				}
			}
		}
	}

	/// Write one frame: the serialized message followed by a single newline.
	pub async fn send(&mut self, response: &Response) -> Result<(), ServerError> {
		if !self.started || self.closed {
			return Err(ServerError::NotConnected);
		}
		let payload = serde_json::to_string(response)
			.map_err(|err| ServerError::internal_with("cannot serialize response", err.into()))?;
		self.writer
			.write_all(payload.as_bytes())
			.await
			.map_err(|err| ServerError::internal_with("stdout write failed", err.into()))?;
		self.writer
			.write_all(b"\n")
			.await
			.map_err(|err| ServerError::internal_with("stdout write failed", err.into()))?;
		self.writer
			.flush()
			.await
			.map_err(|err| ServerError::internal_with("stdout flush failed", err.into()))?;
		Ok(())
	}

	pub fn close(&mut self) {
		self.closed = true;
	}
}

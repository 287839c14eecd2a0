//! Workspace MCP server: file, project, editor and model tools over stdio.
//!
//! The binary speaks JSON-RPC 2.0 framed one value per line on stdin/stdout.
//! Every tool call is validated against its schema, admitted under a
//! concurrency limit, raced against a per-call deadline, and sandboxed to the
//! workspace root.

pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod sandbox;
pub mod server;
pub mod settings;
pub mod tools;
pub mod transport;

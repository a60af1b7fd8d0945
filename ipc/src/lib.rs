//! IPC layer for the devguard daemon
//!
//! A JSON-RPC 2.0 server over a newline-framed local TCP byte stream. The
//! engine core is transport-agnostic; this crate decodes requests, resolves
//! tool-name aliases, and hands validated tool calls to a [`ToolPlane`]
//! implementation.

pub mod error;
pub mod server;

pub use error::{IpcError, Result};
pub use server::{IpcServer, IpcServerConfig, ToolPlane};

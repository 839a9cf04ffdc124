//! Tool-server client.
//!
//! Connects to one server using the rmcp SDK, over a child process's stdio
//! or streamable HTTP. The older HTTP+SSE pairing, which the SDK dropped,
//! is provided here and handed to the SDK as a message sink and stream.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mcp::{Client, ServerTarget, StdioConfig};
//!
//! # async fn example() -> mcp::Result<()> {
//! let target = ServerTarget::Stdio(StdioConfig {
//!     command: "mcp-filesystem".to_string(),
//!     args: vec!["--root".to_string(), "./workspace".to_string()],
//!     ..StdioConfig::default()
//! });
//! let client = Client::connect(&target, Duration::from_secs(30)).await?;
//! for tool in client.list_tools().await? {
//!     println!("{}", tool.name);
//! }
//! client.shutdown(Duration::from_secs(2)).await;
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod event_stream;
mod protocol;
mod sse;

#[cfg(test)]
mod testing;

pub use client::{Client, DEFAULT_TIMEOUT, Disconnect, ServerTarget, StdioConfig};
pub use error::{Error, Result};
pub use event_stream::{EventDecoder, SseEvent};
pub use protocol::{CallToolResult, Implementation, InitializeResult, Tool};

//! Wire types shared by the relay, its workers, and its clients.
//!
//! Two independent conversations use these types:
//!
//! - **Client ↔ relay**: newline-delimited JSON frames over TCP. A client sends
//!   a [`ClientRequest`] and receives a [`Response`]. Commands are decoded into
//!   the typed [`Command`] enum.
//! - **Relay ↔ worker**: newline-delimited JSON over the worker's stdio. The
//!   relay sends [`WorkerCommand`]s and receives [`WorkerEvent`]s.
//!
//! # Example
//!
//! ```
//! use protocol::{ClientRequest, Command};
//!
//! let request = ClientRequest::parse(r#"{"id":1,"command":"list"}"#).unwrap();
//! let command = Command::parse(&request.command, request.params).unwrap();
//! assert!(matches!(command, Command::List { name: None }));
//! ```

mod command;
mod definition;
mod error;
mod ipc;
mod wire;

pub use command::{Command, CommandError, SpawnParams, ToolCallRequest};
pub use definition::{
    ConnectionType, DefinitionError, ServiceDefinition, ServiceTarget, validate_name,
};
pub use error::{ErrorBody, ErrorCode};
pub use ipc::{
    ClosedParams, ErrorParams, InitParams, ReadyParams, ToolInvocation, ToolOutcome,
    WorkerCommand, WorkerEvent,
};
pub use wire::{
    ClientRequest, FrameError, MAX_FRAME_SIZE, RequestId, Response, ToolDescriptor, encode_line,
};

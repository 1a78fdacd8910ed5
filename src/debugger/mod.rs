//! Remote debugger: mirrors bus events to connected clients and accepts
//! run/abort/pause/resume commands from them.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, ServerFrame};
pub use server::{ClientId, DebuggerError, DebuggerOptions, DebuggerServer, RouteFn, DEFAULT_PORT};

//! chainwatch-codec — bidirectional JSON-RPC-2.0-like framing codec
//! with Blockbook dialect support.

pub mod codec;
pub mod method;
pub mod wire;

pub use codec::{CallError, MessageSink, RpcCodec, SendError};
pub use method::{FnMethod, LocalMethod, MethodRegistry, MethodResult};
pub use wire::{codes, Dialect, JsonRpcError};

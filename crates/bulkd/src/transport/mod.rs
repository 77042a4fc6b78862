//! Socket transport feeding client byte streams into sessions.
//!
//! The listener binds the configured endpoint and accepts connections in a
//! background thread, handing each one to a [`ConnectionHandler`] on its own
//! thread.

mod errors;
mod handler;
mod listener;

pub use self::errors::ListenerError;
pub use self::handler::{ConnectionHandler, ConnectionStream, IngestHandler};
pub use self::listener::{ListenerHandle, SocketListener};

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

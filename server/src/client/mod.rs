//! Reconnecting chat client for one transaction view.
//!
//! `session` holds the pure state machine (status, local message list,
//! frame handling); `runner` drives it over a real socket.

pub mod runner;
pub mod session;

use thiserror::Error;

pub use runner::{ChatClient, ClientConfig};
pub use session::{ChatSession, ConnectionStatus, SessionEvent, ViewMessage};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The socket is not open. Transient: the driver keeps reconnecting.
    #[error("not connected to the chat server, try again shortly")]
    NotConnected,

    #[error("message content must not be empty")]
    EmptyMessage,

    /// The driver has been closed and accepts no more commands.
    #[error("chat session is closed")]
    Closed,

    #[error("invalid chat endpoint: {0}")]
    InvalidEndpoint(String),
}

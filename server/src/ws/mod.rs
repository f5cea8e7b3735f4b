pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use tokio::sync::mpsc;

pub use broadcast::{PushGateway, PushSink};

/// Type alias for the sender half of a WebSocket connection's channel.
/// The push gateway holds one per live socket; the socket's writer task
/// drains it.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;

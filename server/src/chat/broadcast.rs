//! Fan-out of outbound frames to the live connections of a transaction.

use crate::db::models::ConnectionRecord;
use crate::error::DeliveryError;
use crate::ws::protocol::{ChatMessage, OutboundFrame};
use crate::ws::PushSink;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FanoutReport {
    /// Connections the frame was handed to.
    pub delivered: usize,
    /// Connections whose socket was gone. Callers remove them from the registry.
    pub gone: Vec<String>,
    /// Deliveries that failed for other reasons.
    pub failed: usize,
}

/// Push `frame` to every recipient. Each push is independent: a failure for
/// one recipient never stops delivery to the rest.
pub fn fan_out(
    push: &dyn PushSink,
    recipients: &[ConnectionRecord],
    frame: &OutboundFrame,
) -> FanoutReport {
    let mut report = FanoutReport::default();

    for recipient in recipients {
        match push.push(&recipient.connection_id, frame) {
            Ok(()) => report.delivered += 1,
            Err(DeliveryError::Gone(connection_id)) => {
                tracing::debug!(
                    connection_id = %connection_id,
                    transaction_id = %recipient.transaction_id,
                    "Recipient gone during fan-out"
                );
                report.gone.push(connection_id);
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %recipient.connection_id,
                    error = %e,
                    "Failed to push {} frame",
                    frame.action()
                );
                report.failed += 1;
            }
        }
    }

    report
}

/// Build the `newMessage` frame for a message.
pub fn new_message_frame(message: ChatMessage) -> OutboundFrame {
    OutboundFrame::NewMessage { data: message }
}

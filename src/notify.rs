//! Hand-off point to the external notification dispatcher.
//!
//! The chat core never schedules or sends push notifications itself; it
//! only reports that a message was durably stored. The default impl just
//! logs, which is all a standalone deployment needs.

use tracing::debug;

use crate::messages::log::Message;

pub trait Notifier: Send + Sync {
    fn message_stored(&self, message: &Message) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    async fn message_stored(&self, message: &Message) {
        debug!(
            group_id = %message.group_id,
            message_id = %message.id,
            "message stored, dispatcher notified"
        );
    }
}

use serde::{Deserialize, Serialize};

use crate::api::models::Message;

/// Pushed to listeners when something lands in storage outside a direct call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "data", rename_all = "snake_case")]
pub enum StoreEvent {
    MessageReceived {
        conversation_id: String,
        message: Message,
    },
}

pub type EventSender = tokio::sync::mpsc::UnboundedSender<StoreEvent>;
pub type EventReceiver = tokio::sync::mpsc::UnboundedReceiver<StoreEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    tokio::sync::mpsc::unbounded_channel()
}

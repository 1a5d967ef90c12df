//! Simulated contact replies.
//!
//! Every non-self conversation can own one pending reply. Scheduling again
//! restarts the timer, and dropping the scheduler aborts whatever is pending.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::task::JoinHandle;

use super::ConversationStore;
use crate::api::events::{EventSender, StoreEvent};
use crate::api::models::{Conversation, User};
use crate::utils::spawn_async;

pub const AUTO_REPLY: &str = "Thanks for your message! How else can I help you with blood donation?";

struct Pending {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct ReplyScheduler {
    store: ConversationStore,
    delay: (Duration, Duration),
    events: Option<EventSender>,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generation: AtomicU64,
}

impl ReplyScheduler {
    pub fn new(store: ConversationStore, delay: (Duration, Duration)) -> Self {
        Self {
            store,
            delay,
            events: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Deliver a `StoreEvent` for every reply that lands.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    fn pick_delay(&self) -> Duration {
        let (min, max) = self.delay;
        if max <= min {
            return min;
        }
        let ms = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    /// Queue a reply from the conversation's contact. Self-channels never reply.
    pub fn schedule(&self, user: &User, conversation: &Conversation) -> bool {
        if conversation.is_self() {
            return false;
        }

        let delay = self.pick_delay();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let conversation_id = conversation.conversation_id.clone();
        let contact_name = conversation.contact_name.clone();
        let user = user.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);

        // Hold the map while spawning so a zero-delay task cannot finish before it is registered.
        let mut map = self.pending.lock();
        let task_id = conversation_id.clone();
        let handle = spawn_async(async move {
            tokio::time::sleep(delay).await;
            // Claim the slot before writing. Once claimed, `cancel` no longer sees this reply.
            {
                let mut map = pending.lock();
                if !map.get(&task_id).is_some_and(|p| p.generation == generation) {
                    return;
                }
                map.remove(&task_id);
            }
            match store.receive_message(&user, &task_id, &contact_name, AUTO_REPLY) {
                Ok(message) => {
                    debug!("auto-reply landed in {task_id}");
                    if let Some(tx) = events {
                        let _ = tx.send(StoreEvent::MessageReceived { conversation_id: task_id.clone(), message });
                    }
                }
                Err(e) => warn!("auto-reply for {task_id} failed: {e}"),
            }
        });

        if let Some(previous) = map.insert(conversation_id, Pending { generation, handle }) {
            previous.handle.abort();
        }
        true
    }

    /// Abort the conversation's pending reply. `true` means it will never land;
    /// a reply that is already being written is not pending anymore.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        match self.pending.lock().remove(conversation_id) {
            Some(p) => {
                p.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, p) in self.pending.lock().drain() {
            p.handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Drop for ReplyScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

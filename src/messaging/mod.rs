//! Per-user conversation list and message logs on top of a [`KeyValueStore`].
//!
//! Layout inside a user's scope:
//!
//! ```text
//! conversations            -> [Conversation]
//! messages:{conversation}  -> [Message]
//! active_conversation      -> "conversation id"
//! ```
//!
//! Message logs are append-only. Every write that appends a message also
//! refreshes the owning conversation's `last_message` preview.

pub mod replies;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;

use crate::api::models::{
    contact_id_of, conversation_id, is_self_channel, self_conversation_id, Conversation, Message, User,
};
use crate::error::{Error, Result};
use crate::search::roster_contact;
use crate::storage::{read_json, write_json, KeyValueStore};

pub use replies::ReplyScheduler;

const CONVERSATIONS_KEY: &str = "conversations";
const ACTIVE_KEY: &str = "active_conversation";
pub const SYSTEM_SENDER: &str = "RedWeb";

fn messages_key(conversation_id: &str) -> String {
    format!("messages:{}", conversation_id)
}

fn next_message_id(messages: &[Message]) -> u64 {
    messages.iter().map(|m| m.id).max().unwrap_or(0) + 1
}

#[derive(Clone)]
pub struct ConversationStore {
    kv: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write cycles so a reply landing mid-send loses nothing.
    write_lock: Arc<Mutex<()>>,
}

impl ConversationStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv, write_lock: Arc::new(Mutex::new(())) }
    }

    /// The user's conversations, seeding the self-channel and a coordinator chat on first use.
    pub fn list_conversations(&self, user: &User) -> Result<Vec<Conversation>> {
        let _guard = self.write_lock.lock();
        if let Some(list) = self.load_conversations(user)? {
            return Ok(list);
        }

        let now = Utc::now();
        let seeded = vec![
            Conversation {
                conversation_id: self_conversation_id(&user.id),
                contact_id: user.id.clone(),
                contact_name: format!("{} (You)", if user.name.is_empty() { "You" } else { user.name.as_str() }),
                last_message: "Welcome to RedWeb messaging!".into(),
                last_message_time: now,
                unread_count: 0,
                profile_picture: user.profile_picture.clone(),
            },
            Conversation {
                conversation_id: conversation_id(&user.id, "101"),
                contact_id: "101".into(),
                contact_name: "Sophie Smith".into(),
                last_message: "Hello, how can I help with your donation?".into(),
                last_message_time: now,
                unread_count: 2,
                profile_picture: roster_contact("101").and_then(|c| c.profile_picture.clone()),
            },
        ];
        info!("seeding default conversations for user {}", user.id);
        self.save_conversations(user, &seeded)?;
        Ok(seeded)
    }

    /// Message log of a conversation. An empty log is seeded with a greeting.
    pub fn get_messages(&self, user: &User, conversation_id: &str) -> Result<Vec<Message>> {
        let _guard = self.write_lock.lock();
        if let Some(messages) = self.load_messages(user, conversation_id)? {
            return Ok(messages);
        }

        let known = self.load_conversations(user)?.unwrap_or_default();
        let conversation = known.iter().find(|c| c.conversation_id == conversation_id);
        if conversation.is_none() {
            warn!("seeding messages for unknown conversation {conversation_id}");
        }

        let seeded = if is_self_channel(conversation_id) {
            welcome_messages()
        } else {
            let contact_id = conversation
                .map(|c| c.contact_id.as_str())
                .or_else(|| contact_id_of(conversation_id))
                .unwrap_or_default();
            let contact_name = conversation
                .map(|c| c.contact_name.clone())
                .or_else(|| roster_contact(contact_id).map(|c| c.name.clone()))
                .unwrap_or_else(|| "User".to_string());
            greeting_messages(user, contact_id, &contact_name)
        };
        self.save_messages(user, conversation_id, &seeded)?;
        Ok(seeded)
    }

    /// Open a conversation with `contact`, or return the one that already exists.
    pub fn create_conversation(&self, user: &User, contact: &User) -> Result<Conversation> {
        let _guard = self.write_lock.lock();
        let id = conversation_id(&user.id, &contact.id);
        let mut list = self.load_conversations(user)?.unwrap_or_default();
        if let Some(existing) = list.iter().find(|c| c.conversation_id == id) {
            debug!("conversation {id} already exists");
            return Ok(existing.clone());
        }

        let now = Utc::now();
        let conversation = Conversation {
            conversation_id: id.clone(),
            contact_id: contact.id.clone(),
            contact_name: contact.name.clone(),
            last_message: "New conversation started".into(),
            last_message_time: now,
            unread_count: 0,
            profile_picture: contact.profile_picture.clone(),
        };
        list.push(conversation.clone());
        self.save_conversations(user, &list)?;

        let opening = Message {
            id: 1,
            content: format!("Hello! This is the beginning of your conversation with {}.", contact.name),
            sender: SYSTEM_SENDER.into(),
            timestamp: now,
            is_own: false,
        };
        self.save_messages(user, &id, &[opening])?;
        info!("created conversation {id} with {}", contact.name);
        Ok(conversation)
    }

    /// Append a message written by `user`.
    pub fn send_message(&self, user: &User, conversation_id: &str, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let _guard = self.write_lock.lock();
        self.append(user, conversation_id, user.display_name(), content, true)
    }

    /// Append a message from the other side of the conversation.
    /// Counts as unread unless the conversation is the active one.
    pub fn receive_message(&self, user: &User, conversation_id: &str, sender: &str, content: &str) -> Result<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(Error::EmptyMessage);
        }
        let _guard = self.write_lock.lock();
        self.append(user, conversation_id, sender, content, false)
    }

    pub fn mark_read(&self, user: &User, conversation_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.mark_read_locked(user, conversation_id)
    }

    pub fn active_conversation(&self, user: &User) -> Result<Option<String>> {
        read_json(self.kv.as_ref(), &user.id, ACTIVE_KEY)
    }

    /// Remember which conversation is open. Opening it also reads it.
    pub fn set_active_conversation(&self, user: &User, conversation_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock();
        write_json(self.kv.as_ref(), &user.id, ACTIVE_KEY, conversation_id)?;
        self.mark_read_locked(user, conversation_id)
    }

    /// Drop the active-conversation pointer so incoming messages count as unread again.
    pub fn clear_active_conversation(&self, user: &User) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.kv.remove(&user.id, ACTIVE_KEY)
    }

    /// Forget everything stored for `user`.
    pub fn clear(&self, user: &User) -> Result<()> {
        let _guard = self.write_lock.lock();
        info!("clearing stored conversations for user {}", user.id);
        self.kv.clear_scope(&user.id)
    }

    fn append(&self, user: &User, conversation_id: &str, sender: &str, content: &str, is_own: bool) -> Result<Message> {
        let mut messages = self.load_messages(user, conversation_id)?.unwrap_or_default();
        let message = Message {
            id: next_message_id(&messages),
            content: content.to_string(),
            sender: sender.to_string(),
            timestamp: Utc::now(),
            is_own,
        };
        messages.push(message.clone());
        self.save_messages(user, conversation_id, &messages)?;

        let counts_unread = !is_own && self.active_conversation(user)?.as_deref() != Some(conversation_id);
        if let Some(mut list) = self.load_conversations(user)? {
            if let Some(conv) = list.iter_mut().find(|c| c.conversation_id == conversation_id) {
                conv.last_message = message.content.clone();
                conv.last_message_time = message.timestamp;
                if counts_unread {
                    conv.unread_count += 1;
                }
                self.save_conversations(user, &list)?;
            }
        }
        Ok(message)
    }

    fn mark_read_locked(&self, user: &User, conversation_id: &str) -> Result<()> {
        let Some(mut list) = self.load_conversations(user)? else {
            return Ok(());
        };
        if let Some(conv) = list.iter_mut().find(|c| c.conversation_id == conversation_id && c.unread_count > 0) {
            conv.unread_count = 0;
            self.save_conversations(user, &list)?;
        }
        Ok(())
    }

    fn load_conversations(&self, user: &User) -> Result<Option<Vec<Conversation>>> {
        read_json(self.kv.as_ref(), &user.id, CONVERSATIONS_KEY)
    }

    fn save_conversations(&self, user: &User, list: &[Conversation]) -> Result<()> {
        write_json(self.kv.as_ref(), &user.id, CONVERSATIONS_KEY, list)
    }

    fn load_messages(&self, user: &User, conversation_id: &str) -> Result<Option<Vec<Message>>> {
        read_json(self.kv.as_ref(), &user.id, &messages_key(conversation_id))
    }

    fn save_messages(&self, user: &User, conversation_id: &str, messages: &[Message]) -> Result<()> {
        write_json(self.kv.as_ref(), &user.id, &messages_key(conversation_id), messages)
    }
}

fn canned(id: u64, content: String, sender: &str, minutes_ago: i64) -> Message {
    Message {
        id,
        content,
        sender: sender.to_string(),
        timestamp: Utc::now() - ChronoDuration::minutes(minutes_ago),
        is_own: false,
    }
}

fn welcome_messages() -> Vec<Message> {
    vec![
        canned(1, "Welcome to RedWeb messaging!".into(), SYSTEM_SENDER, 0),
        canned(2, "You can use this system to communicate with donors and patients.".into(), SYSTEM_SENDER, 0),
    ]
}

fn greeting_messages(user: &User, contact_id: &str, contact_name: &str) -> Vec<Message> {
    let who = if user.name.is_empty() { "there" } else { user.name.as_str() };
    if contact_id == "101" {
        vec![
            canned(1, format!("Hello {}! I'm Sophie, a RedWeb coordinator.", who), contact_name, 1),
            canned(2, "How can I help with your donation process today?".into(), contact_name, 0),
        ]
    } else {
        vec![
            canned(1, format!("Hello {}! I'm {}.", who, contact_name), contact_name, 1),
            canned(2, "Looking forward to connecting with you on RedWeb.".into(), contact_name, 0),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::Role;
    use crate::storage::MemoryStore;

    fn user(id: &str, name: &str) -> User {
        User {
            id: id.into(),
            name: name.into(),
            email: format!("{}@redweb.com", name.to_lowercase()),
            role: Role::Donor,
            profile_picture: None,
        }
    }

    fn store() -> ConversationStore {
        ConversationStore::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn first_listing_seeds_two_channels() {
        let store = store();
        let alice = user("1", "Alice");
        let list = store.list_conversations(&alice).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].conversation_id, "self-1");
        assert_eq!(list[0].contact_name, "Alice (You)");
        assert!(list[0].is_self());
        assert_eq!(list[1].conversation_id, "conv-1-101");
        assert_eq!(list[1].unread_count, 2);

        assert_eq!(store.list_conversations(&alice).unwrap(), list);
    }

    #[test]
    fn seeded_logs_depend_on_channel() {
        let store = store();
        let alice = user("1", "Alice");
        store.list_conversations(&alice).unwrap();

        let welcome = store.get_messages(&alice, "self-1").unwrap();
        assert_eq!(welcome.len(), 2);
        assert!(welcome.iter().all(|m| m.sender == SYSTEM_SENDER && !m.is_own));

        let sophie = store.get_messages(&alice, "conv-1-101").unwrap();
        assert_eq!(sophie[0].content, "Hello Alice! I'm Sophie, a RedWeb coordinator.");
        assert_eq!(sophie[0].sender, "Sophie Smith");

        let unknown = store.get_messages(&alice, "conv-1-104").unwrap();
        assert_eq!(unknown[0].content, "Hello Alice! I'm James Wilson.");

        let stranger = store.get_messages(&alice, "conv-1-999").unwrap();
        assert_eq!(stranger[0].sender, "User");

        assert_eq!(store.get_messages(&alice, "conv-1-104").unwrap(), unknown);
    }

    #[test]
    fn empty_content_writes_nothing() {
        let store = store();
        let alice = user("1", "Alice");
        let before = store.list_conversations(&alice).unwrap();
        for content in ["", "   ", "\n\t"] {
            assert!(matches!(store.send_message(&alice, "self-1", content), Err(Error::EmptyMessage)));
        }
        assert_eq!(store.list_conversations(&alice).unwrap(), before);
        assert_eq!(store.load_messages(&alice, "self-1").unwrap(), None);
    }

    #[test]
    fn send_trims_and_updates_preview() {
        let store = store();
        let alice = user("1", "Alice");
        store.list_conversations(&alice).unwrap();
        let seeded = store.get_messages(&alice, "self-1").unwrap().len();

        let sent = store.send_message(&alice, "self-1", "  note to self  ").unwrap();
        assert_eq!(sent.content, "note to self");
        assert!(sent.is_own);
        assert_eq!(sent.sender, "Alice");

        let log = store.get_messages(&alice, "self-1").unwrap();
        assert_eq!(log.len(), seeded + 1);
        assert_eq!(log.last().unwrap(), &sent);

        let list = store.list_conversations(&alice).unwrap();
        assert_eq!(list[0].last_message, "note to self");
        assert_eq!(list[0].last_message_time, sent.timestamp);
    }

    #[test]
    fn message_ids_increase_under_rapid_sends() {
        let store = store();
        let alice = user("1", "Alice");
        let ids: Vec<u64> = (0..20)
            .map(|i| store.send_message(&alice, "self-1", &format!("m{i}")).unwrap().id)
            .collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ids[0], 1);
    }

    #[test]
    fn concurrent_send_and_receive_keep_both() {
        let store = store();
        let alice = user("1", "Alice");
        store.list_conversations(&alice).unwrap();
        let seeded = store.get_messages(&alice, "conv-1-101").unwrap().len();
        const ROUNDS: usize = 50;

        std::thread::scope(|s| {
            s.spawn(|| {
                for i in 0..ROUNDS {
                    store.send_message(&alice, "conv-1-101", &format!("out {i}")).unwrap();
                }
            });
            s.spawn(|| {
                for i in 0..ROUNDS {
                    store.receive_message(&alice, "conv-1-101", "Sophie Smith", &format!("in {i}")).unwrap();
                }
            });
        });

        let log = store.get_messages(&alice, "conv-1-101").unwrap();
        assert_eq!(log.len(), seeded + 2 * ROUNDS);
        assert!(log.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(log.iter().filter(|m| m.is_own).count(), ROUNDS);
        for i in 0..ROUNDS {
            assert!(log.iter().any(|m| m.content == format!("out {i}")));
            assert!(log.iter().any(|m| m.content == format!("in {i}")));
        }
    }

    #[test]
    fn unread_tracks_incoming_messages() {
        let store = store();
        let alice = user("1", "Alice");
        store.list_conversations(&alice).unwrap();
        store.mark_read(&alice, "conv-1-101").unwrap();

        store.receive_message(&alice, "conv-1-101", "Sophie Smith", "ping").unwrap();
        let list = store.list_conversations(&alice).unwrap();
        assert_eq!(list[1].unread_count, 1);
        assert_eq!(list[1].last_message, "ping");

        store.set_active_conversation(&alice, "conv-1-101").unwrap();
        assert_eq!(store.active_conversation(&alice).unwrap().as_deref(), Some("conv-1-101"));
        assert_eq!(store.list_conversations(&alice).unwrap()[1].unread_count, 0);

        store.receive_message(&alice, "conv-1-101", "Sophie Smith", "pong").unwrap();
        assert_eq!(store.list_conversations(&alice).unwrap()[1].unread_count, 0);

        store.clear_active_conversation(&alice).unwrap();
        assert_eq!(store.active_conversation(&alice).unwrap(), None);
        store.receive_message(&alice, "conv-1-101", "Sophie Smith", "again").unwrap();
        assert_eq!(store.list_conversations(&alice).unwrap()[1].unread_count, 1);
    }

    #[test]
    fn users_do_not_see_each_other() {
        let store = store();
        let alice = user("1", "Alice");
        let bob = user("2", "Bob");
        store.create_conversation(&alice, &user("102", "John Doe")).unwrap();

        let bobs = store.list_conversations(&bob).unwrap();
        assert!(bobs.iter().all(|c| c.conversation_id.contains("-2")));

        store.clear(&alice).unwrap();
        assert_eq!(store.load_conversations(&alice).unwrap(), None);
        assert_eq!(store.list_conversations(&bob).unwrap(), bobs);
    }
}

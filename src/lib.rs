//! Conversation store and contact search for the RedWeb blood-donation network.

pub mod api;
pub mod app;
pub mod error;
pub mod messaging;
pub mod search;
pub mod storage;
pub mod utils;

pub use api::models::{Conversation, ContactSource, Message, Role, SearchResults, User};
pub use error::{Error, Result};
pub use messaging::{ConversationStore, ReplyScheduler};
pub use search::ContactDirectory;

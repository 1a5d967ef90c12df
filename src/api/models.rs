use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    #[default]
    Donor,
    Patient,
}

impl Role {
    /// Lenient parse for backend payloads; anything unrecognised is a donor.
    pub fn from_api(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("patient") { Role::Patient } else { Role::Donor }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl User {
    /// Name shown as the sender of this user's messages.
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() { &self.email } else { &self.name }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub contact_id: String,
    pub contact_name: String,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
    pub unread_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

impl Conversation {
    pub fn is_self(&self) -> bool {
        is_self_channel(&self.conversation_id)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: u64,
    pub content: String,
    pub sender: String,
    pub timestamp: DateTime<Utc>,
    pub is_own: bool,
}

/// Where a contact search got its answer from.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContactSource {
    Live,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct SearchResults {
    pub users: Vec<User>,
    pub source: ContactSource,
}

pub fn self_conversation_id(user_id: &str) -> String {
    format!("self-{}", user_id)
}

pub fn conversation_id(self_id: &str, contact_id: &str) -> String {
    if self_id == contact_id {
        self_conversation_id(self_id)
    } else {
        format!("conv-{}-{}", self_id, contact_id)
    }
}

pub fn is_self_channel(conversation_id: &str) -> bool {
    conversation_id.starts_with("self-")
}

/// Trailing contact id of a `conv-{self}-{contact}` id.
pub fn contact_id_of(conversation_id: &str) -> Option<&str> {
    conversation_id.rsplit('-').next().filter(|s| !s.is_empty())
}

const PLACEHOLDER_COLORS: [&str; 7] = ["red", "blue", "green", "purple", "orange", "teal", "pink"];

/// Profile picture, or a placeholder whose color is stable for the id.
pub fn profile_image(id: &str, picture: Option<&str>) -> String {
    if let Some(p) = picture.filter(|p| !p.is_empty()) {
        return p.to_string();
    }
    let seed: u32 = id.chars().map(|c| c as u32).sum();
    let color = PLACEHOLDER_COLORS[(seed as usize) % PLACEHOLDER_COLORS.len()];
    format!("/images/default-{}.jpg", color)
}

use log::{debug, warn};
use once_cell::sync::Lazy;

use crate::api::client::ApiClient;
use crate::api::models::{ContactSource, Role, SearchResults, User};

pub const MAX_RESULTS: usize = 10;
const MIN_QUERY_LEN: usize = 2;

fn roster_entry(id: &str, name: &str, role: Role) -> User {
    let first = name.split(' ').next().unwrap_or(name).to_lowercase();
    User {
        id: id.to_string(),
        name: name.to_string(),
        email: format!("{}@redweb.com", first),
        role,
        profile_picture: Some(format!("/images/profile-{}.jpg", first)),
    }
}

/// Candidates offered when the user directory cannot be reached.
pub static FALLBACK_ROSTER: Lazy<Vec<User>> = Lazy::new(|| {
    vec![
        roster_entry("101", "Sophie Smith", Role::Donor),
        roster_entry("102", "John Doe", Role::Donor),
        roster_entry("103", "Maria Rodriguez", Role::Patient),
        roster_entry("104", "James Wilson", Role::Donor),
        roster_entry("105", "Priya Patel", Role::Patient),
        roster_entry("106", "Robert Chen", Role::Donor),
        roster_entry("107", "Emma Johnson", Role::Donor),
        roster_entry("108", "Michael Brown", Role::Patient),
        roster_entry("109", "Sarah Lee", Role::Donor),
        roster_entry("110", "David Kim", Role::Patient),
        roster_entry("111", "Lisa Wong", Role::Donor),
        roster_entry("112", "Alex Garcia", Role::Donor),
    ]
});

pub fn roster_contact(id: &str) -> Option<&'static User> {
    FALLBACK_ROSTER.iter().find(|u| u.id == id)
}

/// Filter the fallback roster. Queries shorter than two characters match everyone.
pub fn search_roster(self_id: &str, query: &str) -> Vec<User> {
    let needle = query.to_lowercase();
    FALLBACK_ROSTER
        .iter()
        .filter(|u| u.id != self_id)
        .filter(|u| {
            needle.chars().count() < MIN_QUERY_LEN
                || u.name.to_lowercase().contains(&needle)
                || u.email.to_lowercase().contains(&needle)
        })
        .take(MAX_RESULTS)
        .cloned()
        .collect()
}

/// Contact lookup against the live user directory, degrading to the fallback roster.
#[derive(Clone)]
pub struct ContactDirectory {
    client: ApiClient,
    api_url: String,
    token: Option<String>,
}

impl ContactDirectory {
    pub fn new(client: ApiClient, api_url: impl Into<String>, token: Option<String>) -> Self {
        Self { client, api_url: api_url.into(), token }
    }

    pub async fn search(&self, user: &User, query: &str) -> SearchResults {
        match self.token.as_deref() {
            Some(token) => match self.client.search_users(&self.api_url, token, query).await {
                Ok(found) => {
                    let users: Vec<User> = found.into_iter().filter(|u| u.id != user.id).take(MAX_RESULTS).collect();
                    debug!("directory returned {} users for {query:?}", users.len());
                    return SearchResults { users, source: ContactSource::Live };
                }
                Err(e) => warn!("user search failed, using fallback roster: {e}"),
            },
            None => warn!("no auth token, using fallback roster"),
        }
        SearchResults { users: search_roster(&user.id, query), source: ContactSource::Fallback }
    }
}

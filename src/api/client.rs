use std::time::Duration;

use log::debug;
use reqwest::Client as HttpClient;
use serde_json::Value;
use url::Url;

use crate::api::models::{Role, User};
use crate::error::{Error, Result};

const PING_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone)]
pub struct ApiClient {
    pub http: HttpClient,
}

impl Default for ApiClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiClient {
    pub fn new() -> Self {
        Self {
            http: HttpClient::new(),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    fn base_api(base_url: &str) -> String {
        let trimmed = base_url.trim_end_matches('/');
        if trimmed.ends_with("/api") { trimmed.to_string() } else { format!("{}/api", trimmed) }
    }

    fn with_auth(mut req: reqwest::RequestBuilder, token: Option<&str>) -> reqwest::RequestBuilder {
        if let Some(t) = token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req.header("Accept", "application/json")
    }

    /// Check whether the backend answers at all. Gives up after a few seconds.
    pub async fn ping(&self, base_url: &str) -> Result<u16> {
        let endpoint = base_url.trim_end_matches('/');
        let resp = self.http.get(endpoint).timeout(PING_TIMEOUT).send().await?;
        Ok(resp.status().as_u16())
    }

    /// Query the backend user directory. Entries missing an id or email are dropped.
    pub async fn search_users(&self, base_url: &str, token: &str, query: &str) -> Result<Vec<User>> {
        let mut endpoint = Url::parse(&format!("{}/users/search", Self::base_api(base_url)))
            .map_err(|e| Error::Config(format!("invalid api url {base_url}: {e}")))?;
        endpoint.query_pairs_mut().append_pair("query", query);

        debug!("searching users at {endpoint}");
        let resp = Self::with_auth(self.http.get(endpoint), Some(token)).send().await?;
        if !resp.status().is_success() {
            return Err(Error::HttpStatus(resp.status().as_u16()));
        }
        let json: Value = resp.json().await?;
        let list = json.as_array()
            .or_else(|| json.get("data").and_then(|v| v.as_array()))
            .ok_or(Error::UnexpectedPayload)?;
        Ok(list.iter().filter_map(user_from_json).collect())
    }
}

fn string_field<'a>(item: &'a Value, key: &str) -> Option<&'a str> {
    item.get(key).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Map one backend user object onto a `User`.
pub(crate) fn user_from_json(item: &Value) -> Option<User> {
    let id = match item.get("id")? {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    let email = string_field(item, "email")?.to_string();
    let name = match (string_field(item, "firstName"), string_field(item, "lastName")) {
        (Some(first), Some(last)) => format!("{} {}", first, last),
        _ => string_field(item, "name")
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string()),
    };
    let role = string_field(item, "role").map(Role::from_api).unwrap_or_default();
    let profile_picture = string_field(item, "profilePicture").map(str::to_string);
    Some(User { id, name, email, role, profile_picture })
}

use thiserror::Error;

/// Errors surfaced by the conversation store, its persistence and the API client.
#[derive(Error, Debug)]
pub enum Error {
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("unexpected response payload")]
    UnexpectedPayload,

    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("no authenticated user")]
    NotAuthenticated,

    #[error("unknown contact {0}")]
    ContactNotFound(String),

    #[error("no data directory available")]
    NoDataDir,

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

use thiserror::Error;

/// Errors raised by the import, geocoding and query jobs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store returned {status}: {body}")]
    Store { status: u16, body: String },

    #[error("store unreachable at {0}")]
    Unreachable(String),

    #[error("failed to fetch {url}: {status}")]
    Fetch { url: String, status: u16 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid data: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, Error>;

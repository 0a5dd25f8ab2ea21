use thiserror::Error;

/// Failures surfaced by a build step.
///
/// Missing prompt or name arguments never land here: those operations
/// answer with an empty manifest delta instead.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("backend request failed: {0}")]
    Backend(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("could not decode backend output: {0}")]
    Decode(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("{0}")]
    Page(String),

    #[error("document cache: {0}")]
    Cache(#[from] rusqlite::Error),

    #[error("refusing to write outside the project directory: {0}")]
    InvalidPath(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("page fetch failed: {0}")]
    Fetch(String),

    #[error("builder session closed")]
    Session,
}

impl From<serde_json::Error> for BuildError {
    fn from(e: serde_json::Error) -> Self {
        BuildError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BuildError>;

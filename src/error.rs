use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("{feed} answered with status {status}")]
    Status { feed: String, status: reqwest::StatusCode },
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TrackerError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("api request failed with status {status}: {message}")]
    Api { status: u16, message: String },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("no usable media found in archive")]
    NoMedia,
    #[error("invalid enrichment file: {0}")]
    InvalidEnrichment(String),
    #[error("import job error: {0}")]
    Job(String),
    #[error("config error: {0}")]
    Config(String),
}

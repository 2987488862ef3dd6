use hyper::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("URI error: {0}")]
    Uri(String),

    #[error("Hyper error: {0}")]
    Hyper(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Hijacking not supported")]
    UpgradeUnavailable,
}

impl ProxyError {
    /// Status code reported to the client when this error ends a request.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Connection(_)
            | ProxyError::Timeout(_)
            | ProxyError::Upstream(_)
            | ProxyError::Io(_)
            | ProxyError::Hyper(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpgradeUnavailable | ProxyError::Config(_) | ProxyError::Http(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::BadRequest(_) | ProxyError::Uri(_) | ProxyError::Url(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid image url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported url scheme for {url}, expected http or https")]
    UnsupportedScheme { url: String },

    #[error("failed to download {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to download {url}: HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("image at {url} exceeds the {limit} byte download limit")]
    TooLarge { url: String, limit: usize },

    #[error("failed to decode image from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: image::ImageError,
    },

    #[error("image worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to encode result image: {0}")]
    Encode(#[from] image::ImageError),

    #[error("failed to upload {key}: {message}")]
    Request { key: String, message: String },

    #[error("failed to upload {key}: HTTP {status}")]
    Status { key: String, status: u16 },

    #[error("storage worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Any collaborator failure while driving a single try-on request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("generation worker failed: {0}")]
    Generate(#[source] tokio::task::JoinError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

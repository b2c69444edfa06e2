use crate::config::ConfigError;
use crate::extract::ExtractError;
use crate::providers::ProviderError;
use crate::semantic::CacheError;
use crate::source::SourceError;

/// Why a single item was skipped. Only `Configuration` and `Preflight`
/// ever abort a whole run.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("cannot list content: {0}")]
    Preflight(#[source] SourceError),

    #[error("provider failed: {0}")]
    TransientProvider(#[from] ProviderError),

    #[error("remote rejected write-back: stale version")]
    RemoteConflict,

    #[error("remote item not found")]
    RemoteNotFound,

    #[error("malformed content: {0}")]
    MalformedContent(String),

    #[error("remote error: {0}")]
    Remote(SourceError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
}

impl From<SourceError> for PipelineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Conflict => PipelineError::RemoteConflict,
            SourceError::NotFound => PipelineError::RemoteNotFound,
            other => PipelineError::Remote(other),
        }
    }
}

impl From<ExtractError> for PipelineError {
    fn from(err: ExtractError) -> Self {
        PipelineError::MalformedContent(err.to_string())
    }
}

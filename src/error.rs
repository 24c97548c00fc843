use thiserror::Error;

pub type Result<T> = std::result::Result<T, UpdatesError>;

#[derive(Error, Debug)]
pub enum UpdatesError {
    #[error("configuration error: {0}")]
    Config(String),

    /// Every credential placement was rejected for one call.
    #[error("upstream rejected credentials: {0}")]
    UpstreamAuth(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("aggregation failed for {date}: scratchings: {scratchings}; conditions: {conditions}")]
    Aggregation {
        date: String,
        scratchings: String,
        conditions: String,
    },
}

/// Outcome of a single upstream call that produced no rows.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("all credential placements rejected: {0}")]
    Auth(String),

    #[error("{0}")]
    Unavailable(String),
}

impl From<FetchError> for UpdatesError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Auth(msg) => UpdatesError::UpstreamAuth(msg),
            FetchError::Unavailable(msg) => UpdatesError::UpstreamUnavailable(msg),
        }
    }
}

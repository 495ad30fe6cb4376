use reqwest::StatusCode;
use tracker::{
    PollError,
    TrackError,
};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session expired or logged in from another device")]
    Unauthorized,
    #[error("panel request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("panel responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("invalid {context} payload: {source}")]
    Decode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
    #[error("panel rejected the request: {0}")]
    Rejected(String),
    #[error("panel response carried no {0} identifier")]
    MissingIdentifier(&'static str),
}

impl Error {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }
}

/// The tracker only distinguishes a dead session from everything else.
impl From<Error> for PollError {
    fn from(err: Error) -> Self {
        match err {
            Error::Unauthorized => PollError::Unauthorized,
            other => PollError::Transport(other.to_string()),
        }
    }
}

impl From<TrackError> for Error {
    fn from(err: TrackError) -> Self {
        match err {
            TrackError::LoggedOut => Error::Unauthorized,
            TrackError::InvalidOptions(reason) => Error::Invalid(reason.to_string()),
        }
    }
}

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProbeError>;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Stream is closed")]
    Closed,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("HTTP error: {status} - {message}")]
    Http { status: u16, message: String },
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Server does not support range requests")]
    RangeNotSupported,
    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Waiting for completion failed: {0}")]
    WaitFailed(String),
    #[error("Platform is not started")]
    NotStarted,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
    #[error("Parsing error")]
    Parse,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for ProbeError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

/// Terminal status of a stream operation.
///
/// Every [`ProbeError`] collapses into one of these so the scenario runner
/// can record failures next to successes instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Status {
    Ok,
    InvalidArgument,
    Closed,
    Transport(String),
}

impl Status {
    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("ok"),
            Status::InvalidArgument => f.write_str("invalid-argument"),
            Status::Closed => f.write_str("closed"),
            Status::Transport(reason) => write!(f, "transport({reason})"),
        }
    }
}

impl From<&ProbeError> for Status {
    fn from(err: &ProbeError) -> Self {
        match err {
            ProbeError::InvalidArgument(_) => Status::InvalidArgument,
            ProbeError::Closed => Status::Closed,
            other => Status::Transport(other.to_string()),
        }
    }
}

impl<T> From<&Result<T>> for Status {
    fn from(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Status::Ok,
            Err(err) => err.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ProbeError::InvalidArgument("seek".into()), Status::InvalidArgument)]
    #[case(ProbeError::Closed, Status::Closed)]
    #[case(ProbeError::NotStarted, Status::Transport("Platform is not started".into()))]
    #[case(
        ProbeError::Http { status: 500, message: "Internal Server Error".into() },
        Status::Transport("HTTP error: 500 - Internal Server Error".into())
    )]
    fn error_maps_to_status(#[case] err: ProbeError, #[case] expected: Status) {
        assert_eq!(Status::from(&err), expected);
    }

    #[test]
    fn result_maps_to_status() {
        let ok: Result<u64> = Ok(3);
        assert_eq!(Status::from(&ok), Status::Ok);
        let failed: Result<u64> = Err(ProbeError::Closed);
        assert_eq!(Status::from(&failed), Status::Closed);
    }

    #[test]
    fn status_serializes_with_kind_tag() {
        let json = serde_json::to_string(&Status::Transport("reset".into()))
            .unwrap();
        assert_eq!(json, r#"{"kind":"transport","detail":"reset"}"#);
        let json = serde_json::to_string(&Status::Ok).unwrap();
        assert_eq!(json, r#"{"kind":"ok"}"#);
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildkiteError {
    #[error("Buildkite API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No results, are you sure there are tests for {org}/{pipeline} on {branch}?")]
    NoBuilds {
        org: String,
        pipeline: String,
        branch: String,
    },

    #[error("Network error: {0}")]
    Transient(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("GraphQL errors in {query_type}: {errors}")]
    GraphQL { query_type: String, errors: String },

    #[error("GraphQL response contained no data")]
    NoResponseData,

    #[error("Could not find a Buildkite pipeline for {org}/{repo}")]
    PipelineNotFound { org: String, repo: String },

    #[error("None of the candidate pipelines for {org}/{repo} have builds on {branch}")]
    NoCandidateHasBuilds {
        org: String,
        repo: String,
        branch: String,
    },

    #[error("Build on {branch} failed!")]
    BuildFailed { branch: String, url: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Git error: {0}")]
    Git(String),
}

/// How a caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The API answered 404 for the requested resource.
    NotFound,
    /// The pipeline exists but has no builds for the branch.
    NoBuilds,
    /// Timeouts, DNS failures and refused connections. Safe to retry.
    Transient,
    /// The surrounding cancellation token fired.
    Cancelled,
    Fatal,
}

impl BuildkiteError {
    /// Classifies a `reqwest` failure, splitting retryable network errors from the rest.
    pub fn from_request(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            Self::Transient(err.to_string())
        } else {
            Self::Network(err)
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Api { status: 404, .. } => ErrorKind::NotFound,
            Self::NoBuilds { .. } => ErrorKind::NoBuilds,
            Self::Transient(_) => ErrorKind::Transient,
            Self::Network(e) if e.is_timeout() || e.is_connect() => ErrorKind::Transient,
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, BuildkiteError>;

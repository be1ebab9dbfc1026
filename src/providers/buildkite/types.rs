use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a build as reported by the REST API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BuildState {
    Scheduled,
    Running,
    Passed,
    Failing,
    Failed,
    Blocked,
    Canceling,
    Canceled,
    Skipped,
    NotRun,
    /// Any state this client does not know about (e.g. `queued` from newer APIs).
    Other(String),
}

impl BuildState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Failing => "failing",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Canceling => "canceling",
            Self::Canceled => "canceled",
            Self::Skipped => "skipped",
            Self::NotRun => "not_run",
            Self::Other(s) => s,
        }
    }

    /// `failing` already has a failed job, so it is reported like `failed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::Failing)
    }
}

impl From<String> for BuildState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "scheduled" => Self::Scheduled,
            "running" => Self::Running,
            "passed" => Self::Passed,
            "failing" => Self::Failing,
            "failed" => Self::Failed,
            "blocked" => Self::Blocked,
            "canceling" => Self::Canceling,
            "canceled" | "cancelled" => Self::Canceled,
            "skipped" => Self::Skipped,
            "not_run" => Self::NotRun,
            _ => Self::Other(value),
        }
    }
}

impl From<BuildState> for String {
    fn from(value: BuildState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A Buildkite build. Polled, never mutated locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    pub number: u64,
    pub state: BuildState,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub commit: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub pipeline: Option<Pipeline>,
    #[serde(default)]
    pub pull_request: Option<PullRequest>,
}

impl Build {
    /// Wall-clock duration of the build, rounded to the second.
    ///
    /// Unfinished builds are measured up to `now`.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Duration {
        let Some(started_at) = self.started_at else {
            return Duration::ZERO;
        };
        let end = self.finished_at.unwrap_or(now);
        round_to_second((end - started_at).to_std().unwrap_or_default())
    }

    /// Duration of a finished build, used as the reference for a new one.
    pub fn finished_duration(&self) -> Option<Duration> {
        let started_at = self.started_at?;
        let finished_at = self.finished_at?;
        (finished_at - started_at).to_std().ok()
    }
}

/// A job within a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub id: String,
    /// Wait steps and block steps have no name.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn failed(&self) -> bool {
        self.state.as_deref() == Some("failed")
    }

    pub fn duration(&self) -> Option<Duration> {
        let started_at = self.started_at?;
        let finished_at = self.finished_at?;
        (finished_at - started_at).to_std().ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: String,
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

impl PullRequest {
    /// Web URL of the pull request, derived from its repository URL.
    pub fn url(&self) -> Option<String> {
        let repository = url::Url::parse(self.repository.as_deref()?).ok()?;
        let path = repository.path();
        let path = path.strip_suffix(".git").unwrap_or(path);
        Some(format!(
            "{}://{}{}/pull/{}",
            repository.scheme(),
            repository.host_str()?,
            path,
            self.id
        ))
    }
}

/// A pipeline as returned by the REST listing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub body_html: String,
}

/// A pipeline slug hypothesized to back the local repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredCandidate {
    pub slug: String,
    pub score: u32,
}

/// One page of GraphQL pipeline search results.
#[derive(Debug, Clone, Default)]
pub struct PipelineSearchPage {
    pub pipelines: Vec<(String, String)>,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
}

pub fn round_to_second(duration: Duration) -> Duration {
    let secs = (duration.as_millis() + 500) / 1000;
    Duration::from_secs(u64::try_from(secs).unwrap_or(u64::MAX))
}

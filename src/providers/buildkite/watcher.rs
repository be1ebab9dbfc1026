use chrono::{DateTime, Utc};
use log::{debug, info};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::api::{BuildkiteApi, RECENT_BUILDS};
use super::failure::find_build_failure;
use super::types::{Annotation, Build, BuildState};
use crate::error::{BuildkiteError, ErrorKind, Result};
use crate::notify::Notifier;
use crate::output::{render_summary, BuildReport};

/// Pause between polls while a build is in progress.
pub const POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Pause after a timeout or connection failure.
pub const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(2);
/// Pause while the latest build is for an older commit.
pub const TIP_MISMATCH_DELAY: Duration = Duration::from_secs(5);
/// Expected build length when there is no previous passing build to go by.
pub const DEFAULT_REFERENCE_DURATION: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_FAILURE_LINES: usize = 20;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// How long to wait between progress lines, given how much of the
/// expected build time is left. Updates get denser near the end.
pub fn print_interval(remaining: Duration) -> Duration {
    const MINUTE: u64 = 60;
    let secs = if remaining > Duration::from_secs(25 * MINUTE) {
        3 * MINUTE
    } else if remaining > Duration::from_secs(8 * MINUTE) {
        2 * MINUTE
    } else if remaining > Duration::from_secs(5 * MINUTE) {
        30
    } else if remaining > Duration::from_secs(3 * MINUTE) {
        20
    } else if remaining > Duration::from_secs(MINUTE) {
        15
    } else {
        10
    };
    Duration::from_secs(secs)
}

/// The build to wait for.
#[derive(Debug, Clone)]
pub struct BuildTarget {
    pub org: String,
    pub pipeline: String,
    pub branch: String,
    /// Local tip of `branch`.
    pub commit: String,
}

struct PollSession {
    last_printed_at: Option<DateTime<Utc>>,
    previous_build: Option<Build>,
    target_commit: String,
}

impl PollSession {
    fn reference_duration(&self) -> Duration {
        self.previous_build
            .as_ref()
            .and_then(Build::finished_duration)
            .unwrap_or(DEFAULT_REFERENCE_DURATION)
    }

    fn should_print(&self, now: DateTime<Utc>, elapsed: Duration) -> bool {
        let Some(last) = self.last_printed_at else {
            return true;
        };
        let remaining = self.reference_duration().saturating_sub(elapsed);
        match chrono::Duration::from_std(print_interval(remaining)) {
            Ok(interval) => now >= last + interval,
            Err(_) => false,
        }
    }

    fn mark_printed(&mut self, now: DateTime<Utc>) {
        self.last_printed_at = Some(now);
    }
}

/// Polls the latest build on a branch until it finishes.
pub struct BuildWatcher {
    api: Arc<dyn BuildkiteApi>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    failure_lines: usize,
}

impl BuildWatcher {
    pub fn new(api: Arc<dyn BuildkiteApi>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            api,
            notifier,
            clock: Arc::new(SystemClock),
            failure_lines: DEFAULT_FAILURE_LINES,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_failure_lines(mut self, lines: usize) -> Self {
        self.failure_lines = lines;
        self
    }

    /// Wait for the build of `target.commit` to pass or fail.
    ///
    /// Returns the passed build, or `BuildFailed` after printing the summary
    /// of a failed one.
    pub async fn wait<W: Write>(
        &self,
        target: &BuildTarget,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Build> {
        writeln!(out, "Waiting for latest build on {} to complete", target.branch)?;
        let mut session = PollSession {
            last_printed_at: None,
            previous_build: self.previous_passed_build(target, cancel).await?,
            target_commit: target.commit.clone(),
        };
        debug!(
            "Expecting the build to take about {}",
            humantime::format_duration(session.reference_duration())
        );

        loop {
            let Some(build) = self.fetch_matching(target, &mut session, out, cancel).await? else {
                continue;
            };

            let now = self.clock.now();
            let elapsed = build.elapsed(now);
            match &build.state {
                BuildState::Passed => {
                    return self.finish_passed(target, build, elapsed, out, cancel).await;
                }
                state if state.is_failure() => {
                    return self.finish_failed(target, build, elapsed, out, cancel).await;
                }
                BuildState::Running => {
                    if session.should_print(now, elapsed) {
                        writeln!(
                            out,
                            "Build {} running ({} elapsed)",
                            build.number,
                            humantime::format_duration(elapsed)
                        )?;
                        session.mark_printed(now);
                    }
                }
                other => {
                    writeln!(out, "State is {other}, trying again")?;
                    session.mark_printed(now);
                }
            }

            pause(cancel, POLL_INTERVAL).await?;
        }
    }

    /// Wait until the latest build is for `target.commit`, whatever its state.
    pub async fn wait_for_commit<W: Write>(
        &self,
        target: &BuildTarget,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Build> {
        let mut session = PollSession {
            last_printed_at: None,
            previous_build: None,
            target_commit: target.commit.clone(),
        };
        loop {
            if let Some(build) = self.fetch_matching(target, &mut session, out, cancel).await? {
                return Ok(build);
            }
        }
    }

    /// One fetch of the latest build. `None` means the caller should poll
    /// again; the appropriate pause has already happened.
    async fn fetch_matching<W: Write>(
        &self,
        target: &BuildTarget,
        session: &mut PollSession,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Option<Build>> {
        let latest = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BuildkiteError::Cancelled),
            latest = self.api.latest_build(&target.org, &target.pipeline, &target.branch) => latest,
        };

        let build = match latest {
            Ok(build) => build,
            Err(e) if e.kind() == ErrorKind::Transient => {
                writeln!(out, "Caught network error: {e}. Continuing")?;
                session.mark_printed(self.clock.now());
                pause(cancel, NETWORK_RETRY_DELAY).await?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if build.commit != session.target_commit {
            writeln!(
                out,
                "Latest build in Buildkite is {}, waiting for {}...",
                build.commit, session.target_commit
            )?;
            session.mark_printed(self.clock.now());
            pause(cancel, TIP_MISMATCH_DELAY).await?;
            return Ok(None);
        }

        Ok(Some(build))
    }

    /// The most recent passed build before the latest one, used to guess
    /// how long the current build will take.
    async fn previous_passed_build(
        &self,
        target: &BuildTarget,
        cancel: &CancellationToken,
    ) -> Result<Option<Build>> {
        let builds = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(BuildkiteError::Cancelled),
            builds = self.api.list_builds(&target.org, &target.pipeline, &target.branch, RECENT_BUILDS) => builds,
        };
        match builds {
            Ok(builds) => Ok(builds
                .into_iter()
                .skip(1)
                .find(|build| build.state == BuildState::Passed)),
            Err(e) => {
                debug!("Could not fetch previous builds: {e}");
                Ok(None)
            }
        }
    }

    async fn finish_passed<W: Write>(
        &self,
        target: &BuildTarget,
        build: Build,
        elapsed: Duration,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Build> {
        let annotations = self.fetch_annotations(target, &build, cancel).await;
        let summary = render_summary(&BuildReport {
            build: &build,
            elapsed,
            annotations: &annotations,
            failure_excerpt: None,
            failure_lines: self.failure_lines,
        });
        write!(out, "{summary}")?;
        info!("Build #{} passed in {}", build.number, humantime::format_duration(elapsed));
        self.notifier.notify(
            &notification_title(target),
            &format!("{} build complete!", target.branch),
        );
        Ok(build)
    }

    async fn finish_failed<W: Write>(
        &self,
        target: &BuildTarget,
        build: Build,
        elapsed: Duration,
        out: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Build> {
        let annotations = self.fetch_annotations(target, &build, cancel).await;
        let excerpt = self.fetch_failure_excerpt(target, &build, cancel).await;
        let summary = render_summary(&BuildReport {
            build: &build,
            elapsed,
            annotations: &annotations,
            failure_excerpt: excerpt.as_deref(),
            failure_lines: self.failure_lines,
        });
        write!(out, "{summary}")?;
        self.notifier.notify(&notification_title(target), "build failed");
        Err(BuildkiteError::BuildFailed {
            branch: target.branch.clone(),
            url: build.web_url,
        })
    }

    async fn fetch_annotations(
        &self,
        target: &BuildTarget,
        build: &Build,
        cancel: &CancellationToken,
    ) -> Vec<Annotation> {
        let result = tokio::select! {
            () = cancel.cancelled() => return Vec::new(),
            result = self.api.annotations(&target.org, &target.pipeline, build.number) => result,
        };
        result.unwrap_or_else(|e| {
            debug!("Could not fetch annotations for build #{}: {e}", build.number);
            Vec::new()
        })
    }

    async fn fetch_failure_excerpt(
        &self,
        target: &BuildTarget,
        build: &Build,
        cancel: &CancellationToken,
    ) -> Option<Vec<u8>> {
        let job = build.jobs.iter().find(|job| job.failed())?;
        let result = tokio::select! {
            () = cancel.cancelled() => return None,
            result = self.api.raw_job_log(&target.org, &target.pipeline, build.number, &job.id) => result,
        };
        match result {
            Ok(log) => Some(find_build_failure(&log, self.failure_lines).to_vec()),
            Err(e) => {
                debug!("Could not fetch log for job {}: {e}", job.id);
                None
            }
        }
    }
}

fn notification_title(target: &BuildTarget) -> String {
    format!("buildkite ({})", target.pipeline)
}

/// Sleep for `duration` unless cancelled first.
async fn pause(cancel: &CancellationToken, duration: Duration) -> Result<()> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(BuildkiteError::Cancelled),
        () = tokio::time::sleep(duration) => Ok(()),
    }
}

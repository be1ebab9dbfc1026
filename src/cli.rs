use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::Token;
use crate::browser;
use crate::config::{FileConfig, Organization};
use crate::error::BuildkiteError;
use crate::git::{GitInfo, GitRemote, GitRepository};
use crate::notify::{DesktopNotifier, Notifier, SilentNotifier};
use crate::output::{self, Spinner};
use crate::providers::buildkite::{
    BuildTarget, BuildWatcher, BuildkiteApi, BuildkiteClient, PipelineLocator,
    DEFAULT_FAILURE_LINES,
};

#[derive(Parser)]
#[command(name = "buildkite")]
#[command(author, version, about = "Wait for Buildkite builds of your git branches", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file to use instead of the default locations
    #[arg(short, long, global = true, env = "BUILDKITE_CONFIG")]
    config: Option<PathBuf>,

    /// API token, overriding the one in the config file
    #[arg(short, long, global = true, env = "BUILDKITE_TOKEN", hide_env_values = true)]
    token: Option<String>,
}

#[derive(Args)]
struct BuildArgs {
    /// Branch to look at (defaults to the current branch)
    branch: Option<String>,

    /// Git remote that identifies the repository
    #[arg(short, long, default_value = "origin")]
    remote: String,

    /// Give up after this long, e.g. "30m" or "1h 15m"
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,
}

#[derive(Subcommand)]
enum Commands {
    /// Wait for the build of the branch tip to finish
    Wait {
        #[command(flatten)]
        build: BuildArgs,

        /// Lines of failed job output to show
        #[arg(short = 'n', long, default_value_t = DEFAULT_FAILURE_LINES)]
        lines: usize,

        /// Don't show a desktop notification when the build finishes
        #[arg(long)]
        no_notify: bool,
    },
    /// Open the build of the branch tip in a browser
    Open {
        #[command(flatten)]
        build: BuildArgs,
    },
    /// Print the version
    Version,
}

/// Everything resolved before talking to the build.
struct Prepared {
    org: Organization,
    api: Arc<dyn BuildkiteApi>,
    target: BuildTarget,
}

impl Cli {
    async fn prepare(&self, args: &BuildArgs, cancel: &CancellationToken) -> Result<Prepared> {
        let git = GitRepository::current();
        let branch = match &args.branch {
            Some(branch) => branch.clone(),
            None => git.current_branch()?,
        };
        let remote = GitRemote::parse(&git.remote_url(&args.remote)?)?;
        let tip = git.tip(&branch)?;
        debug!("Remote {remote:?}, branch {branch} at {tip}");

        let config = FileConfig::load(self.config.as_deref())?;
        let org = config.resolve_org(&remote.owner)?.clone();
        let token = match &self.token {
            Some(token) => Token::from(token.as_str()),
            None => config.token(&remote.owner)?,
        };
        let api: Arc<dyn BuildkiteApi> = Arc::new(BuildkiteClient::new(&config.api, Some(token))?);

        let spinner = Spinner::start(format!("Finding pipeline for {}/{}", org.name, remote.repo));
        let locator = PipelineLocator::new(Arc::clone(&api), config.aliases());
        let pipeline = match locator.locate(&org.name, &remote.repo, &branch, cancel).await {
            Ok(pipeline) => {
                spinner.finish(format!("Using pipeline {}/{pipeline}", org.name));
                pipeline
            }
            Err(e) => {
                spinner.fail("No pipeline found");
                return Err(e.into());
            }
        };

        let target = BuildTarget {
            org: org.name.clone(),
            pipeline,
            branch,
            commit: tip,
        };
        Ok(Prepared { org, api, target })
    }

    async fn execute_wait(&self, args: &BuildArgs, lines: usize, notify: bool) -> Result<()> {
        let cancel = cancellation_token(args.timeout);
        let prepared = self.prepare(args, &cancel).await?;
        let notifier: Arc<dyn Notifier> = if notify {
            Arc::new(DesktopNotifier)
        } else {
            Arc::new(SilentNotifier)
        };

        let watcher = BuildWatcher::new(prepared.api, notifier).with_failure_lines(lines);
        let mut stdout = std::io::stdout();
        let build = watcher
            .wait(&prepared.target, &mut stdout, &cancel)
            .await
            .map_err(|e| interrupted(e, args.timeout))?;
        info!("Build #{} passed", build.number);
        Ok(())
    }

    async fn execute_open(&self, args: &BuildArgs) -> Result<()> {
        let cancel = cancellation_token(args.timeout);
        let prepared = self.prepare(args, &cancel).await?;

        let watcher = BuildWatcher::new(prepared.api, Arc::new(SilentNotifier));
        let mut stdout = std::io::stdout();
        let build = watcher
            .wait_for_commit(&prepared.target, &mut stdout, &cancel)
            .await
            .map_err(|e| interrupted(e, args.timeout))?;

        browser::open_url(Some(&prepared.org), &build.web_url)
            .with_context(|| format!("Failed to open {}", build.web_url))?;
        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Wait {
                build,
                lines,
                no_notify,
            } => {
                output::print_banner();
                self.execute_wait(build, *lines, !*no_notify).await
            }
            Commands::Open { build } => {
                output::print_banner();
                self.execute_open(build).await
            }
            Commands::Version => {
                println!("buildkite version {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// A token cancelled by Ctrl-C or once `timeout` elapses.
fn cancellation_token(timeout: Option<Duration>) -> CancellationToken {
    let cancel = CancellationToken::new();

    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            on_interrupt.cancel();
        }
    });

    if let Some(timeout) = timeout {
        let on_timeout = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!("Timed out after {}", humantime::format_duration(timeout));
            on_timeout.cancel();
        });
    }

    cancel
}

/// Names the timeout when it is what cancelled the wait.
fn interrupted(err: BuildkiteError, timeout: Option<Duration>) -> anyhow::Error {
    match (&err, timeout) {
        (BuildkiteError::Cancelled, Some(timeout)) => anyhow::Error::new(err).context(format!(
            "Gave up after {}",
            humantime::format_duration(timeout)
        )),
        _ => err.into(),
    }
}

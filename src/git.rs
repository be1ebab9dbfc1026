//! Local git metadata: current branch, remote URL and branch tips.

use log::debug;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{BuildkiteError, Result};
use crate::providers::buildkite::normalize_repo;

/// What the commands need to know about the local repository.
pub trait GitInfo {
    fn current_branch(&self) -> Result<String>;
    fn remote_url(&self, remote: &str) -> Result<String>;
    /// Commit SHA at the head of `branch`.
    fn tip(&self, branch: &str) -> Result<String>;
}

/// A repository on disk, queried through the `git` binary.
pub struct GitRepository {
    path: PathBuf,
}

impl GitRepository {
    pub fn current() -> Self {
        Self::at(".")
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn run_command(&self, args: &[&str]) -> Result<String> {
        debug!("$ git {}", args.join(" "));
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .output()
            .map_err(|e| BuildkiteError::Git(format!("Failed to execute git {}: {e}", args.join(" "))))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            return Err(BuildkiteError::Git(if message.is_empty() {
                format!("git {} exited with {}", args.join(" "), output.status)
            } else {
                message.to_string()
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl GitInfo for GitRepository {
    fn current_branch(&self) -> Result<String> {
        let branch = self.run_command(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if branch == "HEAD" {
            return Err(BuildkiteError::Git(
                "HEAD is detached, pass a branch name explicitly".to_string(),
            ));
        }
        Ok(branch)
    }

    fn remote_url(&self, remote: &str) -> Result<String> {
        self.run_command(&["config", "--get", &format!("remote.{remote}.url")])
            .map_err(|_| BuildkiteError::Git(format!("No URL configured for git remote {remote}")))
    }

    fn tip(&self, branch: &str) -> Result<String> {
        self.run_command(&["rev-parse", branch])
    }
}

/// A git remote split into `host/owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRemote {
    pub host: String,
    pub owner: String,
    pub repo: String,
}

impl GitRemote {
    /// Parses any remote URL form `normalize_repo` understands.
    ///
    /// Nested group paths such as `gitlab.com/group/sub/repo` keep the
    /// last segment as the repo and the one before it as the owner.
    pub fn parse(url: &str) -> Result<Self> {
        let normalized = normalize_repo(url);
        let mut segments = normalized.rsplit('/');
        let repo = segments.next().unwrap_or_default();
        let owner = segments.next().unwrap_or_default();
        let host = segments.last().unwrap_or_default();

        if host.is_empty() || owner.is_empty() || repo.is_empty() {
            return Err(BuildkiteError::Git(format!(
                "Could not parse git remote URL {url}"
            )));
        }

        Ok(Self {
            host: host.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

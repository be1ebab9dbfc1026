use async_trait::async_trait;

use crate::error::{BuildkiteError, Result};

use super::types::{Annotation, Build, Pipeline, PipelineSearchPage};

/// Number of builds fetched when looking for the latest one. The extra
/// builds give the watcher a previous build to compare against.
pub const RECENT_BUILDS: usize = 3;

/// The slice of the Buildkite API the watcher and resolver depend on.
#[async_trait]
pub trait BuildkiteApi: Send + Sync {
    /// Builds on `branch`, most recent first.
    async fn list_builds(
        &self,
        org: &str,
        pipeline: &str,
        branch: &str,
        per_page: usize,
    ) -> Result<Vec<Build>>;

    /// One page (up to 100) of the organization's pipelines.
    async fn list_pipelines(&self, org: &str, page: u32) -> Result<Vec<Pipeline>>;

    /// Whether the token can run GraphQL queries.
    async fn graphql_can(&self) -> Result<bool>;

    /// Pipelines matching `search`, as `(slug, repository url)` pairs.
    async fn search_pipelines(
        &self,
        org: &str,
        search: &str,
        cursor: Option<&str>,
    ) -> Result<PipelineSearchPage>;

    async fn annotations(&self, org: &str, pipeline: &str, build_number: u64)
        -> Result<Vec<Annotation>>;

    async fn raw_job_log(
        &self,
        org: &str,
        pipeline: &str,
        build_number: u64,
        job_id: &str,
    ) -> Result<Vec<u8>>;

    /// The most recent build on `branch`, or `NoBuilds` if there is none.
    async fn latest_build(&self, org: &str, pipeline: &str, branch: &str) -> Result<Build> {
        self.list_builds(org, pipeline, branch, RECENT_BUILDS)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BuildkiteError::NoBuilds {
                org: org.to_string(),
                pipeline: pipeline.to_string(),
                branch: branch.to_string(),
            })
    }
}

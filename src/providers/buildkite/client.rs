pub mod builds;
pub mod core;
pub mod graphql;
pub mod pipelines;

use async_trait::async_trait;

pub use self::core::BuildkiteClient;

use super::api::BuildkiteApi;
use super::types::{Annotation, Build, Pipeline, PipelineSearchPage};
use crate::error::Result;

#[async_trait]
impl BuildkiteApi for BuildkiteClient {
    async fn list_builds(
        &self,
        org: &str,
        pipeline: &str,
        branch: &str,
        per_page: usize,
    ) -> Result<Vec<Build>> {
        self.fetch_builds(org, pipeline, branch, per_page).await
    }

    async fn list_pipelines(&self, org: &str, page: u32) -> Result<Vec<Pipeline>> {
        self.fetch_pipelines(org, page).await
    }

    async fn graphql_can(&self) -> Result<bool> {
        self.can_query_graphql().await
    }

    async fn search_pipelines(
        &self,
        org: &str,
        search: &str,
        cursor: Option<&str>,
    ) -> Result<PipelineSearchPage> {
        self.search_pipelines_graphql(org, search, cursor).await
    }

    async fn annotations(
        &self,
        org: &str,
        pipeline: &str,
        build_number: u64,
    ) -> Result<Vec<Annotation>> {
        self.fetch_annotations(org, pipeline, build_number).await
    }

    async fn raw_job_log(
        &self,
        org: &str,
        pipeline: &str,
        build_number: u64,
        job_id: &str,
    ) -> Result<Vec<u8>> {
        self.fetch_raw_job_log(org, pipeline, build_number, job_id)
            .await
    }
}

use reqwest::header::ACCEPT;
use std::time::Duration;

use super::core::BuildkiteClient;
use crate::error::{BuildkiteError, Result};
use crate::providers::buildkite::types::{Annotation, Build};

/// Listing builds sits on the poll loop's hot path, so it gets a short deadline.
const LIST_BUILDS_TIMEOUT: Duration = Duration::from_secs(5);

fn build_path(org: &str, pipeline: &str, build_number: u64) -> String {
    format!(
        "organizations/{}/pipelines/{}/builds/{build_number}",
        urlencoding::encode(org),
        urlencoding::encode(pipeline)
    )
}

impl BuildkiteClient {
    /// Fetch the most recent builds of a pipeline on a branch, newest first.
    pub async fn fetch_builds(
        &self,
        org: &str,
        pipeline: &str,
        branch: &str,
        per_page: usize,
    ) -> Result<Vec<Build>> {
        let mut url = self.endpoint(&format!(
            "organizations/{}/pipelines/{}/builds",
            urlencoding::encode(org),
            urlencoding::encode(pipeline)
        ))?;
        url.query_pairs_mut()
            .append_pair("per_page", &per_page.to_string())
            .append_pair("branch", branch);

        self.get_json(url, Some(LIST_BUILDS_TIMEOUT)).await
    }

    pub async fn fetch_annotations(
        &self,
        org: &str,
        pipeline: &str,
        build_number: u64,
    ) -> Result<Vec<Annotation>> {
        let url = self.endpoint(&format!(
            "{}/annotations",
            build_path(org, pipeline, build_number)
        ))?;
        self.get_json(url, None).await
    }

    /// Fetch the raw text log of a job.
    pub async fn fetch_raw_job_log(
        &self,
        org: &str,
        pipeline: &str,
        build_number: u64,
        job_id: &str,
    ) -> Result<Vec<u8>> {
        let url = self.endpoint(&format!(
            "{}/jobs/{}/log",
            build_path(org, pipeline, build_number),
            urlencoding::encode(job_id)
        ))?;
        let request = self.client.get(url).header(ACCEPT, "text/plain");
        let response = self.send(request).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(BuildkiteError::from_request)?;
        Ok(bytes.to_vec())
    }
}

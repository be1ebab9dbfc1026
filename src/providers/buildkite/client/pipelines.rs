use super::core::BuildkiteClient;
use crate::error::Result;
use crate::providers::buildkite::types::Pipeline;

/// Largest page size the REST API accepts.
pub(crate) const PIPELINES_PAGE_SIZE: usize = 100;

impl BuildkiteClient {
    /// Fetch one page of an organization's pipelines.
    pub async fn fetch_pipelines(&self, org: &str, page: u32) -> Result<Vec<Pipeline>> {
        let mut url = self.endpoint(&format!(
            "organizations/{}/pipelines",
            urlencoding::encode(org)
        ))?;
        url.query_pairs_mut()
            .append_pair("per_page", &PIPELINES_PAGE_SIZE.to_string())
            .append_pair("page", &page.to_string());

        self.get_json(url, None).await
    }
}

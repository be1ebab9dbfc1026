use graphql_client::QueryBody;
use serde::{Deserialize, Serialize};

use super::core::BuildkiteClient;
use crate::error::{BuildkiteError, Result};
use crate::providers::buildkite::types::PipelineSearchPage;

const CAN_QUERY: &str = "query Can { __typename }";

const SEARCH_PIPELINES_QUERY: &str = r"query SearchPipelines($org: ID!, $first: Int!, $after: String, $search: String) {
  organization(slug: $org) {
    pipelines(first: $first, after: $after, order: RELEVANCE, search: $search) {
      pageInfo {
        hasNextPage
        endCursor
      }
      edges {
        node {
          slug
          repository {
            url
          }
        }
      }
    }
  }
}";

const SEARCH_PAGE_SIZE: i64 = 100;

#[derive(Serialize)]
struct NoVariables {}

#[derive(Deserialize)]
struct CanData {
    #[serde(rename = "__typename", default)]
    typename: String,
}

#[derive(Serialize)]
struct SearchVariables<'a> {
    org: &'a str,
    first: i64,
    after: Option<&'a str>,
    search: &'a str,
}

#[derive(Deserialize)]
struct SearchData {
    organization: Option<SearchOrganization>,
}

#[derive(Deserialize)]
struct SearchOrganization {
    pipelines: SearchConnection,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchConnection {
    page_info: PageInfo,
    #[serde(default)]
    edges: Vec<PipelineEdge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
struct PipelineEdge {
    node: PipelineNode,
}

#[derive(Deserialize)]
struct PipelineNode {
    slug: String,
    repository: Option<Repository>,
}

#[derive(Deserialize)]
struct Repository {
    url: String,
}

impl BuildkiteClient {
    /// Run a trivial query to learn whether this token may use GraphQL.
    pub async fn can_query_graphql(&self) -> Result<bool> {
        let body = QueryBody {
            variables: NoVariables {},
            query: CAN_QUERY,
            operation_name: "Can",
        };
        let data: CanData = self.execute_graphql_request(&body).await?;
        Ok(!data.typename.is_empty())
    }

    /// Fetch one page of pipelines whose name loosely matches `search`.
    pub async fn search_pipelines_graphql(
        &self,
        org: &str,
        search: &str,
        cursor: Option<&str>,
    ) -> Result<PipelineSearchPage> {
        let body = QueryBody {
            variables: SearchVariables {
                org,
                first: SEARCH_PAGE_SIZE,
                after: cursor,
                search,
            },
            query: SEARCH_PIPELINES_QUERY,
            operation_name: "SearchPipelines",
        };

        let data: SearchData = self.execute_graphql_request(&body).await?;
        let organization = data
            .organization
            .ok_or_else(|| BuildkiteError::NotFound(format!("organization {org}")))?;
        let connection = organization.pipelines;

        Ok(PipelineSearchPage {
            pipelines: connection
                .edges
                .into_iter()
                .filter_map(|edge| {
                    let url = edge.node.repository?.url;
                    Some((edge.node.slug, url))
                })
                .collect(),
            has_next_page: connection.page_info.has_next_page,
            end_cursor: connection.page_info.end_cursor,
        })
    }
}

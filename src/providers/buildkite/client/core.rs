use graphql_client::Response as GraphQLResponse;
use log::{debug, warn};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::auth::Token;
use crate::config::ApiConfig;
use crate::error::{BuildkiteError, ErrorKind, Result};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECONDS: u64 = 2;
const API_VERSION: &str = "v2/";

/// Buildkite error bodies look like `{"message": "Not Found"}`.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

pub struct BuildkiteClient {
    pub client: Client,
    pub rest_url: Url,
    pub graphql_url: Url,
    pub token: Option<Token>,
}

impl BuildkiteClient {
    pub fn new(api: &ApiConfig, token: Option<Token>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("buildkite-cli/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BuildkiteError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base = api.rest_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let rest_url = Url::parse(&base)
            .map_err(|e| BuildkiteError::Config(format!("Invalid base URL: {e}")))?
            .join(API_VERSION)
            .map_err(|e| BuildkiteError::Config(format!("Invalid API base URL: {e}")))?;

        let graphql_url = Url::parse(&api.graphql_url)
            .map_err(|e| BuildkiteError::Config(format!("Invalid GraphQL URL: {e}")))?;

        Ok(Self {
            client,
            rest_url,
            graphql_url,
            token,
        })
    }

    pub fn auth_request(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            request.bearer_auth(token.as_str())
        } else {
            request
        }
    }

    /// Resolves a REST path (relative to `/v2/`) to a full URL.
    pub(super) fn endpoint(&self, path: &str) -> Result<Url> {
        self.rest_url
            .join(path)
            .map_err(|e| BuildkiteError::Config(format!("Invalid API URL for {path}: {e}")))
    }

    /// Sends a request, mapping HTTP error statuses onto typed errors.
    pub(super) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = self
            .auth_request(request)
            .send()
            .await
            .map_err(BuildkiteError::from_request)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);

        debug!("Buildkite API returned {status}: {message}");

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BuildkiteError::NotFound(message));
        }
        Err(BuildkiteError::Api {
            status: status.as_u16(),
            message,
        })
    }

    pub(super) async fn get_json<T>(&self, url: Url, timeout: Option<Duration>) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut request = self.client.get(url);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = self.send(request).await?;
        response.json().await.map_err(BuildkiteError::from_request)
    }

    /// Execute a GraphQL request with retry on network errors and rate limits.
    /// Returns the data from the GraphQL response after checking for errors.
    pub(super) async fn execute_graphql_request<T>(
        &self,
        request_body: &impl serde::Serialize,
    ) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut retry_count = 0;
        loop {
            let request = self.client.post(self.graphql_url.clone()).json(request_body);

            let response = match self.send(request).await {
                Ok(resp) => resp,
                Err(e) if retry_count < MAX_RETRIES && is_retryable(&e) => {
                    warn!(
                        "GraphQL request failed ({e}), retrying in {RETRY_DELAY_SECONDS}s ({}/{MAX_RETRIES})...",
                        retry_count + 1
                    );
                    tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECONDS)).await;
                    retry_count += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let response_body: GraphQLResponse<T> =
                response.json().await.map_err(BuildkiteError::from_request)?;

            if let Some(errors) = response_body.errors {
                if !errors.is_empty() {
                    return Err(BuildkiteError::GraphQL {
                        query_type: std::any::type_name::<T>().to_string(),
                        errors: errors
                            .iter()
                            .map(|e| e.message.as_str())
                            .collect::<Vec<_>>()
                            .join(", "),
                    });
                }
            }

            return response_body.data.ok_or(BuildkiteError::NoResponseData);
        }
    }
}

fn is_retryable(err: &BuildkiteError) -> bool {
    match err {
        BuildkiteError::Api { status, .. } => *status == 429 || *status >= 500,
        other => other.kind() == ErrorKind::Transient,
    }
}

#[cfg(test)]
pub(super) fn test_client(server_url: &str) -> BuildkiteClient {
    let api = ApiConfig {
        rest_url: server_url.to_string(),
        graphql_url: format!("{server_url}/graphql"),
    };
    BuildkiteClient::new(&api, Some(Token::from("test-token"))).unwrap()
}

use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::api::BuildkiteApi;
use super::prober::probe;
use super::resolver::PipelineResolver;
use crate::config::OrgAliases;
use crate::error::{BuildkiteError, ErrorKind, Result};

/// Works out which pipeline builds a repository.
///
/// Most pipelines are named after their repository, so the repository name
/// is tried as a slug first. Only when that pipeline is missing or has no
/// builds on the branch does the resolver search the organization.
pub struct PipelineLocator {
    api: Arc<dyn BuildkiteApi>,
    resolver: PipelineResolver,
}

impl PipelineLocator {
    pub fn new(api: Arc<dyn BuildkiteApi>, aliases: OrgAliases) -> Self {
        let resolver = PipelineResolver::new(Arc::clone(&api), aliases);
        Self { api, resolver }
    }

    pub async fn locate(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let naive = tokio::select! {
            () = cancel.cancelled() => return Err(BuildkiteError::Cancelled),
            result = self.api.latest_build(org, repo, branch) => result,
        };

        match naive {
            Ok(_) => return Ok(repo.to_string()),
            Err(e) => match e.kind() {
                ErrorKind::NotFound | ErrorKind::NoBuilds => {
                    info!("Pipeline {org}/{repo} not usable ({e}), searching for candidates");
                }
                ErrorKind::Transient => {
                    warn!("Could not check pipeline {org}/{repo}: {e}");
                    return Ok(repo.to_string());
                }
                ErrorKind::Cancelled | ErrorKind::Fatal => return Err(e),
            },
        }

        let resolution = self.resolver.resolve(org, repo, cancel).await?;
        debug!("{} candidates: {:?}", resolution.strategy, resolution.candidates);

        tokio::select! {
            () = cancel.cancelled() => Err(BuildkiteError::Cancelled),
            slug = probe(self.api.as_ref(), org, repo, &resolution.candidates, branch) => slug,
        }
    }
}

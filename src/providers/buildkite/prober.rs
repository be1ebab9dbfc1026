use log::{debug, info};

use super::api::BuildkiteApi;
use super::types::ScoredCandidate;
use crate::error::{BuildkiteError, ErrorKind, Result};

/// Try ranked candidates in order and return the first slug with builds on `branch`.
///
/// Every error skips to the next candidate, not only `NoBuilds`, so an
/// auth failure on one pipeline does not hide a later one that works.
pub async fn probe(
    api: &dyn BuildkiteApi,
    org: &str,
    repo: &str,
    candidates: &[ScoredCandidate],
    branch: &str,
) -> Result<String> {
    for candidate in candidates {
        match api.latest_build(org, &candidate.slug, branch).await {
            Ok(build) => {
                info!(
                    "Using pipeline {org}/{} (score {}, latest build #{})",
                    candidate.slug, candidate.score, build.number
                );
                return Ok(candidate.slug.clone());
            }
            Err(e) if e.kind() == ErrorKind::NoBuilds => {
                debug!("{org}/{} has no builds on {branch}", candidate.slug);
            }
            Err(e) => {
                debug!("Skipping {org}/{}: {e}", candidate.slug);
            }
        }
    }

    Err(BuildkiteError::NoCandidateHasBuilds {
        org: org.to_string(),
        repo: repo.to_string(),
        branch: branch.to_string(),
    })
}

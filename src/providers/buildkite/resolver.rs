use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::api::BuildkiteApi;
use super::matching::score_candidate;
use super::types::ScoredCandidate;
use crate::config::OrgAliases;
use crate::error::{BuildkiteError, ErrorKind, Result};

/// The three ways of discovering pipelines that back a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// REST listing of the organization's pipelines.
    ListPipelines,
    /// GraphQL capability probe. Never yields candidates itself.
    GraphQLProbe,
    /// Paginated GraphQL pipeline search.
    SearchPipelines,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ListPipelines => "list pipelines",
            Self::GraphQLProbe => "graphql probe",
            Self::SearchPipelines => "search pipelines",
        })
    }
}

/// What a strategy task sends back when it finishes.
#[derive(Debug)]
pub enum StrategyReport {
    ListPipelines(Result<Vec<ScoredCandidate>>),
    GraphQLProbe(Result<bool>),
    SearchPipelines(Result<Vec<ScoredCandidate>>),
}

impl StrategyReport {
    pub fn strategy(&self) -> Strategy {
        match self {
            Self::ListPipelines(_) => Strategy::ListPipelines,
            Self::GraphQLProbe(_) => Strategy::GraphQLProbe,
            Self::SearchPipelines(_) => Strategy::SearchPipelines,
        }
    }
}

const STRATEGY_COUNT: usize = 3;

/// Decides the outcome of the race as reports arrive, in whatever order.
///
/// `record` returns the strategies whose tasks should be cancelled. The
/// arbiter never cancels anything itself so it can be tested without tasks.
#[derive(Debug, Default)]
pub struct RaceArbiter {
    search_revoked: bool,
    winner: Option<(Strategy, Vec<ScoredCandidate>)>,
    first_error: Option<BuildkiteError>,
    /// Strategies that can no longer produce candidates: those that errored,
    /// plus the search once GraphQL is found unusable.
    unsuccessful: HashSet<Strategy>,
}

impl RaceArbiter {
    pub fn record(&mut self, report: StrategyReport) -> Vec<Strategy> {
        let strategy = report.strategy();
        if let Some((winner, _)) = &self.winner {
            debug!("Ignoring {strategy} result, {winner} already won");
            return Vec::new();
        }

        match report {
            StrategyReport::ListPipelines(Ok(candidates)) if !candidates.is_empty() => {
                self.winner = Some((strategy, candidates));
                vec![Strategy::GraphQLProbe, Strategy::SearchPipelines]
            }
            StrategyReport::GraphQLProbe(Ok(true)) => Vec::new(),
            StrategyReport::GraphQLProbe(capable) => {
                if let Err(e) = capable {
                    self.record_error(strategy, e);
                }
                debug!("GraphQL search unavailable, discarding search results");
                self.search_revoked = true;
                self.unsuccessful.insert(Strategy::SearchPipelines);
                vec![Strategy::SearchPipelines]
            }
            StrategyReport::SearchPipelines(Ok(candidates)) if !candidates.is_empty() => {
                if self.search_revoked {
                    debug!("Rejecting {} search candidates", candidates.len());
                    return Vec::new();
                }
                self.winner = Some((strategy, candidates));
                vec![Strategy::ListPipelines, Strategy::GraphQLProbe]
            }
            StrategyReport::ListPipelines(Ok(_)) | StrategyReport::SearchPipelines(Ok(_)) => {
                debug!("{strategy} found no matching pipelines");
                Vec::new()
            }
            StrategyReport::ListPipelines(Err(e)) | StrategyReport::SearchPipelines(Err(e)) => {
                self.record_error(strategy, e);
                Vec::new()
            }
        }
    }

    fn record_error(&mut self, strategy: Strategy, err: BuildkiteError) {
        if err.kind() == ErrorKind::Cancelled {
            debug!("{strategy} cancelled");
            return;
        }
        warn!("Pipeline lookup via {strategy} failed: {err}");
        self.unsuccessful.insert(strategy);
        if self.first_error.is_none() {
            self.first_error = Some(err);
        }
    }

    pub fn winner(&self) -> Option<Strategy> {
        self.winner.as_ref().map(|(strategy, _)| *strategy)
    }

    /// Final candidates, or why there are none.
    ///
    /// Task errors only surface when no strategy succeeded. A search
    /// revoked by the capability probe counts as unsuccessful whether it
    /// had already failed or was cancelled.
    pub fn finish(self, org: &str, repo: &str) -> Result<(Strategy, Vec<ScoredCandidate>)> {
        if let Some(winner) = self.winner {
            return Ok(winner);
        }
        match self.first_error {
            Some(err) if self.unsuccessful.len() == STRATEGY_COUNT => Err(err),
            _ => Err(BuildkiteError::PipelineNotFound {
                org: org.to_string(),
                repo: repo.to_string(),
            }),
        }
    }
}

/// One child token per strategy, all derived from the caller's token.
struct StrategyTokens {
    list: CancellationToken,
    probe: CancellationToken,
    search: CancellationToken,
}

impl StrategyTokens {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            list: parent.child_token(),
            probe: parent.child_token(),
            search: parent.child_token(),
        }
    }

    fn get(&self, strategy: Strategy) -> &CancellationToken {
        match strategy {
            Strategy::ListPipelines => &self.list,
            Strategy::GraphQLProbe => &self.probe,
            Strategy::SearchPipelines => &self.search,
        }
    }
}

/// The candidates a resolution settled on, best first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub strategy: Strategy,
    pub candidates: Vec<ScoredCandidate>,
}

/// Finds pipelines whose repository matches a local repository.
pub struct PipelineResolver {
    api: Arc<dyn BuildkiteApi>,
    aliases: OrgAliases,
}

impl PipelineResolver {
    pub fn new(api: Arc<dyn BuildkiteApi>, aliases: OrgAliases) -> Self {
        Self { api, aliases }
    }

    /// Race the discovery strategies and return the winner's candidates.
    pub async fn resolve(
        &self,
        org: &str,
        repo: &str,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        let owner = self.aliases.repository_owner(org).to_string();
        info!("Searching {org} for pipelines built from {owner}/{repo}");

        let tokens = StrategyTokens::new(cancel);
        let (tx, mut rx) = mpsc::channel(1);
        let mut tasks = JoinSet::new();

        tasks.spawn(run_strategy(
            tokens.list.clone(),
            tx.clone(),
            StrategyReport::ListPipelines,
            list_candidates(
                Arc::clone(&self.api),
                org.to_string(),
                owner.clone(),
                repo.to_string(),
            ),
        ));
        tasks.spawn(run_strategy(
            tokens.probe.clone(),
            tx.clone(),
            StrategyReport::GraphQLProbe,
            probe_graphql(Arc::clone(&self.api)),
        ));
        tasks.spawn(run_strategy(
            tokens.search.clone(),
            tx,
            StrategyReport::SearchPipelines,
            search_candidates(
                Arc::clone(&self.api),
                org.to_string(),
                owner.clone(),
                repo.to_string(),
            ),
        ));

        // The channel closes once every task has sent its report and dropped
        // its sender.
        let mut arbiter = RaceArbiter::default();
        while let Some(report) = rx.recv().await {
            for strategy in arbiter.record(report) {
                tokens.get(strategy).cancel();
            }
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Pipeline lookup task aborted: {e}");
            }
        }

        if cancel.is_cancelled() && arbiter.winner().is_none() {
            return Err(BuildkiteError::Cancelled);
        }
        let (strategy, candidates) = arbiter.finish(org, repo)?;
        info!(
            "{strategy} found {} candidate pipeline(s) for {owner}/{repo}",
            candidates.len()
        );
        Ok(Resolution {
            strategy,
            candidates,
        })
    }
}

async fn run_strategy<T, F>(
    token: CancellationToken,
    tx: mpsc::Sender<StrategyReport>,
    report: fn(Result<T>) -> StrategyReport,
    work: F,
) where
    F: Future<Output = Result<T>>,
{
    let result = tokio::select! {
        () = token.cancelled() => Err(BuildkiteError::Cancelled),
        result = work => result,
    };
    // The receiver drains until every sender is gone, so this cannot fail.
    let _ = tx.send(report(result)).await;
}

async fn list_candidates(
    api: Arc<dyn BuildkiteApi>,
    org: String,
    owner: String,
    repo: String,
) -> Result<Vec<ScoredCandidate>> {
    // Only the first page is read.
    let pipelines = api.list_pipelines(&org, 1).await?;
    let scored = pipelines.into_iter().filter_map(|pipeline| {
        let url = pipeline.repository?;
        Some((pipeline.slug, url))
    });
    Ok(rank_candidates(&owner, &repo, scored))
}

async fn probe_graphql(api: Arc<dyn BuildkiteApi>) -> Result<bool> {
    api.graphql_can().await
}

async fn search_candidates(
    api: Arc<dyn BuildkiteApi>,
    org: String,
    owner: String,
    repo: String,
) -> Result<Vec<ScoredCandidate>> {
    let mut found = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = api.search_pipelines(&org, &repo, cursor.as_deref()).await?;
        found.extend(page.pipelines);
        match page.end_cursor {
            Some(next) if page.has_next_page => cursor = Some(next),
            _ => break,
        }
    }
    Ok(rank_candidates(&owner, &repo, found))
}

/// Score `(slug, repository url)` pairs against `owner/repo`, drop the
/// non-matches and sort best first.
///
/// Ties keep discovery order. A slug seen twice keeps its first score.
pub fn rank_candidates(
    owner: &str,
    repo: &str,
    pipelines: impl IntoIterator<Item = (String, String)>,
) -> Vec<ScoredCandidate> {
    let mut seen = HashSet::new();
    let mut candidates: Vec<ScoredCandidate> = pipelines
        .into_iter()
        .filter_map(|(slug, url)| {
            let score = score_candidate(owner, repo, &url);
            (score > 0).then_some(ScoredCandidate { slug, score })
        })
        .filter(|candidate| seen.insert(candidate.slug.clone()))
        .collect();
    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::buildkite::testing::{pipeline, Failure, MockApi, Reply};
    use crate::providers::buildkite::types::PipelineSearchPage;
    use std::time::Duration;

    fn candidate(slug: &str, score: u32) -> ScoredCandidate {
        ScoredCandidate {
            slug: slug.to_string(),
            score,
        }
    }

    fn search_page(pipelines: &[(&str, &str)], next: Option<&str>) -> PipelineSearchPage {
        PipelineSearchPage {
            pipelines: pipelines
                .iter()
                .map(|(slug, url)| (slug.to_string(), url.to_string()))
                .collect(),
            has_next_page: next.is_some(),
            end_cursor: next.map(str::to_string),
        }
    }

    #[test]
    fn test_list_win_cancels_others_and_ignores_late_results() {
        let mut arbiter = RaceArbiter::default();
        let cancel = arbiter.record(StrategyReport::ListPipelines(Ok(vec![candidate("a", 1000)])));
        assert_eq!(cancel, vec![Strategy::GraphQLProbe, Strategy::SearchPipelines]);

        let late = arbiter.record(StrategyReport::SearchPipelines(Ok(vec![candidate("c", 900)])));
        assert!(late.is_empty());
        assert!(arbiter.record(StrategyReport::GraphQLProbe(Ok(false))).is_empty());

        let (strategy, candidates) = arbiter.finish("acme", "widgets").unwrap();
        assert_eq!(strategy, Strategy::ListPipelines);
        assert_eq!(candidates, vec![candidate("a", 1000)]);
    }

    #[test]
    fn test_search_win_cancels_list_and_probe() {
        let mut arbiter = RaceArbiter::default();
        assert!(arbiter.record(StrategyReport::GraphQLProbe(Ok(true))).is_empty());
        let cancel = arbiter.record(StrategyReport::SearchPipelines(Ok(vec![candidate("c", 700)])));
        assert_eq!(cancel, vec![Strategy::ListPipelines, Strategy::GraphQLProbe]);
        assert!(arbiter
            .record(StrategyReport::ListPipelines(Ok(vec![candidate("a", 1000)])))
            .is_empty());

        let (strategy, candidates) = arbiter.finish("acme", "widgets").unwrap();
        assert_eq!(strategy, Strategy::SearchPipelines);
        assert_eq!(candidates, vec![candidate("c", 700)]);
    }

    #[test]
    fn test_search_results_rejected_after_probe_says_incapable() {
        let mut arbiter = RaceArbiter::default();
        let cancel = arbiter.record(StrategyReport::GraphQLProbe(Ok(false)));
        assert_eq!(cancel, vec![Strategy::SearchPipelines]);

        assert!(arbiter
            .record(StrategyReport::SearchPipelines(Ok(vec![candidate("c", 700)])))
            .is_empty());
        assert!(arbiter.record(StrategyReport::ListPipelines(Ok(vec![]))).is_empty());

        let err = arbiter.finish("acme", "widgets").unwrap_err();
        assert!(matches!(err, BuildkiteError::PipelineNotFound { .. }));
    }

    #[test]
    fn test_probe_error_revokes_search() {
        let mut arbiter = RaceArbiter::default();
        let cancel = arbiter.record(StrategyReport::GraphQLProbe(Err(BuildkiteError::Api {
            status: 403,
            message: "GraphQL is not enabled".into(),
        })));
        assert_eq!(cancel, vec![Strategy::SearchPipelines]);
        assert!(arbiter
            .record(StrategyReport::SearchPipelines(Ok(vec![candidate("c", 700)])))
            .is_empty());
        let cancel = arbiter.record(StrategyReport::ListPipelines(Ok(vec![candidate("a", 500)])));
        assert_eq!(cancel.len(), 2);
        assert_eq!(arbiter.winner(), Some(Strategy::ListPipelines));
    }

    #[test]
    fn test_errors_surface_only_when_every_task_failed() {
        let mut arbiter = RaceArbiter::default();
        arbiter.record(StrategyReport::ListPipelines(Err(BuildkiteError::Transient(
            "timeout".into(),
        ))));
        arbiter.record(StrategyReport::GraphQLProbe(Ok(true)));
        arbiter.record(StrategyReport::SearchPipelines(Ok(vec![])));
        assert!(matches!(
            arbiter.finish("acme", "widgets").unwrap_err(),
            BuildkiteError::PipelineNotFound { .. }
        ));

        let mut arbiter = RaceArbiter::default();
        arbiter.record(StrategyReport::ListPipelines(Err(BuildkiteError::Api {
            status: 401,
            message: "Authentication required".into(),
        })));
        arbiter.record(StrategyReport::GraphQLProbe(Err(BuildkiteError::NoResponseData)));
        arbiter.record(StrategyReport::SearchPipelines(Err(BuildkiteError::NoResponseData)));
        assert!(matches!(
            arbiter.finish("acme", "widgets").unwrap_err(),
            BuildkiteError::Api { status: 401, .. }
        ));
    }

    #[test]
    fn test_search_win_survives_later_incapable_probe() {
        let mut arbiter = RaceArbiter::default();
        let cancel = arbiter.record(StrategyReport::SearchPipelines(Ok(vec![candidate("c", 700)])));
        assert_eq!(cancel, vec![Strategy::ListPipelines, Strategy::GraphQLProbe]);
        assert!(arbiter.record(StrategyReport::GraphQLProbe(Ok(false))).is_empty());

        let (strategy, candidates) = arbiter.finish("acme", "widgets").unwrap();
        assert_eq!(strategy, Strategy::SearchPipelines);
        assert_eq!(candidates, vec![candidate("c", 700)]);
    }

    fn unauthorized() -> BuildkiteError {
        BuildkiteError::Api {
            status: 401,
            message: "Authentication required".into(),
        }
    }

    #[test]
    fn test_error_surfaces_whether_revoked_search_failed_or_was_cancelled() {
        // Search already failed when the probe revokes it.
        let mut arbiter = RaceArbiter::default();
        arbiter.record(StrategyReport::SearchPipelines(Err(unauthorized())));
        arbiter.record(StrategyReport::GraphQLProbe(Err(unauthorized())));
        arbiter.record(StrategyReport::ListPipelines(Err(unauthorized())));
        assert!(matches!(
            arbiter.finish("acme", "widgets").unwrap_err(),
            BuildkiteError::Api { status: 401, .. }
        ));

        // Search cancelled by the revocation.
        let mut arbiter = RaceArbiter::default();
        arbiter.record(StrategyReport::GraphQLProbe(Err(unauthorized())));
        arbiter.record(StrategyReport::SearchPipelines(Err(BuildkiteError::Cancelled)));
        arbiter.record(StrategyReport::ListPipelines(Err(unauthorized())));
        assert!(matches!(
            arbiter.finish("acme", "widgets").unwrap_err(),
            BuildkiteError::Api { status: 401, .. }
        ));
    }

    #[test]
    fn test_incapable_probe_is_not_a_failure() {
        let mut arbiter = RaceArbiter::default();
        arbiter.record(StrategyReport::GraphQLProbe(Ok(false)));
        arbiter.record(StrategyReport::SearchPipelines(Err(BuildkiteError::Cancelled)));
        arbiter.record(StrategyReport::ListPipelines(Err(unauthorized())));
        assert!(matches!(
            arbiter.finish("acme", "widgets").unwrap_err(),
            BuildkiteError::PipelineNotFound { .. }
        ));
    }

    #[test]
    fn test_rank_candidates_sorts_stably_and_drops_zero_scores() {
        let ranked = rank_candidates(
            "acme",
            "widgets",
            vec![
                ("unrelated".to_string(), "git@github.com:other/thing.git".to_string()),
                ("acme-widgets".to_string(), "git@github.com:acme/acme-widgets.git".to_string()),
                ("widgets".to_string(), "git@github.com:acme/widgets.git".to_string()),
                ("widgets-mirror".to_string(), "https://github.com/acme/widgets".to_string()),
                ("widgets".to_string(), "git@github.com:acme/widgets.git".to_string()),
            ],
        );
        let slugs: Vec<&str> = ranked.iter().map(|c| c.slug.as_str()).collect();
        assert_eq!(slugs, vec!["widgets", "widgets-mirror", "acme-widgets"]);
        assert_eq!(ranked[0].score, 1000);
        assert_eq!(ranked[1].score, 1000);
        assert!(ranked[2].score < 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_list_wins_and_cancels_pending_tasks() {
        let api = Arc::new(
            MockApi::new()
                .with_pipelines(Reply::After(
                    Duration::from_millis(100),
                    vec![pipeline("widgets", "git@github.com:acme/widgets.git")],
                ))
                .with_graphql_can(Reply::Never)
                .with_search_page(None, Reply::Never),
        );
        let resolver = PipelineResolver::new(api.clone(), OrgAliases::empty());

        let resolution = resolver
            .resolve("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.strategy, Strategy::ListPipelines);
        assert_eq!(resolution.candidates, vec![candidate("widgets", 1000)]);
        let mut dropped = api.dropped();
        dropped.sort_unstable();
        assert_eq!(dropped, vec!["graphql_can", "search_pipelines"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_search_wins_and_follows_cursors() {
        let api = Arc::new(
            MockApi::new()
                .with_pipelines(Reply::Never)
                .with_graphql_can(Reply::After(Duration::from_millis(10), true))
                .with_search_page(
                    None,
                    Reply::After(
                        Duration::from_millis(20),
                        search_page(&[("docs", "git@github.com:acme/docs.git")], Some("page-2")),
                    ),
                )
                .with_search_page(
                    Some("page-2"),
                    Reply::After(
                        Duration::from_millis(20),
                        search_page(&[("widgets", "git@github.com:acme/widgets.git")], None),
                    ),
                ),
        );
        let resolver = PipelineResolver::new(api.clone(), OrgAliases::empty());

        let resolution = resolver
            .resolve("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(resolution.strategy, Strategy::SearchPipelines);
        assert_eq!(resolution.candidates, vec![candidate("widgets", 1000)]);
        assert_eq!(api.dropped(), vec!["list_pipelines"]);
        assert!(api
            .calls()
            .contains(&"search_pipelines acme widgets Some(\"page-2\")".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_rejects_search_when_graphql_incapable() {
        let api = Arc::new(
            MockApi::new()
                .with_pipelines(Reply::After(Duration::from_millis(500), vec![]))
                .with_graphql_can(Reply::After(Duration::from_millis(10), false))
                .with_search_page(
                    None,
                    Reply::After(
                        Duration::from_millis(50),
                        search_page(&[("widgets", "git@github.com:acme/widgets.git")], None),
                    ),
                ),
        );
        let resolver = PipelineResolver::new(api.clone(), OrgAliases::empty());

        let err = resolver
            .resolve("acme", "widgets", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BuildkiteError::PipelineNotFound { .. }));
        assert_eq!(api.dropped(), vec!["search_pipelines"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_surfaces_error_regardless_of_search_timing() {
        // The search either fails before the probe or is still in flight when
        // the failed probe revokes it.
        for search in [Reply::Fail(Failure::Fatal), Reply::Never] {
            let api = Arc::new(
                MockApi::new()
                    .with_pipelines(Reply::FailAfter(Duration::from_millis(50), Failure::Fatal))
                    .with_graphql_can(Reply::FailAfter(Duration::from_millis(10), Failure::Fatal))
                    .with_search_page(None, search),
            );
            let resolver = PipelineResolver::new(api, OrgAliases::empty());

            let err = resolver
                .resolve("acme", "widgets", &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, BuildkiteError::Api { status: 401, .. }));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_scores_against_aliased_owner() {
        let api = Arc::new(
            MockApi::new()
                .with_pipelines(Reply::Ok(vec![pipeline(
                    "analytics",
                    "git@github.com:segmentio/analytics.git",
                )]))
                .with_graphql_can(Reply::Fail(Failure::Fatal)),
        );
        let resolver = PipelineResolver::new(api, OrgAliases::default());

        let resolution = resolver
            .resolve("segment", "analytics", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resolution.candidates, vec![candidate("analytics", 1000)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_returns_cancelled_when_parent_token_fires() {
        let api = Arc::new(
            MockApi::new()
                .with_pipelines(Reply::Never)
                .with_graphql_can(Reply::Never)
                .with_search_page(None, Reply::Never),
        );
        let resolver = PipelineResolver::new(api.clone(), OrgAliases::empty());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = resolver.resolve("acme", "widgets", &cancel).await.unwrap_err();
        assert!(matches!(err, BuildkiteError::Cancelled));
        assert_eq!(api.dropped().len(), 3);
    }
}

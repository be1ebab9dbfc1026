//! In-memory `BuildkiteApi` used by the resolver, prober and watcher tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::api::BuildkiteApi;
use super::types::{Annotation, Build, BuildState, Job, Pipeline, PipelineSearchPage};
use crate::error::{BuildkiteError, Result};

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotFound,
    Transient,
    Fatal,
}

impl Failure {
    fn into_error(self) -> BuildkiteError {
        match self {
            Self::NotFound => BuildkiteError::NotFound("Not Found".into()),
            Self::Transient => BuildkiteError::Transient("dial tcp: connection refused".into()),
            Self::Fatal => BuildkiteError::Api {
                status: 401,
                message: "Authentication required".into(),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    After(Duration, T),
    Fail(Failure),
    FailAfter(Duration, Failure),
    /// Never resolves; only cancellation ends it.
    Never,
}

/// Records the name of a pending call when its future is dropped early.
struct DropFlag {
    name: &'static str,
    completed: bool,
    dropped: Arc<Mutex<Vec<&'static str>>>,
}

impl Drop for DropFlag {
    fn drop(&mut self) {
        if !self.completed {
            self.dropped.lock().unwrap().push(self.name);
        }
    }
}

pub struct MockApi {
    builds: Mutex<HashMap<String, VecDeque<Reply<Vec<Build>>>>>,
    pipelines: Reply<Vec<Pipeline>>,
    can: Reply<bool>,
    search: HashMap<Option<String>, Reply<PipelineSearchPage>>,
    annotations: Reply<Vec<Annotation>>,
    job_log: Reply<Vec<u8>>,
    calls: Mutex<Vec<String>>,
    dropped: Arc<Mutex<Vec<&'static str>>>,
}

impl MockApi {
    pub fn new() -> Self {
        Self {
            builds: Mutex::new(HashMap::new()),
            pipelines: Reply::Ok(Vec::new()),
            can: Reply::Ok(true),
            search: HashMap::new(),
            annotations: Reply::Ok(Vec::new()),
            job_log: Reply::Fail(Failure::NotFound),
            calls: Mutex::new(Vec::new()),
            dropped: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replies for successive `list_builds` calls; the last one repeats.
    pub fn with_builds(self, pipeline: &str, replies: Vec<Reply<Vec<Build>>>) -> Self {
        self.builds
            .lock()
            .unwrap()
            .insert(pipeline.to_string(), replies.into());
        self
    }

    pub fn with_pipelines(mut self, reply: Reply<Vec<Pipeline>>) -> Self {
        self.pipelines = reply;
        self
    }

    pub fn with_graphql_can(mut self, reply: Reply<bool>) -> Self {
        self.can = reply;
        self
    }

    pub fn with_search_page(mut self, cursor: Option<&str>, reply: Reply<PipelineSearchPage>) -> Self {
        self.search.insert(cursor.map(str::to_string), reply);
        self
    }

    pub fn with_annotations(mut self, reply: Reply<Vec<Annotation>>) -> Self {
        self.annotations = reply;
        self
    }

    pub fn with_job_log(mut self, reply: Reply<Vec<u8>>) -> Self {
        self.job_log = reply;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls whose futures were dropped before they resolved.
    pub fn dropped(&self) -> Vec<&'static str> {
        self.dropped.lock().unwrap().clone()
    }

    async fn answer<T>(&self, name: &'static str, reply: Reply<T>) -> Result<T> {
        let mut flag = DropFlag {
            name,
            completed: false,
            dropped: Arc::clone(&self.dropped),
        };
        let result = match reply {
            Reply::Ok(value) => Ok(value),
            Reply::After(delay, value) => {
                tokio::time::sleep(delay).await;
                Ok(value)
            }
            Reply::Fail(failure) => Err(failure.into_error()),
            Reply::FailAfter(delay, failure) => {
                tokio::time::sleep(delay).await;
                Err(failure.into_error())
            }
            Reply::Never => std::future::pending().await,
        };
        flag.completed = true;
        result
    }
}

#[async_trait]
impl BuildkiteApi for MockApi {
    async fn list_builds(
        &self,
        org: &str,
        pipeline: &str,
        branch: &str,
        per_page: usize,
    ) -> Result<Vec<Build>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("list_builds {org}/{pipeline}@{branch} {per_page}"));
        let reply = {
            let mut builds = self.builds.lock().unwrap();
            match builds.get_mut(pipeline) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };
        let reply = reply.unwrap_or(Reply::Fail(Failure::NotFound));
        let builds = self.answer("list_builds", reply).await?;
        Ok(builds.into_iter().take(per_page).collect())
    }

    async fn list_pipelines(&self, org: &str, page: u32) -> Result<Vec<Pipeline>> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("list_pipelines {org} {page}"));
        self.answer("list_pipelines", self.pipelines.clone()).await
    }

    async fn graphql_can(&self) -> Result<bool> {
        self.calls.lock().unwrap().push("graphql_can".to_string());
        self.answer("graphql_can", self.can.clone()).await
    }

    async fn search_pipelines(
        &self,
        org: &str,
        search: &str,
        cursor: Option<&str>,
    ) -> Result<PipelineSearchPage> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("search_pipelines {org} {search} {cursor:?}"));
        let reply = self
            .search
            .get(&cursor.map(str::to_string))
            .cloned()
            .unwrap_or(Reply::Ok(PipelineSearchPage::default()));
        self.answer("search_pipelines", reply).await
    }

    async fn annotations(
        &self,
        _org: &str,
        _pipeline: &str,
        _build_number: u64,
    ) -> Result<Vec<Annotation>> {
        self.answer("annotations", self.annotations.clone()).await
    }

    async fn raw_job_log(
        &self,
        _org: &str,
        _pipeline: &str,
        _build_number: u64,
        job_id: &str,
    ) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(format!("raw_job_log {job_id}"));
        self.answer("raw_job_log", self.job_log.clone()).await
    }
}

pub fn pipeline(slug: &str, repository: &str) -> Pipeline {
    Pipeline {
        slug: slug.to_string(),
        name: None,
        repository: Some(repository.to_string()),
    }
}

pub fn build(
    number: u64,
    state: BuildState,
    commit: &str,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> Build {
    Build {
        number,
        state,
        branch: "main".to_string(),
        commit: commit.to_string(),
        message: None,
        web_url: format!("https://buildkite.com/acme/widgets/builds/{number}"),
        started_at,
        finished_at,
        jobs: Vec::new(),
        pipeline: None,
        pull_request: None,
    }
}

pub fn job(id: &str, name: &str, state: &str, seconds: i64, started_at: DateTime<Utc>) -> Job {
    Job {
        id: id.to_string(),
        name: Some(name.to_string()),
        state: Some(state.to_string()),
        started_at: Some(started_at),
        finished_at: Some(started_at + chrono::Duration::seconds(seconds)),
    }
}

mod api;
mod client;
mod failure;
mod locator;
mod matching;
mod prober;
mod resolver;
pub mod types;
mod watcher;

#[cfg(test)]
pub mod testing;

pub use api::BuildkiteApi;
pub use client::BuildkiteClient;
pub use locator::PipelineLocator;
pub use matching::normalize_repo;
pub use types::{Annotation, Build, BuildState, Job};
pub use watcher::{BuildTarget, BuildWatcher, DEFAULT_FAILURE_LINES};

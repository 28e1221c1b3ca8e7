//! In-memory registry shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ecr_audit::config::RunConfig;
use ecr_audit::error::ApiError;
use ecr_audit::report::RunMode;
use ecr_audit::resource::{Image, ImageDescription, Page, PolicyState, RegistryApi, Resource};
use ecr_audit::retry::RetryPolicy;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Which fake operation a scripted failure applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Keyed by 1-based page number
    ListRepositories,
    /// Keyed by repository name
    ListImages,
    /// Keyed by repository name
    DescribeImages,
    /// Keyed by repository name
    SetPolicyState,
    /// Keyed by ARN
    ListTags,
}

#[derive(Default)]
struct Script {
    /// Consumed one per call, then the call succeeds
    queued: VecDeque<ApiError>,
    /// Returned on every call once the queue is empty
    always: Option<ApiError>,
}

pub struct FakeRegistry {
    repositories: Mutex<Vec<Resource>>,
    images: HashMap<String, u64>,
    tags: HashMap<String, BTreeMap<String, String>>,
    page_size: usize,
    trailing_empty_page: bool,
    latency: Option<Duration>,
    mutation_latency: Option<Duration>,
    /// Cancelled from inside the first mutation call
    cancel_on_mutation: Option<CancellationToken>,
    /// Cancelled from inside the image listing of the named repository
    cancel_on_images: Option<(String, CancellationToken)>,
    scripts: Mutex<HashMap<(Op, String), Script>>,
    pub list_calls: AtomicUsize,
    pub image_calls: AtomicUsize,
    pub mutation_calls: AtomicUsize,
    pub tag_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    mutated: Mutex<Vec<String>>,
}

pub fn arn(name: &str) -> String {
    format!("arn:aws:ecr:eu-west-1:123456789012:repository/{name}")
}

pub fn repo(name: &str, state: PolicyState) -> Resource {
    Resource::new(name, arn(name), state)
}

impl FakeRegistry {
    /// Repositories in listing order, all with zero images
    pub fn new(repositories: Vec<Resource>) -> Self {
        Self {
            repositories: Mutex::new(repositories),
            images: HashMap::new(),
            tags: HashMap::new(),
            page_size: 2,
            trailing_empty_page: false,
            latency: None,
            mutation_latency: None,
            cancel_on_mutation: None,
            cancel_on_images: None,
            scripts: Mutex::new(HashMap::new()),
            list_calls: AtomicUsize::new(0),
            image_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
            tag_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            mutated: Mutex::new(Vec::new()),
        }
    }

    /// Mutable repositories named `names`
    pub fn with_names(names: &[&str]) -> Self {
        Self::new(
            names
                .iter()
                .map(|n| repo(n, PolicyState::Mutable))
                .collect(),
        )
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Hand out a token after the last full page, as some services do
    pub fn trailing_empty_page(mut self) -> Self {
        self.trailing_empty_page = true;
        self
    }

    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Delay every mutation call, e.g. to outlast the per-call deadline
    pub fn mutation_latency(mut self, latency: Duration) -> Self {
        self.mutation_latency = Some(latency);
        self
    }

    /// Cancel `token` while the first mutation is in flight; that call still succeeds
    pub fn cancel_on_mutation(mut self, token: CancellationToken) -> Self {
        self.cancel_on_mutation = Some(token);
        self
    }

    /// Cancel `token` while the images of `repository` are being listed
    pub fn cancel_on_images(mut self, repository: &str, token: CancellationToken) -> Self {
        self.cancel_on_images = Some((repository.to_string(), token));
        self
    }

    pub fn images(mut self, repository: &str, count: u64) -> Self {
        self.images.insert(repository.to_string(), count);
        self
    }

    pub fn tag(mut self, repository: &str, key: &str, value: &str) -> Self {
        self.tags
            .entry(arn(repository))
            .or_default()
            .insert(key.to_string(), value.to_string());
        self
    }

    /// Fail the next calls of `op` on `key` with `errors`, in order
    pub fn fail_times(self, op: Op, key: &str, errors: Vec<ApiError>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry((op, key.to_string()))
            .or_default()
            .queued
            .extend(errors);
        self
    }

    /// Fail every call of `op` on `key`
    pub fn fail_always(self, op: Op, key: &str, error: ApiError) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry((op, key.to_string()))
            .or_default()
            .always = Some(error);
        self
    }

    /// Names passed to a successful mutation, in call order
    pub fn mutated(&self) -> Vec<String> {
        self.mutated.lock().unwrap().clone()
    }

    pub fn state_of(&self, name: &str) -> Option<PolicyState> {
        self.repositories
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.policy_state.clone())
    }

    fn scripted(&self, op: Op, key: &str) -> Result<(), ApiError> {
        let mut scripts = self.scripts.lock().unwrap();
        let Some(script) = scripts.get_mut(&(op, key.to_string())) else {
            return Ok(());
        };
        if let Some(err) = script.queued.pop_front() {
            return Err(err);
        }
        match &script.always {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn cancel_if_listing(&self, repository: &str) {
        if let Some((name, token)) = &self.cancel_on_images {
            if name == repository {
                token.cancel();
            }
        }
    }

    /// Slice `items` at the offset encoded in `token`
    fn page_of<T: Clone>(&self, items: &[T], token: Option<String>) -> (usize, Page<T>) {
        let start: usize = token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let start = start.min(items.len());
        let end = (start + self.page_size).min(items.len());

        let more = end < items.len() || (self.trailing_empty_page && start < items.len());
        let next_token = more.then(|| end.to_string());

        (
            start / self.page_size + 1,
            Page::new(items[start..end].to_vec(), next_token),
        )
    }
}

#[async_trait]
impl RegistryApi for FakeRegistry {
    async fn list_repositories(
        &self,
        next_token: Option<String>,
        _page_size: Option<i32>,
    ) -> Result<Page<Resource>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let snapshot = self.repositories.lock().unwrap().clone();
        let (number, page) = self.page_of(&snapshot, next_token);
        self.scripted(Op::ListRepositories, &number.to_string())?;
        Ok(page)
    }

    async fn list_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        _page_size: Option<i32>,
    ) -> Result<Page<Image>, ApiError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_if_listing(repository);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.scripted(Op::ListImages, repository)?;

        let count = self.images.get(repository).copied().unwrap_or(0);
        let images: Vec<Image> = (0..count)
            .map(|i| Image {
                digest: format!("sha256:{i:064x}"),
                tag: Some(format!("v{i}")),
            })
            .collect();
        Ok(self.page_of(&images, next_token).1)
    }

    /// Image `i` is tagged `v{i}` and weighs `(i + 1) * 1000` bytes
    async fn describe_images(
        &self,
        repository: &str,
        next_token: Option<String>,
        _page_size: Option<i32>,
    ) -> Result<Page<ImageDescription>, ApiError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);
        self.cancel_if_listing(repository);
        self.scripted(Op::DescribeImages, repository)?;

        let count = self.images.get(repository).copied().unwrap_or(0);
        let images: Vec<ImageDescription> = (0..count)
            .map(|i| ImageDescription {
                digest: format!("sha256:{i:064x}"),
                tags: vec![format!("v{i}")],
                size_bytes: Some((i + 1) * 1000),
            })
            .collect();
        Ok(self.page_of(&images, next_token).1)
    }

    async fn set_policy_state(
        &self,
        repository: &str,
        state: &PolicyState,
    ) -> Result<PolicyState, ApiError> {
        let call = self.mutation_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(latency) = self.mutation_latency {
            tokio::time::sleep(latency).await;
        }
        if call == 1 {
            if let Some(token) = &self.cancel_on_mutation {
                token.cancel();
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
        self.scripted(Op::SetPolicyState, repository)?;

        let mut repositories = self.repositories.lock().unwrap();
        let Some(target) = repositories.iter_mut().find(|r| r.name == repository) else {
            return Err(ApiError::NotFound(format!(
                "The repository '{repository}' does not exist"
            )));
        };
        target.policy_state = state.clone();
        self.mutated.lock().unwrap().push(repository.to_string());
        Ok(state.clone())
    }

    async fn list_tags(&self, arn: &str) -> Result<BTreeMap<String, String>, ApiError> {
        self.tag_calls.fetch_add(1, Ordering::SeqCst);
        self.scripted(Op::ListTags, arn)?;
        Ok(self.tags.get(arn).cloned().unwrap_or_default())
    }
}

/// Retries without noticeable delays
pub fn fast_retry(max_retries: usize) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
        call_timeout: Duration::from_secs(5),
    }
}

pub fn inventory(pattern: &str) -> RunConfig {
    let mut config = RunConfig::new("eu-west-1", pattern, "default", false);
    config.retry = fast_retry(3);
    config
}

pub fn remediate(pattern: &str, dry_run: bool) -> RunConfig {
    let mut config =
        RunConfig::new("eu-west-1", pattern, "default", dry_run).with_mode(RunMode::Remediate);
    config.retry = fast_retry(3);
    config
}

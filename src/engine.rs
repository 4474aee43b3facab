//! Resolution pipeline.
//!
//! Runs once per incoming request against an immutable endpoint snapshot:
//!
//! ```text
//! Received -> Filtered -> Selected -> Interpolated -> Delayed -> Completed
//! ```
//!
//! Any failure jumps straight to `Completed` with a not-found result. The
//! only suspension points are the artificial delay and, in
//! [`ResolutionEngine::resolve_request`], the config fetch. Dropping the
//! returned future aborts the delay; a `cancelled` log record is still
//! emitted.

use crate::config::EngineSettings;
use crate::error::ConfigError;
use crate::log_sink::{truncate_body, LogSink, Outcome, RequestLog};
use crate::matcher::ConditionEvaluator;
use crate::model::{HeaderSet, MockEndpoint, ResponseCandidate};
use crate::regex_cache::RegexCache;
use crate::request::RequestView;
use crate::selector::{self, Selection, SelectionInconsistency};
use crate::store::{EndpointCache, EndpointStore};
use crate::template::TemplateEngine;
use chrono::Utc;
use dashmap::DashSet;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Body sent with a not-found result.
pub const NOT_FOUND_BODY: &str =
    r#"{"error":"not_found","message":"No matching response for this mock"}"#;

/// Bound on remembered configuration warnings before the set is reset.
const MAX_REMEMBERED_WARNINGS: usize = 10_000;

/// Pipeline stage, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Filtered,
    Selected,
    Interpolated,
    Delayed,
    Completed,
}

/// A response ready to be written to the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedResponse {
    pub status: u16,
    pub headers: HeaderSet,
    pub body: String,
}

/// Terminal value of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionResult {
    Served(ServedResponse),
    NotFound,
}

impl ResolutionResult {
    pub fn status(&self) -> u16 {
        match self {
            ResolutionResult::Served(response) => response.status,
            ResolutionResult::NotFound => 404,
        }
    }

    pub fn is_served(&self) -> bool {
        matches!(self, ResolutionResult::Served(_))
    }

    /// Status, headers and body bytes as they go on the wire.
    pub fn into_http_parts(self) -> (u16, HeaderSet, Vec<u8>) {
        match self {
            ResolutionResult::Served(response) => {
                (response.status, response.headers, response.body.into_bytes())
            }
            ResolutionResult::NotFound => {
                let mut headers = HeaderSet::new();
                headers.insert("Content-Type", "application/json");
                (404, headers, NOT_FOUND_BODY.as_bytes().to_vec())
            }
        }
    }
}

/// Everything the caller needs about one resolution.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub result: ResolutionResult,
    pub outcome: Outcome,
    pub candidate_id: Option<String>,
    pub latency: Duration,
    /// Why the request was not served, if it was not
    pub error: Option<String>,
}

/// Request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub requests_total: u64,
    pub served: u64,
    pub not_found: u64,
    pub cancelled: u64,
}

enum RandomSource {
    Entropy,
    Seeded(Mutex<StdRng>),
}

/// The mock response resolution engine.
///
/// Shared across all requests; every method takes `&self`.
pub struct ResolutionEngine {
    settings: Arc<EngineSettings>,
    regexes: Arc<RegexCache>,
    evaluator: ConditionEvaluator,
    templates: TemplateEngine,
    sink: Arc<dyn LogSink>,
    random: RandomSource,
    /// Configuration problems already reported
    warned: DashSet<String>,
    requests_total: AtomicU64,
    requests_served: AtomicU64,
    requests_not_found: AtomicU64,
    requests_cancelled: AtomicU64,
}

impl ResolutionEngine {
    /// Create an engine with its own regex cache.
    pub fn new(settings: EngineSettings, sink: Arc<dyn LogSink>) -> Self {
        let regexes = Arc::new(RegexCache::new(
            settings.regex_cache_capacity,
            settings.regex_size_limit,
            settings.regex_timeout(),
        ));
        Self::with_regex_cache(settings, regexes, sink)
    }

    /// Create an engine around an existing regex cache.
    pub fn with_regex_cache(
        settings: EngineSettings,
        regexes: Arc<RegexCache>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        debug!(
            regex_cache_capacity = settings.regex_cache_capacity,
            regex_timeout_ms = settings.regex_timeout_ms,
            max_delay_ms = settings.max_delay_ms,
            "Resolution engine initialized"
        );

        Self {
            settings: Arc::new(settings),
            evaluator: ConditionEvaluator::new(Arc::clone(&regexes)),
            regexes,
            templates: TemplateEngine::new(),
            sink,
            random: RandomSource::Entropy,
            warned: DashSet::new(),
            requests_total: AtomicU64::new(0),
            requests_served: AtomicU64::new(0),
            requests_not_found: AtomicU64::new(0),
            requests_cancelled: AtomicU64::new(0),
        }
    }

    /// Draw weighted selections from a seeded generator instead of the
    /// thread-local one, making selection sequences reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random = RandomSource::Seeded(Mutex::new(StdRng::seed_from_u64(seed)));
        self
    }

    pub fn settings(&self) -> &Arc<EngineSettings> {
        &self.settings
    }

    pub fn regex_cache(&self) -> &Arc<RegexCache> {
        &self.regexes
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            served: self.requests_served.load(Ordering::Relaxed),
            not_found: self.requests_not_found.load(Ordering::Relaxed),
            cancelled: self.requests_cancelled.load(Ordering::Relaxed),
        }
    }

    /// Resolve a request against an endpoint snapshot.
    pub async fn resolve(&self, view: &RequestView, endpoint: &MockEndpoint) -> Resolution {
        let mut run = InFlight::start(self, None, view);
        run.mock_id(&endpoint.id);
        self.run_pipeline(run, view, endpoint).await
    }

    /// Fetch the endpoint through the cache, then resolve. Config failures
    /// become a not-found resolution with outcome `config_error`.
    pub async fn resolve_request<S: EndpointStore>(
        &self,
        cache: &EndpointCache<S>,
        project_slug: &str,
        endpoint_path: &str,
        view: &RequestView,
    ) -> Resolution {
        let mut run = InFlight::start(self, Some(project_slug), view);

        match cache.get(project_slug, view.method(), endpoint_path).await {
            Ok(endpoint) => {
                run.mock_id(&endpoint.id);
                self.run_pipeline(run, view, &endpoint).await
            }
            Err(e) => {
                debug!(project = %project_slug, path = %endpoint_path, error = %e, "Endpoint config unavailable");
                run.finish(ResolutionResult::NotFound, Outcome::ConfigError, None, Some(e.to_string()))
            }
        }
    }

    async fn run_pipeline(
        &self,
        mut run: InFlight<'_>,
        view: &RequestView,
        endpoint: &MockEndpoint,
    ) -> Resolution {
        let deadline = tokio::time::Instant::from_std(run.started) + self.settings.pipeline_budget();

        if !endpoint.is_active {
            let error = ConfigError::Inactive(endpoint.id.clone());
            return run.finish(
                ResolutionResult::NotFound,
                Outcome::ConfigError,
                None,
                Some(error.to_string()),
            );
        }

        let matching = self.evaluator.filter_matching(&endpoint.candidates, view);
        run.advance(Stage::Filtered);

        let compute_budget = Duration::from_millis(self.settings.compute_budget_ms);
        if run.started.elapsed() > compute_budget {
            warn!(
                mock_id = %endpoint.id,
                budget_ms = self.settings.compute_budget_ms,
                "Condition evaluation exceeded its time budget"
            );
            return run.finish(
                ResolutionResult::NotFound,
                Outcome::BudgetExceeded,
                None,
                Some("compute time budget exceeded".to_string()),
            );
        }

        let (selection, inconsistency) = self.select(endpoint, &matching);
        if let Some(inconsistency) = inconsistency {
            self.report_inconsistency(endpoint, &inconsistency);
        }
        run.advance(Stage::Selected);

        let (candidate, outcome) = match selection {
            Selection::Matched(candidate) => (candidate, Outcome::Matched),
            Selection::Default(candidate) => (candidate, Outcome::Default),
            Selection::NotFound => {
                debug!(mock_id = %endpoint.id, method = %view.method(), path = %view.path(), "No matching response");
                return run.finish(ResolutionResult::NotFound, Outcome::NoMatch, None, None);
            }
        };

        let response = self.render(endpoint, candidate);
        run.advance(Stage::Interpolated);

        let delay = endpoint
            .delay
            .min(Duration::from_millis(self.settings.max_delay_ms));
        if !delay.is_zero() {
            debug!(mock_id = %endpoint.id, delay_ms = delay.as_millis() as u64, "Applying delay");
            if tokio::time::timeout_at(deadline, tokio::time::sleep(delay))
                .await
                .is_err()
            {
                warn!(
                    mock_id = %endpoint.id,
                    budget_ms = self.settings.pipeline_budget().as_millis() as u64,
                    "Resolution exceeded its time budget"
                );
                return run.finish(
                    ResolutionResult::NotFound,
                    Outcome::BudgetExceeded,
                    Some(candidate.id.clone()),
                    Some("pipeline time budget exceeded".to_string()),
                );
            }
        }
        run.advance(Stage::Delayed);

        run.finish(
            ResolutionResult::Served(response),
            outcome,
            Some(candidate.id.clone()),
            None,
        )
    }

    fn select<'a>(
        &self,
        endpoint: &'a MockEndpoint,
        matching: &[&'a ResponseCandidate],
    ) -> (Selection<'a>, Option<SelectionInconsistency>) {
        match &self.random {
            RandomSource::Entropy => selector::select(endpoint, matching, &mut rand::thread_rng()),
            RandomSource::Seeded(rng) => {
                let mut rng = rng.lock().unwrap_or_else(PoisonError::into_inner);
                selector::select(endpoint, matching, &mut *rng)
            }
        }
    }

    /// Interpolate the candidate and merge its headers over the defaults.
    fn render(&self, endpoint: &MockEndpoint, candidate: &ResponseCandidate) -> ServedResponse {
        let (body, candidate_headers) = self
            .templates
            .interpolate(&candidate.body, &candidate.headers);

        let mut headers = HeaderSet::new();
        headers.insert("Content-Type", endpoint.content_type.as_str());
        for (name, value) in candidate_headers.iter() {
            headers.insert(name, value);
        }

        ServedResponse {
            status: candidate.status,
            headers,
            body,
        }
    }

    /// Warn once per distinct problem per endpoint.
    fn report_inconsistency(&self, endpoint: &MockEndpoint, inconsistency: &SelectionInconsistency) {
        let key = match inconsistency {
            SelectionInconsistency::NoDefault => format!("{}:no-default", endpoint.id),
            SelectionInconsistency::MultipleDefaults { chosen, ignored } => {
                format!("{}:defaults:{}:{}", endpoint.id, chosen, ignored.join(","))
            }
        };

        if self.warned.len() >= MAX_REMEMBERED_WARNINGS {
            self.warned.clear();
        }
        if !self.warned.insert(key) {
            return;
        }

        match inconsistency {
            SelectionInconsistency::NoDefault => warn!(
                mock_id = %endpoint.id,
                "Request matched no response and the endpoint has no default"
            ),
            SelectionInconsistency::MultipleDefaults { chosen, ignored } => warn!(
                mock_id = %endpoint.id,
                chosen = %chosen,
                ignored = ?ignored,
                "Endpoint has more than one default response, using the earliest"
            ),
        }
    }
}

/// A resolution in progress. If dropped before [`InFlight::finish`], the
/// caller went away: a `cancelled` record is emitted.
struct InFlight<'e> {
    engine: &'e ResolutionEngine,
    started: Instant,
    stage: Stage,
    record: Option<RequestLog>,
}

impl<'e> InFlight<'e> {
    fn start(engine: &'e ResolutionEngine, project: Option<&str>, view: &RequestView) -> Self {
        engine.requests_total.fetch_add(1, Ordering::Relaxed);

        let record = RequestLog {
            mock_id: None,
            project_slug: project.map(str::to_string),
            method: view.method().to_string(),
            path: view.path().to_string(),
            query: view.query_string().to_string(),
            matched_candidate_id: None,
            status_code: None,
            latency_ms: 0,
            outcome: Outcome::Cancelled,
            error: None,
            user_agent: view.header("user-agent").map(str::to_string),
            remote_addr: view.remote_addr().map(str::to_string),
            request_headers: view
                .headers()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            request_body: Some(view.body_text())
                .filter(|body| !body.is_empty())
                .map(truncate_body),
            timestamp: Utc::now(),
        };

        Self {
            engine,
            started: Instant::now(),
            stage: Stage::Received,
            record: Some(record),
        }
    }

    fn mock_id(&mut self, id: &str) {
        if let Some(record) = self.record.as_mut() {
            record.mock_id = Some(id.to_string());
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug_assert!(stage > self.stage);
        self.stage = stage;
    }

    fn finish(
        mut self,
        result: ResolutionResult,
        outcome: Outcome,
        candidate_id: Option<String>,
        error: Option<String>,
    ) -> Resolution {
        self.stage = Stage::Completed;
        let latency = self.started.elapsed();

        if result.is_served() {
            self.engine.requests_served.fetch_add(1, Ordering::Relaxed);
        } else {
            self.engine.requests_not_found.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(mut record) = self.record.take() {
            record.matched_candidate_id = candidate_id.clone();
            record.status_code = Some(result.status());
            record.latency_ms = latency.as_millis() as u64;
            record.outcome = outcome;
            record.error = error.clone();
            self.engine.sink.emit(record);
        }

        Resolution {
            result,
            outcome,
            candidate_id,
            latency,
            error,
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            self.engine
                .requests_cancelled
                .fetch_add(1, Ordering::Relaxed);
            record.latency_ms = self.started.elapsed().as_millis() as u64;
            record.error = Some(format!("cancelled during {:?}", self.stage));
            debug!(path = %record.path, stage = ?self.stage, "Resolution cancelled");
            self.engine.sink.emit(record);
        }
    }
}

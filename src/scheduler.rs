//! Validation of identifiers against their portals.
//!
//! Per endpoint: re-check the known-good identifier first, then hand the
//! remaining candidates to a fixed pool of workers pulling from one shared
//! queue. With exhaustive mode off, the first `SUCCESS` stops the queue;
//! attempts already running finish and keep their real result, everything
//! still queued is recorded as `SKIPPED`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::classifier;
use crate::config::CheckerConfig;
use crate::model::{CheckOutcome, Endpoint, Identifier, Status, StatusCounts};
use crate::player::StreamProbe;
use crate::session::{Portal, PortalFactory};
use crate::store::{CredentialStore, StoreError, StoreResult};

/// Bounds on the work spent on one identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanLimits {
    /// Random channel samples per relevant genre
    pub samples_per_genre: usize,
    /// Relevant genres examined before giving up with `CONTENT`
    pub max_relevant_genres: usize,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            samples_per_genre: 3,
            max_relevant_genres: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerSettings {
    pub pool_width: usize,
    pub exhaustive: bool,
    pub limits: ScanLimits,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pool_width: 10,
            exhaustive: false,
            limits: ScanLimits::default(),
        }
    }
}

impl SchedulerSettings {
    pub fn from_config(config: &CheckerConfig) -> Self {
        Self {
            pool_width: config.pool_width.max(1),
            exhaustive: config.exhaustive,
            limits: ScanLimits {
                samples_per_genre: config.samples_per_genre.max(1),
                max_relevant_genres: config.max_relevant_genres.max(1),
            },
        }
    }
}

/// Runs the full login → genres → channels → probe pass for one identifier.
///
/// Never fails: every protocol error is folded into the returned outcome.
pub async fn check_identifier(
    portal: &mut dyn Portal,
    probe: &dyn StreamProbe,
    limits: &ScanLimits,
) -> CheckOutcome {
    if let Err(e) = portal.login().await {
        return CheckOutcome::new(e.status(), e.to_string());
    }

    let genres = match portal.list_genres().await {
        Ok(genres) if !genres.is_empty() => genres,
        Ok(_) => return CheckOutcome::new(Status::Content, "Portal returned no genres"),
        Err(e) => return CheckOutcome::new(Status::Content, e.to_string()),
    };

    let region_match = genres.iter().any(|g| g.is_region_match());
    let category_match = genres.iter().any(|g| g.is_adult_category);
    let finish = |status: Status, message: String| {
        CheckOutcome::new(status, message).with_flags(region_match, category_match)
    };

    let mut relevant_seen = 0usize;
    let mut last: Option<(Status, String)> = None;

    for genre in genres.iter().filter(|g| g.is_relevant()) {
        relevant_seen += 1;
        if relevant_seen > limits.max_relevant_genres {
            return finish(
                Status::Content,
                format!(
                    "No working channel in the first {} relevant genres",
                    limits.max_relevant_genres
                ),
            );
        }
        debug!(
            genre = %genre.name,
            label = classifier::relevance_label(&genre.name),
            "scanning genre"
        );

        let channels = match portal.list_channels(genre).await {
            Ok(channels) => channels,
            Err(e) => {
                last = Some((e.status(), e.to_string()));
                continue;
            }
        };
        if channels.is_empty() {
            last = Some((
                Status::Content,
                format!("Genre '{}' has no channels", genre.name),
            ));
            continue;
        }

        for index in classifier::sample_indices(channels.len(), limits.samples_per_genre) {
            let mut channel = channels[index].clone();
            let url = match portal.resolve_stream(&mut channel).await {
                Ok(url) => url,
                Err(e) => {
                    last = Some((e.status(), e.to_string()));
                    continue;
                }
            };
            if probe.is_playable(&url).await {
                return finish(
                    Status::Success,
                    format!("Channel '{}' in '{}' is playable", channel.name, genre.name),
                );
            }
            last = Some((
                Status::Error,
                format!("Channel '{}' is not playable", channel.name),
            ));
        }
    }

    if relevant_seen == 0 {
        return finish(Status::Content, "No relevant genre in catalog".to_string());
    }
    match last {
        Some((status, message)) => finish(status, message),
        None => finish(Status::Content, "No working channel found".to_string()),
    }
}

/// Result of one identifier attempt, as aggregated by the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub identifier_id: i64,
    pub identifier: String,
    pub outcome: CheckOutcome,
}

#[derive(Debug, Clone, Default)]
pub struct EndpointSummary {
    pub endpoint: String,
    pub counts: StatusCounts,
    pub reports: Vec<CheckReport>,
}

impl EndpointSummary {
    pub fn has_success(&self) -> bool {
        self.counts.success > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub endpoints: Vec<EndpointSummary>,
    pub counts: StatusCounts,
}

impl RunSummary {
    pub fn working_endpoints(&self) -> usize {
        self.endpoints.iter().filter(|e| e.has_success()).count()
    }
}

pub struct ValidationScheduler {
    store: Arc<dyn CredentialStore>,
    portals: Arc<dyn PortalFactory>,
    probe: Arc<dyn StreamProbe>,
    settings: SchedulerSettings,
}

impl ValidationScheduler {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        portals: Arc<dyn PortalFactory>,
        probe: Arc<dyn StreamProbe>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            portals,
            probe,
            settings,
        }
    }

    /// Checks every endpoint in the store, one endpoint at a time.
    pub async fn run(&self) -> StoreResult<RunSummary> {
        let endpoints = on_store(&self.store, |store| store.list_endpoints()).await?;
        self.run_endpoints(&endpoints).await
    }

    pub async fn run_endpoints(&self, endpoints: &[Endpoint]) -> StoreResult<RunSummary> {
        info!(
            "Checking {} endpoints with {} workers{}",
            endpoints.len(),
            self.settings.pool_width,
            if self.settings.exhaustive { " (exhaustive)" } else { "" }
        );
        let mut summary = RunSummary::default();

        for (i, endpoint) in endpoints.iter().enumerate() {
            info!("[{}/{}] Endpoint {}", i + 1, endpoints.len(), endpoint.url);
            let result = self.check_endpoint(endpoint).await?;
            summary.counts.merge(&result.counts);
            info!("Endpoint {} done: {}", endpoint.url, result.counts);
            info!(
                "Running total: {} ({}/{} endpoints working)",
                summary.counts,
                summary.working_endpoints() + usize::from(result.has_success()),
                i + 1
            );
            summary.endpoints.push(result);
        }

        Ok(summary)
    }

    pub async fn check_endpoint(&self, endpoint: &Endpoint) -> StoreResult<EndpointSummary> {
        let mut summary = EndpointSummary {
            endpoint: endpoint.url.clone(),
            ..Default::default()
        };

        // Sequential pre-step: the last identifier that worked is the cheapest bet.
        let ep = endpoint.clone();
        let known_good = on_store(&self.store, move |store| store.known_good_identifier(&ep)).await?;
        let mut found = false;
        if let Some(ident) = &known_good {
            info!("Re-checking known-good identifier {}", ident.value);
            let outcome = attempt(
                self.portals.clone(),
                self.probe.clone(),
                self.settings.limits,
                &endpoint.url,
                ident,
            )
            .await;
            let report = record(&self.store, ident, outcome).await;
            found = report.outcome.status == Status::Success;
            summary.counts.add(report.outcome.status);
            summary.reports.push(report);
        }

        let ep = endpoint.clone();
        let candidates: Vec<Identifier> =
            on_store(&self.store, move |store| store.list_candidates(&ep))
                .await?
                .into_iter()
                .filter(|c| known_good.as_ref().map(|k| k.id != c.id).unwrap_or(true))
                .collect();

        let reports = if found && !self.settings.exhaustive {
            self.skip_all(candidates).await
        } else {
            self.run_pool(endpoint, candidates).await
        };
        for report in reports {
            summary.counts.add(report.outcome.status);
            summary.reports.push(report);
        }
        Ok(summary)
    }

    async fn skip_all(&self, identifiers: Vec<Identifier>) -> Vec<CheckReport> {
        let mut reports = Vec::with_capacity(identifiers.len());
        for ident in &identifiers {
            reports.push(record(&self.store, ident, CheckOutcome::skipped()).await);
        }
        reports
    }

    /// Fixed set of long-lived workers draining one queue of disjoint candidates.
    ///
    /// The stop flag is only read and written under the queue lock, so no
    /// candidate is popped after the first success has landed.
    async fn run_pool(&self, endpoint: &Endpoint, candidates: Vec<Identifier>) -> Vec<CheckReport> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let total = candidates.len();
        let queue = Arc::new(Mutex::new(VecDeque::from(candidates)));
        let stop = Arc::new(AtomicBool::new(false));
        let width = self.settings.pool_width.max(1).min(total);
        debug!("Dispatching {} candidates to {} workers", total, width);

        let mut workers = JoinSet::new();
        for worker_id in 0..width {
            let queue = queue.clone();
            let stop = stop.clone();
            let store = self.store.clone();
            let portals = self.portals.clone();
            let probe = self.probe.clone();
            let limits = self.settings.limits;
            let exhaustive = self.settings.exhaustive;
            let endpoint_url = endpoint.url.clone();

            workers.spawn(async move {
                let mut reports = Vec::new();
                loop {
                    let next = match queue.lock() {
                        Ok(mut q) if !stop.load(Ordering::SeqCst) => q.pop_front(),
                        _ => None,
                    };
                    let Some(ident) = next else { break };

                    debug!(worker_id, identifier = %ident.value, "picked candidate");
                    let outcome =
                        attempt(portals.clone(), probe.clone(), limits, &endpoint_url, &ident)
                            .await;
                    // Checked when the result lands, not when it was dispatched.
                    if outcome.status == Status::Success && !exhaustive {
                        let _guard = queue.lock();
                        stop.store(true, Ordering::SeqCst);
                    }
                    reports.push(record(&store, &ident, outcome).await);
                }
                reports
            });
        }

        let mut reports = Vec::with_capacity(total);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(mut done) => reports.append(&mut done),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        let leftover: Vec<Identifier> = match queue.lock() {
            Ok(mut q) => q.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        reports.extend(self.skip_all(leftover).await);
        reports
    }
}

/// One isolated attempt: the check runs in its own task so a panic only
/// costs this identifier, recorded as `ERROR`.
async fn attempt(
    portals: Arc<dyn PortalFactory>,
    probe: Arc<dyn StreamProbe>,
    limits: ScanLimits,
    endpoint_url: &str,
    ident: &Identifier,
) -> CheckOutcome {
    let url = endpoint_url.to_string();
    let value = ident.value.clone();
    let task = tokio::spawn(async move {
        let mut portal = portals.open(&url, &value);
        check_identifier(portal.as_mut(), probe.as_ref(), &limits).await
    });

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(e) => CheckOutcome::new(Status::Error, format!("Validation task crashed: {}", e)),
    };
    info!(
        identifier = %ident.value,
        status = %outcome.status,
        "{}",
        outcome.message
    );
    outcome
}

/// Writes the outcome back; a failed write is logged and the run goes on.
async fn record(
    store: &Arc<dyn CredentialStore>,
    ident: &Identifier,
    outcome: CheckOutcome,
) -> CheckReport {
    let id = ident.id;
    let written = outcome.clone();
    if let Err(e) = on_store(store, move |store| store.record_status(id, &written)).await {
        warn!(
            "Failed to record {} for identifier {}: {}",
            outcome.status, ident.value, e
        );
    }
    CheckReport {
        identifier_id: ident.id,
        identifier: ident.value.clone(),
        outcome,
    }
}

/// SQLite calls block, so they run on the blocking pool.
async fn on_store<T, F>(store: &Arc<dyn CredentialStore>, call: F) -> StoreResult<T>
where
    T: Send + 'static,
    F: FnOnce(&dyn CredentialStore) -> StoreResult<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || call(store.as_ref()))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

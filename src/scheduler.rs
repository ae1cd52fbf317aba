// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation scheduling: per-zone single-flight, priority-ordered
//! fair worker fan-out, and rate-limited requeue.
//!
//! Work items are `(provider, zone)` pairs drained by a fixed pool of
//! worker tasks from a ready queue ordered by provider priority, arrival
//! order within a priority. A zone has at most one reconciliation in
//! flight; requeues arriving while it runs coalesce into a single dirty
//! flag. Failures requeue through a due-time [`Schedule`] with exponential
//! backoff; throttled failures back off at least twice as hard.

use crate::cache::ZoneCache;
use crate::errors::ProviderError;
use crate::metrics;
use crate::plan::{plan_zone, PlanContext};
use crate::provider::DnsHandler;
use crate::ratelimit::FailureBackoff;
use crate::resources::{policy_for, Entry, HostedZonePolicy};
use crate::zones::ZoneId;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Scheduler work key: one zone of one provider account.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkKey {
    /// Stable hash of the provider account
    pub account: String,
    pub zone: ZoneId,
}

/// Hash a provider account into a stable work-key component.
#[must_use]
pub fn account_hash(provider_name: &str, kind: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider_name.as_bytes());
    hasher.update(b"/");
    hasher.update(kind.as_bytes());
    let digest = hasher.finalize();
    format!("{digest:x}")[..16].to_string()
}

// ============================================================================
// Due-time schedule
// ============================================================================

struct ScheduleState<K> {
    queue: BTreeMap<(Instant, u64), K>,
    keys: HashMap<K, (Instant, u64)>,
    seq: u64,
}

/// Priority queue keyed by due time.
///
/// Insertion, relocation (earlier or later) and deletion are O(log n); a
/// single timer in [`Schedule::run`] always sleeps until the earliest
/// entry, and every due entry is dispatched when it fires.
pub struct Schedule<K> {
    state: StdMutex<ScheduleState<K>>,
    notify: Notify,
}

impl<K: Clone + Eq + Hash + Ord> Schedule<K> {
    #[must_use]
    pub fn new() -> Self {
        Schedule {
            state: StdMutex::new(ScheduleState {
                queue: BTreeMap::new(),
                keys: HashMap::new(),
                seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Insert a key or move an existing one to the new due time.
    pub fn schedule_at(&self, key: K, due: Instant) {
        {
            let mut state = self.state.lock().expect("schedule lock");
            if let Some(slot) = state.keys.remove(&key) {
                state.queue.remove(&slot);
            }
            state.seq += 1;
            let slot = (due, state.seq);
            state.queue.insert(slot, key.clone());
            state.keys.insert(key, slot);
        }
        self.notify.notify_one();
    }

    /// Remove a key; returns whether it was scheduled.
    pub fn cancel(&self, key: &K) -> bool {
        let removed = {
            let mut state = self.state.lock().expect("schedule lock");
            match state.keys.remove(key) {
                Some(slot) => state.queue.remove(&slot).is_some(),
                None => false,
            }
        };
        if removed {
            self.notify.notify_one();
        }
        removed
    }

    /// The earliest due time, if any entry is scheduled.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        let state = self.state.lock().expect("schedule lock");
        state.queue.keys().next().map(|(due, _)| *due)
    }

    /// Remove and return every entry due at `now` or earlier.
    #[must_use]
    pub fn pop_due(&self, now: Instant) -> Vec<K> {
        let mut state = self.state.lock().expect("schedule lock");
        let mut due = Vec::new();
        while let Some(((first_due, _), _)) = state.queue.first_key_value() {
            if *first_due > now {
                break;
            }
            let (_, key) = state.queue.pop_first().expect("non-empty queue");
            state.keys.remove(&key);
            due.push(key);
        }
        due
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("schedule lock").queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drive the single timer, dispatching due keys until shutdown.
    pub async fn run<F>(&self, mut shutdown: watch::Receiver<bool>, dispatch: F)
    where
        F: Fn(K),
    {
        loop {
            let sleep_until = self
                .next_due()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            tokio::select! {
                () = tokio::time::sleep_until(sleep_until) => {
                    for key in self.pop_due(Instant::now()) {
                        dispatch(key);
                    }
                }
                () = self.notify.notified() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}

impl<K: Clone + Eq + Hash + Ord> Default for Schedule<K> {
    fn default() -> Self {
        Schedule::new()
    }
}

// ============================================================================
// Reconciliation of one zone
// ============================================================================

/// Source of the current desired entries, fed by the external watch layer.
pub trait EntrySource: Send + Sync {
    /// Snapshot of all desired entries.
    fn entries(&self) -> Vec<Entry>;
}

/// Fixed entry list, used by tests and the single-pass binary mode.
pub struct StaticEntrySource(pub StdMutex<Vec<Entry>>);

impl StaticEntrySource {
    #[must_use]
    pub fn new(entries: Vec<Entry>) -> Arc<Self> {
        Arc::new(StaticEntrySource(StdMutex::new(entries)))
    }

    pub fn replace(&self, entries: Vec<Entry>) {
        *self.0.lock().expect("entry source lock") = entries;
    }
}

impl EntrySource for StaticEntrySource {
    fn entries(&self) -> Vec<Entry> {
        self.0.lock().expect("entry source lock").clone()
    }
}

/// Engine-level settings shared by all providers.
#[derive(Clone, Debug)]
pub struct EngineSettings {
    /// Ownership identity of this engine instance
    pub identity: String,
    /// Engine class; entries addressed to other classes are ignored
    pub class: String,
    /// Configured META record name prefix
    pub meta_prefix: String,
    /// Plan and log, but never write
    pub dry_run: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            identity: String::new(),
            class: crate::constants::DEFAULT_CLASS.to_string(),
            meta_prefix: crate::constants::DEFAULT_META_PREFIX.to_string(),
            dry_run: false,
        }
    }
}

/// Counters summarizing one zone reconciliation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub planned: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// One provider account wired into the scheduler.
pub struct ProviderRuntime {
    pub name: String,
    pub handler: Arc<dyn DnsHandler>,
    pub cache: ZoneCache,
    pub entries: Arc<dyn EntrySource>,
    pub policies: Vec<HostedZonePolicy>,
    /// Dispatch order: workers drain lower numbers first
    pub priority: usize,
}

/// Reconcile a single zone once: load state, plan, execute, patch cache.
///
/// The cache is patched batch by batch: a successful batch is delta-applied
/// immediately, a failed batch invalidates the zone. Completion handles are
/// notified per request with the batch outcome.
///
/// # Errors
///
/// Returns the first batch error; when every batch was throttled the
/// throttling sentinel is returned instead so the caller backs off harder.
pub async fn reconcile_zone_once(
    runtime: &ProviderRuntime,
    zone_id: &ZoneId,
    settings: &EngineSettings,
) -> Result<ReconcileStats, ProviderError> {
    let handler = runtime.handler.as_ref();
    let kind = handler.provider_type();
    let started = std::time::Instant::now();

    let zones = runtime.cache.get_zones(|| handler.get_zones()).await?;
    let Some(zone) = zones.iter().find(|z| z.id == *zone_id) else {
        debug!(zone = %zone_id, "zone disappeared from provider, nothing to do");
        return Ok(ReconcileStats::default());
    };

    let state = runtime
        .cache
        .get_zone_state(zone_id, || handler.get_zone_state(zone))
        .await?;

    // NS delegations observed in the zone shadow their subtrees
    let mut zone = zone.clone();
    zone.set_forwarded(state.forwarded_subdomains(&zone.domain));
    let zone = &zone;

    // an entry belongs to the longest-matching zone only, so a child zone
    // shadows its parent
    let entries: Vec<Entry> = runtime
        .entries
        .entries()
        .into_iter()
        .filter(|entry| {
            crate::zones::find_zone_for(&zones, &entry.dns_name)
                .is_some_and(|owner| owner.id == *zone_id)
        })
        .collect();
    let policy = policy_for(&runtime.policies, zone_id.as_str(), zone.domain.as_str());
    let batch_size = policy
        .and_then(|p| p.batch_size)
        .unwrap_or(handler.context().batch_size)
        .clamp(
            crate::constants::MIN_BATCH_SIZE,
            crate::constants::MAX_BATCH_SIZE,
        );
    let ctx = PlanContext {
        identity: &settings.identity,
        class: &settings.class,
        meta_prefix: &settings.meta_prefix,
        supports_alias: kind.supports_alias(),
        supports_routing: kind.supports_routing(),
        batch_size,
        policy,
    };
    let plan = plan_zone(zone, &state, &entries, &ctx);
    if plan.is_empty() {
        debug!(zone = %zone_id, "zone already converged");
        metrics::record_reconciliation_success(kind.as_str(), started.elapsed());
        return Ok(ReconcileStats::default());
    }

    info!(
        zone = %zone_id,
        batches = plan.batches.len(),
        creates = plan.stats.creates,
        updates = plan.stats.updates,
        deletes = plan.stats.deletes,
        "applying change plan"
    );

    if settings.dry_run {
        for request in plan.batches.iter().flatten() {
            info!(
                zone = %zone_id,
                action = request.action.as_str(),
                rtype = %request.rtype,
                name = %request.name,
                "dry-run: suppressing write"
            );
            request.notify_success();
        }
        return Ok(ReconcileStats {
            planned: plan.len(),
            ..ReconcileStats::default()
        });
    }

    let mut stats = ReconcileStats {
        planned: plan.len(),
        ..ReconcileStats::default()
    };
    let mut throttled_batches = 0usize;
    let mut first_error: Option<ProviderError> = None;
    let total_batches = plan.batches.len();

    for batch in &plan.batches {
        match handler.execute_requests(zone, batch).await {
            Ok(()) => {
                runtime.cache.apply_requests(Ok(()), zone, batch).await;
                for request in batch {
                    request.notify_success();
                    metrics::record_change(kind.as_str(), request.action.as_str(), "applied");
                }
                stats.succeeded += batch.len();
            }
            Err(err) => {
                warn!(zone = %zone_id, error = %err, "batch execution failed");
                runtime.cache.apply_requests(Err(&err), zone, batch).await;
                for request in batch {
                    request.notify_failure(&err);
                    metrics::record_change(kind.as_str(), request.action.as_str(), "failed");
                }
                stats.failed += batch.len();
                if err.is_throttled() {
                    throttled_batches += 1;
                }
                first_error.get_or_insert(err);
            }
        }
    }

    match first_error {
        None => {
            metrics::record_reconciliation_success(kind.as_str(), started.elapsed());
            Ok(stats)
        }
        Some(err) => {
            let err = if throttled_batches == total_batches {
                ProviderError::Throttled {
                    message: format!("all {total_batches} batches throttled: {err}"),
                }
            } else {
                err
            };
            metrics::record_reconciliation_error(
                kind.as_str(),
                started.elapsed(),
                err.is_throttled(),
            );
            Err(err)
        }
    }
}

// ============================================================================
// Scheduler
// ============================================================================

struct ReadyState {
    queue: BTreeMap<(usize, u64), WorkKey>,
    seq: u64,
}

/// Work items ready for a worker, ordered by provider priority and
/// arrival within a priority.
///
/// The per-zone single-flight gate bounds this queue at the number of
/// known zones, so no explicit capacity is needed.
pub(crate) struct ReadyQueue {
    state: StdMutex<ReadyState>,
    notify: Notify,
}

impl ReadyQueue {
    fn new() -> Self {
        ReadyQueue {
            state: StdMutex::new(ReadyState {
                queue: BTreeMap::new(),
                seq: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, priority: usize, key: WorkKey) {
        {
            let mut state = self.state.lock().expect("ready queue lock");
            state.seq += 1;
            let slot = (priority, state.seq);
            state.queue.insert(slot, key);
        }
        self.notify.notify_one();
    }

    pub(crate) fn pop(&self) -> Option<WorkKey> {
        let mut state = self.state.lock().expect("ready queue lock");
        state.queue.pop_first().map(|(_, key)| key)
    }

    async fn wait(&self) {
        self.notify.notified().await;
    }
}

struct ZoneFlight {
    in_flight: bool,
    dirty: bool,
    backoff: FailureBackoff,
}

impl ZoneFlight {
    fn new() -> Self {
        ZoneFlight {
            in_flight: false,
            dirty: false,
            backoff: FailureBackoff::standard(),
        }
    }
}

struct SchedulerInner {
    providers: Mutex<HashMap<String, Arc<ProviderRuntime>>>,
    flights: Mutex<HashMap<WorkKey, ZoneFlight>>,
    schedule: Schedule<WorkKey>,
    ready: ReadyQueue,
    settings: EngineSettings,
    shutdown: watch::Receiver<bool>,
}

/// Worker-pool scheduler over `(provider, zone)` work items.
///
/// Workers always take the ready item of the lowest provider priority
/// number first; within one provider, arrival order keeps the scheduling
/// fair, so every enqueued zone of a provider is visited before any of its
/// zones is visited twice.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    processors: usize,
}

impl Scheduler {
    #[must_use]
    pub fn new(
        settings: EngineSettings,
        processors: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Scheduler {
            inner: Arc::new(SchedulerInner {
                providers: Mutex::new(HashMap::new()),
                flights: Mutex::new(HashMap::new()),
                schedule: Schedule::new(),
                ready: ReadyQueue::new(),
                settings,
                shutdown,
            }),
            processors: processors.max(1),
        }
    }

    /// Register a provider account and enqueue its zones.
    ///
    /// # Errors
    ///
    /// Propagates the zone listing error; the provider stays registered and
    /// can be triggered again.
    pub async fn add_provider(&self, runtime: ProviderRuntime) -> Result<(), ProviderError> {
        let account = account_hash(&runtime.name, runtime.handler.provider_type().as_str());
        let runtime = Arc::new(runtime);
        self.inner
            .providers
            .lock()
            .await
            .insert(account.clone(), runtime.clone());
        self.trigger_provider(&account).await
    }

    /// Enqueue every zone of one provider for reconciliation.
    ///
    /// # Errors
    ///
    /// Propagates the zone listing error.
    pub async fn trigger_provider(&self, account: &str) -> Result<(), ProviderError> {
        let runtime = {
            let providers = self.inner.providers.lock().await;
            providers.get(account).cloned()
        };
        let Some(runtime) = runtime else {
            return Ok(());
        };
        debug!(
            provider = %runtime.name,
            priority = runtime.priority,
            "enqueueing provider zones"
        );
        let zones = runtime
            .cache
            .get_zones(|| runtime.handler.get_zones())
            .await?;
        for zone in zones {
            self.enqueue(WorkKey {
                account: account.to_string(),
                zone: zone.id,
            })
            .await;
        }
        Ok(())
    }

    /// Enqueue one zone; coalesces into the dirty flag while in flight.
    pub async fn enqueue(&self, key: WorkKey) {
        enqueue_inner(&self.inner, key).await;
    }

    /// Run the worker pool and requeue timer until shutdown.
    pub async fn run(&self) {
        let mut workers = Vec::with_capacity(self.processors);
        for worker_id in 0..self.processors {
            let inner = self.inner.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, inner).await;
            }));
        }

        // requeue timer: dispatch due keys back into the work queue
        let inner = self.inner.clone();
        let timer_shutdown = self.inner.shutdown.clone();
        let timer = tokio::spawn(async move {
            let dispatch_inner = inner.clone();
            inner
                .schedule
                .run(timer_shutdown, move |key: WorkKey| {
                    let inner = dispatch_inner.clone();
                    tokio::spawn(async move {
                        enqueue_inner(&inner, key).await;
                    });
                })
                .await;
        });

        for worker in workers {
            let _ = worker.await;
        }
        timer.abort();
        for runtime in self.inner.providers.lock().await.values() {
            runtime.handler.release();
        }
        info!("scheduler stopped");
    }
}

async fn enqueue_inner(inner: &SchedulerInner, key: WorkKey) {
    {
        let mut flights = inner.flights.lock().await;
        let flight = flights.entry(key.clone()).or_insert_with(ZoneFlight::new);
        if flight.in_flight {
            flight.dirty = true;
            return;
        }
        flight.in_flight = true;
    }
    // unknown accounts sort last; the worker clears their flight entry
    let priority = {
        let providers = inner.providers.lock().await;
        providers.get(&key.account).map_or(usize::MAX, |r| r.priority)
    };
    inner.ready.push(priority, key);
}

async fn worker_loop(worker_id: usize, inner: Arc<SchedulerInner>) {
    let mut shutdown = inner.shutdown.clone();
    loop {
        if *shutdown.borrow() {
            return;
        }
        match inner.ready.pop() {
            Some(key) => process_work_item(worker_id, &inner, key).await,
            None => {
                tokio::select! {
                    () = inner.ready.wait() => {}
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        }
    }
}

async fn process_work_item(worker_id: usize, inner: &SchedulerInner, key: WorkKey) {
    let runtime = {
        let providers = inner.providers.lock().await;
        providers.get(&key.account).cloned()
    };
    let result = match runtime {
        Some(runtime) => reconcile_zone_once(&runtime, &key.zone, &inner.settings).await,
        None => {
            debug!(zone = %key.zone, "provider of work item no longer registered");
            Ok(ReconcileStats::default())
        }
    };

    let mut requeue_now = false;
    {
        let mut flights = inner.flights.lock().await;
        let flight = flights.entry(key.clone()).or_insert_with(ZoneFlight::new);
        flight.in_flight = false;
        match &result {
            Ok(stats) => {
                flight.backoff.succeeded();
                inner.schedule.cancel(&key);
                if flight.dirty {
                    flight.dirty = false;
                    requeue_now = true;
                }
                debug!(
                    worker = worker_id,
                    zone = %key.zone,
                    succeeded = stats.succeeded,
                    "reconciliation finished"
                );
            }
            Err(err) => {
                flight.dirty = false;
                let delay = if err.is_throttled() {
                    flight.backoff.throttled()
                } else if err.is_transient() {
                    flight.backoff.failed()
                } else {
                    // terminal errors wait for a desired-state change
                    error!(zone = %key.zone, error = %err, "reconciliation failed terminally");
                    return;
                };
                warn!(
                    worker = worker_id,
                    zone = %key.zone,
                    error = %err,
                    retry_after = ?delay,
                    "reconciliation failed, requeueing"
                );
                inner.schedule.schedule_at(key.clone(), Instant::now() + delay);
            }
        }
    }
    if requeue_now {
        enqueue_inner(inner, key).await;
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod scheduler_tests;

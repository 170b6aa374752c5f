use anyhow::Result;
use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::browser::driver::BrowserLauncher;
use crate::browser::session::{Session, SessionState, StockRetry};
use crate::cli::config::{HarvestConfig, PoolSettings, ProxyConfig};
use crate::crawler::extractor::Extractor;
use crate::crawler::scheduler::Decision;
use crate::crawler::sink::ResultSink;
use crate::crawler::task::{ExtractionResult, PageObservation, Task, TaskOutcome};
use crate::offers::OfferParser;
use crate::proxy::manager::ProxyRotator;
use crate::recovery::{classify_error, decide, AttemptState, FailureTracker, Fault, RecoveryAction, RecoveryPolicy};
use crate::utils::status::StatusStore;

/// Totals for one pool run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub cached: usize,
    pub skipped: usize,
    /// Tasks left in the queue when the pool stopped
    pub pending: usize,
    /// The pool halted on an escalation
    pub paused: bool,
    /// Browser renewals after `max_tasks_before_renewal` tasks
    pub renewals: usize,
}

#[derive(Default)]
struct Counters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    cached: AtomicUsize,
    skipped: AtomicUsize,
    renewals: AtomicUsize,
}

/// State shared by the workers of one run
struct Shared {
    settings: PoolSettings,
    policy: RecoveryPolicy,
    stock: StockRetry,
    launcher: Arc<dyn BrowserLauncher>,
    extractor: Arc<dyn Extractor>,
    parser: Arc<OfferParser>,
    sink: Arc<ResultSink>,
    proxies: Arc<Mutex<ProxyRotator>>,
    status: StatusStore,
    stop: Arc<AtomicBool>,
    paused: AtomicBool,
    queue: Mutex<VecDeque<Task>>,
    in_flight: Mutex<HashSet<String>>,
    failures: Mutex<FailureTracker>,
    counters: Counters,
}

/// N sessions draining one FIFO task queue
pub struct SessionPool {
    settings: PoolSettings,
    policy: RecoveryPolicy,
    stock: StockRetry,
    launcher: Arc<dyn BrowserLauncher>,
    extractor: Arc<dyn Extractor>,
    parser: Arc<OfferParser>,
    sink: Arc<ResultSink>,
    proxies: Arc<Mutex<ProxyRotator>>,
    status: StatusStore,
    stop: Arc<AtomicBool>,
}

impl SessionPool {
    /// Create a new session pool
    pub fn new(
        config: &HarvestConfig,
        launcher: Arc<dyn BrowserLauncher>,
        extractor: Arc<dyn Extractor>,
        sink: Arc<ResultSink>,
        status: StatusStore,
    ) -> Self {
        Self {
            settings: config.pool.clone(),
            policy: RecoveryPolicy::from(&config.recovery),
            stock: StockRetry {
                retries: config.recovery.stock_retries,
                delay: Duration::from_millis(config.recovery.stock_retry_delay_ms),
            },
            launcher,
            extractor,
            parser: Arc::new(OfferParser::new()),
            sink,
            proxies: Arc::new(Mutex::new(ProxyRotator::new(&config.proxy))),
            status,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share an externally owned stop flag
    pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    /// Flag checked by every worker between tasks
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Health-check the configured proxies, evicting dead ones
    pub async fn probe_proxies(&self, probe_url: &str, timeout: Duration) -> Result<usize> {
        self.proxies.lock().await.probe_all(probe_url, timeout).await
    }

    /// Process `tasks` until the queue drains, a stop is requested or the pool pauses
    pub async fn run(&self, tasks: Vec<Task>) -> Result<RunSummary> {
        let workers = self.settings.workers.max(1).min(tasks.len().max(1));
        info!("Starting {} workers for {} tasks", workers, tasks.len());

        let shared = Arc::new(Shared {
            settings: self.settings.clone(),
            policy: self.policy.clone(),
            stock: self.stock,
            launcher: self.launcher.clone(),
            extractor: self.extractor.clone(),
            parser: self.parser.clone(),
            sink: self.sink.clone(),
            proxies: self.proxies.clone(),
            status: self.status.clone(),
            stop: self.stop.clone(),
            paused: AtomicBool::new(false),
            queue: Mutex::new(tasks.into_iter().collect()),
            in_flight: Mutex::new(HashSet::new()),
            failures: Mutex::new(FailureTracker::new()),
            counters: Counters::default(),
        });

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let shared = shared.clone();
                tokio::spawn(worker(shared, id).instrument(info_span!("worker", id)))
            })
            .collect();

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task panicked: {}", e);
            }
        }

        let summary = RunSummary {
            succeeded: shared.counters.succeeded.load(Ordering::SeqCst),
            failed: shared.counters.failed.load(Ordering::SeqCst),
            cached: shared.counters.cached.load(Ordering::SeqCst),
            skipped: shared.counters.skipped.load(Ordering::SeqCst),
            pending: shared.queue.lock().await.len(),
            paused: shared.paused.load(Ordering::SeqCst),
            renewals: shared.counters.renewals.load(Ordering::SeqCst),
        };
        info!("Pool finished: {:?}", summary);
        Ok(summary)
    }
}

async fn worker(shared: Arc<Shared>, id: usize) {
    let mut session = Session::new(shared.launcher.clone(), shared.settings.max_tasks_before_renewal);
    let mut proxy = shared.proxies.lock().await.next_proxy();
    debug!("Worker {} started", id);

    while let Some(task) = shared.next_task().await {
        let outcome = shared.process(&mut session, &mut proxy, &task).await;

        match outcome {
            Some(outcome) => {
                let browsed = matches!(outcome, TaskOutcome::Extracted(_) | TaskOutcome::Failed { .. });
                shared.finish_task(&task, &outcome).await;
                shared.release_claim(&task.key).await;
                if browsed {
                    shared.jitter().await;
                }
            }
            None => {
                // Escalated: the task goes back to the head of the queue
                shared.release_claim(&task.key).await;
                shared.queue.lock().await.push_front(task);
            }
        }
    }

    shared.counters.renewals.fetch_add(session.renewals() as usize, Ordering::SeqCst);
    session.retire().await;
    debug!("Worker {} stopped", id);
}

impl Shared {
    fn halted(&self) -> bool {
        self.stop.load(Ordering::SeqCst) || self.paused.load(Ordering::SeqCst)
    }

    /// Claim the first queued task whose URL no other worker is processing
    async fn next_task(&self) -> Option<Task> {
        loop {
            if self.halted() {
                return None;
            }

            {
                let mut queue = self.queue.lock().await;
                if queue.is_empty() {
                    return None;
                }

                let mut in_flight = self.in_flight.lock().await;
                if let Some(position) = queue.iter().position(|t| !in_flight.contains(&t.key)) {
                    if let Some(task) = queue.remove(position) {
                        in_flight.insert(task.key.clone());
                        return Some(task);
                    }
                }
            }

            // Every queued URL is claimed by another worker
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn release_claim(&self, key: &str) {
        self.in_flight.lock().await.remove(key);
    }

    async fn jitter(&self) {
        let (min, max) = self.settings.task_delay_ms;
        let delay = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    /// Run one task to a terminal outcome; `None` means the pool paused
    async fn process(&self, session: &mut Session, proxy: &mut Option<ProxyConfig>, task: &Task) -> Option<TaskOutcome> {
        match self.sink.decide(&task.key).await {
            Decision::UseCached(snapshot) => return Some(TaskOutcome::Cached(snapshot)),
            Decision::SkipVisited => return Some(TaskOutcome::SkippedVisited),
            Decision::Execute => {}
        }

        self.status.set_current_url(&task.url).await;
        let mut attempt = 0;
        let mut recreations = 0;

        loop {
            attempt += 1;

            let error = match self.attempt(session, proxy, &task.url).await {
                Ok(observation) => {
                    self.failures.lock().await.record_success();
                    self.proxies.lock().await.record_success(session.proxy());

                    let result = ExtractionResult::from_observation(&task.url, observation, &self.parser);
                    if let Err(e) = session.release().await {
                        // The next task relaunches the browser
                        warn!("Session renewal failed: {:#}", e);
                    }
                    return Some(TaskOutcome::Extracted(result.snapshot()));
                }
                Err(e) => e,
            };

            let faults = classify_error(&error);
            let state = AttemptState {
                attempt,
                session_recreations: recreations,
                consecutive_failures: self.failures.lock().await.record_failure(),
            };
            let action = decide(faults, state, &self.policy);
            warn!(
                "Attempt {} on {} failed [{}]: {:#}; next: {:?}",
                attempt, task.url, faults, error, action
            );
            self.status.set_error(format!("{:#}", error)).await;

            match action {
                RecoveryAction::RecreateSession => {
                    recreations += 1;
                    session.teardown().await;
                }
                RecoveryAction::CleanupAndBackoff { delay } => {
                    session.teardown().await;
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::RotateProxy { delay } => {
                    let failed = session.proxy().cloned().or_else(|| proxy.clone());
                    *proxy = self.proxies.lock().await.rotate_after_failure(failed.as_ref());
                    session.teardown().await;
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::PauseAndCheckpoint => {
                    self.escalate(state.consecutive_failures).await;
                    return None;
                }
                RecoveryAction::Fail => {
                    if faults.contains(Fault::SessionFault) {
                        session.mark_invalid();
                    }
                    return Some(TaskOutcome::Failed {
                        error: format!("{:#}", error),
                        faults,
                    });
                }
            }
        }
    }

    async fn attempt(&self, session: &mut Session, proxy: &Option<ProxyConfig>, url: &str) -> Result<PageObservation> {
        if session.state() != SessionState::Active {
            session.recreate(proxy.clone()).await?;
        }
        session.execute(url, self.extractor.as_ref(), self.stock).await
    }

    async fn escalate(&self, consecutive: u32) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }

        error!("Pausing pool after {} consecutive failures", consecutive);
        self.status.set_paused().await;
        match self.sink.checkpoint().await {
            Ok(path) => info!("Forced checkpoint: {}", path.display()),
            Err(e) => error!("Forced checkpoint failed: {:#}", e),
        }
    }

    async fn finish_task(&self, task: &Task, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Extracted(_) => &self.counters.succeeded,
            TaskOutcome::Cached(_) => &self.counters.cached,
            TaskOutcome::SkippedVisited => &self.counters.skipped,
            TaskOutcome::Failed { .. } => &self.counters.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);

        if let TaskOutcome::Failed { error, faults } = outcome {
            error!("Giving up on {} [{}]: {}", task.url, faults, error);
        }

        if let Err(e) = self.sink.record(task, outcome).await {
            error!("Failed to record outcome for {}: {:#}", task.url, e);
            self.status.set_error(format!("{:#}", e)).await;
        }
        self.status.record_progress().await;
    }
}

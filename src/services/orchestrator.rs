use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::db::{JobStore, Reservation, StoreError};
use crate::models::job::{FailureReason, JobState, JobTransition, NewScanJob, ScanJob};
use crate::models::report::ScanReport;
use crate::services::retry::{retry_with_backoff, RetryPolicy};
use crate::services::scanner::{PollOutcome, ScanBackend, StartScan};
use crate::services::sink::{ResultSink, SinkError};

/// Tunables for the per-job monitor loop.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// How often a running job is polled.
    pub poll_interval: Duration,
    /// Absolute lifetime budget per job, enforced locally regardless of the
    /// external scanner's behavior.
    pub max_job_lifetime: Duration,
    /// Retry budget for result persistence, independent of the scanner's.
    pub persist_retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_job_lifetime: Duration::from_secs(3600),
            persist_retry: RetryPolicy::persistence(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result of a submission: the job (fresh or pre-existing) and whether the
/// dedup ledger matched an existing one.
#[derive(Debug)]
pub struct SubmitOutcome {
    pub job: ScanJob,
    pub deduplicated: bool,
}

/// Result of a cancellation request.
#[derive(Debug)]
pub enum CancelOutcome {
    /// The local failed(cancelled) transition was applied.
    Cancelled(ScanJob),
    /// The job had already reached a terminal state.
    AlreadyTerminal(ScanJob),
}

/// Drives each scan job from submission to a terminal state with one
/// supervised tokio task per active job. All collaborators are injected;
/// every job mutation goes through the store's compare-and-swap.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    scanner: Arc<dyn ScanBackend>,
    sink: Arc<dyn ResultSink>,
    settings: Arc<OrchestratorSettings>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        scanner: Arc<dyn ScanBackend>,
        sink: Arc<dyn ResultSink>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            store,
            scanner,
            sink,
            settings: Arc::new(settings),
        }
    }

    /// Submit a scan. Idempotent per (url, requester): while a job for the
    /// pair is non-terminal, resubmission returns it unchanged. A fresh job
    /// is registered as pending and its monitor task spawned before this
    /// returns; the external start happens inside the task, so the
    /// submission path never blocks on the scanner.
    pub async fn submit(&self, new: NewScanJob) -> Result<SubmitOutcome, OrchestratorError> {
        match self.store.reserve(new).await? {
            Reservation::Fresh(job) => {
                metrics::counter!("scan_jobs_submitted_total").increment(1);
                info!(job_id = %job.id, url = %job.url, "scan job accepted");
                self.spawn_monitor(job.clone());
                Ok(SubmitOutcome {
                    job,
                    deduplicated: false,
                })
            }
            Reservation::Existing(job) => {
                metrics::counter!("scan_jobs_deduplicated_total").increment(1);
                debug!(job_id = %job.id, url = %job.url, "submission matched active job");
                Ok(SubmitOutcome {
                    job,
                    deduplicated: true,
                })
            }
        }
    }

    /// Best-effort cancellation of a pending or running job. The external
    /// service is signalled but the local failed(cancelled) transition is
    /// applied regardless of its acknowledgment.
    pub async fn cancel(&self, id: Uuid) -> Result<CancelOutcome, OrchestratorError> {
        // The monitor may be transitioning concurrently; a few CAS rounds
        // settle who wins.
        for _ in 0..3 {
            let job = self
                .store
                .get(id)
                .await?
                .ok_or(OrchestratorError::NotFound(id))?;

            if job.state.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(job));
            }

            if let Some(ref external_ref) = job.external_ref {
                if let Err(e) = self.scanner.cancel(external_ref).await {
                    debug!(job_id = %id, error = %e, "external cancel not acknowledged");
                }
            }

            match self
                .store
                .transition(
                    id,
                    job.state,
                    JobTransition::Failed {
                        code: FailureReason::Cancelled,
                        message: "cancelled by requester".to_string(),
                    },
                )
                .await
            {
                Ok(job) => {
                    info!(job_id = %id, "job cancelled");
                    return Ok(CancelOutcome::Cancelled(job));
                }
                Err(StoreError::Stale { .. }) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let job = self
            .store
            .get(id)
            .await?
            .ok_or(OrchestratorError::NotFound(id))?;
        Ok(CancelOutcome::AlreadyTerminal(job))
    }

    /// Crash recovery, run once before the server starts accepting
    /// submissions: running jobs get their monitors respawned against the
    /// stored external handle; pending jobs whose external start was never
    /// confirmed are failed so the pair becomes reservable again.
    pub async fn recover(&self) -> Result<(), OrchestratorError> {
        let running = self.store.list_by_state(JobState::Running).await?;
        for job in &running {
            self.spawn_monitor(job.clone());
        }

        let orphaned = self.store.list_by_state(JobState::Pending).await?;
        for job in &orphaned {
            self.fail_job(
                job.id,
                JobState::Pending,
                FailureReason::StartFailed,
                "interrupted by restart before the external scan was confirmed".to_string(),
            )
            .await;
        }

        info!(
            resumed = running.len(),
            orphaned = orphaned.len(),
            "recovery complete"
        );
        Ok(())
    }

    fn spawn_monitor(&self, job: ScanJob) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            metrics::gauge!("scan_monitors_active").increment(1.0);
            let started = std::time::Instant::now();
            orchestrator.run_job(job).await;
            metrics::histogram!("scan_duration_seconds").record(started.elapsed().as_secs_f64());
            metrics::gauge!("scan_monitors_active").decrement(1.0);
        });
    }

    async fn run_job(&self, job: ScanJob) {
        let deadline = Instant::now() + self.settings.max_job_lifetime;

        let external_ref = match job.state {
            JobState::Pending => match self.start_job(&job).await {
                Some(external_ref) => external_ref,
                None => return,
            },
            JobState::Running => match job.external_ref.clone() {
                Some(external_ref) => external_ref,
                None => {
                    // Unresumable: the handle was lost. Fail rather than hang.
                    self.fail_job(
                        job.id,
                        JobState::Running,
                        FailureReason::StartFailed,
                        "running job has no external handle".to_string(),
                    )
                    .await;
                    return;
                }
            },
            JobState::Completed | JobState::Failed => return,
        };

        self.poll_until_terminal(&job, &external_ref, deadline).await;
    }

    async fn start_job(&self, job: &ScanJob) -> Option<String> {
        let request = StartScan {
            job_id: job.id,
            url: job.url.clone(),
            scan_type: job.scan_type.clone(),
        };

        match self.scanner.start(&request).await {
            Ok(external_ref) => {
                let started = JobTransition::Started {
                    external_ref: external_ref.clone(),
                };
                match self.store.transition(job.id, JobState::Pending, started).await {
                    Ok(_) => {
                        debug!(job_id = %job.id, external_ref = %external_ref, "scan running");
                        Some(external_ref)
                    }
                    Err(StoreError::Stale { .. }) => {
                        // Cancelled while the start call was in flight; the
                        // external job is already live, so signal it down.
                        if let Err(e) = self.scanner.cancel(&external_ref).await {
                            debug!(job_id = %job.id, error = %e, "post-cancel signal failed");
                        }
                        None
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to record running state");
                        None
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "external start failed");
                self.fail_job(
                    job.id,
                    JobState::Pending,
                    FailureReason::StartFailed,
                    e.to_string(),
                )
                .await;
                None
            }
        }
    }

    async fn poll_until_terminal(&self, job: &ScanJob, external_ref: &str, deadline: Instant) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if Instant::now() >= deadline {
                if let Err(e) = self.scanner.cancel(external_ref).await {
                    debug!(job_id = %job.id, error = %e, "cancel after timeout failed");
                }
                self.fail_job(
                    job.id,
                    JobState::Running,
                    FailureReason::Timeout,
                    format!(
                        "scan exceeded maximum lifetime of {}s",
                        self.settings.max_job_lifetime.as_secs()
                    ),
                )
                .await;
                return;
            }

            match self.scanner.poll(external_ref).await {
                Ok(PollOutcome::Pending) => continue,
                Ok(PollOutcome::Done(report)) => {
                    self.complete_job(job, report).await;
                    return;
                }
                Ok(PollOutcome::Failed(reason)) => {
                    self.fail_job(job.id, JobState::Running, FailureReason::ScanFailed, reason)
                        .await;
                    return;
                }
                Err(e) => {
                    // The client already spent its retry budget; the
                    // lifetime deadline bounds how long we keep trying.
                    warn!(job_id = %job.id, error = %e, "poll failed, retrying next interval");
                }
            }
        }
    }

    async fn complete_job(&self, job: &ScanJob, report: ScanReport) {
        let summary = report.summary;
        let payload = match serde_json::to_vec(&report) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail_job(
                    job.id,
                    JobState::Running,
                    FailureReason::PersistFailed,
                    format!("report not serializable: {e}"),
                )
                .await;
                return;
            }
        };

        let stored = retry_with_backoff(
            &self.settings.persist_retry,
            "store_result",
            || self.sink.store(job.id, &payload),
            SinkError::is_transient,
        )
        .await;

        match stored {
            Ok(result_key) => {
                let completed = JobTransition::Completed {
                    result_key,
                    summary,
                };
                match self.store.transition(job.id, JobState::Running, completed).await {
                    Ok(_) => {
                        metrics::counter!("scan_jobs_completed_total").increment(1);
                        info!(
                            job_id = %job.id,
                            high = summary.high,
                            medium = summary.medium,
                            low = summary.low,
                            "scan completed"
                        );
                    }
                    Err(StoreError::Stale { .. }) => {
                        debug!(job_id = %job.id, "duplicate completion signal ignored");
                    }
                    Err(e) => {
                        error!(job_id = %job.id, error = %e, "failed to record completion");
                    }
                }
            }
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "result storage exhausted its retries");
                self.fail_job(
                    job.id,
                    JobState::Running,
                    FailureReason::PersistFailed,
                    e.to_string(),
                )
                .await;
            }
        }
    }

    async fn fail_job(&self, id: Uuid, from: JobState, code: FailureReason, message: String) {
        match self
            .store
            .transition(id, from, JobTransition::Failed { code, message })
            .await
        {
            Ok(_) => {
                metrics::counter!("scan_jobs_failed_total").increment(1);
                info!(job_id = %id, code = %code, "scan failed");
            }
            Err(StoreError::Stale { .. }) => {
                debug!(job_id = %id, code = %code, "failure transition lost the race");
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "failed to record failure");
            }
        }
    }
}

//! Customer Match upload orchestration.
//!
//! Drives one job through `Idle → JobCreated → BatchesSubmitted → JobRun → Done`.
//! Any unrecoverable error moves to `Failed` and no further remote calls are
//! made. Operations are fully converted before the job is created, so a
//! malformed input never leaves a job behind.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ads::failure::{rejected_operations, RejectedOperation};
use crate::ads::offline_user_data_job::AddOperationsResponse;
use crate::ads::{JobHandle, ListTarget, OfflineUserDataJobClient, UploadMode, UserDataOperation};
use crate::error::{AppError, RemoteError, RemoteStage};
use crate::upload::batch::{batch_count, plan_batches, BatchSize};
use crate::upload::identifiers::{build_operations, OperationRecord};
use crate::upload::scheduler::BatchScheduler;

/// Default per-call deadline.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

// ─────────────────────────────────────────────────────────────────────────────
// Traits for Testing
// ─────────────────────────────────────────────────────────────────────────────

/// Boxed future returned by `JobServiceOps` calls.
pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Remote job operations, allowing test fakes.
pub trait JobServiceOps: Send + Sync + Clone + 'static {
    /// Creates an empty job bound to the target list.
    fn create_job<'a>(&'a self, target: &'a ListTarget) -> ServiceFuture<'a, JobHandle>;

    /// Appends one batch of operations with partial failure enabled.
    fn add_operations<'a>(
        &'a self,
        job: &'a JobHandle,
        operations: &'a [UserDataOperation],
    ) -> ServiceFuture<'a, AddOperationsResponse>;

    /// Starts asynchronous processing of the job.
    fn run_job<'a>(&'a self, job: &'a JobHandle) -> ServiceFuture<'a, ()>;
}

impl JobServiceOps for OfflineUserDataJobClient {
    fn create_job<'a>(&'a self, target: &'a ListTarget) -> ServiceFuture<'a, JobHandle> {
        Box::pin(OfflineUserDataJobClient::create_job(self, target))
    }

    fn add_operations<'a>(
        &'a self,
        job: &'a JobHandle,
        operations: &'a [UserDataOperation],
    ) -> ServiceFuture<'a, AddOperationsResponse> {
        Box::pin(OfflineUserDataJobClient::add_operations(self, job, operations))
    }

    fn run_job<'a>(&'a self, job: &'a JobHandle) -> ServiceFuture<'a, ()> {
        Box::pin(OfflineUserDataJobClient::run_job(self, job))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Local progress of one upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadPhase {
    Idle,
    JobCreated,
    BatchesSubmitted,
    JobRun,
    Done,
    Failed,
}

impl fmt::Display for UploadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadPhase::Idle => "idle",
            UploadPhase::JobCreated => "job_created",
            UploadPhase::BatchesSubmitted => "batches_submitted",
            UploadPhase::JobRun => "job_run",
            UploadPhase::Done => "done",
            UploadPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tunables fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadSettings {
    pub batch_size: BatchSize,
    /// Maximum batches in flight. 1 submits strictly in order.
    pub concurrency: NonZeroUsize,
    /// Deadline for each remote call.
    pub call_timeout: Duration,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            batch_size: BatchSize::default(),
            concurrency: NonZeroUsize::MIN,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }
}

/// Outcome of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub job_resource_name: String,
    pub mode: UploadMode,
    pub operations_queued: usize,
    pub batches_submitted: usize,
    /// Operations the service rejected inside otherwise accepted batches.
    pub rejected: Vec<RejectedOperation>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal Types
// ─────────────────────────────────────────────────────────────────────────────

struct Submitted {
    batches: usize,
    rejected: Vec<RejectedOperation>,
}

enum BatchOutcome {
    Accepted(Vec<RejectedOperation>),
    Skipped,
    Failed(AppError),
}

// ─────────────────────────────────────────────────────────────────────────────
// UploadOrchestrator
// ─────────────────────────────────────────────────────────────────────────────

/// Creates, populates and runs one Customer Match job.
pub struct UploadOrchestrator<C: JobServiceOps> {
    client: C,
    target: ListTarget,
    settings: UploadSettings,
}

impl<C: JobServiceOps> UploadOrchestrator<C> {
    pub fn new(client: C, target: ListTarget, settings: UploadSettings) -> Self {
        Self {
            client,
            target,
            settings,
        }
    }

    /// Uploads `records` as a single job in `mode`.
    ///
    /// # Errors
    ///
    /// - `AppError::StructuralInput` - a record is malformed; no remote call was made
    /// - `AppError::JobCreation` - create failed; no batches were sent
    /// - `AppError::BatchSubmission` - a batch failed; later batches were not sent
    ///   and the job was not run
    /// - `AppError::RunTrigger` - every batch was accepted but run failed
    /// - `AppError::TransientNetwork` - timeout or connectivity failure at any stage
    pub async fn run(
        &self,
        records: &[OperationRecord],
        mode: UploadMode,
    ) -> Result<UploadSummary, AppError> {
        let mut phase = UploadPhase::Idle;
        let result = self.drive(records, mode, &mut phase).await;

        if let Err(err) = &result {
            warn!("[UPLOAD] Failed after phase {}: {:?}", phase, err.kind());
            advance(&mut phase, UploadPhase::Failed);
        }
        result
    }

    async fn drive(
        &self,
        records: &[OperationRecord],
        mode: UploadMode,
        phase: &mut UploadPhase,
    ) -> Result<UploadSummary, AppError> {
        let operations: Arc<[UserDataOperation]> = build_operations(records, mode)?.into();
        let total_batches = batch_count(operations.len(), self.settings.batch_size);

        info!(
            "[UPLOAD] {} operations ({}) in {} batches of up to {}",
            operations.len(),
            mode,
            total_batches,
            self.settings.batch_size.get()
        );

        let job = with_deadline(
            RemoteStage::CreateJob,
            self.settings.call_timeout,
            self.client.create_job(&self.target),
        )
        .await?;
        advance(phase, UploadPhase::JobCreated);

        let submitted = if self.settings.concurrency.get() > 1 && total_batches > 1 {
            self.submit_concurrently(&job, operations.clone(), total_batches)
                .await?
        } else {
            self.submit_in_order(&job, &operations, total_batches).await?
        };
        advance(phase, UploadPhase::BatchesSubmitted);

        with_deadline(
            RemoteStage::RunJob {
                job: job.resource_name().to_string(),
            },
            self.settings.call_timeout,
            self.client.run_job(&job),
        )
        .await?;
        advance(phase, UploadPhase::JobRun);

        if !submitted.rejected.is_empty() {
            warn!(
                "[UPLOAD] {} operations were rejected by the service",
                submitted.rejected.len()
            );
        }
        advance(phase, UploadPhase::Done);

        Ok(UploadSummary {
            job_resource_name: job.resource_name().to_string(),
            mode,
            operations_queued: operations.len(),
            batches_submitted: submitted.batches,
            rejected: submitted.rejected,
        })
    }

    /// Sends batches one at a time in input order, stopping at the first failure.
    async fn submit_in_order(
        &self,
        job: &JobHandle,
        operations: &[UserDataOperation],
        total_batches: usize,
    ) -> Result<Submitted, AppError> {
        let mut rejected = Vec::new();
        let mut batches = 0;

        for batch in plan_batches(operations, self.settings.batch_size) {
            let response = with_deadline(
                RemoteStage::SubmitBatch {
                    job: job.resource_name().to_string(),
                    batch: batch.number,
                    total_batches,
                },
                self.settings.call_timeout,
                self.client.add_operations(job, batch.items),
            )
            .await?;

            batches += 1;
            rejected.extend(collect_rejections(&response, batch.offset, batch.number));
            info!(
                "[UPLOAD] Batch {}/{} submitted ({} operations)",
                batch.number,
                total_batches,
                batch.len()
            );
        }

        Ok(Submitted { batches, rejected })
    }

    /// Sends batches through a bounded scheduler. A batch is only spawned
    /// once it holds a permit. The first failure cancels everything not yet
    /// finished; the lowest failing batch is reported.
    async fn submit_concurrently(
        &self,
        job: &JobHandle,
        operations: Arc<[UserDataOperation]>,
        total_batches: usize,
    ) -> Result<Submitted, AppError> {
        let scheduler = BatchScheduler::new(self.settings.concurrency);
        let cancel = CancellationToken::new();
        let mut join_set: JoinSet<(usize, BatchOutcome)> = JoinSet::new();
        let mut results = BatchResults::default();

        let plan: Vec<(usize, usize, usize)> = plan_batches(&operations, self.settings.batch_size)
            .iter()
            .map(|batch| (batch.number, batch.offset, batch.len()))
            .collect();
        let mut pending = plan.into_iter().peekable();

        while !cancel.is_cancelled() {
            let Some(&(number, offset, len)) = pending.peek() else {
                break;
            };

            let permit = tokio::select! {
                biased;
                Some(joined) = join_set.join_next(), if !join_set.is_empty() => {
                    results.record(joined, &cancel)?;
                    continue;
                }
                permit = scheduler.acquire() => permit?,
            };
            pending.next();

            let client = self.client.clone();
            let job = job.clone();
            let operations = operations.clone();
            let cancel = cancel.clone();
            let call_timeout = self.settings.call_timeout;

            debug!(
                "[UPLOAD] Batch {}/{} started ({} in flight)",
                number,
                total_batches,
                permit.in_flight()
            );

            join_set.spawn(async move {
                let submit = with_deadline(
                    RemoteStage::SubmitBatch {
                        job: job.resource_name().to_string(),
                        batch: number,
                        total_batches,
                    },
                    call_timeout,
                    client.add_operations(&job, &operations[offset..offset + len]),
                );

                let outcome = tokio::select! {
                    _ = cancel.cancelled() => BatchOutcome::Skipped,
                    result = submit => match result {
                        Ok(response) => {
                            info!(
                                "[UPLOAD] Batch {}/{} submitted ({} operations)",
                                number, total_batches, len
                            );
                            BatchOutcome::Accepted(collect_rejections(&response, offset, number))
                        }
                        Err(err) => BatchOutcome::Failed(err),
                    },
                };
                drop(permit);
                (number, outcome)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            results.record(joined, &cancel)?;
        }

        results.finish()
    }
}

/// Outcomes gathered from concurrently submitted batches.
#[derive(Default)]
struct BatchResults {
    first_failure: Option<(usize, AppError)>,
    accepted: Vec<(usize, Vec<RejectedOperation>)>,
}

impl BatchResults {
    fn record(
        &mut self,
        joined: Result<(usize, BatchOutcome), JoinError>,
        cancel: &CancellationToken,
    ) -> Result<(), AppError> {
        let (number, outcome) = joined.map_err(|err| {
            cancel.cancel();
            AppError::Internal(format!("Batch task failed: {}", err))
        })?;

        match outcome {
            BatchOutcome::Accepted(rejected) => self.accepted.push((number, rejected)),
            BatchOutcome::Skipped => {}
            BatchOutcome::Failed(err) => {
                if !cancel.is_cancelled() {
                    warn!("[UPLOAD] Batch {} failed, cancelling remaining batches", number);
                    cancel.cancel();
                }
                if self
                    .first_failure
                    .as_ref()
                    .map_or(true, |(lowest, _)| number < *lowest)
                {
                    self.first_failure = Some((number, err));
                }
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Submitted, AppError> {
        if let Some((_, err)) = self.first_failure {
            return Err(err);
        }

        self.accepted.sort_by_key(|(number, _)| *number);
        Ok(Submitted {
            batches: self.accepted.len(),
            rejected: self.accepted.into_iter().flat_map(|(_, r)| r).collect(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Helper Functions
// ─────────────────────────────────────────────────────────────────────────────

/// Awaits `call` under `deadline` and attributes any failure to `stage`.
async fn with_deadline<T>(
    stage: RemoteStage,
    deadline: Duration,
    call: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, AppError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(AppError::from_remote(stage, err)),
        Err(_) => Err(AppError::from_remote(stage, RemoteError::Timeout(deadline))),
    }
}

fn collect_rejections(
    response: &AddOperationsResponse,
    offset: usize,
    batch: usize,
) -> Vec<RejectedOperation> {
    let Some(status) = &response.partial_failure_error else {
        return Vec::new();
    };
    let rejected = rejected_operations(status, offset);
    warn!(
        "[UPLOAD] Batch {} accepted with {} rejected operations",
        batch,
        rejected.len()
    );
    rejected
}

fn advance(phase: &mut UploadPhase, next: UploadPhase) {
    debug!("[UPLOAD] {} -> {}", phase, next);
    *phase = next;
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

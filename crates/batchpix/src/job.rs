//! Observable batch job lifecycle: idle → ready → converting → archiving →
//! completed, driven through submit / start / cancel / reset. Callers only
//! ever read summary state, the final archive handle, and per-item handles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::admission::{AdmissionFilter, CandidateFile, RejectReason};
use crate::archive::ARCHIVE_NAME;
use crate::codec::{CodecAdapter, PrimaryCodec};
use crate::config::ConverterConfig;
use crate::error::{ConfigError, JobError};
use crate::progress::{BatchPhase, BatchProgressBroadcaster, BatchProgressEvent};
use crate::scheduler::{BatchScheduler, ConvertOutcome, TaskReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Ready,
    Converting,
    Archiving,
    Completed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Idle => write!(f, "idle"),
            JobState::Ready => write!(f, "ready"),
            JobState::Converting => write!(f, "converting"),
            JobState::Archiving => write!(f, "archiving"),
            JobState::Completed => write!(f, "completed"),
        }
    }
}

/// One failed or rejected input, reported in the batch summary.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEntry {
    pub name: String,
    pub reason: String,
}

/// Structured result of one batch run. A non-empty failure list alongside an
/// archive is a partial success, not an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    /// Size of the whole submission, admitted or not.
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failure_reasons: Vec<FailureEntry>,
}

/// Caller-visible handle to the finished archive. Bytes are shared, so the
/// handle is cheap to clone; dropping the last clone releases the artifact.
#[derive(Debug, Clone)]
pub struct ArchiveHandle {
    id: String,
    archive_name: String,
    bytes: Arc<Vec<u8>>,
}

impl ArchiveHandle {
    fn new(bytes: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            archive_name: ARCHIVE_NAME.to_string(),
            bytes: Arc::new(bytes),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Suggested download filename.
    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Handle to one converted output, retrievable individually alongside the
/// batch archive. Released together with the archive handle on resubmit,
/// cancel, and reset.
#[derive(Debug, Clone)]
pub struct ItemHandle {
    id: String,
    entry_name: String,
    source_name: String,
    bytes: Arc<Vec<u8>>,
}

impl ItemHandle {
    fn new(entry_name: String, source_name: String, payload: Vec<u8>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entry_name,
            source_name,
            bytes: Arc::new(payload),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Output filename, identical to the entry name inside the archive.
    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

struct JobInner {
    state: JobState,
    job_id: String,
    /// Admitted set, retained while a retryable error is possible.
    files: Vec<CandidateFile>,
    /// Per-item admission rejections of the current submission.
    rejected: Vec<(String, RejectReason)>,
    /// Size of the whole current submission.
    submitted_total: usize,
    /// Cancel token owned by the current submission. Replaced wholesale on
    /// resubmit so a cancelled run can never be revived by a later batch.
    cancel: Arc<AtomicBool>,
    artifact: Option<ArchiveHandle>,
    items: Vec<ItemHandle>,
    summary: Option<BatchSummary>,
}

pub struct ConverterJob {
    config: ConverterConfig,
    codec: Arc<dyn PrimaryCodec>,
    filter: AdmissionFilter,
    progress: BatchProgressBroadcaster,
    inner: Mutex<JobInner>,
}

impl ConverterJob {
    pub fn new(config: ConverterConfig, codec: Arc<dyn PrimaryCodec>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            filter: AdmissionFilter::new(config.clone()),
            config,
            codec,
            progress: BatchProgressBroadcaster::default(),
            inner: Mutex::new(JobInner {
                state: JobState::Idle,
                job_id: String::new(),
                files: Vec::new(),
                rejected: Vec::new(),
                submitted_total: 0,
                cancel: Arc::new(AtomicBool::new(false)),
                artifact: None,
                items: Vec::new(),
                summary: None,
            }),
        })
    }

    pub fn state(&self) -> JobState {
        self.lock_inner().state
    }

    pub fn summary(&self) -> Option<BatchSummary> {
        self.lock_inner().summary.clone()
    }

    pub fn artifact(&self) -> Option<ArchiveHandle> {
        self.lock_inner().artifact.clone()
    }

    /// Converted outputs of the completed batch, in archive entry order.
    pub fn items(&self) -> Vec<ItemHandle> {
        self.lock_inner().items.clone()
    }

    /// Looks up one converted output by handle id.
    pub fn item(&self, id: &str) -> Option<ItemHandle> {
        self.lock_inner().items.iter().find(|i| i.id == id).cloned()
    }

    /// Number of admitted files waiting to convert.
    pub fn pending_files(&self) -> usize {
        self.lock_inner().files.len()
    }

    /// Subscribes to the progress event stream.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<BatchProgressEvent> {
        self.progress.subscribe()
    }

    /// Screens and stores a submission, replacing any prior pending set and
    /// releasing any prior handles. Batch-level admission errors leave the
    /// job untouched. Returns the admitted count.
    pub fn submit(&self, files: Vec<CandidateFile>) -> Result<usize, JobError> {
        let mut inner = self.lock_inner();
        match inner.state {
            JobState::Idle | JobState::Ready => {}
            state => {
                return Err(JobError::InvalidState {
                    operation: "submit",
                    state,
                })
            }
        }

        let submitted_total = files.len();
        let screened = self.filter.screen(files)?;
        let admitted = screened.admitted.len();

        inner.job_id = uuid::Uuid::new_v4().to_string();
        inner.files = screened.admitted;
        inner.rejected = screened.rejected;
        inner.submitted_total = submitted_total;
        // Fresh token per submission; a still-draining earlier run keeps its
        // own (already cancelled) token.
        inner.cancel = Arc::new(AtomicBool::new(false));
        inner.artifact = None;
        inner.items = Vec::new();
        inner.summary = None;
        inner.state = JobState::Ready;

        log::info!(
            "Submission accepted: {} admitted, {} rejected (job {})",
            admitted,
            inner.rejected.len(),
            inner.job_id
        );
        Ok(admitted)
    }

    /// Runs the batch to completion on the calling thread; the worker pool
    /// provides the parallelism. Retryable failures route the job back to
    /// `ready` with the file set retained.
    pub fn start(&self) -> Result<BatchSummary, JobError> {
        let (job_id, files, cancel) = {
            let mut inner = self.lock_inner();
            if inner.state != JobState::Ready {
                return Err(JobError::InvalidState {
                    operation: "start",
                    state: inner.state,
                });
            }
            inner.state = JobState::Converting;
            (
                inner.job_id.clone(),
                inner.files.clone(),
                Arc::clone(&inner.cancel),
            )
        };
        let total = files.len();

        let scheduler = BatchScheduler::new(
            CodecAdapter::new(Arc::clone(&self.codec), self.config.clone()),
            self.config.clone(),
            self.progress.clone(),
            Arc::clone(&cancel),
        );

        let results = match scheduler.convert(&job_id, files) {
            ConvertOutcome::Cancelled => {
                self.discard_after_cancel(&job_id);
                return Err(JobError::Cancelled);
            }
            ConvertOutcome::Drained { results } => results,
        };

        // A cancel can race the last completion; a cancelled job must not
        // advance to archiving.
        if cancel.load(Ordering::Relaxed) {
            self.discard_after_cancel(&job_id);
            return Err(JobError::Cancelled);
        }

        let succeeded = results.iter().filter(|r| r.converted.is_ok()).count();
        if succeeded == 0 {
            let summary = {
                let mut inner = self.commit_lock(&job_id, JobState::Converting)?;
                let reports: Vec<TaskReport> = results
                    .into_iter()
                    .map(|r| TaskReport {
                        source_name: r.source_name,
                        entry_name: None,
                        error: r.converted.err(),
                    })
                    .collect();
                let summary = build_summary(inner.submitted_total, &reports, &inner.rejected);
                inner.summary = Some(summary.clone());
                inner.state = JobState::Ready;
                summary
            };
            self.progress.send(BatchProgressEvent::failed(
                &job_id,
                total,
                total,
                "no files could be converted",
            ));
            return Err(JobError::AllConversionsFailed {
                failed: summary.failed,
            });
        }

        self.commit_lock(&job_id, JobState::Converting)?.state = JobState::Archiving;
        self.progress
            .send(BatchProgressEvent::new(&job_id, BatchPhase::Archiving, total, total));

        let (bytes, reports) = match scheduler.archive(&results) {
            Ok(assembled) => assembled,
            Err(e) => {
                log::error!("Archive assembly failed: {}", e);
                self.commit_lock(&job_id, JobState::Archiving)?.state = JobState::Ready;
                self.progress
                    .send(BatchProgressEvent::failed(&job_id, total, total, &e.to_string()));
                return Err(JobError::Archive(e));
            }
        };

        let summary = {
            let mut inner = self.commit_lock(&job_id, JobState::Archiving)?;
            let summary = build_summary(inner.submitted_total, &reports, &inner.rejected);
            inner.items = results
                .into_iter()
                .zip(&reports)
                .filter_map(|(result, report)| {
                    let entry_name = report.entry_name.clone()?;
                    let image = result.converted.ok()?;
                    Some(ItemHandle::new(entry_name, result.source_name, image.payload))
                })
                .collect();
            inner.artifact = Some(ArchiveHandle::new(bytes));
            inner.summary = Some(summary.clone());
            inner.files.clear();
            inner.state = JobState::Completed;
            summary
        };
        self.progress
            .send(BatchProgressEvent::new(&job_id, BatchPhase::Completed, total, total));
        log::info!(
            "Batch {} completed: {} succeeded, {} failed",
            job_id,
            summary.succeeded,
            summary.failed
        );
        Ok(summary)
    }

    /// Cancels a pending or running batch. Workers stop claiming items and
    /// any in-flight results are discarded on arrival.
    pub fn cancel(&self) -> Result<(), JobError> {
        let mut inner = self.lock_inner();
        match inner.state {
            JobState::Ready | JobState::Converting => {
                inner.cancel.store(true, Ordering::Relaxed);
                inner.state = JobState::Idle;
                inner.files.clear();
                inner.rejected.clear();
                inner.summary = None;
                inner.artifact = None;
                inner.items = Vec::new();
                log::info!("Batch {} cancelled", inner.job_id);
                Ok(())
            }
            state => Err(JobError::InvalidState {
                operation: "cancel",
                state,
            }),
        }
    }

    /// Releases the archive and item handles and returns to idle for the
    /// next batch.
    pub fn reset(&self) -> Result<(), JobError> {
        let mut inner = self.lock_inner();
        if inner.state != JobState::Completed {
            return Err(JobError::InvalidState {
                operation: "reset",
                state: inner.state,
            });
        }
        inner.state = JobState::Idle;
        inner.artifact = None;
        inner.items = Vec::new();
        inner.summary = None;
        inner.rejected.clear();
        inner.submitted_total = 0;
        Ok(())
    }

    fn discard_after_cancel(&self, job_id: &str) {
        let mut inner = self.lock_inner();
        // A newer submission already owns the job; leave it alone.
        if inner.job_id != job_id {
            return;
        }
        inner.state = JobState::Idle;
        inner.files.clear();
        inner.summary = None;
        inner.artifact = None;
        inner.items = Vec::new();
    }

    /// Relocks the job for a state transition owned by the running batch.
    /// Fails when the batch was cancelled or superseded by a new submission
    /// while the lock was released; a stale run must never commit anything.
    fn commit_lock(
        &self,
        job_id: &str,
        expected: JobState,
    ) -> Result<MutexGuard<'_, JobInner>, JobError> {
        let inner = self.lock_inner();
        if inner.job_id != job_id || inner.state != expected {
            return Err(JobError::Cancelled);
        }
        Ok(inner)
    }

    fn lock_inner(&self) -> MutexGuard<'_, JobInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job state lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

/// Merges admission rejections and conversion failures into the
/// caller-visible summary.
fn build_summary(
    total_files: usize,
    reports: &[TaskReport],
    rejected: &[(String, RejectReason)],
) -> BatchSummary {
    let mut failure_reasons: Vec<FailureEntry> = rejected
        .iter()
        .map(|(name, reason)| FailureEntry {
            name: name.clone(),
            reason: reason.to_string(),
        })
        .collect();

    let succeeded = reports.iter().filter(|r| r.entry_name.is_some()).count();
    for report in reports {
        if let Some(reason) = &report.error {
            failure_reasons.push(FailureEntry {
                name: report.source_name.clone(),
                reason: reason.clone(),
            });
        }
    }

    BatchSummary {
        total_files,
        succeeded,
        failed: failure_reasons.len(),
        failure_reasons,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CodecError;

    struct EchoCodec;

    impl PrimaryCodec for EchoCodec {
        fn convert(&self, payload: &[u8], _quality: f32) -> Result<Vec<Vec<u8>>, CodecError> {
            Ok(vec![payload.to_vec()])
        }
    }

    struct FailingCodec;

    impl PrimaryCodec for FailingCodec {
        fn convert(&self, _payload: &[u8], _quality: f32) -> Result<Vec<Vec<u8>>, CodecError> {
            Err(CodecError::Primary("decoder rejected input".to_string()))
        }
    }

    struct SlowCodec;

    impl PrimaryCodec for SlowCodec {
        fn convert(&self, payload: &[u8], _quality: f32) -> Result<Vec<Vec<u8>>, CodecError> {
            std::thread::sleep(std::time::Duration::from_millis(20));
            Ok(vec![payload.to_vec()])
        }
    }

    fn job() -> ConverterJob {
        ConverterJob::new(ConverterConfig::default(), Arc::new(EchoCodec)).unwrap()
    }

    fn heic(name: &str) -> CandidateFile {
        CandidateFile::new(name, name.as_bytes().to_vec(), Some("image/heic".to_string()))
    }

    #[test]
    fn test_initial_state_is_idle() {
        let job = job();
        assert_eq!(job.state(), JobState::Idle);
        assert!(job.summary().is_none());
        assert!(job.artifact().is_none());
        assert!(job.items().is_empty());
    }

    #[test]
    fn test_submit_moves_to_ready() {
        let job = job();
        let admitted = job.submit(vec![heic("a.heic"), heic("b.heic")]).unwrap();
        assert_eq!(admitted, 2);
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.pending_files(), 2);
    }

    #[test]
    fn test_submit_replaces_prior_pending_set() {
        let job = job();
        job.submit(vec![heic("a.heic")]).unwrap();
        job.submit(vec![heic("b.heic"), heic("c.heic")]).unwrap();
        assert_eq!(job.pending_files(), 2);
    }

    #[test]
    fn test_submit_rejection_leaves_state_unchanged() {
        let config = ConverterConfig {
            max_files: 1,
            ..Default::default()
        };
        let job = ConverterJob::new(config, Arc::new(EchoCodec)).unwrap();
        let err = job.submit(vec![heic("a.heic"), heic("b.heic")]).unwrap_err();
        assert!(matches!(
            err,
            JobError::Admission(crate::error::AdmissionError::TooManyFiles { count: 2, max: 1 })
        ));
        assert_eq!(job.state(), JobState::Idle);
        assert_eq!(job.pending_files(), 0);
    }

    #[test]
    fn test_start_requires_ready() {
        let job = job();
        let err = job.start().unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                operation: "start",
                state: JobState::Idle
            }
        ));
    }

    #[test]
    fn test_full_run_produces_archive_and_summary() {
        let job = job();
        job.submit(vec![heic("a.heic"), heic("b.heic"), heic("c.heic")])
            .unwrap();

        let summary = job.start().unwrap();
        assert_eq!(job.state(), JobState::Completed);
        assert_eq!(summary.total_files, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);

        let handle = job.artifact().unwrap();
        assert_eq!(handle.archive_name(), "converted_images.zip");
        assert!(!handle.is_empty());
        assert_eq!(&handle.bytes()[..2], b"PK");
    }

    #[test]
    fn test_completed_job_exposes_item_handles() {
        let job = job();
        job.submit(vec![heic("a.heic"), heic("b.heic")]).unwrap();
        job.start().unwrap();

        let items = job.items();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].entry_name(), "a.png");
        assert_eq!(items[0].source_name(), "a.heic");
        assert_eq!(items[0].bytes(), b"a.heic");
        assert_eq!(items[1].entry_name(), "b.png");
        assert_ne!(items[0].id(), items[1].id());

        let looked_up = job.item(items[1].id()).unwrap();
        assert_eq!(looked_up.entry_name(), "b.png");
        assert!(job.item("no-such-id").is_none());
    }

    #[test]
    fn test_summary_includes_admission_rejects() {
        let job = job();
        job.submit(vec![
            heic("a.heic"),
            CandidateFile::new("skip.txt", b"text".to_vec(), Some("text/plain".to_string())),
        ])
        .unwrap();

        let summary = job.start().unwrap();
        assert_eq!(summary.total_files, 2);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failure_reasons[0].name, "skip.txt");
        assert_eq!(summary.failure_reasons[0].reason, "unsupported type");
    }

    #[test]
    fn test_all_failed_is_batch_failure_and_retryable() {
        let job = ConverterJob::new(ConverterConfig::default(), Arc::new(FailingCodec)).unwrap();
        job.submit(vec![heic("a.heic"), heic("b.heic")]).unwrap();

        let err = job.start().unwrap_err();
        assert!(matches!(err, JobError::AllConversionsFailed { failed: 2 }));
        // Retryable: file set still held.
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.pending_files(), 2);
        assert!(job.artifact().is_none());

        let summary = job.summary().unwrap();
        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);
    }

    #[test]
    fn test_cancel_from_ready_discards_pending_set() {
        let job = job();
        job.submit(vec![heic("a.heic")]).unwrap();
        job.cancel().unwrap();
        assert_eq!(job.state(), JobState::Idle);
        assert_eq!(job.pending_files(), 0);
    }

    #[test]
    fn test_cancel_requires_active_job() {
        let job = job();
        assert!(matches!(
            job.cancel().unwrap_err(),
            JobError::InvalidState {
                operation: "cancel",
                ..
            }
        ));
    }

    #[test]
    fn test_cancel_then_resubmit_keeps_new_submission() {
        let config = ConverterConfig {
            concurrency: 1,
            ..Default::default()
        };
        let job = Arc::new(ConverterJob::new(config, Arc::new(SlowCodec)).unwrap());
        let files: Vec<CandidateFile> = (0..10).map(|i| heic(&format!("f{}.heic", i))).collect();
        job.submit(files).unwrap();

        let mut rx = job.subscribe();
        let runner = {
            let job = Arc::clone(&job);
            std::thread::spawn(move || job.start())
        };
        let first = rx.blocking_recv().unwrap();
        assert_eq!(first.phase, BatchPhase::Converting);

        // Cancel the running batch and immediately hand over a new one while
        // the old run is still draining.
        job.cancel().unwrap();
        job.submit(vec![heic("fresh.heic")]).unwrap();

        assert!(matches!(runner.join().unwrap(), Err(JobError::Cancelled)));
        // The stale run must not have committed anything over the new
        // submission: no completion, no stale artifact, file set intact.
        assert_eq!(job.state(), JobState::Ready);
        assert_eq!(job.pending_files(), 1);
        assert!(job.artifact().is_none());
        assert!(job.items().is_empty());

        let summary = job.start().unwrap();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(job.items().len(), 1);
        assert_eq!(job.items()[0].entry_name(), "fresh.png");
    }

    #[test]
    fn test_reset_releases_artifact() {
        let job = job();
        job.submit(vec![heic("a.heic")]).unwrap();
        job.start().unwrap();
        assert!(job.artifact().is_some());
        assert_eq!(job.items().len(), 1);

        job.reset().unwrap();
        assert_eq!(job.state(), JobState::Idle);
        assert!(job.artifact().is_none());
        assert!(job.items().is_empty());
        assert!(job.summary().is_none());
    }

    #[test]
    fn test_reset_requires_completed() {
        let job = job();
        assert!(matches!(
            job.reset().unwrap_err(),
            JobError::InvalidState {
                operation: "reset",
                ..
            }
        ));
    }

    #[test]
    fn test_new_submission_releases_prior_artifact() {
        let job = job();
        job.submit(vec![heic("a.heic")]).unwrap();
        job.start().unwrap();
        job.reset().unwrap();

        job.submit(vec![heic("b.heic")]).unwrap();
        assert!(job.artifact().is_none());
        assert!(job.items().is_empty());
        assert_eq!(job.state(), JobState::Ready);
    }
}

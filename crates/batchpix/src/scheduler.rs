//! Batch scheduler: drives a fixed-size worker pool over the admitted file
//! set, aggregates per-item outcomes, and assembles the archive in
//! submission order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;

use crate::admission::CandidateFile;
use crate::archive::ArchiveBuilder;
use crate::codec::{CodecAdapter, ConvertedImage};
use crate::config::ConverterConfig;
use crate::error::ArchiveError;
use crate::progress::{BatchPhase, BatchProgressBroadcaster, BatchProgressEvent};

/// Terminal outcome of one conversion task, keyed by submission index.
#[derive(Debug)]
pub struct TaskResult {
    pub index: usize,
    pub source_name: String,
    pub converted: Result<ConvertedImage, String>,
}

/// Per-task report after archive assembly.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub source_name: String,
    /// Entry name inside the archive (set when succeeded).
    pub entry_name: Option<String>,
    /// Failure reason (set when failed).
    pub error: Option<String>,
}

/// Result of the conversion phase.
#[derive(Debug)]
pub enum ConvertOutcome {
    /// The pool drained; results are in submission order.
    Drained { results: Vec<TaskResult> },
    /// A cancel signal arrived; in-flight results were discarded.
    Cancelled,
}

pub struct BatchScheduler {
    adapter: Arc<CodecAdapter>,
    config: ConverterConfig,
    progress: BatchProgressBroadcaster,
    cancel: Arc<AtomicBool>,
}

impl BatchScheduler {
    pub fn new(
        adapter: CodecAdapter,
        config: ConverterConfig,
        progress: BatchProgressBroadcaster,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            adapter: Arc::new(adapter),
            config,
            progress,
            cancel,
        }
    }

    /// Runs the worker pool until the shared work list drains or a cancel
    /// signal arrives.
    ///
    /// Workers claim items with a locked `pop_front` (a single atomic
    /// test-and-remove, so no file is ever converted twice) and send terminal
    /// outcomes over a channel. Only this thread counts completions and emits
    /// progress, which keeps the observed event stream strictly monotonic.
    pub fn convert(&self, job_id: &str, files: Vec<CandidateFile>) -> ConvertOutcome {
        let total = files.len();
        if total == 0 {
            return ConvertOutcome::Drained { results: vec![] };
        }

        let worker_count = self.config.concurrency.min(total);
        let queue: Mutex<VecDeque<(usize, CandidateFile)>> =
            Mutex::new(files.into_iter().enumerate().collect());
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<TaskResult>();

        let mut slots: Vec<Option<TaskResult>> = (0..total).map(|_| None).collect();
        let mut completed = 0usize;
        let mut cancelled = false;

        log::info!(
            "Starting conversion of {} files with {} workers",
            total,
            worker_count
        );

        std::thread::scope(|scope| {
            for worker_id in 0..worker_count {
                let result_tx = result_tx.clone();
                let queue = &queue;
                scope.spawn(move || {
                    log::debug!("Worker {} started", worker_id);
                    loop {
                        if self.cancel.load(Ordering::Relaxed) {
                            log::debug!("Worker {} received cancel signal", worker_id);
                            break;
                        }

                        let next = { lock_recovering(queue).pop_front() };
                        let Some((index, file)) = next else { break };

                        let converted = self.convert_one(&file);
                        let result = TaskResult {
                            index,
                            source_name: file.name,
                            converted,
                        };
                        if result_tx.send(result).is_err() {
                            break;
                        }
                    }
                    log::debug!("Worker {} stopped", worker_id);
                });
            }
            drop(result_tx);

            while completed < total {
                if self.cancel.load(Ordering::Relaxed) {
                    cancelled = true;
                    break;
                }
                match result_rx.recv_timeout(Duration::from_millis(50)) {
                    Ok(result) => {
                        completed += 1;
                        self.progress.send(BatchProgressEvent::new(
                            job_id,
                            BatchPhase::Converting,
                            completed,
                            total,
                        ));
                        let index = result.index;
                        slots[index] = Some(result);
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        if cancelled || self.cancel.load(Ordering::Relaxed) {
            // Late completions die with the channel; nothing is merged into
            // a cancelled job.
            log::info!("Conversion cancelled after {} of {} files", completed, total);
            return ConvertOutcome::Cancelled;
        }

        ConvertOutcome::Drained {
            results: slots.into_iter().flatten().collect(),
        }
    }

    fn convert_one(&self, file: &CandidateFile) -> Result<ConvertedImage, String> {
        // Size is the only thing re-validated after admission, right before
        // conversion begins.
        let actual = file.payload.len() as u64;
        if actual > self.config.max_file_size_bytes {
            return Err(format!(
                "file too large ({} bytes, limit {})",
                actual, self.config.max_file_size_bytes
            ));
        }

        self.adapter.convert(file).map_err(|e| {
            log::warn!("Conversion of '{}' failed: {}", file.name, e);
            format!("conversion failed: {}", e)
        })
    }

    /// Hands every succeeded task to the archive builder in task-submission
    /// order and finalizes the container. Assembly errors are fatal to the
    /// batch.
    pub fn archive(
        &self,
        results: &[TaskResult],
    ) -> Result<(Vec<u8>, Vec<TaskReport>), ArchiveError> {
        let mut builder = ArchiveBuilder::new();
        let mut reports = Vec::with_capacity(results.len());

        for result in results {
            match &result.converted {
                Ok(image) => {
                    let entry_name = builder.add(&image.name, &image.payload)?;
                    reports.push(TaskReport {
                        source_name: result.source_name.clone(),
                        entry_name: Some(entry_name),
                        error: None,
                    });
                }
                Err(reason) => reports.push(TaskReport {
                    source_name: result.source_name.clone(),
                    entry_name: None,
                    error: Some(reason.clone()),
                }),
            }
        }

        let bytes = builder.finalize()?;
        log::info!(
            "Archive finalized: {} entries, {} bytes",
            reports.iter().filter(|r| r.entry_name.is_some()).count(),
            bytes.len()
        );
        Ok((bytes, reports))
    }
}

fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("Work list lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

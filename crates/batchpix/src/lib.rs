pub mod admission;
pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod job;
pub mod progress;
pub mod scheduler;

pub use admission::{AdmissionDecision, AdmissionFilter, CandidateFile, RejectReason, Screened};
pub use archive::{ArchiveBuilder, ARCHIVE_NAME};
pub use codec::{CodecAdapter, ConvertedImage, PrimaryCodec, TARGET_SUFFIX};
pub use config::ConverterConfig;
pub use error::{
    AdmissionError, ArchiveError, BatchpixError, CodecError, ConfigError, JobError, Result,
};
pub use job::{ArchiveHandle, BatchSummary, ConverterJob, FailureEntry, ItemHandle, JobState};
pub use progress::{BatchPhase, BatchProgressBroadcaster, BatchProgressEvent};
pub use scheduler::{BatchScheduler, ConvertOutcome, TaskReport, TaskResult};

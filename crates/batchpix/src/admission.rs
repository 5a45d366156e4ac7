//! File admission: pure classification of candidate inputs before any
//! conversion work starts.

use std::path::Path;

use serde::Serialize;

use crate::config::ConverterConfig;
use crate::error::AdmissionError;

/// A raw input unit as handed over by the caller. Immutable once admitted.
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub payload: Vec<u8>,
    /// Size as declared at submission time. Re-checked against the payload
    /// before conversion begins.
    pub declared_size: u64,
    /// Declared media-type hint. Mobile capture pipelines frequently omit it.
    pub media_type: Option<String>,
}

impl CandidateFile {
    pub fn new(name: impl Into<String>, payload: Vec<u8>, media_type: Option<String>) -> Self {
        let declared_size = payload.len() as u64;
        Self {
            name: name.into(),
            payload,
            declared_size,
            media_type,
        }
    }

    /// Reads a candidate from disk, guessing the media type from the
    /// extension via the `mime_guess` crate.
    pub fn from_path(path: &Path) -> crate::error::Result<Self> {
        let payload = std::fs::read(path)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let media_type = mime_guess::from_path(path).first().map(|m| m.to_string());
        Ok(Self::new(name, payload, media_type))
    }
}

/// Reason a single candidate was excluded from the task set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    TooLarge { size: u64, max: u64 },
    UnsupportedType,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooLarge { size, max } => {
                write!(f, "file too large ({} bytes, limit {})", size, max)
            }
            RejectReason::UnsupportedType => write!(f, "unsupported type"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Accepted,
    Rejected(RejectReason),
}

/// Result of screening one whole submission.
#[derive(Debug)]
pub struct Screened {
    /// Admitted candidates in submission order.
    pub admitted: Vec<CandidateFile>,
    /// Per-item rejections, reported only in the batch summary.
    pub rejected: Vec<(String, RejectReason)>,
}

/// Ordered-rule admission filter. Classification only; no side effects.
pub struct AdmissionFilter {
    config: ConverterConfig,
}

impl AdmissionFilter {
    pub fn new(config: ConverterConfig) -> Self {
        Self { config }
    }

    /// Classifies one candidate. Rules are evaluated in order; the first
    /// match wins.
    pub fn admit(&self, candidate: &CandidateFile) -> AdmissionDecision {
        if candidate.declared_size > self.config.max_file_size_bytes {
            return AdmissionDecision::Rejected(RejectReason::TooLarge {
                size: candidate.declared_size,
                max: self.config.max_file_size_bytes,
            });
        }

        if matches_any_suffix(&candidate.name, &self.config.accepted_suffixes) {
            return AdmissionDecision::Accepted;
        }

        if let Some(media_type) = candidate.media_type.as_deref() {
            if !media_type.is_empty() {
                if matches_media_type(media_type, &self.config.accepted_media_types) {
                    return AdmissionDecision::Accepted;
                }
            } else {
                // Empty type means "unknown": let it through and defer the
                // real type check to the codec.
                return AdmissionDecision::Accepted;
            }
        } else {
            return AdmissionDecision::Accepted;
        }

        if self.config.enable_fallback_codec {
            if matches_any_suffix(&candidate.name, &self.config.fallback_suffixes) {
                return AdmissionDecision::Accepted;
            }
            if let Some(media_type) = candidate.media_type.as_deref() {
                if matches_media_type(media_type, &self.config.fallback_media_types) {
                    return AdmissionDecision::Accepted;
                }
            }
        }

        AdmissionDecision::Rejected(RejectReason::UnsupportedType)
    }

    /// Screens a whole submission. Batch-level violations reject the entire
    /// set with zero tasks created:
    /// - more than `max_files` candidates,
    /// - any candidate over the per-file size limit (the error names it),
    /// - zero admitted candidates after filtering.
    pub fn screen(&self, files: Vec<CandidateFile>) -> Result<Screened, AdmissionError> {
        if files.len() > self.config.max_files {
            return Err(AdmissionError::TooManyFiles {
                count: files.len(),
                max: self.config.max_files,
            });
        }

        let mut admitted = Vec::with_capacity(files.len());
        let mut rejected = Vec::new();

        for candidate in files {
            match self.admit(&candidate) {
                AdmissionDecision::Accepted => admitted.push(candidate),
                AdmissionDecision::Rejected(RejectReason::TooLarge { size, max }) => {
                    return Err(AdmissionError::FileTooLarge {
                        name: candidate.name,
                        size,
                        max,
                    });
                }
                AdmissionDecision::Rejected(reason) => {
                    log::debug!("Rejected '{}': {}", candidate.name, reason);
                    rejected.push((candidate.name, reason));
                }
            }
        }

        if admitted.is_empty() {
            return Err(AdmissionError::NoValidFiles);
        }

        Ok(Screened { admitted, rejected })
    }
}

/// Case-insensitive ASCII suffix match that never splits a UTF-8 character.
pub(crate) fn strip_suffix_ci<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let idx = name.len().checked_sub(suffix.len())?;
    if !name.is_char_boundary(idx) {
        return None;
    }
    let (stem, tail) = name.split_at(idx);
    tail.eq_ignore_ascii_case(suffix).then_some(stem)
}

fn matches_any_suffix(name: &str, suffixes: &[String]) -> bool {
    suffixes
        .iter()
        .any(|suffix| strip_suffix_ci(name, suffix).is_some())
}

fn matches_media_type(media_type: &str, accepted: &[String]) -> bool {
    accepted
        .iter()
        .any(|accepted| accepted.eq_ignore_ascii_case(media_type))
}

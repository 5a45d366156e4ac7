//! Batch progress broadcaster for real-time conversion status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Phase of batch processing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPhase {
    Converting,
    Archiving,
    Completed,
    Failed,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchPhase::Converting => write!(f, "Converting"),
            BatchPhase::Archiving => write!(f, "Archiving"),
            BatchPhase::Completed => write!(f, "Completed"),
            BatchPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a batch job: `(completed, total, phase)` plus context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgressEvent {
    /// Identifier of the batch job this event belongs to.
    pub job_id: String,
    pub phase: BatchPhase,
    /// Terminal task outcomes observed so far. Never decreases.
    pub completed: usize,
    pub total: usize,
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchProgressEvent {
    pub fn new(job_id: &str, phase: BatchPhase, completed: usize, total: usize) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase,
            completed,
            total,
            timestamp: Utc::now(),
            error: None,
        }
    }

    pub fn failed(job_id: &str, completed: usize, total: usize, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            phase: BatchPhase::Failed,
            completed,
            total,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Broadcasts batch progress events to any number of observers.
#[derive(Clone)]
pub struct BatchProgressBroadcaster {
    sender: Arc<broadcast::Sender<BatchProgressEvent>>,
}

impl BatchProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: BatchProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BatchProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BatchProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Batch progress reporting

use core_library::models::BookId;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Aggregate state of the running bulk download.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub book_id: BookId,
    /// Chapters selected for this batch.
    pub total: usize,
    /// Chapters finished by this batch.
    pub completed: usize,
    /// Chapters of the book on disk, counting those finished by this batch.
    pub downloaded: usize,
    pub current_title: Option<String>,
    /// Seconds left, known once one chapter has finished.
    pub eta_secs: Option<f64>,
}

impl BatchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}

/// How a batch ended.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    Finished { completed: usize },
    Cancelled { completed: usize },
    Failed { completed: usize, message: String },
}

impl BatchOutcome {
    pub fn completed(&self) -> usize {
        match self {
            BatchOutcome::Finished { completed }
            | BatchOutcome::Cancelled { completed }
            | BatchOutcome::Failed { completed, .. } => *completed,
        }
    }

    /// Message to surface to the user. Cancellation is silent.
    pub fn alert_message(&self) -> Option<&str> {
        match self {
            BatchOutcome::Failed { message, .. } => Some(message),
            _ => None,
        }
    }
}

/// Mean per-chapter time multiplied by the chapters left.
#[derive(Debug, Clone, Default)]
pub struct EtaEstimator {
    finished: u32,
    elapsed: Duration,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, item_elapsed: Duration) {
        self.finished += 1;
        self.elapsed += item_elapsed;
    }

    pub fn estimate(&self, remaining: usize) -> Option<Duration> {
        if self.finished == 0 {
            return None;
        }
        let average = self.elapsed / self.finished;
        Some(average.saturating_mul(remaining as u32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eta_unknown_until_first_item() {
        let eta = EtaEstimator::new();
        assert_eq!(eta.estimate(3), None);
    }

    #[test]
    fn test_eta_uses_running_average() {
        let mut eta = EtaEstimator::new();
        eta.record(Duration::from_secs(4));
        assert_eq!(eta.estimate(2), Some(Duration::from_secs(8)));

        eta.record(Duration::from_secs(2));
        assert_eq!(eta.estimate(3), Some(Duration::from_secs(9)));
        assert_eq!(eta.estimate(0), Some(Duration::ZERO));
    }

    #[test]
    fn test_outcome_alerts_only_on_failure() {
        assert_eq!(BatchOutcome::Cancelled { completed: 2 }.alert_message(), None);
        assert_eq!(BatchOutcome::Finished { completed: 2 }.alert_message(), None);
        let failed = BatchOutcome::Failed {
            completed: 1,
            message: "HTTP 500".to_string(),
        };
        assert_eq!(failed.alert_message(), Some("HTTP 500"));
        assert_eq!(failed.completed(), 1);
    }

    #[test]
    fn test_fraction() {
        let progress = BatchProgress {
            book_id: BookId::from("b"),
            total: 4,
            completed: 1,
            downloaded: 3,
            current_title: None,
            eta_secs: None,
        };
        assert_eq!(progress.fraction(), 0.25);
    }
}

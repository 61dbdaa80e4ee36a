// src/services/progress.rs
use crate::models::GenerationProgress;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;

/// Single writer for a run's progress. Every update replaces the whole
/// snapshot, so subscribers never observe a half-applied change.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    tx: Arc<watch::Sender<GenerationProgress>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GenerationProgress::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<GenerationProgress> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> GenerationProgress {
        self.tx.borrow().clone()
    }

    pub fn reset(&self) {
        self.tx.send_replace(GenerationProgress::default());
    }

    pub fn begin(&self, total: usize, started_at: DateTime<Utc>) {
        self.tx.send_replace(GenerationProgress {
            total,
            start_time: Some(started_at),
            ..GenerationProgress::default()
        });
    }

    pub fn start_unit(&self, section_id: &str, section_title: &str) {
        self.tx.send_modify(|progress| {
            progress.current_section_id = section_id.to_string();
            progress.current_section_title = section_title.to_string();
        });
    }

    pub fn complete_unit(&self, section_id: &str) {
        self.tx.send_modify(|progress| {
            progress.current += 1;
            progress.completed_section_ids.push(section_id.to_string());
            progress.current_section_id.clear();
            progress.current_section_title.clear();
        });
    }
}

/// Time estimate derived from a progress snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEstimate {
    pub percent: f64,
    pub elapsed_secs: f64,
    pub avg_secs_per_unit: Option<f64>,
    pub remaining_secs: Option<f64>,
}

impl ProgressEstimate {
    pub fn from_snapshot(progress: &GenerationProgress, now: DateTime<Utc>) -> Self {
        let elapsed_secs = progress
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as f64 / 1000.0)
            .unwrap_or(0.0);

        let percent = if progress.total == 0 {
            0.0
        } else {
            (progress.current as f64 / progress.total as f64 * 100.0).min(100.0)
        };

        let avg_secs_per_unit =
            (progress.current > 0).then(|| elapsed_secs / progress.current as f64);
        let remaining_secs = avg_secs_per_unit
            .map(|avg| avg * progress.total.saturating_sub(progress.current) as f64);

        Self {
            percent,
            elapsed_secs,
            avg_secs_per_unit,
            remaining_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn complete_unit_advances_count_and_ids_together() {
        let tracker = ProgressTracker::new();
        tracker.begin(3, Utc::now());

        for (i, id) in ["a", "b", "c"].into_iter().enumerate() {
            tracker.start_unit(id, "title");
            let during = tracker.snapshot();
            assert_eq!(during.current, i);
            assert_eq!(during.current_section_id, id);

            tracker.complete_unit(id);
            let after = tracker.snapshot();
            assert_eq!(after.current, i + 1);
            assert_eq!(after.completed_section_ids.len(), after.current);
            assert!(after.current_section_id.is_empty());
            assert!(after.current_section_title.is_empty());
        }
    }

    #[test]
    fn reset_returns_to_idle() {
        let tracker = ProgressTracker::new();
        tracker.begin(2, Utc::now());
        tracker.start_unit("x", "X");
        tracker.reset();

        let snapshot = tracker.snapshot();
        assert!(snapshot.is_idle());
        assert_eq!(snapshot, GenerationProgress::default());
    }

    #[tokio::test]
    async fn subscribers_see_latest_snapshot() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.begin(1, Utc::now());
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().total, 1);

        tracker.complete_unit("only");
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().completed_section_ids, vec!["only".to_string()]);
    }

    #[test]
    fn estimate_extrapolates_from_average() {
        let start = Utc::now();
        let progress = GenerationProgress {
            total: 4,
            current: 1,
            start_time: Some(start),
            ..GenerationProgress::default()
        };

        let estimate = ProgressEstimate::from_snapshot(&progress, start + Duration::seconds(10));
        assert_eq!(estimate.percent, 25.0);
        assert_eq!(estimate.elapsed_secs, 10.0);
        assert_eq!(estimate.avg_secs_per_unit, Some(10.0));
        assert_eq!(estimate.remaining_secs, Some(30.0));
    }

    #[test]
    fn estimate_is_empty_before_first_unit() {
        let estimate = ProgressEstimate::from_snapshot(&GenerationProgress::default(), Utc::now());
        assert_eq!(estimate.percent, 0.0);
        assert_eq!(estimate.elapsed_secs, 0.0);
        assert!(estimate.remaining_secs.is_none());
    }
}

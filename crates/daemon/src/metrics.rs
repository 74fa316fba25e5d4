//! Metrics module for Reel
//!
//! Provides structs for in-flight ingest tracking and aggregate counters,
//! with JSON serialization support.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Per-run metrics for an ingest in flight
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestMetrics {
    pub run_id: String,
    pub source: String,
    pub stage: String,
    pub source_bytes: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub timestamp_unix_ms: i64,
    pub ingests: Vec<IngestMetrics>,
    pub library_videos: usize,
    pub completed_ingests: u64,
    pub failed_ingests: u64,
    pub failed_variants: u64,
    pub total_bytes_ingested: u64,
}

impl MetricsSnapshot {
    /// Record the current stage of a tracked run.
    pub fn set_stage(&mut self, run_id: &str, stage: &str) {
        if let Some(run) = self.ingests.iter_mut().find(|r| r.run_id == run_id) {
            run.stage = stage.to_string();
        }
    }

    /// Drop a run from the in-flight list.
    pub fn finish(&mut self, run_id: &str) {
        self.ingests.retain(|r| r.run_id != run_id);
    }

    /// Stamp the snapshot with the current wall-clock time.
    pub fn touch(&mut self) {
        self.timestamp_unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
    }
}

/// Shared metrics state for concurrent access across daemon components
pub type SharedMetrics = Arc<RwLock<MetricsSnapshot>>;

/// Creates a new SharedMetrics instance with default values
pub fn new_shared_metrics() -> SharedMetrics {
    Arc::new(RwLock::new(MetricsSnapshot::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stage_tracking() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.ingests.push(IngestMetrics {
            run_id: "a".into(),
            source: "upload".into(),
            stage: "stage_input".into(),
            source_bytes: 0,
        });

        snapshot.set_stage("a", "transcode");
        snapshot.set_stage("missing", "transcode");
        assert_eq!(snapshot.ingests.len(), 1);
        assert_eq!(snapshot.ingests[0].stage, "transcode");

        snapshot.finish("a");
        assert!(snapshot.ingests.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]
        #[test]
        fn prop_metrics_snapshot_serializes_counters(
            completed in any::<u64>(),
            failed in any::<u64>(),
            failed_variants in any::<u64>(),
            bytes in any::<u64>(),
            runs in 0usize..5,
        ) {
            let snapshot = MetricsSnapshot {
                timestamp_unix_ms: 1,
                ingests: (0..runs).map(|i| IngestMetrics {
                    run_id: format!("run-{}", i),
                    source: "upload".to_string(),
                    stage: "transcode".to_string(),
                    source_bytes: 1024,
                }).collect(),
                library_videos: runs,
                completed_ingests: completed,
                failed_ingests: failed,
                failed_variants,
                total_bytes_ingested: bytes,
            };

            let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
            prop_assert_eq!(json["completed_ingests"].as_u64(), Some(completed));
            prop_assert_eq!(json["failed_variants"].as_u64(), Some(failed_variants));
            prop_assert_eq!(json["ingests"].as_array().map(Vec::len), Some(runs));
        }
    }
}

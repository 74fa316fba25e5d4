//! Concurrency planning module for Reel
//!
//! Derives how many ingestion runs may transcode at once, and how many
//! encoder threads each run gets, from the CPU core count and configuration.

use crate::config::Config;

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Maximum number of concurrent ingestion runs
    pub max_concurrent_ingests: u32,
    /// Encoder threads handed to each transcoder invocation
    pub transcoder_threads: u32,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus
    /// - Uses `transcoder.max_concurrent` when non-zero
    /// - Otherwise one run per 8 cores, at least 1 and at most 4
    /// - Splits the cores evenly between runs
    pub fn derive(cfg: &Config) -> Self {
        Self::for_cores(num_cpus::get() as u32, cfg.transcoder.max_concurrent)
    }

    /// Derive a plan for a known core count
    ///
    /// # Arguments
    /// * `cores` - Logical cores available
    /// * `explicit_runs` - Configured run limit (0 = derive)
    pub fn for_cores(cores: u32, explicit_runs: u32) -> Self {
        let total_cores = cores.max(1);

        let max_concurrent_ingests = if explicit_runs > 0 {
            explicit_runs
        } else {
            derive_max_ingests(total_cores)
        };

        let transcoder_threads = (total_cores / max_concurrent_ingests).max(1);

        Self {
            total_cores,
            max_concurrent_ingests,
            transcoder_threads,
        }
    }
}

/// One run per 8 cores, clamped to [1, 4]
fn derive_max_ingests(cores: u32) -> u32 {
    (cores / 8).clamp(1, 4)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

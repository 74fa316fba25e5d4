//! Size Gate Module
//!
//! Pre-download and streaming checks keeping ingested sources under the
//! configured ceiling.

use serde::{Deserialize, Serialize};

/// Result of the size gate check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeGateResult {
    /// Size is known and within the ceiling
    Accept,
    /// Size is unknown or exceeds the ceiling
    Reject {
        actual_bytes: Option<u64>,
        limit_bytes: u64,
    },
}

impl SizeGateResult {
    pub fn is_accept(&self) -> bool {
        matches!(self, SizeGateResult::Accept)
    }
}

/// Check a (possibly unknown) size against the ceiling.
///
/// Returns `Reject` if `actual_bytes` is `None` or greater than
/// `limit_bytes`, otherwise returns `Accept`.
///
/// # Arguments
/// * `actual_bytes` - Announced or observed size in bytes, if known
/// * `limit_bytes` - Maximum accepted size in bytes
pub fn check_size_limit(actual_bytes: Option<u64>, limit_bytes: u64) -> SizeGateResult {
    match actual_bytes {
        Some(bytes) if bytes <= limit_bytes => SizeGateResult::Accept,
        _ => SizeGateResult::Reject {
            actual_bytes,
            limit_bytes,
        },
    }
}

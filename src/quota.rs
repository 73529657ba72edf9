use serde::Deserialize;

use crate::model::{QuotaSnapshot, QuotaUsage};

/// Sentinel for tiers with no daily recording cap.
pub const UNLIMITED: i64 = -1;

/// Per-tier resource limits.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct TierLimits {
    /// Maximum clip length in seconds.
    pub max_duration_secs: u32,
    pub max_file_size_bytes: u64,
    /// Recordings per UTC day; -1 means unlimited.
    pub daily_limit: i64,
    pub storage_quota_gb: f64,
}

/// Subscription tier of the uploading user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Premium,
}

impl Tier {
    pub fn limits(&self) -> TierLimits {
        match self {
            Tier::Free => TierLimits {
                max_duration_secs: 60,
                max_file_size_bytes: 10 * 1024 * 1024,
                daily_limit: 10,
                storage_quota_gb: 0.5,
            },
            Tier::Pro => TierLimits {
                max_duration_secs: 180,
                max_file_size_bytes: 25 * 1024 * 1024,
                daily_limit: 100,
                storage_quota_gb: 5.0,
            },
            Tier::Premium => TierLimits {
                max_duration_secs: 600,
                max_file_size_bytes: 50 * 1024 * 1024,
                daily_limit: UNLIMITED,
                storage_quota_gb: 50.0,
            },
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "pro" => Some(Tier::Pro),
            "premium" => Some(Tier::Premium),
            _ => None,
        }
    }
}

/// Evaluate a quota snapshot for one upload attempt.
///
/// Pure function of the tier limits and the caller's persisted usage. The
/// requested duration/size are optional: the upload gate knows the byte
/// length up front but cannot measure duration until decode, in which case
/// the queue processor enforces the duration cap once the clip is decoded.
///
/// `limit_reason` names the first violated constraint in priority order
/// duration > size > daily > storage.
pub fn evaluate(
    limits: TierLimits,
    daily_count: i64,
    total_storage_gb: f64,
    requested_file_size: Option<u64>,
    requested_duration_secs: Option<f64>,
) -> QuotaSnapshot {
    let duration_ok = match requested_duration_secs {
        Some(d) => d <= limits.max_duration_secs as f64,
        None => true,
    };
    let size_ok = match requested_file_size {
        Some(s) => s <= limits.max_file_size_bytes,
        None => true,
    };
    let daily_ok = limits.daily_limit == UNLIMITED || daily_count < limits.daily_limit;
    let storage_ok = total_storage_gb < limits.storage_quota_gb;

    let limit_reason = if !duration_ok {
        Some("duration".to_string())
    } else if !size_ok {
        Some("size".to_string())
    } else if !daily_ok {
        Some("daily".to_string())
    } else if !storage_ok {
        Some("storage".to_string())
    } else {
        None
    };

    QuotaSnapshot {
        max_duration_secs: limits.max_duration_secs,
        max_file_size_bytes: limits.max_file_size_bytes,
        daily_limit: limits.daily_limit,
        storage_quota_gb: limits.storage_quota_gb,
        current_usage: QuotaUsage {
            daily_count,
            total_storage_gb,
        },
        can_record: limit_reason.is_none(),
        limit_reason,
    }
}

/// Bytes to gigabytes for storage accounting.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

//! Typed access to the persistent `config` table
//!
//! Values are stored as strings. Numeric settings have a per-key clamp that
//! is applied when the value is read through a bounded accessor; writes are
//! stored as given.

use crate::error::{NvmError, Result};
use crate::store::{self, PersistentStore};
use std::sync::Arc;

pub const KEY_ENCRYPT_GATHER_SUPPORT: &str = "ENCRYPT_GATHER_SUPPORT";
pub const KEY_GATHER_SUPPORT_FILTER: &str = "GATHER_SUPPORT_FILTER";
pub const KEY_SUPPORT_SNAPSHOT_MAX: &str = "SUPPORT_SNAPSHOT_MAX";
pub const KEY_LOG_LEVEL: &str = "LOG_LEVEL";
pub const KEY_VALID_MANUFACTURER: &str = "VALID_MANUFACTURER";
pub const KEY_VALID_MODEL_NUM: &str = "VALID_MODEL_NUM";
pub const KEY_VALID_VENDOR_ID: &str = "VALID_VENDOR_ID";
pub const KEY_UNCORRECTABLE_THRESHOLD: &str = "UNCORRECTABLE_ERRORS_THRESHOLD";
pub const KEY_CORRECTED_THRESHOLD: &str = "CORRECTED_ERRORS_THRESHOLD";
pub const KEY_ERASURE_CODED_CORRECTED_THRESHOLD: &str = "ERASURE_CODED_CORRECTED_ERRORS_THRESHOLD";
pub const KEY_PERCENT_USED_THRESHOLD: &str = "PERCENT_USED_THRESHOLD";
pub const KEY_MAX_HEALTH_STATUS: &str = "MAX_HEALTH_STATUS";
pub const KEY_LOG_DESTINATION: &str = "LOG_DESTINATION";
pub const KEY_LOG_MAX: &str = "LOG_MAX";
pub const KEY_DEFAULT_TEMPERATURE_THRESHOLD: &str = "DEFAULT_TEMPERATURE_THRESHOLD";
pub const KEY_DEFAULT_SPARE_BLOCK_THRESHOLD: &str = "DEFAULT_SPARE_BLOCK_THRESHOLD";
pub const KEY_FW_LOG_LEVEL: &str = "FW_LOG_LEVEL";
pub const KEY_FW_TIME_DRIFT: &str = "FW_TIME_DRIFT";
pub const KEY_FW_TDP_POW_MIN: &str = "FW_TDP_POW_MIN";
pub const KEY_FW_TDP_POW_MAX: &str = "FW_TDP_POW_MAX";
pub const KEY_FW_PEAK_POW_BUDGET_MIN: &str = "FW_PEAK_POW_BUDGET_MIN";
pub const KEY_FW_PEAK_POW_BUDGET_MAX: &str = "FW_PEAK_POW_BUDGET_MAX";
pub const KEY_FW_AVG_POW_BUDGET_MIN: &str = "FW_AVG_POW_BUDGET_MIN";
pub const KEY_FW_AVG_POW_BUDGET_MAX: &str = "FW_AVG_POW_BUDGET_MAX";
pub const KEY_FW_DIE_SPARING_AGGRESSIVENESS: &str = "FW_DIE_SPARING_AGGRESSIVENESS";
pub const KEY_TOPOLOGY_STATE_VALID: &str = "TOPOLOGY_STATE_VALID";
pub const KEY_EVENT_POLLING_INTERVAL_MINUTES: &str = "EVENT_POLLING_INTERVAL_MINUTES";
pub const KEY_CLI_DEFAULT_DIMM_ID: &str = "CLI_DEFAULT_DIMM_ID";
pub const KEY_CLI_DEFAULT_SIZE: &str = "CLI_DEFAULT_SIZE";
pub const KEY_EVENT_MONITOR_ENABLED: &str = "EVENT_MONITOR_ENABLED";
pub const KEY_EVENT_MONITOR_INTERVAL_MINUTES: &str = "EVENT_MONITOR_INTERVAL_MINUTES";
pub const KEY_EVENT_LOG_MAX: &str = "EVENT_LOG_MAX";
pub const KEY_EVENT_LOG_TRIM_PERCENT: &str = "EVENT_LOG_TRIM_PERCENT";
pub const KEY_PERFORMANCE_MONITOR_ENABLED: &str = "PERFORMANCE_MONITOR_ENABLED";
pub const KEY_PERFORMANCE_MONITOR_INTERVAL_MINUTES: &str = "PERFORMANCE_MONITOR_INTERVAL_MINUTES";
pub const KEY_PERFORMANCE_LOG_MAX: &str = "PERFORMANCE_LOG_MAX";
pub const KEY_PERFORMANCE_LOG_TRIM_PERCENT: &str = "PERFORMANCE_LOG_TRIM_PERCENT";

pub const MAX_TRIM_PERCENT: i64 = 100;

/// Values seeded into a freshly created store.
pub const DEFAULT_SETTINGS: &[(&str, &str)] = &[
    (KEY_LOG_LEVEL, "0"),
    (KEY_EVENT_POLLING_INTERVAL_MINUTES, "1"),
    (KEY_ENCRYPT_GATHER_SUPPORT, "1"),
    (KEY_GATHER_SUPPORT_FILTER, "15"),
    (KEY_SUPPORT_SNAPSHOT_MAX, "100"),
    (KEY_VALID_MANUFACTURER, "0x0089"),
    (KEY_VALID_MODEL_NUM, "MN: 0123456789"),
    (KEY_VALID_VENDOR_ID, "0x8086"),
    (KEY_UNCORRECTABLE_THRESHOLD, "10"),
    (KEY_CORRECTED_THRESHOLD, "10"),
    (KEY_ERASURE_CODED_CORRECTED_THRESHOLD, "10"),
    (KEY_PERCENT_USED_THRESHOLD, "90"),
    (KEY_MAX_HEALTH_STATUS, "0"),
    (KEY_LOG_DESTINATION, "0"),
    (KEY_LOG_MAX, "10000"),
    (KEY_DEFAULT_TEMPERATURE_THRESHOLD, "81.5"),
    (KEY_DEFAULT_SPARE_BLOCK_THRESHOLD, "50"),
    (KEY_FW_LOG_LEVEL, "1"),
    (KEY_FW_TIME_DRIFT, "120"),
    (KEY_FW_TDP_POW_MIN, "10"),
    (KEY_FW_TDP_POW_MAX, "18"),
    (KEY_FW_PEAK_POW_BUDGET_MIN, "100"),
    (KEY_FW_PEAK_POW_BUDGET_MAX, "20000"),
    (KEY_FW_AVG_POW_BUDGET_MIN, "100"),
    (KEY_FW_AVG_POW_BUDGET_MAX, "18000"),
    (KEY_FW_DIE_SPARING_AGGRESSIVENESS, "128"),
    (KEY_PERFORMANCE_MONITOR_ENABLED, "1"),
    (KEY_PERFORMANCE_MONITOR_INTERVAL_MINUTES, "180"),
    (KEY_PERFORMANCE_LOG_MAX, "10000"),
    (KEY_PERFORMANCE_LOG_TRIM_PERCENT, "30"),
    (KEY_EVENT_MONITOR_ENABLED, "1"),
    (KEY_EVENT_MONITOR_INTERVAL_MINUTES, "1"),
    (KEY_EVENT_LOG_MAX, "10000"),
    (KEY_EVENT_LOG_TRIM_PERCENT, "10"),
    (KEY_TOPOLOGY_STATE_VALID, "0"),
    (KEY_CLI_DEFAULT_DIMM_ID, "HANDLE"),
    (KEY_CLI_DEFAULT_SIZE, "AUTO"),
];

/// Inclusive `(lower, upper)` clamp for `key`, if it has one.
pub fn bounds_for(key: &str) -> Option<(i64, i64)> {
    match key {
        KEY_EVENT_POLLING_INTERVAL_MINUTES
        | KEY_EVENT_MONITOR_INTERVAL_MINUTES
        | KEY_PERFORMANCE_MONITOR_INTERVAL_MINUTES => Some((1, i64::MAX)),
        KEY_SUPPORT_SNAPSHOT_MAX => Some((0, 100)),
        KEY_LOG_MAX | KEY_EVENT_LOG_MAX | KEY_PERFORMANCE_LOG_MAX => Some((0, 10_000)),
        KEY_EVENT_LOG_TRIM_PERCENT | KEY_PERFORMANCE_LOG_TRIM_PERCENT => {
            Some((10, MAX_TRIM_PERCENT))
        }
        _ => None,
    }
}

/// Clamp `value` into the bounds of `key`. Unbounded keys pass through.
pub fn apply_bound(key: &str, value: i64) -> i64 {
    match bounds_for(key) {
        Some((lower, upper)) => value.clamp(lower, upper),
        None => value,
    }
}

/// Parse the leading integer of `text` the way `strtol` with base 0 would,
/// restricted to decimal and `0x` hex.
///
/// Trailing garbage is ignored (`"81.5"` is 81); no digits at all is an error.
/// Values outside the `i64` range clamp to `i64::MIN` / `i64::MAX`.
pub fn parse_int(text: &str) -> Result<i64> {
    let s = text.trim_start();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (radix, digits) = match s.get(..2) {
        Some("0x") | Some("0X") if s[2..].starts_with(|c: char| c.is_ascii_hexdigit()) => {
            (16, &s[2..])
        }
        _ => (10, s),
    };

    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    if end == 0 {
        return Err(NvmError::InvalidParameter);
    }

    // accumulate toward the sign so i64::MIN parses; out of range saturates
    let value = digits[..end]
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0i64, |acc, digit| {
            let acc = acc.saturating_mul(i64::from(radix));
            if negative {
                acc.saturating_sub(i64::from(digit))
            } else {
                acc.saturating_add(i64::from(digit))
            }
        });
    Ok(value)
}

/// Typed configuration access over the persistent store.
#[derive(Clone)]
pub struct ConfigStore {
    store: Arc<PersistentStore>,
}

impl ConfigStore {
    pub fn new(store: Arc<PersistentStore>) -> Self {
        Self { store }
    }

    pub async fn get_value(&self, key: &str) -> Result<String> {
        let mut conn = self.store.acquire().await?;
        store::config_get(&mut conn, key)
            .await?
            .ok_or(NvmError::NotFound)
    }

    pub async fn get_value_int(&self, key: &str) -> Result<i64> {
        let value = self.get_value(key).await?;
        parse_int(&value)
    }

    pub async fn get_bounded_value_int(&self, key: &str) -> Result<i64> {
        let value = self.get_value_int(key).await?;
        Ok(apply_bound(key, value))
    }

    pub async fn get_bounded_value(&self, key: &str) -> Result<String> {
        Ok(self.get_bounded_value_int(key).await?.to_string())
    }

    /// Bounded integer value, or `default` when the key is absent or unparsable.
    pub async fn get_bounded_value_int_or(&self, key: &str, default: i64) -> i64 {
        match self.get_bounded_value_int(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(key, error = %e, default, "Using default setting");
                default
            }
        }
    }

    /// True iff clamping `value` for `key` leaves it unchanged.
    pub fn is_valid_value(&self, key: &str, value: i64) -> bool {
        apply_bound(key, value) == value
    }

    /// Insert or replace `key`. The value is stored unclamped.
    pub async fn add_value(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.store.acquire().await?;
        store::config_upsert(&mut conn, key, value).await
    }

    /// Delete `key`. Removing an absent key succeeds.
    pub async fn remove_value(&self, key: &str) -> Result<()> {
        let mut conn = self.store.acquire().await?;
        if !store::config_delete(&mut conn, key).await? {
            tracing::debug!(key, "Config key not present, nothing removed");
        }
        Ok(())
    }

    /// Write every default setting in one transaction.
    pub async fn set_defaults(&self) -> Result<()> {
        let mut tx = self.store.begin().await?;
        for (key, value) in DEFAULT_SETTINGS {
            store::config_upsert(&mut tx, key, value).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

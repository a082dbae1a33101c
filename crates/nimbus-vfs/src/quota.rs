//! Quota headroom and the advisory over-quota alert.
//!
//! Usage is never cached: every write recomputes it from the index under
//! the tenant write lock. The alert fires when usage crosses 90% of the
//! quota, upward after a write and downward after a destroy.

use std::sync::OnceLock;

use crate::error::{VfsError, VfsResult};

/// Callback invoked with `(tenant, exceeded)`.
pub type QuotaAlertFn = Box<dyn Fn(&str, bool) + Send + Sync>;

static QUOTA_ALERT: OnceLock<QuotaAlertFn> = OnceLock::new();

/// Register the process-wide quota alert.
///
/// Only the first registration is kept; returns false for any later one.
pub fn register_quota_alert(f: impl Fn(&str, bool) + Send + Sync + 'static) -> bool {
    QUOTA_ALERT.set(Box::new(f)).is_ok()
}

pub(crate) fn emit_quota_alert(tenant: &str, exceeded: bool) {
    tracing::info!(tenant = %tenant, exceeded, "quota alert");
    if let Some(f) = QUOTA_ALERT.get() {
        f(tenant, exceeded);
    }
}

/// Usage level at which the alert fires, if a quota is set.
pub fn quota_cap(quota: i64) -> Option<u64> {
    (quota > 0).then(|| (quota as u64) * 9 / 10)
}

/// Direction of a 90% line crossing between two usage readings.
pub fn cap_crossing(quota: i64, before: u64, after: u64) -> Option<bool> {
    let cap = quota_cap(quota)?;
    match (before >= cap, after >= cap) {
        (false, true) => Some(true),
        (true, false) => Some(false),
        _ => None,
    }
}

/// What a write may consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskBudget {
    /// Most bytes the write may stream; `None` is unbounded.
    pub max_bytes: Option<u64>,
    /// Usage when the budget was computed.
    pub used: u64,
    pub quota: i64,
}

/// Compute the headroom for a write of `new_size` replacing `old_size`.
///
/// Fails with [`VfsError::FileTooBig`] when there is no headroom at all or
/// the declared growth does not fit.
pub fn check_available_disk_space(
    quota: i64,
    used: u64,
    max_file_size: Option<u64>,
    new_size: Option<u64>,
    old_size: u64,
) -> VfsResult<DiskBudget> {
    let headroom = (quota > 0).then(|| quota - used as i64);
    if let Some(h) = headroom
        && h <= 0
    {
        return Err(VfsError::FileTooBig);
    }
    let max_bytes = match (headroom.map(|h| h as u64), max_file_size) {
        (Some(h), Some(m)) => Some(h.min(m)),
        (h, m) => h.or(m),
    };
    if let (Some(max), Some(new)) = (max_bytes, new_size) {
        if new.saturating_sub(old_size) > max {
            return Err(VfsError::FileTooBig);
        }
        if let Some(m) = max_file_size
            && new > m
        {
            return Err(VfsError::FileTooBig);
        }
    }
    Ok(DiskBudget {
        max_bytes,
        used,
        quota,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited() {
        let b = check_available_disk_space(0, 10_000, None, Some(1 << 40), 0).unwrap();
        assert_eq!(b.max_bytes, None);
    }

    #[test]
    fn test_no_headroom() {
        assert!(matches!(
            check_available_disk_space(100, 100, None, Some(0), 0),
            Err(VfsError::FileTooBig)
        ));
    }

    #[test]
    fn test_growth_is_checked_not_size() {
        assert!(check_available_disk_space(100, 90, None, Some(50), 45).is_ok());
        assert!(check_available_disk_space(100, 90, None, Some(50), 30).is_err());
    }

    #[test]
    fn test_max_file_size_caps_budget() {
        let b = check_available_disk_space(1000, 0, Some(10), None, 0).unwrap();
        assert_eq!(b.max_bytes, Some(10));
        assert!(check_available_disk_space(0, 0, Some(10), Some(11), 0).is_err());
    }

    #[test]
    fn test_cap_crossing() {
        assert_eq!(cap_crossing(100, 80, 95), Some(true));
        assert_eq!(cap_crossing(100, 95, 20), Some(false));
        assert_eq!(cap_crossing(100, 10, 20), None);
        assert_eq!(cap_crossing(0, 10, 1 << 40), None);
    }
}

//! Retention of old file content.
//!
//! When an overwrite supersedes a file's content, the previous content
//! becomes the *candidate* version. [`detect_versions_to_clean`] decides what
//! happens to it and which older versions to reclaim:
//!
//! - the budget `max` counts the current content, the candidate and every
//!   retained old version
//! - over budget, the oldest untagged versions go first, strictly by
//!   creation time; tagged versions are never reclaimed
//! - only versions at least `min_delay` older than the candidate may be
//!   reclaimed for budget; younger ones wait for a later write
//! - a candidate arriving within `min_delay` of the newest untagged version
//!   replaces that version (the rapid-save case)
//! - a candidate that is not newer than every existing version is kept,
//!   but the budget still holds: the oldest untagged versions go without
//!   regard to `min_delay`, since the dates cannot be trusted

use chrono::Duration as ChronoDuration;
use nimbus_types::Version;
use std::time::Duration;

/// Outcome for the candidate version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CleanAction {
    /// Keep the candidate; reclaim only what the budget requires.
    KeepCandidate,
    /// Keep the candidate and reclaim the newest old version it supersedes.
    CleanCandidate,
    /// Out of order input; keep the candidate and only enforce the budget.
    DoNothing,
}

/// Decide which versions to reclaim after `candidate` is created.
///
/// Returns the action and the versions to delete, oldest first.
pub fn detect_versions_to_clean(
    candidate: &Version,
    olds: &[Version],
    max: usize,
    min_delay: Duration,
) -> (CleanAction, Vec<Version>) {
    let min_delay = ChronoDuration::from_std(min_delay).unwrap_or(ChronoDuration::MAX);
    let mut olds: Vec<&Version> = olds.iter().filter(|v| v.id != candidate.id).collect();
    olds.sort_by_key(|v| v.created_at);

    let Some(newest) = olds.last().copied() else {
        return (CleanAction::KeepCandidate, Vec::new());
    };
    if candidate.created_at <= newest.created_at {
        let excess = (olds.len() + 2).saturating_sub(max);
        let to_clean = olds
            .into_iter()
            .filter(|v| !v.is_tagged())
            .take(excess)
            .cloned()
            .collect();
        return (CleanAction::DoNothing, to_clean);
    }

    let mut action = CleanAction::KeepCandidate;
    let mut to_clean: Vec<&Version> = Vec::new();
    if !newest.is_tagged() && candidate.created_at - newest.created_at < min_delay {
        action = CleanAction::CleanCandidate;
        to_clean.push(newest);
        olds.pop();
    }

    let total = olds.len() + 2;
    let mut excess = total.saturating_sub(max);
    for v in &olds {
        if excess == 0 {
            break;
        }
        if v.is_tagged() || candidate.created_at - v.created_at < min_delay {
            continue;
        }
        to_clean.push(v);
        excess -= 1;
    }

    to_clean.sort_by_key(|v| v.created_at);
    (action, to_clean.into_iter().cloned().collect())
}

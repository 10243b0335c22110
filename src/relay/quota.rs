//! Daily usage counters.
//!
//! All categories share one 24-hour window. Once the window has run out,
//! the next check zeroes every counter together and starts a new window.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Text,
    Image,
    Audio,
    Document,
    Video,
    ImageGeneration,
}

impl UsageCategory {
    pub const ALL: [UsageCategory; 6] = [
        Self::Text,
        Self::Image,
        Self::Audio,
        Self::Document,
        Self::Video,
        Self::ImageGeneration,
    ];

    /// Requests per window when the config does not override it.
    pub const fn default_limit(self) -> u32 {
        match self {
            Self::Text => 1500,
            Self::Image => 200,
            Self::Audio => 200,
            Self::Document => 100,
            Self::Video => 50,
            Self::ImageGeneration => 25,
        }
    }

    /// Soft limits are logged but never refuse a request.
    pub const fn is_hard_limit(self) -> bool {
        !matches!(self, Self::Text)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Video => "video",
            Self::ImageGeneration => "image_generation",
        }
    }
}

impl fmt::Display for UsageCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a usage report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageLine {
    pub category: UsageCategory,
    pub used: u32,
    pub limit: u32,
}

/// A counted slot, tied to the window it was taken in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub category: UsageCategory,
    window_start: DateTime<Utc>,
}

pub struct QuotaTracker {
    counts: HashMap<UsageCategory, u32>,
    limits: HashMap<UsageCategory, u32>,
    window_start: DateTime<Utc>,
}

impl QuotaTracker {
    pub const WINDOW_HOURS: i64 = 24;

    pub fn new() -> Self {
        Self::with_limits(HashMap::new())
    }

    /// Tracker with per-category overrides of the default limits.
    pub fn with_limits(overrides: HashMap<UsageCategory, u32>) -> Self {
        Self::starting_at(overrides, Utc::now())
    }

    pub fn starting_at(overrides: HashMap<UsageCategory, u32>, window_start: DateTime<Utc>) -> Self {
        let limits = UsageCategory::ALL
            .iter()
            .map(|&c| (c, overrides.get(&c).copied().unwrap_or(c.default_limit())))
            .collect();
        Self {
            counts: HashMap::new(),
            limits,
            window_start,
        }
    }

    pub fn record_usage(&mut self, category: UsageCategory) {
        self.record_usage_at(category, Utc::now());
    }

    pub fn record_usage_at(&mut self, category: UsageCategory, now: DateTime<Utc>) {
        self.reset_if_window_expired(now);
        *self.counts.entry(category).or_insert(0) += 1;
    }

    /// Check and count in one step. Hard-limited categories are refused once
    /// the window is used up; soft ones always get a slot.
    pub fn try_reserve(&mut self, category: UsageCategory) -> Option<Reservation> {
        self.try_reserve_at(category, Utc::now())
    }

    pub fn try_reserve_at(&mut self, category: UsageCategory, now: DateTime<Utc>) -> Option<Reservation> {
        self.reset_if_window_expired(now);
        if category.is_hard_limit() && self.count(category) >= self.limit(category) {
            return None;
        }
        *self.counts.entry(category).or_insert(0) += 1;
        Some(Reservation {
            category,
            window_start: self.window_start,
        })
    }

    /// Give back the slot of a request that did not succeed.
    ///
    /// A slot from an earlier window is already gone and is ignored.
    pub fn release(&mut self, reservation: Reservation) {
        if reservation.window_start != self.window_start {
            return;
        }
        if let Some(count) = self.counts.get_mut(&reservation.category) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn is_exceeded(&mut self, category: UsageCategory) -> bool {
        self.is_exceeded_at(category, Utc::now())
    }

    pub fn is_exceeded_at(&mut self, category: UsageCategory, now: DateTime<Utc>) -> bool {
        self.reset_if_window_expired(now);
        self.count(category) >= self.limit(category)
    }

    pub fn count(&self, category: UsageCategory) -> u32 {
        self.counts.get(&category).copied().unwrap_or(0)
    }

    pub fn limit(&self, category: UsageCategory) -> u32 {
        self.limits.get(&category).copied().unwrap_or(category.default_limit())
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    /// Current counts for every category, in a stable order.
    pub fn snapshot_at(&mut self, now: DateTime<Utc>) -> Vec<UsageLine> {
        self.reset_if_window_expired(now);
        UsageCategory::ALL
            .iter()
            .map(|&category| UsageLine {
                category,
                used: self.count(category),
                limit: self.limit(category),
            })
            .collect()
    }

    pub fn snapshot(&mut self) -> Vec<UsageLine> {
        self.snapshot_at(Utc::now())
    }

    fn reset_if_window_expired(&mut self, now: DateTime<Utc>) {
        if now - self.window_start > Duration::hours(Self::WINDOW_HOURS) {
            info!("Quota window expired, resetting {} counter(s)", self.counts.len());
            self.counts.clear();
            self.window_start = now;
        }
    }
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_at(start: DateTime<Utc>) -> QuotaTracker {
        QuotaTracker::starting_at(HashMap::new(), start)
    }

    #[test]
    fn test_record_and_count() {
        let start = Utc::now();
        let mut quota = tracker_at(start);
        quota.record_usage_at(UsageCategory::Text, start);
        quota.record_usage_at(UsageCategory::Text, start);
        quota.record_usage_at(UsageCategory::Image, start);
        assert_eq!(quota.count(UsageCategory::Text), 2);
        assert_eq!(quota.count(UsageCategory::Image), 1);
        assert_eq!(quota.count(UsageCategory::Video), 0);
    }

    #[test]
    fn test_rollover_after_window() {
        let start = Utc::now();
        let mut quota = tracker_at(start);
        for _ in 0..3 {
            quota.record_usage_at(UsageCategory::Image, start);
        }
        quota.record_usage_at(UsageCategory::Text, start);

        let later = start + Duration::hours(24) + Duration::seconds(1);
        quota.record_usage_at(UsageCategory::Image, later);

        assert_eq!(quota.count(UsageCategory::Image), 1);
        // Shared window: text was zeroed too
        assert_eq!(quota.count(UsageCategory::Text), 0);
        assert_eq!(quota.window_start(), later);
    }

    #[test]
    fn test_exactly_24h_does_not_reset() {
        let start = Utc::now();
        let mut quota = tracker_at(start);
        quota.record_usage_at(UsageCategory::Image, start);
        quota.record_usage_at(UsageCategory::Image, start + Duration::hours(24));
        assert_eq!(quota.count(UsageCategory::Image), 2);
    }

    #[test]
    fn test_is_exceeded_and_reset_on_check() {
        let start = Utc::now();
        let mut overrides = HashMap::new();
        overrides.insert(UsageCategory::ImageGeneration, 2);
        let mut quota = QuotaTracker::starting_at(overrides, start);

        assert!(!quota.is_exceeded_at(UsageCategory::ImageGeneration, start));
        quota.record_usage_at(UsageCategory::ImageGeneration, start);
        quota.record_usage_at(UsageCategory::ImageGeneration, start);
        assert!(quota.is_exceeded_at(UsageCategory::ImageGeneration, start));

        let later = start + Duration::hours(25);
        assert!(!quota.is_exceeded_at(UsageCategory::ImageGeneration, later));
        assert_eq!(quota.count(UsageCategory::ImageGeneration), 0);
    }

    #[test]
    fn test_try_reserve_stops_at_hard_limit() {
        let start = Utc::now();
        let mut overrides = HashMap::new();
        overrides.insert(UsageCategory::Video, 2);
        let mut quota = QuotaTracker::starting_at(overrides, start);

        assert!(quota.try_reserve_at(UsageCategory::Video, start).is_some());
        assert!(quota.try_reserve_at(UsageCategory::Video, start).is_some());
        assert!(quota.try_reserve_at(UsageCategory::Video, start).is_none());
        assert_eq!(quota.count(UsageCategory::Video), 2);

        // Next window
        let later = start + Duration::hours(25);
        assert!(quota.try_reserve_at(UsageCategory::Video, later).is_some());
        assert_eq!(quota.count(UsageCategory::Video), 1);
    }

    #[test]
    fn test_soft_limit_never_refuses() {
        let start = Utc::now();
        let mut overrides = HashMap::new();
        overrides.insert(UsageCategory::Text, 1);
        let mut quota = QuotaTracker::starting_at(overrides, start);

        for _ in 0..3 {
            assert!(quota.try_reserve_at(UsageCategory::Text, start).is_some());
        }
        assert_eq!(quota.count(UsageCategory::Text), 3);
    }

    #[test]
    fn test_release_frees_slot() {
        let start = Utc::now();
        let mut overrides = HashMap::new();
        overrides.insert(UsageCategory::Image, 1);
        let mut quota = QuotaTracker::starting_at(overrides, start);

        let slot = quota.try_reserve_at(UsageCategory::Image, start).unwrap();
        assert!(quota.try_reserve_at(UsageCategory::Image, start).is_none());
        quota.release(slot);
        assert_eq!(quota.count(UsageCategory::Image), 0);
        assert!(quota.try_reserve_at(UsageCategory::Image, start).is_some());
    }

    #[test]
    fn test_release_after_rollover_is_ignored() {
        let start = Utc::now();
        let mut quota = tracker_at(start);

        let stale = quota.try_reserve_at(UsageCategory::Audio, start).unwrap();
        let later = start + Duration::hours(25);
        quota.try_reserve_at(UsageCategory::Audio, later).unwrap();
        quota.release(stale);
        assert_eq!(quota.count(UsageCategory::Audio), 1);
    }

    #[test]
    fn test_limits_and_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert(UsageCategory::Video, 3);
        let quota = QuotaTracker::with_limits(overrides);
        assert_eq!(quota.limit(UsageCategory::Video), 3);
        assert_eq!(quota.limit(UsageCategory::Text), UsageCategory::Text.default_limit());
        assert!(!UsageCategory::Text.is_hard_limit());
        assert!(UsageCategory::ImageGeneration.is_hard_limit());
    }

    #[test]
    fn test_snapshot_order() {
        let start = Utc::now();
        let mut quota = tracker_at(start);
        quota.record_usage_at(UsageCategory::Audio, start);
        let lines = quota.snapshot_at(start);
        assert_eq!(lines.len(), UsageCategory::ALL.len());
        assert_eq!(lines[0].category, UsageCategory::Text);
        assert_eq!(lines[2].category, UsageCategory::Audio);
        assert_eq!(lines[2].used, 1);
    }
}

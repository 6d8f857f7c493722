//! Rolling 24-hour translation statistics.
//!
//! Counters are bucketed per UTC minute under lexicographically sortable
//! `YYYYMMDDHHMM` keys. Every record increments the current bucket and
//! evicts buckets older than the window, so the map never outgrows
//! 24 × 60 entries.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Window size in minutes.
const WINDOW_MINUTES: i64 = 24 * 60;

/// Counters for one UTC minute.
#[derive(Debug, Clone, Copy, Default)]
struct MinuteBucket {
    total: u64,
    success: u64,
    total_latency_ms: u64,
}

/// Aggregate view over the whole window.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSummary {
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Percentage, rounded to 2 decimals.
    pub success_rate: f64,
    /// Milliseconds, rounded to 2 decimals.
    pub average_processing_time_ms: f64,
}

/// One hour of the breakdown, newest first in the report.
#[derive(Debug, Clone, Serialize)]
pub struct HourlyEntry {
    /// Start of the hour, RFC 3339.
    pub hour: String,
    pub requests: u64,
    pub success_rate: f64,
    pub avg_processing_time_ms: f64,
}

/// Thread-safe sliding-window statistics.
#[derive(Debug, Default)]
pub struct StatsWindow {
    buckets: Mutex<BTreeMap<String, MinuteBucket>>,
}

fn minute_key(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M").to_string()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl StatsWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed call (success or failure) with its latency.
    pub fn record(&self, success: bool, elapsed_ms: u64) {
        self.record_at(success, elapsed_ms, Utc::now());
    }

    fn record_at(&self, success: bool, elapsed_ms: u64, at: DateTime<Utc>) {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let bucket = buckets.entry(minute_key(at)).or_default();
        bucket.total += 1;
        bucket.total_latency_ms += elapsed_ms;
        if success {
            bucket.success += 1;
        }

        let cutoff = minute_key(at - Duration::minutes(WINDOW_MINUTES));
        buckets.retain(|key, _| *key >= cutoff);
    }

    /// Totals over the window.
    pub fn summary(&self) -> StatsSummary {
        self.summary_at(Utc::now())
    }

    fn summary_at(&self, now: DateTime<Utc>) -> StatsSummary {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = minute_key(now - Duration::minutes(WINDOW_MINUTES));

        let mut total = 0u64;
        let mut success = 0u64;
        let mut latency = 0u64;
        for (key, bucket) in buckets.iter() {
            if *key >= cutoff {
                total += bucket.total;
                success += bucket.success;
                latency += bucket.total_latency_ms;
            }
        }

        let success_rate = if total > 0 {
            round2(success as f64 / total as f64 * 100.0)
        } else {
            0.0
        };
        let average = if total > 0 {
            round2(latency as f64 / total as f64)
        } else {
            0.0
        };

        StatsSummary {
            period_start: now - Duration::hours(24),
            period_end: now,
            total_requests: total,
            successful_requests: success,
            failed_requests: total - success,
            success_rate,
            average_processing_time_ms: average,
        }
    }

    /// Fold minute buckets into hours, newest hour first, at most 24 entries.
    pub fn hourly_breakdown(&self) -> Vec<HourlyEntry> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let mut hours: BTreeMap<String, MinuteBucket> = BTreeMap::new();
        for (key, bucket) in buckets.iter() {
            let hour_key = key[..10].to_owned(); // YYYYMMDDHH
            let entry = hours.entry(hour_key).or_default();
            entry.total += bucket.total;
            entry.success += bucket.success;
            entry.total_latency_ms += bucket.total_latency_ms;
        }

        hours
            .into_iter()
            .rev()
            .take(24)
            .filter_map(|(hour_key, bucket)| {
                let parsed =
                    NaiveDateTime::parse_from_str(&format!("{hour_key}00"), "%Y%m%d%H%M").ok()?;
                let success_rate = if bucket.total > 0 {
                    round2(bucket.success as f64 / bucket.total as f64 * 100.0)
                } else {
                    0.0
                };
                let avg = if bucket.total > 0 {
                    round2(bucket.total_latency_ms as f64 / bucket.total as f64)
                } else {
                    0.0
                };
                Some(HourlyEntry {
                    hour: format!("{}Z", parsed.format("%Y-%m-%dT%H:%M:%S")),
                    requests: bucket.total,
                    success_rate,
                    avg_processing_time_ms: avg,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, h, m, 0).unwrap()
    }

    #[test]
    fn totals_match_record_count() {
        let stats = StatsWindow::new();
        let now = at(12, 0);
        for i in 0..10 {
            stats.record_at(i % 2 == 0, 100, now);
        }
        let summary = stats.summary_at(now);
        assert_eq!(summary.total_requests, 10);
        assert_eq!(summary.successful_requests, 5);
        assert_eq!(summary.failed_requests, 5);
        assert!((summary.success_rate - 50.0).abs() < 0.01);
    }

    #[test]
    fn mean_latency_rounds_to_two_decimals() {
        let stats = StatsWindow::new();
        let now = at(9, 30);
        stats.record_at(true, 100, now);
        stats.record_at(true, 101, now);
        stats.record_at(true, 101, now);
        let summary = stats.summary_at(now);
        // 302 / 3 = 100.666… → 100.67
        assert!((summary.average_processing_time_ms - 100.67).abs() < 0.001);
    }

    #[test]
    fn buckets_older_than_window_are_evicted() {
        let stats = StatsWindow::new();
        stats.record_at(true, 50, at(0, 0));
        // 25 hours later the first bucket must be gone.
        let later = Utc.with_ymd_and_hms(2025, 6, 16, 1, 0, 0).unwrap();
        stats.record_at(true, 50, later);
        let summary = stats.summary_at(later);
        assert_eq!(summary.total_requests, 1);
    }

    #[test]
    fn empty_window_reports_zeroes() {
        let stats = StatsWindow::new();
        let summary = stats.summary();
        assert_eq!(summary.total_requests, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.average_processing_time_ms, 0.0);
    }

    #[test]
    fn hourly_breakdown_folds_minutes_newest_first() {
        let stats = StatsWindow::new();
        stats.record_at(true, 100, at(10, 5));
        stats.record_at(false, 300, at(10, 42));
        stats.record_at(true, 200, at(11, 1));
        let hourly = stats.hourly_breakdown();
        assert_eq!(hourly.len(), 2);
        assert!(hourly[0].hour.starts_with("2025-06-15T11"));
        assert_eq!(hourly[0].requests, 1);
        assert!(hourly[1].hour.starts_with("2025-06-15T10"));
        assert_eq!(hourly[1].requests, 2);
        assert!((hourly[1].success_rate - 50.0).abs() < 0.01);
        assert!((hourly[1].avg_processing_time_ms - 200.0).abs() < 0.01);
    }

    #[test]
    fn minute_keys_sort_lexicographically() {
        assert!(minute_key(at(9, 59)) < minute_key(at(10, 0)));
        assert!(minute_key(at(23, 59)) < minute_key(Utc.with_ymd_and_hms(2025, 6, 16, 0, 0, 0).unwrap()));
    }
}

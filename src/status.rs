//! Ledger health report.
//!
//! [`summarize`] folds a ledger snapshot into a [`StatusReport`]: per-state
//! counts, how many distinct sources are tracked, stale `Building` entries,
//! the distribution of error counts among failed entries, and the follow-up
//! commands worth running. [`Gates`] turn a report into a pass/fail verdict
//! for CI and cron checks.
//!
//! Built entries count as `generated`; everything else counts as `unbuilt`
//! and is broken down by state.

use crate::config::stale_threshold;
use crate::ledger::{BuildStatus, LedgerEntry};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

/// Per-state totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    /// Distinct `(storage, name)` pairs.
    pub sources: usize,
    pub generated: usize,
    /// Every entry not yet built, whatever its state.
    pub unbuilt: usize,
    pub queued: usize,
    pub building: usize,
    pub source_errors: usize,
    pub build_errors: usize,
}

impl Counts {
    pub fn total_errors(&self) -> usize {
        self.source_errors + self.build_errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stale {
    pub threshold_seconds: u64,
    pub count: usize,
}

/// Number of failed entries with a given error count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ErrorBucket {
    pub error_count: u32,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub counts: Counts,
    /// Generated artifacts per distinct source.
    pub average_per_source: f64,
    pub stale: Stale,
    /// Ascending by `error_count`.
    pub error_distribution: Vec<ErrorBucket>,
    pub suggestions: Vec<String>,
}

/// Build a report from a ledger snapshot.
pub fn summarize(
    entries: &[LedgerEntry],
    now: DateTime<Utc>,
    stale_after_secs: u64,
) -> StatusReport {
    let threshold = stale_threshold(stale_after_secs);
    let mut counts = Counts::default();
    let mut sources = HashSet::new();
    let mut stale = 0;
    let mut histogram: BTreeMap<u32, usize> = BTreeMap::new();

    for entry in entries {
        sources.insert(&entry.source);
        match entry.status {
            BuildStatus::Built => counts.generated += 1,
            BuildStatus::Queued => counts.queued += 1,
            BuildStatus::Building => counts.building += 1,
            BuildStatus::SourceError => counts.source_errors += 1,
            BuildStatus::BuildError => counts.build_errors += 1,
        }
        if entry.status != BuildStatus::Built {
            counts.unbuilt += 1;
        }
        if entry.is_stale(now, threshold) {
            stale += 1;
        }
        if entry.status.is_error() {
            *histogram.entry(entry.error_count).or_default() += 1;
        }
    }
    counts.sources = sources.len();

    let average_per_source = if counts.sources == 0 {
        0.0
    } else {
        counts.generated as f64 / counts.sources as f64
    };

    let mut suggestions = Vec::new();
    if stale > 0 {
        suggestions.push(format!("img-variants build --stale-after {stale_after_secs}"));
    }
    if counts.total_errors() > 0 {
        suggestions.push("img-variants requeue --max-errors 3".to_string());
    }
    if counts.queued > 0 && counts.building == 0 {
        suggestions.push("img-variants build".to_string());
    }

    StatusReport {
        counts,
        average_per_source,
        stale: Stale {
            threshold_seconds: stale_after_secs,
            count: stale,
        },
        error_distribution: histogram
            .into_iter()
            .map(|(error_count, count)| ErrorBucket { error_count, count })
            .collect(),
        suggestions,
    }
}

/// Health checks that make the `status` command exit non-zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Gates {
    /// Fail when any Building entry is stale.
    pub fail_on_stale: bool,
    /// Fail when total errors exceed this number.
    pub fail_on_errors: Option<usize>,
}

impl Gates {
    /// Human-readable reasons for every tripped gate. Empty means healthy.
    pub fn tripped(&self, report: &StatusReport) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.fail_on_stale && report.stale.count > 0 {
            reasons.push(format!(
                "{} stale build(s) older than {}s",
                report.stale.count, report.stale.threshold_seconds
            ));
        }
        if let Some(limit) = self.fail_on_errors
            && report.counts.total_errors() > limit
        {
            reasons.push(format!(
                "{} error(s) exceed the limit of {limit}",
                report.counts.total_errors()
            ));
        }
        reasons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::ErrorKind;
    use crate::test_helpers::{sample_job, t0};
    use chrono::TimeDelta;

    fn entry(name: &str, width: u32, status: BuildStatus, changed_secs_ago: i64) -> LedgerEntry {
        let job = sample_job(name, width);
        LedgerEntry {
            identity: job.identity,
            source: job.source,
            spec: job.spec,
            status,
            created: t0(),
            status_changed: t0() - TimeDelta::seconds(changed_secs_ago),
            error_count: 0,
            last_error: None,
            dimensions: None,
        }
    }

    fn failed(name: &str, kind: ErrorKind, errors: u32) -> LedgerEntry {
        LedgerEntry {
            error_count: errors,
            last_error: Some(kind),
            ..entry(name, 300, kind.status(), 0)
        }
    }

    #[test]
    fn empty_ledger_reports_zeroes() {
        let report = summarize(&[], t0(), 600);
        assert_eq!(report.counts, Counts::default());
        assert_eq!(report.average_per_source, 0.0);
        assert!(report.suggestions.is_empty());
        assert!(report.error_distribution.is_empty());
    }

    #[test]
    fn counts_by_state_and_source() {
        let entries = vec![
            entry("a.jpg", 300, BuildStatus::Built, 0),
            entry("a.jpg", 600, BuildStatus::Built, 0),
            entry("b.jpg", 300, BuildStatus::Built, 0),
            entry("b.jpg", 600, BuildStatus::Queued, 0),
            entry("c.jpg", 300, BuildStatus::Building, 10),
            failed("d.jpg", ErrorKind::Source, 1),
            failed("e.jpg", ErrorKind::Build, 2),
        ];
        let report = summarize(&entries, t0(), 600);
        assert_eq!(
            report.counts,
            Counts {
                sources: 5,
                generated: 3,
                unbuilt: 4,
                queued: 1,
                building: 1,
                source_errors: 1,
                build_errors: 1,
            }
        );
        assert!((report.average_per_source - 0.6).abs() < 1e-9);
    }

    #[test]
    fn stale_uses_strict_threshold() {
        let entries = vec![
            entry("a.jpg", 300, BuildStatus::Building, 700),
            entry("b.jpg", 300, BuildStatus::Building, 600),
            entry("c.jpg", 300, BuildStatus::Queued, 9000),
        ];
        let report = summarize(&entries, t0(), 600);
        assert_eq!(
            report.stale,
            Stale {
                threshold_seconds: 600,
                count: 1
            }
        );
    }

    #[test]
    fn error_distribution_is_sorted() {
        let entries = vec![
            failed("a.jpg", ErrorKind::Build, 4),
            failed("b.jpg", ErrorKind::Build, 1),
            failed("c.jpg", ErrorKind::Source, 1),
        ];
        let report = summarize(&entries, t0(), 600);
        assert_eq!(
            report.error_distribution,
            vec![
                ErrorBucket {
                    error_count: 1,
                    count: 2
                },
                ErrorBucket {
                    error_count: 4,
                    count: 1
                },
            ]
        );
    }

    // =========================================================================
    // Suggestions
    // =========================================================================

    #[test]
    fn suggests_build_for_idle_queue() {
        let report = summarize(&[entry("a.jpg", 300, BuildStatus::Queued, 0)], t0(), 600);
        assert_eq!(report.suggestions, vec!["img-variants build"]);
    }

    #[test]
    fn no_build_suggestion_while_building() {
        let entries = vec![
            entry("a.jpg", 300, BuildStatus::Queued, 0),
            entry("b.jpg", 300, BuildStatus::Building, 5),
        ];
        assert!(summarize(&entries, t0(), 600).suggestions.is_empty());
    }

    #[test]
    fn suggests_stale_build_then_requeue() {
        let entries = vec![
            entry("a.jpg", 300, BuildStatus::Building, 1000),
            failed("b.jpg", ErrorKind::Build, 1),
        ];
        let report = summarize(&entries, t0(), 900);
        assert_eq!(
            report.suggestions,
            vec![
                "img-variants build --stale-after 900",
                "img-variants requeue --max-errors 3",
            ]
        );
    }

    // =========================================================================
    // Gates
    // =========================================================================

    #[test]
    fn gates_trip_on_stale_and_error_limit() {
        let entries = vec![
            entry("a.jpg", 300, BuildStatus::Building, 1000),
            failed("b.jpg", ErrorKind::Build, 1),
            failed("c.jpg", ErrorKind::Source, 1),
        ];
        let report = summarize(&entries, t0(), 600);

        assert!(Gates::default().tripped(&report).is_empty());
        let stale_only = Gates {
            fail_on_stale: true,
            fail_on_errors: None,
        };
        assert_eq!(stale_only.tripped(&report).len(), 1);

        let at_limit = Gates {
            fail_on_stale: false,
            fail_on_errors: Some(2),
        };
        assert!(at_limit.tripped(&report).is_empty());
        let over_limit = Gates {
            fail_on_stale: false,
            fail_on_errors: Some(1),
        };
        assert_eq!(over_limit.tripped(&report).len(), 1);
    }

    #[test]
    fn report_serializes_to_json() {
        let report = summarize(&[failed("a.jpg", ErrorKind::Build, 3)], t0(), 600);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["counts"]["build_errors"], 1);
        assert_eq!(json["stale"]["threshold_seconds"], 600);
        assert_eq!(json["error_distribution"][0]["error_count"], 3);
        assert_eq!(json["suggestions"][0], "img-variants requeue --max-errors 3");
    }
}

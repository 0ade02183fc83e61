//! CLI output formatting for every command.
//!
//! # Output Format
//!
//! ## Status (pretty)
//!
//! ```text
//! Summary: 12 sources | 30 generated (2.5/src) | 4 queued | 1 building (1 stale) | 2 errors (S:1 B:1)
//!
//! Breakdown
//!     Queued          4  ██████████
//!     Building        1  ███
//!     Source errors   1  ███
//!     Build errors    1  ███
//!
//! Suggestions
//!     img-variants build --stale-after 600
//! ```
//!
//! ## Status (plain)
//!
//! ```text
//! Total source images: 12
//! Generated images: 30
//! Average per source: 2.5
//! Images not yet built: 7
//! Status breakdown:
//!     Queued: 4
//!     Building: 1
//!     Source errors: 1
//!     Build errors: 1
//! Stale builds (older than 600s): 1
//! ```
//!
//! ## Build
//!
//! ```text
//! built   photos:cat.jpg → 5755d5d0… (640x360)
//! failed  photos:dog.jpg [source]: cannot open source
//! Built 1 image(s)
//! 2 processed: 1 built, 1 failed
//! ```
//!
//! ## Resolve
//!
//! ```text
//! Source: photos:cat.jpg
//! Sizes: (max-width: 640px) 320px, 640px
//!     base        640x360  webp q80  5755d5d00299ec16fb13c01adaab2406
//!     (max-width: 640px) 320x180  webp q80  0b9e1a3c52d4e2a7961f0e8ab3c14d07
//!     2x          1280x720 webp q80  c41f27aa0e5b8d6390d1e7f2a4b6c8e0
//!     (max-width: 640px) 2x 640x360  webp q80  7e2d94b01c6a3f58d0e9b2714a6c5f13
//! ```
//!
//! The last line is the widest breakpoint at the largest density. It stays
//! even though its pixels match the base: its density differs, so its spec
//! does too.
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure, with no I/O.

use crate::fingerprint::{SourceId, fingerprint};
use crate::ledger::ErrorKind;
use crate::options::ResolvedSpec;
use crate::queue::{BuildEvent, Report};
use crate::status::StatusReport;
use crate::variant::VariantSpec;

/// How `status` renders its report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum StatusFormat {
    /// Summary line and bar chart, for terminals.
    Pretty,
    /// One fact per line, for logs and pipes.
    Plain,
    Json,
}

// ============================================================================
// Shared helpers
// ============================================================================

const BAR_WIDTH: usize = 10;

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Horizontal bar scaled so `max` fills [`BAR_WIDTH`]. Non-zero values get
/// at least one block.
fn bar(value: usize, max: usize) -> String {
    if value == 0 || max == 0 {
        return String::new();
    }
    let filled = ((value * BAR_WIDTH) as f64 / max as f64).round() as usize;
    "\u{2588}".repeat(filled.clamp(1, BAR_WIDTH))
}

fn short_hex(hex: &str) -> String {
    format!("{}\u{2026}", &hex[..8])
}

fn error_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Source => "source",
        ErrorKind::Build => "build",
    }
}

fn spec_line(spec: &VariantSpec) -> String {
    let size = match spec.height() {
        Some(h) => format!("{}x{}", spec.width, h),
        None => format!("{}w", spec.width),
    };
    format!("{size:<8} {} q{}", spec.format, spec.quality.value())
}

// ============================================================================
// Status
// ============================================================================

/// Format a status report. `verbose` adds the error count distribution.
pub fn format_status(report: &StatusReport, format: StatusFormat, verbose: bool) -> Vec<String> {
    let mut lines = match format {
        StatusFormat::Json => {
            let json = serde_json::to_string_pretty(report)
                .expect("status report must serialize");
            return json.lines().map(str::to_string).collect();
        }
        StatusFormat::Pretty => format_status_pretty(report),
        StatusFormat::Plain => format_status_plain(report),
    };

    if verbose && !report.error_distribution.is_empty() {
        lines.push(String::new());
        lines.push("Error count distribution:".to_string());
        for bucket in &report.error_distribution {
            lines.push(format!(
                "{}{} error(s): {} images",
                indent(1),
                bucket.error_count,
                bucket.count
            ));
        }
    }

    if !report.suggestions.is_empty() {
        lines.push(String::new());
        lines.push("Suggestions".to_string());
        for suggestion in &report.suggestions {
            lines.push(format!("{}{}", indent(1), suggestion));
        }
    }
    lines
}

fn format_status_pretty(report: &StatusReport) -> Vec<String> {
    let c = &report.counts;
    let mut building = format!("{} building", c.building);
    if report.stale.count > 0 {
        building.push_str(&format!(" ({} stale)", report.stale.count));
    }
    let mut errors = format!("{} errors", c.total_errors());
    if c.total_errors() > 0 {
        errors.push_str(&format!(" (S:{} B:{})", c.source_errors, c.build_errors));
    }
    let summary = format!(
        "Summary: {} sources | {} generated ({:.1}/src) | {} queued | {} | {}",
        c.sources, c.generated, report.average_per_source, c.queued, building, errors
    );

    let mut lines = vec![summary];
    if c.unbuilt == 0 {
        return lines;
    }

    let rows = [
        ("Queued", c.queued),
        ("Building", c.building),
        ("Source errors", c.source_errors),
        ("Build errors", c.build_errors),
    ];
    let max = rows.iter().map(|(_, n)| *n).max().unwrap_or(0);
    lines.push(String::new());
    lines.push("Breakdown".to_string());
    for (label, count) in rows {
        let row = format!("{}{:<15} {:>3}  {}", indent(1), label, count, bar(count, max));
        lines.push(row.trim_end().to_string());
    }
    lines
}

fn format_status_plain(report: &StatusReport) -> Vec<String> {
    let c = &report.counts;
    vec![
        format!("Total source images: {}", c.sources),
        format!("Generated images: {}", c.generated),
        format!("Average per source: {:.1}", report.average_per_source),
        format!("Images not yet built: {}", c.unbuilt),
        "Status breakdown:".to_string(),
        format!("{}Queued: {}", indent(1), c.queued),
        format!("{}Building: {}", indent(1), c.building),
        format!("{}Source errors: {}", indent(1), c.source_errors),
        format!("{}Build errors: {}", indent(1), c.build_errors),
        format!(
            "Stale builds (older than {}s): {}",
            report.stale.threshold_seconds, report.stale.count
        ),
    ]
}

pub fn print_status(report: &StatusReport, format: StatusFormat, verbose: bool) {
    for line in format_status(report, format, verbose) {
        println!("{}", line);
    }
}

// ============================================================================
// Build
// ============================================================================

/// Format one build progress event.
pub fn format_build_event(event: &BuildEvent) -> Vec<String> {
    match event {
        BuildEvent::Built {
            identity,
            source,
            dimensions,
        } => vec![format!(
            "built   {} \u{2192} {} ({})",
            source,
            short_hex(&identity.to_hex()),
            dimensions
        )],
        BuildEvent::Failed {
            source,
            kind,
            message,
            ..
        } => vec![format!(
            "failed  {} [{}]: {}",
            source,
            error_label(*kind),
            message
        )],
        BuildEvent::Lost { identity } => vec![format!(
            "skipped {} (claimed elsewhere)",
            short_hex(&identity.to_hex())
        )],
    }
}

/// Closing lines of a `build` run.
pub fn format_build_report(report: &Report) -> Vec<String> {
    vec![
        format!("Built {} image(s)", report.built),
        report.to_string(),
    ]
}

pub fn print_build_report(report: &Report) {
    for line in format_build_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Requeue
// ============================================================================

pub fn format_requeue(count: usize) -> Vec<String> {
    if count == 0 {
        vec!["No images to requeue".to_string()]
    } else {
        vec![format!("Requeued {} image(s)", count)]
    }
}

pub fn print_requeue(count: usize) {
    for line in format_requeue(count) {
        println!("{}", line);
    }
}

// ============================================================================
// Resolve
// ============================================================================

/// Show every variant an option set expands to, with its identity.
pub fn format_resolve(source: &SourceId, resolved: &ResolvedSpec) -> Vec<String> {
    let mut lines = vec![
        format!("Source: {}", source),
        format!("Sizes: {}", resolved.sizes_attr()),
    ];
    for variant in resolved.variants() {
        lines.push(format!(
            "{}{:<11} {}  {}",
            indent(1),
            variant.role.to_string(),
            spec_line(&variant.spec),
            fingerprint(source, &variant.spec)
        ));
    }
    lines
}

pub fn print_resolve(source: &SourceId, resolved: &ResolvedSpec) {
    for line in format_resolve(source, resolved) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::ledger::BuildStatus;
    use crate::options::{RawOptions, Resolver, SizeToken, WidthToken};
    use crate::status::summarize;
    use crate::test_helpers::{sample_job, t0};
    use crate::variant::Dimensions;
    use chrono::TimeDelta;

    fn report() -> StatusReport {
        let mut entries = Vec::new();
        for (i, status) in [
            BuildStatus::Built,
            BuildStatus::Built,
            BuildStatus::Queued,
            BuildStatus::Queued,
            BuildStatus::Building,
            BuildStatus::BuildError,
        ]
        .into_iter()
        .enumerate()
        {
            let job = sample_job(&format!("{i}.jpg"), 300);
            entries.push(crate::ledger::LedgerEntry {
                identity: job.identity,
                source: job.source,
                spec: job.spec,
                status,
                created: t0(),
                status_changed: t0() - TimeDelta::seconds(1000),
                error_count: if status.is_error() { 2 } else { 0 },
                last_error: status.is_error().then_some(ErrorKind::Build),
                dimensions: None,
            });
        }
        summarize(&entries, t0(), 600)
    }

    // =========================================================================
    // Status
    // =========================================================================

    #[test]
    fn pretty_summary_line() {
        let lines = format_status(&report(), StatusFormat::Pretty, false);
        assert_eq!(
            lines[0],
            "Summary: 6 sources | 2 generated (0.3/src) | 2 queued | 1 building (1 stale) | 1 errors (S:0 B:1)"
        );
    }

    #[test]
    fn pretty_breakdown_bars_scale_to_max() {
        let lines = format_status(&report(), StatusFormat::Pretty, false);
        let queued = lines.iter().find(|l| l.contains("Queued")).unwrap();
        let building = lines.iter().find(|l| l.contains("Building")).unwrap();
        let source = lines.iter().find(|l| l.contains("Source errors")).unwrap();
        assert!(queued.ends_with(&"\u{2588}".repeat(10)));
        assert!(building.ends_with(&"\u{2588}".repeat(5)));
        assert!(!source.contains('\u{2588}'));
    }

    #[test]
    fn plain_lists_one_fact_per_line() {
        let lines = format_status(&report(), StatusFormat::Plain, false);
        assert_eq!(lines[0], "Total source images: 6");
        assert!(lines.contains(&"Images not yet built: 4".to_string()));
        assert!(lines.contains(&"    Build errors: 1".to_string()));
        assert!(lines.contains(&"Stale builds (older than 600s): 1".to_string()));
    }

    #[test]
    fn verbose_adds_error_distribution() {
        let quiet = format_status(&report(), StatusFormat::Plain, false);
        assert!(!quiet.iter().any(|l| l.contains("distribution")));
        let verbose = format_status(&report(), StatusFormat::Plain, true);
        let idx = verbose
            .iter()
            .position(|l| l == "Error count distribution:")
            .unwrap();
        assert_eq!(verbose[idx + 1], "    2 error(s): 1 images");
    }

    #[test]
    fn suggestions_follow_the_report() {
        let lines = format_status(&report(), StatusFormat::Pretty, false);
        let idx = lines.iter().position(|l| l == "Suggestions").unwrap();
        assert_eq!(lines[idx + 1], "    img-variants build --stale-after 600");
        assert_eq!(lines[idx + 2], "    img-variants requeue --max-errors 3");
    }

    #[test]
    fn json_is_parseable() {
        let lines = format_status(&report(), StatusFormat::Json, true);
        let value: serde_json::Value = serde_json::from_str(&lines.join("\n")).unwrap();
        assert_eq!(value["counts"]["queued"], 2);
    }

    #[test]
    fn fully_built_ledger_has_no_breakdown() {
        let empty = summarize(&[], t0(), 600);
        let lines = format_status(&empty, StatusFormat::Pretty, true);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn bar_rounds_and_keeps_a_sliver() {
        assert_eq!(bar(0, 10), "");
        assert_eq!(bar(10, 10).chars().count(), 10);
        assert_eq!(bar(1, 100).chars().count(), 1);
        assert_eq!(bar(1, 4).chars().count(), 3);
    }

    // =========================================================================
    // Build and requeue
    // =========================================================================

    #[test]
    fn build_event_lines() {
        let job = sample_job("cat.jpg", 640);
        let built = format_build_event(&BuildEvent::Built {
            identity: job.identity,
            source: job.source.clone(),
            dimensions: Dimensions {
                width: 640,
                height: 360,
            },
        });
        assert!(built[0].starts_with("built   default:cat.jpg \u{2192} "));
        assert!(built[0].ends_with("(640x360)"));

        let failed = format_build_event(&BuildEvent::Failed {
            identity: job.identity,
            source: job.source,
            kind: ErrorKind::Source,
            message: "cannot open".into(),
        });
        assert_eq!(failed[0], "failed  default:cat.jpg [source]: cannot open");
    }

    #[test]
    fn build_report_lines() {
        let report = Report {
            processed: 2,
            built: 2,
            ..Report::default()
        };
        assert_eq!(
            format_build_report(&report),
            vec!["Built 2 image(s)", "2 processed: 2 built, 0 failed"]
        );
    }

    #[test]
    fn requeue_lines() {
        assert_eq!(format_requeue(0), vec!["No images to requeue"]);
        assert_eq!(format_requeue(3), vec!["Requeued 3 image(s)"]);
    }

    // =========================================================================
    // Resolve
    // =========================================================================

    #[test]
    fn resolve_lists_every_variant_with_identity() {
        let resolver = Resolver::new(&Settings::default());
        let mut raw = RawOptions {
            width: Some(WidthToken::Pixels(640)),
            ..RawOptions::default()
        };
        raw.sizes.insert(
            "640".to_string(),
            SizeToken::Width(WidthToken::Pixels(320)),
        );
        let resolved = resolver.resolve(&raw).unwrap();
        let source = SourceId::new("cat.jpg");

        let lines = format_resolve(&source, &resolved);
        assert_eq!(lines[0], "Source: default:cat.jpg");
        assert!(lines[1].starts_with("Sizes: "));
        assert_eq!(lines.len(), 2 + resolved.variants().len());
        let base_identity = fingerprint(&source, &resolved.base).to_hex();
        assert!(lines[2].trim_start().starts_with("base"));
        assert!(lines[2].ends_with(&base_identity));

        // base, breakpoint, 2x, then the widest breakpoint at 2x
        assert_eq!(lines.len(), 6);
        let large = lines[5].trim_start();
        assert!(large.starts_with("(max-width: 640px) 2x 640x360"), "{large}");
    }
}

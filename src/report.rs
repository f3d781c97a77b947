//! Report formatting and printing utilities.
//!
//! Separate from the build logic so bengal can be used as a library without
//! printing side effects. Also home to the deduplicating session error
//! store: the same parse error from two hundred similar pages reports once,
//! with a count.

use std::collections::BTreeMap;
use std::sync::Mutex;

use colored::Colorize;
use unicode_width::UnicodeWidthStr;

use crate::build::BuildSummary;

/// Success mark for consistent output formatting
pub const SUCCESS_MARK: &str = "\u{2713}"; // ✓
/// Failure mark for consistent output formatting
pub const FAILURE_MARK: &str = "\u{2718}"; // ✘

#[derive(Debug)]
struct ErrorEntry {
    count: usize,
    first_detail: String,
}

/// Thread-safe, deduplicating store for recoverable build errors.
///
/// Errors are keyed by category plus message shape (the detail with its
/// leading path stripped), so repeated instances collapse into one line.
#[derive(Debug, Default)]
pub struct SessionErrors {
    inner: Mutex<BTreeMap<String, ErrorEntry>>,
}

impl SessionErrors {
    pub fn new() -> Self {
        SessionErrors::default()
    }

    /// Record one error. `detail` conventionally starts with the offending
    /// path, e.g. `content/bad.md: expected a value`.
    pub fn record(&self, category: &str, detail: &str) {
        let shape = detail.split_once(": ").map(|(_, rest)| rest).unwrap_or(detail);
        let key = format!("{}|{}", category, shape);
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        inner
            .entry(key)
            .and_modify(|entry| entry.count += 1)
            .or_insert_with(|| ErrorEntry {
                count: 1,
                first_detail: format!("{}: {}", category, detail),
            });
    }

    pub fn total(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// `(category, occurrence count, first detail)` per distinct error.
    pub fn entries(&self) -> Vec<(String, usize, String)> {
        let Ok(inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner
            .iter()
            .map(|(key, entry)| {
                let category = key.split('|').next().unwrap_or("error").to_string();
                (category, entry.count, entry.first_detail.clone())
            })
            .collect()
    }
}

/// Print the build summary in cargo style.
pub fn print_summary(summary: &BuildSummary, verbose: bool) {
    if summary.full_rebuild {
        println!(
            "{} full rebuild: {} pages, {} assets in {:.2?}",
            SUCCESS_MARK.green(),
            summary.pages_built,
            summary.assets_processed,
            summary.duration
        );
    } else if summary.pages_built == 0 && summary.assets_processed == 0 {
        println!(
            "{} {}",
            SUCCESS_MARK.green(),
            format!(
                "Nothing to do - {} pages up to date ({:.2?})",
                summary.pages_skipped, summary.duration
            )
            .green()
        );
    } else {
        println!(
            "{} built {} {}, skipped {}, {} {} in {:.2?}",
            SUCCESS_MARK.green(),
            summary.pages_built,
            if summary.pages_built == 1 { "page" } else { "pages" },
            summary.pages_skipped,
            summary.assets_processed,
            if summary.assets_processed == 1 { "asset" } else { "assets" },
            summary.duration
        );
    }

    if verbose && !summary.full_rebuild {
        println!(
            "  {} cache hits, {} pages skipped",
            summary.cache_hits, summary.pages_skipped
        );
    }
    if verbose && !summary.reasons.is_empty() {
        print_reasons(summary);
    }

    print_errors(summary);
}

/// One aligned line per rebuilt page: `<page>  <REASON: trigger>`.
fn print_reasons(summary: &BuildSummary) {
    println!("\n{}", "rebuild reasons:".bold());
    let width = summary
        .reasons
        .keys()
        .map(|key| UnicodeWidthStr::width(key.as_str()))
        .max()
        .unwrap_or(0);
    for (page, reason) in &summary.reasons {
        let padding = width.saturating_sub(UnicodeWidthStr::width(page.as_str()));
        println!(
            "  {}{}  {}",
            page,
            " ".repeat(padding),
            reason.to_string().dimmed().cyan()
        );
    }
}

fn print_errors(summary: &BuildSummary) {
    if summary.errors.is_empty() {
        return;
    }
    println!();
    for (_, count, detail) in &summary.errors {
        let suffix = if *count > 1 {
            format!(" ({} occurrences)", count)
        } else {
            String::new()
        };
        eprintln!(
            "{} {}{}",
            "warning:".bold().yellow(),
            detail,
            suffix.dimmed()
        );
    }
    let total: usize = summary.errors.iter().map(|(_, count, _)| count).sum();
    eprintln!(
        "{} {} {} could not be fully processed",
        FAILURE_MARK.red(),
        total,
        if total == 1 { "item" } else { "items" }
    );
}

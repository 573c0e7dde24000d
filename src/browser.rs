use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use std::time::Instant;
use tracing::{info, warn};

use crate::args::Browser;
use crate::batch::{self, BatchConfig};
use crate::context::RunContext;
use crate::patterns::{self, Rule};
use crate::stats::{AnalysisResult, DateRange, DomainStats};
use crate::utils::{format_number, redact_domain};
use crate::Args;

/// Shown when neither `--top` nor `--bottom` is requested.
const DEFAULT_TOP: usize = 10;

pub fn analyze_browser_history(args: &Args, ctx: &RunContext) -> Result<AnalysisResult> {
    // Rules are loaded once and shared by every browser in the run.
    let rules = if args.no_patterns {
        Vec::new()
    } else {
        patterns::load_domain_patterns(args.patterns.as_deref(), ctx)?
    };
    let config = BatchConfig::with_workers(args.workers);

    let result = if args.all_browsers {
        analyze_all_browsers(&rules, &config, args.temp_path.as_deref(), ctx)?
    } else {
        analyze_single_browser(args.browser, &rules, &config, args.temp_path.as_deref(), ctx)?
    };

    info!(
        parent: ctx.span(),
        action = "complete",
        component = "run",
        source = %result.source,
        unique_domains = result.stats.unique_count(),
        duration_ms = ctx.elapsed().as_millis(),
        "Run completed"
    );
    Ok(result)
}

fn analyze_single_browser(
    browser: Browser,
    rules: &[Rule],
    config: &BatchConfig,
    temp_path: Option<&Path>,
    ctx: &RunContext,
) -> Result<AnalysisResult> {
    info!(parent: ctx.span(), action = "start", component = "browser_analysis", browser = %browser, "Starting browser history analysis");

    let history_path = crate::sqlite::resolve_history_file(browser, ctx)?;
    let (date_range, stats) =
        analyze_history_file(&history_path, browser, rules, config, temp_path, ctx)?;

    Ok(AnalysisResult {
        source: browser.to_string(),
        date_range,
        stats,
    })
}

/// Runs the whole pipeline against one history database file.
///
/// The file is copied first and the copy is removed afterwards, even when a
/// query fails.
pub fn analyze_history_file(
    history_path: &Path,
    browser: Browser,
    rules: &[Rule],
    config: &BatchConfig,
    temp_path: Option<&Path>,
    ctx: &RunContext,
) -> Result<(DateRange, DomainStats)> {
    let total_start_time = Instant::now();
    let copy = crate::sqlite::copy_history_database(history_path, temp_path, ctx)?;

    let conn = Connection::open(copy.path())?;
    info!(parent: ctx.span(), action = "connect", component = "database", "Connected to database");

    let date_range = crate::sqlite::get_date_range(&conn, browser, ctx)?;
    let urls = crate::sqlite::fetch_urls(&conn, browser, ctx)?;

    info!(parent: ctx.span(), action = "disconnect", component = "database", "Closing database connection");
    drop(conn);

    let stats = batch::run(&urls, rules, config, ctx);

    info!(
        parent: ctx.span(),
        action = "complete",
        component = "browser_analysis",
        browser = %browser,
        duration_ms = total_start_time.elapsed().as_millis(),
        "Analysis completed successfully"
    );
    Ok((date_range, stats))
}

fn analyze_all_browsers(
    rules: &[Rule],
    config: &BatchConfig,
    temp_path: Option<&Path>,
    ctx: &RunContext,
) -> Result<AnalysisResult> {
    let mut stats = DomainStats::new();
    let mut date_range = DateRange::default();
    let mut analyzed = 0;

    for browser in Browser::ALL {
        match analyze_single_browser(browser, rules, config, temp_path, ctx) {
            Ok(result) => {
                stats.merge(result.stats);
                date_range.widen(result.date_range);
                analyzed += 1;
            }
            Err(e) => {
                warn!(parent: ctx.span(), action = "skip", component = "browser_analysis", browser = %browser, error = %e, "Failed to analyze browser");
            }
        }
    }

    if analyzed == 0 {
        anyhow::bail!("No browser history could be analyzed");
    }

    Ok(AnalysisResult {
        source: "All Browsers".to_string(),
        date_range,
        stats,
    })
}

#[derive(Debug, Serialize)]
struct RankedDomain {
    domain: String,
    visits: u64,
}

#[derive(Debug, Serialize)]
struct Report<'a> {
    source: &'a str,
    date_range: &'a DateRange,
    days: i64,
    unique_domains: usize,
    domains_removed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    top: Option<Vec<RankedDomain>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bottom: Option<Vec<RankedDomain>>,
}

/// Top/bottom list sizes for a report; top defaults to 10 when neither is set.
fn requested_rankings(args: &Args) -> (Option<usize>, Option<usize>) {
    match (args.top, args.bottom) {
        (None, None) => (Some(DEFAULT_TOP), None),
        other => other,
    }
}

fn ranked(entries: Vec<(&str, u64)>, redact: bool) -> Vec<RankedDomain> {
    entries
        .into_iter()
        .map(|(domain, visits)| RankedDomain {
            domain: if redact {
                redact_domain(domain)
            } else {
                domain.to_string()
            },
            visits,
        })
        .collect()
}

fn build_report<'a>(result: &'a AnalysisResult, args: &Args) -> Report<'a> {
    let (top, bottom) = requested_rankings(args);
    Report {
        source: &result.source,
        date_range: &result.date_range,
        days: result.date_range.days(),
        unique_domains: result.stats.unique_count(),
        domains_removed: result.stats.domains_removed,
        top: top.map(|n| ranked(result.stats.top_n(n), args.redact)),
        bottom: bottom.map(|n| ranked(result.stats.bottom_n(n), args.redact)),
    }
}

fn format_date(date: Option<chrono::DateTime<chrono::Utc>>) -> String {
    date.map(|d| d.format("%B %-d, %Y").to_string())
        .unwrap_or_else(|| "No data available".to_string())
}

pub fn render_text_report(result: &AnalysisResult, args: &Args) -> String {
    let report = build_report(result, args);
    let mut out = format!("\n--- {} History Analysis ---\n", report.source);

    let earliest = format_date(report.date_range.earliest);
    let latest = format_date(report.date_range.latest);
    if report.days > 0 {
        out.push_str(&format!(
            "Date range: {} to {} ({} days)\n",
            earliest,
            latest,
            format_number(report.days as u64)
        ));
    } else {
        out.push_str(&format!("Date range: {earliest} to {latest}\n"));
    }

    out.push_str(&format!(
        "Total unique domains found: {}\n",
        format_number(report.unique_domains as u64)
    ));
    out.push_str(&format!(
        "Domains removed (no valid TLD): {}\n",
        format_number(report.domains_removed)
    ));

    if let Some(top) = &report.top {
        out.push_str(&format!("\nTop {} most visited domains:\n", top.len()));
        for entry in top {
            out.push_str(&format!(
                "- {}: {} visits\n",
                entry.domain,
                format_number(entry.visits)
            ));
        }
    }

    if let Some(bottom) = &report.bottom {
        out.push_str(&format!("\nBottom {} least visited domains:\n", bottom.len()));
        for entry in bottom {
            out.push_str(&format!(
                "- {}: {} visits\n",
                entry.domain,
                format_number(entry.visits)
            ));
        }
    }

    out
}

pub fn render_json_report(result: &AnalysisResult, args: &Args) -> Result<String> {
    Ok(serde_json::to_string_pretty(&build_report(result, args))?)
}

pub fn print_analysis_results(result: &AnalysisResult, args: &Args) -> Result<()> {
    if args.json {
        println!("{}", render_json_report(result, args)?);
    } else {
        print!("{}", render_text_report(result, args));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use clap::Parser;

    fn sample_result() -> AnalysisResult {
        let mut stats = DomainStats::new();
        for (domain, count) in [("example.com", 1500), ("github.io", 20), ("docs.rs", 3)] {
            for _ in 0..count {
                stats.record(domain.to_string());
            }
        }
        stats.domains_removed = 7;

        AnalysisResult {
            source: "Vivaldi".to_string(),
            date_range: DateRange::new(
                Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            ),
            stats,
        }
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["domain-tally"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_text_report_defaults_to_top_ten() {
        let text = render_text_report(&sample_result(), &args(&[]));
        assert!(text.contains("--- Vivaldi History Analysis ---"));
        assert!(text.contains("Date range: January 1, 2024 to January 31, 2024 (30 days)"));
        assert!(text.contains("Total unique domains found: 3"));
        assert!(text.contains("Domains removed (no valid TLD): 7"));
        assert!(text.contains("Top 3 most visited domains:\n- example.com: 1,500 visits"));
        assert!(!text.contains("Bottom"));
    }

    #[test]
    fn test_text_report_bottom_only() {
        let text = render_text_report(&sample_result(), &args(&["--bottom", "1"]));
        assert!(!text.contains("Top"));
        assert!(text.contains("Bottom 1 least visited domains:\n- docs.rs: 3 visits"));
    }

    #[test]
    fn test_text_report_redacts() {
        let text = render_text_report(&sample_result(), &args(&["--top", "2", "--redact"]));
        assert!(text.contains("- *******.com: 1,500 visits"));
        assert!(text.contains("- ******.io: 20 visits"));
        assert!(!text.contains("example.com"));
    }

    #[test]
    fn test_json_report() {
        let json = render_json_report(&sample_result(), &args(&["--top", "1", "--bottom", "1"]))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["unique_domains"], 3);
        assert_eq!(value["domains_removed"], 7);
        assert_eq!(value["days"], 30);
        assert_eq!(value["top"][0]["domain"], "example.com");
        assert_eq!(value["bottom"][0]["visits"], 3);
    }
}

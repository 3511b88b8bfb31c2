//! Report emitter: text, Markdown, JSON and CSV renderings of an analysis run,
//! plus console tables for the single-day views.
//!
//! Buckets with fewer than `min_reliable_samples` observations are marked `*`
//! in the text and Markdown tables and `reliable = false` in CSV. Every
//! exclusion is listed.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use boardlab_core::aggregate::AggregateBucket;
use boardlab_core::snapshot::{IndustryDayStats, MarketSnapshot, NextDayPerformance};

use crate::pipeline::{AnalysisReport, SCHEMA_VERSION};

/// Output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
    Json,
    Csv,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Text => "txt",
            ReportFormat::Markdown => "md",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReportFormat::Text => "text",
            ReportFormat::Markdown => "markdown",
            ReportFormat::Json => "json",
            ReportFormat::Csv => "csv",
        };
        f.write_str(s)
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "txt" => Ok(ReportFormat::Text),
            "markdown" | "md" => Ok(ReportFormat::Markdown),
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            other => Err(format!("unknown report format '{other}' (expected text, markdown, json or csv)")),
        }
    }
}

/// Render a report in the requested format.
pub fn render(report: &AnalysisReport, format: ReportFormat) -> Result<String> {
    match format {
        ReportFormat::Text => Ok(render_text(report)),
        ReportFormat::Markdown => Ok(render_markdown(report)),
        ReportFormat::Json => export_json(report),
        ReportFormat::Csv => export_csv(report),
    }
}

/// Write a rendered report into `dir` and return its path.
///
/// File name: `boardlab_{as_of}_{direction}_{fingerprint prefix}.{ext}`.
pub fn write_report(report: &AnalysisReport, dir: &Path, format: ReportFormat) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create report dir: {}", dir.display()))?;
    let prefix: String = report.fingerprint.chars().take(12).collect();
    let name = format!(
        "boardlab_{}_{}_{}.{}",
        report.as_of.format("%Y%m%d"),
        report.direction.to_string().to_lowercase(),
        prefix,
        format.extension()
    );
    let path = dir.join(name);
    let tmp = path.with_extension(format!("{}.tmp", format.extension()));
    let body = render(report, format)?;
    std::fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, &path).with_context(|| format!("failed to rename into {}", path.display()))?;
    Ok(path)
}

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(report: &AnalysisReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("failed to serialize AnalysisReport to JSON")
}

/// Parse a JSON report, rejecting newer schema versions.
pub fn import_json(json: &str) -> Result<AnalysisReport> {
    let report: AnalysisReport =
        serde_json::from_str(json).context("failed to deserialize AnalysisReport from JSON")?;
    if report.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            report.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(report)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Bucket table. When the run was partitioned, the ungrouped rows carry
/// industry `ALL` and each partition follows.
pub fn export_csv(report: &AnalysisReport) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    let partitioned = report.industries.is_some();

    let mut header = Vec::with_capacity(9);
    if partitioned {
        header.push("industry");
    }
    header.extend([
        "streak_length",
        "sample_count",
        "continuation_count",
        "continuation_probability",
        "return_count",
        "next_day_return_mean",
        "next_day_return_stddev",
        "reliable",
    ]);
    wtr.write_record(&header)?;

    let mut write_rows = |industry: Option<&str>, buckets: &[AggregateBucket]| -> Result<()> {
        for b in buckets {
            let mut row = Vec::with_capacity(9);
            if let Some(ind) = industry {
                row.push(ind.to_string());
            }
            row.extend([
                b.streak_length.to_string(),
                b.sample_count.to_string(),
                b.continuation_count.to_string(),
                format!("{:.6}", b.continuation_probability()),
                b.return_count.to_string(),
                opt6(b.next_day_return_mean),
                opt6(b.next_day_return_stddev),
                b.is_reliable(report.min_reliable_samples).to_string(),
            ]);
            wtr.write_record(&row)?;
        }
        Ok(())
    };

    match &report.industries {
        Some(parts) => {
            write_rows(Some("ALL"), &report.buckets)?;
            for (industry, buckets) in parts {
                write_rows(Some(industry), buckets)?;
            }
        }
        None => write_rows(None, &report.buckets)?,
    }

    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

fn opt6(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.6}")).unwrap_or_default()
}

fn pct(v: f64) -> String {
    format!("{:.2}%", v * 100.0)
}

fn opt_pct(v: Option<f64>) -> String {
    v.map(pct).unwrap_or_else(|| "-".to_string())
}

fn flag(b: &AggregateBucket, min: usize) -> &'static str {
    if b.is_reliable(min) {
        ""
    } else {
        "*"
    }
}

// ─── Text ───────────────────────────────────────────────────────────

fn render_text(report: &AnalysisReport) -> String {
    let mut out = String::with_capacity(2048);
    out.push_str(&format!(
        "Streak analysis ({}) {} .. {}  [lookback {} trading days]\n",
        report.direction, report.window_start, report.as_of, report.lookback_trading_days
    ));
    out.push_str(&format!(
        "securities {}  records {}  episodes {}  fingerprint {}\n\n",
        report.security_count,
        report.record_count,
        report.episode_count,
        &report.fingerprint.chars().take(12).collect::<String>()
    ));

    push_text_buckets(&mut out, &report.buckets, report.min_reliable_samples);

    if !report.length_distribution.is_empty() {
        out.push_str("\nEpisodes ending in window by length:\n");
        for (len, n) in &report.length_distribution {
            out.push_str(&format!("  {len:>3} boards: {n}\n"));
        }
    }

    if let Some(parts) = &report.industries {
        for (industry, buckets) in parts {
            out.push_str(&format!("\n[{industry}]\n"));
            push_text_buckets(&mut out, buckets, report.min_reliable_samples);
        }
    }

    if !report.unreliable_lengths().is_empty() {
        out.push_str(&format!(
            "\n* fewer than {} samples; treat as indicative only\n",
            report.min_reliable_samples
        ));
    }
    push_exclusions(&mut out, report, "Excluded");
    out
}

fn push_text_buckets(out: &mut String, buckets: &[AggregateBucket], min: usize) {
    out.push_str(&format!(
        "{:>7} {:>8} {:>9} {:>9} {:>8} {:>10} {:>10}\n",
        "length", "samples", "continued", "prob", "returns", "mean", "stddev"
    ));
    for b in buckets {
        out.push_str(&format!(
            "{:>6}{:1} {:>8} {:>9} {:>9} {:>8} {:>10} {:>10}\n",
            b.streak_length,
            flag(b, min),
            b.sample_count,
            b.continuation_count,
            pct(b.continuation_probability()),
            b.return_count,
            opt_pct(b.next_day_return_mean),
            opt_pct(b.next_day_return_stddev),
        ));
    }
}

fn push_exclusions(out: &mut String, report: &AnalysisReport, title: &str) {
    if report.exclusions.is_empty() {
        return;
    }
    out.push_str(&format!("\n{title} ({}):\n", report.exclusions.len()));
    for diag in &report.exclusions {
        out.push_str(&format!("- {diag}\n"));
    }
}

// ─── Markdown ───────────────────────────────────────────────────────

fn render_markdown(report: &AnalysisReport) -> String {
    let mut md = String::with_capacity(2048);

    md.push_str("# Limit Streak Report\n\n");

    md.push_str("## Metadata\n\n");
    md.push_str("| Field | Value |\n");
    md.push_str("| --- | --- |\n");
    md.push_str(&format!("| Direction | {} |\n", report.direction));
    md.push_str(&format!("| Window | {} to {} |\n", report.window_start, report.as_of));
    md.push_str(&format!("| Lookback | {} trading days |\n", report.lookback_trading_days));
    md.push_str(&format!("| Securities | {} |\n", report.security_count));
    md.push_str(&format!("| Records | {} |\n", report.record_count));
    md.push_str(&format!("| Episodes | {} |\n", report.episode_count));
    md.push_str(&format!("| Dataset Hash | {} |\n", report.dataset_hash));
    md.push_str(&format!("| Fingerprint | {} |\n", report.fingerprint));
    md.push('\n');

    md.push_str("## Continuation by Streak Length\n\n");
    push_markdown_buckets(&mut md, &report.buckets, report.min_reliable_samples);
    if !report.unreliable_lengths().is_empty() {
        md.push_str(&format!(
            "\n\\* fewer than {} samples\n",
            report.min_reliable_samples
        ));
    }
    md.push('\n');

    if !report.length_distribution.is_empty() {
        md.push_str("## Board Ladder\n\n");
        md.push_str("| Boards | Episodes |\n");
        md.push_str("| ---: | ---: |\n");
        for (len, n) in &report.length_distribution {
            md.push_str(&format!("| {len} | {n} |\n"));
        }
        md.push('\n');
    }

    if let Some(parts) = &report.industries {
        md.push_str("## By Industry\n\n");
        for (industry, buckets) in parts {
            md.push_str(&format!("### {industry}\n\n"));
            push_markdown_buckets(&mut md, buckets, report.min_reliable_samples);
            md.push('\n');
        }
    }

    if !report.exclusions.is_empty() {
        md.push_str("## Exclusions\n\n");
        for diag in &report.exclusions {
            md.push_str(&format!("- {diag}\n"));
        }
        md.push('\n');
    }

    md
}

fn push_markdown_buckets(md: &mut String, buckets: &[AggregateBucket], min: usize) {
    md.push_str("| Length | Samples | Continued | Probability | Returns | Mean | Std Dev |\n");
    md.push_str("| ---: | ---: | ---: | ---: | ---: | ---: | ---: |\n");
    for b in buckets {
        let marker = if b.is_reliable(min) { "" } else { "\\*" };
        md.push_str(&format!(
            "| {}{} | {} | {} | {} | {} | {} | {} |\n",
            b.streak_length,
            marker,
            b.sample_count,
            b.continuation_count,
            pct(b.continuation_probability()),
            b.return_count,
            opt_pct(b.next_day_return_mean),
            opt_pct(b.next_day_return_stddev),
        ));
    }
}

// ─── Single-day views ───────────────────────────────────────────────

pub fn snapshot_text(snap: &MarketSnapshot) -> String {
    let mut out = format!(
        "Market snapshot {}\ntraded {}  up-limit {}  down-limit {}  suspended {}  unclassified {}\nlimit-up ratio {}\n",
        snap.date,
        snap.traded,
        snap.up_limit,
        snap.down_limit,
        snap.suspended,
        snap.unclassified,
        pct(snap.limit_up_ratio()),
    );
    if snap.ladder.is_empty() {
        out.push_str("no up-limit streaks\n");
        return out;
    }
    out.push_str("\nStreak ladder:\n");
    for (boards, ids) in snap.ladder.iter().rev() {
        out.push_str(&format!("  {boards:>3} boards ({:>3}): {}\n", ids.len(), ids.join(" ")));
    }
    out
}

pub fn performance_text(perf: &NextDayPerformance) -> String {
    format!(
        "Up-limit closes on {} and their next day {}\n\
         total {}\n\
         up {} ({})  down {} ({})  flat {}\n\
         up-limit again {} ({})  down-limit {} ({})\n\
         not traded {}\n\
         mean return {}\n",
        perf.previous_date,
        perf.date,
        perf.total,
        perf.up,
        pct(perf.up_ratio()),
        perf.down,
        pct(perf.down_ratio()),
        perf.flat,
        perf.up_limit_again,
        pct(perf.up_limit_ratio()),
        perf.down_limit,
        pct(perf.down_limit_ratio()),
        perf.not_traded,
        opt_pct(perf.mean_return),
    )
}

pub fn industry_text(stats: &[IndustryDayStats], top: usize) -> String {
    let mut out = format!(
        "{:<16} {:>6} {:>9} {:>8} {:>12} {:>9}\n",
        "industry", "count", "advancers", "up-limit", "amount(亿)", "chg%"
    );
    for s in stats.iter().take(top) {
        out.push_str(&format!(
            "{:<16} {:>6} {:>9} {:>8} {:>12.2} {:>9}\n",
            s.industry,
            s.securities,
            s.advancers,
            s.up_limit,
            s.amount_yi,
            s.mean_change_pct.map(|c| format!("{c:.2}")).unwrap_or_else(|| "-".into()),
        ));
    }
    out
}

pub fn market_distribution_text(distribution: &[(String, usize)]) -> String {
    let total: usize = distribution.iter().map(|(_, n)| n).sum();
    let mut out = String::new();
    for (market, n) in distribution {
        let share = if total == 0 { 0.0 } else { *n as f64 / total as f64 };
        out.push_str(&format!("{market:<12} {n:>6}  {}\n", pct(share)));
    }
    out.push_str(&format!("{:<12} {total:>6}\n", "total"));
    out
}

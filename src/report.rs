//! Output formatting for analysis summaries and query answers.
//!
//! Supports two output formats:
//! - Pretty: colored terminal output for human readability
//! - JSON: structured output for programmatic consumption

use colored::*;
use serde::Serialize;

use crate::pipeline::ArtifactSummary;

/// JSON envelope for an `analyze` run.
#[derive(Serialize)]
pub struct JsonAnalysisReport<'a> {
    pub version: &'static str,
    pub path: &'a str,
    #[serde(flatten)]
    pub summary: &'a ArtifactSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_classifiers: Vec<SkippedClassifier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedClassifier {
    pub name: String,
    pub reason: String,
}

/// One answer line of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryRow {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl QueryRow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: None,
            detail: None,
        }
    }

    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// A query and its answer rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryReport {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
    pub generation: u64,
    pub rows: Vec<QueryRow>,
}

pub fn analysis_json(
    path: &str,
    summary: &ArtifactSummary,
    skipped: &[(String, String)],
) -> anyhow::Result<String> {
    let report = JsonAnalysisReport {
        version: env!("CARGO_PKG_VERSION"),
        path,
        summary,
        skipped_classifiers: skipped
            .iter()
            .map(|(name, reason)| SkippedClassifier {
                name: name.clone(),
                reason: reason.clone(),
            })
            .collect(),
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

pub fn write_analysis_json(
    path: &str,
    summary: &ArtifactSummary,
    skipped: &[(String, String)],
) -> anyhow::Result<()> {
    println!("{}", analysis_json(path, summary, skipped)?);
    Ok(())
}

pub fn write_analysis_pretty(path: &str, summary: &ArtifactSummary, skipped: &[(String, String)]) {
    print!("{}", analysis_pretty(path, summary, skipped));
}

/// Pretty rendering of an `analyze` run.
pub fn analysis_pretty(path: &str, summary: &ArtifactSummary, skipped: &[(String, String)]) -> String {
    let mut out = String::new();
    out.push('\n');
    out.push_str(&format!(
        "  {} v{}\n\n",
        "codemodel".cyan().bold(),
        env!("CARGO_PKG_VERSION")
    ));
    out.push_str(&format!("  {}{}\n", "Source:     ".dimmed(), path));
    out.push_str(&format!(
        "  {}{} ({}, {})\n",
        "Adapter:    ".dimmed(),
        summary.adapter,
        summary.language,
        summary.strategy
    ));
    out.push_str(&format!("  {}{}\n", "Level:      ".dimmed(), summary.level));
    out.push_str(&format!(
        "  {}{} (generation {})\n\n",
        "Cache key:  ".dimmed(),
        summary.cache_key,
        summary.generation
    ));

    out.push_str(&format!("  {}\n", "Model".bold()));
    for (label, count) in [
        ("units", summary.units),
        ("types", summary.types),
        ("callables", summary.callables),
        ("call sites", summary.call_sites),
        ("comments", summary.comments),
    ] {
        out.push_str(&format!("    {:<12}{}\n", label, count));
    }

    if let (Some(resolved), Some(unresolved)) = (summary.resolved_calls, summary.unresolved_calls) {
        out.push('\n');
        out.push_str(&format!("  {}\n", "Call graph".bold()));
        out.push_str(&format!("    {:<12}{}\n", "resolved", resolved.to_string().green()));
        let unresolved = if unresolved == 0 {
            unresolved.to_string().green()
        } else {
            unresolved.to_string().yellow()
        };
        out.push_str(&format!("    {:<12}{}\n", "unresolved", unresolved));
    }

    if let Some(facts) = summary.derived_facts {
        out.push('\n');
        out.push_str(&format!("  {}\n", "Inference".bold()));
        out.push_str(&format!("    {:<12}{}\n", "facts", facts));
        for (name, reason) in skipped {
            out.push_str(&format!(
                "    {} {} {}\n",
                "skipped".dimmed(),
                name,
                format!("({})", reason).dimmed()
            ));
        }
    }
    out.push('\n');
    out
}

pub fn write_query_json(report: &QueryReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

pub fn write_query_pretty(report: &QueryReport) {
    print!("{}", query_pretty(report));
}

/// Pretty rendering of a query answer.
pub fn query_pretty(report: &QueryReport) -> String {
    let mut out = String::new();
    let title = match &report.argument {
        Some(arg) => format!("{} {}", report.query, arg),
        None => report.query.clone(),
    };
    out.push_str(&format!("\n  {}\n", title.cyan().bold()));

    if report.rows.is_empty() {
        out.push_str(&format!("    {}\n\n", "no results".dimmed()));
        return out;
    }

    let width = report.rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
    for row in &report.rows {
        out.push_str(&format!("    {:<width$}", row.name, width = width));
        if let Some(detail) = &row.detail {
            out.push_str(&format!("  {}", detail.yellow()));
        }
        if let Some(location) = &row.location {
            out.push_str(&format!("  {}", location.dimmed()));
        }
        out.push('\n');
    }
    out.push_str(&format!(
        "\n  {}\n\n",
        format!("{} result(s), generation {}", report.rows.len(), report.generation).dimmed()
    ));
    out
}

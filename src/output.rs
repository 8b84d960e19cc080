//! Rendering of package listings and run summaries

use colored::Colorize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::graph::DependencyGraph;
use crate::package::{Package, PackageSummary};
use crate::task::{RunReport, TaskStatus};

/// How a package selection is printed. Exactly one applies per command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One name per line, `(PRIVATE)` appended for private packages
    #[default]
    Plain,
    /// Columns: name, version, location relative to the root
    Long,
    /// Absolute locations; with `long`, `location:name:version[:PRIVATE]`
    Parseable { long: bool },
    Json,
    Ndjson,
    /// Names in dependency order
    Toposort,
    /// Name to workspace dependencies
    Graph,
}

impl OutputFormat {
    /// Resolve the listing flags. `long` refines plain and parseable output
    /// and is ignored by the structured formats.
    pub fn from_flags(
        json: bool,
        ndjson: bool,
        parseable: bool,
        long: bool,
        toposort: bool,
        graph: bool,
    ) -> Self {
        if json {
            OutputFormat::Json
        } else if ndjson {
            OutputFormat::Ndjson
        } else if graph {
            OutputFormat::Graph
        } else if parseable {
            OutputFormat::Parseable { long }
        } else if toposort {
            OutputFormat::Toposort
        } else if long {
            OutputFormat::Long
        } else {
            OutputFormat::Plain
        }
    }
}

/// Render `packages` (declaration order) for stdout. Every line ends with a newline.
pub fn render(
    format: OutputFormat,
    graph: &DependencyGraph,
    packages: &[&Package],
    root: &Path,
) -> Result<String> {
    let out = match format {
        OutputFormat::Plain => lines(packages.iter().map(|pkg| {
            if pkg.private {
                format!("{} (PRIVATE)", pkg.name)
            } else {
                pkg.name.clone()
            }
        })),
        OutputFormat::Long => render_long(packages, root),
        OutputFormat::Parseable { long } => lines(packages.iter().map(|pkg| {
            let location = pkg.location.display().to_string();
            if !long {
                return location;
            }
            let mut line = format!("{}:{}:{}", location, pkg.name, pkg.version);
            if pkg.private {
                line.push_str(":PRIVATE");
            }
            line
        })),
        OutputFormat::Json => {
            let summaries: Vec<PackageSummary> = packages.iter().map(|pkg| pkg.summary()).collect();
            format!("{}\n", serde_json::to_string_pretty(&summaries)?)
        }
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for pkg in packages {
                out.push_str(&serde_json::to_string(&pkg.summary())?);
                out.push('\n');
            }
            out
        }
        OutputFormat::Toposort => {
            let names: Vec<&str> = packages.iter().map(|pkg| pkg.name.as_str()).collect();
            lines(graph.topological_sort(&names).into_iter())
        }
        OutputFormat::Graph => {
            let map: BTreeMap<&str, Vec<&str>> = packages
                .iter()
                .map(|pkg| {
                    let mut deps = graph.dependencies_of(&pkg.name);
                    deps.sort_unstable();
                    (pkg.name.as_str(), deps)
                })
                .collect();
            format!("{}\n", serde_json::to_string_pretty(&map)?)
        }
    };
    Ok(out)
}

fn lines(items: impl Iterator<Item = String>) -> String {
    items.map(|line| line + "\n").collect()
}

fn render_long(packages: &[&Package], root: &Path) -> String {
    // `{:<width$}` pads by chars, not bytes
    let name_width = packages.iter().map(|pkg| pkg.name.chars().count()).max().unwrap_or(0);
    let version_width = packages
        .iter()
        .map(|pkg| pkg.version.chars().count() + 1)
        .max()
        .unwrap_or(0);

    lines(packages.iter().map(|pkg| {
        let mut line = format!(
            "{:<name_width$} {:>version_width$} {}",
            pkg.name,
            format!("v{}", pkg.version),
            pkg.relative_location(root).display(),
        );
        if pkg.private {
            line.push_str(" (PRIVATE)");
        }
        line
    }))
}

/// Print the end-of-run block to stderr
pub fn print_summary(report: &RunReport) {
    eprint!("{}", summary(report));
}

pub fn summary(report: &RunReport) -> String {
    let mut out = String::new();
    let total = report.runs.len();
    let elapsed = format!("{:.1}s", report.duration.as_secs_f64());

    out.push_str(&format!("{}\n", "─".repeat(50).dimmed()));

    if report.is_success() {
        out.push_str(&format!(
            "{} Ran script '{}' in {} package{} in {}:\n",
            "✓".green().bold(),
            report.script,
            total,
            if total == 1 { "" } else { "s" },
            elapsed
        ));
        for run in &report.runs {
            out.push_str(&format!("  {} {}\n", "-".green(), run.name()));
        }
        return out;
    }

    out.push_str(&format!(
        "{} {}/{} package{} failed running '{}' ({})\n",
        "✗".red().bold(),
        report.failed(),
        total,
        if total == 1 { "" } else { "s" },
        report.script,
        elapsed
    ));

    for run in &report.runs {
        let line = match run.status {
            TaskStatus::Succeeded => format!("  {} {}", "✓".green(), run.name()),
            TaskStatus::Failed => match run.exit_code {
                Some(code) => format!("  {} {} (exit code {})", "✗".red(), run.name(), code),
                None => format!("  {} {} (terminated)", "✗".red(), run.name()),
            },
            TaskStatus::Pending | TaskStatus::Running => {
                format!("  {} {} {}", "•".dimmed(), run.name(), "(not run)".dimmed())
            }
        };
        out.push_str(&line);
        out.push('\n');
    }

    if report.bailed {
        out.push_str(&format!(
            "{}\n",
            "Stopped scheduling after the first failure, use --no-bail to run every package".yellow()
        ));
    }

    out
}

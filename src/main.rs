use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use monorail::config::{Config, CONFIG_FILE};
use monorail::execution::{write_profile, NpmClient, RunMode, RunOptions, Runner};
use monorail::git::LocalRepository;
use monorail::output::{self, OutputFormat};
use monorail::{ChangeDetector, ChangeOptions, ChangeSet, DependencyGraph, FilterSpec, Workspace};

#[derive(Parser)]
#[command(name = "monorail")]
#[command(about = "Monorepo workspace manager: dependency graph, change detection and script orchestration")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file (default: monorail.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace). Overrides RUST_LOG.
    #[arg(long, global = true)]
    loglevel: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List local packages that have changed since the last tagged release
    Changed {
        #[command(flatten)]
        output: OutputArgs,

        /// Include tags from merged branches when looking for the last release
        #[arg(long)]
        include_merged_tags: bool,
    },

    /// List local packages
    #[command(alias = "ls")]
    List {
        #[command(flatten)]
        filter: FilterArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run a script in each package that defines it
    Run {
        /// Script name from package.json
        script: String,

        /// Arguments passed to the script
        #[arg(last = true)]
        args: Vec<String>,

        /// Stream output with lines prefixed by the package name
        #[arg(long)]
        stream: bool,

        /// Run in every package at once, ignoring dependency order
        #[arg(long, conflicts_with = "stream")]
        parallel: bool,

        /// Do not prefix streamed output
        #[arg(long)]
        no_prefix: bool,

        /// Write a Chrome trace-event profile of the run
        #[arg(long)]
        profile: bool,

        /// Directory for the profile, relative to the workspace root
        #[arg(long, requires = "profile")]
        profile_location: Option<String>,

        /// Client used to run scripts (npm, yarn, pnpm, ...)
        #[arg(long)]
        npm_client: Option<String>,

        /// Keep running other packages after a failure
        #[arg(long)]
        no_bail: bool,

        /// Non-interactive mode: no colors
        #[arg(long)]
        ci: bool,

        /// Maximum number of scripts running at once
        #[arg(long)]
        concurrency: Option<usize>,

        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Show information as a JSON array
    #[arg(long)]
    json: bool,

    /// Show information as newline-delimited JSON
    #[arg(long, conflicts_with = "json")]
    ndjson: bool,

    /// Include private packages
    #[arg(short, long)]
    all: bool,

    /// Show extended information
    #[arg(short, long)]
    long: bool,

    /// Show parseable output instead of columns
    #[arg(short, long)]
    parseable: bool,

    /// Sort packages in topological order
    #[arg(long)]
    toposort: bool,

    /// Show dependency graph as a JSON object
    #[arg(long)]
    graph: bool,
}

impl OutputArgs {
    fn format(&self) -> OutputFormat {
        OutputFormat::from_flags(
            self.json,
            self.ndjson,
            self.parseable,
            self.long,
            self.toposort,
            self.graph,
        )
    }
}

#[derive(Args, Debug, Default)]
struct FilterArgs {
    /// Include only packages with names matching the glob
    #[arg(long)]
    scope: Vec<String>,

    /// Exclude packages with names matching the glob
    #[arg(long)]
    ignore: Vec<String>,

    /// Exclude private packages
    #[arg(long)]
    no_private: bool,

    /// Include all transitive dependencies of the selected packages
    #[arg(long)]
    include_dependencies: bool,

    /// Only packages changed since the ref, or since the last tag without one
    #[arg(long, num_args = 0..=1, default_missing_value = "", value_name = "REF")]
    since: Option<String>,

    /// With --since, leave out packages that only depend on changed ones
    #[arg(long, requires = "since")]
    exclude_dependents: bool,

    /// With --since, include tags from merged branches
    #[arg(long)]
    include_merged_tags: bool,
}

impl FilterArgs {
    fn spec(&self, private: bool) -> FilterSpec {
        FilterSpec {
            scope: self.scope.clone(),
            ignore: self.ignore.clone(),
            private: private && !self.no_private,
            since: self.since.clone(),
            include_dependencies: self.include_dependencies,
            exclude_dependents: self.exclude_dependents,
            include_merged_tags: self.include_merged_tags,
        }
    }
}

/// Workspace context shared by every command
struct WorkspaceContext {
    root: PathBuf,
    config: Config,
    graph: DependencyGraph,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.loglevel.as_deref())?;

    let ctx = load_workspace(cli.config.as_deref())?;

    match cli.command {
        Commands::Changed {
            output,
            include_merged_tags,
        } => cmd_changed(&ctx, &output, include_merged_tags),
        Commands::List { filter, output } => cmd_list(&ctx, &filter, &output),
        Commands::Run {
            script,
            args,
            stream,
            parallel,
            no_prefix,
            profile,
            profile_location,
            npm_client,
            no_bail,
            ci,
            concurrency,
            filter,
        } => {
            if ci {
                colored::control::set_override(false);
                info!("ci enabled");
            }

            let mode = if parallel {
                RunMode::Parallel
            } else if stream || ctx.config.run.stream {
                RunMode::Stream
            } else {
                RunMode::Batched
            };

            let options = RunOptions {
                mode,
                concurrency: concurrency
                    .or(ctx.config.run.concurrency)
                    .unwrap_or_else(monorail::execution::runner::default_concurrency),
                bail: ctx.config.run.bail && !no_bail,
                prefix: ctx.config.run.prefix && !no_prefix,
                args,
                echo: true,
            };
            if options.concurrency == 0 {
                anyhow::bail!("--concurrency must be at least 1");
            }

            let client = npm_client.unwrap_or_else(|| ctx.config.workspace.npm_client.clone());
            let profile_dir = if profile {
                Some(ctx.config.profile_dir(&ctx.root, profile_location.as_deref())?)
            } else {
                None
            };

            cmd_run(&ctx, &script, &filter, options, &client, profile_dir.as_deref())
        }
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid log level '{}'", level))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .init();

    Ok(())
}

fn load_workspace(config_path: Option<&Path>) -> Result<WorkspaceContext> {
    let (root, config) = match config_path {
        Some(path) => {
            // Canonicalize config path to get absolute path, then get parent
            let path = std::fs::canonicalize(path)
                .with_context(|| format!("Could not find config file: {}", path.display()))?;
            let root = path
                .parent()
                .map(Path::to_path_buf)
                .context("Config file has no parent directory")?;
            let config = Config::load(&path)
                .with_context(|| format!("Could not load {}", path.display()))?;
            (root, config)
        }
        None => {
            let root = std::env::current_dir()
                .and_then(|dir| dir.canonicalize())
                .context("Could not determine the current directory")?;
            let path = root.join(CONFIG_FILE);
            let config = if path.is_file() {
                Config::load(&path).with_context(|| format!("Could not load {}", path.display()))?
            } else {
                Config::default()
            };
            (root, config)
        }
    };

    let workspace = Workspace::discover(&root, &config.workspace.packages)?;
    info!(
        "Found {} package{} in {}",
        workspace.packages.len(),
        if workspace.packages.len() == 1 { "" } else { "s" },
        root.display()
    );
    let graph = workspace.into_graph()?;

    Ok(WorkspaceContext { root, config, graph })
}

fn change_options(config: &Config, include_merged_tags: bool) -> ChangeOptions {
    ChangeOptions {
        include_merged_tags: include_merged_tags || config.changes.include_merged_tags,
        tag_pattern: config.changes.tag_pattern.clone(),
        ignore_changes: config.changes.ignore.clone(),
    }
}

/// Only computed when the selection depends on history
fn detect_changes(
    ctx: &WorkspaceContext,
    since: Option<&str>,
    include_merged_tags: bool,
) -> Result<ChangeSet> {
    let repo = LocalRepository::discover(&ctx.root)?;
    let options = change_options(&ctx.config, include_merged_tags);
    let detector = ChangeDetector::new(&repo, &ctx.graph, &options)?;
    Ok(detector.detect(since)?)
}

fn cmd_changed(
    ctx: &WorkspaceContext,
    output: &OutputArgs,
    include_merged_tags: bool,
) -> Result<i32> {
    let changes = detect_changes(ctx, None, include_merged_tags)?;
    debug!("Directly changed: {}", changes.changed_names(&ctx.graph).join(", "));

    let spec = FilterSpec {
        private: output.all,
        since: Some(String::new()),
        ..Default::default()
    };
    let selected = spec.apply(&ctx.graph, Some(&changes))?;

    if selected.is_empty() {
        warn!("No changed packages found");
        return Ok(1);
    }

    print!("{}", output::render(output.format(), &ctx.graph, &selected, &ctx.root)?);
    info!(
        "found {} package{} ready to publish",
        selected.len(),
        if selected.len() == 1 { "" } else { "s" }
    );
    Ok(0)
}

fn cmd_list(ctx: &WorkspaceContext, filter: &FilterArgs, output: &OutputArgs) -> Result<i32> {
    let spec = filter.spec(output.all);
    let selected = select(ctx, &spec)?;

    print!("{}", output::render(output.format(), &ctx.graph, &selected, &ctx.root)?);
    info!(
        "found {} package{}",
        selected.len(),
        if selected.len() == 1 { "" } else { "s" }
    );
    Ok(0)
}

fn select<'g>(ctx: &'g WorkspaceContext, spec: &FilterSpec) -> Result<Vec<&'g monorail::Package>> {
    spec.log_notices();

    let changes = match spec.since {
        Some(ref since) => Some(detect_changes(
            ctx,
            Some(since.as_str()),
            spec.include_merged_tags,
        )?),
        None => None,
    };

    Ok(spec.apply(&ctx.graph, changes.as_ref())?)
}

fn cmd_run(
    ctx: &WorkspaceContext,
    script: &str,
    filter: &FilterArgs,
    options: RunOptions,
    client: &str,
    profile_dir: Option<&Path>,
) -> Result<i32> {
    // Private packages take part in runs unless --no-private
    let spec = filter.spec(true);
    let selected: Vec<_> = select(ctx, &spec)?
        .into_iter()
        .filter(|pkg| pkg.has_script(script))
        .collect();

    if selected.is_empty() {
        info!("No packages found with the script '{}'", script);
        return Ok(0);
    }

    let cyclic = ctx.graph.cyclic_packages();
    if !cyclic.is_empty() && options.mode != RunMode::Parallel {
        warn!("Dependency cycles detected between: {}", cyclic.join(", "));
    }

    let runner = Runner::new(Arc::new(NpmClient::new(client)), &ctx.root).with_options(options);
    let report = execute(&runner, &ctx.graph, &selected, script)?;

    if let Some(dir) = profile_dir {
        if report.bailed {
            warn!("Run was aborted, no profile written");
        } else {
            write_profile(&report, dir).context("Failed to write profile")?;
        }
    }

    output::print_summary(&report);

    Ok(report.exit_code())
}

#[tokio::main]
async fn execute(
    runner: &Runner,
    graph: &DependencyGraph,
    packages: &[&monorail::Package],
    script: &str,
) -> Result<monorail::RunReport> {
    Ok(runner.run(graph, packages, script).await)
}

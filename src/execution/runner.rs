//! Script scheduler: topological, streaming and parallel execution with bail

use chrono::Utc;
use colored::Colorize;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::graph::DependencyGraph;
use crate::package::Package;
use crate::task::{RunReport, ScriptOutcome, TaskRun};

use super::client::{OutputLine, OutputStream, ScriptClient, ScriptInvocation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Respect dependency order, print each package's output when it finishes
    #[default]
    Batched,
    /// Respect dependency order, print output lines as they are produced
    Stream,
    /// Ignore dependency order and start everything at once
    Parallel,
}

impl RunMode {
    pub fn is_topological(self) -> bool {
        !matches!(self, RunMode::Parallel)
    }

    pub fn is_streaming(self) -> bool {
        !matches!(self, RunMode::Batched)
    }
}

/// Options for running scripts
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Maximum number of scripts running at once in topological modes
    pub concurrency: usize,
    /// Stop scheduling new packages after the first failure
    pub bail: bool,
    /// Prefix streamed lines with the package name
    pub prefix: bool,
    /// Extra arguments passed to every script
    pub args: Vec<String>,
    /// Write script output to the terminal
    pub echo: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            concurrency: default_concurrency(),
            bail: true,
            prefix: true,
            args: Vec::new(),
            echo: true,
        }
    }
}

pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Lifecycle notifications, in the order the scheduler observed them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Started { package: String },
    Finished { package: String, exit_code: Option<i32> },
}

/// Runs one script across a package selection
pub struct Runner {
    client: Arc<dyn ScriptClient>,
    root: PathBuf,
    options: RunOptions,
    event_tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl Runner {
    pub fn new(client: Arc<dyn ScriptClient>, root: &Path) -> Self {
        Self {
            client,
            root: root.to_path_buf(),
            options: RunOptions::default(),
            event_tx: None,
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the event sender for lifecycle updates
    pub fn with_event_sender(mut self, tx: mpsc::UnboundedSender<RunEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Run `script` in every package of `packages`.
    ///
    /// In topological modes a package starts only once every selected package
    /// it depends on has finished. Each package keeps a counter of unfinished
    /// dependencies; this loop is the only owner of the counters and of the
    /// task runs, workers just report their outcome back to it.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        packages: &[&Package],
        script: &str,
    ) -> RunReport {
        let started = Instant::now();
        let mode = self.options.mode;

        info!(
            "Executing command in {} package{}: {:?}",
            packages.len(),
            if packages.len() == 1 { "" } else { "s" },
            self.client.command_line(script, &self.options.args)
        );

        let mut runs: Vec<TaskRun> = packages
            .iter()
            .map(|p| TaskRun::pending((*p).clone()))
            .collect();
        let (mut waiting_on, dependents) = readiness(graph, packages, mode);

        let limit = if mode.is_topological() {
            self.options.concurrency.max(1)
        } else {
            packages.len().max(1)
        };

        let mut ready: BTreeSet<usize> = (0..packages.len())
            .filter(|&i| waiting_on[i] == 0)
            .collect();
        let mut launched = vec![false; packages.len()];
        let mut join_set: JoinSet<(usize, ScriptOutcome)> = JoinSet::new();
        let mut running = 0usize;
        let mut stop_launching = false;

        loop {
            while !stop_launching && running < limit {
                let next = match ready.pop_first() {
                    Some(i) => i,
                    None if running == 0 => match break_cycle(&launched, &waiting_on) {
                        Some(i) => {
                            warn!(
                                package = %runs[i].name(),
                                "Dependency cycle detected, starting package before its dependencies"
                            );
                            i
                        }
                        None => break,
                    },
                    None => break,
                };

                launched[next] = true;
                running += 1;
                runs[next].start(Utc::now());
                self.emit(RunEvent::Started {
                    package: runs[next].name().to_string(),
                });

                let invocation = ScriptInvocation {
                    package: runs[next].name().to_string(),
                    script: script.to_string(),
                    args: self.options.args.clone(),
                    cwd: runs[next].package.location.clone(),
                    root: self.root.clone(),
                };
                let sink = self.stream_prefix(runs[next].name());
                let job = execute(self.client.clone(), invocation, sink);
                join_set.spawn(async move {
                    let outcome = AssertUnwindSafe(job)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| ScriptOutcome {
                            exit_code: None,
                            stdout: String::new(),
                            stderr: "script client panicked".to_string(),
                        });
                    (next, outcome)
                });
            }

            if running == 0 {
                break;
            }

            let (index, outcome) = match join_set.join_next().await {
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    error!("Task join error: {}", e);
                    running -= 1;
                    continue;
                }
                None => break,
            };
            running -= 1;

            runs[index].finish(outcome, Utc::now());
            let run = &runs[index];
            self.emit(RunEvent::Finished {
                package: run.name().to_string(),
                exit_code: run.exit_code,
            });
            self.report_finished(run, script);

            if run.failed() && self.options.bail && !stop_launching {
                stop_launching = true;
                if launched.iter().any(|l| !l) {
                    warn!("Stopping due to task failure, waiting for running scripts to finish");
                }
            }

            for &dependent in &dependents[index] {
                waiting_on[dependent] = waiting_on[dependent].saturating_sub(1);
                if waiting_on[dependent] == 0 && !launched[dependent] {
                    ready.insert(dependent);
                }
            }
        }

        let bailed = stop_launching && launched.iter().any(|l| !l);

        RunReport {
            script: script.to_string(),
            runs,
            duration: started.elapsed(),
            bailed,
        }
    }

    fn stream_prefix(&self, name: &str) -> StreamSink {
        if !self.options.echo || !self.options.mode.is_streaming() {
            return StreamSink::Quiet;
        }
        if self.options.prefix {
            StreamSink::Prefixed(name.to_string())
        } else {
            StreamSink::Plain
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.event_tx {
            let _ = tx.send(event);
        }
    }

    fn report_finished(&self, run: &TaskRun, script: &str) {
        if self.options.echo && !self.options.mode.is_streaming() {
            print!("{}", run.stdout);
            eprint!("{}", run.stderr);
        }

        if run.failed() {
            match run.exit_code {
                Some(exit_code) => {
                    let failure = Error::TaskExecution {
                        package: run.name().to_string(),
                        exit_code,
                    };
                    error!("{}", failure);
                }
                None => error!("Script '{}' in '{}' was terminated", script, run.name()),
            }
        } else if !self.options.mode.is_streaming() {
            info!(
                "Ran npm script '{}' in '{}' in {:.1}s:",
                script,
                run.name(),
                run.duration_ms as f64 / 1000.0
            );
        }
    }
}

/// Unfinished-dependency counters and reverse edges over the selection.
/// Parallel mode has no edges at all.
fn readiness(
    graph: &DependencyGraph,
    packages: &[&Package],
    mode: RunMode,
) -> (Vec<usize>, Vec<Vec<usize>>) {
    let mut waiting_on = vec![0usize; packages.len()];
    let mut dependents = vec![Vec::new(); packages.len()];

    if !mode.is_topological() {
        return (waiting_on, dependents);
    }

    let position: HashMap<&str, usize> = packages
        .iter()
        .enumerate()
        .map(|(i, p)| (p.name.as_str(), i))
        .collect();

    for (i, package) in packages.iter().enumerate() {
        for dep in graph.dependencies_of(&package.name) {
            if let Some(&j) = position.get(dep) {
                waiting_on[i] += 1;
                dependents[j].push(i);
            }
        }
    }

    (waiting_on, dependents)
}

/// Pick the unlaunched package closest to being ready when nothing can make progress
fn break_cycle(launched: &[bool], waiting_on: &[usize]) -> Option<usize> {
    (0..launched.len())
        .filter(|&i| !launched[i])
        .min_by_key(|&i| (waiting_on[i], i))
}

enum StreamSink {
    Quiet,
    Plain,
    Prefixed(String),
}

impl StreamSink {
    fn write(&self, line: &OutputLine) {
        let text = match self {
            StreamSink::Quiet => return,
            StreamSink::Plain => line.line.clone(),
            StreamSink::Prefixed(name) => format!("{}: {}", name.cyan(), line.line),
        };
        match line.stream {
            OutputStream::Stdout => println!("{}", text),
            OutputStream::Stderr => eprintln!("{}", text),
        }
    }
}

/// Run one package's script, capturing its output and streaming it if asked
async fn execute(
    client: Arc<dyn ScriptClient>,
    invocation: ScriptInvocation,
    sink: StreamSink,
) -> ScriptOutcome {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();

    let collect = async {
        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(line) = rx.recv().await {
            sink.write(&line);
            let buffer = match line.stream {
                OutputStream::Stdout => &mut stdout,
                OutputStream::Stderr => &mut stderr,
            };
            buffer.push_str(&line.line);
            buffer.push('\n');
        }
        (stdout, stderr)
    };

    let (result, (stdout, mut stderr)) = tokio::join!(client.run_script(invocation, tx), collect);

    match result {
        Ok(exit_code) => ScriptOutcome {
            exit_code,
            stdout,
            stderr,
        },
        Err(e) => {
            stderr.push_str(&e.to_string());
            ScriptOutcome {
                exit_code: None,
                stdout,
                stderr,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::graph::fixtures::create_test_graph;
    use crate::task::TaskStatus;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Scripted client: prints the package name, fails for listed packages
    #[derive(Default)]
    struct FakeClient {
        failing: HashSet<String>,
        delay_ms: u64,
        active: AtomicUsize,
        peak: AtomicUsize,
        seen_args: Mutex<Vec<Vec<String>>>,
    }

    impl FakeClient {
        fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ScriptClient for FakeClient {
        fn command_line(&self, script: &str, args: &[String]) -> String {
            format!("fake run {} {}", script, args.join(" "))
        }

        async fn run_script(
            &self,
            invocation: ScriptInvocation,
            output: mpsc::UnboundedSender<OutputLine>,
        ) -> Result<Option<i32>> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen_args.lock().unwrap().push(invocation.args.clone());

            let _ = output.send(OutputLine {
                stream: OutputStream::Stdout,
                line: format!("test-{}", invocation.package),
            });
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }

            self.active.fetch_sub(1, Ordering::SeqCst);
            if self.failing.contains(&invocation.package) {
                Ok(Some(100))
            } else {
                Ok(Some(0))
            }
        }
    }

    fn quiet(mode: RunMode) -> RunOptions {
        RunOptions {
            mode,
            concurrency: 4,
            echo: false,
            ..Default::default()
        }
    }

    fn all_packages(graph: &DependencyGraph) -> Vec<&Package> {
        graph.packages().iter().collect()
    }

    async fn run_with_events(
        client: FakeClient,
        options: RunOptions,
        graph: &DependencyGraph,
    ) -> (RunReport, Vec<RunEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let runner = Runner::new(Arc::new(client), Path::new("/ws"))
            .with_options(options)
            .with_event_sender(tx);
        let report = runner.run(graph, &all_packages(graph), "print-name").await;
        drop(runner);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        (report, events)
    }

    fn position(events: &[RunEvent], wanted: &RunEvent) -> usize {
        events.iter().position(|e| e == wanted).unwrap()
    }

    fn started(name: &str) -> RunEvent {
        RunEvent::Started {
            package: name.to_string(),
        }
    }

    fn finished(name: &str, code: i32) -> RunEvent {
        RunEvent::Finished {
            package: name.to_string(),
            exit_code: Some(code),
        }
    }

    #[tokio::test]
    async fn test_dependencies_finish_before_dependents_start() {
        let graph = create_test_graph();

        for mode in [RunMode::Batched, RunMode::Stream] {
            let client = FakeClient {
                delay_ms: 5,
                ..Default::default()
            };
            let (report, events) = run_with_events(client, quiet(mode), &graph).await;
            assert!(report.is_success());
            assert_eq!(report.runs.len(), 5);

            for package in graph.packages() {
                for dep in graph.dependencies_of(&package.name) {
                    let dep_finished = position(&events, &finished(dep, 0));
                    assert!(
                        dep_finished < position(&events, &started(&package.name)),
                        "{} started before {} finished",
                        package.name,
                        dep
                    );
                }
            }
        }
    }

    #[tokio::test]
    async fn test_output_is_captured_per_package() {
        let graph = create_test_graph();
        let (report, _) =
            run_with_events(FakeClient::default(), quiet(RunMode::Batched), &graph).await;

        let names: Vec<&str> = report.runs.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["package-a", "package-d", "package-e", "package-b", "package-c"]);
        for run in &report.runs {
            assert_eq!(run.stdout, format!("test-{}\n", run.name()));
            assert_eq!(run.status, TaskStatus::Succeeded);
            assert!(run.started_at.is_some() && run.finished_at.is_some());
        }
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let graph = DependencyGraph::build(
            (0..8)
                .map(|i| Package::new(format!("p{}", i), "1.0.0", format!("/ws/p{}", i)))
                .collect(),
        )
        .unwrap();
        let client = Arc::new(FakeClient {
            delay_ms: 20,
            ..Default::default()
        });
        let runner = Runner::new(client.clone(), Path::new("/ws")).with_options(RunOptions {
            concurrency: 2,
            ..quiet(RunMode::Batched)
        });

        let report = runner.run(&graph, &all_packages(&graph), "build").await;
        assert_eq!(report.succeeded(), 8);
        assert!(client.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_parallel_ignores_order_and_limit() {
        let graph = create_test_graph();
        let client = Arc::new(FakeClient {
            delay_ms: 30,
            ..Default::default()
        });
        let runner = Runner::new(client.clone(), Path::new("/ws")).with_options(RunOptions {
            concurrency: 1,
            ..quiet(RunMode::Parallel)
        });

        let report = runner.run(&graph, &all_packages(&graph), "build").await;
        assert_eq!(report.succeeded(), 5);
        assert_eq!(client.peak.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_bail_stops_launching() {
        let graph = create_test_graph();
        let options = RunOptions {
            concurrency: 1,
            ..quiet(RunMode::Batched)
        };

        // package-d runs first (package-a waits on it) and fails
        let (report, events) =
            run_with_events(FakeClient::failing(&["package-d"]), options, &graph).await;

        assert!(report.bailed);
        assert!(!report.is_success());
        assert_eq!(report.failed(), 1);
        assert_eq!(report.exit_code(), 100);
        assert!(report.pending() > 0);
        assert!(!events.contains(&started("package-a")));
        assert_eq!(report.runs.len(), 5);
    }

    #[tokio::test]
    async fn test_bail_keeps_completed_successes() {
        let graph = create_test_graph();
        let options = RunOptions {
            concurrency: 1,
            ..quiet(RunMode::Batched)
        };

        let (report, _) =
            run_with_events(FakeClient::failing(&["package-b"]), options, &graph).await;

        // d, e and c complete before b is reached
        assert_eq!(report.failed(), 1);
        assert!(report.succeeded() >= 3);
        assert!(report.runs.iter().any(|r| r.name() == "package-c" && r.succeeded()));
    }

    #[tokio::test]
    async fn test_no_bail_runs_everything() {
        let graph = create_test_graph();
        let options = RunOptions {
            bail: false,
            concurrency: 1,
            ..quiet(RunMode::Batched)
        };

        let client = FakeClient::failing(&["package-d", "package-c"]);
        let (report, events) = run_with_events(client, options, &graph).await;

        assert!(!report.bailed);
        assert_eq!(report.pending(), 0);
        assert_eq!(report.runs.len(), 5);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(events.len(), 10);
    }

    #[tokio::test]
    async fn test_cycle_does_not_deadlock() {
        let graph = DependencyGraph::build(vec![
            Package::new("x", "1.0.0", "/ws/x").with_dependencies(["y"]),
            Package::new("y", "1.0.0", "/ws/y").with_dependencies(["x"]),
            Package::new("z", "1.0.0", "/ws/z").with_dependencies(["y"]),
        ])
        .unwrap();

        let (report, events) =
            run_with_events(FakeClient::default(), quiet(RunMode::Batched), &graph).await;
        assert_eq!(report.succeeded(), 3);
        assert!(position(&events, &finished("y", 0)) < position(&events, &started("z")));
    }

    #[tokio::test]
    async fn test_args_are_forwarded() {
        let graph = create_test_graph();
        let client = Arc::new(FakeClient::default());
        let runner = Runner::new(client.clone(), Path::new("/ws")).with_options(RunOptions {
            args: vec!["--silent".to_string()],
            ..quiet(RunMode::Stream)
        });

        let packages = vec![graph.get("package-e").unwrap()];
        runner.run(&graph, &packages, "print-name").await;

        assert_eq!(*client.seen_args.lock().unwrap(), vec![vec!["--silent".to_string()]]);
    }
}

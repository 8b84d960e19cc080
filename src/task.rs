//! Task run records for reporting

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::package::Package;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

/// Execution of one package script
#[derive(Debug, Clone)]
pub struct TaskRun {
    pub package: Package,
    pub status: TaskStatus,
    /// `None` until the process exits, and when it was killed by a signal
    pub exit_code: Option<i32>,
    pub duration_ms: u128,
    pub stdout: String,
    pub stderr: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRun {
    pub fn pending(package: Package) -> Self {
        Self {
            package,
            status: TaskStatus::Pending,
            exit_code: None,
            duration_ms: 0,
            stdout: String::new(),
            stderr: String::new(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.package.name
    }

    pub fn start(&mut self, at: DateTime<Utc>) {
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Running;
            self.started_at = Some(at);
        }
    }

    /// Record the outcome. Terminal runs are never changed again.
    pub fn finish(&mut self, outcome: ScriptOutcome, at: DateTime<Utc>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = if outcome.exit_code == Some(0) {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        self.exit_code = outcome.exit_code;
        self.stdout = outcome.stdout;
        self.stderr = outcome.stderr;
        self.finished_at = Some(at);
        self.duration_ms = match self.started_at {
            Some(start) => (at - start).num_milliseconds().max(0) as u128,
            None => 0,
        };
    }

    pub fn succeeded(&self) -> bool {
        self.status == TaskStatus::Succeeded
    }

    pub fn failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }
}

/// What a script client reports once the process has exited
#[derive(Debug, Clone, Default)]
pub struct ScriptOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Result of a whole run, in selection order
#[derive(Debug, Clone)]
pub struct RunReport {
    pub script: String,
    pub runs: Vec<TaskRun>,
    pub duration: Duration,
    /// A failure with bail enabled left packages unscheduled
    pub bailed: bool,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.runs.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.runs.iter().filter(|r| r.failed()).count()
    }

    pub fn pending(&self) -> usize {
        self.runs
            .iter()
            .filter(|r| r.status == TaskStatus::Pending)
            .count()
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// Exit code the command should end with: the first failing script's
    /// code, or 1 when it died without one.
    pub fn exit_code(&self) -> i32 {
        self.runs
            .iter()
            .find(|r| r.failed())
            .map(|r| r.exit_code.filter(|&c| c != 0).unwrap_or(1))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn outcome(code: Option<i32>) -> ScriptOutcome {
        ScriptOutcome {
            exit_code: code,
            stdout: "out".to_string(),
            stderr: String::new(),
        }
    }

    #[test]
    fn test_lifecycle() {
        let mut run = TaskRun::pending(Package::new("pkg", "1.0.0", "/ws/pkg"));
        let start = Utc::now();
        run.start(start);
        assert_eq!(run.status, TaskStatus::Running);

        run.finish(outcome(Some(0)), start + ChronoDuration::milliseconds(250));
        assert!(run.succeeded());
        assert_eq!(run.duration_ms, 250);
        assert_eq!(run.stdout, "out");

        // Terminal runs are immutable
        run.finish(outcome(Some(2)), start + ChronoDuration::seconds(5));
        assert!(run.succeeded());
        assert_eq!(run.exit_code, Some(0));
    }

    #[test]
    fn test_report_exit_code() {
        let now = Utc::now();
        let mut ok = TaskRun::pending(Package::new("a", "1.0.0", "/ws/a"));
        ok.start(now);
        ok.finish(outcome(Some(0)), now);
        let mut bad = TaskRun::pending(Package::new("b", "1.0.0", "/ws/b"));
        bad.start(now);
        bad.finish(outcome(Some(100)), now);
        let mut killed = TaskRun::pending(Package::new("c", "1.0.0", "/ws/c"));
        killed.start(now);
        killed.finish(outcome(None), now);

        let report = RunReport {
            script: "build".to_string(),
            runs: vec![ok, bad, killed],
            duration: Duration::from_millis(10),
            bailed: false,
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.exit_code(), 100);
        assert!(!report.is_success());
    }
}

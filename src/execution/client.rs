//! Package-manager clients that run a named script in a package

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::error::Result;

pub const PACKAGE_NAME_ENV: &str = "MONORAIL_PACKAGE_NAME";
pub const ROOT_PATH_ENV: &str = "MONORAIL_ROOT_PATH";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of script output, without its trailing newline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub line: String,
}

/// Everything needed to run one package's script
#[derive(Debug, Clone)]
pub struct ScriptInvocation {
    pub package: String,
    pub script: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub root: PathBuf,
}

/// Runs scripts on behalf of the scheduler.
///
/// Implementations forward every output line to `output` as it is produced
/// and return the exit code, `None` when the process died from a signal.
#[async_trait]
pub trait ScriptClient: Send + Sync {
    /// Human-readable command, e.g. `npm run build --silent`
    fn command_line(&self, script: &str, args: &[String]) -> String;

    async fn run_script(
        &self,
        invocation: ScriptInvocation,
        output: UnboundedSender<OutputLine>,
    ) -> Result<Option<i32>>;
}

/// npm-compatible client: `npm`, `yarn`, `pnpm` or any binary that
/// understands `<client> run <script> [args..]`
#[derive(Debug, Clone)]
pub struct NpmClient {
    program: String,
}

impl NpmClient {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NpmClient {
    fn default() -> Self {
        Self::new("npm")
    }
}

#[async_trait]
impl ScriptClient for NpmClient {
    fn command_line(&self, script: &str, args: &[String]) -> String {
        let mut parts = vec![self.program.clone(), "run".to_string(), script.to_string()];
        parts.extend(args.iter().cloned());
        parts.join(" ")
    }

    async fn run_script(
        &self,
        invocation: ScriptInvocation,
        output: UnboundedSender<OutputLine>,
    ) -> Result<Option<i32>> {
        let mut child = Command::new(&self.program)
            .arg("run")
            .arg(&invocation.script)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .env(PACKAGE_NAME_ENV, &invocation.package)
            .env(ROOT_PATH_ENV, &invocation.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (_, _, status) = tokio::join!(
            forward_lines(stdout, OutputStream::Stdout, &output),
            forward_lines(stderr, OutputStream::Stderr, &output),
            child.wait()
        );

        Ok(status?.code())
    }
}

/// Forward `reader` line by line until EOF. Bytes that are not UTF-8 are
/// replaced, and the pipe is always drained so the child never sees EPIPE.
async fn forward_lines<R>(
    reader: Option<R>,
    stream: OutputStream,
    output: &UnboundedSender<OutputLine>,
) where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return;
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return,
            Ok(_) => {
                if buf.ends_with(b"\n") {
                    buf.pop();
                    if buf.ends_with(b"\r") {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                // The receiver only goes away when the run is being torn down
                let _ = output.send(OutputLine { stream, line });
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("Failed to read script output: {}", e);
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let client = NpmClient::new("yarn");
        assert_eq!(client.command_line("print-name", &[]), "yarn run print-name");

        let client = NpmClient::default();
        assert_eq!(
            client.command_line("print-name", &["--silent".to_string()]),
            "npm run print-name --silent"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_streams_lines_and_exit_code() {
        use std::fs;
        use tempfile::tempdir;

        // `sh run <script>` executes ./run, standing in for a package manager
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("run"),
            "echo \"running $1 in $MONORAIL_PACKAGE_NAME\"\necho oops >&2\nexit 3\n",
        )
        .unwrap();

        let client = NpmClient::new("sh");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let code = client
            .run_script(
                ScriptInvocation {
                    package: "pkg".to_string(),
                    script: "build".to_string(),
                    args: vec![],
                    cwd: dir.path().to_path_buf(),
                    root: dir.path().to_path_buf(),
                },
                tx,
            )
            .await
            .unwrap();

        assert_eq!(code, Some(3));

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        assert!(lines.contains(&OutputLine {
            stream: OutputStream::Stdout,
            line: "running build in pkg".to_string(),
        }));
        assert!(lines.contains(&OutputLine {
            stream: OutputStream::Stderr,
            line: "oops".to_string(),
        }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_output_does_not_kill_script() {
        use std::fs;
        use tempfile::tempdir;

        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("run"),
            "printf 'caf\\351\\n'\nsleep 0.2\necho after\ntouch finished\nexit 0\n",
        )
        .unwrap();

        let client = NpmClient::new("sh");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let code = client
            .run_script(
                ScriptInvocation {
                    package: "pkg".to_string(),
                    script: "build".to_string(),
                    args: vec![],
                    cwd: dir.path().to_path_buf(),
                    root: dir.path().to_path_buf(),
                },
                tx,
            )
            .await
            .unwrap();

        assert_eq!(code, Some(0));
        assert!(dir.path().join("finished").exists());

        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line.line);
        }
        assert_eq!(lines, vec!["caf\u{FFFD}".to_string(), "after".to_string()]);
    }
}

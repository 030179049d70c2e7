/// Bounded execution
///
/// Every external step of an evaluation (git, archive extraction, image
/// build, the sandboxed run) gets a deadline. Subprocesses are stopped in
/// two steps: SIGTERM, then SIGKILL once the grace period is over.
use std::future::Future;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::logs::{LogBuffer, DEFAULT_LOG_CAP};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundedOutcome<T> {
    Exited(T),
    TimedOut,
}

impl<T> BoundedOutcome<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self, BoundedOutcome::TimedOut)
    }
}

/// Run a future with a deadline; the future is dropped when it expires
pub async fn with_deadline<F: Future>(deadline: Duration, fut: F) -> BoundedOutcome<F::Output> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(output) => BoundedOutcome::Exited(output),
        Err(_) => BoundedOutcome::TimedOut,
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Short human readable failure description
    pub fn describe_failure(&self, program: &str) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.status.code() {
            Some(code) => format!("`{}` exited with code {}: {}", program, code, detail),
            None => format!("`{}` was terminated by a signal: {}", program, detail),
        }
    }
}

fn drain<R>(reader: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut logs = LogBuffer::new(DEFAULT_LOG_CAP);
        if let Some(mut reader) = reader {
            let mut chunk = [0u8; 8192];
            loop {
                match reader.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => logs.push_bytes(&chunk[..n]),
                }
            }
        }
        logs.into_string()
    })
}

#[cfg(unix)]
fn terminate(child: &mut Child) {
    if let Some(pid) = child.id() {
        // SAFETY: plain signal delivery to a pid we spawned and still own.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}

/// Spawn `cmd` and wait for it for at most `timeout`
///
/// stdout and stderr are captured (capped). On timeout the child receives
/// SIGTERM, gets `grace` to exit and is then killed. Spawn failures are the
/// only errors; a timeout is an ordinary outcome.
pub async fn run_bounded_command(
    mut cmd: Command,
    timeout: Duration,
    grace: Duration,
) -> io::Result<BoundedOutcome<CommandOutput>> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    match with_deadline(timeout, child.wait()).await {
        BoundedOutcome::Exited(status) => {
            let status = status?;
            Ok(BoundedOutcome::Exited(CommandOutput {
                status,
                stdout: stdout.await.unwrap_or_default(),
                stderr: stderr.await.unwrap_or_default(),
            }))
        }
        BoundedOutcome::TimedOut => {
            terminate(&mut child);

            if with_deadline(grace, child.wait()).await.timed_out() {
                tracing::warn!(grace_secs = grace.as_secs(), "Process ignored SIGTERM, killing");
                child.kill().await?;
            }
            stdout.abort();
            stderr.abort();
            Ok(BoundedOutcome::TimedOut)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[tokio::test]
    async fn test_exited_captures_output_and_status() {
        let outcome = run_bounded_command(
            sh("echo hello; echo oops >&2; exit 3"),
            Duration::from_secs(10),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        match outcome {
            BoundedOutcome::Exited(output) => {
                assert_eq!(output.status.code(), Some(3));
                assert_eq!(output.stdout, "hello\n");
                assert_eq!(output.stderr, "oops\n");
                assert!(output.describe_failure("sh").contains("exited with code 3: oops"));
            }
            BoundedOutcome::TimedOut => panic!("command should have exited"),
        }
    }

    #[tokio::test]
    async fn test_timeout_terminates_child() {
        let started = Instant::now();
        let outcome = run_bounded_command(
            sh("sleep 30"),
            Duration::from_millis(100),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(outcome.timed_out());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_kill() {
        let started = Instant::now();
        let outcome = run_bounded_command(
            sh("trap '' TERM; sleep 30"),
            Duration::from_millis(100),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        assert!(outcome.timed_out());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let cmd = Command::new("/nonexistent/evalforge-binary");
        let err = run_bounded_command(cmd, Duration::from_secs(1), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_with_deadline() {
        let quick = with_deadline(Duration::from_secs(1), async { 7 }).await;
        assert_eq!(quick, BoundedOutcome::Exited(7));

        let slow = with_deadline(
            Duration::from_millis(20),
            tokio::time::sleep(Duration::from_secs(5)),
        )
        .await;
        assert!(slow.timed_out());
    }
}

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::CommandLine;
use crate::config::IssuerSettings;
use crate::fs_util;
use crate::lock::PairLock;
use crate::request::CertificatePaths;

const STDERR_TAIL_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("failed to spawn issuing tool '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("issuing tool exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },
    #[error("issuing tool timed out after {0} seconds")]
    TimedOut(u64),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug)]
pub struct IssueOutcome {
    pub status: ExitStatus,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
}

#[derive(Debug, Default)]
pub struct CapturedOutput {
    pub text: String,
    pub bytes: usize,
    pub truncated: bool,
}

/// Runs the issuing tool once under the pair's lock, then fixes file modes.
///
/// The command runs with the ambient environment. A non-zero exit is
/// returned as [`IssueError::Failed`] and is never retried here.
///
/// # Errors
/// Returns an error if the tool cannot be spawned, exits non-zero, times
/// out, or does not leave both files behind.
pub async fn issue_now(
    cmd: &CommandLine,
    paths: &CertificatePaths,
    issuer: &IssuerSettings,
) -> Result<IssueOutcome, IssueError> {
    if let Some(dir) = paths.cert.parent() {
        fs_util::ensure_output_dir(dir).await?;
    }
    let _lock = PairLock::acquire(&paths.lock).await?;

    info!("Issuing certificate: {cmd}");
    let outcome = run_command(cmd, issuer).await?;
    if !outcome.status.success() {
        return Err(IssueError::Failed {
            status: outcome.status,
            stderr: stderr_tail(&outcome.stderr.text),
        });
    }

    fs_util::enforce_pair_permissions(&paths.cert, &paths.key).await?;
    info!(
        "Certificate written to {} (key {})",
        paths.cert.display(),
        paths.key.display()
    );
    Ok(outcome)
}

async fn run_command(
    cmd: &CommandLine,
    issuer: &IssuerSettings,
) -> Result<IssueOutcome, IssueError> {
    let mut command = Command::new(cmd.program());
    command
        .args(cmd.args())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|source| IssueError::Spawn {
        program: cmd.program().to_string(),
        source,
    })?;

    let stdout_handle = tokio::spawn(read_stream_limited(
        child.stdout.take(),
        issuer.max_output_bytes,
    ));
    let stderr_handle = tokio::spawn(read_stream_limited(
        child.stderr.take(),
        issuer.max_output_bytes,
    ));

    let timeout = Duration::from_secs(issuer.timeout_secs);
    let Ok(status) = tokio::time::timeout(timeout, child.wait()).await else {
        child
            .kill()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to kill timed out issuing tool: {e}"))?;
        let _ = child.wait().await;
        let _ = stdout_handle.await;
        let _ = stderr_handle.await;
        return Err(IssueError::TimedOut(issuer.timeout_secs));
    };
    let status = status.map_err(|e| anyhow::anyhow!("Issuing tool wait failed: {e}"))?;

    let stdout = stdout_handle
        .await
        .map_err(|e| anyhow::anyhow!("Issuing tool stdout task failed: {e}"))??;
    let stderr = stderr_handle
        .await
        .map_err(|e| anyhow::anyhow!("Issuing tool stderr task failed: {e}"))??;
    log_output("stdout", &stdout);
    log_output("stderr", &stderr);

    Ok(IssueOutcome {
        status,
        stdout,
        stderr,
    })
}

fn log_output(label: &str, output: &CapturedOutput) {
    if !output.text.trim().is_empty() || output.truncated {
        debug!(
            "Issuing tool {label} (bytes={}, truncated={}): {}",
            output.bytes,
            output.truncated,
            output.text.trim()
        );
    }
}

fn stderr_tail(text: &str) -> String {
    let trimmed = text.trim();
    let count = trimmed.chars().count();
    if count <= STDERR_TAIL_CHARS {
        return trimmed.to_string();
    }
    let tail: String = trimmed.chars().skip(count - STDERR_TAIL_CHARS).collect();
    format!("...{tail}")
}

async fn read_stream_limited<R>(
    stream: Option<R>,
    max_output_bytes: Option<u64>,
) -> anyhow::Result<CapturedOutput>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(CapturedOutput::default());
    };

    let max_bytes = max_output_bytes.map_or(usize::MAX, |value| {
        usize::try_from(value).unwrap_or(usize::MAX)
    });
    let mut buf = Vec::new();
    let mut total = 0usize;
    let mut truncated = false;
    let mut chunk = [0u8; 4096];

    // Keep draining past the limit so the child never blocks on a full pipe.
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read issuing tool output: {e}"))?;
        if read == 0 {
            break;
        }
        total = total.saturating_add(read);
        let remaining = max_bytes.saturating_sub(buf.len());
        let to_copy = read.min(remaining);
        buf.extend_from_slice(&chunk[..to_copy]);
        if to_copy < read {
            truncated = true;
        }
    }

    Ok(CapturedOutput {
        text: String::from_utf8_lossy(&buf).to_string(),
        bytes: total,
        truncated,
    })
}

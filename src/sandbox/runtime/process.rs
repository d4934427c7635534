use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;

use super::{ContainerRuntime, OutputBuffer, RunOutput, RunSpec};
use crate::errors::SandboxError;

/// Runs each script as a local `sh -c` in its own process group.
///
/// Meant for development hosts without Docker. Only the wall-clock limit is
/// enforced; there is no network, memory or CPU isolation.
#[derive(Debug, Default)]
pub struct ProcessRuntime;

impl ProcessRuntime {
    pub fn new() -> Self {
        tracing::warn!("Using the process sandbox runtime: generated code runs unisolated on this host");
        Self
    }
}

#[async_trait]
impl ContainerRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, spec: &RunSpec) -> Result<RunOutput, SandboxError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(&spec.script)
            .current_dir(&spec.workspace)
            .env("HOME", &spec.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::Launch(format!("failed to spawn sh: {}", e)))?;
        let pgid = child.id();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            tokio::try_join!(
                child.wait(),
                read_capped(stdout, spec.max_output_bytes),
                read_capped(stderr, spec.max_output_bytes),
            )
        };
        let waited = tokio::time::timeout(spec.timeout, collect).await;
        // Sweep anything the script left running in the background.
        kill_group(pgid);

        match waited {
            Ok(Ok((status, stdout, stderr))) => Ok(RunOutput {
                exit_code: exit_code(&status),
                stdout: stdout.into_string(),
                stderr: stderr.into_string(),
            }),
            Ok(Err(e)) => Err(SandboxError::Runtime(format!("failed to wait for sh: {}", e))),
            Err(_) => {
                tracing::warn!(
                    task_id = %spec.task_id,
                    timeout_secs = spec.timeout.as_secs(),
                    "Sandbox timed out, killed process group"
                );
                Err(SandboxError::TimedOut {
                    secs: spec.timeout.as_secs(),
                })
            }
        }
    }
}

/// Drain `reader` to EOF, keeping at most `max` bytes.
async fn read_capped<R>(reader: Option<R>, max: usize) -> std::io::Result<OutputBuffer>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = OutputBuffer::new(max);
    let Some(mut reader) = reader else {
        return Ok(buffer);
    };
    let mut chunk = vec![0u8; 8 * 1024];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buffer);
        }
        buffer.push(&chunk[..n]);
    }
}

/// Exit code, or `128 + signal` for a process killed by a signal.
fn exit_code(status: &std::process::ExitStatus) -> i64 {
    if let Some(code) = status.code() {
        return i64::from(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + i64::from(signal);
        }
    }
    -1
}

#[cfg(unix)]
fn kill_group(pgid: Option<u32>) {
    let Some(pgid) = pgid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    // SAFETY: killpg only sends a signal; ESRCH (group already gone) is expected.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: Option<u32>) {}

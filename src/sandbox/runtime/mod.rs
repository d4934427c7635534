//! Compute units the sandbox can launch.
//!
//! A runtime receives a prepared workspace and a shell script, runs the
//! script inside some isolated unit, and is responsible for hard-killing that
//! unit when the wall-clock limit expires.

mod docker;
mod process;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::SandboxError;

pub use docker::DockerRuntime;
pub use process::ProcessRuntime;

/// Resource ceilings applied to each unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceLimits {
    pub memory_bytes: u64,
    pub cpus: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: 2 * 1024 * 1024 * 1024,
            cpus: 2.0,
        }
    }
}

/// Everything a runtime needs for one run.
#[derive(Debug, Clone)]
pub struct RunSpec {
    pub task_id: String,
    /// Absolute host path of the materialized workspace.
    pub workspace: PathBuf,
    pub script: String,
    pub timeout: Duration,
    pub limits: ResourceLimits,
    /// Bytes kept per stream; the rest is counted and dropped while reading.
    pub max_output_bytes: usize,
}

/// Raw output of a unit that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Collects one output stream without holding more than `max` bytes.
#[derive(Debug)]
pub struct OutputBuffer {
    max: usize,
    kept: Vec<u8>,
    dropped: u64,
}

impl OutputBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            kept: Vec::with_capacity(max.min(64 * 1024)),
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let room = self.max.saturating_sub(self.kept.len());
        let take = room.min(chunk.len());
        self.kept.extend_from_slice(&chunk[..take]);
        self.dropped += (chunk.len() - take) as u64;
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Lossy UTF-8 text. A cut stream ends on a char boundary followed by a
    /// `[truncated N bytes]` marker.
    pub fn into_string(self) -> String {
        let Self {
            mut kept,
            mut dropped,
            ..
        } = self;
        if dropped > 0
            && let Err(e) = std::str::from_utf8(&kept)
            && e.error_len().is_none()
        {
            dropped += (kept.len() - e.valid_up_to()) as u64;
            kept.truncate(e.valid_up_to());
        }
        let mut text = String::from_utf8_lossy(&kept).into_owned();
        if dropped > 0 {
            text.push_str(&format!("\n... [truncated {} bytes]", dropped));
        }
        text
    }
}

/// Abstraction over the compute unit for testability.
/// Real implementations: `DockerRuntime`, `ProcessRuntime`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `spec.script` in `spec.workspace`.
    ///
    /// Returns `Ok` whenever the script produced an exit code, including
    /// nonzero ones. Each stream is capped at `spec.max_output_bytes` as it
    /// is read. Launch failures, runtime API errors and timeouts are
    /// `Err`; on timeout the unit must already be terminated.
    async fn run(&self, spec: &RunSpec) -> Result<RunOutput, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_kept_whole() {
        let mut buffer = OutputBuffer::new(16);
        buffer.push(b"hello ");
        buffer.push(b"world");
        assert_eq!(buffer.dropped(), 0);
        assert_eq!(buffer.into_string(), "hello world");
    }

    #[test]
    fn overflow_is_counted_not_stored() {
        let mut buffer = OutputBuffer::new(4);
        for _ in 0..1000 {
            buffer.push(b"xxxxxxxxxx");
        }
        assert_eq!(buffer.kept.len(), 4);
        assert_eq!(buffer.dropped(), 9996);
        assert_eq!(buffer.into_string(), "xxxx\n... [truncated 9996 bytes]");
    }

    #[test]
    fn cut_lands_on_a_char_boundary() {
        let mut buffer = OutputBuffer::new(3);
        buffer.push("ééé".as_bytes());
        let text = buffer.into_string();
        assert!(text.starts_with('é'));
        assert!(text.ends_with("[truncated 4 bytes]"));
    }
}

// Copyright 2024-2025 Golem Cloud
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with status {code:?}: {stderr}")]
    NonZero {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

impl ProcessError {
    /// Timeouts and non-zero exits may be server-side hiccups; a failed
    /// spawn means the binary is missing and will not get better.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ProcessError::NonZero { .. } | ProcessError::Timeout { .. }
        )
    }
}

/// Runs an external command to completion with a hard timeout, returning its
/// captured stdout. The child is killed if the timeout elapses.
pub async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<String, ProcessError> {
    debug!(program, ?args, "running external command");

    let result = tokio::time::timeout(
        timeout,
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ProcessError::Timeout {
        program: program.to_string(),
        timeout,
    })?;

    let output = result.map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    if !output.status.success() {
        return Err(ProcessError::NonZero {
            program: program.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    async fn captures_stdout_of_a_successful_command() {
        let stdout = run("echo", &["hello".to_string()], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(stdout.trim(), "hello");
    }

    #[test]
    async fn missing_binary_is_not_retriable() {
        let err = run("felix-no-such-binary", &[], Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    async fn nonzero_exit_carries_stderr_and_is_retriable() {
        let err = run(
            "sh",
            &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match &err {
            ProcessError::NonZero { code, stderr, .. } => {
                assert_eq!(*code, Some(3));
                assert_eq!(stderr, "oops");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.is_retriable());
    }

    #[test]
    async fn timeout_kills_the_child() {
        let err = run(
            "sleep",
            &["5".to_string()],
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Timeout { .. }));
        assert!(err.is_retriable());
    }
}

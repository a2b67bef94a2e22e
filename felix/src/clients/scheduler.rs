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

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::clients::process::{self, ProcessError};
use crate::config::OrchestratorConfig;
use crate::model::NodeState;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("cannot find a node state in scontrol output for {hostname}")]
    MissingState { hostname: String },
}

impl SchedulerError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, SchedulerError::Process(process) if process.is_retriable())
    }
}

/// Workload-manager collaborator. `node_state` is the only read; the `set_*`
/// operations are mutating.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    async fn node_state(&self, hostname: &str) -> Result<NodeState, SchedulerError>;

    async fn set_drain(&self, hostname: &str, reason: &str) -> Result<(), SchedulerError>;

    async fn set_resume(&self, hostname: &str) -> Result<(), SchedulerError>;

    async fn set_down(&self, hostname: &str, reason: &str) -> Result<(), SchedulerError>;
}

/// Live implementation wrapping `scontrol`.
pub struct ScontrolScheduler {
    scontrol: String,
    timeout: Duration,
}

impl ScontrolScheduler {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            scontrol: config.scontrol.clone(),
            timeout: config.call_timeout(),
        }
    }

    async fn update(&self, hostname: &str, args: Vec<String>) -> Result<(), SchedulerError> {
        let mut full = vec![
            "update".to_string(),
            format!("NodeName={hostname}"),
        ];
        full.extend(args);
        process::run(&self.scontrol, &full, self.timeout).await?;
        Ok(())
    }
}

#[async_trait]
impl SchedulerClient for ScontrolScheduler {
    async fn node_state(&self, hostname: &str) -> Result<NodeState, SchedulerError> {
        let stdout = process::run(
            &self.scontrol,
            &[
                "show".to_string(),
                "node".to_string(),
                "-o".to_string(),
                hostname.to_string(),
            ],
            self.timeout,
        )
        .await?;
        parse_node_state(hostname, &stdout)
    }

    async fn set_drain(&self, hostname: &str, reason: &str) -> Result<(), SchedulerError> {
        info!(hostname, reason, "draining node");
        self.update(
            hostname,
            vec!["State=DRAIN".to_string(), format!("Reason={reason}")],
        )
        .await
    }

    async fn set_resume(&self, hostname: &str) -> Result<(), SchedulerError> {
        info!(hostname, "resuming node");
        self.update(hostname, vec!["State=RESUME".to_string()])
            .await
    }

    async fn set_down(&self, hostname: &str, reason: &str) -> Result<(), SchedulerError> {
        info!(hostname, reason, "marking node down");
        self.update(
            hostname,
            vec!["State=DOWN".to_string(), format!("Reason={reason}")],
        )
        .await
    }
}

/// Picks the `State=` token out of one-line `scontrol show node -o` output.
fn parse_node_state(hostname: &str, stdout: &str) -> Result<NodeState, SchedulerError> {
    stdout
        .split_whitespace()
        .find_map(|token| token.strip_prefix("State="))
        .map(NodeState::parse)
        .ok_or_else(|| SchedulerError::MissingState {
            hostname: hostname.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn parses_the_state_token_from_show_node_output() {
        let line = "NodeName=GPU-332 Arch=x86_64 CoresPerSocket=56 \
                    State=IDLE+DRAIN ThreadsPerCore=1 TmpDisk=0 Weight=1";
        assert_eq!(
            parse_node_state("GPU-332", line).unwrap(),
            NodeState::Drained
        );

        let line = "NodeName=GPU-007 State=ALLOCATED* Partitions=hpc";
        assert_eq!(
            parse_node_state("GPU-007", line).unwrap(),
            NodeState::Allocated
        );
    }

    #[test]
    fn missing_state_token_is_an_error() {
        let err = parse_node_state("GPU-332", "NodeName=GPU-332").unwrap_err();
        assert!(matches!(err, SchedulerError::MissingState { .. }));
        assert!(!err.is_retriable());
    }
}

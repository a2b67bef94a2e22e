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
use serde::Deserialize;

use crate::clients::process::{self, ProcessError};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;

#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unexpected inventory response: {0}")]
    InvalidResponse(String),
}

impl InventoryError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, InventoryError::Process(process) if process.is_retriable())
    }
}

/// Inventory collaborator mapping a cloud instance id to a cluster hostname.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    async fn resolve_host(&self, instance_id: &str)
        -> Result<Option<String>, InventoryError>;
}

/// Runs a configured lookup command with the instance id appended; the first
/// line of stdout is the hostname, empty output means not found.
#[derive(Debug)]
pub struct CliInventory {
    command: Vec<String>,
    timeout: Duration,
}

impl CliInventory {
    pub fn new(command: Vec<String>, timeout: Duration) -> Result<Self, OrchestratorError> {
        if command.is_empty() {
            return Err(OrchestratorError::Config(
                "inventory_command must not be empty".to_string(),
            ));
        }
        Ok(Self { command, timeout })
    }
}

#[async_trait]
impl InventoryClient for CliInventory {
    async fn resolve_host(
        &self,
        instance_id: &str,
    ) -> Result<Option<String>, InventoryError> {
        let mut args: Vec<String> = self.command[1..].to_vec();
        args.push(instance_id.to_string());
        let stdout = process::run(&self.command[0], &args, self.timeout).await?;
        Ok(first_line(&stdout))
    }
}

/// Fallback inventory: the instance display name, as HPC fleets name their
/// instances after the cluster hostname.
pub struct OciDisplayNameInventory {
    cli: String,
    region: Option<String>,
    timeout: Duration,
}

impl OciDisplayNameInventory {
    pub fn new(config: &OrchestratorConfig) -> Self {
        Self {
            cli: config.oci_cli.clone(),
            region: config.region.clone(),
            timeout: config.call_timeout(),
        }
    }
}

#[derive(Deserialize)]
struct InstanceEnvelope {
    data: InstanceSummary,
}

#[derive(Deserialize)]
struct InstanceSummary {
    #[serde(rename = "display-name")]
    #[serde(default)]
    display_name: Option<String>,
}

#[async_trait]
impl InventoryClient for OciDisplayNameInventory {
    async fn resolve_host(
        &self,
        instance_id: &str,
    ) -> Result<Option<String>, InventoryError> {
        let mut args = vec![
            "compute".to_string(),
            "instance".to_string(),
            "get".to_string(),
            "--instance-id".to_string(),
            instance_id.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        let stdout = process::run(&self.cli, &args, self.timeout).await?;
        let envelope: InstanceEnvelope = serde_json::from_str(stdout.trim())
            .map_err(|err| InventoryError::InvalidResponse(err.to_string()))?;
        Ok(envelope
            .data
            .display_name
            .and_then(|name| first_line(&name)))
    }
}

fn first_line(output: &str) -> Option<String> {
    output
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn first_line_trims_and_drops_empty_output() {
        assert_eq!(first_line("GPU-332\n"), Some("GPU-332".to_string()));
        assert_eq!(first_line("  GPU-332  \nsecond"), Some("GPU-332".to_string()));
        assert_eq!(first_line("\n"), None);
        assert_eq!(first_line(""), None);
    }

    #[test]
    fn empty_lookup_command_is_a_config_error() {
        let err = CliInventory::new(Vec::new(), Duration::from_secs(30)).unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }

    #[test]
    async fn cli_inventory_returns_the_first_stdout_line() {
        let inventory = CliInventory::new(
            vec!["echo".to_string(), "GPU-332".to_string()],
            Duration::from_secs(5),
        )
        .unwrap();
        // echo appends the instance id after the configured args
        let resolved = inventory.resolve_host("ocid1.instance.oc1..bbbb").await.unwrap();
        assert_eq!(resolved.as_deref(), Some("GPU-332 ocid1.instance.oc1..bbbb"));
    }

    #[test]
    fn display_name_envelope_parses() {
        let envelope: InstanceEnvelope = serde_json::from_str(
            r#"{"data": {"display-name": "GPU-332", "shape": "BM.HPC2.36"}}"#,
        )
        .unwrap();
        assert_eq!(envelope.data.display_name.as_deref(), Some("GPU-332"));
    }
}

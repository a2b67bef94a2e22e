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

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;
use crate::retries::RetryConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config/felix.toml";

/// Environment variables recognized as overrides, matched case-insensitively
/// against the config field names.
const RECOGNIZED_ENV: &[&str] = &[
    "oci_tenancy_ocid",
    "region",
    "drain_poll_sec",
    "drain_timeout_sec",
    "maint_poll_sec",
    "loop_interval_sec",
    "daily_schedule_cap",
    "max_workers",
    "schedule_lead_sec",
    "call_timeout_sec",
    "processed_tag",
    "approved_fault_codes_file",
    "approved_fault_codes",
    "excluded_hosts_file",
    "events_log_file",
    "log_level",
    "log_file",
];

/// Immutable configuration record, constructed once per process and passed
/// explicitly to each component. The core never reads the environment
/// directly.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub oci_tenancy_ocid: Option<String>,
    pub region: Option<String>,
    pub drain_poll_sec: u64,
    pub drain_timeout_sec: u64,
    pub maint_poll_sec: u64,
    pub loop_interval_sec: u64,
    pub daily_schedule_cap: u32,
    pub max_workers: usize,
    pub schedule_lead_sec: u64,
    pub call_timeout_sec: u64,
    pub processed_tag: String,
    pub approved_fault_codes_file: Option<PathBuf>,
    pub approved_fault_codes: Option<String>,
    pub excluded_hosts_file: Option<PathBuf>,
    pub events_log_file: PathBuf,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    /// Binary used for cloud API calls.
    pub oci_cli: String,
    /// Binary used for workload-manager calls.
    pub scontrol: String,
    /// Optional external lookup command mapping an instance id to a
    /// hostname; when empty the instance display name is used.
    pub inventory_command: Vec<String>,
    pub call_retries: RetryConfig,
    pub inventory_retries: RetryConfig,
    pub schedule_retries: RetryConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            oci_tenancy_ocid: None,
            region: None,
            drain_poll_sec: 30,
            drain_timeout_sec: 1800,
            maint_poll_sec: 30,
            loop_interval_sec: 900,
            daily_schedule_cap: 10,
            max_workers: 8,
            schedule_lead_sec: 300,
            call_timeout_sec: 30,
            processed_tag: "felix".to_string(),
            approved_fault_codes_file: None,
            approved_fault_codes: None,
            excluded_hosts_file: None,
            events_log_file: PathBuf::from("logs/events.jsonl"),
            log_level: None,
            log_file: None,
            oci_cli: "oci".to_string(),
            scontrol: "scontrol".to_string(),
            inventory_command: Vec::new(),
            call_retries: RetryConfig::default(),
            inventory_retries: RetryConfig::default(),
            schedule_retries: RetryConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Loads defaults, then the TOML config file, then recognized
    /// environment overrides.
    pub fn load(config_file: Option<&Path>) -> Result<OrchestratorConfig, OrchestratorError> {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));
        let env = Env::raw()
            .map(|key| key.as_str().to_ascii_lowercase().into())
            .only(RECOGNIZED_ENV);
        Figment::from(Serialized::defaults(OrchestratorConfig::default()))
            .merge(Toml::file(file))
            .merge(env)
            .extract()
            .map_err(|err| OrchestratorError::Config(err.to_string()))
    }

    pub fn drain_poll(&self) -> Duration {
        Duration::from_secs(self.drain_poll_sec)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_sec)
    }

    pub fn maint_poll(&self) -> Duration {
        Duration::from_secs(self.maint_poll_sec)
    }

    pub fn loop_interval(&self) -> Duration {
        Duration::from_secs(self.loop_interval_sec)
    }

    pub fn schedule_lead(&self) -> Duration {
        Duration::from_secs(self.schedule_lead_sec)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_sec)
    }

    pub fn tenancy(&self) -> Result<&str, OrchestratorError> {
        self.oci_tenancy_ocid.as_deref().ok_or_else(|| {
            OrchestratorError::Config("OCI_TENANCY_OCID is not configured".to_string())
        })
    }

    /// The fault ids approved for automated action. A JSON array file takes
    /// precedence over the comma-separated fallback; matching is exact and
    /// case-sensitive.
    pub fn approved_faults(&self) -> Result<BTreeSet<String>, OrchestratorError> {
        if let Some(path) = &self.approved_fault_codes_file {
            read_json_string_array(path, "approved fault codes")
        } else if let Some(csv) = &self.approved_fault_codes {
            Ok(csv
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect())
        } else {
            Ok(BTreeSet::new())
        }
    }

    pub fn excluded_hosts(&self) -> Result<BTreeSet<String>, OrchestratorError> {
        match &self.excluded_hosts_file {
            Some(path) => read_json_string_array(path, "excluded hosts"),
            None => Ok(BTreeSet::new()),
        }
    }
}

fn read_json_string_array(
    path: &Path,
    what: &str,
) -> Result<BTreeSet<String>, OrchestratorError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        OrchestratorError::Config(format!(
            "cannot read {what} file {}: {err}",
            path.display()
        ))
    })?;
    let entries: Vec<String> = serde_json::from_str(&raw).map_err(|err| {
        OrchestratorError::Config(format!(
            "{what} file {} is not a JSON string array: {err}",
            path.display()
        ))
    })?;
    Ok(entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.drain_poll_sec, 30);
        assert_eq!(config.drain_timeout_sec, 1800);
        assert_eq!(config.maint_poll_sec, 30);
        assert_eq!(config.loop_interval_sec, 900);
        assert_eq!(config.daily_schedule_cap, 10);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.schedule_lead_sec, 300);
        assert_eq!(config.processed_tag, "felix");
        assert_eq!(config.events_log_file, PathBuf::from("logs/events.jsonl"));
    }

    #[test]
    fn environment_overrides_file_and_defaults() {
        figment::Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/felix.toml",
                r#"
                    drain_poll_sec = 10
                    processed_tag = "staging"
                "#,
            )?;
            jail.set_env("DRAIN_POLL_SEC", "5");
            jail.set_env("DAILY_SCHEDULE_CAP", "2");

            let config = OrchestratorConfig::load(None).expect("config should load");
            assert_eq!(config.drain_poll_sec, 5);
            assert_eq!(config.processed_tag, "staging");
            assert_eq!(config.daily_schedule_cap, 2);
            assert_eq!(config.max_workers, 8);
            Ok(())
        });
    }

    #[test]
    fn unrelated_environment_variables_are_ignored() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("PROCESSED_TAG", "felix-dev");
            jail.set_env("UNRELATED_SETTING", "whatever");

            let config = OrchestratorConfig::load(None).expect("config should load");
            assert_eq!(config.processed_tag, "felix-dev");
            Ok(())
        });
    }

    #[test]
    fn approved_faults_prefers_file_over_csv_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approved.json");
        std::fs::write(&path, r#"["HPCRDMA-0002-02", "HPCGPU-0001-01"]"#).unwrap();

        let config = OrchestratorConfig {
            approved_fault_codes_file: Some(path),
            approved_fault_codes: Some("IGNORED-0000-00".to_string()),
            ..OrchestratorConfig::default()
        };
        let approved = config.approved_faults().unwrap();
        assert!(approved.contains("HPCRDMA-0002-02"));
        assert!(approved.contains("HPCGPU-0001-01"));
        assert!(!approved.contains("IGNORED-0000-00"));
    }

    #[test]
    fn approved_faults_csv_fallback_trims_entries() {
        let config = OrchestratorConfig {
            approved_fault_codes: Some(" HPCRDMA-0002-02 , HPCGPU-0001-01 ,".to_string()),
            ..OrchestratorConfig::default()
        };
        let approved = config.approved_faults().unwrap();
        assert_eq!(approved.len(), 2);
        assert!(approved.contains("HPCRDMA-0002-02"));
    }

    #[test]
    fn missing_excluded_hosts_file_means_empty_set() {
        let config = OrchestratorConfig::default();
        assert!(config.excluded_hosts().unwrap().is_empty());
    }

    #[test]
    fn malformed_fault_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("approved.json");
        std::fs::write(&path, "not json").unwrap();

        let config = OrchestratorConfig {
            approved_fault_codes_file: Some(path),
            ..OrchestratorConfig::default()
        };
        let err = config.approved_faults().unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
    }
}

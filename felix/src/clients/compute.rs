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

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::info;

use crate::clients::process::{self, ProcessError};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::model::{MaintenanceEvent, WorkRequestState};

#[derive(Debug, thiserror::Error)]
pub enum ComputeError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("unexpected response from {op}: {detail}")]
    InvalidResponse { op: &'static str, detail: String },
}

impl ComputeError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, ComputeError::Process(process) if process.is_retriable())
    }
}

/// Cloud compute collaborator. `update_event` is the only mutating
/// operation; everything else is a read.
#[async_trait]
pub trait ComputeClient: Send + Sync {
    async fn list_compartments(&self) -> Result<Vec<String>, ComputeError>;

    async fn list_events(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<MaintenanceEvent>, ComputeError>;

    async fn get_event(&self, event_id: &str) -> Result<MaintenanceEvent, ComputeError>;

    /// Requests the maintenance to run at `window_start` and attaches
    /// `tags`. Returns the provider work-request handle when one is issued.
    async fn update_event(
        &self,
        event_id: &str,
        window_start: DateTime<Utc>,
        tags: &BTreeMap<String, String>,
    ) -> Result<Option<String>, ComputeError>;

    async fn get_work_request(
        &self,
        work_request_id: &str,
    ) -> Result<WorkRequestState, ComputeError>;
}

/// Live implementation shelling out to the `oci` CLI with JSON output.
pub struct OciCliCompute {
    cli: String,
    tenancy: String,
    region: Option<String>,
    timeout: Duration,
}

impl OciCliCompute {
    pub fn new(config: &OrchestratorConfig) -> Result<Self, OrchestratorError> {
        Ok(Self {
            cli: config.oci_cli.clone(),
            tenancy: config.tenancy()?.to_string(),
            region: config.region.clone(),
            timeout: config.call_timeout(),
        })
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        op: &'static str,
        mut args: Vec<String>,
    ) -> Result<T, ComputeError> {
        args.push("--output".to_string());
        args.push("json".to_string());
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        let stdout = process::run(&self.cli, &args, self.timeout).await?;
        parse_envelope(op, &stdout)
    }
}

#[async_trait]
impl ComputeClient for OciCliCompute {
    async fn list_compartments(&self) -> Result<Vec<String>, ComputeError> {
        let compartments: Vec<CompartmentSummary> = self
            .invoke(
                "list-compartments",
                vec![
                    "iam".to_string(),
                    "compartment".to_string(),
                    "list".to_string(),
                    "--compartment-id".to_string(),
                    self.tenancy.clone(),
                    "--compartment-id-in-subtree".to_string(),
                    "true".to_string(),
                    "--all".to_string(),
                ],
            )
            .await?;

        // The tenancy root is itself a compartment that can hold instances.
        let mut ids = vec![self.tenancy.clone()];
        ids.extend(compartments.into_iter().map(|compartment| compartment.id));
        Ok(ids)
    }

    async fn list_events(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<MaintenanceEvent>, ComputeError> {
        self.invoke(
            "list-events",
            vec![
                "compute".to_string(),
                "instance-maintenance-event".to_string(),
                "list".to_string(),
                "--compartment-id".to_string(),
                compartment_id.to_string(),
                "--all".to_string(),
            ],
        )
        .await
    }

    async fn get_event(&self, event_id: &str) -> Result<MaintenanceEvent, ComputeError> {
        self.invoke(
            "get-event",
            vec![
                "compute".to_string(),
                "instance-maintenance-event".to_string(),
                "get".to_string(),
                "--instance-maintenance-event-id".to_string(),
                event_id.to_string(),
            ],
        )
        .await
    }

    async fn update_event(
        &self,
        event_id: &str,
        window_start: DateTime<Utc>,
        tags: &BTreeMap<String, String>,
    ) -> Result<Option<String>, ComputeError> {
        info!(event_id, %window_start, "requesting maintenance window");

        let tags_json = serde_json::to_string(tags).map_err(|err| {
            ComputeError::InvalidResponse {
                op: "update-event",
                detail: format!("cannot encode freeform tags: {err}"),
            }
        })?;
        let mut args = vec![
            "compute".to_string(),
            "instance-maintenance-event".to_string(),
            "update".to_string(),
            "--instance-maintenance-event-id".to_string(),
            event_id.to_string(),
            "--time-window-start".to_string(),
            window_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            "--freeform-tags".to_string(),
            tags_json,
            "--force".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let Some(region) = &self.region {
            args.push("--region".to_string());
            args.push(region.clone());
        }
        let stdout = process::run(&self.cli, &args, self.timeout).await?;
        parse_update_response(&stdout)
    }

    async fn get_work_request(
        &self,
        work_request_id: &str,
    ) -> Result<WorkRequestState, ComputeError> {
        let work_request: WorkRequest = self
            .invoke(
                "get-work-request",
                vec![
                    "work-requests".to_string(),
                    "work-request".to_string(),
                    "get".to_string(),
                    "--work-request-id".to_string(),
                    work_request_id.to_string(),
                ],
            )
            .await?;
        Ok(work_request.status)
    }
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct CompartmentSummary {
    id: String,
}

#[derive(Deserialize)]
struct WorkRequest {
    status: WorkRequestState,
}

#[derive(Deserialize)]
struct UpdateResponse {
    #[serde(rename = "opc-work-request-id")]
    #[serde(default)]
    opc_work_request_id: Option<String>,
}

/// The CLI prints nothing at all for empty list results; treat that as an
/// empty collection rather than a parse failure.
fn parse_envelope<T: DeserializeOwned>(
    op: &'static str,
    stdout: &str,
) -> Result<T, ComputeError> {
    let trimmed = stdout.trim();
    let effective = if trimmed.is_empty() {
        "{\"data\": []}"
    } else {
        trimmed
    };
    let envelope: Envelope<T> =
        serde_json::from_str(effective).map_err(|err| ComputeError::InvalidResponse {
            op,
            detail: err.to_string(),
        })?;
    Ok(envelope.data)
}

fn parse_update_response(stdout: &str) -> Result<Option<String>, ComputeError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let response: UpdateResponse =
        serde_json::from_str(trimmed).map_err(|err| ComputeError::InvalidResponse {
            op: "update-event",
            detail: err.to_string(),
        })?;
    Ok(response.opc_work_request_id)
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;
    use crate::model::LifecycleState;

    #[test]
    fn parses_an_event_list_envelope() {
        let events: Vec<MaintenanceEvent> = parse_envelope(
            "list-events",
            r#"{
                "data": [
                    {
                        "id": "ocid1.instancemaintenanceevent.oc1..aaaa",
                        "instance-id": "ocid1.instance.oc1..bbbb",
                        "compartment-id": "ocid1.compartment.oc1..cccc",
                        "fault-ids": ["HPCRDMA-0002-02"],
                        "lifecycle-state": "SCHEDULED"
                    }
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].lifecycle_state, LifecycleState::Scheduled);
    }

    #[test]
    fn empty_cli_output_is_an_empty_list() {
        let events: Vec<MaintenanceEvent> = parse_envelope("list-events", "  \n").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn garbage_output_is_an_invalid_response() {
        let err =
            parse_envelope::<Vec<MaintenanceEvent>>("list-events", "ServiceError: oops")
                .unwrap_err();
        assert!(matches!(err, ComputeError::InvalidResponse { .. }));
        assert!(!err.is_retriable());
    }

    #[test]
    fn update_response_surfaces_the_work_request_handle() {
        let id = parse_update_response(
            r#"{"opc-work-request-id": "ocid1.workrequest.oc1..dddd", "data": {}}"#,
        )
        .unwrap();
        assert_eq!(id.as_deref(), Some("ocid1.workrequest.oc1..dddd"));

        let missing = parse_update_response(r#"{"data": {}}"#).unwrap();
        assert_eq!(missing, None);

        let empty = parse_update_response("").unwrap();
        assert_eq!(empty, None);
    }

    #[test]
    fn work_request_status_parses_wire_states() {
        let wr: WorkRequest =
            serde_json::from_str(r#"{"status": "IN_PROGRESS"}"#).unwrap();
        assert_eq!(wr.status, WorkRequestState::InProgress);
        assert!(!wr.status.is_terminal());
    }
}

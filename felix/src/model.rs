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

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wall-clock capability, injected so schedule windows and audit timestamps
/// are controllable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Lifecycle of a provider maintenance event, in the provider's wire form.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    Scheduled,
    Started,
    Processing,
    Succeeded,
    Completed,
    Failed,
    Canceled,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleState::Succeeded
                | LifecycleState::Completed
                | LifecycleState::Failed
                | LifecycleState::Canceled
        )
    }

    pub fn is_in_progress(&self) -> bool {
        matches!(self, LifecycleState::Started | LifecycleState::Processing)
    }

    /// SUCCEEDED and COMPLETED are both reported as success by the provider,
    /// depending on region.
    pub fn is_success(&self) -> bool {
        matches!(self, LifecycleState::Succeeded | LifecycleState::Completed)
    }
}

/// Terminal states of an asynchronous provider work request.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkRequestState {
    Accepted,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl WorkRequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkRequestState::Succeeded | WorkRequestState::Failed | WorkRequestState::Canceled
        )
    }
}

/// A provider maintenance event. The orchestrator never mutates these
/// directly, it only requests transitions and re-reads.
///
/// Field names follow the provider's kebab-case JSON keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaintenanceEvent {
    #[serde(rename = "id")]
    pub event_id: String,
    pub instance_id: String,
    pub compartment_id: String,
    #[serde(default)]
    pub fault_ids: BTreeSet<String>,
    pub lifecycle_state: LifecycleState,
    #[serde(default)]
    pub time_window_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub freeform_tags: BTreeMap<String, String>,
}

impl MaintenanceEvent {
    /// Whether the event carries the orchestrator's processed tag, i.e. it
    /// was scheduled by us in an earlier pass.
    pub fn is_tagged(&self, tag: &str) -> bool {
        self.freeform_tags.contains_key(tag)
    }

    /// The lexicographically smallest fault id that is in the approved set.
    pub fn first_approved_fault(&self, approved: &BTreeSet<String>) -> Option<&str> {
        self.fault_ids
            .iter()
            .find(|fault| approved.contains(*fault))
            .map(|fault| fault.as_str())
    }
}

/// Workload-manager node state as observed through the scheduler client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    Idle,
    Allocated,
    Mixed,
    Drain,
    Drained,
    Down,
    Resume,
    #[strum(default)]
    Unknown(String),
}

impl NodeState {
    /// Parses a scontrol/sinfo state token such as `IDLE`, `ALLOCATED*` or
    /// `IDLE+DRAIN`, ignoring decoration flags.
    pub fn parse(token: &str) -> NodeState {
        const FLAGS: [char; 7] = ['*', '~', '#', '%', '!', '@', '$'];

        let token = token.trim().to_ascii_uppercase();
        let mut parts = token
            .split('+')
            .map(|part| part.trim_matches(FLAGS.as_slice()));
        let base = parts.next().unwrap_or("");
        let draining = parts.any(|flag| flag.starts_with("DRAIN"));

        match base {
            "DRAINED" => NodeState::Drained,
            "DRAIN" | "DRAINING" | "DRNG" => NodeState::Drain,
            "IDLE" if draining => NodeState::Drained,
            "IDLE" => NodeState::Idle,
            "ALLOCATED" | "ALLOC" if draining => NodeState::Drain,
            "ALLOCATED" | "ALLOC" => NodeState::Allocated,
            "MIXED" if draining => NodeState::Drain,
            "MIXED" => NodeState::Mixed,
            "DOWN" => NodeState::Down,
            "RESUME" => NodeState::Resume,
            other => NodeState::Unknown(other.to_string()),
        }
    }

    /// DRAIN and DRAINED are both safe for maintenance.
    pub fn is_quiesced(&self) -> bool {
        matches!(self, NodeState::Drain | NodeState::Drained)
    }
}

/// The unit of work processed by one worker: a single approved fault on a
/// single resolved host. Immutable once produced by discovery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Job {
    pub event_id: String,
    pub instance_id: String,
    pub hostname: String,
    pub fault_id: String,
    pub compartment_id: String,
    pub window_start: Option<DateTime<Utc>>,
}

/// States of the per-host state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Pending,
    Draining,
    Drained,
    Scheduling,
    InMaintenance,
    Health,
    Finalizing,
    Done,
    Skipped,
    Failed,
}

impl HostState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostState::Done | HostState::Skipped | HostState::Failed)
    }
}

/// Per-host result row, reported at end of pass.
#[derive(Clone, Debug, Serialize)]
pub struct HostOutcome {
    pub hostname: String,
    pub event_id: String,
    pub terminal: HostState,
    pub error: Option<OutcomeError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct OutcomeError {
    pub kind: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn node_state_parses_plain_tokens() {
        assert_eq!(NodeState::parse("IDLE"), NodeState::Idle);
        assert_eq!(NodeState::parse("ALLOCATED"), NodeState::Allocated);
        assert_eq!(NodeState::parse("MIXED"), NodeState::Mixed);
        assert_eq!(NodeState::parse("DOWN"), NodeState::Down);
        assert_eq!(NodeState::parse("DRAINED"), NodeState::Drained);
    }

    #[test]
    fn node_state_parses_flags_and_compounds() {
        assert_eq!(NodeState::parse("IDLE*"), NodeState::Idle);
        assert_eq!(NodeState::parse("idle+drain"), NodeState::Drained);
        assert_eq!(NodeState::parse("ALLOCATED+DRAIN"), NodeState::Drain);
        assert_eq!(NodeState::parse("MIXED*+DRAIN"), NodeState::Drain);
        assert_eq!(
            NodeState::parse("FUTURE"),
            NodeState::Unknown("FUTURE".to_string())
        );
    }

    #[test]
    fn quiesced_covers_drain_and_drained_only() {
        assert!(NodeState::Drain.is_quiesced());
        assert!(NodeState::Drained.is_quiesced());
        assert!(!NodeState::Idle.is_quiesced());
        assert!(!NodeState::Down.is_quiesced());
    }

    #[test]
    fn lifecycle_state_wire_form_round_trips() {
        let state: LifecycleState = serde_json::from_str("\"SCHEDULED\"").unwrap();
        assert_eq!(state, LifecycleState::Scheduled);
        assert_eq!(serde_json::to_string(&state).unwrap(), "\"SCHEDULED\"");
        assert!(LifecycleState::Completed.is_success());
        assert!(LifecycleState::Succeeded.is_success());
        assert!(!LifecycleState::Processing.is_terminal());
    }

    #[test]
    fn event_deserializes_from_provider_json() {
        let event: MaintenanceEvent = serde_json::from_value(serde_json::json!({
            "id": "ocid1.instancemaintenanceevent.oc1..aaaa",
            "instance-id": "ocid1.instance.oc1..bbbb",
            "compartment-id": "ocid1.compartment.oc1..cccc",
            "fault-ids": ["HPCRDMA-0002-02"],
            "lifecycle-state": "SCHEDULED",
            "time-window-start": "2026-01-02T03:04:05Z",
            "freeform-tags": { "felix": "2026-01-01T00:00:00Z" }
        }))
        .unwrap();
        assert_eq!(event.event_id, "ocid1.instancemaintenanceevent.oc1..aaaa");
        assert_eq!(event.lifecycle_state, LifecycleState::Scheduled);
        assert!(event.is_tagged("felix"));
        assert!(!event.is_tagged("other"));
    }

    #[test]
    fn first_approved_fault_is_lexicographically_smallest() {
        let event = MaintenanceEvent {
            event_id: "ev-1".to_string(),
            instance_id: "inst-1".to_string(),
            compartment_id: "cmp-1".to_string(),
            fault_ids: ["B-FAULT", "A-FAULT", "C-FAULT"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            lifecycle_state: LifecycleState::Scheduled,
            time_window_start: None,
            freeform_tags: BTreeMap::new(),
        };
        let approved: BTreeSet<String> = ["C-FAULT", "B-FAULT"]
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(event.first_approved_fault(&approved), Some("B-FAULT"));
        assert_eq!(event.first_approved_fault(&BTreeSet::new()), None);
    }
}

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

use serde::Serialize;
use tracing::{debug, warn};

use crate::audit::AuditRecord;
use crate::clients::compute::ComputeError;
use crate::clients::inventory::InventoryError;
use crate::error::OrchestratorError;
use crate::model::{Job, MaintenanceEvent};
use crate::phases::transient;
use crate::retries::with_retries;
use crate::services::Services;

/// Which events a pass acts on.
#[derive(Clone, Debug)]
pub enum DiscoverySelection {
    /// The default path: provider events still in SCHEDULED.
    Scheduled,
    /// Catchup: events past SCHEDULED that carry our processed tag,
    /// optionally narrowed to one host.
    Managed { host: Option<String> },
}

impl DiscoverySelection {
    fn is_actionable(&self, event: &MaintenanceEvent, processed_tag: &str) -> bool {
        match self {
            DiscoverySelection::Scheduled => {
                event.lifecycle_state == crate::model::LifecycleState::Scheduled
            }
            DiscoverySelection::Managed { .. } => {
                event.is_tagged(processed_tag)
                    && event.lifecycle_state != crate::model::LifecycleState::Scheduled
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Eligible,
    NotActionable,
    Unresolved,
    Filtered,
    Excluded,
    Unapproved,
    DuplicateHost,
}

/// Everything discovery saw, kept for the read-only views.
#[derive(Clone, Debug, Serialize)]
pub struct ObservedEvent {
    pub event: MaintenanceEvent,
    pub hostname: Option<String>,
    pub disposition: Disposition,
}

pub struct DiscoveryOutcome {
    /// Actionable jobs, sorted by hostname, at most one per hostname.
    pub jobs: Vec<Job>,
    pub observed: Vec<ObservedEvent>,
}

/// Produces the job set for a pass. A failing compartment listing is
/// recorded and skipped; only a failure to enumerate compartments aborts.
pub async fn discover(
    services: &Services,
    approved: &BTreeSet<String>,
    excluded: &BTreeSet<String>,
    selection: &DiscoverySelection,
) -> Result<DiscoveryOutcome, OrchestratorError> {
    let compartments = with_retries(
        "compute",
        "list-compartments",
        &services.config.call_retries,
        || Box::pin(services.compute.list_compartments()),
        ComputeError::is_retriable,
    )
    .await
    .map_err(transient)?;

    let mut observed: Vec<ObservedEvent> = Vec::new();
    let mut candidates: Vec<Job> = Vec::new();

    for compartment_id in &compartments {
        let events = match services.compute.list_events(compartment_id).await {
            Ok(events) => events,
            Err(err) => {
                warn!(compartment_id, "failed to list maintenance events: {err}");
                services.audit.append(
                    AuditRecord::new("discover", "list_error", "-")
                        .with("compartment_id", compartment_id.as_str())
                        .with("error", err.to_string()),
                );
                continue;
            }
        };

        for event in events {
            if !selection.is_actionable(&event, &services.config.processed_tag) {
                observed.push(ObservedEvent {
                    event,
                    hostname: None,
                    disposition: Disposition::NotActionable,
                });
                continue;
            }

            let Some(hostname) = resolve_host(services, &event).await else {
                observed.push(ObservedEvent {
                    event,
                    hostname: None,
                    disposition: Disposition::Unresolved,
                });
                continue;
            };

            if let DiscoverySelection::Managed { host: Some(only) } = selection {
                if &hostname != only {
                    observed.push(ObservedEvent {
                        event,
                        hostname: Some(hostname),
                        disposition: Disposition::Filtered,
                    });
                    continue;
                }
            }

            if excluded.contains(&hostname) {
                debug!(hostname, event_id = event.event_id, "host is excluded");
                services.audit.append(
                    AuditRecord::new("discover", "excluded", &hostname)
                        .with("event_id", event.event_id.as_str()),
                );
                observed.push(ObservedEvent {
                    event,
                    hostname: Some(hostname),
                    disposition: Disposition::Excluded,
                });
                continue;
            }

            let Some(fault_id) = event.first_approved_fault(approved).map(str::to_string)
            else {
                services.audit.append(
                    AuditRecord::new("discover", "unapproved", &hostname)
                        .with("event_id", event.event_id.as_str())
                        .with(
                            "fault_ids",
                            event
                                .fault_ids
                                .iter()
                                .cloned()
                                .collect::<Vec<_>>(),
                        ),
                );
                observed.push(ObservedEvent {
                    event,
                    hostname: Some(hostname),
                    disposition: Disposition::Unapproved,
                });
                continue;
            };

            candidates.push(Job {
                event_id: event.event_id.clone(),
                instance_id: event.instance_id.clone(),
                hostname: hostname.clone(),
                fault_id,
                compartment_id: event.compartment_id.clone(),
                window_start: event.time_window_start,
            });
            observed.push(ObservedEvent {
                event,
                hostname: Some(hostname),
                disposition: Disposition::Eligible,
            });
        }
    }

    // Per-pass mutual exclusion: at most one job per hostname, chosen
    // deterministically by event id.
    candidates.sort_by(|a, b| {
        a.hostname
            .cmp(&b.hostname)
            .then_with(|| a.event_id.cmp(&b.event_id))
    });
    let mut jobs: Vec<Job> = Vec::new();
    for job in candidates {
        let duplicate = jobs
            .last()
            .map(|kept| kept.hostname == job.hostname)
            .unwrap_or(false);
        if duplicate {
            services.audit.append(
                AuditRecord::new("discover", "duplicate_host", &job.hostname)
                    .with("event_id", job.event_id.as_str()),
            );
            if let Some(entry) = observed
                .iter_mut()
                .find(|entry| entry.event.event_id == job.event_id)
            {
                entry.disposition = Disposition::DuplicateHost;
            }
        } else {
            jobs.push(job);
        }
    }

    Ok(DiscoveryOutcome { jobs, observed })
}

async fn resolve_host(services: &Services, event: &MaintenanceEvent) -> Option<String> {
    let resolved = with_retries(
        "inventory",
        "resolve-host",
        &services.config.inventory_retries,
        || Box::pin(services.inventory.resolve_host(&event.instance_id)),
        InventoryError::is_retriable,
    )
    .await;

    match resolved {
        Ok(Some(hostname)) => Some(hostname),
        Ok(None) => {
            services.audit.append(
                AuditRecord::new("discover", "unresolved", "-")
                    .with("event_id", event.event_id.as_str())
                    .with("instance_id", event.instance_id.as_str()),
            );
            None
        }
        Err(err) => {
            warn!(
                event_id = event.event_id,
                instance_id = event.instance_id,
                "inventory lookup failed: {err}"
            );
            services.audit.append(
                AuditRecord::new("discover", "unresolved", "-")
                    .with("event_id", event.event_id.as_str())
                    .with("instance_id", event.instance_id.as_str())
                    .with("error", err.to_string()),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use test_r::test;

    use super::*;
    use crate::model::LifecycleState;

    fn event(lifecycle_state: LifecycleState, tags: &[&str]) -> MaintenanceEvent {
        MaintenanceEvent {
            event_id: "ev-1".to_string(),
            instance_id: "inst-1".to_string(),
            compartment_id: "cmp-1".to_string(),
            fault_ids: BTreeSet::new(),
            lifecycle_state,
            time_window_start: None,
            freeform_tags: tags
                .iter()
                .map(|tag| (tag.to_string(), "x".to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn scheduled_selection_only_acts_on_scheduled_events() {
        let selection = DiscoverySelection::Scheduled;
        assert!(selection.is_actionable(&event(LifecycleState::Scheduled, &[]), "felix"));
        assert!(!selection.is_actionable(&event(LifecycleState::Started, &[]), "felix"));
        assert!(!selection.is_actionable(&event(LifecycleState::Succeeded, &[]), "felix"));
    }

    #[test]
    fn managed_selection_requires_the_processed_tag() {
        let selection = DiscoverySelection::Managed { host: None };
        assert!(selection.is_actionable(&event(LifecycleState::Started, &["felix"]), "felix"));
        assert!(
            selection.is_actionable(&event(LifecycleState::Succeeded, &["felix"]), "felix")
        );
        assert!(!selection.is_actionable(&event(LifecycleState::Started, &[]), "felix"));
        assert!(
            !selection.is_actionable(&event(LifecycleState::Scheduled, &["felix"]), "felix")
        );
    }
}

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

use chrono::SecondsFormat;
use tracing::info;

use crate::audit::AuditRecord;
use crate::clients::compute::ComputeError;
use crate::error::OrchestratorError;
use crate::model::{Job, LifecycleState, WorkRequestState};
use crate::phases::{sleep_unless_cancelled, transient};
use crate::retries::with_retries;
use crate::services::Services;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// The provider accepted the maintenance window.
    Accepted,
    /// The event had already left SCHEDULED; nothing to request.
    AlreadyTransitioned,
    /// Dry run: the request was audited but not issued.
    DryRun,
}

/// Requests the maintenance to run at `now + SCHEDULE_LEAD_SEC`, tagging the
/// event as orchestrator-managed, and waits for the provider work request to
/// settle. Guarded by a fresh read of the event state.
pub async fn run(services: &Services, job: &Job) -> Result<ScheduleOutcome, OrchestratorError> {
    let event = with_retries(
        "compute",
        "get-event",
        &services.config.call_retries,
        || Box::pin(services.compute.get_event(&job.event_id)),
        ComputeError::is_retriable,
    )
    .await
    .map_err(transient)?;

    if event.lifecycle_state != LifecycleState::Scheduled {
        info!(
            event_id = job.event_id,
            state = %event.lifecycle_state,
            "event already transitioned, skipping schedule request"
        );
        return Ok(ScheduleOutcome::AlreadyTransitioned);
    }

    let window_start =
        services.clock.now() + chrono::Duration::seconds(services.config.schedule_lead_sec as i64);

    services.audit.append(
        AuditRecord::new("maintenance", "schedule_request", &job.hostname)
            .with("event_id", job.event_id.as_str())
            .with("fault_id", job.fault_id.as_str())
            .with(
                "window_start",
                window_start.to_rfc3339_opts(SecondsFormat::Secs, true),
            )
            .dry(services.dry_run),
    );

    if services.dry_run {
        return Ok(ScheduleOutcome::DryRun);
    }

    let mut tags = event.freeform_tags.clone();
    tags.insert(
        services.config.processed_tag.clone(),
        services
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true),
    );

    let work_request_id = with_retries(
        "compute",
        "update-event",
        &services.config.schedule_retries,
        || Box::pin(services.compute.update_event(&job.event_id, window_start, &tags)),
        ComputeError::is_retriable,
    )
    .await
    .map_err(|err| OrchestratorError::ScheduleFailed(err.to_string()))?;

    services.audit.append(
        AuditRecord::new("maintenance", "schedule_accepted", &job.hostname)
            .with("event_id", job.event_id.as_str())
            .with(
                "work_request_id",
                work_request_id.clone().unwrap_or_default(),
            ),
    );

    if let Some(work_request_id) = work_request_id {
        wait_for_work_request(services, job, &work_request_id).await?;
    }

    Ok(ScheduleOutcome::Accepted)
}

async fn wait_for_work_request(
    services: &Services,
    job: &Job,
    work_request_id: &str,
) -> Result<(), OrchestratorError> {
    loop {
        let state = with_retries(
            "compute",
            "get-work-request",
            &services.config.call_retries,
            || Box::pin(services.compute.get_work_request(work_request_id)),
            ComputeError::is_retriable,
        )
        .await
        .map_err(transient)?;

        match state {
            WorkRequestState::Succeeded => return Ok(()),
            WorkRequestState::Failed | WorkRequestState::Canceled => {
                return Err(OrchestratorError::ScheduleFailed(format!(
                    "work request {work_request_id} for event {} ended in {state}",
                    job.event_id
                )));
            }
            WorkRequestState::Accepted | WorkRequestState::InProgress => {
                sleep_unless_cancelled(&services.cancel, services.config.maint_poll()).await?;
            }
        }
    }
}

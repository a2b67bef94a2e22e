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

use tracing::info;

use crate::audit::AuditRecord;
use crate::clients::compute::ComputeError;
use crate::error::OrchestratorError;
use crate::model::{Job, LifecycleState};
use crate::phases::{sleep_unless_cancelled, transient};
use crate::retries::with_retries;
use crate::services::Services;

const BACKOFF_CEILING: Duration = Duration::from_secs(300);

/// Tracks the event to a terminal lifecycle state. A SCHEDULED state
/// re-observed after our accept means the maintenance has not started yet,
/// so waiting continues. There is no overall timeout; only cancellation
/// aborts the wait.
pub async fn run(services: &Services, job: &Job) -> Result<LifecycleState, OrchestratorError> {
    if services.dry_run {
        return Ok(LifecycleState::Succeeded);
    }

    let mut delay = services.config.maint_poll();
    loop {
        let event = with_retries(
            "compute",
            "get-event",
            &services.config.call_retries,
            || Box::pin(services.compute.get_event(&job.event_id)),
            ComputeError::is_retriable,
        )
        .await
        .map_err(transient)?;

        let state = event.lifecycle_state;
        if state.is_terminal() {
            if state.is_success() {
                services.audit.append(
                    AuditRecord::new("maintenance", "event_complete", &job.hostname)
                        .with("event_id", job.event_id.as_str())
                        .with("state", state.to_string()),
                );
            } else {
                services.audit.append(
                    AuditRecord::new("maintenance", "event_failed", &job.hostname)
                        .with("event_id", job.event_id.as_str())
                        .with("state", state.to_string()),
                );
            }
            return Ok(state);
        }

        info!(
            event_id = job.event_id,
            %state,
            "maintenance still running, waiting {delay:?}"
        );
        sleep_unless_cancelled(&services.cancel, delay).await?;
        delay = (delay * 2).min(BACKOFF_CEILING);
    }
}

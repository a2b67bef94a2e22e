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

use tracing::info;

use crate::audit::AuditRecord;
use crate::clients::scheduler::SchedulerError;
use crate::error::OrchestratorError;
use crate::model::{Job, NodeState};
use crate::phases::{sleep_unless_cancelled, transient};
use crate::retries::with_retries;
use crate::services::Services;

/// Quiesces the node: requests a drain with the fault id as reason, then
/// polls until the workload manager reports DRAIN or DRAINED. The drain
/// request is idempotent, so it is sent even when the node is already
/// quiesced.
pub async fn run(services: &Services, job: &Job) -> Result<(), OrchestratorError> {
    services.audit.append(
        AuditRecord::new("drain", "requested", &job.hostname)
            .with("event_id", job.event_id.as_str())
            .with("fault_id", job.fault_id.as_str())
            .with("reason", job.fault_id.as_str())
            .dry(services.dry_run),
    );

    if services.dry_run {
        services.audit.append(
            AuditRecord::new("drain", "drained_empty", &job.hostname)
                .with("event_id", job.event_id.as_str())
                .with("state", NodeState::Drained.to_string())
                .dry(true),
        );
        return Ok(());
    }

    with_retries(
        "scheduler",
        "set-drain",
        &services.config.call_retries,
        || Box::pin(services.scheduler.set_drain(&job.hostname, &job.fault_id)),
        SchedulerError::is_retriable,
    )
    .await
    .map_err(transient)?;

    let started = tokio::time::Instant::now();
    loop {
        let state = with_retries(
            "scheduler",
            "node-state",
            &services.config.call_retries,
            || Box::pin(services.scheduler.node_state(&job.hostname)),
            SchedulerError::is_retriable,
        )
        .await
        .map_err(transient)?;

        if state.is_quiesced() {
            info!(hostname = job.hostname, %state, "node quiesced");
            services.audit.append(
                AuditRecord::new("drain", "drained_empty", &job.hostname)
                    .with("event_id", job.event_id.as_str())
                    .with("state", state.to_string()),
            );
            return Ok(());
        }

        if started.elapsed() >= services.config.drain_timeout() {
            return Err(OrchestratorError::DrainTimeout {
                timeout: services.config.drain_timeout(),
            });
        }

        sleep_unless_cancelled(&services.cancel, services.config.drain_poll()).await?;
    }
}

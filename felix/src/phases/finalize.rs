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
use crate::model::Job;
use crate::phases::transient;
use crate::retries::with_retries;
use crate::services::Services;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FinalizeDecision {
    /// Maintenance succeeded and health passed: return the node to service.
    Pass,
    /// Maintenance or health failed: keep the node drained with a composite
    /// reason.
    Fail { kind: &'static str },
}

/// Translates the combined outcome of the prior phases into a
/// workload-manager transition. The resume path is guarded by a node-state
/// pre-read so a reconciliation re-run does not issue duplicate mutations.
pub async fn run(
    services: &Services,
    job: &Job,
    decision: &FinalizeDecision,
) -> Result<(), OrchestratorError> {
    match decision {
        FinalizeDecision::Pass => {
            let state = with_retries(
                "scheduler",
                "node-state",
                &services.config.call_retries,
                || Box::pin(services.scheduler.node_state(&job.hostname)),
                SchedulerError::is_retriable,
            )
            .await
            .map_err(transient)?;

            let noop = !state.is_quiesced();
            if noop {
                info!(
                    hostname = job.hostname,
                    %state,
                    "node already back in service, not resuming"
                );
            } else if !services.dry_run {
                with_retries(
                    "scheduler",
                    "set-resume",
                    &services.config.call_retries,
                    || Box::pin(services.scheduler.set_resume(&job.hostname)),
                    SchedulerError::is_retriable,
                )
                .await
                .map_err(transient)?;
            }

            let mut record = AuditRecord::new("finalize", "resumed", &job.hostname)
                .with("event_id", job.event_id.as_str())
                .dry(services.dry_run);
            if noop {
                record = record.with("noop", true);
            }
            services.audit.append(record);
        }
        FinalizeDecision::Fail { kind } => {
            let reason = format!("{}:{}", job.fault_id, kind);
            if !services.dry_run {
                with_retries(
                    "scheduler",
                    "set-drain",
                    &services.config.call_retries,
                    || Box::pin(services.scheduler.set_drain(&job.hostname, &reason)),
                    SchedulerError::is_retriable,
                )
                .await
                .map_err(transient)?;
            }

            services.audit.append(
                AuditRecord::new("finalize", "held", &job.hostname)
                    .with("event_id", job.event_id.as_str())
                    .with("reason", reason.as_str())
                    .dry(services.dry_run),
            );
            // Ticket integration is an audit-only hook for now.
            services.audit.append(
                AuditRecord::new("ticket", "opened", &job.hostname)
                    .with("event_id", job.event_id.as_str())
                    .with("fault_id", job.fault_id.as_str())
                    .with("reason", reason.as_str()),
            );
        }
    }
    Ok(())
}

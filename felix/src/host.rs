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

use tracing::{debug, warn};

use crate::audit::AuditRecord;
use crate::clients::compute::ComputeError;
use crate::error::OrchestratorError;
use crate::model::{HostOutcome, HostState, Job, LifecycleState, OutcomeError};
use crate::orchestrator::{eligibility, Gate, PassContext, PassMode};
use crate::phases::finalize::FinalizeDecision;
use crate::phases::health::HealthVerdict;
use crate::phases::{drain, finalize, health, maintenance, schedule, transient};
use crate::retries::with_retries;
use crate::services::Services;

/// Drives one host through the per-host state machine. Every transition is
/// total: all phase failures are converted into the host's terminal state,
/// never propagated as panics or pass-level errors.
pub async fn run_host(services: &Services, ctx: &PassContext, job: &Job) -> HostOutcome {
    let mut state = HostState::Pending;
    let mut failure: Option<OrchestratorError> = None;
    let mut decision = FinalizeDecision::Pass;

    while !state.is_terminal() {
        if services.cancel.is_cancelled() {
            failure = Some(OrchestratorError::Cancelled);
            state = HostState::Failed;
            break;
        }

        debug!(hostname = job.hostname, %state, "host state");
        state = match state {
            HostState::Pending => match eligibility(ctx, job) {
                Gate::Proceed => match ctx.mode {
                    PassMode::Catchup { .. } => match catchup_entry(services, job).await {
                        Ok(CatchupEntry::InMaintenance) => HostState::InMaintenance,
                        Ok(CatchupEntry::Health) => HostState::Health,
                        Ok(CatchupEntry::FinalizeFailed(terminal)) => {
                            failure = Some(OrchestratorError::MaintenanceFailed {
                                state: terminal,
                                detail: format!("maintenance event ended in {terminal}"),
                            });
                            decision = FinalizeDecision::Fail {
                                kind: "MaintenanceFailed",
                            };
                            HostState::Finalizing
                        }
                        Err(err) => {
                            failure = Some(err);
                            HostState::Failed
                        }
                    },
                    _ => HostState::Draining,
                },
                gate => {
                    services.audit.append(
                        AuditRecord::new("skip", gate.audit_action(), &job.hostname)
                            .with("event_id", job.event_id.as_str()),
                    );
                    HostState::Skipped
                }
            },

            HostState::Draining => match drain::run(services, job).await {
                Ok(()) => HostState::Drained,
                Err(err) => {
                    failure = Some(err);
                    HostState::Failed
                }
            },

            HostState::Drained => HostState::Scheduling,

            HostState::Scheduling => match schedule::run(services, job).await {
                Ok(_) => match ctx.mode {
                    PassMode::Stage => HostState::Done,
                    _ => HostState::InMaintenance,
                },
                Err(err) => {
                    failure = Some(err);
                    HostState::Failed
                }
            },

            HostState::InMaintenance => match maintenance::run(services, job).await {
                Ok(terminal) if terminal.is_success() => HostState::Health,
                Ok(terminal) => {
                    failure = Some(OrchestratorError::MaintenanceFailed {
                        state: terminal,
                        detail: format!("maintenance event ended in {terminal}"),
                    });
                    decision = FinalizeDecision::Fail {
                        kind: "MaintenanceFailed",
                    };
                    HostState::Finalizing
                }
                Err(err) => {
                    failure = Some(err);
                    HostState::Failed
                }
            },

            HostState::Health => match health::run(services, job).await {
                Ok(HealthVerdict::Pass) => {
                    decision = FinalizeDecision::Pass;
                    HostState::Finalizing
                }
                Ok(HealthVerdict::Fail { reason }) => {
                    failure = Some(OrchestratorError::HealthFailed(reason));
                    decision = FinalizeDecision::Fail {
                        kind: "HealthFailed",
                    };
                    HostState::Finalizing
                }
                Err(err) => {
                    failure = Some(err);
                    HostState::Failed
                }
            },

            HostState::Finalizing => match finalize::run(services, job, &decision).await {
                Ok(()) => {
                    if failure.is_none() {
                        HostState::Done
                    } else {
                        HostState::Failed
                    }
                }
                Err(err) => {
                    failure = Some(err);
                    HostState::Failed
                }
            },

            terminal => terminal,
        };
    }

    if let Some(err) = &failure {
        warn!(hostname = job.hostname, kind = err.kind(), "host failed: {err}");
    }

    HostOutcome {
        hostname: job.hostname.clone(),
        event_id: job.event_id.clone(),
        terminal: state,
        error: failure.map(|err| OutcomeError {
            kind: err.kind().to_string(),
            detail: err.to_string(),
        }),
    }
}

enum CatchupEntry {
    InMaintenance,
    Health,
    FinalizeFailed(LifecycleState),
}

/// Catchup skips the drain/schedule prefix; the entry state depends on the
/// event's current lifecycle state: still running means keep tracking,
/// terminal success goes straight to health, terminal failure goes straight
/// to the finalize-fail branch.
async fn catchup_entry(services: &Services, job: &Job) -> Result<CatchupEntry, OrchestratorError> {
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
    if !state.is_terminal() {
        Ok(CatchupEntry::InMaintenance)
    } else if state.is_success() {
        Ok(CatchupEntry::Health)
    } else {
        Ok(CatchupEntry::FinalizeFailed(state))
    }
}

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
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use futures::stream::StreamExt;
use tracing::info;

use crate::clients::compute::ComputeError;
use crate::error::OrchestratorError;
use crate::host::run_host;
use crate::model::{HostOutcome, HostState, Job, OutcomeError};
use crate::phases::discovery::{discover, DiscoveryOutcome, DiscoverySelection, ObservedEvent};
use crate::phases::finalize::FinalizeDecision;
use crate::phases::health::HealthVerdict;
use crate::phases::{drain, finalize, health, maintenance, transient};
use crate::retries::with_retries;
use crate::services::Services;

/// How far a pass takes each host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PassMode {
    /// The whole machine: drain, schedule, track, health, finalize.
    Full,
    /// Truncated after the schedule accept.
    Stage,
    /// Reconciliation for events already past SCHEDULED; skips drain and
    /// schedule.
    Catchup { host: Option<String> },
}

impl PassMode {
    /// Whether this mode issues schedule requests, and therefore consumes
    /// the daily cap.
    pub fn schedules(&self) -> bool {
        matches!(self, PassMode::Full | PassMode::Stage)
    }
}

/// Bound on schedule requests per process lifetime, shared across passes in
/// loop mode.
pub struct DailyCap {
    limit: u32,
    used: AtomicU32,
}

impl DailyCap {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            used: AtomicU32::new(0),
        }
    }

    /// Reserves one schedule slot; returns false when the cap is exhausted.
    pub fn try_acquire(&self) -> bool {
        self.used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                (used < self.limit).then_some(used + 1)
            })
            .is_ok()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    SkipCap,
    SkipExcluded,
    SkipFault,
}

impl Gate {
    pub fn audit_action(&self) -> &'static str {
        match self {
            Gate::Proceed => "proceed",
            Gate::SkipCap => "cap",
            Gate::SkipExcluded => "excluded",
            Gate::SkipFault => "fault",
        }
    }
}

/// Shared, read-only context for all hosts of one pass.
pub struct PassContext {
    pub mode: PassMode,
    pub approved: Arc<BTreeSet<String>>,
    pub excluded: Arc<BTreeSet<String>>,
    pub cap: Arc<DailyCap>,
}

/// Defence in depth before dispatching a job: discovery already filtered,
/// but exclusion and approval are re-checked here, and the cap slot is
/// reserved last so ineligible jobs never consume it.
pub fn eligibility(ctx: &PassContext, job: &Job) -> Gate {
    if ctx.excluded.contains(&job.hostname) {
        return Gate::SkipExcluded;
    }
    if !ctx.approved.contains(&job.fault_id) {
        return Gate::SkipFault;
    }
    if ctx.mode.schedules() && !ctx.cap.try_acquire() {
        return Gate::SkipCap;
    }
    Gate::Proceed
}

pub struct PassSummary {
    pub outcomes: Vec<HostOutcome>,
    pub observed: Vec<ObservedEvent>,
}

impl PassSummary {
    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.terminal == HostState::Failed)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum SinglePhase {
    Drain,
    Maintenance,
    Health,
    Finalize,
}

pub struct Orchestrator {
    services: Services,
    cap: Arc<DailyCap>,
}

impl Orchestrator {
    pub fn new(services: Services) -> Self {
        let cap = Arc::new(DailyCap::new(services.config.daily_schedule_cap));
        Self { services, cap }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// One pass: discover the job set and fan it out to at most
    /// `MAX_WORKERS` concurrent per-host state machines. Host failures are
    /// tallied, not propagated; only configuration and discovery-level
    /// errors abort.
    pub async fn run_pass(&self, mode: PassMode) -> Result<PassSummary, OrchestratorError> {
        let approved = self.services.config.approved_faults()?;
        let excluded = self.services.config.excluded_hosts()?;
        let selection = match &mode {
            PassMode::Catchup { host } => DiscoverySelection::Managed { host: host.clone() },
            _ => DiscoverySelection::Scheduled,
        };

        let DiscoveryOutcome { jobs, observed } =
            discover(&self.services, &approved, &excluded, &selection).await?;
        info!(jobs = jobs.len(), events = observed.len(), "discovery complete");

        let ctx = PassContext {
            mode,
            approved: Arc::new(approved),
            excluded: Arc::new(excluded),
            cap: Arc::clone(&self.cap),
        };

        let mut outcomes: Vec<HostOutcome> = futures::stream::iter(jobs.iter())
            .map(|job| run_host(&self.services, &ctx, job))
            .buffer_unordered(self.services.config.max_workers.max(1))
            .collect()
            .await;
        outcomes.sort_by(|a, b| a.hostname.cmp(&b.hostname));

        Ok(PassSummary { outcomes, observed })
    }

    /// Read-only discovery for the `discover` and `report` commands.
    pub async fn observe(&self) -> Result<Vec<ObservedEvent>, OrchestratorError> {
        let approved = self.services.config.approved_faults()?;
        let excluded = self.services.config.excluded_hosts()?;
        let outcome = discover(
            &self.services,
            &approved,
            &excluded,
            &DiscoverySelection::Scheduled,
        )
        .await?;
        Ok(outcome.observed)
    }

    /// Runs exactly one phase for one host, after discovery resolves its
    /// job.
    pub async fn run_single_phase(
        &self,
        phase: SinglePhase,
        hostname: &str,
    ) -> Result<HostOutcome, OrchestratorError> {
        let job = self.resolve_job(hostname).await?;
        let services = &self.services;

        let result: Result<(), OrchestratorError> = match phase {
            SinglePhase::Drain => drain::run(services, &job).await,
            SinglePhase::Maintenance => match maintenance::run(services, &job).await {
                Ok(terminal) if terminal.is_success() => Ok(()),
                Ok(terminal) => Err(OrchestratorError::MaintenanceFailed {
                    state: terminal,
                    detail: format!("maintenance event ended in {terminal}"),
                }),
                Err(err) => Err(err),
            },
            SinglePhase::Health => match health::run(services, &job).await? {
                HealthVerdict::Pass => Ok(()),
                HealthVerdict::Fail { reason } => Err(OrchestratorError::HealthFailed(reason)),
            },
            SinglePhase::Finalize => self.finalize_one(&job).await,
        };

        let terminal = if result.is_ok() {
            HostState::Done
        } else {
            HostState::Failed
        };
        Ok(HostOutcome {
            hostname: job.hostname,
            event_id: job.event_id,
            terminal,
            error: result.err().map(|err| OutcomeError {
                kind: err.kind().to_string(),
                detail: err.to_string(),
            }),
        })
    }

    /// Finalize for one host derives its decision from the event's terminal
    /// state plus a fresh health probe.
    async fn finalize_one(&self, job: &Job) -> Result<(), OrchestratorError> {
        let services = &self.services;
        let event = with_retries(
            "compute",
            "get-event",
            &services.config.call_retries,
            || Box::pin(services.compute.get_event(&job.event_id)),
            ComputeError::is_retriable,
        )
        .await
        .map_err(transient)?;

        if !event.lifecycle_state.is_terminal() {
            return Err(OrchestratorError::Transient(format!(
                "maintenance event {} is still {}, nothing to finalize",
                job.event_id, event.lifecycle_state
            )));
        }

        let decision = if event.lifecycle_state.is_success() {
            match health::run(services, job).await? {
                HealthVerdict::Pass => FinalizeDecision::Pass,
                HealthVerdict::Fail { .. } => FinalizeDecision::Fail {
                    kind: "HealthFailed",
                },
            }
        } else {
            FinalizeDecision::Fail {
                kind: "MaintenanceFailed",
            }
        };
        finalize::run(services, job, &decision).await
    }

    async fn resolve_job(&self, hostname: &str) -> Result<Job, OrchestratorError> {
        let approved = self.services.config.approved_faults()?;
        let excluded = self.services.config.excluded_hosts()?;

        for selection in [
            DiscoverySelection::Scheduled,
            DiscoverySelection::Managed {
                host: Some(hostname.to_string()),
            },
        ] {
            let outcome =
                discover(&self.services, &approved, &excluded, &selection).await?;
            if let Some(job) = outcome
                .jobs
                .into_iter()
                .find(|job| job.hostname == hostname)
            {
                return Ok(job);
            }
        }

        Err(OrchestratorError::Unresolved(format!(
            "no actionable maintenance event for host {hostname}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    fn context(mode: PassMode, approved: &[&str], excluded: &[&str], cap: u32) -> PassContext {
        PassContext {
            mode,
            approved: Arc::new(approved.iter().map(|s| s.to_string()).collect()),
            excluded: Arc::new(excluded.iter().map(|s| s.to_string()).collect()),
            cap: Arc::new(DailyCap::new(cap)),
        }
    }

    fn job(hostname: &str, fault_id: &str) -> Job {
        Job {
            event_id: "ev-1".to_string(),
            instance_id: "inst-1".to_string(),
            hostname: hostname.to_string(),
            fault_id: fault_id.to_string(),
            compartment_id: "cmp-1".to_string(),
            window_start: None,
        }
    }

    #[test]
    fn daily_cap_stops_at_the_limit() {
        let cap = DailyCap::new(2);
        assert!(cap.try_acquire());
        assert!(cap.try_acquire());
        assert!(!cap.try_acquire());
        assert!(!cap.try_acquire());
    }

    #[test]
    fn excluded_hosts_are_rejected_before_the_cap_is_consumed() {
        let ctx = context(PassMode::Full, &["F-1"], &["GPU-332"], 1);
        assert_eq!(eligibility(&ctx, &job("GPU-332", "F-1")), Gate::SkipExcluded);
        // The excluded job did not use the cap slot.
        assert_eq!(eligibility(&ctx, &job("GPU-007", "F-1")), Gate::Proceed);
    }

    #[test]
    fn unapproved_faults_are_rejected() {
        let ctx = context(PassMode::Full, &["F-1"], &[], 10);
        assert_eq!(eligibility(&ctx, &job("GPU-332", "F-2")), Gate::SkipFault);
    }

    #[test]
    fn cap_exhaustion_skips_further_jobs() {
        let ctx = context(PassMode::Full, &["F-1"], &[], 1);
        assert_eq!(eligibility(&ctx, &job("GPU-001", "F-1")), Gate::Proceed);
        assert_eq!(eligibility(&ctx, &job("GPU-002", "F-1")), Gate::SkipCap);
    }

    #[test]
    fn catchup_does_not_consume_the_cap() {
        let ctx = context(PassMode::Catchup { host: None }, &["F-1"], &[], 0);
        assert_eq!(eligibility(&ctx, &job("GPU-001", "F-1")), Gate::Proceed);
    }
}

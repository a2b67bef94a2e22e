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

use async_trait::async_trait;

use crate::audit::AuditRecord;
use crate::error::OrchestratorError;
use crate::model::Job;
use crate::services::Services;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HealthVerdict {
    Pass,
    Fail { reason: String },
}

/// Post-maintenance node health as a pluggable capability. Implementations
/// must be repeatable, must not mutate external state, and must return
/// within the caller-imposed timeout.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, hostname: &str) -> HealthVerdict;
}

/// Placeholder checker until a diagnostic suite is wired in.
pub struct AlwaysPass;

#[async_trait]
impl HealthChecker for AlwaysPass {
    async fn check(&self, _hostname: &str) -> HealthVerdict {
        HealthVerdict::Pass
    }
}

pub async fn run(services: &Services, job: &Job) -> Result<HealthVerdict, OrchestratorError> {
    let verdict = tokio::time::timeout(
        services.config.call_timeout(),
        services.health.check(&job.hostname),
    )
    .await
    .unwrap_or(HealthVerdict::Fail {
        reason: "health check timed out".to_string(),
    });

    match &verdict {
        HealthVerdict::Pass => {
            services.audit.append(
                AuditRecord::new("health", "pass", &job.hostname)
                    .with("event_id", job.event_id.as_str()),
            );
        }
        HealthVerdict::Fail { reason } => {
            services.audit.append(
                AuditRecord::new("health", "fail", &job.hostname)
                    .with("event_id", job.event_id.as_str())
                    .with("reason", reason.as_str()),
            );
        }
    }

    Ok(verdict)
}

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

use crate::model::LifecycleState;

/// The error taxonomy of the orchestrator. Every phase failure is one of
/// these kinds; it is caught at the state-machine boundary and becomes the
/// terminal state of that host only. `Config` is the only kind that aborts
/// a pass.
#[derive(Debug, Clone, thiserror::Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transient external error: {0}")]
    Transient(String),

    #[error("node did not quiesce within {timeout:?}")]
    DrainTimeout { timeout: Duration },

    #[error("maintenance schedule rejected: {0}")]
    ScheduleFailed(String),

    #[error("maintenance ended in {state}: {detail}")]
    MaintenanceFailed {
        state: LifecycleState,
        detail: String,
    },

    #[error("health check failed: {0}")]
    HealthFailed(String),

    #[error("cancelled by orchestrator shutdown")]
    Cancelled,

    #[error("no hostname found for instance {0}")]
    Unresolved(String),
}

impl OrchestratorError {
    /// Stable kind label, used in audit records, outcome rows and composite
    /// drain reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Config(_) => "ConfigError",
            OrchestratorError::Transient(_) => "TransientExternalError",
            OrchestratorError::DrainTimeout { .. } => "DrainTimeout",
            OrchestratorError::ScheduleFailed(_) => "ScheduleFailed",
            OrchestratorError::MaintenanceFailed { .. } => "MaintenanceFailed",
            OrchestratorError::HealthFailed(_) => "HealthFailed",
            OrchestratorError::Cancelled => "Cancelled",
            OrchestratorError::Unresolved(_) => "Unresolved",
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, OrchestratorError::Config(_))
    }
}

#[cfg(test)]
mod tests {
    use test_r::test;

    use super::*;

    #[test]
    fn kinds_match_the_taxonomy() {
        assert_eq!(
            OrchestratorError::Config("missing tenancy".to_string()).kind(),
            "ConfigError"
        );
        assert_eq!(
            OrchestratorError::DrainTimeout {
                timeout: Duration::from_secs(1800)
            }
            .kind(),
            "DrainTimeout"
        );
        assert_eq!(OrchestratorError::Cancelled.kind(), "Cancelled");
    }
}

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

use std::fmt::Display;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::OrchestratorError;

pub mod discovery;
pub mod drain;
pub mod finalize;
pub mod health;
pub mod maintenance;
pub mod schedule;

pub(crate) fn transient(err: impl Display) -> OrchestratorError {
    OrchestratorError::Transient(err.to_string())
}

/// Sleeps between polls, waking early when the orchestrator is shutting
/// down. In-flight external calls are never interrupted, only the waits
/// between them.
pub(crate) async fn sleep_unless_cancelled(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), OrchestratorError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(OrchestratorError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

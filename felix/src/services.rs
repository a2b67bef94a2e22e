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

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::audit::AuditSink;
use crate::clients::compute::{ComputeClient, OciCliCompute};
use crate::clients::inventory::{CliInventory, InventoryClient, OciDisplayNameInventory};
use crate::clients::scheduler::{SchedulerClient, ScontrolScheduler};
use crate::config::OrchestratorConfig;
use crate::error::OrchestratorError;
use crate::model::{Clock, SystemClock};
use crate::phases::health::{AlwaysPass, HealthChecker};

/// Every collaborator a pass needs, wired once and passed explicitly. Cheap
/// to clone; all components are shared.
#[derive(Clone)]
pub struct Services {
    pub config: Arc<OrchestratorConfig>,
    pub compute: Arc<dyn ComputeClient>,
    pub scheduler: Arc<dyn SchedulerClient>,
    pub inventory: Arc<dyn InventoryClient>,
    pub health: Arc<dyn HealthChecker>,
    pub audit: Arc<dyn AuditSink>,
    pub clock: Arc<dyn Clock>,
    pub cancel: CancellationToken,
    pub dry_run: bool,
}

impl Services {
    /// Wires the live collaborators for the configured tenancy.
    pub fn live(
        config: OrchestratorConfig,
        audit: Arc<dyn AuditSink>,
        dry_run: bool,
    ) -> Result<Services, OrchestratorError> {
        let compute = Arc::new(OciCliCompute::new(&config)?);
        let scheduler = Arc::new(ScontrolScheduler::new(&config));
        let inventory: Arc<dyn InventoryClient> = if config.inventory_command.is_empty() {
            Arc::new(OciDisplayNameInventory::new(&config))
        } else {
            Arc::new(CliInventory::new(
                config.inventory_command.clone(),
                config.call_timeout(),
            )?)
        };
        Ok(Services {
            config: Arc::new(config),
            compute,
            scheduler,
            inventory,
            health: Arc::new(AlwaysPass),
            audit,
            clock: Arc::new(SystemClock),
            cancel: CancellationToken::new(),
            dry_run,
        })
    }
}

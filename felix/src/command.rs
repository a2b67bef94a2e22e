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

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};

#[derive(Parser, Debug)]
#[command(
    name = "felix",
    version,
    about = "Maintenance orchestrator for HPC compute nodes",
    rename_all = "kebab-case"
)]
pub struct FelixCommand {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long, global = true, value_name = "FILE", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// One full pass: discover, drain, schedule, track, health, finalize.
    Run {
        #[arg(long)]
        dry_run: bool,
    },
    /// Repeated passes at the configured interval until interrupted.
    Loop {
        #[arg(long)]
        dry_run: bool,
    },
    /// Truncated pass: discover, drain and schedule only.
    Stage {
        #[arg(long)]
        dry_run: bool,
    },
    /// Reconcile events already past SCHEDULED that carry the processed tag.
    Catchup {
        /// Narrow the pass to a single host.
        #[arg(long, value_name = "HOSTNAME")]
        host: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },
    /// Read-only view of the current maintenance events.
    Discover {
        /// Emit JSON instead of a table, to a file or `-` for stdout.
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "-")]
        json: Option<String>,

        /// Include events that are not actionable in this pass.
        #[arg(long)]
        all: bool,
    },
    /// Read-only fleet maintenance report.
    Report {
        #[arg(long)]
        include_canceled: bool,

        /// Exclude events in the given lifecycle state; repeatable.
        #[arg(short = 'x', long = "exclude", value_name = "STATE")]
        exclude: Vec<String>,

        /// Emit JSON instead of a table, to a file or `-` for stdout.
        #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "-")]
        json: Option<String>,
    },
    /// Run only the drain phase for one host.
    Drain { hostname: String },
    /// Run only the maintenance-tracking phase for one host.
    Maintenance { hostname: String },
    /// Run only the health phase for one host.
    Health { hostname: String },
    /// Run only the finalize phase for one host.
    Finalize { hostname: String },
}

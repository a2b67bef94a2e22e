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

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use felix::audit::{JsonlAuditSink, NoopAuditSink};
use felix::command::{Command, FelixCommand};
use felix::config::OrchestratorConfig;
use felix::error::OrchestratorError;
use felix::model::{HostState, SystemClock};
use felix::orchestrator::{Orchestrator, PassMode, PassSummary, SinglePhase};
use felix::phases::discovery::ObservedEvent;
use felix::report::{self, EventFilter};
use felix::services::Services;

fn main() -> ExitCode {
    let cmd = FelixCommand::parse();

    let config = match OrchestratorConfig::load(cmd.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", format!("error: {err}").red());
            return ExitCode::from(1);
        }
    };

    init_tracing(&config, &cmd.verbosity);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
        .block_on(async_main(cmd, config))
}

fn init_tracing(config: &OrchestratorConfig, verbosity: &Verbosity<InfoLevel>) {
    let directive = config
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| verbosity.tracing_level_filter().to_string().to_lowercase());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &config.log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    let _ = std::fs::create_dir_all(parent);
                }
            }
            match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => builder.with_ansi(false).with_writer(Arc::new(file)).init(),
                Err(err) => {
                    eprintln!(
                        "{}",
                        format!("cannot open log file {}: {err}", path.display()).red()
                    );
                    builder.with_writer(std::io::stderr).init();
                }
            }
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
}

async fn async_main(cmd: FelixCommand, config: OrchestratorConfig) -> ExitCode {
    match handle(cmd.command, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", format!("error: {err:#}").red());
            let fatal = err
                .downcast_ref::<OrchestratorError>()
                .map(OrchestratorError::is_fatal)
                .unwrap_or(false);
            ExitCode::from(if fatal { 1 } else { 2 })
        }
    }
}

async fn handle(command: Command, config: OrchestratorConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run { dry_run } => {
            let orchestrator = live_orchestrator(config, dry_run)?;
            let summary = orchestrator.run_pass(PassMode::Full).await?;
            finish_pass(&summary)
        }
        Command::Stage { dry_run } => {
            let orchestrator = live_orchestrator(config, dry_run)?;
            let summary = orchestrator.run_pass(PassMode::Stage).await?;
            finish_pass(&summary)
        }
        Command::Catchup { host, dry_run } => {
            let orchestrator = live_orchestrator(config, dry_run)?;
            let summary = orchestrator.run_pass(PassMode::Catchup { host }).await?;
            finish_pass(&summary)
        }
        Command::Loop { dry_run } => {
            let orchestrator = live_orchestrator(config, dry_run)?;
            let cancel = orchestrator.services().cancel.clone();
            let interval = orchestrator.services().config.loop_interval();
            let mut any_failures = false;
            loop {
                match orchestrator.run_pass(PassMode::Full).await {
                    Ok(summary) => {
                        any_failures |= summary.has_failures();
                        report::print_outcomes(&summary.outcomes)?;
                    }
                    Err(err) if err.is_fatal() => return Err(err.into()),
                    Err(err) => {
                        any_failures = true;
                        warn!("pass failed: {err}");
                    }
                }
                if cancel.is_cancelled() {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("loop stopped");
            Ok(if any_failures {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            })
        }
        Command::Discover { json, all } => {
            let orchestrator = read_only_orchestrator(config)?;
            let observed = orchestrator.observe().await?;
            let filter = EventFilter {
                include_canceled: true,
                exclude_states: Vec::new(),
                all,
            };
            output_events(&report::filter_events(&observed, &filter), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Report {
            include_canceled,
            exclude,
            json,
        } => {
            let orchestrator = read_only_orchestrator(config)?;
            let observed = orchestrator.observe().await?;
            let filter = EventFilter {
                include_canceled,
                exclude_states: exclude,
                all: true,
            };
            output_events(&report::filter_events(&observed, &filter), json)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Drain { hostname } => single_phase(config, SinglePhase::Drain, &hostname).await,
        Command::Maintenance { hostname } => {
            single_phase(config, SinglePhase::Maintenance, &hostname).await
        }
        Command::Health { hostname } => single_phase(config, SinglePhase::Health, &hostname).await,
        Command::Finalize { hostname } => {
            single_phase(config, SinglePhase::Finalize, &hostname).await
        }
    }
}

fn live_orchestrator(
    config: OrchestratorConfig,
    dry_run: bool,
) -> Result<Orchestrator, OrchestratorError> {
    let audit = JsonlAuditSink::open(&config.events_log_file, Arc::new(SystemClock))
        .map_err(|err| {
            OrchestratorError::Config(format!(
                "cannot open audit log {}: {err}",
                config.events_log_file.display()
            ))
        })?;
    let services = Services::live(config, Arc::new(audit), dry_run)?;
    spawn_signal_handler(services.cancel.clone());
    Ok(Orchestrator::new(services))
}

fn read_only_orchestrator(config: OrchestratorConfig) -> Result<Orchestrator, OrchestratorError> {
    let services = Services::live(config, Arc::new(NoopAuditSink), true)?;
    Ok(Orchestrator::new(services))
}

async fn single_phase(
    config: OrchestratorConfig,
    phase: SinglePhase,
    hostname: &str,
) -> anyhow::Result<ExitCode> {
    let orchestrator = live_orchestrator(config, false)?;
    let outcome = orchestrator.run_single_phase(phase, hostname).await?;
    report::print_outcomes(std::slice::from_ref(&outcome))?;
    Ok(if outcome.terminal == HostState::Failed {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn finish_pass(summary: &PassSummary) -> anyhow::Result<ExitCode> {
    report::print_outcomes(&summary.outcomes)?;
    Ok(if summary.has_failures() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}

fn output_events(observed: &[ObservedEvent], json: Option<String>) -> anyhow::Result<()> {
    match json {
        Some(target) => {
            let rendered = serde_json::to_string_pretty(observed)?;
            if target == "-" {
                println!("{rendered}");
            } else {
                std::fs::write(&target, rendered)?;
                info!("wrote {} events to {target}", observed.len());
            }
        }
        None => report::print_events(observed)?,
    }
    Ok(())
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(err) => {
                    warn!("cannot install SIGTERM handler: {err}");
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("shutdown requested, draining in-flight work");
        cancel.cancel();
    });
}

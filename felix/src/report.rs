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

use std::collections::BTreeMap;

use chrono::SecondsFormat;
use cli_table::{print_stdout, Cell, Style, Table};
use colored::Colorize;

use crate::model::{HostOutcome, HostState, LifecycleState};
use crate::phases::discovery::{Disposition, ObservedEvent};

/// Filters for the read-only `discover` and `report` views.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// Include CANCELED events (excluded by default in `report`).
    pub include_canceled: bool,
    /// Lifecycle state names to exclude.
    pub exclude_states: Vec<String>,
    /// Include events outside the actionable set.
    pub all: bool,
}

pub fn filter_events(observed: &[ObservedEvent], filter: &EventFilter) -> Vec<ObservedEvent> {
    observed
        .iter()
        .filter(|entry| {
            if !filter.include_canceled
                && entry.event.lifecycle_state == LifecycleState::Canceled
            {
                return false;
            }
            if filter
                .exclude_states
                .iter()
                .any(|state| {
                    state.eq_ignore_ascii_case(&entry.event.lifecycle_state.to_string())
                })
            {
                return false;
            }
            if !filter.all && entry.disposition == Disposition::NotActionable {
                return false;
            }
            true
        })
        .cloned()
        .collect()
}

pub fn print_events(observed: &[ObservedEvent]) -> std::io::Result<()> {
    if observed.is_empty() {
        println!("{}", "no maintenance events".dimmed());
        return Ok(());
    }

    let rows: Vec<Vec<cli_table::CellStruct>> = observed
        .iter()
        .map(|entry| {
            vec![
                entry.event.event_id.as_str().cell(),
                entry.hostname.as_deref().unwrap_or("-").cell(),
                entry
                    .event
                    .fault_ids
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(",")
                    .cell(),
                entry.event.lifecycle_state.to_string().cell(),
                entry
                    .event
                    .time_window_start
                    .map(|window| window.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_else(|| "-".to_string())
                    .cell(),
                entry.disposition.to_string().cell(),
            ]
        })
        .collect();

    let table = rows.table().title(vec![
        "EVENT".cell().bold(true),
        "HOST".cell().bold(true),
        "FAULTS".cell().bold(true),
        "STATE".cell().bold(true),
        "WINDOW START".cell().bold(true),
        "DISPOSITION".cell().bold(true),
    ]);
    print_stdout(table)?;

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for entry in observed {
        *counts
            .entry(entry.event.lifecycle_state.to_string())
            .or_default() += 1;
    }
    let summary = counts
        .iter()
        .map(|(state, count)| format!("{state}={count}"))
        .collect::<Vec<_>>()
        .join(" ");
    println!("{} {summary}", "events:".bold());
    Ok(())
}

pub fn print_outcomes(outcomes: &[HostOutcome]) -> std::io::Result<()> {
    if outcomes.is_empty() {
        println!("{}", "no hosts processed".dimmed());
        return Ok(());
    }

    let rows: Vec<Vec<cli_table::CellStruct>> = outcomes
        .iter()
        .map(|outcome| {
            let result = match outcome.terminal {
                HostState::Done => outcome.terminal.to_string().green().to_string(),
                HostState::Skipped => outcome.terminal.to_string().yellow().to_string(),
                _ => outcome.terminal.to_string().red().to_string(),
            };
            vec![
                outcome.hostname.as_str().cell(),
                outcome.event_id.as_str().cell(),
                result.cell(),
                outcome
                    .error
                    .as_ref()
                    .map(|error| error.kind.as_str())
                    .unwrap_or("-")
                    .cell(),
                outcome
                    .error
                    .as_ref()
                    .map(|error| error.detail.as_str())
                    .unwrap_or("-")
                    .cell(),
            ]
        })
        .collect();

    let table = rows.table().title(vec![
        "HOST".cell().bold(true),
        "EVENT".cell().bold(true),
        "RESULT".cell().bold(true),
        "KIND".cell().bold(true),
        "DETAIL".cell().bold(true),
    ]);
    print_stdout(table)
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use test_r::test;

    use super::*;
    use crate::model::MaintenanceEvent;

    fn observed(state: LifecycleState, disposition: Disposition) -> ObservedEvent {
        ObservedEvent {
            event: MaintenanceEvent {
                event_id: format!("ev-{state}"),
                instance_id: "inst-1".to_string(),
                compartment_id: "cmp-1".to_string(),
                fault_ids: BTreeSet::new(),
                lifecycle_state: state,
                time_window_start: None,
                freeform_tags: BTreeMap::new(),
            },
            hostname: None,
            disposition,
        }
    }

    #[test]
    fn canceled_events_are_hidden_unless_requested() {
        let events = vec![
            observed(LifecycleState::Scheduled, Disposition::Eligible),
            observed(LifecycleState::Canceled, Disposition::NotActionable),
        ];

        let filter = EventFilter {
            all: true,
            ..EventFilter::default()
        };
        assert_eq!(filter_events(&events, &filter).len(), 1);

        let filter = EventFilter {
            all: true,
            include_canceled: true,
            ..EventFilter::default()
        };
        assert_eq!(filter_events(&events, &filter).len(), 2);
    }

    #[test]
    fn state_exclusions_are_case_insensitive() {
        let events = vec![
            observed(LifecycleState::Scheduled, Disposition::Eligible),
            observed(LifecycleState::Succeeded, Disposition::NotActionable),
        ];
        let filter = EventFilter {
            all: true,
            exclude_states: vec!["succeeded".to_string()],
            ..EventFilter::default()
        };
        let filtered = filter_events(&events, &filter);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].event.lifecycle_state, LifecycleState::Scheduled);
    }

    #[test]
    fn non_actionable_events_need_the_all_flag() {
        let events = vec![
            observed(LifecycleState::Scheduled, Disposition::Eligible),
            observed(LifecycleState::Started, Disposition::NotActionable),
        ];
        assert_eq!(filter_events(&events, &EventFilter::default()).len(), 1);
        let filter = EventFilter {
            all: true,
            ..EventFilter::default()
        };
        assert_eq!(filter_events(&events, &filter).len(), 2);
    }
}

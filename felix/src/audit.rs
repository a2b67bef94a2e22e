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

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::SecondsFormat;
use serde_json::{Map, Value};
use tracing::error;

use crate::model::Clock;

/// One line of the append-only audit log. `ts` is stamped by the sink at
/// append time so the per-host record sequence is monotonic.
#[derive(Clone, Debug)]
pub struct AuditRecord {
    pub phase: String,
    pub action: String,
    pub host: String,
    pub extra: Map<String, Value>,
}

impl AuditRecord {
    pub fn new(phase: &str, action: &str, host: &str) -> Self {
        Self {
            phase: phase.to_string(),
            action: action.to_string(),
            host: host.to_string(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Marks the record as describing an elided mutating call.
    pub fn dry(self, dry_run: bool) -> Self {
        if dry_run {
            self.with("dry", true)
        } else {
            self
        }
    }

    pub fn is_dry(&self) -> bool {
        self.extra.get("dry").and_then(Value::as_bool).unwrap_or(false)
    }

    fn to_json(&self, ts: String) -> Value {
        let mut fields = Map::new();
        fields.insert("ts".to_string(), Value::String(ts));
        fields.insert("phase".to_string(), Value::String(self.phase.clone()));
        fields.insert("action".to_string(), Value::String(self.action.clone()));
        fields.insert("host".to_string(), Value::String(self.host.clone()));
        fields.extend(self.extra.clone());
        Value::Object(fields)
    }
}

pub trait AuditSink: Send + Sync {
    fn append(&self, record: AuditRecord);
}

/// Newline-delimited JSON sink. Appends are serialized by the mutex; the
/// critical section is a single line write plus flush.
pub struct JsonlAuditSink {
    clock: Arc<dyn Clock>,
    file: Mutex<File>,
}

impl JsonlAuditSink {
    pub fn open(path: &Path, clock: Arc<dyn Clock>) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            clock,
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: AuditRecord) {
        let ts = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = record.to_json(ts);
        let mut file = self.file.lock().expect("audit sink mutex poisoned");
        if let Err(err) = writeln!(file, "{line}").and_then(|_| file.flush()) {
            error!("failed to append audit record: {err}");
        }
    }
}

/// Collects records in memory; used by tests and available for embedding.
#[derive(Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().expect("audit sink mutex poisoned").clone()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, record: AuditRecord) {
        self.records
            .lock()
            .expect("audit sink mutex poisoned")
            .push(record);
    }
}

/// Sink for read-only commands, which must not touch the audit log.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn append(&self, _record: AuditRecord) {}
}

// ABOUTME: Defines Entry and Stage, the persisted record of one unit of work and its steps.
// ABOUTME: Provides the multi-line log rendering and the JSON read views built from a type registry.

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::crash::CrashReport;
use crate::model_type::{self, TypeRegistry};

/// One recorded unit of work: a chain of stages in the order they were
/// appended, plus origin metadata and overall timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub id: Ulid,
    pub host: String,
    pub service: String,
    pub start: DateTime<Utc>,
    pub total: Duration,
    pub chain: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<BTreeMap<String, String>>,
}

/// One step of an entry's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub wait: Duration,
    pub text: String,
    pub entity_type: i32,
    pub entity_id: String,
    pub verbosity: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Box<CrashReport>>,
}

impl Entry {
    /// A fresh, empty entry with a new id, started now.
    pub fn new(host: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            id: Ulid::new(),
            host: host.into(),
            service: service.into(),
            start: Utc::now(),
            total: Duration::ZERO,
            chain: Vec::new(),
            debug: None,
        }
    }

    /// True when any stage references a crash report.
    pub fn is_crashed(&self) -> bool {
        self.chain
            .iter()
            .any(|stage| stage.entity_type == model_type::CRASH)
    }

    /// Crash reports embedded in the chain, in chain order.
    pub fn failures(&self) -> impl Iterator<Item = &CrashReport> {
        self.chain.iter().filter_map(|stage| stage.failure.as_deref())
    }

    pub fn view(&self, types: &TypeRegistry) -> EntryView {
        let stages: Vec<StageView> = self
            .chain
            .iter()
            .map(|stage| StageView {
                wait: stage.wait,
                name: stage.text.clone(),
                entity_type: stage
                    .references()
                    .then(|| types.name(stage.entity_type).into_owned()),
                entity_id: stage.references().then(|| stage.entity_id.clone()),
            })
            .collect();

        EntryView {
            id: self.id.to_string(),
            start: self.start,
            total: self.total,
            name: stages.first().map(|s| s.name.clone()).unwrap_or_default(),
            stages,
        }
    }

    pub fn monitoring(&self, types: &TypeRegistry) -> EntryMonitoring {
        let stages: Vec<StageMonitoring> = self
            .chain
            .iter()
            .map(|stage| StageMonitoring {
                wait: format!("{:?}", stage.wait),
                name: stage.text.clone(),
                time: duration_nanos(stage.wait),
                entity_type: stage
                    .references()
                    .then(|| types.name(stage.entity_type).into_owned()),
                entity_id: stage.references().then(|| stage.entity_id.clone()),
            })
            .collect();

        EntryMonitoring {
            id: self.id.to_string(),
            host: self.host.clone(),
            service: self.service.clone(),
            total: format!("{:?}", self.total),
            time: duration_nanos(self.total),
            name: stages.first().map(|s| s.name.clone()).unwrap_or_default(),
            start: self.start,
            stages,
        }
    }
}

impl Stage {
    /// A stage with only text; entity fields stay empty.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// A stage referencing another stored record. An empty id degrades to a
    /// plain text stage.
    pub fn model(entity_type: i32, entity_id: impl Into<String>, text: impl Into<String>) -> Self {
        let entity_id = entity_id.into();
        let entity_type = if entity_id.is_empty() {
            model_type::UNKNOWN
        } else {
            entity_type
        };

        Self {
            text: text.into(),
            entity_type,
            entity_id,
            ..Self::default()
        }
    }

    /// A stage carrying a crash report. Entity fields are derived from the
    /// report so the stage is indexed under the report's id.
    pub fn failure(report: CrashReport) -> Self {
        Self {
            text: report.to_string(),
            entity_type: model_type::CRASH,
            entity_id: report.id.to_string(),
            failure: Some(Box::new(report)),
            ..Self::default()
        }
    }

    pub fn references(&self) -> bool {
        !self.entity_id.is_empty()
    }
}

impl Entry {
    /// The multi-line log rendering with entity types shown by name.
    pub fn render(&self, types: &TypeRegistry) -> String {
        let mut out = String::new();
        let _ = write_entry(&mut out, self, Some(types));
        out.truncate(out.trim_end().len());
        out
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_entry(f, self, None)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stage(f, self, None)
    }
}

fn write_entry(w: &mut impl Write, entry: &Entry, types: Option<&TypeRegistry>) -> fmt::Result {
    writeln!(
        w,
        "Entry: {} Host: {} Start: {} Service: {}",
        entry.id,
        entry.host,
        entry.start.to_rfc3339_opts(SecondsFormat::Nanos, true),
        entry.service
    )?;

    for stage in &entry.chain {
        write_stage(w, stage, types)?;
        w.write_char('\n')?;
    }

    writeln!(w, "Total: {:?}", entry.total)
}

fn write_stage(w: &mut impl Write, stage: &Stage, types: Option<&TypeRegistry>) -> fmt::Result {
    const WAIT_WIDTH: usize = 16;
    const ENTITY_WIDTH: usize = 54;

    let mut reference = String::new();
    if stage.references() {
        match types {
            Some(types) => write!(
                reference,
                "{} ({}) ",
                stage.entity_id,
                types.name(stage.entity_type)
            )?,
            None => write!(reference, "{} ({}) ", stage.entity_id, stage.entity_type)?,
        }
    }

    let wait = format!("{:?} ", stage.wait);
    write!(
        w,
        "+ {:<wait_width$}{:<entity_width$}",
        wait,
        reference,
        wait_width = WAIT_WIDTH,
        entity_width = ENTITY_WIDTH
    )?;

    match &stage.failure {
        Some(report) => write!(w, "{:#}", report),
        None => w.write_str(&stage.text),
    }
}

/// API view of an entry, named after its first stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryView {
    pub id: String,
    pub start: DateTime<Utc>,
    pub total: Duration,
    pub name: String,
    pub stages: Vec<StageView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageView {
    pub wait: Duration,
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(rename = "enid", default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

/// Monitoring view of an entry with human-readable and nanosecond timings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMonitoring {
    pub id: String,
    pub host: String,
    pub service: String,
    pub total: String,
    pub time: u64,
    pub name: String,
    pub start: DateTime<Utc>,
    pub stages: Vec<StageMonitoring>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageMonitoring {
    pub wait: String,
    pub name: String,
    pub time: u64,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    #[serde(rename = "enid", default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model_type::ModelType;

    fn make_entry() -> Entry {
        let mut entry = Entry::new("host-1", "billing");
        entry.chain.push(Stage {
            wait: Duration::from_millis(3),
            ..Stage::text("request received")
        });
        entry.chain.push(Stage {
            wait: Duration::from_micros(1500),
            ..Stage::model(10, "INV-7", "invoice loaded")
        });
        entry.total = Duration::from_millis(5);
        entry
    }

    #[test]
    fn model_stage_with_empty_id_is_plain() {
        let stage = Stage::model(10, "", "nothing referenced");
        assert_eq!(stage.entity_type, model_type::UNKNOWN);
        assert!(!stage.references());
    }

    #[test]
    fn display_renders_header_stages_and_total() {
        let entry = make_entry();
        let text = entry.to_string();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(&format!("Entry: {} Host: host-1", entry.id)));
        assert!(lines[0].ends_with("Service: billing"));
        assert!(lines[1].starts_with("+ 3ms"));
        assert!(lines[1].ends_with("request received"));
        assert!(lines[2].contains("INV-7 (10) "));
        assert_eq!(lines[3], "Total: 5ms");
    }

    #[test]
    fn render_names_types_and_drops_trailing_newline() {
        let types = TypeRegistry::new().with([ModelType::new(10, "invoice")]);
        let text = make_entry().render(&types);

        assert!(text.contains("INV-7 (invoice) "));
        assert!(text.ends_with("Total: 5ms"));
    }

    #[test]
    fn view_uses_registry_names() {
        let types = TypeRegistry::new().with([ModelType::new(10, "invoice")]);
        let view = make_entry().view(&types);

        assert_eq!(view.name, "request received");
        assert_eq!(view.stages[0].entity_type, None);
        assert_eq!(view.stages[1].entity_type.as_deref(), Some("invoice"));
        assert_eq!(view.stages[1].entity_id.as_deref(), Some("INV-7"));
    }

    #[test]
    fn monitoring_reports_nanoseconds() {
        let monitoring = make_entry().monitoring(&TypeRegistry::new());
        assert_eq!(monitoring.time, 5_000_000);
        assert_eq!(monitoring.total, "5ms");
        assert_eq!(monitoring.stages[1].entity_type.as_deref(), Some("10"));
    }

    #[test]
    fn serde_round_trip_keeps_optional_fields() {
        let mut entry = make_entry();
        entry.debug = Some(BTreeMap::from([("user".to_string(), "42".to_string())]));

        let json = serde_json::to_string(&entry).unwrap();
        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}

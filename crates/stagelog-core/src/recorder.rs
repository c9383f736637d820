// ABOUTME: Concurrency-safe builder of a stage chain for one unit of work.
// ABOUTME: Journal holds the shared collaborators; Recorder appends stages and persists on close.

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use ulid::Ulid;

use crate::config::StagelogConfig;
use crate::crash::CrashReport;
use crate::diff::json_diff;
use crate::entry::{Entry, Stage};
use crate::model_type::{self, ModelType, TypeRegistry};
use crate::sink::{LogSink, TracingSink};
use crate::taxonomy::Taxonomy;

pub type DriverError = Box<dyn Error + Send + Sync + 'static>;

/// Persists closed entries. The only storage entry point the recorder uses.
pub trait Driver: Send + Sync {
    fn insert_entry(&self, entry: &Entry) -> Result<(), DriverError>;
}

/// Called after every recorded crash with the report and the chain so far.
pub type CrashHandler = Arc<dyn Fn(&CrashReport, &[Stage]) + Send + Sync>;

struct Shared {
    service: String,
    host: String,
    max_verbosity: i32,
    save_only_errors: bool,
    taxonomy: Arc<Taxonomy>,
    driver: Option<Arc<dyn Driver>>,
    sink: Arc<dyn LogSink>,
    types: Arc<TypeRegistry>,
}

/// Long-lived recorder factory shared by every unit of work of a service.
#[derive(Clone)]
pub struct Journal {
    shared: Arc<Shared>,
}

impl fmt::Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("service", &self.shared.service)
            .field("host", &self.shared.host)
            .field("max_verbosity", &self.shared.max_verbosity)
            .field("save_only_errors", &self.shared.save_only_errors)
            .field("persistent", &self.shared.driver.is_some())
            .finish()
    }
}

pub struct JournalBuilder {
    service: String,
    host: String,
    max_verbosity: i32,
    save_only_errors: bool,
    taxonomy: Arc<Taxonomy>,
    driver: Option<Arc<dyn Driver>>,
    sink: Arc<dyn LogSink>,
    types: Arc<TypeRegistry>,
}

impl JournalBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn max_verbosity(mut self, max: i32) -> Self {
        self.max_verbosity = max;
        self
    }

    pub fn save_only_errors(mut self, opt: bool) -> Self {
        self.save_only_errors = opt;
        self
    }

    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn types(mut self, types: Arc<TypeRegistry>) -> Self {
        self.types = types;
        self
    }

    pub fn build(self) -> Journal {
        Journal {
            shared: Arc::new(Shared {
                service: self.service,
                host: self.host,
                max_verbosity: self.max_verbosity,
                save_only_errors: self.save_only_errors,
                taxonomy: self.taxonomy,
                driver: self.driver,
                sink: self.sink,
                types: self.types,
            }),
        }
    }
}

impl Journal {
    /// Start configuring a journal for `service`. Without a driver, closed
    /// entries are only logged; without a sink, they go to `tracing`.
    pub fn builder(service: impl Into<String>, taxonomy: Arc<Taxonomy>) -> JournalBuilder {
        JournalBuilder {
            service: service.into(),
            host: "localhost".to_string(),
            max_verbosity: 0,
            save_only_errors: false,
            taxonomy,
            driver: None,
            sink: Arc::new(TracingSink),
            types: Arc::new(TypeRegistry::new()),
        }
    }

    /// A builder preloaded with the service, host, verbosity and save
    /// policy from `config`.
    pub fn from_config(config: &StagelogConfig, taxonomy: Arc<Taxonomy>) -> JournalBuilder {
        Self::builder(config.service.clone(), taxonomy)
            .host(config.host.clone())
            .max_verbosity(config.max_verbosity)
            .save_only_errors(config.save_only_errors)
    }

    /// A fresh recorder whose clock starts now.
    pub fn recorder(&self) -> Recorder {
        Recorder::new(self.clone(), self.shared.save_only_errors, Vec::new())
    }

    pub fn service(&self) -> &str {
        &self.shared.service
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.shared.types
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.shared.taxonomy
    }
}

struct ChainState {
    point: Instant,
    stages: Vec<Stage>,
    level: i32,
    crashed: bool,
    save_only_errors: bool,
    debug: Option<BTreeMap<String, String>>,
    handlers: Vec<CrashHandler>,
}

/// Records one unit of work. Every method takes `&self` and is safe to call
/// from many threads; stages land in the order the internal lock is taken.
/// `close` consumes the recorder, so an entry is produced exactly once.
pub struct Recorder {
    journal: Journal,
    start: Instant,
    started_at: DateTime<Utc>,
    state: Mutex<ChainState>,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Recorder")
            .field("service", &self.journal.shared.service)
            .field("started_at", &self.started_at)
            .field("stages", &state.stages.len())
            .field("crashed", &state.crashed)
            .finish()
    }
}

impl Recorder {
    fn new(journal: Journal, save_only_errors: bool, handlers: Vec<CrashHandler>) -> Self {
        let start = Instant::now();
        Self {
            journal,
            start,
            started_at: Utc::now(),
            state: Mutex::new(ChainState {
                point: start,
                stages: Vec::with_capacity(16),
                level: 0,
                crashed: false,
                save_only_errors,
                debug: None,
                handlers,
            }),
        }
    }

    /// Verbosity gate. When `level` is within the journal's maximum, it is
    /// stamped on the next stage and `true` is returned.
    pub fn v(&self, level: i32) -> bool {
        if level > self.journal.shared.max_verbosity {
            return false;
        }
        self.state.lock().level = level;
        true
    }

    /// Append a plain text stage.
    pub fn print(&self, text: impl Into<String>) {
        self.append(Stage::text(text));
    }

    /// Append a stage referencing an entity. An empty `id` is a plain print.
    pub fn model(&self, model: &ModelType, id: &str, text: impl Into<String>) {
        self.append(Stage::model(model.id(), id, text));
    }

    /// Append one stage per item, each holding the item serialised as
    /// tab-indented JSON. Serialisation failures are recorded as crashes.
    pub fn dump<T: Serialize>(&self, model: &ModelType, id: &str, items: &[T]) {
        for item in items {
            match to_tabbed_json(item) {
                Ok(json) => self.model(model, id, json),
                Err(err) => {
                    self.crash(Some(&err));
                }
            }
        }
    }

    /// Append a stage describing what changed between `old` and `new`.
    /// Nothing is recorded when they serialise identically.
    pub fn diff<T: Serialize>(&self, model: &ModelType, id: &str, old: &T, new: &T) {
        let values = serde_json::to_value(old).and_then(|a| Ok((a, serde_json::to_value(new)?)));

        match values {
            Ok((old, new)) => {
                let diff = json_diff(&old, &new);
                if !diff.is_empty() {
                    self.model(model, id, diff.trim());
                }
            }
            Err(err) => {
                self.crash(Some(&err));
            }
        }
    }

    /// Resolve `err` through the taxonomy and append it as a crash stage.
    /// Returns `None` (and records nothing) when there is no error.
    pub fn crash(&self, err: Option<&(dyn Error + 'static)>) -> Option<CrashReport> {
        let mut report = self.journal.shared.taxonomy.report(err)?;
        report.service = self.journal.shared.service.clone();

        let (handlers, chain) = {
            let mut state = self.state.lock();
            report.debug = state.debug.clone();
            push(&mut state, Stage::failure(report.clone()));
            (state.handlers.clone(), state.stages.clone())
        };

        for handler in &handlers {
            handler(&report, &chain);
        }

        Some(report)
    }

    /// Merge debug values that are attached to every crash report and to
    /// the entry when it crashed. Later values overwrite earlier ones.
    pub fn debug(&self, values: BTreeMap<String, String>) {
        let mut state = self.state.lock();
        state.debug.get_or_insert_with(BTreeMap::new).extend(values);
    }

    /// When set, the entry is persisted only if a crash was recorded.
    pub fn save_only_errors(&self, opt: bool) {
        self.state.lock().save_only_errors = opt;
    }

    pub fn on_crash(&self, handler: CrashHandler) {
        self.state.lock().handlers.push(handler);
    }

    pub fn is_crashed(&self) -> bool {
        self.state.lock().crashed
    }

    /// A new, empty recorder sharing this one's collaborators, save policy
    /// and crash handlers, with its own chain and clock.
    pub fn fork(&self) -> Recorder {
        let state = self.state.lock();
        Recorder::new(
            self.journal.clone(),
            state.save_only_errors,
            state.handlers.clone(),
        )
    }

    /// Finish the unit of work: build the entry, persist it through the
    /// driver, and emit it to the sink. A persistence failure is folded
    /// back into the chain as a crash rather than returned.
    pub fn close(self) -> Entry {
        let shared = Arc::clone(&self.journal.shared);
        let mut entry = self.snapshot();

        let (crashed, save_only_errors) = {
            let state = self.state.lock();
            (state.crashed, state.save_only_errors)
        };

        let persisted = match &shared.driver {
            Some(driver) if crashed || !save_only_errors => driver.insert_entry(&entry),
            _ => Ok(()),
        };

        if let Err(err) = persisted {
            tracing::warn!(entry = %entry.id, error = %err, "failed to persist journal entry");
            self.crash(Some(&*err as &(dyn Error + 'static)));
            let id = entry.id;
            entry = self.snapshot();
            entry.id = id;
        }

        let line = entry.render(&shared.types);
        if entry.is_crashed() {
            shared.sink.error(&line);
        } else {
            shared.sink.print(&line);
        }

        entry
    }

    fn append(&self, stage: Stage) {
        push(&mut self.state.lock(), stage);
    }

    fn snapshot(&self) -> Entry {
        let state = self.state.lock();
        let shared = &self.journal.shared;

        Entry {
            id: Ulid::new(),
            host: shared.host.clone(),
            service: shared.service.clone(),
            start: self.started_at,
            total: self.start.elapsed(),
            chain: state.stages.clone(),
            debug: if state.crashed {
                state.debug.clone()
            } else {
                None
            },
        }
    }
}

fn push(state: &mut ChainState, mut stage: Stage) {
    if let Some(report) = &stage.failure {
        stage.entity_type = model_type::CRASH;
        stage.entity_id = report.id.to_string();
    }
    if stage.entity_id.is_empty() {
        stage.entity_type = model_type::UNKNOWN;
    }

    let now = Instant::now();
    stage.verbosity = state.level;
    stage.wait = now.saturating_duration_since(state.point);
    state.point = now;
    state.crashed = state.crashed || stage.entity_type == model_type::CRASH;
    state.stages.push(stage);
    state.level = 0;
}

fn to_tabbed_json<T: Serialize>(item: &T) -> Result<String, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    item.serialize(&mut serializer)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

// ABOUTME: Core library for stagelog: journal entries, crash reports, error taxonomy, and the recorder.
// ABOUTME: Storage is reached only through the Driver trait so this crate has no database dependency.

pub mod config;
pub mod crash;
pub mod diff;
pub mod entry;
pub mod fault;
pub mod model_type;
pub mod recorder;
pub mod sink;
pub mod taxonomy;

pub use config::{ConfigError, StagelogConfig};
pub use crash::{CrashReport, ReportEntry};
pub use entry::{Entry, Stage};
pub use fault::{Fault, FaultKind, Trigger};
pub use model_type::{ModelType, TypeRegistry};
pub use recorder::{CrashHandler, Driver, DriverError, Journal, JournalBuilder, Recorder};
pub use sink::{LogSink, MemorySink, TracingSink};
pub use taxonomy::Taxonomy;

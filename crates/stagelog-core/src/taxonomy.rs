// ABOUTME: Priority-ordered registry mapping internal errors to external crash report templates.
// ABOUTME: The first registered template whose triggers match the error's cause chain wins.

use std::error::Error;

use chrono::Utc;
use parking_lot::RwLock;
use ulid::Ulid;

use crate::crash::{CrashReport, ReportEntry};
use crate::fault::{self, Fault, Trigger};

/// Title of the report produced when no template matches.
pub const UNKNOWN_TITLE: &str = "Request processing failed";

/// Status of the report produced when no template matches.
pub const UNKNOWN_STATUS: u16 = 500;

/// Priority number reserved for the fallback template.
pub const UNKNOWN_NUMBER: u32 = 9;

#[derive(Debug, Clone)]
struct Template {
    code: String,
    link: String,
    title: String,
    status: u16,
    triggers: Vec<Trigger>,
}

#[derive(Debug)]
struct Registry {
    templates: Vec<Template>,
}

/// Resolves errors to crash reports. Cheap to share behind an `Arc`;
/// `report` takes a read lock, `register` a write lock.
#[derive(Debug)]
pub struct Taxonomy {
    service: String,
    base_url: String,
    registry: RwLock<Registry>,
}

impl Taxonomy {
    /// `service` is the code fragment prefixed to every report code;
    /// `base_url` is the documentation page links point into.
    pub fn new(service: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            base_url: base_url.into(),
            registry: RwLock::new(Registry {
                templates: Vec::with_capacity(256),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Register a template. Registration order is priority order.
    ///
    /// # Panics
    ///
    /// When `status` is outside 400..600, `title` is empty, or `triggers`
    /// is empty. These are startup misconfigurations.
    pub fn register(
        &self,
        status: u16,
        number: u32,
        title: &str,
        triggers: impl IntoIterator<Item = Trigger>,
    ) {
        assert!(
            (400..600).contains(&status),
            "crash template status must be 4xx or 5xx, got {}",
            status
        );
        assert!(!title.is_empty(), "crash template title must not be empty");

        let triggers: Vec<Trigger> = triggers.into_iter().collect();
        assert!(
            !triggers.is_empty(),
            "crash template {} {} has no triggers",
            status,
            number
        );

        let code = self.code(status, number);
        let template = Template {
            link: self.link(&code),
            code,
            title: title.to_string(),
            status,
            triggers,
        };

        tracing::debug!(code = %template.code, "registered crash template");
        self.registry.write().templates.push(template);
    }

    /// Build a report for `err`, or `None` when there is no error.
    pub fn report(&self, err: Option<&(dyn Error + 'static)>) -> Option<CrashReport> {
        let err = err?;
        let template = self.resolve(err);

        let entries = fault::chain(err).map(entry_for).collect();

        Some(CrashReport {
            id: Ulid::new(),
            code: template.code,
            link: template.link,
            title: template.title,
            status: template.status,
            service: self.service.clone(),
            created: Utc::now(),
            entries,
            debug: None,
        })
    }

    fn resolve(&self, err: &(dyn Error + 'static)) -> Template {
        let registry = self.registry.read();

        let matched = registry
            .templates
            .iter()
            .find(|template| template.triggers.iter().any(|t| t.matches(err)));

        match matched {
            Some(template) => template.clone(),
            None => {
                let code = self.code(UNKNOWN_STATUS, UNKNOWN_NUMBER);
                Template {
                    link: self.link(&code),
                    code,
                    title: UNKNOWN_TITLE.to_string(),
                    status: UNKNOWN_STATUS,
                    triggers: Vec::new(),
                }
            }
        }
    }

    fn code(&self, status: u16, number: u32) -> String {
        format!("{}{}{}", self.service, status, number)
    }

    fn link(&self, code: &str) -> String {
        format!("{}#{}", self.base_url, code)
    }
}

fn entry_for(node: &(dyn Error + 'static)) -> ReportEntry {
    match node.downcast_ref::<Fault>() {
        Some(fault) => ReportEntry {
            text: fault.text().to_string(),
            detail: fault.detail().to_string(),
            stack: fault.stack().to_vec(),
            debug: fault.debug().clone(),
        },
        None => ReportEntry::new(node.to_string()),
    }
}

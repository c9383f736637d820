// ABOUTME: Defines CrashReport, the externally reportable form of an internal error chain.
// ABOUTME: Provides the RFC 7807 style external view, the monitoring view, and log formatting.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Link used in external views when a report has no documentation URL.
pub const BLANK_LINK: &str = "about:blank";

/// A structured error report: status class, stable code, and one entry per
/// node of the originating error chain (outermost cause first).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashReport {
    pub id: Ulid,
    pub code: String,
    pub link: String,
    pub title: String,
    pub status: u16,
    pub service: String,
    pub created: DateTime<Utc>,
    pub entries: Vec<ReportEntry>,
    pub debug: Option<BTreeMap<String, String>>,
}

/// One node of a crash report's cause chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub text: String,
    pub detail: String,
    pub stack: Vec<String>,
    pub debug: BTreeMap<String, String>,
}

impl ReportEntry {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// External view of a report. Never carries stacks or debug values, and
/// server-fault reports (status >= 500) never carry detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RfcView {
    pub id: String,
    pub code: String,
    #[serde(rename = "type")]
    pub link: String,
    pub title: String,
    pub status: u16,
    pub created: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

/// Full internal view of a report for monitoring dashboards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashMonitoring {
    pub id: String,
    pub status: u16,
    pub code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link: String,
    pub title: String,
    pub service: String,
    pub debug: BTreeMap<String, String>,
    pub created: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entries: Vec<ReportEntry>,
}

impl CrashReport {
    /// Join the non-empty details innermost-first with " => ".
    pub fn external_detail(&self) -> String {
        self.entries
            .iter()
            .rev()
            .filter(|entry| !entry.detail.is_empty())
            .map(|entry| entry.detail.as_str())
            .collect::<Vec<_>>()
            .join(" => ")
    }

    pub fn as_rfc(&self) -> RfcView {
        let link = if self.link.is_empty() {
            BLANK_LINK.to_string()
        } else {
            self.link.clone()
        };

        let detail = if self.status < 500 {
            self.external_detail()
        } else {
            String::new()
        };

        RfcView {
            id: self.id.to_string(),
            code: self.code.clone(),
            link,
            title: self.title.clone(),
            status: self.status,
            created: self.created.to_rfc3339_opts(SecondsFormat::Nanos, true),
            detail,
        }
    }

    pub fn monitoring(&self) -> CrashMonitoring {
        CrashMonitoring {
            id: self.id.to_string(),
            status: self.status,
            code: self.code.clone(),
            link: self.link.clone(),
            title: self.title.clone(),
            service: self.service.clone(),
            debug: self.debug.clone().unwrap_or_default(),
            created: self.created,
            entries: self.entries.clone(),
        }
    }
}

/// `{}` renders the headline only; `{:#}` adds every entry with its detail
/// and debug values, and the stack of each entry that has one.
impl fmt::Display for CrashReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[ {} ] {}", self.status, self.title)?;

        if !f.alternate() {
            return Ok(());
        }

        for entry in &self.entries {
            write!(f, "\n|-> {}", entry.text)?;
            if !entry.detail.is_empty() {
                write!(f, " ({})", entry.detail)?;
            }
            for (key, value) in &entry.debug {
                write!(f, "\n|   {}: {}", key, value)?;
            }
            if !entry.stack.is_empty() {
                write!(f, "\n|       {}", entry.stack.join("\n|       "))?;
            }
        }

        Ok(())
    }
}

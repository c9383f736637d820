// ABOUTME: Structured application error carrying the data a crash report entry needs.
// ABOUTME: Also defines trigger matching over std::error::Error source chains.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;

type BoxError = Box<dyn Error + Send + Sync + 'static>;

/// A sentinel identifying a class of failure. Two kinds are the same kind
/// when their names are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaultKind(&'static str);

impl FaultKind {
    pub const fn new(name: &'static str) -> Self {
        Self(name)
    }

    pub const fn name(&self) -> &'static str {
        self.0
    }

    /// Start a new fault of this kind whose message is `text`.
    pub fn fault(self, text: impl Into<String>) -> Fault {
        Fault::new(text).with_kind(self)
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// An error value with a human-readable message, an optional user-facing
/// detail, optional debug values and stack, and an optional wrapped cause.
#[derive(Debug)]
pub struct Fault {
    kind: Option<FaultKind>,
    text: String,
    detail: String,
    stack: Vec<String>,
    debug: BTreeMap<String, String>,
    source: Option<BoxError>,
}

impl Fault {
    /// Create a fault. A stack is captured when backtraces are enabled in
    /// the environment (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`).
    pub fn new(text: impl Into<String>) -> Self {
        let backtrace = Backtrace::capture();
        let stack = match backtrace.status() {
            BacktraceStatus::Captured => backtrace
                .to_string()
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Self {
            kind: None,
            text: text.into(),
            detail: String::new(),
            stack,
            debug: BTreeMap::new(),
            source: None,
        }
    }

    pub fn with_kind(mut self, kind: FaultKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }

    pub fn with_debug(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.debug.insert(key.into(), value.to_string());
        self
    }

    pub fn with_stack(mut self, stack: Vec<String>) -> Self {
        self.stack = stack;
        self
    }

    /// Wrap an underlying cause; it becomes the next node of the chain.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> Option<FaultKind> {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn detail(&self) -> &str {
        &self.detail
    }

    pub fn stack(&self) -> &[String] {
        &self.stack
    }

    pub fn debug(&self) -> &BTreeMap<String, String> {
        &self.debug
    }

    /// True when this fault, or any cause below it, is of the given kind.
    pub fn is(&self, kind: FaultKind) -> bool {
        Trigger::Kind(kind).matches(self)
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Error for Fault {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn Error + 'static))
    }
}

/// Something a registered crash template fires on.
#[derive(Clone, Copy)]
pub enum Trigger {
    /// Any `Fault` node of this kind.
    Kind(FaultKind),
    /// Any node for which the predicate holds.
    When(fn(&(dyn Error + 'static)) -> bool),
}

impl Trigger {
    /// Trigger on any node whose concrete type is `E`.
    pub fn of<E: Error + 'static>() -> Self {
        Trigger::When(is_type::<E>)
    }

    /// Does this trigger fire on `err` itself or on any cause in its chain?
    pub fn matches(&self, err: &(dyn Error + 'static)) -> bool {
        chain(err).any(|node| self.matches_node(node))
    }

    fn matches_node(&self, node: &(dyn Error + 'static)) -> bool {
        match self {
            Trigger::Kind(kind) => node
                .downcast_ref::<Fault>()
                .is_some_and(|fault| fault.kind == Some(*kind)),
            Trigger::When(predicate) => predicate(node),
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Kind(kind) => f.debug_tuple("Kind").field(kind).finish(),
            Trigger::When(_) => f.write_str("When(..)"),
        }
    }
}

impl From<FaultKind> for Trigger {
    fn from(kind: FaultKind) -> Self {
        Trigger::Kind(kind)
    }
}

fn is_type<E: Error + 'static>(node: &(dyn Error + 'static)) -> bool {
    node.is::<E>()
}

/// Iterate an error and its causes, outermost first.
pub fn chain<'a>(err: &'a (dyn Error + 'static)) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(Some(err), |&node: &&'a (dyn Error + 'static)| node.source())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOT_FOUND: FaultKind = FaultKind::new("not_found");
    const INTERNAL: FaultKind = FaultKind::new("internal");

    #[derive(Debug)]
    struct Plain;

    impl fmt::Display for Plain {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("plain failure")
        }
    }

    impl Error for Plain {}

    #[test]
    fn chain_walks_outermost_first() {
        let err = INTERNAL
            .fault("load failed")
            .with_source(NOT_FOUND.fault("row missing").with_source(Plain));

        let texts: Vec<String> = chain(&err).map(|node| node.to_string()).collect();
        assert_eq!(texts, vec!["load failed", "row missing", "plain failure"]);
    }

    #[test]
    fn kind_trigger_matches_any_ancestor() {
        let err = INTERNAL
            .fault("outer")
            .with_source(NOT_FOUND.fault("inner"));

        assert!(err.is(INTERNAL));
        assert!(err.is(NOT_FOUND));
        assert!(!err.is(FaultKind::new("other")));
    }

    #[test]
    fn type_trigger_matches_foreign_errors() {
        let err = INTERNAL.fault("outer").with_source(Plain);
        assert!(Trigger::of::<Plain>().matches(&err));
        assert!(!Trigger::of::<std::io::Error>().matches(&err));
    }

    #[test]
    fn kinds_compare_by_name() {
        assert_eq!(FaultKind::new("x"), FaultKind::new("x"));
        assert_ne!(FaultKind::new("x"), FaultKind::new("y"));
    }

    #[test]
    fn builder_sets_fields() {
        let fault = Fault::new("bad input")
            .with_detail("field `name` is empty")
            .with_debug("field", "name");

        assert_eq!(fault.text(), "bad input");
        assert_eq!(fault.detail(), "field `name` is empty");
        assert_eq!(fault.debug().get("field").map(String::as_str), Some("name"));
        assert!(fault.kind().is_none());
        assert!(fault.source().is_none());
    }
}

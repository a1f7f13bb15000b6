//! Failure classification.
//!
//! # Responsibilities
//! - Decide whether an error from the protected call counts as a failure,
//!   counts as a success, or is ignored entirely
//! - Hold named predicates that configuration fragments refer to by key
//!
//! # Rules (first match wins)
//! ```text
//! kind in ignore list          → Ignored
//! kind in record list          → Failure
//! predicate configured         → predicate(error) ? Failure : Success
//! otherwise                    → Failure
//! ```

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;

use serde::Serialize;

/// An error returned by a protected call.
///
/// `kind` is the stable identifier matched against the `record_exceptions`
/// and `ignore_exceptions` lists.
pub trait CallError: fmt::Display {
    fn kind(&self) -> &str;
}

impl CallError for String {
    fn kind(&self) -> &str {
        self
    }
}

impl CallError for &str {
    fn kind(&self) -> &str {
        self
    }
}

impl CallError for io::Error {
    fn kind(&self) -> &str {
        match io::Error::kind(self) {
            io::ErrorKind::NotFound => "not_found",
            io::ErrorKind::PermissionDenied => "permission_denied",
            io::ErrorKind::ConnectionRefused => "connection_refused",
            io::ErrorKind::ConnectionReset => "connection_reset",
            io::ErrorKind::ConnectionAborted => "connection_aborted",
            io::ErrorKind::BrokenPipe => "broken_pipe",
            io::ErrorKind::TimedOut => "timed_out",
            io::ErrorKind::Interrupted => "interrupted",
            io::ErrorKind::InvalidInput => "invalid_input",
            io::ErrorKind::InvalidData => "invalid_data",
            io::ErrorKind::UnexpectedEof => "unexpected_eof",
            _ => "io",
        }
    }
}

pub type FailurePredicate = Arc<dyn Fn(&dyn CallError) -> bool + Send + Sync>;

/// How a completed call with an error is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Failure,
    Success,
    Ignored,
}

/// Named predicates available to `record_failure_predicate`.
#[derive(Clone, Default)]
pub struct PredicateRegistry {
    predicates: HashMap<String, FailurePredicate>,
}

impl PredicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, predicate: F) -> &mut Self
    where
        F: Fn(&dyn CallError) -> bool + Send + Sync + 'static,
    {
        self.predicates.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn get(&self, name: &str) -> Option<FailurePredicate> {
        self.predicates.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.predicates.contains_key(name)
    }
}

impl fmt::Debug for PredicateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.predicates.keys().collect();
        names.sort();
        f.debug_struct("PredicateRegistry").field("names", &names).finish()
    }
}

/// Frozen classification rules of a resolved configuration.
#[derive(Clone, Default, Serialize)]
pub struct FailureClassifier {
    predicate_name: Option<String>,
    #[serde(skip)]
    predicate: Option<FailurePredicate>,
    record_exceptions: Vec<String>,
    ignore_exceptions: Vec<String>,
}

impl FailureClassifier {
    pub fn new(record_exceptions: Vec<String>, ignore_exceptions: Vec<String>) -> Self {
        Self {
            predicate_name: None,
            predicate: None,
            record_exceptions,
            ignore_exceptions,
        }
    }

    pub fn with_predicate(mut self, name: impl Into<String>, predicate: FailurePredicate) -> Self {
        self.predicate_name = Some(name.into());
        self.predicate = Some(predicate);
        self
    }

    pub fn predicate_name(&self) -> Option<&str> {
        self.predicate_name.as_deref()
    }

    pub fn predicate(&self) -> Option<FailurePredicate> {
        self.predicate.clone()
    }

    pub fn record_exceptions(&self) -> &[String] {
        &self.record_exceptions
    }

    pub fn ignore_exceptions(&self) -> &[String] {
        &self.ignore_exceptions
    }

    pub fn classify(&self, error: &dyn CallError) -> Classification {
        let kind = error.kind();
        if self.ignore_exceptions.iter().any(|k| k == kind) {
            return Classification::Ignored;
        }
        if self.record_exceptions.iter().any(|k| k == kind) {
            return Classification::Failure;
        }
        match &self.predicate {
            Some(predicate) if !predicate(error) => Classification::Success,
            _ => Classification::Failure,
        }
    }
}

impl fmt::Debug for FailureClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureClassifier")
            .field("predicate", &self.predicate_name)
            .field("record_exceptions", &self.record_exceptions)
            .field("ignore_exceptions", &self.ignore_exceptions)
            .finish()
    }
}

// Predicates compare by registry key.
impl PartialEq for FailureClassifier {
    fn eq(&self, other: &Self) -> bool {
        self.predicate_name == other.predicate_name
            && self.record_exceptions == other.record_exceptions
            && self.ignore_exceptions == other.ignore_exceptions
    }
}

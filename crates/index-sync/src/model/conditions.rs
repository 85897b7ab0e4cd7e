//! Indexability predicates.

use std::fmt;
use std::sync::Arc;

use crate::record::{Record, truthy};

/// A boolean predicate over a record.
pub enum Predicate<R> {
    /// Always the given value.
    Constant(bool),
    /// A zero-argument callback, evaluated on every check.
    Deferred(Arc<dyn Fn() -> bool + Send + Sync>),
    /// The truthiness of a record field. Only `null` and `false` are false.
    Field(String),
    /// A function of the record.
    Method(Arc<dyn Fn(&R) -> bool + Send + Sync>),
}

impl<R> Predicate<R> {
    /// Predicate reading a record field.
    pub fn field(name: impl Into<String>) -> Self {
        Predicate::Field(name.into())
    }

    /// Predicate calling a function of the record.
    pub fn method<F>(f: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        Predicate::Method(Arc::new(f))
    }

    /// Predicate calling a zero-argument callback.
    pub fn deferred<F>(f: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        Predicate::Deferred(Arc::new(f))
    }
}

impl<R: Record> Predicate<R> {
    /// Evaluates the predicate against a record.
    pub fn evaluate(&self, record: &R) -> bool {
        match self {
            Predicate::Constant(value) => *value,
            Predicate::Deferred(f) => f(),
            Predicate::Field(name) => truthy(record.field(name).as_ref()),
            Predicate::Method(f) => f(record),
        }
    }
}

impl<R> Clone for Predicate<R> {
    fn clone(&self) -> Self {
        match self {
            Predicate::Constant(value) => Predicate::Constant(*value),
            Predicate::Deferred(f) => Predicate::Deferred(Arc::clone(f)),
            Predicate::Field(name) => Predicate::Field(name.clone()),
            Predicate::Method(f) => Predicate::Method(Arc::clone(f)),
        }
    }
}

impl<R> fmt::Debug for Predicate<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Predicate::Deferred(_) => f.write_str("Deferred(..)"),
            Predicate::Field(name) => f.debug_tuple("Field").field(name).finish(),
            Predicate::Method(_) => f.write_str("Method(..)"),
        }
    }
}

/// Include/exclude conditions of one index target.
///
/// A record is indexable when the include predicate holds (default: true)
/// and the exclude predicate does not (default: false).
pub struct Conditions<R> {
    include: Option<Predicate<R>>,
    exclude: Option<Predicate<R>>,
}

impl<R> Conditions<R> {
    /// No conditions: every record with an object id is indexable.
    pub fn none() -> Self {
        Self {
            include: None,
            exclude: None,
        }
    }

    /// Sets the include predicate.
    pub fn when(mut self, predicate: Predicate<R>) -> Self {
        self.include = Some(predicate);
        self
    }

    /// Sets the exclude predicate.
    pub fn unless(mut self, predicate: Predicate<R>) -> Self {
        self.exclude = Some(predicate);
        self
    }

    /// Returns true when either predicate is declared.
    ///
    /// Only targets with declared conditions ever remove records that
    /// became non-indexable during a bulk reindex.
    pub fn is_declared(&self) -> bool {
        self.include.is_some() || self.exclude.is_some()
    }

    /// Fields read by field predicates, for change tracking.
    pub fn tracked_fields(&self) -> Vec<String> {
        [&self.include, &self.exclude]
            .into_iter()
            .flatten()
            .filter_map(|p| match p {
                Predicate::Field(name) => Some(name.clone()),
                _ => None,
            })
            .collect()
    }
}

impl<R: Record> Conditions<R> {
    /// Evaluates the conditions against a record.
    pub fn should_index(&self, record: &R) -> bool {
        let included = self.include.as_ref().is_none_or(|p| p.evaluate(record));
        let excluded = self.exclude.as_ref().is_some_and(|p| p.evaluate(record));
        included && !excluded
    }
}

impl<R> Default for Conditions<R> {
    fn default() -> Self {
        Self::none()
    }
}

impl<R> Clone for Conditions<R> {
    fn clone(&self) -> Self {
        Self {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
        }
    }
}

impl<R> fmt::Debug for Conditions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conditions")
            .field("include", &self.include)
            .field("exclude", &self.exclude)
            .finish()
    }
}

//! Structural diff between a baseline tree and an actual response tree
//!
//! Maps are compared key by key (baseline keys first, then keys only present in
//! the actual tree), sequences index by index, and everything else through the
//! baseline's comparison directive or plain equality.

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use crate::compare::{values_equal, Comparator};
use crate::context::ContextStore;
use crate::error::Result;
use crate::types::{dotted_path, DiffRecord, DiffStatus, PathSegment};

/// Configured diff run
#[derive(Debug, Clone, Default)]
pub struct StructuralDiff<'a> {
    context: Option<&'a ContextStore>,
    optional_paths: BTreeSet<String>,
}

impl<'a> StructuralDiff<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context used to resolve `self` directives
    pub fn with_context(mut self, context: &'a ContextStore) -> Self {
        self.context = Some(context);
        self
    }

    /// Dotted paths (e.g. `headers.date`) exempt from missing/extra reporting
    pub fn with_optional_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optional_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Compare two trees from the root
    pub fn compare(&self, expected: &Value, actual: &Value) -> Result<Vec<DiffRecord>> {
        self.compare_at(&[], expected, actual)
    }

    /// Compare two trees located at `path`
    pub fn compare_at(
        &self,
        path: &[PathSegment],
        expected: &Value,
        actual: &Value,
    ) -> Result<Vec<DiffRecord>> {
        let mut diffs = Vec::new();
        let mut path = path.to_vec();
        self.compare_values(&mut path, expected, actual, &mut diffs)?;
        Ok(diffs)
    }

    fn compare_values(
        &self,
        path: &mut Vec<PathSegment>,
        expected: &Value,
        actual: &Value,
        diffs: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        if let Some(comparator) = Comparator::resolve(expected, self.context)? {
            if !comparator.matches(actual)? {
                diffs.push(DiffRecord::unequal(path.clone(), expected.clone(), actual.clone()));
            }
            return Ok(());
        }

        match (expected, actual) {
            (Value::Object(expected), Value::Object(actual)) => {
                self.compare_maps(path, expected, actual, diffs)
            }
            (Value::Array(expected), Value::Array(actual)) => {
                self.compare_sequences(path, expected, actual, diffs)
            }
            _ => {
                if !values_equal(expected, actual) {
                    diffs.push(DiffRecord::unequal(path.clone(), expected.clone(), actual.clone()));
                }
                Ok(())
            }
        }
    }

    fn compare_maps(
        &self,
        path: &mut Vec<PathSegment>,
        expected: &Map<String, Value>,
        actual: &Map<String, Value>,
        diffs: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        for (key, value) in expected {
            path.push(PathSegment::Key(key.clone()));
            match actual.get(key) {
                Some(other) => self.compare_values(path, value, other, diffs)?,
                None => self.push_presence(DiffRecord::missing(path.clone(), value.clone()), diffs),
            }
            path.pop();
        }

        for (key, value) in actual {
            if expected.contains_key(key) {
                continue;
            }
            path.push(PathSegment::Key(key.clone()));
            self.push_presence(DiffRecord::extra(path.clone(), value.clone()), diffs);
            path.pop();
        }

        Ok(())
    }

    fn compare_sequences(
        &self,
        path: &mut Vec<PathSegment>,
        expected: &[Value],
        actual: &[Value],
        diffs: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        for (index, (value, other)) in expected.iter().zip(actual).enumerate() {
            path.push(PathSegment::Index(index));
            self.compare_values(path, value, other, diffs)?;
            path.pop();
        }

        for (index, value) in expected.iter().enumerate().skip(actual.len()) {
            path.push(PathSegment::Index(index));
            self.push_presence(DiffRecord::missing(path.clone(), value.clone()), diffs);
            path.pop();
        }

        for (index, value) in actual.iter().enumerate().skip(expected.len()) {
            path.push(PathSegment::Index(index));
            self.push_presence(DiffRecord::extra(path.clone(), value.clone()), diffs);
            path.pop();
        }

        Ok(())
    }

    fn push_presence(&self, record: DiffRecord, diffs: &mut Vec<DiffRecord>) {
        debug_assert!(matches!(record.status, DiffStatus::Missing | DiffStatus::Extra));
        if self.optional_paths.contains(&dotted_path(&record.path)) {
            return;
        }
        diffs.push(record);
    }
}

/// Compare two trees without a context or optional paths
pub fn compare(expected: &Value, actual: &Value) -> Result<Vec<DiffRecord>> {
    StructuralDiff::new().compare(expected, actual)
}

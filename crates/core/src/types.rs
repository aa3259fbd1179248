//! Core types for Baseliner

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::context::RUN_KEY;
use crate::error::{Error, Result};

/// Response headers keyed by (lowercase) header name
pub type Headers = BTreeMap<String, String>;

/// A declared test, as read from `<suite>_tests.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Unique name for this test
    pub name: String,

    /// HTTP method
    #[serde(rename = "verb", alias = "method")]
    pub method: String,

    /// URL template
    pub url: String,

    /// Query or body parameters; values are rendered as templates
    #[serde(default)]
    pub params: BTreeMap<String, Value>,

    /// Header templates
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Multipart file fields mapped to file path templates
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, String>,
}

impl TestDefinition {
    pub fn new(name: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            url: url.into(),
            params: BTreeMap::new(),
            headers: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_file(mut self, field: impl Into<String>, path: impl Into<String>) -> Self {
        self.files.insert(field.into(), path.into());
        self
    }

    /// Uppercased method name
    pub fn verb(&self) -> String {
        self.method.trim().to_ascii_uppercase()
    }
}

/// Contents of a `<suite>_tests.json` file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFile {
    /// Globals made available to every template
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub context: Map<String, Value>,

    /// Tests in execution order
    pub tests: Vec<TestDefinition>,
}

impl TestFile {
    /// Parse a test file from a JSON string and validate it
    pub fn from_json(json: &str) -> Result<Self> {
        let file: Self = serde_json::from_str(json)?;
        file.validate()?;
        Ok(file)
    }

    /// Test names must be unique since they key the baseline, and must not
    /// shadow `_` or a context global in the template store
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for test in &self.tests {
            if test.name == RUN_KEY || self.context.contains_key(&test.name) {
                return Err(Error::ReservedName(test.name.clone()));
            }
            if !seen.insert(test.name.as_str()) {
                return Err(Error::DuplicateTest(test.name.clone()));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&TestDefinition> {
        self.tests.iter().find(|t| t.name == name)
    }
}

/// Normalized, comparable projection of an HTTP response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Headers,
    pub body: Value,
}

impl ResponseSnapshot {
    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// One accepted response stored in the baseline
///
/// `response` is kept as a raw tree because baselines are hand-edited to carry
/// comparison directives anywhere inside it.
///
/// Hand-written baselines may carry only `response`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub method: String,
    #[serde(default)]
    pub url: String,
    pub response: Value,
}

/// Reference snapshot for a test suite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub tests: BTreeMap<String, BaselineEntry>,
}

impl Baseline {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            tests: BTreeMap::new(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }
}

/// Result for a single test within a regress run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Absent only for tests that disappeared from the test list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponseSnapshot>,
    #[serde(default)]
    pub diffs: Vec<DiffRecord>,
}

/// Output of a regress run, persisted as `<suite>_last_run.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub time: i64,
    #[serde(default)]
    pub tests: BTreeMap<String, TestResult>,
}

impl RunResult {
    pub fn new(time: i64) -> Self {
        Self {
            time,
            tests: BTreeMap::new(),
        }
    }

    /// Names of tests that reported at least one diff
    pub fn failed_tests(&self) -> Vec<&str> {
        self.tests
            .values()
            .filter(|t| !t.diffs.is_empty())
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn is_clean(&self) -> bool {
        self.tests.values().all(|t| t.diffs.is_empty())
    }

    pub fn diff_count(&self) -> usize {
        self.tests.values().map(|t| t.diffs.len()).sum()
    }
}

/// One step of a path into a response tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "{i}"),
            PathSegment::Key(k) => write!(f, "{k}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        PathSegment::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

/// Join a path with dots, the form used for optional-path matching
pub fn dotted_path(path: &[PathSegment]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

/// Kind of discrepancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffStatus {
    Unequal,
    Missing,
    Extra,
    TestAdded,
    TestRemoved,
}

impl fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffStatus::Unequal => write!(f, "unequal"),
            DiffStatus::Missing => write!(f, "missing"),
            DiffStatus::Extra => write!(f, "extra"),
            DiffStatus::TestAdded => write!(f, "test_added"),
            DiffStatus::TestRemoved => write!(f, "test_removed"),
        }
    }
}

/// A single path-addressed difference between baseline and actual
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffRecord {
    #[serde(default)]
    pub path: Vec<PathSegment>,
    pub status: DiffStatus,
    /// Test name, set on whole-test records only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl DiffRecord {
    pub fn unequal(path: Vec<PathSegment>, old: Value, new: Value) -> Self {
        Self {
            path,
            status: DiffStatus::Unequal,
            name: None,
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn missing(path: Vec<PathSegment>, old: Value) -> Self {
        Self {
            path,
            status: DiffStatus::Missing,
            name: None,
            old: Some(old),
            new: None,
        }
    }

    pub fn extra(path: Vec<PathSegment>, new: Value) -> Self {
        Self {
            path,
            status: DiffStatus::Extra,
            name: None,
            old: None,
            new: Some(new),
        }
    }

    pub fn test_added(name: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            status: DiffStatus::TestAdded,
            name: Some(name.into()),
            old: None,
            new: None,
        }
    }

    pub fn test_removed(name: impl Into<String>) -> Self {
        Self {
            path: Vec::new(),
            status: DiffStatus::TestRemoved,
            name: Some(name.into()),
            old: None,
            new: None,
        }
    }

    pub fn dotted_path(&self) -> String {
        dotted_path(&self.path)
    }
}

impl fmt::Display for DiffRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            DiffStatus::TestAdded | DiffStatus::TestRemoved => {
                write!(f, "{}: {}", self.status, self.name.as_deref().unwrap_or(""))
            }
            DiffStatus::Unequal => write!(
                f,
                "unequal at {}: {} -> {}",
                self.dotted_path(),
                self.old.as_ref().unwrap_or(&Value::Null),
                self.new.as_ref().unwrap_or(&Value::Null)
            ),
            DiffStatus::Missing => write!(
                f,
                "missing at {}: {}",
                self.dotted_path(),
                self.old.as_ref().unwrap_or(&Value::Null)
            ),
            DiffStatus::Extra => write!(
                f,
                "extra at {}: {}",
                self.dotted_path(),
                self.new.as_ref().unwrap_or(&Value::Null)
            ),
        }
    }
}

//! On-disk suite files
//!
//! ```text
//! <data_dir>/<suite>_tests.json      test list (+ optional template context)
//! <data_dir>/<suite>_baseline.json   accepted responses
//! <data_dir>/<suite>_last_run.json   latest regress results
//! <data_dir>/<test>.last-response    raw body of the latest unstructured response
//! ```
//!
//! Everything is written as pretty JSON with sorted keys so that baselines diff
//! cleanly under version control.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use baseliner_core::{Baseline, RunResult, TestFile};

use crate::error::{RunnerError, RunnerResult};

/// Paths of one suite's files
#[derive(Debug, Clone)]
pub struct SuiteFiles {
    data_dir: PathBuf,
    name: String,
}

impl SuiteFiles {
    pub fn new(data_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            data_dir: data_dir.into(),
            name: name.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn tests_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_tests.json", self.name))
    }

    pub fn baseline_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_baseline.json", self.name))
    }

    pub fn last_run_path(&self) -> PathBuf {
        self.data_dir.join(format!("{}_last_run.json", self.name))
    }

    pub fn last_response_path(&self, test_name: &str) -> PathBuf {
        self.data_dir.join(format!("{test_name}.last-response"))
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline_path().exists()
    }

    pub fn has_results(&self) -> bool {
        self.last_run_path().exists()
    }

    pub fn load_tests(&self) -> RunnerResult<TestFile> {
        let path = self.tests_path();
        if !path.exists() {
            return Err(RunnerError::TestsNotFound(path));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(TestFile::from_json(&raw)?)
    }

    pub fn save_tests(&self, tests: &TestFile) -> RunnerResult<()> {
        write_pretty(&self.tests_path(), tests)
    }

    pub fn load_baseline(&self) -> RunnerResult<Baseline> {
        let path = self.baseline_path();
        if !path.exists() {
            return Err(RunnerError::BaselineNotFound(path));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_baseline(&self, baseline: &Baseline) -> RunnerResult<()> {
        write_pretty(&self.baseline_path(), baseline)
    }

    pub fn load_results(&self) -> RunnerResult<RunResult> {
        let path = self.last_run_path();
        if !path.exists() {
            return Err(RunnerError::ResultsNotFound(path));
        }
        let raw = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save_results(&self, results: &RunResult) -> RunnerResult<()> {
        write_pretty(&self.last_run_path(), results)
    }

    /// Keep the raw bytes of a body that could not be parsed
    pub fn write_last_response(&self, test_name: &str, body: &[u8]) -> RunnerResult<PathBuf> {
        std::fs::create_dir_all(&self.data_dir)?;
        let path = self.last_response_path(test_name);
        std::fs::write(&path, body)?;
        debug!("Raw response for {} written to {}", test_name, path.display());
        Ok(path)
    }
}

/// Pretty JSON with sorted keys and no trailing whitespace
pub fn pretty_print<T: Serialize>(value: &T) -> RunnerResult<String> {
    // Round-trip through Value so map keys come out sorted
    let value = serde_json::to_value(value)?;
    let text = serde_json::to_string_pretty(&value)?;
    let mut out = text
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    out.push('\n');
    Ok(out)
}

fn write_pretty<T: Serialize>(path: &Path, value: &T) -> RunnerResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, pretty_print(value)?)?;
    debug!("Wrote {}", path.display());
    Ok(())
}

//! Baseline lifecycle
//!
//! A suite moves from *uninitialized* (no baseline) to *calibrated* (baseline
//! present) to *regressed* (a last-run result exists). `calibrate` only ever
//! grows the baseline; existing entries are replaced only when named for
//! re-baselining.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use baseliner_core::{
    validate_directives, Baseline, BaselineEntry, ContextStore, DiffRecord, DirectiveKind,
    RunResult, StructuralDiff, TestFile, TestResult,
};

use crate::config::SuiteConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::executor::{ExecutedTest, RequestExecutor};
use crate::http::{Dispatch, HttpDispatcher};
use crate::store::SuiteFiles;

/// Where a suite is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuiteState {
    Uninitialized,
    Calibrated,
    Regressed,
}

/// What a calibrate pass did to the baseline
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CalibrationSummary {
    pub added: Vec<String>,
    pub rebaselined: Vec<String>,
    pub skipped: Vec<String>,
    /// Whether the baseline file was (re)written
    pub written: bool,
}

/// A named test suite bound to its files and a dispatcher
pub struct TestSuite<D> {
    config: SuiteConfig,
    files: SuiteFiles,
    executor: RequestExecutor<D>,
}

impl TestSuite<HttpDispatcher> {
    /// Suite sending real HTTP requests
    pub fn from_config(config: SuiteConfig) -> RunnerResult<Self> {
        config.validate()?;
        let dispatcher = HttpDispatcher::new(&config)?;
        Ok(Self::with_dispatcher(config, dispatcher))
    }
}

impl<D: Dispatch> TestSuite<D> {
    pub fn with_dispatcher(config: SuiteConfig, dispatcher: D) -> Self {
        let files = SuiteFiles::new(&config.data_dir, &config.name);
        let executor = RequestExecutor::new(dispatcher, &config);
        Self {
            config,
            files,
            executor,
        }
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    pub fn files(&self) -> &SuiteFiles {
        &self.files
    }

    pub fn state(&self) -> SuiteState {
        if !self.files.has_baseline() {
            SuiteState::Uninitialized
        } else if self.files.has_results() {
            SuiteState::Regressed
        } else {
            SuiteState::Calibrated
        }
    }

    /// Execute every test in declaration order
    ///
    /// Each test is recorded into the context before `on_executed` sees it,
    /// and before the next test's templates are rendered.
    pub async fn run_tests<F>(&self, tests: &TestFile, mut on_executed: F) -> RunnerResult<()>
    where
        F: FnMut(ExecutedTest, &mut ContextStore) -> RunnerResult<()>,
    {
        let mut context = ContextStore::new();
        context.extend_globals(&tests.context);
        if let Some(base_url) = &self.config.base_url {
            context.set_global("base_url", Value::String(base_url.clone()));
        }

        for test in &tests.tests {
            context.ensure_test_name(&test.name)?;
        }

        info!("Running {} test(s) from suite {}", tests.tests.len(), self.config.name);

        for test in &tests.tests {
            let executed = self.executor.execute(test, &context).await?;
            context.record(executed.context_entry())?;
            on_executed(executed, &mut context)?;
        }

        Ok(())
    }

    /// Record responses of tests not yet in the baseline
    pub async fn calibrate(&self) -> RunnerResult<CalibrationSummary> {
        let rebaseline = self.config.rebaseline.clone();
        self.calibrate_with(&rebaseline).await
    }

    /// Re-run the suite and overwrite the named baseline entries
    pub async fn rebaseline(&self, names: &[String]) -> RunnerResult<CalibrationSummary> {
        let tests = self.files.load_tests()?;
        if let Some(unknown) = names.iter().find(|name| tests.get(name).is_none()) {
            return Err(RunnerError::UnknownTest(unknown.clone()));
        }
        self.calibrate_with(names).await
    }

    async fn calibrate_with(&self, overwrite: &[String]) -> RunnerResult<CalibrationSummary> {
        let tests = self.files.load_tests()?;

        let existing = match self.files.load_baseline() {
            Ok(baseline) => Some(baseline),
            Err(RunnerError::BaselineNotFound(path)) => {
                info!("No baseline at {}, starting a new one", path.display());
                None
            }
            Err(e) => return Err(e),
        };
        let mut baseline = existing
            .clone()
            .unwrap_or_else(|| Baseline::new(Utc::now().timestamp()));

        let mut summary = CalibrationSummary::default();

        self.run_tests(&tests, |executed, _| {
            let name = executed.name().to_string();
            match baseline.tests.get(&name) {
                None => {
                    info!("adding test {} to baseline", name);
                    baseline.tests.insert(name.clone(), baseline_entry(&executed)?);
                    summary.added.push(name);
                }
                Some(old) if overwrite.contains(&name) => {
                    let previous = serde_json::to_string_pretty(&old.response)?;
                    info!("updating test {} in baseline, old value was:\n{}", name, previous);
                    baseline.tests.insert(name.clone(), baseline_entry(&executed)?);
                    summary.rebaselined.push(name);
                }
                Some(_) => {
                    info!("ignoring test {} since it already exists in baseline", name);
                    summary.skipped.push(name);
                }
            }
            Ok(())
        })
        .await?;

        if existing.as_ref() != Some(&baseline) {
            self.files.save_baseline(&baseline)?;
            summary.written = true;
        } else {
            debug!("Baseline unchanged, not rewriting {}", self.files.baseline_path().display());
        }

        Ok(summary)
    }

    /// Diff every test against the baseline and persist the run
    ///
    /// With `add_new`, tests missing from the baseline are added to it.
    pub async fn regress(&self, add_new: bool) -> RunnerResult<RunResult> {
        let mut baseline = self.files.load_baseline()?;
        let tests = self.files.load_tests()?;

        // Malformed directives abort before anything is dispatched
        for entry in baseline.tests.values() {
            validate_directives(&entry.response)?;
        }

        let optional_paths = self.config.optional_paths();
        let mut run = RunResult::new(Utc::now().timestamp());
        let mut added = Vec::new();

        self.run_tests(&tests, |executed, context| {
            let name = executed.name().to_string();
            let snapshot = executed.snapshot.clone();
            let actual = snapshot.to_value()?;

            run.tests.insert(
                name.clone(),
                TestResult {
                    name: name.clone(),
                    method: executed.resolved.method.clone(),
                    url: executed.resolved.url.clone(),
                    params: executed.resolved.params.clone(),
                    response: Some(snapshot),
                    diffs: Vec::new(),
                },
            );
            // `_` is the run so far; `_.current` is this test's own result
            let mut run_value = serde_json::to_value(&run)?;
            if let (Value::Object(map), Some(current)) = (&mut run_value, run.tests.get(&name)) {
                map.insert("current".to_string(), serde_json::to_value(current)?);
            }
            context.set_run(run_value);

            let diffs = match baseline.tests.get(&name) {
                None => {
                    added.push(executed);
                    vec![DiffRecord::test_added(&name)]
                }
                Some(expected) => StructuralDiff::new()
                    .with_context(context)
                    .with_optional_paths(&optional_paths)
                    .compare(&expected.response, &actual)?,
            };

            if !diffs.is_empty() {
                info!("---{}---", name);
                for diff in &diffs {
                    info!("{}", diff);
                }
            }

            if let Some(result) = run.tests.get_mut(&name) {
                result.diffs = diffs;
            }
            Ok(())
        })
        .await?;

        for (name, entry) in &baseline.tests {
            if run.tests.contains_key(name) {
                continue;
            }
            let diff = DiffRecord::test_removed(name);
            info!("---{}---", name);
            info!("{}", diff);
            run.tests.insert(
                name.clone(),
                TestResult {
                    name: name.clone(),
                    method: entry.method.clone(),
                    url: entry.url.clone(),
                    params: Default::default(),
                    response: None,
                    diffs: vec![diff],
                },
            );
        }

        if add_new && !added.is_empty() {
            for executed in &added {
                info!("adding test {} to baseline", executed.name());
                baseline
                    .tests
                    .insert(executed.name().to_string(), baseline_entry(executed)?);
            }
            self.files.save_baseline(&baseline)?;
        }

        self.files.save_results(&run)?;

        if run.is_clean() {
            info!("Suite {}: {} test(s), no differences", self.config.name, run.tests.len());
        } else {
            info!(
                "Suite {}: {} difference(s) in {} test(s)",
                self.config.name,
                run.diff_count(),
                run.failed_tests().len()
            );
        }

        Ok(run)
    }

    /// Rewrite stored responses into their current canonical form
    ///
    /// Returns the number of baseline entries that changed.
    pub fn modernize_baseline(&self) -> RunnerResult<usize> {
        let mut baseline = self.files.load_baseline()?;
        let mut changed = 0;
        for entry in baseline.tests.values_mut() {
            if modernize_response(&mut entry.response) {
                changed += 1;
            }
        }
        if changed > 0 {
            self.files.save_baseline(&baseline)?;
        }
        Ok(changed)
    }
}

fn baseline_entry(executed: &ExecutedTest) -> RunnerResult<BaselineEntry> {
    let mut response = executed.snapshot.to_value()?;
    modernize_response(&mut response);
    Ok(BaselineEntry {
        name: executed.name().to_string(),
        method: executed.resolved.method.clone(),
        url: executed.resolved.url.clone(),
        response,
    })
}

/// Replace a literal `Date` header with a date directive
pub fn modernize_response(response: &mut Value) -> bool {
    let Some(headers) = response.get_mut("headers").and_then(Value::as_object_mut) else {
        return false;
    };

    let mut changed = false;
    for (name, value) in headers.iter_mut() {
        if name.eq_ignore_ascii_case("date") && value.is_string() {
            *value = DirectiveKind::Date.directive();
            changed = true;
        }
    }
    changed
}

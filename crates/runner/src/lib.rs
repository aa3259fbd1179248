//! Baseliner Runner
//!
//! Drives HTTP snapshot suites against a live API:
//! - loads `<suite>_tests.json` and the suite's baseline
//! - renders each test through the run context and dispatches it
//! - `calibrate` records new responses into the baseline
//! - `regress` diffs fresh responses against it and saves `<suite>_last_run.json`
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  TestSuite                                               │
//! │    ├── calibrate() / rebaseline(names)                   │
//! │    ├── regress(add_new) -> RunResult                     │
//! │    └── run_tests(tests, on_executed)                     │
//! ├──────────────────────────────────────────────────────────┤
//! │  RequestExecutor                                         │
//! │    ├── resolve(test, context) -> ResolvedTest            │
//! │    ├── prepare(resolved) -> PreparedRequest              │
//! │    ├── dispatch_with_retry(request)   (Retry-After)      │
//! │    └── normalize(response) -> ResponseSnapshot           │
//! ├──────────────────────────────────────────────────────────┤
//! │  Dispatch (trait)  ── HttpDispatcher (reqwest)           │
//! │  SuiteFiles        ── pretty, key-sorted JSON on disk    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod store;
pub mod suite;

pub use config::{BodyFormat, SuiteConfig};
pub use error::{RunnerError, RunnerResult};
pub use executor::{retry_delay, ExecutedTest, RequestExecutor, ResolvedTest};
pub use http::{Dispatch, HttpDispatcher, PreparedRequest, RawResponse, RequestBody};
pub use logging::{init_logging, init_logging_with, LogFormat};
pub use store::{pretty_print, SuiteFiles};
pub use suite::{modernize_response, CalibrationSummary, SuiteState, TestSuite};

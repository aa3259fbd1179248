//! Request execution
//!
//! Turns a declared test plus the run context into a dispatched request and a
//! normalized [`ResponseSnapshot`].

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use baseliner_core::{hash_placeholder, ContextEntry, ContextStore, ResponseSnapshot, TestDefinition};

use crate::config::{BodyFormat, SuiteConfig};
use crate::error::{RunnerError, RunnerResult};
use crate::http::{Dispatch, PreparedRequest, RawResponse, RequestBody};
use crate::store::SuiteFiles;

/// Methods whose parameters go in the query string
const QUERY_METHODS: &[&str] = &["GET", "DELETE", "OPTIONS", "HEAD"];

/// A test definition after template rendering
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTest {
    pub name: String,
    pub method: String,
    pub url: String,
    pub params: BTreeMap<String, String>,
    pub headers: BTreeMap<String, String>,
    pub files: BTreeMap<String, PathBuf>,
}

/// Everything known about one executed test
#[derive(Debug, Clone)]
pub struct ExecutedTest {
    pub definition: TestDefinition,
    pub resolved: ResolvedTest,
    pub request: PreparedRequest,
    pub response: RawResponse,
    pub snapshot: ResponseSnapshot,
    /// Number of dispatches, including Retry-After retries
    pub attempts: u32,
}

impl ExecutedTest {
    pub fn name(&self) -> &str {
        &self.resolved.name
    }

    /// What later templates may reference about this test
    pub fn context_entry(&self) -> ContextEntry {
        ContextEntry {
            name: self.resolved.name.clone(),
            method: self.resolved.method.clone(),
            url: self.resolved.url.clone(),
            params: self.resolved.params.clone(),
            body: self.snapshot.body.clone(),
        }
    }
}

/// Renders, sends and normalizes test requests
pub struct RequestExecutor<D> {
    dispatcher: D,
    files: SuiteFiles,
    base_url: Option<String>,
    common_headers: BTreeMap<String, String>,
    body_format: BodyFormat,
    max_retries: u32,
}

impl<D: Dispatch> RequestExecutor<D> {
    pub fn new(dispatcher: D, config: &SuiteConfig) -> Self {
        Self {
            dispatcher,
            files: SuiteFiles::new(&config.data_dir, &config.name),
            base_url: config.base_url.clone(),
            common_headers: config.common_headers.clone(),
            body_format: config.body_format,
            max_retries: config.max_retries,
        }
    }

    /// Execute one test against the current context
    pub async fn execute(
        &self,
        test: &TestDefinition,
        context: &ContextStore,
    ) -> RunnerResult<ExecutedTest> {
        let resolved = self.resolve(test, context)?;
        let request = self.prepare(&resolved);

        debug!("===Request=== {}", request.request_line());
        for (name, value) in &request.headers {
            debug!("{}: {}", name, value);
        }

        let (response, attempts) = self.dispatch_with_retry(&request).await?;
        debug!(
            "===Response=== {} {} ({} bytes, {} attempt(s))",
            resolved.name,
            response.status,
            response.body.len(),
            attempts
        );

        let snapshot = self.normalize(&resolved.name, &response)?;

        Ok(ExecutedTest {
            definition: test.clone(),
            resolved,
            request,
            response,
            snapshot,
            attempts,
        })
    }

    /// Render every templated field of a test
    pub fn resolve(&self, test: &TestDefinition, context: &ContextStore) -> RunnerResult<ResolvedTest> {
        let method = test.verb();
        if method.is_empty() {
            return Err(RunnerError::InvalidRequest {
                target: test.name.clone(),
                reason: "missing HTTP method".to_string(),
            });
        }

        let url = self.full_url(&context.render(&test.url)?);

        let mut params = BTreeMap::new();
        for (key, value) in &test.params {
            params.insert(key.clone(), context.render_value(value)?);
        }

        let mut headers = self.common_headers.clone();
        for (key, value) in &test.headers {
            headers.insert(key.clone(), context.render(value)?);
        }

        let mut files = BTreeMap::new();
        for (field, path) in &test.files {
            let path = PathBuf::from(context.render(path)?);
            let path = if path.is_relative() {
                self.files.data_dir().join(path)
            } else {
                path
            };
            files.insert(field.clone(), path);
        }

        Ok(ResolvedTest {
            name: test.name.clone(),
            method,
            url,
            params,
            headers,
            files,
        })
    }

    /// Decide where parameters travel and how the body is encoded
    pub fn prepare(&self, resolved: &ResolvedTest) -> PreparedRequest {
        let mut query = BTreeMap::new();

        let body = if !resolved.files.is_empty() {
            RequestBody::Multipart {
                fields: resolved.params.clone(),
                files: resolved.files.clone(),
            }
        } else if QUERY_METHODS.contains(&resolved.method.as_str()) {
            query = resolved.params.clone();
            RequestBody::Empty
        } else {
            match self.body_format {
                BodyFormat::Json => RequestBody::Json(resolved.params.clone()),
                BodyFormat::Form => RequestBody::Form(resolved.params.clone()),
            }
        };

        PreparedRequest {
            method: resolved.method.clone(),
            url: resolved.url.clone(),
            headers: resolved.headers.clone(),
            query,
            body,
        }
    }

    /// Send, sleeping and resending while the server answers with `Retry-After`
    ///
    /// After `max_retries` retries the last response is returned as-is.
    pub async fn dispatch_with_retry(
        &self,
        request: &PreparedRequest,
    ) -> RunnerResult<(RawResponse, u32)> {
        let mut attempts = 0u32;
        loop {
            let response = self.dispatcher.dispatch(request).await?;
            attempts += 1;

            if attempts > self.max_retries {
                return Ok((response, attempts));
            }

            let Some(delay) = retry_delay(&response) else {
                return Ok((response, attempts));
            };

            warn!(
                "{} answered {} with Retry-After, retrying in {:?} (attempt {}/{})",
                request.url,
                response.status,
                delay,
                attempts,
                self.max_retries + 1
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Build the comparable snapshot, hashing bodies that are not JSON
    pub fn normalize(&self, test_name: &str, response: &RawResponse) -> RunnerResult<ResponseSnapshot> {
        let body = match serde_json::from_slice::<Value>(&response.body) {
            Ok(body) => body,
            Err(_) => {
                let digest = hex::encode(Sha256::digest(&response.body));
                self.files.write_last_response(test_name, &response.body)?;
                hash_placeholder(digest)
            }
        };

        Ok(ResponseSnapshot {
            status_code: response.status,
            headers: response.headers.clone(),
            body,
        })
    }

    fn full_url(&self, url: &str) -> String {
        match &self.base_url {
            Some(base) if reqwest::Url::parse(url).is_err() => {
                if url.starts_with('/') {
                    format!("{}{}", base.trim_end_matches('/'), url)
                } else {
                    format!("{base}{url}")
                }
            }
            _ => url.to_string(),
        }
    }
}

/// Delay requested by a `Retry-After` header, in seconds or as an HTTP date
pub fn retry_delay(response: &RawResponse) -> Option<Duration> {
    let value = response.header("retry-after")?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = DateTime::parse_from_rfc2822(value).ok()?;
    let delta = when.with_timezone(&Utc) - Utc::now();
    Some(delta.to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays scripted responses; the last one repeats forever
    #[derive(Default)]
    struct ScriptedDispatcher {
        responses: Mutex<VecDeque<RawResponse>>,
        sent: Mutex<Vec<PreparedRequest>>,
    }

    impl ScriptedDispatcher {
        fn new(responses: Vec<RawResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<PreparedRequest> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl Dispatch for ScriptedDispatcher {
        async fn dispatch(&self, request: &PreparedRequest) -> RunnerResult<RawResponse> {
            self.sent.lock().push(request.clone());
            let mut responses = self.responses.lock();
            let response = if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            };
            Ok(response.expect("no scripted response"))
        }
    }

    fn response(status: u16, headers: &[(&str, &str)], body: &str) -> RawResponse {
        RawResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: Bytes::from(body.to_string()),
        }
    }

    fn executor(
        dir: &std::path::Path,
        responses: Vec<RawResponse>,
    ) -> (RequestExecutor<Arc<ScriptedDispatcher>>, Arc<ScriptedDispatcher>) {
        let dispatcher = ScriptedDispatcher::new(responses);
        let config = SuiteConfig::new("suite", dir).with_base_url("http://api.test/");
        (RequestExecutor::new(dispatcher.clone(), &config), dispatcher)
    }

    fn login_context() -> ContextStore {
        let mut context = ContextStore::new();
        context
            .record(ContextEntry {
                name: "login".into(),
                method: "POST".into(),
                url: "http://api.test/login".into(),
                params: BTreeMap::new(),
                body: json!({"token": "abc123", "id": 7}),
            })
            .unwrap();
        context
    }

    #[test]
    fn test_get_params_go_in_query() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor(dir.path(), vec![]);
        let test = TestDefinition::new("user", "get", "/users/{{login.body.id}}")
            .with_param("expand", "{{login.body.token}}")
            .with_param("limit", 10);

        let resolved = executor.resolve(&test, &login_context()).unwrap();
        assert_eq!(resolved.method, "GET");
        assert_eq!(resolved.url, "http://api.test/users/7");

        let request = executor.prepare(&resolved);
        assert_eq!(request.body, RequestBody::Empty);
        assert_eq!(request.query["expand"], "abc123");
        assert_eq!(request.query["limit"], "10");
    }

    #[test]
    fn test_post_params_go_in_body() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor(dir.path(), vec![]);
        let test = TestDefinition::new("create", "POST", "https://other.test/items")
            .with_param("name", "widget");

        let request = executor.prepare(&executor.resolve(&test, &ContextStore::new()).unwrap());
        assert_eq!(request.url, "https://other.test/items");
        assert!(request.query.is_empty());
        assert_eq!(
            request.body,
            RequestBody::Json(BTreeMap::from([("name".to_string(), "widget".to_string())]))
        );
    }

    #[test]
    fn test_form_body_format() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SuiteConfig::new("suite", dir.path());
        config.body_format = BodyFormat::Form;
        let executor = RequestExecutor::new(ScriptedDispatcher::new(vec![]), &config);

        let test = TestDefinition::new("create", "PUT", "http://api.test/x").with_param("a", "1");
        let request = executor.prepare(&executor.resolve(&test, &ContextStore::new()).unwrap());
        assert!(matches!(request.body, RequestBody::Form(_)));
    }

    #[test]
    fn test_files_force_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor(dir.path(), vec![]);
        let test = TestDefinition::new("upload", "GET", "/avatar")
            .with_param("caption", "me")
            .with_file("avatar", "avatar-{{login.body.id}}.png");

        let request = executor.prepare(&executor.resolve(&test, &login_context()).unwrap());
        assert!(request.query.is_empty());
        match request.body {
            RequestBody::Multipart { fields, files } => {
                assert_eq!(fields["caption"], "me");
                assert_eq!(files["avatar"], dir.path().join("avatar-7.png"));
            }
            other => panic!("expected multipart body, got {other:?}"),
        }
    }

    #[test]
    fn test_headers_rendered_over_common_headers() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SuiteConfig::new("suite", dir.path());
        config.common_headers.insert("Accept".into(), "application/json".into());
        config.common_headers.insert("Authorization".into(), "none".into());
        let executor = RequestExecutor::new(ScriptedDispatcher::new(vec![]), &config);

        let test = TestDefinition::new("me", "GET", "http://api.test/me")
            .with_header("Authorization", "Bearer {{login.body.token}}");
        let resolved = executor.resolve(&test, &login_context()).unwrap();
        assert_eq!(resolved.headers["Authorization"], "Bearer abc123");
        assert_eq!(resolved.headers["Accept"], "application/json");
    }

    #[tokio::test]
    async fn test_retry_after_is_capped() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, dispatcher) = executor(
            dir.path(),
            vec![response(503, &[("retry-after", "0")], "{\"busy\": true}")],
        );
        let test = TestDefinition::new("busy", "GET", "/busy");

        let executed = executor.execute(&test, &ContextStore::new()).await.unwrap();
        assert_eq!(executed.attempts, 6);
        assert_eq!(dispatcher.sent().len(), 6);
        assert_eq!(executed.snapshot.status_code, 503);
        assert_eq!(executed.response.header("Retry-After"), Some("0"));
    }

    #[tokio::test]
    async fn test_retry_stops_when_header_disappears() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, dispatcher) = executor(
            dir.path(),
            vec![
                response(429, &[("retry-after", "0")], ""),
                response(200, &[], "{\"ok\": true}"),
            ],
        );
        let test = TestDefinition::new("ping", "GET", "/ping");

        let executed = executor.execute(&test, &ContextStore::new()).await.unwrap();
        assert_eq!(executed.attempts, 2);
        assert_eq!(dispatcher.sent().len(), 2);
        assert_eq!(executed.snapshot.body, json!({"ok": true}));
    }

    #[tokio::test]
    async fn test_unstructured_body_is_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let (executor, _) = executor(
            dir.path(),
            vec![response(200, &[("content-type", "image/png")], "\u{89}PNG not json")],
        );
        let test = TestDefinition::new("logo", "GET", "/logo.png");

        let executed = executor.execute(&test, &ContextStore::new()).await.unwrap();
        let digest = hex::encode(Sha256::digest("\u{89}PNG not json".as_bytes()));
        assert_eq!(executed.snapshot.body, json!({"_t": "hash", "value": digest}));

        let side_file = dir.path().join("logo.last-response");
        assert_eq!(std::fs::read(side_file).unwrap(), "\u{89}PNG not json".as_bytes());
        assert_eq!(executed.context_entry().body, executed.snapshot.body);
    }

    #[test]
    fn test_retry_delay_parsing() {
        assert_eq!(
            retry_delay(&response(503, &[("retry-after", "7")], "")),
            Some(Duration::from_secs(7))
        );
        assert_eq!(
            retry_delay(&response(503, &[("retry-after", "Wed, 21 Oct 2015 07:28:00 GMT")], "")),
            Some(Duration::ZERO)
        );
        assert_eq!(retry_delay(&response(503, &[("retry-after", "soon")], "")), None);
        assert_eq!(retry_delay(&response(200, &[], "")), None);
    }
}

//! HTTP dispatch
//!
//! The executor talks to the network only through [`Dispatch`], so suites can
//! be driven by the real `reqwest` client or by a scripted fake in tests.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SuiteConfig;
use crate::error::{RunnerError, RunnerResult};

/// Body of a prepared request
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Parameters travel in the query string
    Empty,
    Json(BTreeMap<String, String>),
    Form(BTreeMap<String, String>),
    Multipart {
        fields: BTreeMap<String, String>,
        files: BTreeMap<String, PathBuf>,
    },
}

/// A fully rendered request, ready to send
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, String>,
    pub body: RequestBody,
}

impl PreparedRequest {
    /// First line of the request as it would appear on the wire
    pub fn request_line(&self) -> String {
        format!("{} {} HTTP/1.1", self.method, self.url)
    }
}

/// Raw response as received
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    /// Lowercase header names; repeated headers are joined with `, `
    pub headers: BTreeMap<String, String>,
    pub body: Bytes,
}

impl RawResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Something that can send a prepared request
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: &PreparedRequest) -> RunnerResult<RawResponse>;
}

#[async_trait]
impl<T: Dispatch + ?Sized> Dispatch for Arc<T> {
    async fn dispatch(&self, request: &PreparedRequest) -> RunnerResult<RawResponse> {
        (**self).dispatch(request).await
    }
}

/// [`Dispatch`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
}

impl HttpDispatcher {
    pub fn new(config: &SuiteConfig) -> RunnerResult<Self> {
        let mut builder = Client::builder().redirect(reqwest::redirect::Policy::limited(10));
        if config.timeout_ms > 0 {
            builder = builder.timeout(Duration::from_millis(config.timeout_ms));
        }
        Ok(Self {
            client: builder.build()?,
        })
    }
}

#[async_trait]
impl Dispatch for HttpDispatcher {
    async fn dispatch(&self, request: &PreparedRequest) -> RunnerResult<RawResponse> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            RunnerError::InvalidRequest {
                target: request.url.clone(),
                reason: format!("invalid HTTP method `{}`: {e}", request.method),
            }
        })?;

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(build_headers(&request.url, &request.headers)?);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(params) => builder.json(params),
            RequestBody::Form(params) => builder.form(params),
            RequestBody::Multipart { fields, files } => {
                builder.multipart(build_multipart(fields, files).await?)
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();

        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(&value);
                })
                .or_insert(value);
        }

        let body = response.bytes().await?;

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_headers(url: &str, input: &BTreeMap<String, String>) -> RunnerResult<HeaderMap> {
    let mut headers = HeaderMap::new();

    for (key, value) in input {
        if key.is_empty() {
            continue;
        }

        let header_name =
            HeaderName::from_bytes(key.as_bytes()).map_err(|e| RunnerError::InvalidRequest {
                target: url.to_string(),
                reason: format!("invalid header name `{key}`: {e}"),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| RunnerError::InvalidRequest {
            target: url.to_string(),
            reason: format!("invalid value for header `{key}`: {e}"),
        })?;
        headers.insert(header_name, header_value);
    }

    Ok(headers)
}

/// File contents are read eagerly so no handle outlives this call
async fn build_multipart(
    fields: &BTreeMap<String, String>,
    files: &BTreeMap<String, PathBuf>,
) -> RunnerResult<reqwest::multipart::Form> {
    let mut form = reqwest::multipart::Form::new();

    for (key, value) in fields {
        form = form.text(key.clone(), value.clone());
    }

    for (field, path) in files {
        let data = tokio::fs::read(path)
            .await
            .map_err(|source| RunnerError::Upload {
                path: path.clone(),
                source,
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| field.clone());
        form = form.part(field.clone(), reqwest::multipart::Part::bytes(data).file_name(file_name));
    }

    Ok(form)
}

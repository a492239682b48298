//! Client for the OPNsense REST API.
//!
//! Every call addresses `{base}/{module}/{controller}/{command}` with HTTP basic auth. Search
//! endpoints are paged; [OpnSenseApi::search] follows the pages until all rows are in.

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Performs one request against a path relative to the API base and decodes the JSON answer.
pub trait Transport {
    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ApiError>;

    /// Absolute URL of `path`, used in error messages.
    fn url(&self, path: &str) -> String {
        path.to_owned()
    }
}

/// [Transport] over HTTPS using a blocking reqwest client.
#[derive(Debug)]
pub struct HttpTransport {
    base: String,
    key: String,
    secret: String,
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(config: &ConnectionConfig) -> Result<Self, ApiError> {
        let base = config.url.trim_end_matches('/').to_owned();
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|source| ApiError::Transport {
                url: base.clone(),
                source,
            })?;

        Ok(HttpTransport {
            base,
            key: config.key.clone(),
            secret: config.secret.clone(),
            client,
        })
    }
}

impl Transport for HttpTransport {
    fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let url = self.url(path);
        debug!(?method, %url, "api request");

        let mut req = self
            .client
            .request(method.into(), &url)
            .basic_auth(&self.key, Some(&self.secret));
        if let Some(body) = body {
            req = req.json(body);
        }

        let transport = |source| ApiError::Transport {
            url: url.clone(),
            source,
        };

        let resp = req.send().map_err(transport)?;
        let status = resp.status();
        match status.as_u16() {
            401 => return Err(ApiError::Unauthorized { url: url.clone() }),
            403 => return Err(ApiError::Forbidden { url: url.clone() }),
            _ if !status.is_success() => {
                return Err(ApiError::Status {
                    url: url.clone(),
                    status: status.as_u16(),
                })
            }
            _ => {}
        }

        let text = resp.text().map_err(transport)?;
        serde_json::from_str(&text).map_err(|source| ApiError::Parse { url, source })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }
}

/// All rows of a paged search, plus whatever else the last page carried (e.g. `carp`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResult {
    pub rows: Vec<Value>,
    pub extra: Map<String, Value>,
}

pub struct OpnSenseApi<T> {
    transport: T,
}

impl<T: Transport> OpnSenseApi<T> {
    pub fn new(transport: T) -> Self {
        OpnSenseApi { transport }
    }

    pub fn get(&self, module: &str, controller: &str, command: &str) -> Result<Value, ApiError> {
        self.transport
            .request(Method::Get, &path(module, controller, command), None)
    }

    /// GETs a document and returns the array stored under `key`.
    pub fn get_list(
        &self,
        module: &str,
        controller: &str,
        command: &str,
        key: &str,
    ) -> Result<Vec<Value>, ApiError> {
        let path = path(module, controller, command);
        let mut document = self.transport.request(Method::Get, &path, None)?;
        match document.get_mut(key).map(Value::take) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(ApiError::Shape {
                url: self.transport.url(&path),
                reason: format!("no `{}` array", key),
            }),
        }
    }

    /// POSTs `{"current": n}` for n = 1, 2, ... and collects the `rows` of every page.
    ///
    /// Stops once `total <= rowCount * current` or all `total` rows are in. A page that does not
    /// reduce the number of missing rows fails with [ApiError::PaginationStalled].
    pub fn search(
        &self,
        module: &str,
        controller: &str,
        command: &str,
    ) -> Result<SearchResult, ApiError> {
        let path = path(module, controller, command);
        let shape = |reason: &str| ApiError::Shape {
            url: self.transport.url(&path),
            reason: reason.to_owned(),
        };

        let mut result = SearchResult::default();
        let mut current: u64 = 1;
        loop {
            let page = self
                .transport
                .request(Method::Post, &path, Some(&json!({ "current": current })))?;
            let mut page = match page {
                Value::Object(map) => map,
                _ => return Err(shape("page is not an object")),
            };

            let rows = match page.remove("rows") {
                Some(Value::Array(rows)) => rows,
                _ => return Err(shape("page has no `rows` array")),
            };
            let total = page
                .remove("total")
                .as_ref()
                .and_then(as_u64)
                .ok_or_else(|| shape("page has no `total`"))?;
            let row_count = page
                .remove("rowCount")
                .as_ref()
                .and_then(as_u64)
                .unwrap_or(rows.len() as u64);
            let page_no = page
                .remove("current")
                .as_ref()
                .and_then(as_u64)
                .unwrap_or(current)
                .max(1);

            let missing_before = total.saturating_sub(result.rows.len() as u64);
            result.rows.extend(rows);
            result.extra = page;
            let missing_after = total.saturating_sub(result.rows.len() as u64);

            debug!(
                %path,
                page = page_no,
                total,
                received = result.rows.len(),
                "search page"
            );

            if total <= row_count.saturating_mul(page_no) || missing_after == 0 {
                return Ok(result);
            }

            if missing_after >= missing_before {
                return Err(ApiError::PaginationStalled {
                    url: self.transport.url(&path),
                    total,
                    received: result.rows.len(),
                });
            }

            current = page_no + 1;
        }
    }
}

fn path(module: &str, controller: &str, command: &str) -> String {
    format!("{}/{}/{}", module, controller, command)
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::expiry::{extract_message, is_expired_response, ExpiryNotifier};
use super::transport::{ApiBody, ApiRequest, ApiResponse, Transport};
use crate::config::ApiConfig;
use crate::error::{Error, Result};

/// PostgREST-style query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// `select=*`
    pub fn all() -> Self {
        Self::new().select("*")
    }

    pub fn select(mut self, cols: &str) -> Self {
        self.params.push(("select".into(), cols.into()));
        self
    }

    pub fn order_asc(mut self, col: &str) -> Self {
        self.params.push(("order".into(), format!("{}.asc", col)));
        self
    }

    pub fn order_desc(mut self, col: &str) -> Self {
        self.params.push(("order".into(), format!("{}.desc", col)));
        self
    }

    pub fn eq(mut self, col: &str, value: impl Display) -> Self {
        self.params.push((col.into(), format!("eq.{}", value)));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.params.push(("limit".into(), n.to_string()));
        self
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Signed REST calls against the table, auth and object endpoints.
#[derive(Clone)]
pub struct RestClient {
    api: Option<Arc<ApiConfig>>,
    transport: Arc<dyn Transport>,
    expiry: ExpiryNotifier,
    warned_unconfigured: Arc<AtomicBool>,
}

impl RestClient {
    pub fn new(api: Option<ApiConfig>, transport: Arc<dyn Transport>, expiry: ExpiryNotifier) -> Self {
        Self {
            api: api.map(Arc::new),
            transport,
            expiry,
            warned_unconfigured: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api.is_some()
    }

    pub fn expiry(&self) -> &ExpiryNotifier {
        &self.expiry
    }

    pub fn api(&self) -> Result<&ApiConfig> {
        match &self.api {
            Some(api) => Ok(api),
            None => {
                if !self.warned_unconfigured.swap(true, Ordering::Relaxed) {
                    warn!("backend not configured; returning fallback results");
                }
                Err(Error::NotConfigured)
            }
        }
    }

    /// Request with `apikey` and a bearer (the anonymous key when `token` is `None`).
    pub fn request(&self, method: Method, path: &str, token: Option<&str>) -> Result<ApiRequest> {
        let api = self.api()?;
        let bearer = token.unwrap_or(&api.anon_key);
        Ok(ApiRequest {
            method,
            base_url: api.base_url.clone(),
            path: path.to_string(),
            query: Vec::new(),
            headers: vec![
                ("apikey".into(), api.anon_key.clone()),
                ("Authorization".into(), format!("Bearer {}", bearer)),
            ],
            body: ApiBody::Empty,
        })
    }

    pub async fn send(&self, req: ApiRequest) -> Result<ApiResponse> {
        self.transport.send(req).await
    }

    /// Typed failure for a non-2xx response; broadcasts expiry for session calls.
    pub fn failure(&self, resp: &ApiResponse, authenticated: bool) -> Error {
        let message = extract_message(&resp.json_value());
        if authenticated && is_expired_response(resp.status, message.as_deref()) {
            let message = message.unwrap_or_else(|| "session expired".into());
            self.expiry.notify(&message);
            return Error::AuthExpired {
                status: resp.status,
                message,
            };
        }
        Error::Backend {
            status: resp.status,
            message: message.unwrap_or_else(|| format!("request failed with status {}", resp.status)),
        }
    }

    /// Read with the anonymous, read-only credential.
    pub async fn fetch_rows(&self, table: &str, query: &Query) -> Result<Vec<Value>> {
        self.fetch_rows_as(table, query, None).await
    }

    /// Read as the signed-in user when `token` is given.
    #[instrument(skip(self, query, token), fields(table = %table))]
    pub async fn fetch_rows_as(&self, table: &str, query: &Query, token: Option<&str>) -> Result<Vec<Value>> {
        let mut req = self.request(Method::GET, &format!("/rest/{}", table), token)?;
        req.query = query.params().to_vec();
        let resp = self.send(req).await?;
        if !resp.is_success() {
            return Err(self.failure(&resp, token.is_some()));
        }
        let rows = match resp.json_value() {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        debug!(count = rows.len(), "rows fetched");
        Ok(rows)
    }

    pub async fn insert(&self, table: &str, rows: Value, token: &str) -> Result<Vec<Value>> {
        self.write(Method::POST, table, &Query::new(), Some(rows), token, "return=representation")
            .await
    }

    /// Insert that merges into an existing row with the same primary key.
    pub async fn upsert(&self, table: &str, rows: Value, token: &str) -> Result<Vec<Value>> {
        self.write(
            Method::POST,
            table,
            &Query::new(),
            Some(rows),
            token,
            "return=representation,resolution=merge-duplicates",
        )
        .await
    }

    pub async fn patch(&self, table: &str, filter: &Query, fields: Value, token: &str) -> Result<Vec<Value>> {
        self.write(Method::PATCH, table, filter, Some(fields), token, "return=representation")
            .await
    }

    pub async fn delete(&self, table: &str, filter: &Query, token: &str) -> Result<()> {
        self.write(Method::DELETE, table, filter, None, token, "return=minimal")
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, filter, body, token), fields(method = %method, table = %table))]
    async fn write(
        &self,
        method: Method,
        table: &str,
        filter: &Query,
        body: Option<Value>,
        token: &str,
        prefer: &str,
    ) -> Result<Vec<Value>> {
        let mut req = self.request(method, &format!("/rest/{}", table), Some(token))?;
        req.query = filter.params().to_vec();
        req.headers.push(("Content-Type".into(), "application/json".into()));
        req.headers.push(("Prefer".into(), prefer.into()));
        if let Some(body) = body {
            req.body = ApiBody::Json(body);
        }

        let resp = self.send(req).await?;
        if !resp.is_success() {
            let err = self.failure(&resp, true);
            warn!(error = %err, "write rejected");
            return Err(err);
        }
        Ok(match resp.json_value() {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }
}

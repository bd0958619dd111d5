//! In-memory stand-in for the hosted backend, for unit tests.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use serde_json::{json, Value};

use super::coerce::value_text;
use super::transport::{ApiBody, ApiRequest, ApiResponse, Transport};
use crate::error::Result;

#[derive(Default)]
struct Table {
    rows: Vec<Value>,
    columns: BTreeSet<String>,
}

struct Failure {
    method: Method,
    path: String,
    status: u16,
    message: String,
    remaining: Option<usize>,
}

struct Scripted {
    method: Method,
    path: String,
    status: u16,
    body: Value,
}

#[derive(Default)]
struct FakeState {
    tables: HashMap<String, Table>,
    failures: Vec<Failure>,
    scripted: Vec<Scripted>,
    requests: Vec<ApiRequest>,
    objects: HashMap<String, (Bytes, String)>,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
}

fn respond(status: u16, body: Value) -> ApiResponse {
    let body = if body.is_null() {
        Bytes::new()
    } else {
        Bytes::from(body.to_string())
    };
    ApiResponse { status, body }
}

fn message(status: u16, msg: &str) -> ApiResponse {
    respond(status, json!({ "message": msg }))
}

fn cmp_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => value_text(a).cmp(&value_text(b)),
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, rows: Vec<Value>) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let table = st.tables.entry(name.to_string()).or_default();
            for row in &rows {
                if let Some(obj) = row.as_object() {
                    table.columns.extend(obj.keys().cloned());
                }
            }
            table.rows.extend(rows);
        }
        self
    }

    pub fn with_columns(self, name: &str, cols: &[&str]) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let table = st.tables.entry(name.to_string()).or_default();
            table.columns.extend(cols.iter().map(|c| c.to_string()));
        }
        self
    }

    pub fn with_object(self, key: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(key.to_string(), (Bytes::from_static(b"img"), "image/png".into()));
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Fails the next matching request once.
    pub fn fail(&self, method: Method, path: &str, status: u16, msg: &str) {
        self.push_failure(method, path, status, msg, Some(1));
    }

    pub fn fail_always(&self, method: Method, path: &str, status: u16, msg: &str) {
        self.push_failure(method, path, status, msg, None);
    }

    fn push_failure(&self, method: Method, path: &str, status: u16, msg: &str, remaining: Option<usize>) {
        self.state.lock().unwrap().failures.push(Failure {
            method,
            path: path.to_string(),
            status,
            message: msg.to_string(),
            remaining,
        });
    }

    pub fn script(&self, method: Method, path: &str, status: u16, body: Value) {
        let mut st = self.state.lock().unwrap();
        st.scripted.retain(|s| !(s.method == method && s.path == path));
        st.scripted.push(Scripted {
            method,
            path: path.to_string(),
            status,
            body,
        });
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn last_request(&self) -> Option<ApiRequest> {
        self.state.lock().unwrap().requests.last().cloned()
    }

    pub fn count(&self, method: &Method, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| &r.method == method && r.path == path)
            .count()
    }

    pub fn has_object(&self, key: &str) -> bool {
        self.state.lock().unwrap().objects.contains_key(key)
    }

    pub fn object_keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.state.lock().unwrap().objects.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl FakeState {
    fn table_op(&mut self, req: &ApiRequest, name: &str) -> ApiResponse {
        let Some(table) = self.tables.get_mut(name) else {
            return message(404, &format!("relation \"public.{}\" does not exist", name));
        };

        let mut filters = Vec::new();
        let mut order = None;
        let mut limit = None;
        for (k, v) in &req.query {
            match k.as_str() {
                "select" => {}
                "order" => order = Some(v.clone()),
                "limit" => limit = v.parse::<usize>().ok(),
                col => {
                    if let Some(val) = v.strip_prefix("eq.") {
                        filters.push((col.to_string(), val.to_string()));
                    }
                }
            }
        }
        for (col, _) in &filters {
            if !table.columns.is_empty() && !table.columns.contains(col) {
                return message(400, &format!("column {}.{} does not exist", name, col));
            }
        }
        let matches = |row: &Value| {
            filters
                .iter()
                .all(|(c, v)| row.get(c).and_then(value_text).as_deref() == Some(v.as_str()))
        };

        let body = match &req.body {
            ApiBody::Json(v) => v.clone(),
            _ => Value::Null,
        };
        let wants_rows = req
            .header("Prefer")
            .is_some_and(|p| p.contains("return=representation"));

        if req.method == Method::GET {
            let mut rows: Vec<Value> = table.rows.iter().filter(|r| matches(*r)).cloned().collect();
            if let Some(order) = order {
                let (col, dir) = order.split_once('.').unwrap_or((order.as_str(), "asc"));
                rows.sort_by(|a, b| {
                    let o = cmp_values(a.get(col).unwrap_or(&Value::Null), b.get(col).unwrap_or(&Value::Null));
                    if dir == "desc" { o.reverse() } else { o }
                });
            }
            if let Some(n) = limit {
                rows.truncate(n);
            }
            return respond(200, Value::Array(rows));
        }

        if req.method == Method::POST {
            let incoming = match body {
                Value::Array(rows) => rows,
                Value::Null => Vec::new(),
                other => vec![other],
            };
            let merge = req
                .header("Prefer")
                .is_some_and(|p| p.contains("resolution=merge-duplicates"));
            let mut out = Vec::new();
            for mut row in incoming {
                let Some(obj) = row.as_object() else {
                    return message(400, "row must be an object");
                };
                if table.columns.is_empty() {
                    table.columns.extend(obj.keys().cloned());
                } else if let Some(bad) = obj.keys().find(|k| !table.columns.contains(*k)) {
                    return message(400, &format!("column {}.{} does not exist", name, bad));
                }
                if row.get("id").is_none() && table.columns.contains("id") {
                    let next = table
                        .rows
                        .iter()
                        .filter_map(|r| r.get("id").and_then(Value::as_i64))
                        .max()
                        .unwrap_or(0)
                        + 1;
                    row["id"] = json!(next);
                }
                let existing = row.get("id").and_then(|id| {
                    table.rows.iter().position(|r| r.get("id") == Some(id))
                });
                match existing {
                    Some(idx) if merge => {
                        if let (Some(dst), Some(src)) = (table.rows[idx].as_object_mut(), row.as_object()) {
                            for (k, v) in src {
                                dst.insert(k.clone(), v.clone());
                            }
                        }
                        out.push(table.rows[idx].clone());
                    }
                    Some(_) => return message(409, "duplicate key value violates unique constraint"),
                    None => {
                        table.rows.push(row.clone());
                        out.push(row);
                    }
                }
            }
            return respond(201, if wants_rows { Value::Array(out) } else { Value::Null });
        }

        if req.method == Method::PATCH {
            let Some(fields) = body.as_object() else {
                return message(400, "patch body must be an object");
            };
            if let Some(bad) = fields.keys().find(|k| !table.columns.is_empty() && !table.columns.contains(*k)) {
                return message(400, &format!("column {}.{} does not exist", name, bad));
            }
            let mut out = Vec::new();
            for row in table.rows.iter_mut().filter(|r| matches(&**r)) {
                if let Some(obj) = row.as_object_mut() {
                    for (k, v) in fields {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                out.push(row.clone());
            }
            return respond(200, if wants_rows { Value::Array(out) } else { Value::Null });
        }

        if req.method == Method::DELETE {
            table.rows.retain(|r| !matches(r));
            return respond(204, Value::Null);
        }

        message(405, "method not allowed")
    }

    fn object_op(&mut self, req: &ApiRequest, key: &str) -> ApiResponse {
        if req.method == Method::POST {
            let (data, content_type) = match &req.body {
                ApiBody::Raw { data, content_type } => (data.clone(), content_type.clone()),
                _ => return message(400, "missing file body"),
            };
            self.objects.insert(key.to_string(), (data, content_type));
            return respond(200, json!({ "Key": key }));
        }
        if req.method == Method::DELETE {
            return match self.objects.remove(key) {
                Some(_) => respond(200, json!([{ "name": key }])),
                None => message(404, "Object not found"),
            };
        }
        message(405, "method not allowed")
    }
}

#[async_trait]
impl Transport for FakeBackend {
    async fn send(&self, req: ApiRequest) -> Result<ApiResponse> {
        let mut st = self.state.lock().unwrap();
        st.requests.push(req.clone());

        if let Some(idx) = st
            .failures
            .iter()
            .position(|f| f.method == req.method && f.path == req.path)
        {
            let (resp, exhausted) = {
                let f = &mut st.failures[idx];
                let exhausted = match f.remaining.as_mut() {
                    Some(n) => {
                        *n -= 1;
                        *n == 0
                    }
                    None => false,
                };
                (message(f.status, &f.message), exhausted)
            };
            if exhausted {
                st.failures.remove(idx);
            }
            return Ok(resp);
        }

        if let Some(s) = st
            .scripted
            .iter()
            .find(|s| s.method == req.method && s.path == req.path)
        {
            return Ok(respond(s.status, s.body.clone()));
        }

        let path = req.path.clone();
        if let Some(name) = path.strip_prefix("/rest/") {
            return Ok(st.table_op(&req, name));
        }
        if let Some(key) = path.strip_prefix("/storage/object/") {
            return Ok(st.object_op(&req, key));
        }
        Ok(message(404, "not found"))
    }
}

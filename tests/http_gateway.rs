//! Drives the real reqwest transport against a local axum server.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use sleepdex::clock::SystemClock;
use sleepdex::config::AppConfig;
use sleepdex::gateway::{ExpiryNotifier, HttpTransport, Query, RestClient};
use sleepdex::Error;

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    table: String,
    query: Option<String>,
    apikey: Option<String>,
    authorization: Option<String>,
    prefer: Option<String>,
    body: Option<Value>,
}

type Log = Arc<Mutex<Vec<Seen>>>;

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

fn seen(method: &str, table: String, query: Option<String>, headers: &HeaderMap, body: Option<Value>) -> Seen {
    Seen {
        method: method.into(),
        table,
        query,
        apikey: header(headers, "apikey"),
        authorization: header(headers, "authorization"),
        prefer: header(headers, "prefer"),
        body,
    }
}

async fn list(
    State(log): State<Log>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    log.lock().unwrap().push(seen("GET", table.clone(), query, &headers, None));
    if table == "private" {
        return (StatusCode::UNAUTHORIZED, Json(json!({ "message": "JWT expired" })));
    }
    (StatusCode::OK, Json(json!([{ "id": 3, "name": "Oran Berry" }])))
}

async fn create(
    State(log): State<Log>,
    Path(table): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    log.lock().unwrap().push(seen("POST", table, query, &headers, Some(body.clone())));
    (StatusCode::CREATED, Json(json!([body])))
}

async fn serve() -> (String, Log) {
    let log: Log = Arc::default();
    let app = Router::new()
        .route("/rest/:table", get(list).post(create))
        .with_state(log.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), log)
}

fn client(base_url: &str) -> RestClient {
    RestClient::new(
        AppConfig::with_api(base_url, "anon-key").api,
        Arc::new(HttpTransport::new()),
        ExpiryNotifier::new(Arc::new(SystemClock)),
    )
}

#[tokio::test]
async fn reads_are_signed_with_the_anonymous_key() {
    let (base, log) = serve().await;
    let rest = client(&base);

    let rows = rest
        .fetch_rows("berries", &Query::all().eq("id", 3).limit(1))
        .await
        .unwrap();
    assert_eq!(rows, vec![json!({ "id": 3, "name": "Oran Berry" })]);

    let req = log.lock().unwrap()[0].clone();
    assert_eq!(req.method, "GET");
    assert_eq!(req.table, "berries");
    assert_eq!(req.query.as_deref(), Some("select=*&id=eq.3&limit=1"));
    assert_eq!(req.apikey.as_deref(), Some("anon-key"));
    assert_eq!(req.authorization.as_deref(), Some("Bearer anon-key"));
}

#[tokio::test]
async fn writes_carry_the_user_token_and_prefer_header() {
    let (base, log) = serve().await;
    let rest = client(&base);

    let rows = rest
        .insert("berries", json!({ "name": "Pecha Berry" }), "user-token")
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], "Pecha Berry");

    let req = log.lock().unwrap()[0].clone();
    assert_eq!(req.method, "POST");
    assert_eq!(req.authorization.as_deref(), Some("Bearer user-token"));
    assert_eq!(req.prefer.as_deref(), Some("return=representation"));
    assert_eq!(req.body, Some(json!({ "name": "Pecha Berry" })));
}

#[tokio::test]
async fn expired_token_is_classified_and_broadcast() {
    let (base, _log) = serve().await;
    let rest = client(&base);
    let mut rx = rest.expiry().subscribe();

    let err = rest
        .fetch_rows_as("private", &Query::all(), Some("stale-token"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AuthExpired { status: 401, .. }));
    assert_eq!(rx.recv().await.unwrap().message, "JWT expired");
}

#[tokio::test]
async fn unconfigured_client_never_sends() {
    let rest = RestClient::new(None, Arc::new(HttpTransport::new()), ExpiryNotifier::new(Arc::new(SystemClock)));
    assert!(matches!(
        rest.fetch_rows("berries", &Query::all()).await,
        Err(Error::NotConfigured)
    ));
}

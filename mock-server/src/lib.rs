//! In-process HTTP server used to exercise the session transport end-to-end.
//!
//! Each route reproduces one behaviour the transport has to cope with: plain
//! text and binary bodies, 302 and 301 redirects, cookie issuing and echoing,
//! arbitrary status codes, slow responses for cancellation tests, and an echo
//! endpoint that reflects method, headers and body back to the caller.

use std::{collections::BTreeMap, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;

pub const TEXT_BODY: &str = "hello";
pub const BINARY_BODY: &[u8] = &[0, 1, 2, 254, 255];

#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    pub to: String,
}

#[derive(Debug, Deserialize)]
pub struct CookieQuery {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct SlowQuery {
    #[serde(default = "default_delay_ms")]
    pub ms: u64,
}

fn default_delay_ms() -> u64 {
    500
}

pub fn app() -> Router {
    Router::new()
        .route("/text", get(text))
        .route("/bytes", get(binary))
        .route("/redirect/found", any(redirect_found))
        .route("/redirect/moved", any(redirect_moved))
        .route("/cookies/set", get(set_cookie))
        .route("/cookies/echo", get(echo_cookies))
        .route("/session/cookies/echo", get(echo_cookies))
        .route("/headers", get(echo_headers))
        .route("/status/{code}", get(status))
        .route("/slow", get(slow))
        .route("/echo", any(echo))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

async fn text() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.append("x-trace", HeaderValue::from_static("a"));
    headers.append("x-trace", HeaderValue::from_static("b"));
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    (headers, TEXT_BODY)
}

async fn binary() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/octet-stream")],
        BINARY_BODY,
    )
}

async fn redirect_found(Query(query): Query<RedirectQuery>) -> impl IntoResponse {
    (StatusCode::FOUND, [(header::LOCATION, query.to)])
}

async fn redirect_moved(Query(query): Query<RedirectQuery>) -> impl IntoResponse {
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, query.to)])
}

async fn set_cookie(Query(query): Query<CookieQuery>) -> impl IntoResponse {
    let cookie = format!("{}={}; Path=/", query.name, query.value);
    ([(header::SET_COOKIE, cookie)], "ok")
}

async fn echo_cookies(headers: HeaderMap) -> String {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Every request header, lower-cased name to comma-joined values.
async fn echo_headers(headers: HeaderMap) -> Json<BTreeMap<String, String>> {
    let mut echoed: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers.iter() {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        echoed
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    Json(echoed)
}

async fn status(Path(code): Path<u16>) -> impl IntoResponse {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST);
    (status, format!("status {code}"))
}

async fn slow(Query(query): Query<SlowQuery>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(query.ms)).await;
    "slow"
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> impl IntoResponse {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    (
        [
            (HeaderName::from_static("x-echo-method"), method.to_string()),
            (HeaderName::from_static("x-echo-content-type"), content_type),
        ],
        body,
    )
}

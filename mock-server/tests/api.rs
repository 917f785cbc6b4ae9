use axum::http::{self, header, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, BINARY_BODY, TEXT_BODY};
use tower::ServiceExt;

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

async fn body_string(response: axum::response::Response) -> String {
    String::from_utf8(body_bytes(response).await.to_vec()).unwrap()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

// --- bodies ---

#[tokio::test]
async fn text_returns_hello_with_duplicate_trace_headers() {
    let resp = app().oneshot(get("/text")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let traces: Vec<_> = resp
        .headers()
        .get_all("x-trace")
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(traces, vec!["a", "b"]);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_string(resp).await, TEXT_BODY);
}

#[tokio::test]
async fn bytes_returns_binary_payload() {
    let resp = app().oneshot(get("/bytes")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(&body_bytes(resp).await[..], BINARY_BODY);
}

// --- redirects ---

#[tokio::test]
async fn redirect_found_uses_302() {
    let resp = app().oneshot(get("/redirect/found?to=/text")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::FOUND);
    assert_eq!(resp.headers()[header::LOCATION], "/text");
}

#[tokio::test]
async fn redirect_moved_uses_301() {
    let resp = app().oneshot(get("/redirect/moved?to=/text")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(resp.headers()[header::LOCATION], "/text");
}

#[tokio::test]
async fn redirect_found_answers_any_method() {
    let request = Request::builder()
        .method(http::Method::POST)
        .uri("/redirect/found?to=/text")
        .body(String::from("payload"))
        .unwrap();
    let resp = app().oneshot(request).await.unwrap();

    assert_eq!(resp.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn redirect_without_target_is_rejected() {
    let resp = app().oneshot(get("/redirect/found")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- cookies ---

#[tokio::test]
async fn set_cookie_issues_root_scoped_cookie() {
    let resp = app()
        .oneshot(get("/cookies/set?name=session&value=abc"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::SET_COOKIE], "session=abc; Path=/");
}

#[tokio::test]
async fn echo_cookies_reflects_cookie_header() {
    let req = Request::builder()
        .uri("/cookies/echo")
        .header(header::COOKIE, "a=1; b=2")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(body_string(resp).await, "a=1; b=2");
}

#[tokio::test]
async fn echo_cookies_is_empty_without_cookie_header() {
    let resp = app().oneshot(get("/cookies/echo")).await.unwrap();

    assert_eq!(body_string(resp).await, "");
}

// --- headers / status / echo ---

#[tokio::test]
async fn headers_echoes_request_headers() {
    let req = Request::builder()
        .uri("/headers")
        .header("x-custom", "one")
        .header(header::USER_AGENT, "probe/1")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    let echoed: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(echoed["x-custom"], "one");
    assert_eq!(echoed["user-agent"], "probe/1");
}

#[tokio::test]
async fn status_returns_requested_code() {
    let resp = app().oneshot(get("/status/418")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_string(resp).await, "status 418");
}

#[tokio::test]
async fn echo_reflects_method_content_type_and_body() {
    let req = Request::builder()
        .method(http::Method::PUT)
        .uri("/echo")
        .header(header::CONTENT_TYPE, "application/json; charset=utf-8")
        .body(r#"{"k":1}"#.to_string())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();

    assert_eq!(resp.headers()["x-echo-method"], "PUT");
    assert_eq!(
        resp.headers()["x-echo-content-type"],
        "application/json; charset=utf-8"
    );
    assert_eq!(body_string(resp).await, r#"{"k":1}"#);
}

#[tokio::test]
async fn slow_completes_after_delay() {
    let resp = app().oneshot(get("/slow?ms=10")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_string(resp).await, "slow");
}

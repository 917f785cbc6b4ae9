//! Cookie-backed HTTP transport with a hot-swappable handle.
//!
//! # Design
//! The live `reqwest::Client` sits behind an `ArcSwap`. `execute` takes a
//! snapshot of the current handle once, at start, and uses it for the whole
//! call including redirect hops. `set_proxy` builds the replacement first and
//! then publishes it; the previous client is dropped only when the last
//! in-flight call holding its snapshot finishes, so no request ever runs on a
//! disposed handle.
//!
//! The cookie jar is shared by `Arc` with every handle ever built, so swapping
//! handles never loses session state.

use std::io::Cursor;
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::StatusCode;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::cancel::CancelSignal;
use crate::config::TransportConfig;
use crate::cookies::{Cookie, CookieJar};
use crate::error::TransportError;
use crate::http::{RequestDescriptor, ResponseBody, ResponseDescriptor, ResultKind};

/// Proxy used by a transport handle.
#[derive(Debug, Clone)]
pub enum ProxySetting {
    /// No proxy, environment proxy variables ignored.
    Direct,
    /// Every scheme goes through this proxy URI.
    Uri(String),
    /// A fully configured proxy (auth, per-scheme rules, bypass lists).
    Custom(reqwest::Proxy),
}

/// The unit that performs network I/O. Replaced wholesale by `set_proxy`.
#[derive(Debug)]
pub struct TransportHandle {
    client: reqwest::Client,
    proxy: ProxySetting,
    generation: u64,
}

impl TransportHandle {
    /// Starts at 0 and increases by one per `set_proxy`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn proxy(&self) -> &ProxySetting {
        &self.proxy
    }
}

#[derive(Debug)]
pub struct HttpTransport {
    config: TransportConfig,
    jar: Arc<CookieJar>,
    current: ArcSwap<TransportHandle>,
    swap_lock: Mutex<()>,
}

impl HttpTransport {
    pub fn new(config: TransportConfig, jar: Arc<CookieJar>) -> Result<Self, TransportError> {
        let proxy = match &config.proxy {
            Some(uri) => ProxySetting::Uri(uri.clone()),
            None => ProxySetting::Direct,
        };
        let client = build_client(&config, &jar, &proxy)?;
        Ok(Self {
            config,
            jar,
            current: ArcSwap::from_pointee(TransportHandle {
                client,
                proxy,
                generation: 0,
            }),
            swap_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    /// Snapshot of the handle new requests will use.
    pub fn current_handle(&self) -> Arc<TransportHandle> {
        self.current.load_full()
    }

    pub fn handle_generation(&self) -> u64 {
        self.current.load().generation
    }

    pub fn proxy(&self) -> ProxySetting {
        self.current.load().proxy.clone()
    }

    /// Executes `request`, chasing 302 redirects, and materializes the body
    /// as the request's `ResultKind` asks.
    #[instrument(skip_all, fields(request_id = %request.id(), method = request.method().as_str()))]
    pub async fn execute(
        &self,
        request: RequestDescriptor,
        cancel: &CancelSignal,
    ) -> Result<ResponseDescriptor, TransportError> {
        cancel.check()?;
        let handle = self.current.load_full();
        let request = Arc::new(request);

        debug!(url = %request.url(), generation = handle.generation, "sending request");
        let wire = self.build_wire_request(&handle, &request);
        let mut response = cancel.guard(wire.send()).await??;

        // Only 302 is chased here, always as a bare GET.
        while response.status() == StatusCode::FOUND {
            let Some(location) = response.headers().get(LOCATION) else {
                break;
            };
            let target = resolve_location(response.url(), location)?;
            debug!(location = %target, "chasing 302");
            response = cancel.guard(handle.client.get(target).send()).await??;
        }

        let status = response.status();
        if !status.is_success() {
            let body = error_body(status, cancel.guard(response.text()).await?);
            debug!(status = status.as_u16(), "request failed");
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let final_url = response.url().clone();
        let headers = merge_headers(response.headers());
        let body = self
            .materialize(response, request.result_kind(), cancel)
            .await?;
        debug!(status = status.as_u16(), "request completed");

        Ok(ResponseDescriptor {
            status: status.as_u16(),
            headers,
            body,
            final_url,
            request,
        })
    }

    /// Replaces the current handle with one using `proxy`.
    ///
    /// The new client is built before the swap; only the publish itself runs
    /// under the lock. Calls already in flight keep their own snapshot.
    pub fn set_proxy(&self, proxy: ProxySetting) -> Result<(), TransportError> {
        let client = build_client(&self.config, &self.jar, &proxy)?;
        let (previous, generation) = {
            let _swap = self.swap_lock.lock();
            let generation = self.current.load().generation + 1;
            let previous = self.current.swap(Arc::new(TransportHandle {
                client,
                proxy,
                generation,
            }));
            (previous, generation)
        };
        info!(
            previous = previous.generation,
            generation, "transport handle replaced"
        );
        drop(previous);
        Ok(())
    }

    pub fn get_cookie(&self, name: &str, url: &Url) -> Option<Cookie> {
        self.jar.get_cookie(name, url)
    }

    pub fn get_cookies(&self, url: &Url) -> Vec<Cookie> {
        self.jar.get_cookies(url)
    }

    fn build_wire_request(
        &self,
        handle: &TransportHandle,
        request: &RequestDescriptor,
    ) -> reqwest::RequestBuilder {
        let url = request.url();
        let mut wire = handle.client.request(request.method().into(), url.clone());

        for (name, value) in request.headers() {
            if name.eq_ignore_ascii_case(COOKIE.as_str()) {
                // The jar decides what goes out; the literal header never does.
                self.jar.merge_request_header(value, url);
            } else if !name.eq_ignore_ascii_case(CONTENT_TYPE.as_str()) {
                wire = wire.header(name.as_str(), value.as_str());
            }
        }

        match request.body() {
            Some(body) if request.method().sends_body() => {
                wire = wire
                    .header(CONTENT_TYPE, body.content_type())
                    .body(body.data.clone());
            }
            Some(_) => warn!("dropping body declared on a GET request"),
            None => {}
        }
        wire
    }

    async fn materialize(
        &self,
        response: reqwest::Response,
        kind: ResultKind,
        cancel: &CancelSignal,
    ) -> Result<ResponseBody, TransportError> {
        let body = match kind {
            ResultKind::Text => {
                let text = cancel
                    .guard(response.text_with_charset(&self.config.default_charset))
                    .await??;
                ResponseBody::Text(text)
            }
            ResultKind::Bytes => {
                let bytes = cancel.guard(response.bytes()).await??;
                ResponseBody::Bytes(bytes.to_vec())
            }
            ResultKind::SeekableStream => {
                let bytes = cancel.guard(response.bytes()).await??;
                ResponseBody::Stream(Cursor::new(bytes.to_vec()))
            }
        };
        Ok(body)
    }
}

fn build_client(
    config: &TransportConfig,
    jar: &Arc<CookieJar>,
    proxy: &ProxySetting,
) -> Result<reqwest::Client, TransportError> {
    let redirect = if config.follow_redirects {
        Policy::limited(config.max_redirects)
    } else {
        Policy::none()
    };
    let builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(config.timeout())
        .redirect(redirect)
        .cookie_provider(Arc::clone(jar));
    let builder = match proxy {
        ProxySetting::Direct => builder.no_proxy(),
        ProxySetting::Uri(uri) => {
            let proxy = reqwest::Proxy::all(uri.as_str()).map_err(|source| {
                TransportError::InvalidProxy {
                    proxy: uri.clone(),
                    source,
                }
            })?;
            builder.proxy(proxy)
        }
        ProxySetting::Custom(proxy) => builder.proxy(proxy.clone()),
    };
    Ok(builder.build()?)
}

/// Body of a failed response. A body that cannot be read is logged and
/// reported as empty so the status still reaches the caller.
fn error_body(status: StatusCode, body: Result<String, reqwest::Error>) -> String {
    body.unwrap_or_else(|err| {
        warn!(status = status.as_u16(), error = %err, "failed to read error response body");
        String::new()
    })
}

fn resolve_location(base: &Url, location: &HeaderValue) -> Result<Url, TransportError> {
    location
        .to_str()
        .ok()
        .and_then(|raw| base.join(raw).ok())
        .ok_or_else(|| TransportError::InvalidRedirect {
            location: String::from_utf8_lossy(location.as_bytes()).into_owned(),
        })
}

/// Headers that describe the payload rather than the response envelope.
fn is_payload_header(name: &HeaderName) -> bool {
    let name = name.as_str();
    name.starts_with("content-") || matches!(name, "expires" | "last-modified" | "allow")
}

/// Envelope headers first, then payload headers; repeated names keep every value.
fn merge_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    let (payload, envelope): (Vec<_>, Vec<_>) =
        headers.iter().partition(|(name, _)| is_payload_header(name));
    envelope
        .into_iter()
        .chain(payload)
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> HttpTransport {
        HttpTransport::new(TransportConfig::default(), Arc::new(CookieJar::new())).unwrap()
    }

    #[test]
    fn merge_puts_payload_headers_after_envelope_headers() {
        let mut headers = HeaderMap::new();
        headers.append(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.append("x-trace", HeaderValue::from_static("a"));
        headers.append("last-modified", HeaderValue::from_static("yesterday"));
        headers.append("x-trace", HeaderValue::from_static("b"));
        headers.append("date", HeaderValue::from_static("today"));

        let merged = merge_headers(&headers);
        let names: Vec<_> = merged.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(
            names,
            vec!["x-trace", "x-trace", "date", "content-type", "last-modified"]
        );
        assert_eq!(merged[0].1, "a");
        assert_eq!(merged[1].1, "b");
    }

    #[test]
    fn resolve_location_handles_relative_and_absolute_targets() {
        let base = Url::parse("http://h/a/b").unwrap();
        let relative = resolve_location(&base, &HeaderValue::from_static("/c")).unwrap();
        assert_eq!(relative.as_str(), "http://h/c");
        let absolute =
            resolve_location(&base, &HeaderValue::from_static("https://other/x")).unwrap();
        assert_eq!(absolute.as_str(), "https://other/x");
    }

    #[test]
    fn error_body_keeps_text_and_tolerates_read_failures() {
        assert_eq!(
            error_body(StatusCode::NOT_FOUND, Ok("missing".to_string())),
            "missing"
        );
        let read_failure = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        assert_eq!(error_body(StatusCode::BAD_GATEWAY, Err(read_failure)), "");
    }

    #[test]
    fn resolve_location_rejects_garbage() {
        let base = Url::parse("http://h/").unwrap();
        let err = resolve_location(&base, &HeaderValue::from_static("http://[::1")).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRedirect { .. }));
    }

    #[test]
    fn new_transport_starts_at_generation_zero_without_proxy() {
        let transport = transport();
        assert_eq!(transport.handle_generation(), 0);
        assert!(matches!(transport.proxy(), ProxySetting::Direct));
    }

    #[test]
    fn configured_proxy_is_used_for_first_handle() {
        let config = TransportConfig {
            proxy: Some("http://127.0.0.1:9".to_string()),
            ..TransportConfig::default()
        };
        let transport = HttpTransport::new(config, Arc::new(CookieJar::new())).unwrap();
        assert!(matches!(transport.proxy(), ProxySetting::Uri(uri) if uri == "http://127.0.0.1:9"));
    }

    #[test]
    fn set_proxy_publishes_new_handle_and_keeps_jar() {
        let transport = transport();
        let jar = Arc::clone(transport.cookie_jar());
        let before = transport.current_handle();

        transport
            .set_proxy(ProxySetting::Uri("http://127.0.0.1:9".to_string()))
            .unwrap();

        assert_eq!(transport.handle_generation(), 1);
        assert!(matches!(transport.proxy(), ProxySetting::Uri(_)));
        assert_eq!(before.generation(), 0);
        assert!(Arc::ptr_eq(&jar, transport.cookie_jar()));
    }

    #[test]
    fn invalid_proxy_leaves_current_handle_untouched() {
        let transport = transport();
        let err = transport
            .set_proxy(ProxySetting::Uri("not a proxy uri".to_string()))
            .unwrap_err();
        assert!(matches!(err, TransportError::InvalidProxy { .. }));
        assert_eq!(transport.handle_generation(), 0);
    }

    #[test]
    fn cookie_header_is_routed_into_the_jar() {
        let transport = transport();
        let handle = transport.current_handle();
        let request = RequestDescriptor::get("http://h/app/page")
            .header("Cookie", "sid=1")
            .header("X-Custom", "yes")
            .build()
            .unwrap();

        let wire = transport
            .build_wire_request(&handle, &request)
            .build()
            .unwrap();

        assert!(wire.headers().get(COOKIE).is_none());
        assert_eq!(wire.headers()["x-custom"], "yes");
        let url = Url::parse("http://h/app/other").unwrap();
        assert_eq!(transport.get_cookie("sid", &url).unwrap().value, "1");
    }

    #[test]
    fn explicit_content_type_header_is_not_copied() {
        let transport = transport();
        let handle = transport.current_handle();
        let request = RequestDescriptor::post("http://h/")
            .header("Content-Type", "text/html")
            .text_body("{}", "application/json")
            .build()
            .unwrap();

        let wire = transport
            .build_wire_request(&handle, &request)
            .build()
            .unwrap();

        let values: Vec<_> = wire.headers().get_all(CONTENT_TYPE).iter().collect();
        assert_eq!(values, vec!["application/json; charset=utf-8"]);
    }

    #[test]
    fn get_body_is_dropped_but_other_methods_keep_it() {
        let transport = transport();
        let handle = transport.current_handle();

        let get = RequestDescriptor::get("http://h/")
            .text_body("ignored", "text/plain")
            .build()
            .unwrap();
        let wire = transport.build_wire_request(&handle, &get).build().unwrap();
        assert!(wire.body().is_none());
        assert!(wire.headers().get(CONTENT_TYPE).is_none());

        let options = RequestDescriptor::builder(crate::HttpMethod::Options, "http://h/")
            .bytes_body(vec![1, 2, 3], "application/octet-stream")
            .build()
            .unwrap();
        let wire = transport
            .build_wire_request(&handle, &options)
            .build()
            .unwrap();
        assert_eq!(wire.body().and_then(|b| b.as_bytes()), Some(&[1u8, 2, 3][..]));
        assert_eq!(wire.headers()[CONTENT_TYPE], "application/octet-stream");
    }
}

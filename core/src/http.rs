//! Request and response descriptors.
//!
//! # Design
//! A `RequestDescriptor` is plain data describing one call: method, URL,
//! headers, optional body and the `ResultKind` the caller wants back. It is
//! immutable once built; `RequestBuilder` is the only way to make one. The
//! transport turns it into a wire request and hands back a
//! `ResponseDescriptor` whose body variant always matches the requested
//! `ResultKind`.

use std::io::Cursor;
use std::sync::Arc;

use url::Url;
use uuid::Uuid;

use crate::error::TransportError;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Head,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Whether a declared body is sent for this method.
    ///
    /// Only GET is treated as bodyless. HEAD, OPTIONS and TRACE carry a body
    /// when the descriptor declares one, which is looser than RFC 9110 and
    /// intentional: callers of this transport rely on it.
    pub fn sends_body(self) -> bool {
        !matches!(self, HttpMethod::Get)
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
            HttpMethod::Options => reqwest::Method::OPTIONS,
            HttpMethod::Trace => reqwest::Method::TRACE,
        }
    }
}

/// How the caller wants the response body materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultKind {
    #[default]
    Text,
    Bytes,
    /// The whole body is buffered, then exposed as a seekable in-memory
    /// stream. This is not incremental streaming.
    SeekableStream,
}

/// Raw request payload with its declared media type and charset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestBody {
    pub data: Vec<u8>,
    pub media_type: String,
    pub charset: Option<String>,
}

impl RequestBody {
    /// UTF-8 text payload.
    pub fn text(text: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            data: text.into().into_bytes(),
            media_type: media_type.into(),
            charset: Some("utf-8".to_string()),
        }
    }

    pub fn bytes(data: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            media_type: media_type.into(),
            charset: None,
        }
    }

    /// Value for the `Content-Type` header.
    pub fn content_type(&self) -> String {
        match &self.charset {
            Some(charset) => format!("{}; charset={charset}", self.media_type),
            None => self.media_type.clone(),
        }
    }
}

/// One HTTP call described as plain data. Build with [`RequestBuilder`].
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    id: Uuid,
    method: HttpMethod,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    result_kind: ResultKind,
}

impl RequestDescriptor {
    pub fn builder(method: HttpMethod, url: &str) -> RequestBuilder {
        RequestBuilder::new(method, url)
    }

    pub fn get(url: &str) -> RequestBuilder {
        RequestBuilder::new(HttpMethod::Get, url)
    }

    pub fn post(url: &str) -> RequestBuilder {
        RequestBuilder::new(HttpMethod::Post, url)
    }

    /// Identifier used to correlate log events for this request.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Headers in insertion order, names as the caller wrote them.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// First header value whose name matches `name` case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn result_kind(&self) -> ResultKind {
        self.result_kind
    }
}

/// Builder for [`RequestDescriptor`].
///
/// Header names are unique per request: setting a header that already exists
/// (compared case-insensitively) replaces its value in place and keeps the
/// original position and spelling.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: HttpMethod,
    url: String,
    headers: Vec<(String, String)>,
    body: Option<RequestBody>,
    result_kind: ResultKind,
}

impl RequestBuilder {
    pub fn new(method: HttpMethod, url: &str) -> Self {
        Self {
            method,
            url: url.to_string(),
            headers: Vec::new(),
            body: None,
            result_kind: ResultKind::default(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(key, _)| key.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn text_body(self, text: impl Into<String>, media_type: impl Into<String>) -> Self {
        self.body(RequestBody::text(text, media_type))
    }

    pub fn bytes_body(self, data: impl Into<Vec<u8>>, media_type: impl Into<String>) -> Self {
        self.body(RequestBody::bytes(data, media_type))
    }

    pub fn result_kind(mut self, kind: ResultKind) -> Self {
        self.result_kind = kind;
        self
    }

    pub fn build(self) -> Result<RequestDescriptor, TransportError> {
        let url = Url::parse(&self.url).map_err(|source| TransportError::InvalidUrl {
            url: self.url.clone(),
            source,
        })?;
        Ok(RequestDescriptor {
            id: Uuid::new_v4(),
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            result_kind: self.result_kind,
        })
    }
}

/// Response body, materialized according to the request's [`ResultKind`].
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Text(String),
    Bytes(Vec<u8>),
    Stream(Cursor<Vec<u8>>),
}

impl ResponseBody {
    pub fn kind(&self) -> ResultKind {
        match self {
            ResponseBody::Text(_) => ResultKind::Text,
            ResponseBody::Bytes(_) => ResultKind::Bytes,
            ResponseBody::Stream(_) => ResultKind::SeekableStream,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ResponseBody::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ResponseBody::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn into_stream(self) -> Option<Cursor<Vec<u8>>> {
        match self {
            ResponseBody::Stream(stream) => Some(stream),
            _ => None,
        }
    }
}

/// A completed response.
#[derive(Debug, Clone)]
pub struct ResponseDescriptor {
    pub status: u16,
    /// Envelope headers first, then payload (`Content-*`) headers. Every
    /// value of a repeated header is kept.
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    /// URL of the response that was materialized, after any redirects.
    pub final_url: Url,
    pub request: Arc<RequestDescriptor>,
}

impl ResponseDescriptor {
    /// All values for `name`, case-insensitive, in merged order.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

//! Session cookie jar shared by every transport handle of a client.
//!
//! # Design
//! Cookies are grouped by scope (domain + path) in a `DashMap`, so concurrent
//! requests only contend on the shard holding the scope they touch. The jar
//! is plugged into each `reqwest::Client` as its cookie provider, which makes
//! `Set-Cookie` handling and `Cookie` attachment happen inside the handle,
//! including on redirect hops the handle follows by itself.
//!
//! Matching follows RFC 6265 §5.1.3 (domain), §5.1.4 (path) and the
//! `Secure` attribute. Expired cookies are never returned; storing one with
//! a past expiry removes the existing entry.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use dashmap::DashMap;
use reqwest::cookie::CookieStore;
use reqwest::header::HeaderValue;
use tracing::{debug, warn};
use url::Url;

/// One stored cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    /// Lower-cased host (host-only cookies) or domain attribute.
    pub domain: String,
    /// `true` when no `Domain` attribute was given; only the exact host matches.
    pub host_only: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    /// `None` for session cookies.
    pub expires: Option<DateTime<Utc>>,
}

impl Cookie {
    /// Host-only session cookie scoped to `url` with the default path.
    pub fn for_url(name: impl Into<String>, value: impl Into<String>, url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        Some(Self {
            name: name.into(),
            value: value.into(),
            domain: host,
            host_only: true,
            path: default_path(url),
            secure: false,
            http_only: false,
            expires: None,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|at| at <= Utc::now())
    }

    fn matches_domain(&self, host: &str) -> bool {
        if self.host_only {
            return host == self.domain;
        }
        host == self.domain
            || (host.ends_with(&self.domain)
                && host[..host.len() - self.domain.len()].ends_with('.'))
    }

    fn matches_path(&self, request_path: &str) -> bool {
        if request_path == self.path {
            return true;
        }
        request_path.starts_with(&self.path)
            && (self.path.ends_with('/') || request_path[self.path.len()..].starts_with('/'))
    }

    /// Whether this cookie should be sent with a request to `url`.
    pub fn matches(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        if self.is_expired() || (self.secure && url.scheme() != "https") {
            return false;
        }
        self.matches_domain(&host.to_ascii_lowercase()) && self.matches_path(url.path())
    }

    fn scope(&self) -> CookieScope {
        CookieScope {
            domain: self.domain.clone(),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CookieScope {
    domain: String,
    path: String,
}

/// Concurrent, scope-keyed cookie store.
#[derive(Debug, Default)]
pub struct CookieJar {
    scopes: DashMap<CookieScope, BTreeMap<String, Cookie>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces `cookie`. An already-expired cookie deletes the
    /// entry with the same scope and name instead. Cookies that expired since
    /// they were stored are pruned on every call.
    pub fn store(&self, cookie: Cookie) {
        let scope = cookie.scope();
        if cookie.is_expired() {
            if let Some(mut entry) = self.scopes.get_mut(&scope) {
                entry.remove(&cookie.name);
            }
        } else {
            self.scopes
                .entry(scope)
                .or_default()
                .insert(cookie.name.clone(), cookie);
        }
        self.purge_expired();
    }

    /// Drops every expired cookie and every scope left empty.
    pub fn purge_expired(&self) {
        self.scopes.retain(|_, cookies| {
            cookies.retain(|_, cookie| !cookie.is_expired());
            !cookies.is_empty()
        });
    }

    /// Applies one `Set-Cookie` header received from `url`.
    pub fn set_from_response(&self, set_cookie: &str, url: &Url) {
        match parse_set_cookie(set_cookie, url) {
            Some(cookie) => {
                debug!(name = %cookie.name, domain = %cookie.domain, path = %cookie.path, "storing cookie");
                self.store(cookie);
            }
            None => warn!(url = %url, "ignoring unusable Set-Cookie header"),
        }
    }

    /// Merges an outgoing `Cookie` header (`a=1; b=2`) into the jar, scoped
    /// to `url` with the default path.
    pub fn merge_request_header(&self, header: &str, url: &Url) {
        for fragment in header.split(';') {
            let fragment = fragment.trim();
            if fragment.is_empty() {
                continue;
            }
            let parsed = fragment
                .split_once('=')
                .map(|(name, value)| (name.trim(), value.trim()))
                .filter(|(name, _)| !name.is_empty())
                .and_then(|(name, value)| Cookie::for_url(name, value, url));
            match parsed {
                Some(cookie) => self.store(cookie),
                None => warn!(%fragment, "ignoring malformed Cookie fragment"),
            }
        }
    }

    /// Cookies to send to `url`, longest path first.
    pub fn get_cookies(&self, url: &Url) -> Vec<Cookie> {
        let mut matched: Vec<Cookie> = self
            .scopes
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .filter(|cookie| cookie.matches(url))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();
        matched.sort_by(|a, b| b.path.len().cmp(&a.path.len()).then_with(|| a.name.cmp(&b.name)));
        matched
    }

    pub fn get_cookie(&self, name: &str, url: &Url) -> Option<Cookie> {
        self.get_cookies(url)
            .into_iter()
            .find(|cookie| cookie.name == name)
    }

    /// `Cookie` header value for `url`, or `None` if nothing matches.
    pub fn header_value(&self, url: &Url) -> Option<String> {
        let cookies = self.get_cookies(url);
        if cookies.is_empty() {
            return None;
        }
        Some(
            cookies
                .iter()
                .map(|cookie| format!("{}={}", cookie.name, cookie.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    /// Number of stored cookies, expired ones included until the next purge.
    pub fn len(&self) -> usize {
        self.scopes.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.scopes.clear();
    }
}

impl CookieStore for CookieJar {
    fn set_cookies(&self, cookie_headers: &mut dyn Iterator<Item = &HeaderValue>, url: &Url) {
        for header in cookie_headers {
            match header.to_str() {
                Ok(raw) => self.set_from_response(raw, url),
                Err(_) => warn!(url = %url, "ignoring non-ASCII Set-Cookie header"),
            }
        }
    }

    fn cookies(&self, url: &Url) -> Option<HeaderValue> {
        let value = self.header_value(url)?;
        HeaderValue::from_str(&value).ok()
    }
}

/// RFC 6265 §5.1.4 default-path of a request URL.
fn default_path(url: &Url) -> String {
    let path = url.path();
    if !path.starts_with('/') {
        return "/".to_string();
    }
    match path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
    }
}

/// Parses a `Set-Cookie` header received from `url`.
///
/// Returns `None` for a missing name or a `Domain` that does not cover the
/// request host.
pub fn parse_set_cookie(header: &str, url: &Url) -> Option<Cookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::for_url(name, value.trim(), url)?;
    let mut max_age: Option<i64> = None;
    let mut expires: Option<DateTime<Utc>> = None;

    for attribute in parts {
        let (key, val) = match attribute.split_once('=') {
            Some((key, val)) => (key.trim(), val.trim()),
            None => (attribute.trim(), ""),
        };
        match key.to_ascii_lowercase().as_str() {
            "domain" if !val.is_empty() => {
                let domain = val.trim_start_matches('.').to_ascii_lowercase();
                let host = cookie.domain.clone();
                if host != domain
                    && (!domain.contains('.') || !host.ends_with(&format!(".{domain}")))
                {
                    return None;
                }
                cookie.domain = domain;
                cookie.host_only = false;
            }
            "path" if val.starts_with('/') => cookie.path = val.to_string(),
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "max-age" => max_age = val.parse().ok(),
            "expires" => expires = parse_cookie_date(val),
            _ => {}
        }
    }

    cookie.expires = match max_age {
        Some(seconds) if seconds <= 0 => Some(DateTime::<Utc>::MIN_UTC),
        Some(seconds) => chrono::Duration::try_seconds(seconds)
            .and_then(|delta| Utc::now().checked_add_signed(delta)),
        None => expires,
    };
    Some(cookie)
}

/// `Expires` value: RFC 2822 first, then the dashed Netscape forms
/// (`Thu, 01-Jan-1970 00:00:10 GMT`, two- or four-digit year).
fn parse_cookie_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(raw) {
        return Some(at.with_timezone(&Utc));
    }
    ["%a, %d-%b-%Y %H:%M:%S GMT", "%a, %d-%b-%y %H:%M:%S GMT"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

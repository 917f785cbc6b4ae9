//! Error types for the session transport and the module registry.
//!
//! # Design
//! Each concern gets its own enum so callers can match on exactly the
//! failures an operation can produce. `Cancelled` and `HttpStatus` are kept
//! apart from `Network` because callers treat "the caller gave up" and "the
//! server said no" differently from "the socket broke."
//!
//! Failures raised by code this crate does not own (modules, notification
//! listeners, the service locator) are carried as `anyhow::Error`.

use std::fmt;

use thiserror::Error;

use crate::context::LifecycleState;

/// Errors returned by [`crate::HttpTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    /// The cancel signal fired before or during execution.
    #[error("request cancelled")]
    Cancelled,

    /// The final response, after the redirect chase, was not 2xx.
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// A 302 carried a `Location` that could not be resolved to a URL.
    #[error("invalid redirect location '{location}'")]
    InvalidRedirect { location: String },

    #[error("invalid proxy '{proxy}': {source}")]
    InvalidProxy {
        proxy: String,
        #[source]
        source: reqwest::Error,
    },

    /// Connection, TLS, timeout or protocol failure from the handle.
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

/// Errors returned by a [`crate::ServiceLocator`].
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no instance registered for '{service}'")]
    NotRegistered { service: &'static str },

    /// The locator produced an instance of a different type than requested.
    #[error("instance registered for '{service}' has a different type")]
    TypeMismatch { service: &'static str },

    #[error("resolving '{service}' failed: {source}")]
    Failed {
        service: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

/// Errors produced while building or querying a [`crate::ModuleRegistry`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module '{module}' is not registered")]
    MissingModule { module: &'static str },

    #[error("module '{module}' was registered more than once")]
    DuplicateModule { module: &'static str },

    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

/// Which lifecycle pass a module failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    Init,
    Destroy,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecyclePhase::Init => write!(f, "init"),
            LifecyclePhase::Destroy => write!(f, "destroy"),
        }
    }
}

/// A single module's `init` or `destroy` failure.
///
/// Never returned as an `Err`: the context logs it and collects it into a
/// [`crate::LifecycleReport`].
#[derive(Debug, Error)]
#[error("{phase} failed for module '{module}': {source}")]
pub struct ModuleLifecycleError {
    pub module: &'static str,
    pub phase: LifecyclePhase,
    #[source]
    pub source: anyhow::Error,
}

/// A notification listener failure, caught at `fire_notify`.
#[derive(Debug, Error)]
#[error("notify listener failed for event {event_id}: {source}")]
pub struct NotifyListenerError {
    pub event_id: uuid::Uuid,
    #[source]
    pub source: anyhow::Error,
}

/// Errors returned by [`crate::ClientContext`].
#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `init` or `destroy` was called from a state that does not allow it.
    #[error("cannot move client from {from:?} to {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Configuration could not be parsed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid transport config: {0}")]
    Parse(#[from] serde_json::Error),
}

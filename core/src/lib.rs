//! Session transport and module registry for stateful HTTP clients.
//!
//! # Overview
//! `HttpTransport` executes `RequestDescriptor`s over a `reqwest` handle that
//! shares one `CookieJar` for the life of the client, chases 302 redirects,
//! and materializes bodies as the caller's `ResultKind` asks. The handle can
//! be swapped (`set_proxy`) while requests are in flight.
//!
//! `ClientContext` composes the transport with a `ModuleRegistry` of
//! capability modules resolved through an injected `ServiceLocator`, runs
//! their best-effort `init`/`destroy` lifecycle, and forwards notifications to
//! one external listener.
//!
//! # Design
//! - Descriptors are plain, immutable data; the transport owns all I/O.
//! - Failures from code outside this crate (modules, listeners) are contained
//!   and reported, never propagated through lifecycle or notify calls.
//! - No retries anywhere; callers decide.

pub mod cancel;
pub mod config;
pub mod context;
pub mod cookies;
pub mod error;
pub mod http;
pub mod module;
pub mod transport;

pub use cancel::CancelSignal;
pub use config::TransportConfig;
pub use context::{
    ClientContext, ClientContextBuilder, LifecycleReport, LifecycleState, NotifyEvent,
    NotifyListener, NotifyOutcome,
};
pub use cookies::{Cookie, CookieJar};
pub use error::{
    ConfigError, ContextError, LifecyclePhase, ModuleLifecycleError, NotifyListenerError,
    RegistryError, ResolveError, TransportError,
};
pub use http::{
    HttpMethod, RequestBody, RequestBuilder, RequestDescriptor, ResponseBody, ResponseDescriptor,
    ResultKind,
};
pub use module::{
    resolve_as, Instance, InstanceLocator, Module, ModuleRegistry, ModuleRegistryBuilder,
    ServiceKey, ServiceLocator,
};
pub use transport::{HttpTransport, ProxySetting, TransportHandle};

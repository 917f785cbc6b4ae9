//! Client context: module registry plus cookie-backed transport, lifecycle
//! and notification.
//!
//! # Design
//! Lifecycle is best-effort. `init` and `destroy` call every module in
//! registration order; a module that fails (returns `Err` or panics) is logged
//! and recorded in the returned `LifecycleReport`, and the pass continues with
//! the next module. The caller only ever gets `Err` for a call made from the
//! wrong state.
//!
//! Notifications go to at most one listener. Listener failures are contained
//! the same way and reported through `NotifyOutcome`.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::cancel::CancelSignal;
use crate::config::TransportConfig;
use crate::cookies::CookieJar;
use crate::error::{
    ContextError, LifecyclePhase, ModuleLifecycleError, NotifyListenerError, RegistryError,
    ResolveError, TransportError,
};
use crate::http::{RequestDescriptor, ResponseDescriptor};
use crate::module::{resolve_as, Module, ModuleRegistry, ModuleRegistryBuilder, ServiceLocator};
use crate::transport::HttpTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Opaque notification payload.
#[derive(Clone)]
pub struct NotifyEvent {
    id: Uuid,
    payload: Arc<dyn Any + Send + Sync>,
}

impl NotifyEvent {
    pub fn new<T: Any + Send + Sync>(payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: Arc::new(payload),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for NotifyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifyEvent").field("id", &self.id).finish()
    }
}

pub type NotifyListener =
    Arc<dyn Fn(&ClientContext, &NotifyEvent) -> anyhow::Result<()> + Send + Sync>;

/// What happened to a fired notification.
#[derive(Debug)]
pub enum NotifyOutcome {
    Delivered,
    NoListener,
    ListenerFailed(NotifyListenerError),
}

/// Per-module failures collected during one lifecycle pass.
#[derive(Debug)]
pub struct LifecycleReport {
    pub phase: LifecyclePhase,
    /// Number of modules the pass called.
    pub attempted: usize,
    pub failures: Vec<ModuleLifecycleError>,
}

impl LifecycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Names of the modules that failed, in call order.
    pub fn failed_modules(&self) -> Vec<&'static str> {
        self.failures.iter().map(|failure| failure.module).collect()
    }
}

pub struct ClientContextBuilder {
    config: TransportConfig,
    modules: ModuleRegistryBuilder,
    jar: Option<Arc<CookieJar>>,
    listener: Option<NotifyListener>,
}

impl ClientContextBuilder {
    pub fn new() -> Self {
        Self {
            config: TransportConfig::default(),
            modules: ModuleRegistryBuilder::new(),
            jar: None,
            listener: None,
        }
    }

    pub fn config(mut self, config: TransportConfig) -> Self {
        self.config = config;
        self
    }

    /// Declares a capability module. Order of calls is lifecycle order.
    pub fn module<T: Module>(mut self) -> Self {
        self.modules = self.modules.register::<T>();
        self
    }

    /// Uses an existing jar instead of a fresh one.
    pub fn cookie_jar(mut self, jar: Arc<CookieJar>) -> Self {
        self.jar = Some(jar);
        self
    }

    pub fn listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&ClientContext, &NotifyEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listener = Some(Arc::new(listener));
        self
    }

    pub fn build(self, locator: Arc<dyn ServiceLocator>) -> Result<ClientContext, ContextError> {
        let registry = self.modules.build(locator.as_ref())?;
        let jar = self.jar.unwrap_or_default();
        let transport = HttpTransport::new(self.config, Arc::clone(&jar))?;
        debug!(modules = registry.len(), "client context built");
        Ok(ClientContext {
            registry,
            locator,
            jar,
            transport,
            state: Mutex::new(LifecycleState::Uninitialized),
            listener: RwLock::new(self.listener),
        })
    }
}

impl Default for ClientContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ClientContext {
    registry: ModuleRegistry,
    locator: Arc<dyn ServiceLocator>,
    jar: Arc<CookieJar>,
    transport: HttpTransport,
    state: Mutex<LifecycleState>,
    listener: RwLock<Option<NotifyListener>>,
}

impl ClientContext {
    pub fn builder() -> ClientContextBuilder {
        ClientContextBuilder::new()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    pub fn transport(&self) -> &HttpTransport {
        &self.transport
    }

    pub fn cookie_jar(&self) -> &Arc<CookieJar> {
        &self.jar
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub async fn execute(
        &self,
        request: RequestDescriptor,
        cancel: &CancelSignal,
    ) -> Result<ResponseDescriptor, TransportError> {
        self.transport.execute(request, cancel).await
    }

    /// The registered instance of capability `T`.
    pub fn module<T: Module>(&self) -> Result<Arc<T>, RegistryError> {
        self.registry.get::<T>()
    }

    /// Resolves a non-module dependency through the locator.
    pub fn service<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ResolveError> {
        resolve_as::<T>(self.locator.as_ref())
    }

    /// Calls every module's `init` in registration order. Module failures
    /// never stop the pass and never turn into `Err`; the client always ends
    /// up `Ready`.
    pub fn init(&self) -> Result<LifecycleReport, ContextError> {
        self.transition(&[LifecycleState::Uninitialized], LifecycleState::Initializing)?;
        let report = self.run_lifecycle(LifecyclePhase::Init);
        *self.state.lock() = LifecycleState::Ready;
        info!(
            modules = report.attempted,
            failed = report.failures.len(),
            "client initialized"
        );
        Ok(report)
    }

    /// Calls every module's `destroy` in registration order, whatever `init`
    /// did. Allowed once, from `Uninitialized` or `Ready`.
    pub fn destroy(&self) -> Result<LifecycleReport, ContextError> {
        self.transition(
            &[LifecycleState::Uninitialized, LifecycleState::Ready],
            LifecycleState::Destroyed,
        )?;
        let report = self.run_lifecycle(LifecyclePhase::Destroy);
        info!(
            modules = report.attempted,
            failed = report.failures.len(),
            "client destroyed"
        );
        Ok(report)
    }

    pub fn set_notify_listener<F>(&self, listener: F)
    where
        F: Fn(&ClientContext, &NotifyEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        *self.listener.write() = Some(Arc::new(listener));
    }

    pub fn clear_notify_listener(&self) {
        *self.listener.write() = None;
    }

    /// Delivers `event` to the listener, if any. A failing or panicking
    /// listener is logged and reported, never propagated.
    pub fn fire_notify(&self, event: NotifyEvent) -> NotifyOutcome {
        let listener = self.listener.read().clone();
        let Some(listener) = listener else {
            debug!(event_id = %event.id(), "no notify listener");
            return NotifyOutcome::NoListener;
        };

        let source = match panic::catch_unwind(AssertUnwindSafe(|| listener(self, &event))) {
            Ok(Ok(())) => return NotifyOutcome::Delivered,
            Ok(Err(err)) => err,
            Err(payload) => anyhow!("listener panicked: {}", panic_message(payload.as_ref())),
        };
        error!(event_id = %event.id(), error = %source, "notify listener failed");
        NotifyOutcome::ListenerFailed(NotifyListenerError {
            event_id: event.id(),
            source,
        })
    }

    fn transition(
        &self,
        allowed: &[LifecycleState],
        to: LifecycleState,
    ) -> Result<(), ContextError> {
        let mut state = self.state.lock();
        if !allowed.contains(&*state) {
            return Err(ContextError::InvalidTransition { from: *state, to });
        }
        *state = to;
        Ok(())
    }

    fn run_lifecycle(&self, phase: LifecyclePhase) -> LifecycleReport {
        let mut failures = Vec::new();
        for (name, module) in self.registry.modules() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| match phase {
                LifecyclePhase::Init => module.init(self),
                LifecyclePhase::Destroy => module.destroy(self),
            }));
            let source = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(payload) => anyhow!("module panicked: {}", panic_message(payload.as_ref())),
            };
            error!(module = name, %phase, error = %source, "module lifecycle step failed");
            failures.push(ModuleLifecycleError {
                module: name,
                phase,
                source,
            });
        }
        LifecycleReport {
            phase,
            attempted: self.registry.len(),
            failures,
        }
    }
}

impl fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("state", &self.state())
            .field("modules", &self.registry)
            .field("transport", &self.transport)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

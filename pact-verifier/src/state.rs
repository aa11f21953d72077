//! Provider state coordination.
//!
//! State handlers put the provider into the state an interaction expects
//! (setup) and clean up afterwards (teardown). The handler map is built
//! once and shared read-only by every contract task.

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::contract::ProviderState;
use crate::error::InteractionError;
use crate::generators::GeneratorContext;

/// Future returned by a state handler.
pub type StateFuture = BoxFuture<'static, anyhow::Result<Map<String, Value>>>;

/// `(setup, state) -> values`. Values returned during setup feed the
/// interaction's generator context; values returned during teardown are
/// ignored.
pub type StateHandler = Arc<dyn Fn(bool, ProviderState) -> StateFuture + Send + Sync>;

/// Future returned by a before/after hook.
pub type HookFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Hook run around every interaction.
pub type Hook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

/// Registered state handlers and per-interaction hooks.
#[derive(Clone, Default)]
pub struct StateHandlers {
    handlers: HashMap<String, StateHandler>,
    before_each: Option<Hook>,
    after_each: Option<Hook>,
}

impl StateHandlers {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a named state.
    #[must_use]
    pub fn with_handler<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(bool, ProviderState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Map<String, Value>>> + Send + 'static,
    {
        self.handlers
            .insert(name.into(), Arc::new(move |setup, state| handler(setup, state).boxed()));
        self
    }

    /// Register a hook run before every interaction.
    #[must_use]
    pub fn with_before_each<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.before_each = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Register a hook run after every interaction.
    #[must_use]
    pub fn with_after_each<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.after_each = Some(Arc::new(move || hook().boxed()));
        self
    }

    /// Whether a handler is registered for `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<&StateHandler> {
        self.handlers.get(name)
    }
}

impl fmt::Debug for StateHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("StateHandlers")
            .field("states", &names)
            .field("before_each", &self.before_each.is_some())
            .field("after_each", &self.after_each.is_some())
            .finish()
    }
}

/// One step of an interaction's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum LifecycleEvent {
    /// Before-each hook invoked
    BeforeEach,
    /// State handler invoked with `setup = true`
    StateSetup {
        /// State name
        state: String,
    },
    /// Request sent to the provider
    RequestSent {
        /// HTTP method
        method: String,
        /// Request path
        path: String,
    },
    /// Response received from the provider
    ResponseReceived {
        /// HTTP status
        status: u16,
    },
    /// State handler invoked with `setup = false`
    StateTeardown {
        /// State name
        state: String,
    },
    /// After-each hook invoked
    AfterEach,
}

/// States set up for one interaction, torn down in reverse.
#[derive(Debug, Default)]
pub struct StateSession {
    active: Vec<ProviderState>,
    context: GeneratorContext,
}

impl StateSession {
    /// States whose setup ran, in setup order.
    #[must_use]
    pub fn active(&self) -> &[ProviderState] {
        &self.active
    }

    /// Values collected from setup handlers.
    #[must_use]
    pub const fn context(&self) -> &GeneratorContext {
        &self.context
    }
}

/// Runs hooks and state handlers around interactions.
#[derive(Debug, Clone)]
pub struct StateCoordinator {
    handlers: Arc<StateHandlers>,
}

impl StateCoordinator {
    /// Create a coordinator over a shared handler registry.
    #[must_use]
    pub const fn new(handlers: Arc<StateHandlers>) -> Self {
        Self { handlers }
    }

    /// Run the before-each hook, if any.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::Hook`] if the hook fails.
    pub async fn before_each(&self, events: &mut Vec<LifecycleEvent>) -> Result<(), InteractionError> {
        let Some(hook) = &self.handlers.before_each else {
            return Ok(());
        };
        events.push(LifecycleEvent::BeforeEach);
        hook().await.map_err(|e| InteractionError::hook("beforeEach", &e))
    }

    /// Run the after-each hook, if any.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::Hook`] if the hook fails.
    pub async fn after_each(&self, events: &mut Vec<LifecycleEvent>) -> Result<(), InteractionError> {
        let Some(hook) = &self.handlers.after_each else {
            return Ok(());
        };
        events.push(LifecycleEvent::AfterEach);
        hook().await.map_err(|e| InteractionError::hook("afterEach", &e))
    }

    /// Set up every named state of an interaction, in order.
    ///
    /// All states are checked for a handler before any is invoked. States
    /// with an empty name are no precondition and are skipped. Values
    /// returned by handlers are merged into the session's generator
    /// context, which is also returned.
    ///
    /// # Errors
    ///
    /// Returns [`InteractionError::UnknownState`] for a state without a
    /// handler, or [`InteractionError::StateSetup`] when a handler fails.
    /// States set up before the failure remain in `session` for teardown.
    #[instrument(skip_all, fields(states = states.len()))]
    pub async fn setup(
        &self,
        states: &[ProviderState],
        session: &mut StateSession,
        events: &mut Vec<LifecycleEvent>,
    ) -> Result<GeneratorContext, InteractionError> {
        let named: Vec<&ProviderState> = states.iter().filter(|s| !s.name.trim().is_empty()).collect();
        if let Some(unknown) = named.iter().find(|s| !self.handlers.contains(&s.name)) {
            return Err(InteractionError::UnknownState(unknown.name.clone()));
        }

        for state in named {
            let Some(handler) = self.handlers.get(&state.name) else {
                return Err(InteractionError::UnknownState(state.name.clone()));
            };
            debug!(state = %state.name, "Setting up provider state");
            events.push(LifecycleEvent::StateSetup {
                state: state.name.clone(),
            });
            // Counted as active even if it fails, so teardown gets a chance to clean up
            session.active.push(state.clone());
            let values = handler(true, state.clone())
                .await
                .map_err(|e| InteractionError::state_setup(&state.name, &e))?;
            session.context.merge(values);
        }
        Ok(session.context.clone())
    }

    /// Tear down the session's states in reverse setup order.
    ///
    /// Every state is torn down even if an earlier teardown fails; the
    /// failures are returned as messages.
    #[instrument(skip_all, fields(states = session.active.len()))]
    pub async fn teardown(&self, session: &mut StateSession, events: &mut Vec<LifecycleEvent>) -> Vec<String> {
        let mut errors = Vec::new();
        while let Some(state) = session.active.pop() {
            let Some(handler) = self.handlers.get(&state.name) else {
                continue;
            };
            debug!(state = %state.name, "Tearing down provider state");
            events.push(LifecycleEvent::StateTeardown {
                state: state.name.clone(),
            });
            if let Err(e) = handler(false, state.clone()).await {
                warn!(state = %state.name, error = %e, "Provider state teardown failed");
                errors.push(format!("Teardown of '{}' failed: {e:#}", state.name));
            }
        }
        errors
    }
}

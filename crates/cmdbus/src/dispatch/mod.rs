//! Name-based command dispatch with typed argument validation.
//!
//! A [`Dispatcher`] maps case-folded verbs to handlers. Each handler may carry
//! a [`Validator`] that turns the raw argument into a typed value before the
//! handler runs. Handler errors and panics are contained and surfaced as
//! [`DispatchError`] values so a command loop can log them and keep going.

mod errors;
mod validator;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::debug;

pub use self::errors::DispatchError;
pub use self::validator::Validator;

/// Tracing target for dispatch operations.
pub(crate) const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

type Call<S> = Box<dyn FnMut(&mut S, &str, Option<&str>) -> Result<(), DispatchError> + Send>;

struct Registration<S> {
    validator: Option<&'static str>,
    call: Call<S>,
}

/// Verb-to-handler table operating on a state value of type `S`.
pub struct Dispatcher<S> {
    handlers: HashMap<String, Registration<S>>,
}

impl<S> Default for Dispatcher<S> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<S> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Dispatcher")
            .field("verbs", &self.verbs())
            .finish()
    }
}

impl<S> Dispatcher<S> {
    /// Creates an empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler that receives the raw argument, if any.
    ///
    /// Registering a verb twice replaces the earlier handler.
    pub fn register<F>(&mut self, verb: &str, mut handler: F) -> &mut Self
    where
        S: 'static,
        F: FnMut(&mut S, Option<String>) -> anyhow::Result<()> + Send + 'static,
    {
        let call: Call<S> = Box::new(move |state, verb, argument| {
            invoke(verb, || handler(state, argument.map(str::to_owned)))
        });
        self.insert(verb, None, call)
    }

    /// Registers a handler whose argument is checked by `validator` first.
    ///
    /// A command without an argument reaches the handler as `None`; a
    /// rejected argument never reaches it.
    pub fn register_with<T, F>(
        &mut self,
        verb: &str,
        validator: Validator<T>,
        mut handler: F,
    ) -> &mut Self
    where
        S: 'static,
        T: 'static,
        F: FnMut(&mut S, Option<T>) -> anyhow::Result<()> + Send + 'static,
    {
        let call: Call<S> = Box::new(move |state, verb, argument| {
            let value = argument
                .map(|raw| {
                    validator
                        .validate(raw)
                        .map_err(|message| DispatchError::InvalidArgument {
                            verb: verb.to_owned(),
                            validator: validator.name(),
                            argument: raw.to_owned(),
                            message,
                        })
                })
                .transpose()?;
            invoke(verb, || handler(state, value))
        });
        self.insert(verb, Some(validator.name()), call)
    }

    /// Resolves `verb` and runs its handler against `state`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::UnknownCommand`] for unregistered verbs,
    /// [`DispatchError::InvalidArgument`] when validation fails, and
    /// [`DispatchError::HandlerFailed`] or
    /// [`DispatchError::HandlerPanicked`] when the handler itself fails.
    pub fn dispatch(
        &mut self,
        state: &mut S,
        verb: &str,
        argument: Option<&str>,
    ) -> Result<(), DispatchError> {
        let verb = verb.to_ascii_lowercase();
        let registration = self
            .handlers
            .get_mut(&verb)
            .ok_or_else(|| DispatchError::unknown_command(&verb))?;
        debug!(target: DISPATCH_TARGET, verb = %verb, "dispatching command");
        (registration.call)(state, &verb, argument)
    }

    /// True when `verb` has a handler.
    #[must_use]
    pub fn contains(&self, verb: &str) -> bool {
        self.handlers.contains_key(&verb.to_ascii_lowercase())
    }

    /// Registered verbs in sorted order.
    #[must_use]
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        verbs.sort_unstable();
        verbs
    }

    /// Name of the validator attached to `verb`, if the verb exists and has
    /// one.
    #[must_use]
    pub fn validator_for(&self, verb: &str) -> Option<&'static str> {
        self.handlers
            .get(&verb.to_ascii_lowercase())
            .and_then(|registration| registration.validator)
    }

    /// Number of registered verbs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn insert(
        &mut self,
        verb: &str,
        validator: Option<&'static str>,
        call: Call<S>,
    ) -> &mut Self {
        let verb = verb.to_ascii_lowercase();
        if self
            .handlers
            .insert(verb.clone(), Registration { validator, call })
            .is_some()
        {
            debug!(target: DISPATCH_TARGET, verb = %verb, "replaced existing handler");
        }
        self
    }
}

fn invoke(verb: &str, handler: impl FnOnce() -> anyhow::Result<()>) -> Result<(), DispatchError> {
    match catch_unwind(AssertUnwindSafe(handler)) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(DispatchError::HandlerFailed {
            verb: verb.to_owned(),
            message: format!("{error:#}"),
        }),
        Err(payload) => Err(DispatchError::HandlerPanicked {
            verb: verb.to_owned(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Text of a panic payload, when it carries one.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

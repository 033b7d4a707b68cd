use crate::error::{Error, Result};
use crate::event::{Event, Notice};
use crate::probe::Probe;
use crate::types::InstanceId;
use std::collections::BTreeMap;

/// A typed option value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptionValue {
    Int(i64),
    Str(String),
}

impl OptionValue {
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        if let Self::Int(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        if let Self::Str(value) = self {
            Some(value)
        } else {
            None
        }
    }
}

/// The option surface of an algorithm instance.
///
/// Options passed to [`crate::Engine::run_instance`] are overlaid on the
/// defaults the algorithm was registered with; a key absent from the defaults
/// is unknown and rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    values: BTreeMap<String, OptionValue>,
}

impl Options {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an option, builder style.
    #[must_use]
    pub fn with(mut self, name: &str, value: OptionValue) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: OptionValue) {
        self.values.insert(name.to_string(), value);
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(OptionValue::as_int)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(OptionValue::as_str)
    }

    /// Overlay `overrides` on these defaults, rejecting unknown keys.
    pub(crate) fn merged_with(&self, overrides: &Options) -> Result<Options> {
        let mut merged = self.clone();
        for (name, value) in &overrides.values {
            if !self.values.contains_key(name) {
                return Err(Error::InvalidOption(name.clone()));
            }
            merged.values.insert(name.clone(), value.clone());
        }
        Ok(merged)
    }
}

/// A user-supplied algorithm state machine.
///
/// An instance receives typed [`Event`]s one at a time and reacts through the
/// [`Context`]: submitting probes, spawning child instances, emitting notices
/// to its caller or terminating itself.  Handlers must not block; long work
/// must be re-posted as further events.  Returning an error delivers
/// [`Event::Error`] followed by [`Event::Terminated`] to the instance while
/// sibling instances continue.
pub trait Algorithm {
    fn on_event(&mut self, ctx: &mut Context, event: &Event) -> Result<()>;
}

/// Creates an algorithm instance from merged, validated options.
///
/// Invoked synchronously by [`crate::Engine::run_instance`]; option
/// validation failures surface there as [`Error::InvalidOption`].
pub type AlgorithmFactory = Box<dyn Fn(&Options) -> Result<Box<dyn Algorithm>>>;

/// A registered algorithm.
pub(crate) struct Registration {
    pub factory: AlgorithmFactory,
    pub defaults: Options,
}

/// The effect an instance handler requested.
#[derive(Debug)]
pub(crate) enum Action {
    Send(Probe),
    Spawn { name: String, options: Options },
    Emit(Notice),
    Terminate,
    Stop,
}

/// The effects surface handed to instance handlers.
///
/// Dispatch is cooperative: effects are collected while the handler runs and
/// applied by the engine after it returns, in order.
#[derive(Debug)]
pub struct Context {
    instance: InstanceId,
    actions: Vec<Action>,
}

impl Context {
    pub(crate) fn new(instance: InstanceId) -> Self {
        Self {
            instance,
            actions: Vec::new(),
        }
    }

    /// The id of the instance being dispatched.
    #[must_use]
    pub const fn instance(&self) -> InstanceId {
        self.instance
    }

    /// Submit a probe for transmission on behalf of this instance.
    pub fn send_probe(&mut self, probe: Probe) {
        self.actions.push(Action::Send(probe));
    }

    /// Spawn a child instance whose notices surface to this instance.
    pub fn spawn(&mut self, name: &str, options: Options) {
        self.actions.push(Action::Spawn {
            name: name.to_string(),
            options,
        });
    }

    /// Emit a notice to this instance's caller.
    pub fn emit(&mut self, notice: Notice) {
        self.actions.push(Action::Emit(notice));
    }

    /// Request termination of this instance.
    pub fn terminate(&mut self) {
        self.actions.push(Action::Terminate);
    }

    /// Request that the engine loop stop after the current dispatch.
    pub fn stop(&mut self) {
        self.actions.push(Action::Stop);
    }

    pub(crate) fn into_actions(self) -> Vec<Action> {
        self.actions
    }
}

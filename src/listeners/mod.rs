//! Callback adapters.
//!
//! One adapter per bus callback interface. Each adapter:
//! - resolves its managed entry points once, at construction
//! - holds its managed listener strongly or weakly, per kind
//! - moves through `Constructing -> Active -> Detached`
//!
//! A callback that arrives once the adapter is detached (or once a weakly held
//! listener has been collected) never reaches managed code; the callback's default
//! result is returned instead. The listener is cloned out under the lock for the
//! duration of a call, so detaching concurrently cannot free it mid-call.

pub mod auth;
pub mod bus_listener;
pub mod bus_object;
pub mod join;
pub mod key_store;
pub mod session;
pub mod signal;

pub use auth::AuthListenerAdapter;
pub use bus_listener::BusListenerAdapter;
pub use bus_object::BusObjectAdapter;
pub use join::JoinSessionListenerAdapter;
pub use key_store::KeyStoreListenerAdapter;
pub use session::{SessionListenerAdapter, SessionPortListenerAdapter};
pub use signal::SignalHandlerAdapter;

use crate::managed::{Env, MethodRef, ObjectRef, ScopedEnv, Vm, WeakObjectRef};
use crate::types::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Constructing,
    Active,
    Detached,
}

/// How an adapter holds its listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    /// Keeps the listener alive; clients may pass throwaway listeners.
    Strong,
    /// Does not keep the listener alive; the registrant holds it.
    Weak,
}

#[derive(Debug)]
enum ListenerRef {
    Strong(ObjectRef),
    Weak(WeakObjectRef),
}

impl ListenerRef {
    fn upgrade(&self) -> Option<ObjectRef> {
        match self {
            ListenerRef::Strong(obj) => Some(Arc::clone(obj)),
            ListenerRef::Weak(weak) => weak.upgrade(),
        }
    }
}

#[derive(Debug)]
struct BindingInner {
    state: AdapterState,
    listener: Option<ListenerRef>,
}

/// Listener reference plus lifecycle state, shared by every adapter kind.
#[derive(Debug)]
pub struct Binding {
    inner: Mutex<BindingInner>,
    policy: RefPolicy,
}

impl Binding {
    pub fn new(listener: &ObjectRef, policy: RefPolicy) -> Self {
        let listener = match policy {
            RefPolicy::Strong => ListenerRef::Strong(Arc::clone(listener)),
            RefPolicy::Weak => ListenerRef::Weak(Arc::downgrade(listener)),
        };
        Self {
            inner: Mutex::new(BindingInner {
                state: AdapterState::Constructing,
                listener: Some(listener),
            }),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BindingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn policy(&self) -> RefPolicy {
        self.policy
    }

    pub fn state(&self) -> AdapterState {
        self.lock().state
    }

    /// The bus-level association now exists.
    pub fn activate(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            AdapterState::Constructing => {
                inner.state = AdapterState::Active;
                Ok(())
            }
            AdapterState::Active => Ok(()),
            AdapterState::Detached => Err(Error::state_transition("cannot activate a detached adapter")),
        }
    }

    /// The association is gone: release the listener. Idempotent.
    pub fn detach(&self) {
        let mut inner = self.lock();
        inner.state = AdapterState::Detached;
        inner.listener = None;
    }

    /// Listener to deliver a callback to, if one may still be delivered.
    pub fn target(&self) -> Option<ObjectRef> {
        let inner = self.lock();
        if inner.state == AdapterState::Detached {
            return None;
        }
        inner.listener.as_ref().and_then(ListenerRef::upgrade)
    }

    /// Whether the listener is `obj`.
    pub fn is_bound_to(&self, obj: &ObjectRef) -> bool {
        self.target().is_some_and(|target| Arc::ptr_eq(&target, obj))
    }
}

/// Resolve an entry point the adapter cannot work without.
pub(crate) fn required(env: &Env, listener: &ObjectRef, name: &str) -> Result<MethodRef> {
    env.get_method(listener, name).ok_or_else(|| {
        Error::resolution(format!("{}.{}", listener.class().name(), name))
    })
}

/// Resolve an entry point that may be absent.
pub(crate) fn optional(env: &Env, listener: &ObjectRef, name: &str) -> Option<MethodRef> {
    let method = env.get_method(listener, name);
    if method.is_none() {
        tracing::debug!("{} has no {} callback", listener.class().name(), name);
    }
    method
}

/// Deliver one native callback to the managed listener.
///
/// Returns `default` when the adapter is detached or when the managed call fails;
/// a pending exception is cleared and logged as the scoped environment ends.
pub(crate) fn deliver<T>(
    vm: &Arc<Vm>,
    binding: &Binding,
    callback: &str,
    default: T,
    call: impl FnOnce(&Env, &ObjectRef) -> Result<T>,
) -> T {
    let Some(listener) = binding.target() else {
        tracing::warn!("{} rejected: adapter detached or listener collected", callback);
        return default;
    };
    let env = ScopedEnv::new(vm);
    match call(&env, &listener) {
        Ok(value) => value,
        Err(err) => {
            tracing::debug!("{} failed: {}", callback, err);
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, Object};

    #[test]
    fn test_lifecycle() {
        let class = Class::builder("Listener").build();
        let obj = Object::new(&class);
        let binding = Binding::new(&obj, RefPolicy::Strong);
        assert_eq!(binding.state(), AdapterState::Constructing);

        binding.activate().unwrap();
        assert_eq!(binding.state(), AdapterState::Active);
        assert!(binding.is_bound_to(&obj));

        binding.detach();
        assert_eq!(binding.state(), AdapterState::Detached);
        assert!(binding.target().is_none());
        assert!(binding.activate().is_err());
    }

    #[test]
    fn test_strong_keeps_listener_alive() {
        let class = Class::builder("Listener").build();
        let obj = Object::new(&class);
        let weak = Arc::downgrade(&obj);
        let binding = Binding::new(&obj, RefPolicy::Strong);
        drop(obj);
        assert!(weak.upgrade().is_some());

        binding.detach();
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_weak_does_not_keep_listener_alive() {
        let class = Class::builder("Listener").build();
        let obj = Object::new(&class);
        let binding = Binding::new(&obj, RefPolicy::Weak);
        binding.activate().unwrap();
        assert!(binding.target().is_some());

        drop(obj);
        assert!(binding.target().is_none());
        assert_eq!(binding.policy(), RefPolicy::Weak);
    }

    #[test]
    fn test_deliver_returns_default_when_detached() {
        let vm = Vm::new();
        let class = Class::builder("Listener").build();
        let obj = Object::new(&class);
        let binding = Binding::new(&obj, RefPolicy::Strong);
        binding.detach();

        let reached = deliver(&vm, &binding, "probe", false, |_env, _obj| Ok(true));
        assert!(!reached);
    }
}

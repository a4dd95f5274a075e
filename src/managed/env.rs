//! Environment accessor and the scoped environment.
//!
//! Callback threads from the native bus library are not necessarily known to the
//! VM. [`get_env`] attaches on demand and reports whether it did so; [`release_env`]
//! detaches only in that case. [`ScopedEnv`] pairs the two and clears any exception
//! left pending when the scope ends.

use super::local_ref::LocalRef;
use super::object::{MethodRef, ObjectRef, Throwable, Value};
use super::vm::Vm;
use crate::types::{Error, Result};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// Whether [`get_env`] attached the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachStatus {
    AlreadyAttached,
    Attached,
}

/// Thread-bound interpreter context. Not `Send`: it is only valid on the thread
/// that obtained it.
#[derive(Debug)]
pub struct Env {
    vm: Arc<Vm>,
    _thread_bound: PhantomData<*const ()>,
}

/// Obtain a context for the calling thread, attaching it if necessary.
pub fn get_env(vm: &Arc<Vm>) -> (Env, AttachStatus) {
    let status = if vm.attach_current_thread() {
        AttachStatus::Attached
    } else {
        AttachStatus::AlreadyAttached
    };
    let env = Env {
        vm: Arc::clone(vm),
        _thread_bound: PhantomData,
    };
    (env, status)
}

/// Give a context back; detaches only if the paired [`get_env`] attached.
pub fn release_env(env: Env, status: AttachStatus) {
    if status == AttachStatus::Attached {
        env.vm.detach_current_thread();
    }
}

impl Env {
    pub fn vm(&self) -> &Arc<Vm> {
        &self.vm
    }

    // =========================================================================
    // Exceptions
    // =========================================================================

    pub fn exception_check(&self) -> bool {
        self.vm.pending().is_some()
    }

    pub fn exception_occurred(&self) -> Option<Throwable> {
        self.vm.pending()
    }

    pub fn exception_clear(&self) {
        self.vm.take_pending();
    }

    pub fn throw(&self, throwable: Throwable) {
        self.vm.set_pending(throwable);
    }

    pub fn throw_new(&self, class: &str, message: impl Into<String>) {
        self.throw(Throwable::new(class, message));
    }

    /// Fail with [`Error::ExceptionPending`] if an exception is pending.
    pub fn check(&self) -> Result<()> {
        match self.vm.pending() {
            Some(pending) => Err(Error::exception_pending(pending.to_string())),
            None => Ok(()),
        }
    }

    // =========================================================================
    // Reflection
    // =========================================================================

    /// Resolve a method on the object's run-time class.
    pub fn get_method(&self, obj: &ObjectRef, name: &str) -> Option<MethodRef> {
        obj.class().method(name).cloned()
    }

    /// Invoke a resolved method.
    ///
    /// A throwable raised by the callee becomes this thread's pending exception and
    /// the call reports [`Error::ExceptionPending`]. Calls made while an exception is
    /// already pending are refused without reaching managed code.
    pub fn call_method(&self, obj: &ObjectRef, method: &MethodRef, args: &[Value]) -> Result<Value> {
        self.check()?;
        if args.len() != method.params().len() {
            self.throw_new(
                "bus.IllegalArgumentException",
                format!(
                    "{}.{} expects {} arguments, got {}",
                    obj.class().name(),
                    method.name(),
                    method.params().len(),
                    args.len()
                ),
            );
            return self.check().map(|_| Value::Null);
        }
        match (method.body())(self, obj, args) {
            Ok(value) => Ok(value),
            Err(throwable) => {
                let description = throwable.to_string();
                self.throw(throwable);
                Err(Error::exception_pending(description))
            }
        }
    }

    // =========================================================================
    // Transient references
    // =========================================================================

    pub fn new_local_ref(&self, obj: ObjectRef) -> LocalRef<'_> {
        LocalRef::new(self, obj)
    }
}

/// Log a managed exception through the fixed logging entry point.
pub fn log_exception(vm: &Vm, throwable: &Throwable) {
    vm.record_logged_exception();
    tracing::error!(
        exception = %throwable.class,
        "uncaught exception in callback: {}",
        throwable.message
    );
}

/// Environment held for the duration of a scope.
///
/// On drop, a pending exception is captured, cleared and logged before the thread is
/// released, so it never crosses back into native code.
#[derive(Debug)]
pub struct ScopedEnv {
    env: Option<Env>,
    status: AttachStatus,
}

impl ScopedEnv {
    pub fn new(vm: &Arc<Vm>) -> Self {
        let (env, status) = get_env(vm);
        Self {
            env: Some(env),
            status,
        }
    }

    /// Whether this scope attached the thread.
    pub fn attach_status(&self) -> AttachStatus {
        self.status
    }
}

impl Deref for ScopedEnv {
    type Target = Env;

    fn deref(&self) -> &Env {
        match &self.env {
            Some(env) => env,
            None => unreachable!("environment released before scope end"),
        }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        if let Some(env) = self.env.take() {
            if let Some(throwable) = env.exception_occurred() {
                env.exception_clear();
                log_exception(&env.vm, &throwable);
            }
            release_env(env, self.status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, ManagedType, Object};

    fn thrower() -> ObjectRef {
        let class = Class::builder("Thrower")
            .method("fail", vec![], ManagedType::Void, |_env, _this, _args| {
                Err(Throwable::new("bus.IllegalStateException", "nope"))
            })
            .method("ok", vec![ManagedType::Int], ManagedType::Int, |_env, _this, args| {
                Ok(args[0].clone())
            })
            .build();
        Object::new(&class)
    }

    #[test]
    fn test_release_detaches_only_when_attached_here() {
        let vm = Vm::new();
        let (outer, outer_status) = get_env(&vm);
        assert_eq!(outer_status, AttachStatus::Attached);

        let (inner, inner_status) = get_env(&vm);
        assert_eq!(inner_status, AttachStatus::AlreadyAttached);
        release_env(inner, inner_status);
        assert!(vm.is_current_thread_attached());

        release_env(outer, outer_status);
        assert!(!vm.is_current_thread_attached());
    }

    #[test]
    fn test_throwable_becomes_pending() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let obj = thrower();
        let fail = env.get_method(&obj, "fail").unwrap();

        let err = env.call_method(&obj, &fail, &[]).unwrap_err();
        assert!(matches!(err, Error::ExceptionPending(_)));
        assert!(env.exception_check());

        // No boundary call while pending.
        let ok = env.get_method(&obj, "ok").unwrap();
        assert!(env.call_method(&obj, &ok, &[Value::Int(1)]).is_err());
        env.exception_clear();
        assert_eq!(env.call_method(&obj, &ok, &[Value::Int(1)]).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_argument_count_mismatch_throws() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let obj = thrower();
        let ok = env.get_method(&obj, "ok").unwrap();
        assert!(env.call_method(&obj, &ok, &[]).is_err());
        assert_eq!(
            env.exception_occurred().unwrap().class,
            "bus.IllegalArgumentException"
        );
        env.exception_clear();
    }

    #[test]
    fn test_scoped_env_clears_pending_exception() {
        let vm = Vm::new();
        // Keep the thread attached so detaching cannot be what discards the exception.
        vm.attach_current_thread();
        {
            let env = ScopedEnv::new(&vm);
            assert_eq!(env.attach_status(), AttachStatus::AlreadyAttached);
            let obj = thrower();
            let fail = env.get_method(&obj, "fail").unwrap();
            let _ = env.call_method(&obj, &fail, &[]);
            assert!(env.exception_check());
        }
        let env = ScopedEnv::new(&vm);
        assert!(!env.exception_check());
        assert_eq!(vm.stats().exceptions_logged, 1);
    }
}

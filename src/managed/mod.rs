//! The managed side of the bridge.
//!
//! - **vm**: thread attachment, pending exceptions, the handle table
//! - **object**: classes, methods, objects and dynamically-typed values
//! - **env**: the environment accessor and [`ScopedEnv`]
//! - **local_ref**: scoped transient references
//! - **handle**: the handle registry
//! - **builtin**: classes the bridge instantiates itself

pub mod builtin;
mod env;
mod handle;
mod local_ref;
mod object;
mod vm;

pub use env::{get_env, log_exception, release_env, AttachStatus, Env, ScopedEnv};
pub use handle::{get_handle, set_handle, Handle, HandleTable, HANDLE_FIELD};
pub use local_ref::LocalRef;
pub use object::{
    Class, ClassBuilder, ManagedType, Method, MethodBody, MethodRef, Object, ObjectRef, Throwable,
    Value, WeakObjectRef,
};
pub use vm::{Vm, VmStats};

use std::any::Any;
use std::sync::Arc;

/// Resolve the native counterpart stored behind `obj`'s handle.
pub fn resolve<T: Any + Send + Sync>(env: &Env, obj: &ObjectRef) -> crate::Result<Option<Arc<T>>> {
    let handle = get_handle(Some(obj))?;
    Ok(env.vm().handles().get::<T>(handle))
}

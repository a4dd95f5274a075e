//! Create and destroy entry points for managed bus attachments and proxies.
//!
//! Each managed object reaches its native counterpart through its handle. The
//! handle table holds one counted reference; destroying the managed object
//! drops it. A proxy holds its own reference to the attachment, so the
//! attachment is torn down only after its last proxy is destroyed.

use super::{Bus, ProxyBusObject};
use crate::managed::{get_handle, resolve, set_handle, Env, Handle, ObjectRef};
use crate::native::NativeBus;
use crate::types::{BusConfig, Error, Result, SessionId};
use std::sync::Arc;

fn store<T: std::any::Any + Send + Sync>(env: &Env, obj: &ObjectRef, native: Arc<T>) -> Result<()> {
    if !get_handle(Some(obj))?.is_null() {
        return Err(Error::state_transition(format!("{:?} already has a native counterpart", obj)));
    }
    let handle = env.vm().handles().insert(native);
    set_handle(Some(obj), handle)
}

fn release(env: &Env, obj: &ObjectRef) -> Result<bool> {
    let handle = get_handle(Some(obj))?;
    if handle.is_null() {
        return Ok(false);
    }
    let removed = env.vm().handles().remove(handle).is_some();
    set_handle(Some(obj), Handle::NULL)?;
    Ok(removed)
}

/// Create the native attachment behind a managed bus attachment object.
pub fn create_bus_attachment(
    env: &Env,
    obj: &ObjectRef,
    native: Arc<dyn NativeBus>,
    config: BusConfig,
) -> Result<Arc<Bus>> {
    let bus = Bus::new(env.vm(), native, config);
    store(env, obj, Arc::clone(&bus))?;
    Ok(bus)
}

/// Native attachment of a managed bus attachment object.
pub fn bus_attachment(env: &Env, obj: &ObjectRef) -> Result<Arc<Bus>> {
    resolve::<Bus>(env, obj)?.ok_or_else(|| Error::not_found(format!("{:?} has no bus attachment", obj)))
}

/// Drop the managed object's reference to its attachment. Returns whether one was held.
pub fn destroy_bus_attachment(env: &Env, obj: &ObjectRef) -> Result<bool> {
    release(env, obj)
}

/// Create a proxy for `object_path` at `bus_name` on the attachment of `bus_obj`.
pub fn create_proxy_bus_object(
    env: &Env,
    proxy_obj: &ObjectRef,
    bus_obj: &ObjectRef,
    bus_name: &str,
    object_path: &str,
    session_id: SessionId,
) -> Result<Arc<ProxyBusObject>> {
    let bus = bus_attachment(env, bus_obj)?;
    let proxy = Arc::new(ProxyBusObject::new(bus, bus_name, object_path, session_id));
    store(env, proxy_obj, Arc::clone(&proxy))?;
    Ok(proxy)
}

pub fn proxy_bus_object(env: &Env, obj: &ObjectRef) -> Result<Arc<ProxyBusObject>> {
    resolve::<ProxyBusObject>(env, obj)?.ok_or_else(|| Error::not_found(format!("{:?} has no proxy", obj)))
}

pub fn destroy_proxy_bus_object(env: &Env, obj: &ObjectRef) -> Result<bool> {
    release(env, obj)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, Object, ScopedEnv, Vm, HANDLE_FIELD};
    use crate::testing::LoopbackBus;

    fn managed(name: &str) -> ObjectRef {
        Object::new(&Class::builder(name).field(HANDLE_FIELD).build())
    }

    #[test]
    fn test_attachment_outlives_managed_object_while_proxy_lives() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let bus_obj = managed("BusAttachment");
        let proxy_obj = managed("ProxyBusObject");

        let bus = create_bus_attachment(&env, &bus_obj, LoopbackBus::new(), BusConfig::default()).unwrap();
        let weak = Arc::downgrade(&bus);
        drop(bus);
        create_proxy_bus_object(&env, &proxy_obj, &bus_obj, "org.example", "/obj", SessionId::new(0)).unwrap();

        // Attachment destroyed first: the proxy keeps it alive.
        assert!(destroy_bus_attachment(&env, &bus_obj).unwrap());
        assert!(weak.upgrade().is_some());
        assert!(bus_attachment(&env, &bus_obj).is_err());

        assert!(destroy_proxy_bus_object(&env, &proxy_obj).unwrap());
        assert!(weak.upgrade().is_none());
        assert!(vm.handles().is_empty());
    }

    #[test]
    fn test_destroy_twice_is_noop() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let bus_obj = managed("BusAttachment");
        create_bus_attachment(&env, &bus_obj, LoopbackBus::new(), BusConfig::default()).unwrap();
        assert!(destroy_bus_attachment(&env, &bus_obj).unwrap());
        assert!(!destroy_bus_attachment(&env, &bus_obj).unwrap());
    }

    #[test]
    fn test_second_create_is_rejected() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let bus_obj = managed("BusAttachment");
        create_bus_attachment(&env, &bus_obj, LoopbackBus::new(), BusConfig::default()).unwrap();
        assert!(create_bus_attachment(&env, &bus_obj, LoopbackBus::new(), BusConfig::default()).is_err());
    }
}

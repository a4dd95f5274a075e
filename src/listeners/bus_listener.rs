//! Bus listener adapter: name discovery, name ownership and bus shutdown.

use super::{deliver, optional, Binding, RefPolicy};
use crate::managed::{Env, MethodRef, ObjectRef, Value, Vm};
use crate::native::BusListener;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Callbacks {
    listener_registered: Option<MethodRef>,
    listener_unregistered: Option<MethodRef>,
    found_advertised_name: Option<MethodRef>,
    lost_advertised_name: Option<MethodRef>,
    name_owner_changed: Option<MethodRef>,
    bus_stopping: Option<MethodRef>,
}

/// Forwards [`BusListener`] callbacks to a managed bus listener. Every callback is optional.
#[derive(Debug)]
pub struct BusListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    callbacks: Callbacks,
}

impl BusListenerAdapter {
    pub fn new(env: &Env, listener: &ObjectRef) -> Arc<Self> {
        let callbacks = Callbacks {
            listener_registered: optional(env, listener, "listenerRegistered"),
            listener_unregistered: optional(env, listener, "listenerUnregistered"),
            found_advertised_name: optional(env, listener, "foundAdvertisedName"),
            lost_advertised_name: optional(env, listener, "lostAdvertisedName"),
            name_owner_changed: optional(env, listener, "nameOwnerChanged"),
            bus_stopping: optional(env, listener, "busStopping"),
        };
        Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Strong),
            callbacks,
        })
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    fn invoke(&self, callback: &str, method: Option<&MethodRef>, args: Vec<Value>) {
        let Some(method) = method else {
            return;
        };
        deliver(&self.vm, &self.binding, callback, (), |env, listener| {
            env.call_method(listener, method, &args).map(|_| ())
        });
    }
}

impl BusListener for BusListenerAdapter {
    fn listener_registered(&self) {
        self.invoke(
            "listenerRegistered",
            self.callbacks.listener_registered.as_ref(),
            vec![],
        );
    }

    fn listener_unregistered(&self) {
        self.invoke(
            "listenerUnregistered",
            self.callbacks.listener_unregistered.as_ref(),
            vec![],
        );
    }

    fn found_advertised_name(&self, name: &str, transport: u16, name_prefix: &str) {
        self.invoke(
            "foundAdvertisedName",
            self.callbacks.found_advertised_name.as_ref(),
            vec![name.into(), Value::Short(transport as i16), name_prefix.into()],
        );
    }

    fn lost_advertised_name(&self, name: &str, transport: u16, name_prefix: &str) {
        self.invoke(
            "lostAdvertisedName",
            self.callbacks.lost_advertised_name.as_ref(),
            vec![name.into(), Value::Short(transport as i16), name_prefix.into()],
        );
    }

    fn name_owner_changed(&self, bus_name: &str, previous_owner: Option<&str>, new_owner: Option<&str>) {
        self.invoke(
            "nameOwnerChanged",
            self.callbacks.name_owner_changed.as_ref(),
            vec![bus_name.into(), previous_owner.into(), new_owner.into()],
        );
    }

    fn bus_stopping(&self) {
        self.invoke("busStopping", self.callbacks.bus_stopping.as_ref(), vec![]);
    }
}

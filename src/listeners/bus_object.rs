//! Exported bus object adapter.
//!
//! Method members resolve to managed methods of the same name and property
//! accessors to `get<Name>` / `set<Name>`, once, when the adapter is built.
//! Both tables are keyed by `interface.name` and never change afterwards, so
//! concurrent dispatch reads them without locking.

use super::{deliver, optional, required, Binding, RefPolicy};
use crate::context::MessageContext;
use crate::managed::{Env, MethodRef, ObjectRef, Value, Vm};
use crate::msg::{marshal, signature, unmarshal, unmarshal_args, MsgArg};
use crate::native::{
    BusObject, InterfaceDescription, Member, MemberKind, Message, NativeBus, PropertyAccess, Reply,
    BUS_EXCEPTION_ERROR,
};
use crate::types::{Error, NativeStatus, Result};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct PropertyAccessors {
    signature: String,
    getter: Option<MethodRef>,
    setter: Option<MethodRef>,
}

fn member_key(interface: &str, name: &str) -> String {
    format!("{}.{}", interface, name)
}

pub struct BusObjectAdapter {
    vm: Arc<Vm>,
    bus: Weak<dyn NativeBus>,
    path: String,
    interfaces: Vec<Arc<InterfaceDescription>>,
    binding: Binding,
    methods: HashMap<String, MethodRef>,
    properties: HashMap<String, PropertyAccessors>,
    registered: Option<MethodRef>,
    unregistered: Option<MethodRef>,
    generate_introspection: Option<MethodRef>,
}

impl std::fmt::Debug for BusObjectAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusObjectAdapter")
            .field("path", &self.path)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("state", &self.binding.state())
            .finish_non_exhaustive()
    }
}

impl BusObjectAdapter {
    /// Resolve every member of `interfaces` on `object`.
    ///
    /// A method member without a managed implementation is a resolution failure.
    pub fn new(
        env: &Env,
        bus: &Arc<dyn NativeBus>,
        object: &ObjectRef,
        path: &str,
        interfaces: Vec<Arc<InterfaceDescription>>,
    ) -> Result<Arc<Self>> {
        if interfaces.is_empty() {
            return Err(Error::validation(format!("bus object at {} implements no interface", path)));
        }

        let mut methods = HashMap::new();
        let mut properties = HashMap::new();
        for iface in &interfaces {
            for member in iface.members().iter().filter(|m| m.kind == MemberKind::MethodCall) {
                let method = required(env, object, &member.name)?;
                methods.insert(member_key(iface.name(), &member.name), method);
            }
            for prop in iface.properties() {
                let readable = matches!(prop.access, PropertyAccess::Read | PropertyAccess::ReadWrite);
                let writable = matches!(prop.access, PropertyAccess::Write | PropertyAccess::ReadWrite);
                let accessors = PropertyAccessors {
                    signature: prop.signature.clone(),
                    getter: readable.then(|| optional(env, object, &format!("get{}", prop.name))).flatten(),
                    setter: writable.then(|| optional(env, object, &format!("set{}", prop.name))).flatten(),
                };
                properties.insert(member_key(iface.name(), &prop.name), accessors);
            }
        }
        tracing::debug!(path, methods = methods.len(), properties = properties.len(), "bus object resolved");

        Ok(Arc::new(Self {
            vm: Arc::clone(env.vm()),
            bus: Arc::downgrade(bus),
            path: path.to_string(),
            interfaces,
            binding: Binding::new(object, RefPolicy::Strong),
            methods,
            properties,
            registered: optional(env, object, "registered"),
            unregistered: optional(env, object, "unregistered"),
            generate_introspection: optional(env, object, "generateIntrospection"),
        }))
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    fn reply(&self, message: &Message, reply: Reply) {
        let Some(bus) = self.bus.upgrade() else {
            tracing::warn!(path = %self.path, "reply dropped: bus attachment is gone");
            return;
        };
        let status = bus.method_reply(message, reply);
        if !status.is_ok() {
            tracing::warn!(path = %self.path, member = %message.member, %status, "method reply failed");
        }
    }

    /// Turn the managed return value into the reply, if one is due.
    fn build_reply(&self, env: &Env, member: &Member, ret: Value) -> Result<Option<Reply>> {
        let key = member_key(&member.interface, &member.name);
        if member.is_no_reply() {
            if !ret.is_null() {
                tracing::warn!(member = %key, "no-reply method returned a value; discarded");
            }
            return Ok(None);
        }

        let outputs = signature::count_complete_types(&member.output_sig)?;
        if outputs == 0 {
            return Ok(Some(Reply::Args(Vec::new())));
        }
        if ret.is_null() {
            return Ok(Some(Reply::Error {
                name: BUS_EXCEPTION_ERROR.to_string(),
                message: format!("{} returned null", key),
            }));
        }
        if outputs == 1 {
            return Ok(Some(Reply::Args(vec![marshal(env, &member.output_sig, &ret)?])));
        }
        let packed = marshal(env, &format!("({})", member.output_sig), &ret)?;
        let members = packed.members().map(<[MsgArg]>::to_vec).unwrap_or_default();
        Ok(Some(Reply::Args(members)))
    }
}

impl BusObject for BusObjectAdapter {
    fn path(&self) -> &str {
        &self.path
    }

    fn interfaces(&self) -> Vec<Arc<InterfaceDescription>> {
        self.interfaces.clone()
    }

    fn method_call(&self, member: &Member, message: Arc<Message>) {
        let _context = MessageContext::install(Arc::clone(&message));
        let key = member_key(&member.interface, &member.name);

        let Some(method) = self.methods.get(&key) else {
            tracing::warn!(path = %self.path, member = %key, "no handler for method call");
            if !member.is_no_reply() {
                self.reply(&message, Reply::Status(NativeStatus::BUS_OBJECT_NO_SUCH_MEMBER));
            }
            return;
        };

        let failed = Some(Reply::Status(NativeStatus::FAIL));
        let reply = deliver(&self.vm, &self.binding, &key, failed, |env, target| {
            let args = unmarshal_args(env, &message.args, method)?;
            let ret = env.call_method(target, method, &args)?;
            self.build_reply(env, member, ret)
        });

        if let Some(reply) = reply.filter(|_| !member.is_no_reply()) {
            self.reply(&message, reply);
        }
    }

    fn get_property(&self, interface: &str, property: &str) -> std::result::Result<MsgArg, NativeStatus> {
        let key = member_key(interface, property);
        let Some(accessors) = self.properties.get(&key) else {
            return Err(NativeStatus::BUS_NO_SUCH_PROPERTY);
        };
        let Some(getter) = &accessors.getter else {
            return Err(NativeStatus::BUS_PROPERTY_ACCESS_DENIED);
        };
        deliver(&self.vm, &self.binding, &key, Err(NativeStatus::FAIL), |env, target| {
            let value = env.call_method(target, getter, &[])?;
            Ok(Ok(marshal(env, &accessors.signature, &value)?))
        })
    }

    fn set_property(&self, interface: &str, property: &str, value: &MsgArg) -> NativeStatus {
        let key = member_key(interface, property);
        let Some(accessors) = self.properties.get(&key) else {
            return NativeStatus::BUS_NO_SUCH_PROPERTY;
        };
        let Some(setter) = &accessors.setter else {
            return NativeStatus::BUS_PROPERTY_ACCESS_DENIED;
        };
        deliver(&self.vm, &self.binding, &key, NativeStatus::FAIL, |env, target| {
            let Some(ty) = setter.params().first() else {
                return Err(Error::marshal(format!("{} takes no value", setter.name())));
            };
            let arg = unmarshal(env, value, ty)?;
            env.call_method(target, setter, &[arg])?;
            Ok(NativeStatus::OK)
        })
    }

    fn generate_introspection(&self, deep: bool, indent: usize) -> Option<String> {
        let method = self.generate_introspection.as_ref()?;
        deliver(&self.vm, &self.binding, "generateIntrospection", None, |env, target| {
            let indent = i32::try_from(indent).unwrap_or(i32::MAX);
            let xml = env.call_method(target, method, &[Value::Boolean(deep), Value::Int(indent)])?;
            Ok(xml.as_str().map(str::to_string))
        })
    }

    fn object_registered(&self) {
        if let Some(method) = &self.registered {
            deliver(&self.vm, &self.binding, "registered", (), |env, target| {
                env.call_method(target, method, &[]).map(|_| ())
            });
        }
    }

    fn object_unregistered(&self) {
        if let Some(method) = &self.unregistered {
            deliver(&self.vm, &self.binding, "unregistered", (), |env, target| {
                env.call_method(target, method, &[]).map(|_| ())
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, ManagedType, Object, ScopedEnv};
    use crate::native::MemberAnnotations;
    use crate::testing::LoopbackBus;
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    fn calculator_iface() -> Arc<InterfaceDescription> {
        Arc::new(
            InterfaceDescription::builder("org.example.Calc")
                .method("Add", "ii", "i")
                .method("Split", "i", "ii")
                .method("Name", "", "s")
                .method_with("Poke", "", "i", MemberAnnotations::NO_REPLY)
                .method("Who", "", "s")
                .property("Total", "i", PropertyAccess::ReadWrite)
                .property("Secret", "s", PropertyAccess::Write)
                .build()
                .unwrap(),
        )
    }

    fn calculator() -> ObjectRef {
        let class = Class::builder("Calculator")
            .field("total")
            .method("Add", vec![ManagedType::Int, ManagedType::Int], ManagedType::Int, |_env, _this, args| {
                Ok(Value::Int(args[0].as_int().unwrap_or(0) + args[1].as_int().unwrap_or(0)))
            })
            .method(
                "Split",
                vec![ManagedType::Int],
                ManagedType::Struct(vec![ManagedType::Int, ManagedType::Int]),
                |_env, _this, args| {
                    let n = args[0].as_int().unwrap_or(0);
                    Ok(Value::Struct(vec![Value::Int(n / 2), Value::Int(n - n / 2)]))
                },
            )
            .method("Name", vec![], ManagedType::String, |_env, _this, _args| Ok(Value::Null))
            .method("Poke", vec![], ManagedType::Int, |_env, _this, _args| Ok(Value::Int(7)))
            .method("Who", vec![], ManagedType::String, |_env, _this, _args| {
                Ok(Value::from(MessageContext::current().sender.as_str()))
            })
            .method("getTotal", vec![], ManagedType::Int, |_env, this, _args| {
                Ok(this.get_field("total").unwrap_or(Value::Int(0)))
            })
            .method("setTotal", vec![ManagedType::Int], ManagedType::Void, |_env, this, args| {
                this.set_field("total", args[0].clone());
                Ok(Value::Null)
            })
            .build();
        Object::new(&class)
    }

    fn adapter(loopback: &Arc<LoopbackBus>, object: &ObjectRef) -> Arc<BusObjectAdapter> {
        let vm = Vm::new();
        let bus: Arc<dyn NativeBus> = loopback.clone();
        let env = ScopedEnv::new(&vm);
        let adapter = BusObjectAdapter::new(&env, &bus, object, "/calc", vec![calculator_iface()]).unwrap();
        adapter.binding().activate().unwrap();
        adapter
    }

    fn call(adapter: &BusObjectAdapter, member: &str, args: Vec<MsgArg>) {
        let iface = calculator_iface();
        let member = iface.member(member).unwrap().clone();
        let message = Message::new("/calc", "org.example.Calc", member.name.clone(), args).with_sender(":1.5");
        adapter.method_call(&member, Arc::new(message));
    }

    #[test]
    fn test_method_call_replies_with_result() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Add", vec![MsgArg::Int32(2), MsgArg::Int32(40)]);
        assert_eq!(loopback.sent_replies(), vec![Reply::Args(vec![MsgArg::Int32(42)])]);
    }

    #[test]
    fn test_multiple_outputs_unpack_struct() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Split", vec![MsgArg::Int32(5)]);
        assert_eq!(
            loopback.sent_replies(),
            vec![Reply::Args(vec![MsgArg::Int32(2), MsgArg::Int32(3)])]
        );
    }

    #[test]
    fn test_null_return_with_output_is_bus_exception() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Name", vec![]);
        assert_eq!(
            loopback.sent_replies(),
            vec![Reply::Error {
                name: BUS_EXCEPTION_ERROR.to_string(),
                message: "org.example.Calc.Name returned null".to_string(),
            }]
        );
    }

    #[test]
    #[traced_test]
    fn test_no_reply_member_sends_nothing() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Poke", vec![]);
        assert!(loopback.sent_replies().is_empty());
        assert!(logs_contain("no-reply method returned a value; discarded"));
    }

    #[test]
    fn test_member_of_another_interface_is_not_dispatched() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        let member = Member {
            interface: "org.example.Other".to_string(),
            name: "Add".to_string(),
            kind: MemberKind::MethodCall,
            input_sig: "ii".to_string(),
            output_sig: "i".to_string(),
            annotations: MemberAnnotations::empty(),
        };
        let args = vec![MsgArg::Int32(2), MsgArg::Int32(40)];
        let message = Message::new("/calc", "org.example.Other", "Add", args).with_sender(":1.5");
        adapter.method_call(&member, Arc::new(message));
        assert_eq!(
            loopback.sent_replies(),
            vec![Reply::Status(NativeStatus::BUS_OBJECT_NO_SUCH_MEMBER)]
        );
    }

    #[test]
    fn test_bad_arguments_reply_fail() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Add", vec![MsgArg::Int32(2)]);
        assert_eq!(loopback.sent_replies(), vec![Reply::Status(NativeStatus::FAIL)]);
    }

    #[test]
    fn test_message_context_visible_during_dispatch() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        call(&adapter, "Who", vec![]);
        assert_eq!(
            loopback.sent_replies(),
            vec![Reply::Args(vec![MsgArg::String(":1.5".into())])]
        );
        assert!(!MessageContext::is_active());
    }

    #[test]
    fn test_properties() {
        let loopback = LoopbackBus::new();
        let adapter = adapter(&loopback, &calculator());
        let iface = "org.example.Calc";

        assert_eq!(adapter.set_property(iface, "Total", &MsgArg::Int32(9)), NativeStatus::OK);
        assert_eq!(adapter.get_property(iface, "Total"), Ok(MsgArg::Int32(9)));
        assert_eq!(
            adapter.get_property(iface, "Secret"),
            Err(NativeStatus::BUS_PROPERTY_ACCESS_DENIED)
        );
        assert_eq!(
            adapter.set_property(iface, "Secret", &MsgArg::String("x".into())),
            NativeStatus::BUS_PROPERTY_ACCESS_DENIED
        );
        assert_eq!(adapter.get_property(iface, "Missing"), Err(NativeStatus::BUS_NO_SUCH_PROPERTY));
    }

    #[test]
    fn test_missing_method_is_resolution_failure() {
        let loopback = LoopbackBus::new();
        let bus: Arc<dyn NativeBus> = loopback.clone();
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let object = Object::new(&Class::builder("Empty").build());
        let err = BusObjectAdapter::new(&env, &bus, &object, "/calc", vec![calculator_iface()]).unwrap_err();
        assert!(matches!(err, Error::Resolution(_)));
    }
}

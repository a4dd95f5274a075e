//! Proxy bus objects: calls on remote objects.

use super::Bus;
use crate::managed::{Env, ManagedType, Value};
use crate::msg::{marshal, marshal_args, signature, unmarshal, MsgArg};
use crate::native::{CallFailure, Member, MemberKind, MethodCall, BUS_EXCEPTION_ERROR};
use crate::types::{Error, Result, SessionId, Status};
use std::sync::Arc;
use std::time::Duration;

/// Flag set on calls whose caller expects no reply.
pub const FLAG_NO_REPLY_EXPECTED: u8 = 0x01;

/// A remote object reached through a bus attachment.
///
/// Holds one counted reference to the attachment for its whole lifetime.
#[derive(Debug)]
pub struct ProxyBusObject {
    bus: Arc<Bus>,
    bus_name: String,
    object_path: String,
    session_id: SessionId,
    timeout: Duration,
}

/// Only the bridge's own exception error becomes [`Error::BusException`]; any
/// other error name stays an [`Error::ErrorReply`] carrying that name.
fn call_error(failure: CallFailure) -> Error {
    match failure {
        CallFailure::ErrorReply { name, message } if name == BUS_EXCEPTION_ERROR => Error::BusException(message),
        CallFailure::ErrorReply { name, message } => Error::ErrorReply { name, message },
        CallFailure::Status(status) => Error::Bus(Status::from_native(status)),
    }
}

impl ProxyBusObject {
    pub fn new(bus: Arc<Bus>, bus_name: &str, object_path: &str, session_id: SessionId) -> Self {
        let timeout = bus.config().method_call_timeout;
        Self {
            bus,
            bus_name: bus_name.to_string(),
            object_path: object_path.to_string(),
            session_id,
            timeout,
        }
    }

    pub fn bus(&self) -> &Arc<Bus> {
        &self.bus
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }

    pub fn object_path(&self) -> &str {
        &self.object_path
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn method(&self, interface: &str, name: &str) -> Result<Member> {
        let iface = self
            .bus
            .native()
            .interface(interface)
            .ok_or(Error::Bus(Status::BusNoSuchInterface))?;
        match iface.member(name) {
            Some(member) if member.kind == MemberKind::MethodCall => Ok(member.clone()),
            _ => Err(Error::Bus(Status::BusInterfaceNoSuchMember)),
        }
    }

    /// Call `interface.method` on the remote object.
    ///
    /// No-reply members are sent without waiting and yield null. A reply with
    /// several values is unmarshalled as one struct into `ret`.
    pub fn method_call(
        &self,
        env: &Env,
        interface: &str,
        method: &str,
        args: &[Value],
        ret: &ManagedType,
    ) -> Result<Value> {
        let member = self.method(interface, method)?;
        let packed = marshal_args(env, &member.input_sig, args)?;
        let mut call = MethodCall {
            destination: self.bus_name.clone(),
            object_path: self.object_path.clone(),
            interface: interface.to_string(),
            member: method.to_string(),
            session_id: self.session_id,
            args: packed.members().map(<[MsgArg]>::to_vec).unwrap_or_default(),
            timeout: self.timeout,
            flags: 0,
        };

        if member.is_no_reply() {
            call.flags |= FLAG_NO_REPLY_EXPECTED;
            let sent = self.bus.native().method_call_no_reply(&call);
            if !sent.is_ok() {
                return Err(Error::Bus(Status::from_native(sent)));
            }
            return Ok(Value::Null);
        }

        let reply = self.bus.native().method_call(&call).map_err(call_error)?;
        match signature::count_complete_types(&member.output_sig)? {
            0 => Ok(Value::Null),
            1 => {
                let first = reply
                    .first()
                    .ok_or_else(|| Error::marshal(format!("{} replied with no value", method)))?;
                unmarshal(env, first, ret)
            }
            _ => unmarshal(env, &MsgArg::Struct(reply), ret),
        }
    }

    /// Read a property of the remote object.
    pub fn get_property(&self, env: &Env, interface: &str, property: &str, ty: &ManagedType) -> Result<Value> {
        let value = self
            .bus
            .native()
            .get_property(&self.bus_name, &self.object_path, interface, property, self.session_id)
            .map_err(call_error)?;
        // Unmarshalling unwraps the variant.
        unmarshal(env, &value, ty)
    }

    /// Write a property of the remote object, converted per its declared signature.
    pub fn set_property(&self, env: &Env, interface: &str, property: &str, value: &Value) -> Result<()> {
        let iface = self
            .bus
            .native()
            .interface(interface)
            .ok_or(Error::Bus(Status::BusNoSuchInterface))?;
        let prop = iface
            .property(property)
            .ok_or(Error::Bus(Status::BusNoSuchProperty))?;
        let arg = MsgArg::variant(marshal(env, &prop.signature, value)?);
        self.bus
            .native()
            .set_property(&self.bus_name, &self.object_path, interface, property, self.session_id, &arg)
            .map_err(call_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{ScopedEnv, Vm};
    use crate::native::{InterfaceDescription, MemberAnnotations, NativeBus, PropertyAccess};
    use crate::testing::LoopbackBus;
    use crate::types::{BusConfig, NativeStatus};
    use pretty_assertions::assert_eq;

    fn proxy() -> (Arc<Vm>, Arc<LoopbackBus>, ProxyBusObject) {
        let vm = Vm::new();
        let loopback = LoopbackBus::new();
        let iface = InterfaceDescription::builder("org.example.Calc")
            .method("Add", "ii", "i")
            .method("DivMod", "ii", "ii")
            .method_with("Poke", "s", "", MemberAnnotations::NO_REPLY)
            .property("Total", "i", PropertyAccess::ReadWrite)
            .build()
            .unwrap();
        assert!(loopback.create_interface(iface).is_ok());
        let bus = Bus::new(&vm, loopback.clone(), BusConfig::default());
        let proxy = ProxyBusObject::new(bus, "org.example.Calc", "/calc", SessionId::new(1000));
        (vm, loopback, proxy)
    }

    #[test]
    fn test_method_call_single_value() {
        let (vm, loopback, proxy) = proxy();
        let env = ScopedEnv::new(&vm);
        loopback.push_call_result(Ok(vec![MsgArg::Int32(5)]));

        let value = proxy
            .method_call(&env, "org.example.Calc", "Add", &[Value::Int(2), Value::Int(3)], &ManagedType::Int)
            .unwrap();
        assert_eq!(value, Value::Int(5));

        let calls = loopback.method_calls();
        assert_eq!(calls[0].args, vec![MsgArg::Int32(2), MsgArg::Int32(3)]);
        assert_eq!(calls[0].timeout, Duration::from_secs(25));
    }

    #[test]
    fn test_method_call_multiple_values_wrap_in_struct() {
        let (vm, loopback, proxy) = proxy();
        let env = ScopedEnv::new(&vm);
        loopback.push_call_result(Ok(vec![MsgArg::Int32(3), MsgArg::Int32(1)]));

        let ret = ManagedType::Struct(vec![ManagedType::Int, ManagedType::Int]);
        let value = proxy
            .method_call(&env, "org.example.Calc", "DivMod", &[Value::Int(7), Value::Int(2)], &ret)
            .unwrap();
        assert_eq!(value, Value::Struct(vec![Value::Int(3), Value::Int(1)]));
    }

    #[test]
    fn test_no_reply_call_returns_null() {
        let (vm, loopback, proxy) = proxy();
        let env = ScopedEnv::new(&vm);
        let value = proxy
            .method_call(&env, "org.example.Calc", "Poke", &[Value::from("hey")], &ManagedType::Void)
            .unwrap();
        assert_eq!(value, Value::Null);
        assert_eq!(loopback.method_calls()[0].flags, FLAG_NO_REPLY_EXPECTED);
    }

    #[test]
    fn test_error_mapping() {
        let (vm, loopback, proxy) = proxy();
        let env = ScopedEnv::new(&vm);
        let add = |proxy: &ProxyBusObject| {
            proxy.method_call(&env, "org.example.Calc", "Add", &[Value::Int(1), Value::Int(1)], &ManagedType::Int)
        };

        loopback.push_call_result(Err(CallFailure::ErrorReply {
            name: BUS_EXCEPTION_ERROR.to_string(),
            message: "overflow".to_string(),
        }));
        assert!(matches!(add(&proxy), Err(Error::BusException(m)) if m == "overflow"));

        loopback.push_call_result(Err(CallFailure::ErrorReply {
            name: "org.example.Error.Denied".to_string(),
            message: "nope".to_string(),
        }));
        assert!(matches!(add(&proxy), Err(Error::ErrorReply { name, .. }) if name == "org.example.Error.Denied"));

        loopback.push_call_result(Err(CallFailure::Status(NativeStatus::TIMEOUT)));
        assert!(matches!(add(&proxy), Err(Error::Bus(Status::Timeout))));

        let missing = proxy.method_call(&env, "org.example.Missing", "Add", &[], &ManagedType::Void);
        assert!(matches!(missing, Err(Error::Bus(Status::BusNoSuchInterface))));
    }

    #[test]
    fn test_properties_go_through_variants() {
        let (vm, loopback, proxy) = proxy();
        let env = ScopedEnv::new(&vm);
        proxy
            .set_property(&env, "org.example.Calc", "Total", &Value::Int(11))
            .unwrap();
        assert_eq!(loopback.remote_property("org.example.Calc", "Total"), Some(MsgArg::Int32(11)));
        assert_eq!(
            proxy
                .get_property(&env, "org.example.Calc", "Total", &ManagedType::Int)
                .unwrap(),
            Value::Int(11)
        );
    }
}

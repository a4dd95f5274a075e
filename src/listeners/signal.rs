//! Signal handler adapter: one managed handler method bound to one signal member.

use super::{deliver, required, Binding, RefPolicy};
use crate::context::MessageContext;
use crate::managed::{Env, MethodRef, ObjectRef, Vm};
use crate::msg::unmarshal_args;
use crate::native::{Member, MemberKind, Message, SignalReceiver};
use crate::types::{Error, Result};
use std::sync::Arc;

#[derive(Debug)]
pub struct SignalHandlerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    method: MethodRef,
    member: Member,
    source_path: Option<String>,
}

impl SignalHandlerAdapter {
    pub fn new(
        env: &Env,
        handler: &ObjectRef,
        method_name: &str,
        member: &Member,
        source_path: Option<&str>,
    ) -> Result<Arc<Self>> {
        if member.kind != MemberKind::Signal {
            return Err(Error::validation(format!(
                "{}.{} is not a signal",
                member.interface, member.name
            )));
        }
        Ok(Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(handler, RefPolicy::Strong),
            method: required(env, handler, method_name)?,
            member: member.clone(),
            source_path: source_path.map(str::to_string),
        }))
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn member(&self) -> &Member {
        &self.member
    }

    pub fn source_path(&self) -> Option<&str> {
        self.source_path.as_deref()
    }

    /// Whether this adapter delivers to `method` of `handler`.
    pub fn is_handler(&self, handler: &ObjectRef, method: &MethodRef) -> bool {
        self.binding.is_bound_to(handler) && Arc::ptr_eq(&self.method, method)
    }

    /// Match rule selecting this handler's signals.
    pub fn match_rule(&self) -> String {
        let mut rule = format!(
            "type='signal',interface='{}',member='{}'",
            self.member.interface, self.member.name
        );
        if let Some(path) = &self.source_path {
            rule.push_str(&format!(",path='{}'", path));
        }
        rule
    }
}

impl SignalReceiver for SignalHandlerAdapter {
    fn signal(&self, member: &Member, source_path: &str, message: Arc<Message>) {
        if member.interface != self.member.interface || member.name != self.member.name {
            return;
        }
        if self.source_path.as_deref().is_some_and(|path| path != source_path) {
            return;
        }
        let _context = MessageContext::install(Arc::clone(&message));
        deliver(&self.vm, &self.binding, &self.member.name, (), |env, handler| {
            let args = unmarshal_args(env, &message.args, &self.method)?;
            env.call_method(handler, &self.method, &args).map(|_| ())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, ManagedType, Object, ScopedEnv, Value};
    use crate::msg::MsgArg;
    use crate::native::InterfaceDescription;
    use std::sync::Mutex;

    fn changed() -> Member {
        InterfaceDescription::builder("org.example.Thermo")
            .signal("Changed", "d")
            .build()
            .unwrap()
            .member("Changed")
            .unwrap()
            .clone()
    }

    fn handler(seen: Arc<Mutex<Vec<f64>>>) -> ObjectRef {
        let class = Class::builder("ThermoWatcher")
            .method("onChanged", vec![ManagedType::Double], ManagedType::Void, move |_env, _this, args| {
                if let Value::Double(d) = args[0] {
                    seen.lock().unwrap().push(d);
                }
                Ok(Value::Null)
            })
            .build();
        Object::new(&class)
    }

    #[test]
    fn test_signal_delivery_filters_source_path() {
        let vm = Vm::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let obj = handler(Arc::clone(&seen));
        let member = changed();
        let adapter = {
            let env = ScopedEnv::new(&vm);
            SignalHandlerAdapter::new(&env, &obj, "onChanged", &member, Some("/thermo/1")).unwrap()
        };
        adapter.binding().activate().unwrap();

        let msg = |d: f64| Arc::new(Message::new("/thermo/1", "org.example.Thermo", "Changed", vec![MsgArg::Double(d)]));
        adapter.signal(&member, "/thermo/1", msg(21.5));
        adapter.signal(&member, "/thermo/2", msg(99.0));
        assert_eq!(*seen.lock().unwrap(), vec![21.5]);
        assert_eq!(
            adapter.match_rule(),
            "type='signal',interface='org.example.Thermo',member='Changed',path='/thermo/1'"
        );
    }

    #[test]
    fn test_rejects_method_member() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let iface = InterfaceDescription::builder("org.example.Thermo")
            .method("Read", "", "d")
            .build()
            .unwrap();
        let obj = handler(Arc::new(Mutex::new(Vec::new())));
        let member = iface.member("Read").unwrap();
        assert!(SignalHandlerAdapter::new(&env, &obj, "onChanged", member, None).is_err());
    }
}

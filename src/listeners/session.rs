//! Session and session-port listener adapters.

use super::{deliver, optional, required, Binding, RefPolicy};
use crate::managed::builtin::session_opts_to_object;
use crate::managed::{Env, MethodRef, ObjectRef, Value, Vm};
use crate::native::{SessionListener, SessionOpts, SessionPortListener};
use crate::types::{Result, SessionId, SessionPort};
use std::sync::Arc;

/// Forwards [`SessionListener`] callbacks for one joined or hosted session.
#[derive(Debug)]
pub struct SessionListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    session_lost: Option<MethodRef>,
}

impl SessionListenerAdapter {
    pub fn new(env: &Env, listener: &ObjectRef) -> Arc<Self> {
        Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Strong),
            session_lost: optional(env, listener, "sessionLost"),
        })
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl SessionListener for SessionListenerAdapter {
    fn session_lost(&self, session_id: SessionId) {
        let Some(method) = &self.session_lost else {
            return;
        };
        deliver(&self.vm, &self.binding, "sessionLost", (), |env, listener| {
            env.call_method(listener, method, &[Value::Int(session_id.get() as i32)])
                .map(|_| ())
        });
    }
}

/// Forwards [`SessionPortListener`] callbacks for one bound session port.
#[derive(Debug)]
pub struct SessionPortListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    accept_session_joiner: MethodRef,
    session_joined: Option<MethodRef>,
}

impl SessionPortListenerAdapter {
    /// Fails with [`crate::Error::Resolution`] if the listener cannot accept joiners.
    pub fn new(env: &Env, listener: &ObjectRef) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Strong),
            accept_session_joiner: required(env, listener, "acceptSessionJoiner")?,
            session_joined: optional(env, listener, "sessionJoined"),
        }))
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

impl SessionPortListener for SessionPortListenerAdapter {
    fn accept_session_joiner(&self, port: SessionPort, joiner: &str, opts: &SessionOpts) -> bool {
        deliver(&self.vm, &self.binding, "acceptSessionJoiner", false, |env, listener| {
            let args = [
                Value::Short(port.get() as i16),
                Value::from(joiner),
                Value::Object(session_opts_to_object(opts)),
            ];
            let accepted = env.call_method(listener, &self.accept_session_joiner, &args)?;
            Ok(accepted.as_bool().unwrap_or(false))
        })
    }

    fn session_joined(&self, port: SessionPort, session_id: SessionId, joiner: &str) {
        let Some(method) = &self.session_joined else {
            return;
        };
        deliver(&self.vm, &self.binding, "sessionJoined", (), |env, listener| {
            let args = [
                Value::Short(port.get() as i16),
                Value::Int(session_id.get() as i32),
                Value::from(joiner),
            ];
            env.call_method(listener, method, &args).map(|_| ())
        });
    }
}

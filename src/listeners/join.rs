//! Completion listener for asynchronous session joins.

use super::{deliver, optional, Binding, RefPolicy};
use crate::managed::builtin::session_opts_to_object;
use crate::managed::{Env, MethodRef, ObjectRef, Value, Vm};
use crate::native::SessionOpts;
use crate::types::{NativeStatus, SessionId, Status};
use std::sync::Arc;

/// Reports one asynchronous join to its managed listener, then is detached.
///
/// Held strongly together with the caller's context object: the caller usually
/// keeps no reference to either once the join has started.
#[derive(Debug)]
pub struct JoinSessionListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    on_join_session: Option<MethodRef>,
    context: Value,
}

impl JoinSessionListenerAdapter {
    pub fn new(env: &Env, listener: &ObjectRef, context: Option<&ObjectRef>) -> Arc<Self> {
        Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Strong),
            on_join_session: optional(env, listener, "onJoinSession"),
            context: context.map_or(Value::Null, |obj| Value::Object(Arc::clone(obj))),
        })
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }

    pub fn on_join_session(&self, status: NativeStatus, session_id: SessionId, opts: &SessionOpts) {
        let Some(method) = &self.on_join_session else {
            return;
        };
        deliver(&self.vm, &self.binding, "onJoinSession", (), |env, listener| {
            let args = [
                Value::from(Status::from_native(status).name()),
                Value::Int(session_id.get() as i32),
                Value::Object(session_opts_to_object(opts)),
                self.context.clone(),
            ];
            env.call_method(listener, method, &args).map(|_| ())
        });
    }
}

//! Authentication listener adapter.
//!
//! Held weakly: the facade keeps the strong reference while peer security is
//! enabled. Every decision defaults to "reject" when the listener cannot answer.

use super::{deliver, optional, required, Binding, RefPolicy};
use crate::managed::builtin::{credentials_class, credentials_from_object, credentials_to_object, message_context_object};
use crate::managed::{Env, MethodRef, Object, ObjectRef, Value, Vm};
use crate::native::{AuthListener, CredentialMask, Credentials, Message};
use crate::types::{NativeStatus, Result, Status};
use std::sync::Arc;

#[derive(Debug)]
pub struct AuthListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    request_credentials: MethodRef,
    verify_credentials: Option<MethodRef>,
    security_violation: Option<MethodRef>,
    authentication_complete: Option<MethodRef>,
}

impl AuthListenerAdapter {
    pub fn new(env: &Env, listener: &ObjectRef) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Weak),
            request_credentials: required(env, listener, "requestCredentials")?,
            verify_credentials: optional(env, listener, "verifyCredentials"),
            security_violation: optional(env, listener, "securityViolation"),
            authentication_complete: optional(env, listener, "authenticationComplete"),
        }))
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

/// Keep only the requested fields.
fn restrict(creds: Credentials, requested: CredentialMask) -> Credentials {
    let keep = |flag: CredentialMask| requested.contains(flag);
    Credentials {
        password: creds.password.filter(|_| keep(CredentialMask::PASSWORD)),
        user_name: creds.user_name.filter(|_| keep(CredentialMask::USER_NAME)),
        cert_chain: creds.cert_chain.filter(|_| keep(CredentialMask::CERT_CHAIN)),
        private_key: creds.private_key.filter(|_| keep(CredentialMask::PRIVATE_KEY)),
        logon_entry: creds.logon_entry.filter(|_| keep(CredentialMask::LOGON_ENTRY)),
        expiration: creds.expiration.filter(|_| keep(CredentialMask::EXPIRATION)),
    }
}

impl AuthListener for AuthListenerAdapter {
    fn request_credentials(
        &self,
        mechanism: &str,
        peer: &str,
        auth_count: u16,
        user_name: &str,
        requested: CredentialMask,
        credentials: &mut Credentials,
    ) -> bool {
        let supplied = deliver(&self.vm, &self.binding, "requestCredentials", None, |env, listener| {
            let holder = Object::new(credentials_class());
            let args = [
                Value::from(mechanism),
                Value::from(peer),
                Value::Int(i32::from(auth_count)),
                Value::from(user_name),
                Value::Int(i32::from(requested.bits())),
                Value::Object(Arc::clone(&holder)),
            ];
            let accepted = env.call_method(listener, &self.request_credentials, &args)?;
            if accepted.as_bool() != Some(true) {
                return Ok(None);
            }
            Ok(Some(credentials_from_object(&holder)))
        });
        match supplied {
            Some(creds) => {
                *credentials = restrict(creds, requested);
                true
            }
            None => false,
        }
    }

    fn verify_credentials(&self, mechanism: &str, peer: &str, credentials: &Credentials) -> bool {
        let Some(method) = &self.verify_credentials else {
            return false;
        };
        deliver(&self.vm, &self.binding, "verifyCredentials", false, |env, listener| {
            let args = [
                Value::from(mechanism),
                Value::from(peer),
                Value::Object(credentials_to_object(credentials)),
            ];
            Ok(env.call_method(listener, method, &args)?.as_bool().unwrap_or(false))
        })
    }

    fn security_violation(&self, status: NativeStatus, message: &Message) {
        let Some(method) = &self.security_violation else {
            return;
        };
        deliver(&self.vm, &self.binding, "securityViolation", (), |env, listener| {
            let args = [
                Value::from(Status::from_native(status).name()),
                Value::Object(message_context_object(message)),
            ];
            env.call_method(listener, method, &args).map(|_| ())
        });
    }

    fn authentication_complete(&self, mechanism: &str, peer: &str, success: bool) {
        let Some(method) = &self.authentication_complete else {
            return;
        };
        deliver(&self.vm, &self.binding, "authenticationComplete", (), |env, listener| {
            let args = [Value::from(mechanism), Value::from(peer), Value::Boolean(success)];
            env.call_method(listener, method, &args).map(|_| ())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, ManagedType, ScopedEnv};

    fn password_listener() -> ObjectRef {
        let class = Class::builder("PasswordAuth")
            .method(
                "requestCredentials",
                vec![
                    ManagedType::String,
                    ManagedType::String,
                    ManagedType::Int,
                    ManagedType::String,
                    ManagedType::Int,
                    ManagedType::Object,
                ],
                ManagedType::Boolean,
                |_env, _this, args| {
                    let Some(creds) = args[5].as_object() else {
                        return Ok(Value::Boolean(false));
                    };
                    creds.set_field("password", Value::CharArray("1234".encode_utf16().collect()));
                    creds.set_field("userName", Value::from("ignored"));
                    Ok(Value::Boolean(true))
                },
            )
            .build();
        Object::new(&class)
    }

    #[test]
    fn test_request_credentials_reads_requested_fields() {
        let vm = Vm::new();
        let listener = password_listener();
        let adapter = {
            let env = ScopedEnv::new(&vm);
            AuthListenerAdapter::new(&env, &listener).unwrap()
        };
        adapter.binding().activate().unwrap();

        let mut creds = Credentials::default();
        let ok = adapter.request_credentials("ALLJOYN_SRP_KEYX", ":1.3", 1, "", CredentialMask::PASSWORD, &mut creds);
        assert!(ok);
        assert_eq!(creds.password.as_deref(), Some(b"1234".as_slice()));
        assert!(creds.user_name.is_none());
    }

    #[test]
    fn test_collected_listener_rejects() {
        let vm = Vm::new();
        let listener = password_listener();
        let adapter = {
            let env = ScopedEnv::new(&vm);
            AuthListenerAdapter::new(&env, &listener).unwrap()
        };
        adapter.binding().activate().unwrap();
        drop(listener);

        let mut creds = Credentials::default();
        assert!(!adapter.request_credentials("ALLJOYN_SRP_KEYX", ":1.3", 1, "", CredentialMask::PASSWORD, &mut creds));
        assert_eq!(creds, Credentials::default());
    }

    #[test]
    fn test_verify_defaults_to_reject_when_absent() {
        let vm = Vm::new();
        let listener = password_listener();
        let adapter = {
            let env = ScopedEnv::new(&vm);
            AuthListenerAdapter::new(&env, &listener).unwrap()
        };
        adapter.binding().activate().unwrap();
        assert!(!adapter.verify_credentials("ALLJOYN_RSA_KEYX", ":1.3", &Credentials::default()));
    }
}

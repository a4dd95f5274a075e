//! Managed classes the bridge itself instantiates or reads.

use super::object::{Class, Object, ObjectRef, Value};
use crate::native::{Credentials, Message, SessionOpts};
use crate::types::{Error, Result};
use std::sync::{Arc, OnceLock};

pub const SESSION_OPTS_CLASS: &str = "bus.SessionOpts";
pub const CREDENTIALS_CLASS: &str = "bus.Credentials";
pub const MESSAGE_CONTEXT_CLASS: &str = "bus.MessageContext";

pub fn session_opts_class() -> &'static Arc<Class> {
    static CLASS: OnceLock<Arc<Class>> = OnceLock::new();
    CLASS.get_or_init(|| {
        Class::builder(SESSION_OPTS_CLASS)
            .field("traffic")
            .field("isMultipoint")
            .field("proximity")
            .field("transports")
            .build()
    })
}

pub fn credentials_class() -> &'static Arc<Class> {
    static CLASS: OnceLock<Arc<Class>> = OnceLock::new();
    CLASS.get_or_init(|| {
        Class::builder(CREDENTIALS_CLASS)
            .field("password")
            .field("userName")
            .field("certificateChain")
            .field("privateKey")
            .field("logonEntry")
            .field("expiration")
            .build()
    })
}

pub fn message_context_class() -> &'static Arc<Class> {
    static CLASS: OnceLock<Arc<Class>> = OnceLock::new();
    CLASS.get_or_init(|| {
        Class::builder(MESSAGE_CONTEXT_CLASS)
            .field("isUnreliable")
            .field("objectPath")
            .field("interfaceName")
            .field("memberName")
            .field("destination")
            .field("sender")
            .field("signature")
            .field("authMechanism")
            .build()
    })
}

// =============================================================================
// Session options
// =============================================================================

pub fn session_opts_to_object(opts: &SessionOpts) -> ObjectRef {
    let obj = Object::new(session_opts_class());
    obj.set_field("traffic", Value::Byte(opts.traffic as i8));
    obj.set_field("isMultipoint", Value::Boolean(opts.is_multipoint));
    obj.set_field("proximity", Value::Byte(opts.proximity as i8));
    obj.set_field("transports", Value::Short(opts.transports as i16));
    obj
}

pub fn session_opts_from_object(obj: &ObjectRef) -> Result<SessionOpts> {
    let field = |name: &str| {
        obj.get_field(name)
            .ok_or_else(|| Error::resolution(format!("{}.{}", obj.class().name(), name)))
    };
    let (Value::Byte(traffic), Value::Boolean(is_multipoint), Value::Byte(proximity), Value::Short(transports)) = (
        field("traffic")?,
        field("isMultipoint")?,
        field("proximity")?,
        field("transports")?,
    ) else {
        return Err(Error::marshal("session options fields have unexpected types"));
    };
    Ok(SessionOpts {
        traffic: traffic as u8,
        is_multipoint,
        proximity: proximity as u8,
        transports: transports as u16,
    })
}

// =============================================================================
// Credentials
// =============================================================================

fn bytes_of(value: Value) -> Option<Vec<u8>> {
    match value {
        Value::ByteArray(bytes) => Some(bytes.into_iter().map(|b| b as u8).collect()),
        // Passwords are char arrays on the managed side.
        Value::CharArray(chars) => Some(String::from_utf16_lossy(&chars).into_bytes()),
        _ => None,
    }
}

fn string_of(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        _ => None,
    }
}

/// Managed credentials object holding the fields present in `creds`.
pub fn credentials_to_object(creds: &Credentials) -> ObjectRef {
    let obj = Object::new(credentials_class());
    if let Some(password) = &creds.password {
        let chars = String::from_utf8_lossy(password).encode_utf16().collect();
        obj.set_field("password", Value::CharArray(chars));
    }
    obj.set_field("userName", Value::from(creds.user_name.as_deref()));
    obj.set_field("certificateChain", Value::from(creds.cert_chain.as_deref()));
    obj.set_field("privateKey", Value::from(creds.private_key.as_deref()));
    if let Some(entry) = &creds.logon_entry {
        obj.set_field("logonEntry", Value::ByteArray(entry.iter().map(|b| *b as i8).collect()));
    }
    if let Some(expiration) = creds.expiration {
        obj.set_field("expiration", Value::Int(expiration as i32));
    }
    obj
}

/// Read a managed credentials object.
pub fn credentials_from_object(obj: &ObjectRef) -> Credentials {
    let field = |name: &str| obj.get_field(name).unwrap_or_default();
    Credentials {
        password: bytes_of(field("password")),
        user_name: string_of(field("userName")),
        cert_chain: string_of(field("certificateChain")),
        private_key: string_of(field("privateKey")),
        logon_entry: bytes_of(field("logonEntry")),
        expiration: match field("expiration") {
            Value::Int(secs) => Some(secs as u32),
            _ => None,
        },
    }
}

// =============================================================================
// Message context
// =============================================================================

/// Managed snapshot of an in-flight message's metadata.
pub fn message_context_object(msg: &Message) -> ObjectRef {
    let obj = Object::new(message_context_class());
    obj.set_field("isUnreliable", Value::Boolean(msg.unreliable));
    obj.set_field("objectPath", Value::from(msg.object_path.as_str()));
    obj.set_field("interfaceName", Value::from(msg.interface.as_str()));
    obj.set_field("memberName", Value::from(msg.member.as_str()));
    obj.set_field("destination", Value::from(msg.destination.as_str()));
    obj.set_field("sender", Value::from(msg.sender.as_str()));
    obj.set_field("signature", Value::from(msg.signature.as_str()));
    obj.set_field("authMechanism", Value::from(msg.auth_mechanism.as_str()));
    obj
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_opts_round_trip() {
        let opts = SessionOpts {
            traffic: SessionOpts::TRAFFIC_RAW_RELIABLE,
            is_multipoint: true,
            proximity: SessionOpts::PROXIMITY_ANY,
            transports: SessionOpts::TRANSPORT_ANY,
        };
        let obj = session_opts_to_object(&opts);
        assert_eq!(session_opts_from_object(&obj).unwrap(), opts);
    }

    #[test]
    fn test_credentials_from_object() {
        let obj = Object::new(credentials_class());
        obj.set_field("password", Value::CharArray("sécret".encode_utf16().collect()));
        obj.set_field("userName", Value::from("alice"));

        let creds = credentials_from_object(&obj);
        assert_eq!(creds.password.as_deref(), Some("sécret".as_bytes()));
        assert_eq!(creds.user_name.as_deref(), Some("alice"));
        assert!(creds.cert_chain.is_none());
    }

    #[test]
    fn test_message_context_fields() {
        let msg = Message::new("/svc", "org.example.Svc", "Ping", vec![]).with_sender(":1.7");
        let obj = message_context_object(&msg);
        assert_eq!(obj.get_field("sender"), Some(Value::from(":1.7")));
        assert_eq!(obj.get_field("memberName"), Some(Value::from("Ping")));
        assert_eq!(obj.get_field("isUnreliable"), Some(Value::Boolean(false)));
    }
}

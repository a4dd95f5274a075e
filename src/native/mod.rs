//! Interface of the wrapped native bus library.
//!
//! [`NativeBus`] is what the facade calls into. The callback traits are what the
//! library calls back through; the adapters in [`crate::listeners`] implement them.
//! Once an unregister/unbind/leave call returns success, the library makes no
//! further call into the adapter it was given.

use crate::msg::{signature, signature_of, MsgArg};
use crate::types::{NativeStatus, SessionId, SessionPort};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Sessions
// =============================================================================

/// Session options negotiated on bind and join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpts {
    pub traffic: u8,
    pub is_multipoint: bool,
    pub proximity: u8,
    pub transports: u16,
}

impl SessionOpts {
    pub const TRAFFIC_MESSAGES: u8 = 0x01;
    pub const TRAFFIC_RAW_UNRELIABLE: u8 = 0x02;
    pub const TRAFFIC_RAW_RELIABLE: u8 = 0x04;
    pub const PROXIMITY_ANY: u8 = 0xff;
    pub const TRANSPORT_ANY: u16 = 0xffff;
}

impl Default for SessionOpts {
    fn default() -> Self {
        Self {
            traffic: Self::TRAFFIC_MESSAGES,
            is_multipoint: false,
            proximity: Self::PROXIMITY_ANY,
            transports: Self::TRANSPORT_ANY,
        }
    }
}

// =============================================================================
// Messages
// =============================================================================

/// An in-flight native message.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub serial: u32,
    pub object_path: String,
    pub interface: String,
    pub member: String,
    pub destination: String,
    pub sender: String,
    pub signature: String,
    pub auth_mechanism: String,
    pub unreliable: bool,
    pub session_id: SessionId,
    pub args: Vec<MsgArg>,
}

impl Message {
    /// A method call or signal message carrying `args`.
    pub fn new(
        object_path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<MsgArg>,
    ) -> Self {
        Self {
            object_path: object_path.into(),
            interface: interface.into(),
            member: member.into(),
            signature: signature_of(&args),
            args,
            ..Self::default()
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }
}

/// Error name of the generic bus exception reply.
pub const BUS_EXCEPTION_ERROR: &str = "org.alljoyn.bus.BusException";

/// Reply to a method call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Args(Vec<MsgArg>),
    Error { name: String, message: String },
    Status(NativeStatus),
}

/// Outgoing proxy method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCall {
    pub destination: String,
    pub object_path: String,
    pub interface: String,
    pub member: String,
    pub session_id: SessionId,
    pub args: Vec<MsgArg>,
    pub timeout: Duration,
    pub flags: u8,
}

/// Why a proxy call produced no reply arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum CallFailure {
    Status(NativeStatus),
    ErrorReply { name: String, message: String },
}

// =============================================================================
// Interface descriptions
// =============================================================================

bitflags! {
    /// Member annotations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MemberAnnotations: u8 {
        /// The caller expects no reply.
        const NO_REPLY = 0x01;
        const DEPRECATED = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    MethodCall,
    Signal,
}

/// A method or signal of an interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub interface: String,
    pub name: String,
    pub kind: MemberKind,
    pub input_sig: String,
    pub output_sig: String,
    pub annotations: MemberAnnotations,
}

impl Member {
    pub fn is_no_reply(&self) -> bool {
        self.annotations.contains(MemberAnnotations::NO_REPLY)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyAccess {
    Read,
    Write,
    ReadWrite,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Property {
    pub name: String,
    pub signature: String,
    pub access: PropertyAccess,
}

/// A named collection of members and properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDescription {
    name: String,
    members: Vec<Member>,
    properties: Vec<Property>,
    secure: bool,
}

impl InterfaceDescription {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder {
            iface: InterfaceDescription {
                name: name.into(),
                members: Vec::new(),
                properties: Vec::new(),
                secure: false,
            },
            error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Builder for [`InterfaceDescription`]; signatures are validated on `build`.
#[derive(Debug)]
pub struct InterfaceBuilder {
    iface: InterfaceDescription,
    error: Option<String>,
}

impl InterfaceBuilder {
    fn push_member(
        mut self,
        kind: MemberKind,
        name: &str,
        input_sig: &str,
        output_sig: &str,
        annotations: MemberAnnotations,
    ) -> Self {
        for sig in [input_sig, output_sig] {
            if !signature::is_valid(sig) && self.error.is_none() {
                self.error = Some(format!("{}.{}: bad signature '{}'", self.iface.name, name, sig));
            }
        }
        self.iface.members.push(Member {
            interface: self.iface.name.clone(),
            name: name.to_string(),
            kind,
            input_sig: input_sig.to_string(),
            output_sig: output_sig.to_string(),
            annotations,
        });
        self
    }

    pub fn method(self, name: &str, input_sig: &str, output_sig: &str) -> Self {
        self.push_member(MemberKind::MethodCall, name, input_sig, output_sig, MemberAnnotations::empty())
    }

    pub fn method_with(
        self,
        name: &str,
        input_sig: &str,
        output_sig: &str,
        annotations: MemberAnnotations,
    ) -> Self {
        self.push_member(MemberKind::MethodCall, name, input_sig, output_sig, annotations)
    }

    pub fn signal(self, name: &str, sig: &str) -> Self {
        self.push_member(MemberKind::Signal, name, sig, "", MemberAnnotations::empty())
    }

    pub fn property(mut self, name: &str, sig: &str, access: PropertyAccess) -> Self {
        if !signature::is_complete_type(sig) && self.error.is_none() {
            self.error = Some(format!("{}.{}: bad property signature '{}'", self.iface.name, name, sig));
        }
        self.iface.properties.push(Property {
            name: name.to_string(),
            signature: sig.to_string(),
            access,
        });
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        self.iface.secure = secure;
        self
    }

    pub fn build(self) -> crate::Result<InterfaceDescription> {
        match self.error {
            Some(msg) => Err(crate::Error::signature(msg)),
            None => Ok(self.iface),
        }
    }
}

// =============================================================================
// Security
// =============================================================================

bitflags! {
    /// Which credential fields are requested or supplied.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CredentialMask: u16 {
        const PASSWORD = 0x0001;
        const USER_NAME = 0x0002;
        const CERT_CHAIN = 0x0004;
        const PRIVATE_KEY = 0x0008;
        const LOGON_ENTRY = 0x0010;
        const EXPIRATION = 0x0020;
    }
}

/// Credentials exchanged during authentication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub password: Option<Vec<u8>>,
    pub user_name: Option<String>,
    pub cert_chain: Option<String>,
    pub private_key: Option<String>,
    pub logon_entry: Option<Vec<u8>>,
    pub expiration: Option<u32>,
}

impl Credentials {
    /// Fields that are present.
    pub fn mask(&self) -> CredentialMask {
        let mut mask = CredentialMask::empty();
        mask.set(CredentialMask::PASSWORD, self.password.is_some());
        mask.set(CredentialMask::USER_NAME, self.user_name.is_some());
        mask.set(CredentialMask::CERT_CHAIN, self.cert_chain.is_some());
        mask.set(CredentialMask::PRIVATE_KEY, self.private_key.is_some());
        mask.set(CredentialMask::LOGON_ENTRY, self.logon_entry.is_some());
        mask.set(CredentialMask::EXPIRATION, self.expiration.is_some());
        mask
    }
}

/// Native key store handed to the key-store listener on load and store.
pub trait KeyStore {
    /// Replace the store's contents with `source`, decrypted with `password`.
    fn put_keys(&mut self, source: &[u8], password: &[u8]) -> NativeStatus;

    /// Serialized store contents.
    fn get_keys(&self) -> Result<Vec<u8>, NativeStatus>;
}

// =============================================================================
// Callback interfaces
// =============================================================================

pub trait BusListener: Send + Sync {
    fn listener_registered(&self);
    fn listener_unregistered(&self);
    fn found_advertised_name(&self, name: &str, transport: u16, name_prefix: &str);
    fn lost_advertised_name(&self, name: &str, transport: u16, name_prefix: &str);
    fn name_owner_changed(&self, bus_name: &str, previous_owner: Option<&str>, new_owner: Option<&str>);
    fn bus_stopping(&self);
}

pub trait SessionListener: Send + Sync {
    fn session_lost(&self, session_id: SessionId);
}

pub trait SessionPortListener: Send + Sync {
    fn accept_session_joiner(&self, port: SessionPort, joiner: &str, opts: &SessionOpts) -> bool;
    fn session_joined(&self, port: SessionPort, session_id: SessionId, joiner: &str);
}

pub trait AuthListener: Send + Sync {
    fn request_credentials(
        &self,
        mechanism: &str,
        peer: &str,
        auth_count: u16,
        user_name: &str,
        requested: CredentialMask,
        credentials: &mut Credentials,
    ) -> bool;
    fn verify_credentials(&self, mechanism: &str, peer: &str, credentials: &Credentials) -> bool;
    fn security_violation(&self, status: NativeStatus, message: &Message);
    fn authentication_complete(&self, mechanism: &str, peer: &str, success: bool);
}

pub trait KeyStoreListener: Send + Sync {
    fn load_request(&self, store: &mut dyn KeyStore) -> NativeStatus;
    fn store_request(&self, store: &mut dyn KeyStore) -> NativeStatus;
}

/// An object exported on the bus.
pub trait BusObject: Send + Sync {
    fn path(&self) -> &str;
    fn interfaces(&self) -> Vec<Arc<InterfaceDescription>>;
    fn method_call(&self, member: &Member, message: Arc<Message>);
    fn get_property(&self, interface: &str, property: &str) -> Result<MsgArg, NativeStatus>;
    fn set_property(&self, interface: &str, property: &str, value: &MsgArg) -> NativeStatus;
    fn generate_introspection(&self, deep: bool, indent: usize) -> Option<String>;
    fn object_registered(&self);
    fn object_unregistered(&self);
}

pub trait SignalReceiver: Send + Sync {
    fn signal(&self, member: &Member, source_path: &str, message: Arc<Message>);
}

/// Completion of an asynchronous session join. Called exactly once.
pub trait JoinSessionCallback: Send + Sync {
    fn join_session_complete(&self, status: NativeStatus, session_id: SessionId, opts: &SessionOpts);
}

// =============================================================================
// The library
// =============================================================================

/// Entry points of the wrapped bus library, passed through by the facade.
pub trait NativeBus: Send + Sync {
    fn start(&self) -> NativeStatus;
    fn stop(&self) -> NativeStatus;
    fn is_started(&self) -> bool;
    fn connect(&self, connect_spec: &str) -> NativeStatus;
    fn disconnect(&self, connect_spec: &str) -> NativeStatus;
    fn is_connected(&self) -> bool;
    fn unique_name(&self) -> String;
    /// Whether messages from remote peers are delivered. Set once, at creation.
    fn set_allow_remote_messages(&self, allow: bool);

    fn register_bus_listener(&self, listener: Arc<dyn BusListener>);
    fn unregister_bus_listener(&self, listener: &Arc<dyn BusListener>);

    fn register_key_store_listener(&self, listener: Arc<dyn KeyStoreListener>) -> NativeStatus;
    fn enable_peer_security(
        &self,
        mechanisms: &str,
        listener: Option<Arc<dyn AuthListener>>,
        key_store_file: Option<&str>,
        shared: bool,
    ) -> NativeStatus;
    /// Process-wide credentials for `mechanism`, used in place of an auth listener.
    fn set_password_credentials(&self, mechanism: &str, password: &str) -> NativeStatus;
    fn clear_key_store(&self);
    fn clear_keys(&self, guid: &str) -> NativeStatus;
    fn reload_key_store(&self) -> NativeStatus;

    fn create_interface(&self, iface: InterfaceDescription) -> NativeStatus;
    fn interface(&self, name: &str) -> Option<Arc<InterfaceDescription>>;

    fn register_bus_object(&self, object: Arc<dyn BusObject>) -> NativeStatus;
    fn unregister_bus_object(&self, path: &str) -> NativeStatus;

    fn register_signal_handler(
        &self,
        receiver: Arc<dyn SignalReceiver>,
        member: &Member,
        source_path: Option<&str>,
    ) -> NativeStatus;
    fn unregister_signal_handler(
        &self,
        receiver: &Arc<dyn SignalReceiver>,
        member: &Member,
        source_path: Option<&str>,
    ) -> NativeStatus;
    fn add_match(&self, rule: &str) -> NativeStatus;
    fn remove_match(&self, rule: &str) -> NativeStatus;

    fn request_name(&self, name: &str, flags: u32) -> NativeStatus;
    fn release_name(&self, name: &str) -> NativeStatus;
    fn advertise_name(&self, name: &str, transports: u16) -> NativeStatus;
    fn cancel_advertise_name(&self, name: &str, transports: u16) -> NativeStatus;
    fn find_advertised_name(&self, name_prefix: &str) -> NativeStatus;
    fn cancel_find_advertised_name(&self, name_prefix: &str) -> NativeStatus;

    fn bind_session_port(
        &self,
        port: &mut SessionPort,
        opts: &SessionOpts,
        listener: Arc<dyn SessionPortListener>,
    ) -> NativeStatus;
    fn unbind_session_port(&self, port: SessionPort) -> NativeStatus;
    fn join_session(
        &self,
        host: &str,
        port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        session_id: &mut SessionId,
        opts: &mut SessionOpts,
    ) -> NativeStatus;
    /// Start a join; `callback` reports the outcome unless this call fails.
    fn join_session_async(
        &self,
        host: &str,
        port: SessionPort,
        listener: Option<Arc<dyn SessionListener>>,
        opts: &SessionOpts,
        callback: Arc<dyn JoinSessionCallback>,
    ) -> NativeStatus;
    fn leave_session(&self, session_id: SessionId) -> NativeStatus;
    fn set_session_listener(
        &self,
        session_id: SessionId,
        listener: Option<Arc<dyn SessionListener>>,
    ) -> NativeStatus;
    fn session_fd(&self, session_id: SessionId) -> Result<i32, NativeStatus>;
    fn peer_guid(&self, name: &str) -> Result<String, NativeStatus>;
    fn set_daemon_debug(&self, module: &str, level: u32) -> NativeStatus;

    fn method_reply(&self, call: &Message, reply: Reply) -> NativeStatus;
    #[allow(clippy::too_many_arguments)]
    fn emit_signal(
        &self,
        source_path: &str,
        destination: Option<&str>,
        session_id: SessionId,
        member: &Member,
        args: &[MsgArg],
        ttl: u16,
        flags: u8,
    ) -> NativeStatus;
    fn method_call(&self, call: &MethodCall) -> Result<Vec<MsgArg>, CallFailure>;
    fn method_call_no_reply(&self, call: &MethodCall) -> NativeStatus;
    fn get_property(
        &self,
        destination: &str,
        object_path: &str,
        interface: &str,
        property: &str,
        session_id: SessionId,
    ) -> Result<MsgArg, CallFailure>;
    fn set_property(
        &self,
        destination: &str,
        object_path: &str,
        interface: &str,
        property: &str,
        session_id: SessionId,
        value: &MsgArg,
    ) -> Result<(), CallFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_builder() {
        let iface = InterfaceDescription::builder("org.example.Calc")
            .method("Add", "ii", "i")
            .method_with("Ping", "", "", MemberAnnotations::NO_REPLY)
            .signal("Changed", "s")
            .property("Value", "i", PropertyAccess::ReadWrite)
            .build()
            .unwrap();

        assert!(iface.member("Ping").unwrap().is_no_reply());
        assert_eq!(iface.member("Changed").unwrap().kind, MemberKind::Signal);
        assert_eq!(iface.member("Add").unwrap().interface, "org.example.Calc");
        assert_eq!(iface.property("Value").unwrap().signature, "i");
    }

    #[test]
    fn test_interface_builder_rejects_bad_signature() {
        let result = InterfaceDescription::builder("org.example.Bad")
            .method("Oops", "a{", "")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_credentials_mask() {
        let creds = Credentials {
            password: Some(b"pw".to_vec()),
            user_name: Some("me".into()),
            ..Credentials::default()
        };
        assert_eq!(creds.mask(), CredentialMask::PASSWORD | CredentialMask::USER_NAME);
    }

    #[test]
    fn test_message_signature_follows_args() {
        let msg = Message::new("/a", "org.example", "M", vec![MsgArg::Int32(1), MsgArg::String("s".into())]);
        assert_eq!(msg.signature, "is");
    }
}

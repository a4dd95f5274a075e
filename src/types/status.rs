//! Bus-protocol status codes.
//!
//! The native library reports raw [`NativeStatus`] codes. Everything handed back to
//! the managed side is a [`Status`], translated 1:1 by [`Status::from_native`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw status code as returned by the native bus library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeStatus(pub u32);

impl NativeStatus {
    pub fn is_ok(self) -> bool {
        self == NativeStatus::OK
    }
}

impl fmt::Display for NativeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:04x})", Status::from_native(*self), self.0)
    }
}

/// Generates the managed [`Status`] enumeration and the matching native constants
/// from one table, so the two sides cannot drift apart.
macro_rules! define_status {
    ($( $variant:ident = ($code:literal, $konst:ident, $name:expr, $desc:expr); )*) => {
        /// Managed-side status enumeration.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum Status {
            $( $variant, )*
            /// A native code with no managed counterpart.
            Unknown(u32),
        }

        impl NativeStatus {
            $( pub const $konst: NativeStatus = NativeStatus($code); )*
        }

        impl Status {
            /// Translate a native code.
            pub fn from_native(status: NativeStatus) -> Self {
                match status.0 {
                    $( $code => Status::$variant, )*
                    other => Status::Unknown(other),
                }
            }

            /// Native code for this status.
            pub fn code(self) -> u32 {
                match self {
                    $( Status::$variant => $code, )*
                    Status::Unknown(code) => code,
                }
            }

            /// Symbolic name, e.g. `ER_BUS_NO_SESSION`.
            pub fn name(self) -> &'static str {
                match self {
                    $( Status::$variant => $name, )*
                    Status::Unknown(_) => "ER_UNKNOWN",
                }
            }

            pub fn description(self) -> &'static str {
                match self {
                    $( Status::$variant => $desc, )*
                    Status::Unknown(_) => "Unrecognized status code",
                }
            }
        }
    };
}

define_status! {
    Ok = (0x0000, OK, "ER_OK", "Success");
    Fail = (0x0001, FAIL, "ER_FAIL", "Generic failure");
    OutOfMemory = (0x0002, OUT_OF_MEMORY, "ER_OUT_OF_MEMORY", "Native allocation failed");
    Timeout = (0x0003, TIMEOUT, "ER_TIMEOUT", "Operation timed out");
    NotImplemented = (0x0004, NOT_IMPLEMENTED, "ER_NOT_IMPLEMENTED", "Feature not implemented");
    BadArg = (0x0005, BAD_ARG, "ER_BAD_ARG", "Invalid argument");
    BusBadSignature = (0x9001, BUS_BAD_SIGNATURE, "ER_BUS_BAD_SIGNATURE", "Invalid type signature");
    BusBadValue = (0x9002, BUS_BAD_VALUE, "ER_BUS_BAD_VALUE", "Value does not match its signature");
    BusNotConnected = (0x9003, BUS_NOT_CONNECTED, "ER_BUS_NOT_CONNECTED", "Bus attachment is not connected");
    BusNotStarted = (0x9004, BUS_NOT_STARTED, "ER_BUS_BUS_NOT_STARTED", "Bus attachment is not started");
    BusAlreadyStarted = (0x9005, BUS_ALREADY_STARTED, "ER_BUS_BUS_ALREADY_STARTED", "Bus attachment already started");
    BusObjAlreadyExists = (0x9006, BUS_OBJ_ALREADY_EXISTS, "ER_BUS_OBJ_ALREADY_EXISTS", "Object already exists");
    BusNoSuchObject = (0x9007, BUS_NO_SUCH_OBJECT, "ER_BUS_NO_SUCH_OBJECT", "No such object");
    BusObjectNoSuchMember = (0x9008, BUS_OBJECT_NO_SUCH_MEMBER, "ER_BUS_OBJECT_NO_SUCH_MEMBER", "Object has no such member");
    BusObjectNoSuchInterface = (0x9009, BUS_OBJECT_NO_SUCH_INTERFACE, "ER_BUS_OBJECT_NO_SUCH_INTERFACE", "Object does not implement the interface");
    BusNoSuchInterface = (0x900a, BUS_NO_SUCH_INTERFACE, "ER_BUS_NO_SUCH_INTERFACE", "No such interface");
    BusInterfaceNoSuchMember = (0x900b, BUS_INTERFACE_NO_SUCH_MEMBER, "ER_BUS_INTERFACE_NO_SUCH_MEMBER", "Interface has no such member");
    BusInterfaceExists = (0x900c, BUS_IFACE_ALREADY_EXISTS, "ER_BUS_IFACE_ALREADY_EXISTS", "Interface already exists");
    BusNoSuchProperty = (0x900d, BUS_NO_SUCH_PROPERTY, "ER_BUS_NO_SUCH_PROPERTY", "No such property");
    BusPropertyAccessDenied = (0x900e, BUS_PROPERTY_ACCESS_DENIED, "ER_BUS_PROPERTY_ACCESS_DENIED", "Property access denied");
    BusReplyIsErrorMessage = (0x900f, BUS_REPLY_IS_ERROR_MESSAGE, "ER_BUS_REPLY_IS_ERROR_MESSAGE", "Reply is an error message");
    BusNoSession = (0x9010, BUS_NO_SESSION, "ER_BUS_NO_SESSION", "No such session");
    BusSessionPortInUse = (0x9011, BUS_SESSION_PORT_IN_USE, "ER_ALLJOYN_BINDSESSIONPORT_REPLY_ALREADY_EXISTS", "Session port already bound");
    BusNoSuchSessionPort = (0x9012, BUS_NO_SUCH_SESSION_PORT, "ER_BUS_NO_SUCH_SESSION_PORT", "Session port is not bound");
    BusJoinSessionRejected = (0x9013, BUS_JOIN_SESSION_REJECTED, "ER_ALLJOYN_JOINSESSION_REPLY_REJECTED", "Session join rejected");
    BusNameNotOwner = (0x9014, BUS_NAME_NOT_OWNER, "ER_BUS_NAME_NOT_OWNER", "Caller does not own the name");
    BusNameAlreadyOwner = (0x9015, BUS_NAME_ALREADY_OWNER, "ER_DBUS_REQUEST_NAME_REPLY_ALREADY_OWNER", "Caller already owns the name");
    BusMatchRuleNotFound = (0x9016, BUS_MATCH_RULE_NOT_FOUND, "ER_BUS_MATCH_RULE_NOT_FOUND", "Match rule not found");
    BusNoPeerGuid = (0x9017, BUS_NO_PEER_GUID, "ER_BUS_NO_PEER_GUID", "No GUID for the peer");
    BusSecurityNotEnabled = (0x9018, BUS_SECURITY_NOT_ENABLED, "ER_BUS_SECURITY_NOT_ENABLED", "Peer security is not enabled");
    BusKeyStoreNotLoaded = (0x9019, BUS_KEYSTORE_NOT_LOADED, "ER_BUS_KEYSTORE_NOT_LOADED", "Key store is not loaded");
    BusKeyUnavailable = (0x901a, BUS_KEY_UNAVAILABLE, "ER_BUS_KEY_UNAVAILABLE", "Key unavailable");
    BusAuthFail = (0x901b, BUS_AUTH_FAIL, "ER_AUTH_FAIL", "Authentication failed");
    BusNotAllowed = (0x901c, BUS_NOT_ALLOWED, "ER_BUS_NOT_ALLOWED", "Operation not allowed");
    BusHandlerAlreadyRegistered = (0x901d, BUS_HANDLER_ALREADY_REGISTERED, "ER_BUS_HANDLER_ALREADY_REGISTERED", "Handler already registered");
}

impl Status {
    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Translate back into a native code.
    pub fn to_native(self) -> NativeStatus {
        NativeStatus(self.code())
    }
}

impl From<NativeStatus> for Status {
    fn from(status: NativeStatus) -> Self {
        Status::from_native(status)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_translation_is_one_to_one() {
        let samples = [
            NativeStatus::OK,
            NativeStatus::FAIL,
            NativeStatus::BUS_NO_SESSION,
            NativeStatus::BUS_OBJ_ALREADY_EXISTS,
            NativeStatus::BUS_PROPERTY_ACCESS_DENIED,
        ];
        for native in samples {
            assert_eq!(Status::from_native(native).to_native(), native);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let status = Status::from_native(NativeStatus(0xbeef));
        assert_eq!(status, Status::Unknown(0xbeef));
        assert_eq!(status.code(), 0xbeef);
        assert_eq!(status.name(), "ER_UNKNOWN");
    }

    #[test]
    fn test_display_uses_symbolic_name() {
        assert_eq!(Status::BusNoSession.to_string(), "ER_BUS_NO_SESSION");
        assert!(NativeStatus::OK.is_ok());
        assert!(!Status::Fail.is_ok());
    }
}

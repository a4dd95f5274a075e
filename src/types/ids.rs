//! Strongly-typed identifiers.
//!
//! Session ports and ids are plain numbers on the wire; wrapping them keeps a
//! port from being passed where a session id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define a strongly-typed numeric newtype wrapper.
///
/// Generates: struct, `new()`, `get()`, Display, From conversions.
macro_rules! define_numeric_id {
    ($name:ident, $repr:ty) => {
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name($repr);

        impl $name {
            pub const fn new(value: $repr) -> Self {
                Self(value)
            }

            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$repr> for $name {
            fn from(value: $repr) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $repr {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_numeric_id!(SessionPort, u16);
define_numeric_id!(SessionId, u32);

impl SessionPort {
    /// Ask the bus to choose a free port.
    pub const ANY: SessionPort = SessionPort(0);
}

/// Globally unique identifier of a bus attachment or peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guid(String);

impl Guid {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(s: String) -> Result<Self, &'static str> {
        if s.is_empty() {
            return Err("Guid cannot be empty");
        }
        Ok(Self(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

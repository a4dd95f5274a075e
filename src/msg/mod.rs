//! Value marshaller.
//!
//! - **signature**: complete-type parsing and validation
//! - **arg**: the native tagged value [`MsgArg`]
//! - **variant**: the managed [`Variant`] wrapper
//! - **marshal**: conversion in both directions

pub mod arg;
pub mod marshal;
pub mod signature;
mod variant;

pub use arg::{signature_of, MsgArg, TypeCode};
pub use marshal::{marshal, marshal_args, unmarshal, unmarshal_args};
pub use variant::Variant;

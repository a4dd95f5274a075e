//! The native tagged value.
//!
//! A [`MsgArg`] owns its whole nested tree, so dropping it frees every nested
//! value. Arrays are homogeneous: every element carries the array's element
//! signature.

use super::signature;
use crate::types::{Error, Result};
use std::fmt;

/// One-character type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeCode {
    Byte,
    Boolean,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Double,
    String,
    ObjectPath,
    Signature,
    Array,
    Struct,
    DictEntry,
    Variant,
}

impl TypeCode {
    pub fn as_char(self) -> char {
        match self {
            TypeCode::Byte => 'y',
            TypeCode::Boolean => 'b',
            TypeCode::Int16 => 'n',
            TypeCode::Uint16 => 'q',
            TypeCode::Int32 => 'i',
            TypeCode::Uint32 => 'u',
            TypeCode::Int64 => 'x',
            TypeCode::Uint64 => 't',
            TypeCode::Double => 'd',
            TypeCode::String => 's',
            TypeCode::ObjectPath => 'o',
            TypeCode::Signature => 'g',
            TypeCode::Array => 'a',
            TypeCode::Struct => '(',
            TypeCode::DictEntry => '{',
            TypeCode::Variant => 'v',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'y' => TypeCode::Byte,
            'b' => TypeCode::Boolean,
            'n' => TypeCode::Int16,
            'q' => TypeCode::Uint16,
            'i' => TypeCode::Int32,
            'u' => TypeCode::Uint32,
            'x' => TypeCode::Int64,
            't' => TypeCode::Uint64,
            'd' => TypeCode::Double,
            's' => TypeCode::String,
            'o' => TypeCode::ObjectPath,
            'g' => TypeCode::Signature,
            'a' => TypeCode::Array,
            '(' => TypeCode::Struct,
            '{' => TypeCode::DictEntry,
            'v' => TypeCode::Variant,
            _ => return None,
        })
    }
}

/// Native tagged value.
///
/// Boolean array elements are stored at the wire width of 32 bits.
#[derive(Debug, Clone, PartialEq)]
pub enum MsgArg {
    Byte(u8),
    Boolean(bool),
    Int16(i16),
    Uint16(u16),
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Double(f64),
    String(String),
    ObjectPath(String),
    Signature(String),
    ByteArray(Vec<u8>),
    BoolArray(Vec<u32>),
    Int16Array(Vec<i16>),
    Uint16Array(Vec<u16>),
    Int32Array(Vec<i32>),
    Uint32Array(Vec<u32>),
    Int64Array(Vec<i64>),
    Uint64Array(Vec<u64>),
    DoubleArray(Vec<f64>),
    /// Array of any non-scalar element signature.
    Array {
        elem_sig: String,
        elements: Vec<MsgArg>,
    },
    Struct(Vec<MsgArg>),
    DictEntry(Box<MsgArg>, Box<MsgArg>),
    Variant(Box<MsgArg>),
}

impl MsgArg {
    /// Build a generic array, checking that every element matches `elem_sig`.
    pub fn array(elem_sig: impl Into<String>, elements: Vec<MsgArg>) -> Result<Self> {
        let elem_sig = elem_sig.into();
        if !signature::is_complete_type(&elem_sig) {
            return Err(Error::signature(format!(
                "array element signature '{}' is not one complete type",
                elem_sig
            )));
        }
        if let Some(bad) = elements.iter().find(|e| e.signature() != elem_sig) {
            return Err(Error::marshal(format!(
                "array of '{}' cannot hold '{}'",
                elem_sig,
                bad.signature()
            )));
        }
        Ok(MsgArg::Array { elem_sig, elements })
    }

    pub fn dict_entry(key: MsgArg, value: MsgArg) -> Self {
        MsgArg::DictEntry(Box::new(key), Box::new(value))
    }

    pub fn variant(inner: MsgArg) -> Self {
        MsgArg::Variant(Box::new(inner))
    }

    pub fn type_code(&self) -> TypeCode {
        match self {
            MsgArg::Byte(_) => TypeCode::Byte,
            MsgArg::Boolean(_) => TypeCode::Boolean,
            MsgArg::Int16(_) => TypeCode::Int16,
            MsgArg::Uint16(_) => TypeCode::Uint16,
            MsgArg::Int32(_) => TypeCode::Int32,
            MsgArg::Uint32(_) => TypeCode::Uint32,
            MsgArg::Int64(_) => TypeCode::Int64,
            MsgArg::Uint64(_) => TypeCode::Uint64,
            MsgArg::Double(_) => TypeCode::Double,
            MsgArg::String(_) => TypeCode::String,
            MsgArg::ObjectPath(_) => TypeCode::ObjectPath,
            MsgArg::Signature(_) => TypeCode::Signature,
            MsgArg::ByteArray(_)
            | MsgArg::BoolArray(_)
            | MsgArg::Int16Array(_)
            | MsgArg::Uint16Array(_)
            | MsgArg::Int32Array(_)
            | MsgArg::Uint32Array(_)
            | MsgArg::Int64Array(_)
            | MsgArg::Uint64Array(_)
            | MsgArg::DoubleArray(_)
            | MsgArg::Array { .. } => TypeCode::Array,
            MsgArg::Struct(_) => TypeCode::Struct,
            MsgArg::DictEntry(..) => TypeCode::DictEntry,
            MsgArg::Variant(_) => TypeCode::Variant,
        }
    }

    /// Signature of this value.
    pub fn signature(&self) -> String {
        match self {
            MsgArg::ByteArray(_) => "ay".to_string(),
            MsgArg::BoolArray(_) => "ab".to_string(),
            MsgArg::Int16Array(_) => "an".to_string(),
            MsgArg::Uint16Array(_) => "aq".to_string(),
            MsgArg::Int32Array(_) => "ai".to_string(),
            MsgArg::Uint32Array(_) => "au".to_string(),
            MsgArg::Int64Array(_) => "ax".to_string(),
            MsgArg::Uint64Array(_) => "at".to_string(),
            MsgArg::DoubleArray(_) => "ad".to_string(),
            MsgArg::Array { elem_sig, .. } => format!("a{}", elem_sig),
            MsgArg::Struct(members) => format!("({})", signature_of(members)),
            MsgArg::DictEntry(key, value) => format!("{{{}{}}}", key.signature(), value.signature()),
            scalar => scalar.type_code().as_char().to_string(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MsgArg::String(s) | MsgArg::ObjectPath(s) | MsgArg::Signature(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            MsgArg::Uint32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            MsgArg::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Members of a struct.
    pub fn members(&self) -> Option<&[MsgArg]> {
        match self {
            MsgArg::Struct(members) => Some(members),
            _ => None,
        }
    }

    /// Element count of any array kind.
    pub fn len(&self) -> Option<usize> {
        Some(match self {
            MsgArg::ByteArray(v) => v.len(),
            MsgArg::BoolArray(v) => v.len(),
            MsgArg::Int16Array(v) => v.len(),
            MsgArg::Uint16Array(v) => v.len(),
            MsgArg::Int32Array(v) => v.len(),
            MsgArg::Uint32Array(v) => v.len(),
            MsgArg::Int64Array(v) => v.len(),
            MsgArg::Uint64Array(v) => v.len(),
            MsgArg::DoubleArray(v) => v.len(),
            MsgArg::Array { elements, .. } => elements.len(),
            _ => return None,
        })
    }
}

/// Concatenated signature of an argument list.
pub fn signature_of(args: &[MsgArg]) -> String {
    args.iter().map(MsgArg::signature).collect()
}

impl fmt::Display for MsgArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MsgArg::String(s) | MsgArg::ObjectPath(s) | MsgArg::Signature(s) => {
                write!(f, "{}:{:?}", self.signature(), s)
            }
            MsgArg::Struct(members) => {
                write!(f, "(")?;
                for (i, m) in members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", m)?;
                }
                write!(f, ")")
            }
            MsgArg::Variant(inner) => write!(f, "v<{}>", inner),
            other => write!(f, "{}:{:?}", other.signature(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures() {
        assert_eq!(MsgArg::Uint16(1).signature(), "q");
        assert_eq!(MsgArg::BoolArray(vec![1, 0]).signature(), "ab");
        let dict = MsgArg::array(
            "{sv}",
            vec![MsgArg::dict_entry(
                MsgArg::String("k".into()),
                MsgArg::variant(MsgArg::Int32(1)),
            )],
        )
        .unwrap();
        assert_eq!(dict.signature(), "a{sv}");
        let tuple = MsgArg::Struct(vec![MsgArg::Int32(1), dict]);
        assert_eq!(tuple.signature(), "(ia{sv})");
        assert_eq!(tuple.type_code(), TypeCode::Struct);
    }

    #[test]
    fn test_heterogeneous_array_is_rejected() {
        let err = MsgArg::array("s", vec![MsgArg::String("a".into()), MsgArg::Int32(1)]);
        assert!(matches!(err, Err(Error::Marshal(_))));
        assert!(MsgArg::array("ii", vec![]).is_err());
    }

    #[test]
    fn test_type_code_chars_round_trip() {
        for c in "ybnqiuxtdsoga({v".chars() {
            assert_eq!(TypeCode::from_char(c).unwrap().as_char(), c);
        }
        assert!(TypeCode::from_char('z').is_none());
    }

    #[test]
    fn test_empty_array_has_length() {
        assert_eq!(MsgArg::BoolArray(vec![]).len(), Some(0));
        assert_eq!(MsgArg::Int32(0).len(), None);
    }
}

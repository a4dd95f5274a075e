//! Type signatures.
//!
//! A signature is a string of type codes. A *complete type* is one scalar code, `v`,
//! `a` followed by a complete type, a parenthesised list of complete types, or
//! (only directly inside an array) a `{key value}` dict entry with a basic key.

use crate::types::{Error, Result};

pub const MAX_SIGNATURE_LEN: usize = 255;
pub const MAX_ARRAY_DEPTH: usize = 32;
pub const MAX_STRUCT_DEPTH: usize = 32;

/// Basic (non-container) type codes; the only legal dict entry keys.
pub fn is_basic_type(code: u8) -> bool {
    matches!(
        code,
        b'y' | b'b' | b'n' | b'q' | b'i' | b'u' | b'x' | b't' | b'd' | b's' | b'o' | b'g'
    )
}

/// Length in bytes of the complete type at the start of `sig`.
fn complete_type_len(sig: &[u8], array_depth: usize, struct_depth: usize) -> Result<usize> {
    match sig.first() {
        None => Err(Error::signature("unexpected end of signature")),
        Some(b'a') => {
            if array_depth >= MAX_ARRAY_DEPTH {
                return Err(Error::signature("array nesting too deep"));
            }
            if sig.get(1) == Some(&b'{') {
                return dict_entry_len(&sig[1..], array_depth + 1, struct_depth).map(|len| len + 1);
            }
            complete_type_len(&sig[1..], array_depth + 1, struct_depth).map(|len| len + 1)
        }
        Some(b'(') => {
            if struct_depth >= MAX_STRUCT_DEPTH {
                return Err(Error::signature("struct nesting too deep"));
            }
            let mut pos = 1;
            loop {
                match sig.get(pos) {
                    Some(b')') if pos == 1 => return Err(Error::signature("empty struct")),
                    Some(b')') => return Ok(pos + 1),
                    None => return Err(Error::signature("unterminated struct")),
                    Some(_) => pos += complete_type_len(&sig[pos..], array_depth, struct_depth + 1)?,
                }
            }
        }
        Some(b'{') => Err(Error::signature("dict entry outside of an array")),
        Some(&code) if is_basic_type(code) || code == b'v' => Ok(1),
        Some(&code) => Err(Error::signature(format!(
            "unknown type code '{}'",
            char::from(code)
        ))),
    }
}

/// `sig` starts at the `{`.
fn dict_entry_len(sig: &[u8], array_depth: usize, struct_depth: usize) -> Result<usize> {
    if struct_depth >= MAX_STRUCT_DEPTH {
        return Err(Error::signature("struct nesting too deep"));
    }
    match sig.get(1) {
        Some(&key) if is_basic_type(key) => {}
        Some(&key) => {
            return Err(Error::signature(format!(
                "dict entry key '{}' is not a basic type",
                char::from(key)
            )))
        }
        None => return Err(Error::signature("unterminated dict entry")),
    }
    let value_len = complete_type_len(&sig[2..], array_depth, struct_depth + 1)?;
    match sig.get(2 + value_len) {
        Some(b'}') => Ok(value_len + 3),
        _ => Err(Error::signature("dict entry must hold exactly one key and one value")),
    }
}

fn check_length(sig: &str) -> Result<()> {
    if sig.len() > MAX_SIGNATURE_LEN {
        return Err(Error::signature(format!(
            "signature exceeds {} bytes",
            MAX_SIGNATURE_LEN
        )));
    }
    Ok(())
}

/// Split off the first complete type: `("a{sv}", "i")` for `"a{sv}i"`.
pub fn parse_complete_type(sig: &str) -> Result<(&str, &str)> {
    check_length(sig)?;
    let len = complete_type_len(sig.as_bytes(), 0, 0)?;
    Ok(sig.split_at(len))
}

/// Number of complete types in `sig`.
pub fn count_complete_types(sig: &str) -> Result<usize> {
    split(sig).map(|types| types.len())
}

/// Split `sig` into its complete types.
pub fn split(sig: &str) -> Result<Vec<&str>> {
    check_length(sig)?;
    let mut types = Vec::new();
    let mut rest = sig;
    while !rest.is_empty() {
        let (head, tail) = parse_complete_type(rest)?;
        types.push(head);
        rest = tail;
    }
    Ok(types)
}

/// True if `sig` is a well-formed sequence of complete types.
pub fn is_valid(sig: &str) -> bool {
    split(sig).is_ok()
}

/// True if `sig` is exactly one complete type.
pub fn is_complete_type(sig: &str) -> bool {
    matches!(parse_complete_type(sig), Ok((_, rest)) if rest.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_mixed() {
        assert_eq!(
            split("ia{sv}(ays)vas").unwrap(),
            vec!["i", "a{sv}", "(ays)", "v", "as"]
        );
        assert_eq!(split("").unwrap(), Vec::<&str>::new());
    }

    #[test]
    fn test_count_complete_types() {
        assert_eq!(count_complete_types("").unwrap(), 0);
        assert_eq!(count_complete_types("s").unwrap(), 1);
        assert_eq!(count_complete_types("(ii)(ii)").unwrap(), 2);
        assert_eq!(count_complete_types("aa{s(iv)}").unwrap(), 1);
    }

    #[test]
    fn test_parse_complete_type() {
        assert_eq!(parse_complete_type("a(is)x").unwrap(), ("a(is)", "x"));
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in ["(", "()", "{sv}", "a{vs}", "a{s}", "a{sii}", "a", "z", "(i"] {
            assert!(!is_valid(bad), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_depth_limits() {
        let deep_array = "a".repeat(MAX_ARRAY_DEPTH) + "i";
        assert!(is_valid(&deep_array));
        let too_deep = "a".repeat(MAX_ARRAY_DEPTH + 1) + "i";
        assert!(!is_valid(&too_deep));

        let too_long = "i".repeat(MAX_SIGNATURE_LEN + 1);
        assert!(matches!(split(&too_long), Err(Error::Signature(_))));
    }

    #[test]
    fn test_is_complete_type() {
        assert!(is_complete_type("a{sv}"));
        assert!(!is_complete_type("ii"));
        assert!(!is_complete_type(""));
    }
}

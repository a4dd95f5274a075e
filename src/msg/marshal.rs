//! Value marshalling between managed values and native tagged values.
//!
//! Conversion is driven by the signature on the way out and by the declared
//! managed type on the way in. Unsigned wire types share the bit pattern of the
//! same-width signed managed type. Every entry point refuses to run while a
//! managed exception is pending.

use super::arg::MsgArg;
use super::signature;
use super::variant::Variant;
use crate::managed::{Env, ManagedType, Method, Value, HANDLE_FIELD};
use crate::types::{Error, Result};

// =============================================================================
// Managed -> native
// =============================================================================

/// Convert one value described by exactly one complete type.
pub fn marshal(env: &Env, signature: &str, value: &Value) -> Result<MsgArg> {
    env.check()?;
    let (ty, rest) = signature::parse_complete_type(signature)?;
    if !rest.is_empty() {
        return Err(Error::signature(format!(
            "'{}' is not a single complete type",
            signature
        )));
    }
    marshal_complete(ty, value)
}

/// Convert an argument list into one struct holding one member per complete type.
pub fn marshal_args(env: &Env, signature: &str, values: &[Value]) -> Result<MsgArg> {
    env.check()?;
    let types = signature::split(signature)?;
    if types.len() != values.len() {
        return Err(Error::marshal(format!(
            "signature '{}' describes {} values, got {}",
            signature,
            types.len(),
            values.len()
        )));
    }
    let members = types
        .iter()
        .zip(values)
        .map(|(ty, value)| marshal_complete(ty, value))
        .collect::<Result<Vec<_>>>()?;
    Ok(MsgArg::Struct(members))
}

fn mismatch(sig: &str, value: &Value) -> Error {
    Error::marshal(format!("cannot marshal {} as '{}'", value.type_name(), sig))
}

fn marshal_complete(sig: &str, value: &Value) -> Result<MsgArg> {
    if let Value::Variant(variant) = value {
        if sig == "v" {
            return Ok(MsgArg::variant(variant.arg().clone()));
        }
        if variant.signature() == sig {
            return Ok(variant.arg().clone());
        }
        return Err(mismatch(sig, value));
    }

    let code = sig
        .as_bytes()
        .first()
        .copied()
        .ok_or_else(|| Error::signature("empty signature"))?;

    match (code, value) {
        (_, Value::Null) => Err(Error::marshal(format!("cannot marshal null as '{}'", sig))),
        (b'y', Value::Byte(v)) => Ok(MsgArg::Byte(*v as u8)),
        (b'b', Value::Boolean(v)) => Ok(MsgArg::Boolean(*v)),
        (b'n', Value::Short(v)) => Ok(MsgArg::Int16(*v)),
        (b'q', Value::Short(v)) => Ok(MsgArg::Uint16(*v as u16)),
        (b'i', Value::Int(v)) => Ok(MsgArg::Int32(*v)),
        (b'u', Value::Int(v)) => Ok(MsgArg::Uint32(*v as u32)),
        (b'x', Value::Long(v)) => Ok(MsgArg::Int64(*v)),
        (b't', Value::Long(v)) => Ok(MsgArg::Uint64(*v as u64)),
        (b'd', Value::Double(v)) => Ok(MsgArg::Double(*v)),
        (b's', Value::String(s)) => Ok(MsgArg::String(s.clone())),
        (b'o', Value::String(s)) => Ok(MsgArg::ObjectPath(s.clone())),
        (b'g', Value::String(s)) => {
            if !signature::is_valid(s) {
                return Err(Error::signature(format!("'{}' is not a valid signature", s)));
            }
            Ok(MsgArg::Signature(s.clone()))
        }
        (b'a', _) => marshal_array(&sig[1..], value),
        (b'(', Value::Struct(members)) => marshal_struct(sig, members),
        (b'(', Value::Object(obj)) => {
            // Declared fields, in declaration order, are the struct members.
            let members = obj
                .class()
                .fields()
                .iter()
                .filter(|name| name.as_str() != HANDLE_FIELD)
                .map(|name| obj.get_field(name).unwrap_or_default())
                .collect::<Vec<_>>();
            marshal_struct(sig, &members)
        }
        _ => Err(mismatch(sig, value)),
    }
}

fn marshal_struct(sig: &str, members: &[Value]) -> Result<MsgArg> {
    let inner = &sig[1..sig.len() - 1];
    let types = signature::split(inner)?;
    if types.len() != members.len() {
        return Err(Error::marshal(format!(
            "struct '{}' has {} members, got {}",
            sig,
            types.len(),
            members.len()
        )));
    }
    types
        .iter()
        .zip(members)
        .map(|(ty, value)| marshal_complete(ty, value))
        .collect::<Result<Vec<_>>>()
        .map(MsgArg::Struct)
}

fn marshal_array(elem: &str, value: &Value) -> Result<MsgArg> {
    let array_sig = || format!("a{}", elem);
    match (elem, value) {
        ("y", Value::ByteArray(v)) => Ok(MsgArg::ByteArray(v.iter().map(|b| *b as u8).collect())),
        // Managed booleans are one byte wide, wire booleans four: widen per element.
        ("b", Value::BooleanArray(v)) => Ok(MsgArg::BoolArray(
            v.iter().map(|b| u32::from(*b)).collect(),
        )),
        ("n", Value::ShortArray(v)) => Ok(MsgArg::Int16Array(v.clone())),
        ("q", Value::ShortArray(v)) => Ok(MsgArg::Uint16Array(v.iter().map(|e| *e as u16).collect())),
        ("i", Value::IntArray(v)) => Ok(MsgArg::Int32Array(v.clone())),
        ("u", Value::IntArray(v)) => Ok(MsgArg::Uint32Array(v.iter().map(|e| *e as u32).collect())),
        ("x", Value::LongArray(v)) => Ok(MsgArg::Int64Array(v.clone())),
        ("t", Value::LongArray(v)) => Ok(MsgArg::Uint64Array(v.iter().map(|e| *e as u64).collect())),
        ("d", Value::DoubleArray(v)) => Ok(MsgArg::DoubleArray(v.clone())),
        (_, Value::Map(entries)) if elem.starts_with('{') => {
            let (key_sig, value_sig) = signature::parse_complete_type(&elem[1..elem.len() - 1])?;
            let elements = entries
                .iter()
                .map(|(k, v)| {
                    Ok(MsgArg::dict_entry(
                        marshal_complete(key_sig, k)?,
                        marshal_complete(value_sig, v)?,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            MsgArg::array(elem, elements)
        }
        (_, Value::Array(items)) => {
            let elements = items
                .iter()
                .map(|item| marshal_complete(elem, item))
                .collect::<Result<Vec<_>>>()?;
            pack_elements(elem, elements)
        }
        _ => Err(mismatch(&array_sig(), value)),
    }
}

/// Collect a typed scalar array from individually converted elements.
macro_rules! pack_scalars {
    ($elements:expr, $variant:ident, $array:ident) => {
        $elements
            .into_iter()
            .map(|e| match e {
                MsgArg::$variant(v) => Ok(v),
                other => Err(Error::marshal(format!(
                    "element '{}' in array of '{}'",
                    other.signature(),
                    MsgArg::$variant(Default::default()).signature()
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(MsgArg::$array)
    };
}

fn pack_elements(elem: &str, elements: Vec<MsgArg>) -> Result<MsgArg> {
    match elem {
        "y" => pack_scalars!(elements, Byte, ByteArray),
        "b" => elements
            .into_iter()
            .map(|e| match e {
                MsgArg::Boolean(b) => Ok(u32::from(b)),
                other => Err(Error::marshal(format!(
                    "element '{}' in array of 'b'",
                    other.signature()
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(MsgArg::BoolArray),
        "n" => pack_scalars!(elements, Int16, Int16Array),
        "q" => pack_scalars!(elements, Uint16, Uint16Array),
        "i" => pack_scalars!(elements, Int32, Int32Array),
        "u" => pack_scalars!(elements, Uint32, Uint32Array),
        "x" => pack_scalars!(elements, Int64, Int64Array),
        "t" => pack_scalars!(elements, Uint64, Uint64Array),
        "d" => pack_scalars!(elements, Double, DoubleArray),
        _ => MsgArg::array(elem, elements),
    }
}

// =============================================================================
// Native -> managed
// =============================================================================

/// Convert one tagged value into `ty`.
pub fn unmarshal(env: &Env, arg: &MsgArg, ty: &ManagedType) -> Result<Value> {
    env.check()?;
    unmarshal_value(arg, ty)
}

/// Convert an incoming argument list into the arguments of `method`.
pub fn unmarshal_args(env: &Env, args: &[MsgArg], method: &Method) -> Result<Vec<Value>> {
    env.check()?;
    if args.len() != method.params().len() {
        return Err(Error::marshal(format!(
            "{} expects {} arguments, message carries {}",
            method.name(),
            method.params().len(),
            args.len()
        )));
    }
    args.iter()
        .zip(method.params())
        .map(|(arg, ty)| unmarshal_value(arg, ty))
        .collect()
}

/// Elements of a scalar array as individual tagged values.
fn explode(arg: &MsgArg) -> Option<Vec<MsgArg>> {
    Some(match arg {
        MsgArg::ByteArray(v) => v.iter().map(|e| MsgArg::Byte(*e)).collect(),
        MsgArg::BoolArray(v) => v.iter().map(|e| MsgArg::Boolean(*e != 0)).collect(),
        MsgArg::Int16Array(v) => v.iter().map(|e| MsgArg::Int16(*e)).collect(),
        MsgArg::Uint16Array(v) => v.iter().map(|e| MsgArg::Uint16(*e)).collect(),
        MsgArg::Int32Array(v) => v.iter().map(|e| MsgArg::Int32(*e)).collect(),
        MsgArg::Uint32Array(v) => v.iter().map(|e| MsgArg::Uint32(*e)).collect(),
        MsgArg::Int64Array(v) => v.iter().map(|e| MsgArg::Int64(*e)).collect(),
        MsgArg::Uint64Array(v) => v.iter().map(|e| MsgArg::Uint64(*e)).collect(),
        MsgArg::DoubleArray(v) => v.iter().map(|e| MsgArg::Double(*e)).collect(),
        _ => return None,
    })
}

fn unmarshal_value(arg: &MsgArg, ty: &ManagedType) -> Result<Value> {
    use ManagedType as T;

    let value = match (arg, ty) {
        (MsgArg::Variant(inner), T::Variant) => {
            Value::Variant(Box::new(Variant::from_arg((**inner).clone())))
        }
        (other, T::Variant) => Value::Variant(Box::new(Variant::from_arg(other.clone()))),
        (_, T::Object) => natural(arg)?,
        (MsgArg::Variant(inner), _) => unmarshal_value(inner, ty)?,

        (MsgArg::Byte(v), T::Byte) => Value::Byte(*v as i8),
        (MsgArg::Boolean(v), T::Boolean) => Value::Boolean(*v),
        (MsgArg::Int16(v), T::Short) => Value::Short(*v),
        (MsgArg::Uint16(v), T::Short) => Value::Short(*v as i16),
        (MsgArg::Int32(v), T::Int) => Value::Int(*v),
        (MsgArg::Uint32(v), T::Int) => Value::Int(*v as i32),
        (MsgArg::Int64(v), T::Long) => Value::Long(*v),
        (MsgArg::Uint64(v), T::Long) => Value::Long(*v as i64),
        (MsgArg::Double(v), T::Double) => Value::Double(*v),
        (MsgArg::String(s) | MsgArg::ObjectPath(s) | MsgArg::Signature(s), T::String) => {
            Value::String(s.clone())
        }

        (MsgArg::ByteArray(v), T::ByteArray) => Value::ByteArray(v.iter().map(|e| *e as i8).collect()),
        // Narrow per element: wire booleans are wider than managed ones.
        (MsgArg::BoolArray(v), T::BooleanArray) => {
            Value::BooleanArray(v.iter().map(|e| *e != 0).collect())
        }
        (MsgArg::Int16Array(v), T::ShortArray) => Value::ShortArray(v.clone()),
        (MsgArg::Uint16Array(v), T::ShortArray) => {
            Value::ShortArray(v.iter().map(|e| *e as i16).collect())
        }
        (MsgArg::Int32Array(v), T::IntArray) => Value::IntArray(v.clone()),
        (MsgArg::Uint32Array(v), T::IntArray) => Value::IntArray(v.iter().map(|e| *e as i32).collect()),
        (MsgArg::Int64Array(v), T::LongArray) => Value::LongArray(v.clone()),
        (MsgArg::Uint64Array(v), T::LongArray) => {
            Value::LongArray(v.iter().map(|e| *e as i64).collect())
        }
        (MsgArg::DoubleArray(v), T::DoubleArray) => Value::DoubleArray(v.clone()),

        (MsgArg::Array { elements, .. }, T::Array(elem)) => Value::Array(
            elements
                .iter()
                .map(|e| unmarshal_value(e, elem))
                .collect::<Result<Vec<_>>>()?,
        ),
        (MsgArg::Array { elements, .. }, T::Map(key_ty, value_ty)) => Value::Map(
            elements
                .iter()
                .map(|e| match e {
                    MsgArg::DictEntry(k, v) => {
                        Ok((unmarshal_value(k, key_ty)?, unmarshal_value(v, value_ty)?))
                    }
                    other => Err(Error::marshal(format!(
                        "expected dict entry, found '{}'",
                        other.signature()
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
        ),
        (scalar_array, T::Array(elem)) if explode(scalar_array).is_some() => Value::Array(
            explode(scalar_array)
                .unwrap_or_default()
                .iter()
                .map(|e| unmarshal_value(e, elem))
                .collect::<Result<Vec<_>>>()?,
        ),
        (MsgArg::Struct(members), T::Struct(types)) => {
            if members.len() != types.len() {
                return Err(Error::marshal(format!(
                    "struct '{}' has {} members, target expects {}",
                    arg.signature(),
                    members.len(),
                    types.len()
                )));
            }
            Value::Struct(
                members
                    .iter()
                    .zip(types)
                    .map(|(m, t)| unmarshal_value(m, t))
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        (MsgArg::DictEntry(k, v), T::Struct(types)) if types.len() == 2 => {
            Value::Struct(vec![unmarshal_value(k, &types[0])?, unmarshal_value(v, &types[1])?])
        }
        _ => {
            return Err(Error::marshal(format!(
                "cannot unmarshal '{}' as {:?}",
                arg.signature(),
                ty
            )))
        }
    };
    Ok(value)
}

/// Natural managed representation of `arg`.
fn natural(arg: &MsgArg) -> Result<Value> {
    use ManagedType as T;

    let ty = match arg {
        MsgArg::Byte(_) => T::Byte,
        MsgArg::Boolean(_) => T::Boolean,
        MsgArg::Int16(_) | MsgArg::Uint16(_) => T::Short,
        MsgArg::Int32(_) | MsgArg::Uint32(_) => T::Int,
        MsgArg::Int64(_) | MsgArg::Uint64(_) => T::Long,
        MsgArg::Double(_) => T::Double,
        MsgArg::String(_) | MsgArg::ObjectPath(_) | MsgArg::Signature(_) => T::String,
        MsgArg::ByteArray(_) => T::ByteArray,
        MsgArg::BoolArray(_) => T::BooleanArray,
        MsgArg::Int16Array(_) | MsgArg::Uint16Array(_) => T::ShortArray,
        MsgArg::Int32Array(_) | MsgArg::Uint32Array(_) => T::IntArray,
        MsgArg::Int64Array(_) | MsgArg::Uint64Array(_) => T::LongArray,
        MsgArg::DoubleArray(_) => T::DoubleArray,
        MsgArg::Array { elem_sig, .. } if elem_sig.starts_with('{') => {
            T::Map(Box::new(T::Object), Box::new(T::Object))
        }
        MsgArg::Array { .. } => T::Array(Box::new(T::Object)),
        MsgArg::Struct(members) => T::Struct(vec![T::Object; members.len()]),
        MsgArg::DictEntry(..) => T::Struct(vec![T::Object, T::Object]),
        MsgArg::Variant(_) => T::Variant,
    };
    unmarshal_value(arg, &ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, Object, ScopedEnv, Throwable, Vm};
    use pretty_assertions::assert_eq;

    fn round_trip(env: &Env, sig: &str, value: Value, ty: ManagedType) {
        let arg = marshal(env, sig, &value).unwrap();
        assert_eq!(arg.signature(), sig);
        assert_eq!(unmarshal(env, &arg, &ty).unwrap(), value);
    }

    #[test]
    fn test_unsigned_types_keep_bit_pattern() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        assert_eq!(marshal(&env, "q", &Value::Short(-1)).unwrap(), MsgArg::Uint16(u16::MAX));
        assert_eq!(marshal(&env, "u", &Value::Int(-1)).unwrap(), MsgArg::Uint32(u32::MAX));
        assert_eq!(marshal(&env, "t", &Value::Long(-1)).unwrap(), MsgArg::Uint64(u64::MAX));
        assert_eq!(marshal(&env, "y", &Value::Byte(-1)).unwrap(), MsgArg::Byte(0xff));
        round_trip(&env, "t", Value::Long(i64::MIN), ManagedType::Long);
    }

    #[test]
    fn test_dictionary_round_trip() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let map = Value::Map(vec![
            (Value::from("a"), Value::Int(1)),
            (Value::from("b"), Value::Int(2)),
        ]);
        round_trip(
            &env,
            "a{si}",
            map,
            ManagedType::Map(Box::new(ManagedType::String), Box::new(ManagedType::Int)),
        );
    }

    #[test]
    fn test_nested_struct_round_trip() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let value = Value::Struct(vec![
            Value::Int(7),
            Value::Array(vec![Value::from("x"), Value::from("")]),
            Value::Struct(vec![Value::Boolean(true), Value::Double(0.5)]),
        ]);
        let ty = ManagedType::Struct(vec![
            ManagedType::Int,
            ManagedType::Array(Box::new(ManagedType::String)),
            ManagedType::Struct(vec![ManagedType::Boolean, ManagedType::Double]),
        ]);
        round_trip(&env, "(ias(bd))", value, ty);
    }

    #[test]
    fn test_boxed_scalar_list_packs_into_typed_array() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let arg = marshal(&env, "ai", &Value::Array(vec![Value::Int(1), Value::Int(2)])).unwrap();
        assert_eq!(arg, MsgArg::Int32Array(vec![1, 2]));
        let back = unmarshal(&env, &arg, &ManagedType::Array(Box::new(ManagedType::Int))).unwrap();
        assert_eq!(back, Value::Array(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_object_fields_become_struct_members() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let class = Class::builder("Pair").field(HANDLE_FIELD).field("a").field("b").build();
        let obj = Object::new(&class);
        obj.set_field("a", Value::from("left"));
        obj.set_field("b", Value::Int(9));

        let arg = marshal(&env, "(si)", &Value::Object(obj)).unwrap();
        assert_eq!(
            arg,
            MsgArg::Struct(vec![MsgArg::String("left".into()), MsgArg::Int32(9)])
        );
    }

    #[test]
    fn test_variant_wrap_and_unwrap() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let variant = Variant::new(&env, "s", &Value::from("inside")).unwrap();
        let arg = marshal(&env, "v", &Value::Variant(Box::new(variant.clone()))).unwrap();
        assert_eq!(arg, MsgArg::variant(MsgArg::String("inside".into())));

        // Unwrapped when the target is not a variant.
        assert_eq!(
            unmarshal(&env, &arg, &ManagedType::String).unwrap(),
            Value::from("inside")
        );
        assert_eq!(
            unmarshal(&env, &arg, &ManagedType::Variant).unwrap(),
            Value::Variant(Box::new(variant))
        );
    }

    #[test]
    fn test_args_count_must_match_signature() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        assert!(marshal_args(&env, "is", &[Value::Int(1)]).is_err());
        let tuple = marshal_args(&env, "is", &[Value::Int(1), Value::from("x")]).unwrap();
        assert_eq!(tuple.signature(), "(is)");
    }

    #[test]
    fn test_null_and_mismatch_fail() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        assert!(matches!(marshal(&env, "s", &Value::Null), Err(Error::Marshal(_))));
        assert!(matches!(marshal(&env, "i", &Value::from("1")), Err(Error::Marshal(_))));
        assert!(matches!(marshal(&env, "ii", &Value::Int(1)), Err(Error::Signature(_))));
        assert!(matches!(
            marshal(&env, "g", &Value::from("a{")),
            Err(Error::Signature(_))
        ));
        assert!(unmarshal(&env, &MsgArg::Int32(1), &ManagedType::String).is_err());
    }

    #[test]
    fn test_pending_exception_aborts_conversion() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        env.throw(Throwable::new("Boom", "pending"));
        assert!(matches!(
            marshal(&env, "i", &Value::Int(1)),
            Err(Error::ExceptionPending(_))
        ));
        assert!(matches!(
            unmarshal(&env, &MsgArg::Int32(1), &ManagedType::Int),
            Err(Error::ExceptionPending(_))
        ));
        env.exception_clear();
    }

    #[test]
    fn test_unmarshal_args_uses_method_parameter_types() {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let method = Method::new(
            "Add",
            vec![ManagedType::Int, ManagedType::Short],
            ManagedType::Int,
            |_env, _this, _args| Ok(Value::Null),
        );
        let args = [MsgArg::Uint32(5), MsgArg::Uint16(6)];
        assert_eq!(
            unmarshal_args(&env, &args, &method).unwrap(),
            vec![Value::Int(5), Value::Short(6)]
        );
        assert!(unmarshal_args(&env, &args[..1], &method).is_err());
    }
}

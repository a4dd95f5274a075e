//! Marshalling properties over generated values.

use bus_bridge::managed::{ManagedType, ScopedEnv, Value, Vm};
use bus_bridge::msg::{marshal, signature, unmarshal, MsgArg};
use proptest::prelude::*;

fn round_trip(sig: &str, value: Value, ty: ManagedType) -> Value {
    let vm = Vm::new();
    let env = ScopedEnv::new(&vm);
    let arg = marshal(&env, sig, &value).unwrap();
    assert_eq!(arg.signature(), sig);
    unmarshal(&env, &arg, &ty).unwrap()
}

/// One complete type: a basic code, or a container built from basic codes.
fn complete_type() -> impl Strategy<Value = String> {
    let basic = proptest::sample::select(vec!['y', 'b', 'n', 'q', 'i', 'u', 'x', 't', 'd', 's', 'o', 'g']);
    prop_oneof![
        basic.clone().prop_map(|c| c.to_string()),
        basic.clone().prop_map(|c| format!("a{}", c)),
        (basic.clone(), basic.clone()).prop_map(|(k, v)| format!("a{{{}{}}}", k, v)),
        proptest::collection::vec(basic, 1..4).prop_map(|codes| format!("({})", codes.into_iter().collect::<String>())),
        Just("v".to_string()),
    ]
}

proptest! {
    #[test]
    fn test_scalars_survive(b in any::<bool>(), y in any::<i8>(), n in any::<i16>(), i in any::<i32>(), x in any::<i64>()) {
        prop_assert_eq!(round_trip("b", Value::Boolean(b), ManagedType::Boolean), Value::Boolean(b));
        prop_assert_eq!(round_trip("y", Value::Byte(y), ManagedType::Byte), Value::Byte(y));
        prop_assert_eq!(round_trip("n", Value::Short(n), ManagedType::Short), Value::Short(n));
        prop_assert_eq!(round_trip("q", Value::Short(n), ManagedType::Short), Value::Short(n));
        prop_assert_eq!(round_trip("i", Value::Int(i), ManagedType::Int), Value::Int(i));
        prop_assert_eq!(round_trip("u", Value::Int(i), ManagedType::Int), Value::Int(i));
        prop_assert_eq!(round_trip("x", Value::Long(x), ManagedType::Long), Value::Long(x));
        prop_assert_eq!(round_trip("t", Value::Long(x), ManagedType::Long), Value::Long(x));
    }

    #[test]
    fn test_finite_doubles_survive(d in proptest::num::f64::NORMAL | proptest::num::f64::ZERO) {
        prop_assert_eq!(round_trip("d", Value::Double(d), ManagedType::Double), Value::Double(d));
    }

    #[test]
    fn test_strings_survive(s in ".*") {
        prop_assert_eq!(round_trip("s", Value::String(s.clone()), ManagedType::String), Value::String(s));
    }

    #[test]
    fn test_scalar_arrays_survive(
        y in proptest::collection::vec(any::<i8>(), 0..32),
        n in proptest::collection::vec(any::<i16>(), 0..32),
        i in proptest::collection::vec(any::<i32>(), 0..32),
        x in proptest::collection::vec(any::<i64>(), 0..32),
    ) {
        prop_assert_eq!(round_trip("ay", Value::ByteArray(y.clone()), ManagedType::ByteArray), Value::ByteArray(y));
        prop_assert_eq!(round_trip("an", Value::ShortArray(n.clone()), ManagedType::ShortArray), Value::ShortArray(n.clone()));
        prop_assert_eq!(round_trip("aq", Value::ShortArray(n.clone()), ManagedType::ShortArray), Value::ShortArray(n));
        prop_assert_eq!(round_trip("ai", Value::IntArray(i.clone()), ManagedType::IntArray), Value::IntArray(i.clone()));
        prop_assert_eq!(round_trip("au", Value::IntArray(i.clone()), ManagedType::IntArray), Value::IntArray(i));
        prop_assert_eq!(round_trip("ax", Value::LongArray(x.clone()), ManagedType::LongArray), Value::LongArray(x.clone()));
        prop_assert_eq!(round_trip("at", Value::LongArray(x.clone()), ManagedType::LongArray), Value::LongArray(x));
    }

    #[test]
    fn test_double_arrays_survive(
        d in proptest::collection::vec(proptest::num::f64::NORMAL | proptest::num::f64::ZERO, 0..32),
    ) {
        prop_assert_eq!(round_trip("ad", Value::DoubleArray(d.clone()), ManagedType::DoubleArray), Value::DoubleArray(d));
    }

    #[test]
    fn test_object_paths_survive(path in "/|(/[A-Za-z0-9_]{1,8}){1,6}") {
        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let arg = marshal(&env, "o", &Value::String(path.clone())).unwrap();
        prop_assert_eq!(&arg, &MsgArg::ObjectPath(path.clone()));
        prop_assert_eq!(unmarshal(&env, &arg, &ManagedType::String).unwrap(), Value::String(path));
    }

    #[test]
    fn test_valid_signatures_survive(types in proptest::collection::vec(complete_type(), 0..6)) {
        let sig = types.concat();
        prop_assert!(signature::is_valid(&sig));
        prop_assert_eq!(round_trip("g", Value::String(sig.clone()), ManagedType::String), Value::String(sig.clone()));

        let vm = Vm::new();
        let env = ScopedEnv::new(&vm);
        let unbalanced = format!("({}", sig);
        prop_assert!(marshal(&env, "g", &Value::String(unbalanced)).is_err());
    }

    #[test]
    fn test_string_maps_survive(entries in proptest::collection::btree_map("[a-z]{1,8}", any::<i32>(), 0..8)) {
        let value = Value::Map(
            entries
                .iter()
                .map(|(k, v)| (Value::String(k.clone()), Value::Int(*v)))
                .collect(),
        );
        let ty = ManagedType::Map(Box::new(ManagedType::String), Box::new(ManagedType::Int));
        prop_assert_eq!(round_trip("a{si}", value.clone(), ty), value);
    }
}

#[test]
fn test_bool_arrays_widen_per_element() {
    let vm = Vm::new();
    let env = ScopedEnv::new(&vm);
    for len in [0usize, 1, 17] {
        let bools: Vec<bool> = (0..len).map(|i| i % 3 == 0).collect();
        let arg = marshal(&env, "ab", &Value::BooleanArray(bools.clone())).unwrap();
        let MsgArg::BoolArray(wide) = &arg else {
            panic!("expected a bool array, got {:?}", arg);
        };
        assert_eq!(wide.len(), len);
        assert!(wide.iter().all(|w| *w <= 1));
        assert_eq!(
            unmarshal(&env, &arg, &ManagedType::BooleanArray).unwrap(),
            Value::BooleanArray(bools)
        );
    }
}

//! Key-store listener adapter: managed persistence for the native key store.

use super::{deliver, required, Binding, RefPolicy};
use crate::managed::{Env, MethodRef, ObjectRef, Value, Vm};
use crate::native::{KeyStore, KeyStoreListener};
use crate::types::{Error, NativeStatus, Result};
use std::sync::Arc;

#[derive(Debug)]
pub struct KeyStoreListenerAdapter {
    vm: Arc<Vm>,
    binding: Binding,
    get_keys: MethodRef,
    get_password: MethodRef,
    put_keys: MethodRef,
}

impl KeyStoreListenerAdapter {
    pub fn new(env: &Env, listener: &ObjectRef) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            vm: Arc::clone(env.vm()),
            binding: Binding::new(listener, RefPolicy::Weak),
            get_keys: required(env, listener, "getKeys")?,
            get_password: required(env, listener, "getPassword")?,
            put_keys: required(env, listener, "putKeys")?,
        }))
    }

    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

fn key_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::ByteArray(bytes) => Ok(bytes.into_iter().map(|b| b as u8).collect()),
        other => Err(Error::marshal(format!("getKeys returned {}", other.type_name()))),
    }
}

/// UTF-8 encoding of a managed char password. The char buffer is zeroed.
fn password_bytes(value: Value) -> Result<Vec<u8>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::CharArray(mut chars) => {
            let encoded = String::from_utf16_lossy(&chars).into_bytes();
            chars.fill(0);
            Ok(encoded)
        }
        other => Err(Error::marshal(format!("getPassword returned {}", other.type_name()))),
    }
}

/// Hand the store its keys, then zero both buffers.
fn put_scrubbed(store: &mut dyn KeyStore, keys: &mut [u8], password: &mut [u8]) -> NativeStatus {
    let status = store.put_keys(keys, password);
    keys.fill(0);
    password.fill(0);
    status
}

impl KeyStoreListener for KeyStoreListenerAdapter {
    fn load_request(&self, store: &mut dyn KeyStore) -> NativeStatus {
        deliver(&self.vm, &self.binding, "loadRequest", NativeStatus::FAIL, |env, listener| {
            let mut keys = key_bytes(env.call_method(listener, &self.get_keys, &[])?)?;
            let mut password = password_bytes(env.call_method(listener, &self.get_password, &[])?)?;
            Ok(put_scrubbed(store, &mut keys, &mut password))
        })
    }

    fn store_request(&self, store: &mut dyn KeyStore) -> NativeStatus {
        let keys = match store.get_keys() {
            Ok(keys) => keys,
            Err(status) => return status,
        };
        deliver(&self.vm, &self.binding, "storeRequest", NativeStatus::FAIL, |env, listener| {
            let arg = Value::ByteArray(keys.iter().map(|b| *b as i8).collect());
            env.call_method(listener, &self.put_keys, &[arg])?;
            Ok(NativeStatus::OK)
        })
    }
}

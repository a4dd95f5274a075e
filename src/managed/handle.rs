//! Handle registry.
//!
//! A managed object reaches its native counterpart through an opaque [`Handle`]
//! stored in its `handle` field. The counterpart itself lives in the [`HandleTable`]
//! owned by the VM. A zero handle means "no native counterpart".

use super::object::{ObjectRef, Value};
use crate::types::{Error, Result};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Conventional name of the field holding the handle.
pub const HANDLE_FIELD: &str = "handle";

/// Opaque reference to a native counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u64);

impl Handle {
    pub const NULL: Handle = Handle(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

type Entry = Arc<dyn Any + Send + Sync>;

/// Native heap of counterparts addressed by handle.
pub struct HandleTable {
    next: AtomicU64,
    entries: RwLock<HashMap<u64, Entry>>,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store a counterpart and return its fresh handle.
    pub fn insert<T: Any + Send + Sync>(&self, value: Arc<T>) -> Handle {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, value);
        Handle(id)
    }

    /// Typed lookup. `None` for a null handle, an unknown handle or a type mismatch.
    pub fn get<T: Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        if handle.is_null() {
            return None;
        }
        let entry = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&handle.0)
            .cloned()?;
        entry.downcast::<T>().ok()
    }

    /// Remove a counterpart, returning the table's reference to it.
    pub fn remove(&self, handle: Handle) -> Option<Entry> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleTable")
            .field("entries", &self.len())
            .finish()
    }
}

/// Read the handle stored on `obj`.
///
/// A class without a handle field yields [`Handle::NULL`].
pub fn get_handle(obj: Option<&ObjectRef>) -> Result<Handle> {
    let obj = obj.ok_or_else(|| Error::null_reference("get_handle on null object"))?;
    match obj.get_field(HANDLE_FIELD) {
        Some(Value::Long(raw)) => Ok(Handle(raw as u64)),
        _ => Ok(Handle::NULL),
    }
}

/// Write the handle stored on `obj`. A class without a handle field is left untouched.
pub fn set_handle(obj: Option<&ObjectRef>, handle: Handle) -> Result<()> {
    let obj = obj.ok_or_else(|| Error::null_reference("set_handle on null object"))?;
    obj.set_field(HANDLE_FIELD, Value::Long(handle.0 as i64));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::managed::{Class, Object};

    #[test]
    fn test_handle_round_trip() {
        let class = Class::builder("Holder").field(HANDLE_FIELD).build();
        let obj = Object::new(&class);
        assert_eq!(get_handle(Some(&obj)).unwrap(), Handle::NULL);

        let table = HandleTable::new();
        let handle = table.insert(Arc::new(7u32));
        set_handle(Some(&obj), handle).unwrap();

        let read = get_handle(Some(&obj)).unwrap();
        assert_eq!(read, handle);
        assert_eq!(*table.get::<u32>(read).unwrap(), 7);
    }

    #[test]
    fn test_missing_field_is_tolerated() {
        let class = Class::builder("Plain").build();
        let obj = Object::new(&class);
        set_handle(Some(&obj), Handle(5)).unwrap();
        assert_eq!(get_handle(Some(&obj)).unwrap(), Handle::NULL);
    }

    #[test]
    fn test_null_object_is_null_reference() {
        assert!(matches!(get_handle(None), Err(Error::NullReference(_))));
        assert!(matches!(set_handle(None, Handle::NULL), Err(Error::NullReference(_))));
    }

    #[test]
    fn test_typed_lookup_rejects_wrong_type() {
        let table = HandleTable::new();
        let handle = table.insert(Arc::new(String::from("native")));
        assert!(table.get::<u32>(handle).is_none());
        assert!(table.get::<String>(Handle::NULL).is_none());

        assert!(table.remove(handle).is_some());
        assert!(table.is_empty());
    }
}

//! Scoped transient references.

use super::env::Env;
use super::object::ObjectRef;
use std::fmt;

/// A transient managed reference released when the scope ends.
///
/// [`LocalRef::reassign`] releases the previous referent first;
/// [`LocalRef::move_out`] hands the reference to the caller and suppresses the
/// release.
pub struct LocalRef<'env> {
    env: &'env Env,
    obj: Option<ObjectRef>,
}

impl<'env> LocalRef<'env> {
    pub(crate) fn new(env: &'env Env, obj: ObjectRef) -> Self {
        env.vm().acquire_local();
        Self {
            env,
            obj: Some(obj),
        }
    }

    pub fn get(&self) -> Option<&ObjectRef> {
        self.obj.as_ref()
    }

    pub fn reassign(&mut self, obj: ObjectRef) {
        self.release();
        self.env.vm().acquire_local();
        self.obj = Some(obj);
    }

    pub fn move_out(mut self) -> Option<ObjectRef> {
        let obj = self.obj.take();
        if obj.is_some() {
            self.env.vm().release_local();
        }
        obj
    }

    fn release(&mut self) {
        if self.obj.take().is_some() {
            self.env.vm().release_local();
        }
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LocalRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LocalRef").field(&self.obj).finish()
    }
}

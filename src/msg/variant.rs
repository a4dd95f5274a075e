//! Managed-side variant: a value paired with the native representation it was
//! converted to.

use super::arg::MsgArg;
use super::marshal;
use crate::managed::{Env, ManagedType, Value};
use crate::types::Result;

/// A boxed value of any signature.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    arg: MsgArg,
}

impl Variant {
    /// Convert `value` now, according to `signature`.
    pub fn new(env: &Env, signature: &str, value: &Value) -> Result<Self> {
        Ok(Self {
            arg: marshal::marshal(env, signature, value)?,
        })
    }

    /// Wrap an already converted native value.
    pub fn from_arg(arg: MsgArg) -> Self {
        Self { arg }
    }

    pub fn signature(&self) -> String {
        self.arg.signature()
    }

    pub fn arg(&self) -> &MsgArg {
        &self.arg
    }

    pub fn into_arg(self) -> MsgArg {
        self.arg
    }

    /// Read the boxed value as `ty`.
    pub fn get(&self, env: &Env, ty: &ManagedType) -> Result<Value> {
        marshal::unmarshal(env, &self.arg, ty)
    }
}

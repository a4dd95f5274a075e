//! Managed object model: classes, reflectively resolvable methods, objects and values.
//!
//! Objects are shared through [`ObjectRef`] (`Arc<Object>`); a weak reference is a
//! `Weak<Object>`. An object is collected once no strong reference remains.

use super::env::Env;
use crate::msg::Variant;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Strong managed reference.
pub type ObjectRef = Arc<Object>;

/// Weak managed reference.
pub type WeakObjectRef = Weak<Object>;

/// Resolved method; the cacheable capability used for every later invocation.
pub type MethodRef = Arc<Method>;

/// Method implementation.
pub type MethodBody =
    Arc<dyn Fn(&Env, &ObjectRef, &[Value]) -> Result<Value, Throwable> + Send + Sync>;

// =============================================================================
// Throwable
// =============================================================================

/// A managed exception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    pub class: String,
    pub message: String,
}

impl Throwable {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

// =============================================================================
// Types and values
// =============================================================================

/// Declared managed type, used as the target of unmarshalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagedType {
    Void,
    Boolean,
    Byte,
    Short,
    Int,
    Long,
    Double,
    String,
    BooleanArray,
    ByteArray,
    ShortArray,
    IntArray,
    LongArray,
    DoubleArray,
    CharArray,
    /// Object array or list with a uniform element type.
    Array(Box<ManagedType>),
    Map(Box<ManagedType>, Box<ManagedType>),
    /// Ordered, positional members.
    Struct(Vec<ManagedType>),
    Variant,
    /// Any object; conversion picks the natural representation.
    Object,
}

/// Dynamically-typed managed value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Double(f64),
    String(String),
    BooleanArray(Vec<bool>),
    ByteArray(Vec<i8>),
    ShortArray(Vec<i16>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
    DoubleArray(Vec<f64>),
    CharArray(Vec<u16>),
    Array(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(Vec<Value>),
    Variant(Box<Variant>),
    Object(ObjectRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Short type name for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Double(_) => "double",
            Value::String(_) => "String",
            Value::BooleanArray(_) => "boolean[]",
            Value::ByteArray(_) => "byte[]",
            Value::ShortArray(_) => "short[]",
            Value::IntArray(_) => "int[]",
            Value::LongArray(_) => "long[]",
            Value::DoubleArray(_) => "double[]",
            Value::CharArray(_) => "char[]",
            Value::Array(_) => "Object[]",
            Value::Map(_) => "Map",
            Value::Struct(_) => "struct",
            Value::Variant(_) => "Variant",
            Value::Object(_) => "Object",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Option<&str>> for Value {
    fn from(s: Option<&str>) -> Self {
        s.map_or(Value::Null, Value::from)
    }
}

// =============================================================================
// Methods and classes
// =============================================================================

/// A reflectively invocable method.
pub struct Method {
    name: String,
    params: Vec<ManagedType>,
    ret: ManagedType,
    body: MethodBody,
}

impl Method {
    pub fn new<F>(name: impl Into<String>, params: Vec<ManagedType>, ret: ManagedType, body: F) -> Self
    where
        F: Fn(&Env, &ObjectRef, &[Value]) -> Result<Value, Throwable> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            params,
            ret,
            body: Arc::new(body),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[ManagedType] {
        &self.params
    }

    pub fn return_type(&self) -> &ManagedType {
        &self.ret
    }

    pub(crate) fn body(&self) -> &MethodBody {
        &self.body
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("ret", &self.ret)
            .finish_non_exhaustive()
    }
}

/// A run-time class: declared fields plus a method table.
#[derive(Debug)]
pub struct Class {
    name: String,
    fields: Vec<String>,
    methods: HashMap<String, MethodRef>,
}

impl Class {
    pub fn builder(name: impl Into<String>) -> ClassBuilder {
        ClassBuilder {
            name: name.into(),
            fields: Vec::new(),
            methods: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f == name)
    }

    /// Look up a method by name.
    pub fn method(&self, name: &str) -> Option<&MethodRef> {
        self.methods.get(name)
    }
}

/// Builder for [`Class`].
#[derive(Debug)]
pub struct ClassBuilder {
    name: String,
    fields: Vec<String>,
    methods: HashMap<String, MethodRef>,
}

impl ClassBuilder {
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn method<F>(
        mut self,
        name: impl Into<String>,
        params: Vec<ManagedType>,
        ret: ManagedType,
        body: F,
    ) -> Self
    where
        F: Fn(&Env, &ObjectRef, &[Value]) -> Result<Value, Throwable> + Send + Sync + 'static,
    {
        let method = Method::new(name, params, ret, body);
        self.methods.insert(method.name.clone(), Arc::new(method));
        self
    }

    pub fn build(self) -> Arc<Class> {
        Arc::new(Class {
            name: self.name,
            fields: self.fields,
            methods: self.methods,
        })
    }
}

// =============================================================================
// Objects
// =============================================================================

/// A managed object instance. Identity is pointer identity.
pub struct Object {
    class: Arc<Class>,
    fields: Mutex<HashMap<String, Value>>,
}

impl Object {
    /// Instantiate a class with every declared field set to null.
    pub fn new(class: &Arc<Class>) -> ObjectRef {
        let fields = class
            .fields
            .iter()
            .map(|name| (name.clone(), Value::Null))
            .collect();
        Arc::new(Self {
            class: Arc::clone(class),
            fields: Mutex::new(fields),
        })
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Read a declared field; `None` if the class does not declare it.
    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Write a declared field. Returns false if the class does not declare it.
    pub fn set_field(&self, name: &str, value: Value) -> bool {
        let mut fields = self.fields.lock().unwrap_or_else(PoisonError::into_inner);
        match fields.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:p}", self.class.name, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_class() -> Arc<Class> {
        Class::builder("Point")
            .field("x")
            .field("y")
            .method("norm", vec![], ManagedType::Int, |_env, this, _args| {
                let x = this.get_field("x").and_then(|v| v.as_int()).unwrap_or(0);
                let y = this.get_field("y").and_then(|v| v.as_int()).unwrap_or(0);
                Ok(Value::Int(x.abs() + y.abs()))
            })
            .build()
    }

    #[test]
    fn test_new_object_has_null_fields() {
        let obj = Object::new(&point_class());
        assert_eq!(obj.get_field("x"), Some(Value::Null));
        assert_eq!(obj.get_field("z"), None);
    }

    #[test]
    fn test_set_undeclared_field_is_rejected() {
        let obj = Object::new(&point_class());
        assert!(obj.set_field("x", Value::Int(3)));
        assert!(!obj.set_field("z", Value::Int(3)));
        assert_eq!(obj.get_field("x"), Some(Value::Int(3)));
    }

    #[test]
    fn test_identity_equality() {
        let class = point_class();
        let a = Object::new(&class);
        let b = Object::new(&class);
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
    }

    #[test]
    fn test_class_method_lookup() {
        let class = point_class();
        assert_eq!(class.method("norm").unwrap().return_type(), &ManagedType::Int);
        assert!(class.method("missing").is_none());
        assert_eq!(class.fields(), ["x".to_string(), "y".to_string()]);
    }
}

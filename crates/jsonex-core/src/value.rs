use crate::binding::Binding;
use crate::copy;
use crate::error::{EvalError, EvalResult};
use serde_json::{Map, Number, Value as Json};
use std::cell::RefCell;
use std::fmt;
use std::path::Path;
use std::rc::{Rc, Weak};

/// Compiled document value.
///
/// Scalars are inline or cheaply shared. Containers are shared, mutable
/// handles: cloning a `Value::Object` clones the handle, not the object, so
/// the scope, the cache and every lazy binding observe the same data.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
}

/// One entry of a compiled container.
///
/// `Lazy` slots recompute on every read; copying a container copies the slot,
/// never its current value.
#[derive(Clone)]
pub enum Slot {
    Value(Value),
    Lazy(Rc<Binding>),
}

impl Slot {
    pub fn resolve(&self) -> EvalResult {
        match self {
            Slot::Value(v) => Ok(v.clone()),
            Slot::Lazy(binding) => binding.evaluate(),
        }
    }

    #[inline]
    pub fn is_lazy(&self) -> bool {
        matches!(self, Slot::Lazy(_))
    }
}

impl From<Value> for Slot {
    fn from(v: Value) -> Self {
        Slot::Value(v)
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Slot::Lazy(binding) => f.debug_tuple("Lazy").field(&binding.source()).finish(),
        }
    }
}

#[derive(Default)]
struct Object {
    entries: Vec<(Rc<str>, Slot)>,
    origin: Option<Rc<Path>>,
}

impl Object {
    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k.as_ref() == key)
    }
}

/// Shared handle to a compiled mapping. Keys keep insertion order.
#[derive(Clone, Default)]
pub struct ObjectRef(Rc<RefCell<Object>>);

/// Non-owning handle used by lazy slots to point back at their container.
#[derive(Clone, Default)]
pub struct WeakObjectRef(Weak<RefCell<Object>>);

impl WeakObjectRef {
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }
}

impl ObjectRef {
    pub fn new() -> Self {
        Self::default()
    }

    /// File identity of the document this object is the compiled root of.
    pub fn origin(&self) -> Option<Rc<Path>> {
        self.0.borrow().origin.clone()
    }

    pub(crate) fn set_origin(&self, origin: &Path) {
        self.0.borrow_mut().origin = Some(Rc::from(origin));
    }

    pub fn len(&self) -> usize {
        self.0.borrow().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().position(key).is_some()
    }

    pub fn keys(&self) -> Vec<Rc<str>> {
        self.0.borrow().entries.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn slot(&self, key: &str) -> Option<Slot> {
        let inner = self.0.borrow();
        inner.position(key).map(|i| inner.entries[i].1.clone())
    }

    /// Snapshot of all entries; later mutation of the object does not affect it.
    pub fn slots(&self) -> Vec<(Rc<str>, Slot)> {
        self.0.borrow().entries.clone()
    }

    /// Read a field, evaluating it when the slot is lazy.
    pub fn get(&self, key: &str) -> Result<Option<Value>, EvalError> {
        // The borrow must end before a lazy slot runs: it may read this object.
        let slot = self.slot(key);
        slot.map(|s| s.resolve()).transpose()
    }

    /// Define (or redefine) a slot, keeping the original position of an
    /// existing key.
    pub fn define(&self, key: impl Into<Rc<str>>, slot: Slot) {
        let key = key.into();
        let mut inner = self.0.borrow_mut();
        match inner.position(&key) {
            Some(i) => inner.entries[i].1 = slot,
            None => inner.entries.push((key, slot)),
        }
    }

    pub fn insert(&self, key: impl Into<Rc<str>>, value: impl Into<Value>) {
        self.define(key, Slot::Value(value.into()));
    }

    /// Assign a plain value. Lazy slots are read-only.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<(), EvalError> {
        if self.slot(key).is_some_and(|s| s.is_lazy()) {
            return Err(EvalError::ReadOnly {
                key: key.to_string(),
            });
        }
        self.insert(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Option<Slot> {
        let mut inner = self.0.borrow_mut();
        let i = inner.position(key)?;
        Some(inner.entries.remove(i).1)
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }

    /// Deep structural copy that keeps lazy slots lazy.
    pub fn clone_deep(&self) -> ObjectRef {
        match copy::copy(
            &Value::Object(ObjectRef::new()),
            &Value::Object(self.clone()),
            &copy::CopyOptions::default(),
        ) {
            Value::Object(obj) => obj,
            _ => ObjectRef::new(),
        }
    }

    /// Force every slot and convert to plain JSON.
    pub fn to_json(&self) -> Result<Json, EvalError> {
        to_json_guarded(&Value::Object(self.clone()), &mut Vec::new())
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("keys", &self.keys())
            .finish()
    }
}

/// Shared handle to a compiled sequence.
#[derive(Clone, Default)]
pub struct ArrayRef(Rc<RefCell<Vec<Slot>>>);

#[derive(Clone, Default)]
pub struct WeakArrayRef(Weak<RefCell<Vec<Slot>>>);

impl WeakArrayRef {
    pub fn upgrade(&self) -> Option<ArrayRef> {
        self.0.upgrade().map(ArrayRef)
    }
}

impl ArrayRef {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self(Rc::new(RefCell::new(
            values.into_iter().map(Slot::Value).collect(),
        )))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slot(&self, index: usize) -> Option<Slot> {
        self.0.borrow().get(index).cloned()
    }

    pub fn slots(&self) -> Vec<Slot> {
        self.0.borrow().clone()
    }

    pub fn get(&self, index: usize) -> Result<Option<Value>, EvalError> {
        let slot = self.slot(index);
        slot.map(|s| s.resolve()).transpose()
    }

    /// Resolve every element in order.
    pub fn values(&self) -> Result<Vec<Value>, EvalError> {
        self.slots().iter().map(Slot::resolve).collect()
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(Slot::Value(value.into()));
    }

    /// Define the slot at `index`, padding with nulls when it lies past the end.
    pub fn define(&self, index: usize, slot: Slot) {
        let mut inner = self.0.borrow_mut();
        if index >= inner.len() {
            inner.resize(index + 1, Slot::Value(Value::Null));
        }
        inner[index] = slot;
    }

    pub fn set(&self, index: usize, value: impl Into<Value>) -> Result<(), EvalError> {
        if self.slot(index).is_some_and(|s| s.is_lazy()) {
            return Err(EvalError::ReadOnly {
                key: index.to_string(),
            });
        }
        self.define(index, Slot::Value(value.into()));
        Ok(())
    }

    #[inline]
    pub fn ptr_eq(&self, other: &ArrayRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakArrayRef {
        WeakArrayRef(Rc::downgrade(&self.0))
    }

    pub fn clone_deep(&self) -> ArrayRef {
        match copy::copy(
            &Value::Array(ArrayRef::new()),
            &Value::Array(self.clone()),
            &copy::CopyOptions::default(),
        ) {
            Value::Array(arr) => arr,
            _ => ArrayRef::new(),
        }
    }

    pub fn to_json(&self) -> Result<Json, EvalError> {
        to_json_guarded(&Value::Array(self.clone()), &mut Vec::new())
    }

    fn addr(&self) -> *const () {
        Rc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for ArrayRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayRef").field("len", &self.len()).finish()
    }
}

impl Value {
    /// Build fresh containers from a JSON value. Markers are not interpreted.
    pub fn from_json(json: &Json) -> Self {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    Value::Null
                }
            }
            Json::String(s) => Value::Str(Rc::from(s.as_str())),
            Json::Array(arr) => Value::Array(ArrayRef::from_values(arr.iter().map(Value::from_json))),
            Json::Object(obj) => {
                let out = ObjectRef::new();
                for (k, v) in obj {
                    out.insert(k.as_str(), Value::from_json(v));
                }
                Value::Object(out)
            }
        }
    }

    /// Force every lazy slot and convert to plain JSON.
    pub fn to_json(&self) -> Result<Json, EvalError> {
        to_json_guarded(self, &mut Vec::new())
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[inline]
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    #[inline]
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0 && !f.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }

    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    /// Numeric coercion used by arithmetic.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Null => Some(0.0),
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_ref()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) | Value::Float(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Read a field of an object (or an index of an array), resolving lazy
    /// slots. Returns `None` for absent members and for scalars.
    pub fn get(&self, key: &str) -> Result<Option<Value>, EvalError> {
        match self {
            Value::Object(obj) => obj.get(key),
            Value::Array(arr) => {
                if key == "length" {
                    return Ok(Some(Value::Int(arr.len() as i64)));
                }
                match key.parse::<usize>() {
                    Ok(i) => arr.get(i),
                    Err(_) => Ok(None),
                }
            }
            Value::Str(s) if key == "length" => Ok(Some(Value::Int(s.chars().count() as i64))),
            _ => Ok(None),
        }
    }

    /// Read the element at `index` of an array (or the character of a string).
    pub fn at(&self, index: usize) -> Result<Option<Value>, EvalError> {
        match self {
            Value::Array(arr) => arr.get(index),
            Value::Str(s) => Ok(s
                .chars()
                .nth(index)
                .map(|c| Value::Str(Rc::from(c.to_string().as_str())))),
            Value::Object(obj) => obj.get(&index.to_string()),
            _ => Ok(None),
        }
    }

    pub fn cmp_numeric_or_string(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }

    /// Text form used by string concatenation and interpolation.
    pub fn display_string(&self) -> Result<String, EvalError> {
        Ok(match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_f64(*f),
            Value::Str(s) => s.to_string(),
            Value::Array(_) | Value::Object(_) => self.to_json()?.to_string(),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) => (*a as f64) == *b,
            (Value::Float(a), Value::Int(b)) => *a == (*b as f64),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("Null"),
            Value::Bool(b) => f.debug_tuple("Bool").field(b).finish(),
            Value::Int(n) => f.debug_tuple("Int").field(n).finish(),
            Value::Float(x) => f.debug_tuple("Float").field(x).finish(),
            Value::Str(s) => f.debug_tuple("Str").field(s).finish(),
            Value::Array(a) => a.fmt(f),
            Value::Object(o) => o.fmt(f),
        }
    }
}

pub(crate) fn format_f64(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        let text = if f > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e21 {
        format!("{:.0}", f)
    } else {
        f.to_string()
    }
}

fn to_json_guarded(value: &Value, stack: &mut Vec<*const ()>) -> Result<Json, EvalError> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(n) => Ok(Json::Number(Number::from(*n))),
        Value::Float(f) => Ok(Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null)),
        Value::Str(s) => Ok(Json::String(s.to_string())),
        Value::Array(arr) => {
            let addr = arr.addr();
            if stack.contains(&addr) {
                return Err(EvalError::Cycle {
                    what: "array".to_string(),
                });
            }
            stack.push(addr);
            let mut out = Vec::with_capacity(arr.len());
            for slot in arr.slots() {
                out.push(to_json_guarded(&slot.resolve()?, stack)?);
            }
            stack.pop();
            Ok(Json::Array(out))
        }
        Value::Object(obj) => {
            let addr = obj.addr();
            if stack.contains(&addr) {
                return Err(EvalError::Cycle {
                    what: "object".to_string(),
                });
            }
            stack.push(addr);
            let mut out = Map::new();
            for (k, slot) in obj.slots() {
                out.insert(k.to_string(), to_json_guarded(&slot.resolve()?, stack)?);
            }
            stack.pop();
            Ok(Json::Object(out))
        }
    }
}

impl From<Json> for Value {
    fn from(v: Json) -> Self {
        Value::from_json(&v)
    }
}

impl From<&Json> for Value {
    fn from(v: &Json) -> Self {
        Value::from_json(v)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s.as_str()))
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Value::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Value::Array(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_key_order() {
        let value = Value::from_json(&json!({"b": 1, "a": 2, "c": [1, "x", null]}));
        let obj = value.as_object().expect("object");
        let keys: Vec<String> = obj.keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
        assert_eq!(value.to_json().unwrap(), json!({"b": 1, "a": 2, "c": [1, "x", null]}));
    }

    #[test]
    fn test_container_equality_is_identity() {
        let a = ObjectRef::new();
        let b = ObjectRef::new();
        assert_eq!(Value::Object(a.clone()), Value::Object(a.clone()));
        assert_ne!(Value::Object(a), Value::Object(b));
        assert_eq!(Value::Int(3), Value::Float(3.0));
    }

    #[test]
    fn test_define_keeps_position() {
        let obj = ObjectRef::new();
        obj.insert("a", 1);
        obj.insert("b", 2);
        obj.insert("a", 3);
        assert_eq!(obj.to_json().unwrap(), json!({"a": 3, "b": 2}));
        assert_eq!(obj.remove("a").map(|s| s.is_lazy()), Some(false));
        assert_eq!(obj.len(), 1);
    }

    #[test]
    fn test_array_define_pads_with_null() {
        let arr = ArrayRef::new();
        arr.define(2, Slot::Value(Value::from("x")));
        assert_eq!(arr.to_json().unwrap(), json!([null, null, "x"]));
    }

    #[test]
    fn test_member_access_on_arrays_and_strings() {
        let arr = Value::from_json(&json!([10, 20]));
        assert_eq!(arr.get("length").unwrap(), Some(Value::Int(2)));
        assert_eq!(arr.get("1").unwrap(), Some(Value::Int(20)));
        assert_eq!(Value::from("abc").get("length").unwrap(), Some(Value::Int(3)));
        assert_eq!(Value::Int(1).get("x").unwrap(), None);
    }

    #[test]
    fn test_to_json_reports_cycles() {
        let obj = ObjectRef::new();
        obj.insert("me", obj.clone());
        assert!(matches!(obj.to_json(), Err(EvalError::Cycle { .. })));
        // break the cycle so the test does not leak
        obj.remove("me");
    }

    #[test]
    fn test_display_string() {
        assert_eq!(Value::Float(2.0).display_string().unwrap(), "2");
        assert_eq!(Value::Float(2.5).display_string().unwrap(), "2.5");
        assert_eq!(
            Value::from_json(&json!({"a": 1})).display_string().unwrap(),
            r#"{"a":1}"#
        );
    }
}

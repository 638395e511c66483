//! Evaluation scopes.
//!
//! A compilation tree shares one outer scope object. It is either supplied by
//! the caller or becomes the first plain mapping compiled, and is assigned at
//! most once. Every lazy read builds a transient [`Scope`] on top of it that
//! additionally binds the enclosing compiled container under [`SELF_BINDING`].

use crate::error::EvalError;
use crate::value::{ObjectRef, Value};
use std::cell::OnceCell;
use std::rc::Rc;

/// Name under which expressions see their own enclosing object.
pub const SELF_BINDING: &str = "_";

#[derive(Clone)]
enum ScopeRef {
    /// Caller-supplied scope, owned by the compilation tree.
    Supplied(ObjectRef),
    /// Compiled root adopted as scope. Held strongly so that any part of the
    /// tree outliving the root handle still resolves names; the root and its
    /// lazy slots form a reference cycle.
    Root(ObjectRef),
}

/// Set-once scope cell shared by every options copy of one compilation tree.
#[derive(Clone, Default)]
pub struct ScopeSlot(Rc<OnceCell<ScopeRef>>);

impl ScopeSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn supplied(scope: ObjectRef) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(ScopeRef::Supplied(scope));
        Self(Rc::new(cell))
    }

    pub fn is_set(&self) -> bool {
        self.0.get().is_some()
    }

    /// Adopt `root` as scope unless one is already assigned.
    pub(crate) fn init_root(&self, root: &ObjectRef) {
        let _ = self.0.set(ScopeRef::Root(root.clone()));
    }

    /// A new cell for another compilation tree. A supplied scope carries over;
    /// an adopted root does not.
    pub(crate) fn fork(&self) -> Self {
        match self.0.get() {
            Some(ScopeRef::Supplied(obj)) => Self::supplied(obj.clone()),
            _ => Self::empty(),
        }
    }

    pub fn get(&self) -> Option<ObjectRef> {
        match self.0.get()? {
            ScopeRef::Supplied(obj) | ScopeRef::Root(obj) => Some(obj.clone()),
        }
    }
}

/// Name resolution frame for one evaluation.
///
/// Lookup checks the local bindings first, then falls back to the parent
/// object.
#[derive(Clone, Default)]
pub struct Scope {
    bindings: Vec<(Rc<str>, Value)>,
    parent: Option<ObjectRef>,
}

impl Scope {
    pub fn new(parent: Option<ObjectRef>) -> Self {
        Self {
            bindings: Vec::new(),
            parent,
        }
    }

    /// Add a local binding that shadows the parent.
    pub fn bind(mut self, name: impl Into<Rc<str>>, value: Value) -> Self {
        self.bindings.push((name.into(), value));
        self
    }

    /// Bind the enclosing container under [`SELF_BINDING`].
    pub fn with_self(self, this: Value) -> Self {
        self.bind(SELF_BINDING, this)
    }

    pub fn parent(&self) -> Option<&ObjectRef> {
        self.parent.as_ref()
    }

    pub fn lookup(&self, name: &str) -> Result<Option<Value>, EvalError> {
        if let Some((_, v)) = self.bindings.iter().rev().find(|(k, _)| k.as_ref() == name) {
            return Ok(Some(v.clone()));
        }
        match &self.parent {
            Some(parent) => parent.get(name),
            None => Ok(None),
        }
    }
}

impl From<ObjectRef> for Scope {
    fn from(obj: ObjectRef) -> Self {
        Scope::new(Some(obj))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_binding_shadows_parent() {
        let outer = ObjectRef::new();
        outer.insert("_", "outer");
        outer.insert("name", "world");
        let inner = ObjectRef::new();
        let scope = Scope::from(outer).with_self(Value::Object(inner.clone()));

        assert_eq!(
            scope.lookup("_").unwrap(),
            Some(Value::Object(inner))
        );
        assert_eq!(scope.lookup("name").unwrap(), Some(Value::from("world")));
        assert_eq!(scope.lookup("missing").unwrap(), None);
    }

    #[test]
    fn test_scope_slot_is_set_once() {
        let slot = ScopeSlot::empty();
        let first = ObjectRef::new();
        let second = ObjectRef::new();
        slot.init_root(&first);
        slot.init_root(&second);
        assert!(slot.get().is_some_and(|s| s.ptr_eq(&first)));
    }

    #[test]
    fn test_fork_keeps_only_supplied_scope() {
        let supplied = ObjectRef::new();
        let forked = ScopeSlot::supplied(supplied.clone()).fork();
        assert!(forked.get().is_some_and(|s| s.ptr_eq(&supplied)));

        let root = ObjectRef::new();
        let adopted = ScopeSlot::empty();
        adopted.init_root(&root);
        assert!(!adopted.fork().is_set());
    }

    #[test]
    fn test_adopted_root_outlives_its_handle() {
        let slot = ScopeSlot::empty();
        {
            let root = ObjectRef::new();
            root.insert("a", 1);
            slot.init_root(&root);
        }
        let scope = slot.get().expect("root kept by the slot");
        assert_eq!(scope.get("a").unwrap(), Some(Value::Int(1)));
    }
}

//! Structural copier used by `$extend` and the `clone_deep` capability.
//!
//! Slots are copied as slots: a lazy entry stays lazy in the copy and is never
//! evaluated while copying. Its `_` is re-pointed at the container it lands in.

use crate::binding::Owner;
use crate::value::{ArrayRef, ObjectRef, Slot, Value};
use regex::Regex;

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Keys matching this pattern are skipped (at every depth).
    pub exclude: Option<Regex>,
    /// Deep-copy objects that came from another file instead of sharing them.
    pub force: bool,
}

impl CopyOptions {
    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude = Some(pattern);
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Copy `source` onto `target` and return the result.
///
/// An array source yields a new array; `target` is discarded. A mapping source
/// has each of its entries defined on `target` (a fresh object when `target`
/// is not one), overriding entries of the same name. Scalar sources leave
/// `target` unchanged.
pub fn copy(target: &Value, source: &Value, options: &CopyOptions) -> Value {
    let mut copier = Copier {
        options,
        source: source.clone(),
        target: target.clone(),
        ancestors: vec![source.clone()],
    };
    match source {
        Value::Array(arr) => {
            // the old target is discarded; a self reference stays shared
            copier.target = source.clone();
            Value::Array(copier.copy_array(arr))
        }
        Value::Object(obj) => {
            let into = match target {
                Value::Object(t) => t.clone(),
                _ => ObjectRef::new(),
            };
            copier.target = Value::Object(into.clone());
            copier.copy_object(&into, obj);
            Value::Object(into)
        }
        _ => target.clone(),
    }
}

/// [`copy`] with default options: `source` entries override `target` entries.
pub fn merge(target: &Value, source: &Value) -> Value {
    copy(target, source, &CopyOptions::default())
}

/// Define on `target` every entry of `source` that `target` lacks. Present
/// entries are kept as they are.
pub fn defaults(target: &ObjectRef, source: &ObjectRef) -> ObjectRef {
    let owner = Owner::object(target);
    for (key, slot) in source.slots() {
        if !target.contains_key(&key) {
            target.define(key, rebind(slot, &owner));
        }
    }
    target.clone()
}

fn rebind(slot: Slot, owner: &Owner) -> Slot {
    match slot {
        Slot::Lazy(binding) => Slot::Lazy(binding.rebind(owner.clone())),
        value => value,
    }
}

struct Copier<'a> {
    options: &'a CopyOptions,
    source: Value,
    target: Value,
    /// Containers on the path from the source root to the current node.
    ancestors: Vec<Value>,
}

impl Copier<'_> {
    fn copy_object(&mut self, into: &ObjectRef, from: &ObjectRef) {
        let owner = Owner::object(into);
        for (key, slot) in from.slots() {
            if self
                .options
                .exclude
                .as_ref()
                .is_some_and(|re| re.is_match(&key))
            {
                continue;
            }
            let slot = self.copy_slot(slot, &owner);
            into.define(key, slot);
        }
    }

    fn copy_array(&mut self, from: &ArrayRef) -> ArrayRef {
        let out = ArrayRef::new();
        let owner = Owner::array(&out);
        for (i, slot) in from.slots().into_iter().enumerate() {
            let slot = self.copy_slot(slot, &owner);
            out.define(i, slot);
        }
        out
    }

    fn copy_slot(&mut self, slot: Slot, owner: &Owner) -> Slot {
        match slot {
            Slot::Lazy(_) => rebind(slot, owner),
            Slot::Value(value) => Slot::Value(self.copy_value(value)),
        }
    }

    fn copy_value(&mut self, value: Value) -> Value {
        if !value.is_container() {
            return value;
        }
        if value == self.source {
            return self.target.clone();
        }
        if self.ancestors.contains(&value) {
            return value;
        }
        match &value {
            Value::Object(obj) => {
                if obj.origin().is_some() && !self.options.force {
                    return value;
                }
                let into = ObjectRef::new();
                self.ancestors.push(value.clone());
                self.copy_object(&into, obj);
                self.ancestors.pop();
                Value::Object(into)
            }
            Value::Array(arr) => {
                self.ancestors.push(value.clone());
                let out = self.copy_array(arr);
                self.ancestors.pop();
                Value::Array(out)
            }
            _ => value,
        }
    }
}

//! Lazy slots: expression and interpolation bindings.
//!
//! A binding never caches its result. Every read builds a transient [`Scope`]
//! over the tree's outer scope, binds the enclosing container as `_`, and
//! evaluates again, so later mutation of the scope is observed.

use crate::error::{CompileError, EvalError};
use crate::compiler::NodePath;
use crate::expr::Expression;
use crate::options::Options;
use crate::scope::{Scope, ScopeSlot};
use crate::value::{ArrayRef, ObjectRef, Slot, Value, WeakArrayRef, WeakObjectRef};
use regex::Regex;
use std::cell::Cell;
use std::rc::Rc;

/// Container a binding lives in. Held weakly: the container owns the binding.
#[derive(Clone, Default)]
pub enum Owner {
    #[default]
    Detached,
    Object(WeakObjectRef),
    Array(WeakArrayRef),
}

impl Owner {
    pub fn object(obj: &ObjectRef) -> Self {
        Owner::Object(obj.downgrade())
    }

    pub fn array(arr: &ArrayRef) -> Self {
        Owner::Array(arr.downgrade())
    }

    /// The live container, `None` when detached, an error once it was dropped.
    fn upgrade(&self) -> Result<Option<Value>, EvalError> {
        let live = match self {
            Owner::Detached => return Ok(None),
            Owner::Object(weak) => weak.upgrade().map(Value::Object),
            Owner::Array(weak) => weak.upgrade().map(Value::Array),
        };
        live.map(Some).ok_or(EvalError::OwnerDropped)
    }
}

#[derive(Clone)]
enum Kind {
    Expression(Expression),
    Template(Template),
}

/// A recomputed-on-read value bound to an outer scope and an owner.
pub struct Binding {
    kind: Kind,
    owner: Owner,
    scope: ScopeSlot,
    active: Cell<bool>,
}

impl Binding {
    pub fn expression(expression: Expression, owner: Owner, scope: ScopeSlot) -> Self {
        Self {
            kind: Kind::Expression(expression),
            owner,
            scope,
            active: Cell::new(false),
        }
    }

    pub fn template(template: Template, owner: Owner, scope: ScopeSlot) -> Self {
        Self {
            kind: Kind::Template(template),
            owner,
            scope,
            active: Cell::new(false),
        }
    }

    /// Same binding with `_` pointing at `owner`, for a slot copied into
    /// another container.
    pub fn rebind(&self, owner: Owner) -> Rc<Binding> {
        Rc::new(Self {
            kind: self.kind.clone(),
            owner,
            scope: self.scope.clone(),
            active: Cell::new(false),
        })
    }

    /// Source text of the expression or template.
    pub fn source(&self) -> &str {
        match &self.kind {
            Kind::Expression(e) => e.source(),
            Kind::Template(t) => &t.source,
        }
    }

    pub fn evaluate(&self) -> Result<Value, EvalError> {
        if self.active.replace(true) {
            return Err(EvalError::Cycle {
                what: format!("\"{}\"", self.source()),
            });
        }
        let result = self.evaluate_inner();
        self.active.set(false);
        result
    }

    fn evaluate_inner(&self) -> Result<Value, EvalError> {
        let mut scope = Scope::new(self.scope.get());
        if let Some(this) = self.owner.upgrade()? {
            scope = scope.with_self(this);
        }
        match &self.kind {
            Kind::Expression(e) => e.evaluate(&scope),
            Kind::Template(t) => t.render(&scope).map(Value::from),
        }
    }
}

#[derive(Debug, Clone)]
enum Part {
    Text(String),
    Path(Vec<String>),
}

/// String with `${path.to.value}` placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
    parts: Vec<Part>,
}

impl Template {
    /// Split `text` on `pattern` matches. Returns `None` when nothing matches.
    ///
    /// The placeholder path is capture group 1, or the match itself stripped
    /// of `${`/`}` when the pattern has no group.
    pub fn parse(text: &str, pattern: &Regex) -> Option<Self> {
        let mut parts = Vec::new();
        let mut last = 0;
        for caps in pattern.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                parts.push(Part::Text(text[last..whole.start()].to_string()));
            }
            let path = match caps.get(1) {
                Some(group) => group.as_str(),
                None => whole
                    .as_str()
                    .trim_start_matches("${")
                    .trim_end_matches('}'),
            };
            parts.push(Part::Path(
                path.split('.').map(|s| s.trim().to_string()).collect(),
            ));
            last = whole.end();
        }
        if !parts.iter().any(|p| matches!(p, Part::Path(_))) {
            return None;
        }
        if last < text.len() {
            parts.push(Part::Text(text[last..].to_string()));
        }
        Some(Self {
            source: text.to_string(),
            parts,
        })
    }

    /// Substitute every placeholder. Unresolvable paths render as empty text.
    pub fn render(&self, scope: &Scope) -> Result<String, EvalError> {
        let mut out = String::with_capacity(self.source.len());
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Path(path) => {
                    if let Some(value) = resolve_path(scope, path)? {
                        out.push_str(&value.display_string()?);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn resolve_path(scope: &Scope, path: &[String]) -> Result<Option<Value>, EvalError> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(None);
    };
    let Some(mut current) = scope.lookup(first)? else {
        return Ok(None);
    };
    for segment in rest {
        match current.get(segment)? {
            Some(next) => current = next,
            None => return Ok(None),
        }
    }
    Ok(Some(current))
}

/// Build a lazy slot evaluating `text` against the tree's scope.
pub(crate) fn bind_expression(
    text: &str,
    owner: Owner,
    options: &Options,
    at: &NodePath,
) -> Result<Slot, CompileError> {
    let expression = Expression::parse(text).map_err(|source| CompileError::Expression {
        at: at.clone(),
        source,
    })?;
    Ok(Slot::Lazy(Rc::new(Binding::expression(
        expression,
        owner,
        options.scope_slot().clone(),
    ))))
}

/// Build a lazy interpolating slot, or `None` when `text` has no placeholder.
pub(crate) fn bind_interpolation(text: &str, owner: Owner, options: &Options) -> Option<Slot> {
    let template = Template::parse(text, options.interpolation())?;
    Some(Slot::Lazy(Rc::new(Binding::template(
        template,
        owner,
        options.scope_slot().clone(),
    ))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::DEFAULT_INTERPOLATION;
    use crate::value::ObjectRef;

    fn pattern() -> Regex {
        Regex::new(DEFAULT_INTERPOLATION).expect("default pattern compiles")
    }

    #[test]
    fn test_template_without_placeholders_is_not_bound() {
        assert!(Template::parse("plain text", &pattern()).is_none());
        assert!(Template::parse("$ {not} a placeholder", &pattern()).is_none());
    }

    #[test]
    fn test_template_renders_paths_and_skips_missing() {
        let scope = ObjectRef::new();
        let user = ObjectRef::new();
        user.insert("name", "Ann");
        scope.insert("user", user);
        scope.insert("n", 2);

        let template = Template::parse("${user.name} has ${n} (${user.age.years})", &pattern())
            .expect("has placeholders");
        assert_eq!(
            template.render(&Scope::from(scope)).unwrap(),
            "Ann has 2 ()"
        );
    }

    #[test]
    fn test_binding_reads_live_scope() {
        let scope = ObjectRef::new();
        scope.insert("a", 1);
        let binding = Binding::expression(
            Expression::parse("a * 10").unwrap(),
            Owner::Detached,
            ScopeSlot::supplied(scope.clone()),
        );
        assert_eq!(binding.evaluate().unwrap(), Value::Int(10));
        scope.insert("a", 4);
        assert_eq!(binding.evaluate().unwrap(), Value::Int(40));
    }

    #[test]
    fn test_rebind_points_self_at_new_owner() {
        let first = ObjectRef::new();
        first.insert("name", "first");
        let binding = Binding::expression(
            Expression::parse("_.name").unwrap(),
            Owner::object(&first),
            ScopeSlot::empty(),
        );
        let second = ObjectRef::new();
        second.insert("name", "second");
        let rebound = binding.rebind(Owner::object(&second));

        drop(first);
        assert_eq!(rebound.evaluate().unwrap(), Value::from("second"));
        assert_eq!(binding.evaluate(), Err(EvalError::OwnerDropped));
    }

    #[test]
    fn test_self_referencing_binding_reports_cycle() {
        let scope = ObjectRef::new();
        let slot = Slot::Lazy(Rc::new(Binding::expression(
            Expression::parse("loop + 1").unwrap(),
            Owner::Object(scope.downgrade()),
            ScopeSlot::supplied(scope.clone()),
        )));
        scope.define("loop", slot);
        assert!(matches!(scope.get("loop"), Err(EvalError::Cycle { .. })));
        // drop the slot so the supplied scope does not keep itself alive
        scope.remove("loop");
    }
}

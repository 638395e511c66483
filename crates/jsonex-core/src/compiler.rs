use crate::binding::{self, Owner};
use crate::error::{CompileError, ExprError};
use crate::expr::Expression;
use crate::options::Options;
use crate::scope::Scope;
use crate::value::{ArrayRef, ObjectRef, Slot, Value};
use serde_json::{Map, Value as Json};
use std::fmt;

/// Key of an inline expression marker: `{"$": "a + b"}`.
pub const EXPRESSION_KEY: &str = "$";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Location of a node inside the document being compiled, for error reports.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodePath(Vec<Segment>);

impl NodePath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn key(&self, key: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(key.to_string()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Compile one node.
///
/// - array: a new array, element by element;
/// - `{"$": expr}`: evaluated now, once, against the current scope;
/// - other mapping: rules first, then a new object whose entries are
///   literal, lazy or recursively compiled;
/// - scalar: converted as is.
pub fn compile(node: &Json, options: &Options, path: &NodePath) -> Result<Value, CompileError> {
    match node {
        Json::Array(items) => compile_array(items, options, path),
        Json::Object(map) => match map.get(EXPRESSION_KEY) {
            Some(expr) => evaluate_now(expr, options, path),
            None => compile_object(map, options, path),
        },
        scalar => Ok(Value::from_json(scalar)),
    }
}

fn compile_array(items: &[Json], options: &Options, path: &NodePath) -> Result<Value, CompileError> {
    let out = ArrayRef::new();
    let owner = Owner::array(&out);
    for (i, item) in items.iter().enumerate() {
        // strings inside arrays are not interpolated
        let slot = compile_entry(item, &owner, options, &path.index(i), false)?;
        out.define(i, slot);
    }
    Ok(Value::Array(out))
}

fn compile_object(
    map: &Map<String, Json>,
    options: &Options,
    path: &NodePath,
) -> Result<Value, CompileError> {
    if let Some(replaced) = options.rules().apply(map, options, path)? {
        if let Value::Object(obj) = &replaced {
            options.scope_slot().init_root(obj);
        }
        return Ok(replaced);
    }

    let out = ObjectRef::new();
    options.scope_slot().init_root(&out);

    // Raw values first, so that eager evaluation of an earlier entry can
    // already see later siblings.
    for (key, value) in map {
        out.insert(key.as_str(), Value::from_json(value));
    }
    let owner = Owner::object(&out);
    for (key, value) in map {
        let slot = compile_entry(value, &owner, options, &path.key(key), true)?;
        out.define(key.as_str(), slot);
    }
    Ok(Value::Object(out))
}

fn compile_entry(
    value: &Json,
    owner: &Owner,
    options: &Options,
    at: &NodePath,
    interpolate: bool,
) -> Result<Slot, CompileError> {
    match value {
        Json::Object(map) => match map.get(EXPRESSION_KEY) {
            Some(expr) => {
                binding::bind_expression(expression_text(expr, at)?, owner.clone(), options, at)
            }
            None => compile_object(map, options, at).map(Slot::Value),
        },
        Json::Array(items) => compile_array(items, options, at).map(Slot::Value),
        Json::String(text) if interpolate => Ok(
            binding::bind_interpolation(text, owner.clone(), options)
                .unwrap_or_else(|| Slot::Value(Value::from(text.as_str()))),
        ),
        scalar => Ok(Slot::Value(Value::from_json(scalar))),
    }
}

fn evaluate_now(expr: &Json, options: &Options, at: &NodePath) -> Result<Value, CompileError> {
    let text = expression_text(expr, at)?;
    let expression = Expression::parse(text).map_err(|source| CompileError::Expression {
        at: at.clone(),
        source,
    })?;
    expression
        .evaluate(&Scope::new(options.scope()))
        .map_err(|source| CompileError::Eval {
            at: at.clone(),
            source,
        })
}

fn expression_text<'a>(expr: &'a Json, at: &NodePath) -> Result<&'a str, CompileError> {
    expr.as_str().ok_or_else(|| CompileError::Expression {
        at: at.clone(),
        source: ExprError::NotAString(json_type_name(expr)),
    })
}

fn json_type_name(value: &Json) -> &'static str {
    match value {
        Json::Null => "null",
        Json::Bool(_) => "boolean",
        Json::Number(_) => "number",
        Json::String(_) => "string",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

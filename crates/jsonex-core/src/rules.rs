//! Rule registry: marker nodes rewritten before structural compilation.
//!
//! Rules are tried in registration order against every mapping the compiler
//! visits; the first one returning [`RuleOutcome::Match`] replaces the node.

use crate::compiler::{self, NodePath};
use crate::copy;
use crate::engine;
use crate::error::CompileError;
use crate::loader;
use crate::options::Options;
use crate::value::{ObjectRef, Value};
use serde_json::{Map, Value as Json};
use std::path::{Path, PathBuf};

pub const REQUIRE_KEY: &str = "$require";
pub const EXTEND_KEY: &str = "$extend";
pub const WITH_KEY: &str = "$with";

/// One-time setup against the whole document. Must be idempotent.
pub type RuleInit = fn(document: &Json, options: &mut Options);

pub type RuleRoutine =
    fn(node: &Map<String, Json>, options: &Options, path: &NodePath) -> Result<RuleOutcome, CompileError>;

#[derive(Debug)]
pub enum RuleOutcome {
    Match(Value),
    NoMatch,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rule {
    pub init: Option<RuleInit>,
    pub routine: Option<RuleRoutine>,
}

impl Rule {
    pub fn new(routine: RuleRoutine) -> Self {
        Self {
            init: None,
            routine: Some(routine),
        }
    }

    pub fn with_init(mut self, init: RuleInit) -> Self {
        self.init = Some(init);
        self
    }
}

/// Ordered rule registry. Instance-local: each `Options` tree carries its own.
#[derive(Debug, Clone)]
pub struct Rules {
    rules: Vec<(String, Rule)>,
}

impl Default for Rules {
    fn default() -> Self {
        Self::new()
    }
}

impl Rules {
    /// Registry with the built-in `require` and `extend` rules, in that order.
    pub fn new() -> Self {
        let mut rules = Self::empty();
        rules.register("require", Rule::new(require).with_init(require_init));
        rules.register("extend", Rule::new(extend));
        rules
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register or replace a rule. A replaced rule keeps its position.
    pub fn register(&mut self, name: impl Into<String>, rule: Rule) -> Option<Rule> {
        let name = name.into();
        match self.rules.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, rule)),
            None => {
                self.rules.push((name, rule));
                None
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Rule> {
        let index = self.rules.iter().position(|(n, _)| n == name)?;
        Some(self.rules.remove(index).1)
    }

    pub fn get(&self, name: &str) -> Option<Rule> {
        self.rules.iter().find(|(n, _)| n == name).map(|(_, r)| *r)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every `init` hook in registration order.
    pub fn init(&self, document: &Json, options: &mut Options) {
        for (_, rule) in &self.rules {
            if let Some(init) = rule.init {
                init(document, options);
            }
        }
    }

    /// First matching rule's result, or `None` when no rule matches.
    pub fn apply(
        &self,
        node: &Map<String, Json>,
        options: &Options,
        path: &NodePath,
    ) -> Result<Option<Value>, CompileError> {
        for (name, rule) in &self.rules {
            let routine = rule
                .routine
                .ok_or_else(|| CompileError::MissingRoutine { rule: name.clone() })?;
            if let RuleOutcome::Match(value) = routine(node, options, path)? {
                tracing::trace!(rule = %name, at = %path, "rule matched");
                return Ok(Some(value));
            }
        }
        Ok(None)
    }
}

fn require_init(_document: &Json, options: &mut Options) {
    options.fill_locations(
        || std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
        Path::new("/"),
    );
}

/// `{"$require": "relative/path.json"}`: the compiled document of that file.
///
/// Each file is compiled once per cache; every later require of the same
/// identity returns the very same compiled value.
fn require(
    node: &Map<String, Json>,
    options: &Options,
    path: &NodePath,
) -> Result<RuleOutcome, CompileError> {
    let Some(target) = node.get(REQUIRE_KEY) else {
        return Ok(RuleOutcome::NoMatch);
    };
    let Some(target) = target.as_str() else {
        return Err(CompileError::InvalidRequire { at: path.clone() });
    };
    let id = loader::resolve(options.dir().unwrap_or(Path::new("/")), target);

    let cache = options.cache();
    if let Some(hit) = cache.get(&id) {
        tracing::trace!(id = %id.display(), "require cache hit");
        return Ok(RuleOutcome::Match(hit));
    }
    if !cache.begin(&id) {
        return Err(CompileError::CyclicRequire { path: id });
    }
    match load_and_compile(&id, options) {
        Ok(value) => {
            cache.insert(id, value.clone());
            Ok(RuleOutcome::Match(value))
        }
        Err(e) => {
            cache.abort(&id);
            Err(e)
        }
    }
}

fn load_and_compile(id: &Path, options: &Options) -> Result<Value, CompileError> {
    let location = match options.root() {
        Some(root) => loader::locate(root, id),
        None => id.to_path_buf(),
    };
    tracing::debug!(id = %id.display(), location = %location.display(), "loading required file");
    let data = options
        .loader()
        .load(&location)
        .map_err(|source| CompileError::Load {
            path: location.clone(),
            source,
        })?;
    if !data.is_object() && !data.is_array() {
        return Err(CompileError::NotAnObject {
            path: id.to_path_buf(),
        });
    }
    let value = engine::compile_document(&data, options.for_file(id))?;
    if let Value::Object(obj) = &value {
        obj.set_origin(id);
    }
    Ok(value)
}

/// `{"$extend": base, "$with": overrides}`: both compiled, then `overrides`
/// merged onto `base`. A missing `$with` merges nothing.
fn extend(
    node: &Map<String, Json>,
    options: &Options,
    path: &NodePath,
) -> Result<RuleOutcome, CompileError> {
    let Some(base) = node.get(EXTEND_KEY) else {
        return Ok(RuleOutcome::NoMatch);
    };
    let mut target = compiler::compile(base, options, &path.key(EXTEND_KEY))?;
    let source = match node.get(WITH_KEY) {
        Some(with) => compiler::compile(with, options, &path.key(WITH_KEY))?,
        None => Value::Object(ObjectRef::new()),
    };
    // never merge into a cached module
    if let Value::Object(obj) = &target {
        if obj.origin().is_some() {
            target = Value::Object(obj.clone_deep());
        }
    }
    Ok(RuleOutcome::Match(copy::merge(&target, &source)))
}

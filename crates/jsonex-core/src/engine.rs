use crate::compiler::{self, NodePath};
use crate::error::CompileError;
use crate::options::{Cache, Options};
use crate::rules::Rule;
use crate::value::Value;
use serde_json::Value as Json;

/// Compile `document` (a mapping or an array) into a live value tree.
///
/// Rule `init` hooks run once against the whole document before compilation.
/// Nested `{"$": ..}` entries become lazy slots; a root-level `{"$": ..}` is
/// evaluated immediately.
#[tracing::instrument(level = "debug", skip_all, fields(id = %file_label(&options)))]
pub fn compile_document(document: &Json, options: Options) -> Result<Value, CompileError> {
    if !document.is_object() && !document.is_array() {
        return Err(CompileError::InvalidInput);
    }
    let mut options = options;
    let rules = options.rules_handle();
    rules.init(document, &mut options);
    compiler::compile(document, &options, &NodePath::root())
}

fn file_label(options: &Options) -> String {
    options
        .id()
        .map(|id| id.display().to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Compilation surface with instance-local rules and base options.
///
/// Each [`Engine::compile`] call starts a fresh compilation tree: its own
/// scope and, unless [`Options::with_cache`] was used, its own cache.
#[derive(Clone, Default)]
pub struct Engine {
    options: Options,
    shared_cache: bool,
}

impl Engine {
    /// Create an engine with the built-in `require` and `extend` rules.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: Options) -> Self {
        Self {
            options,
            shared_cache: false,
        }
    }

    /// Keep one `$require` cache across every `compile` call.
    pub fn with_shared_cache(mut self, cache: Cache) -> Self {
        self.options = self.options.with_cache(cache);
        self.shared_cache = true;
        self
    }

    /// Register or replace a rule.
    pub fn register(&mut self, name: impl Into<String>, rule: Rule) -> Option<Rule> {
        self.options.rules_mut().register(name, rule)
    }

    pub fn compile(&self, document: &Json) -> Result<Value, CompileError> {
        let mut options = self.options.clone().fork_scope();
        if !self.shared_cache {
            options = options.with_cache(Cache::new());
        }
        compile_document(document, options)
    }

    /// Access the base options (read-only).
    pub fn options(&self) -> &Options {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::rules::RuleOutcome;
    use serde_json::{Map, json};

    fn constant(
        node: &Map<String, Json>,
        _options: &Options,
        _path: &NodePath,
    ) -> Result<RuleOutcome, CompileError> {
        Ok(match node.get("$const") {
            Some(_) => RuleOutcome::Match(Value::Int(42)),
            None => RuleOutcome::NoMatch,
        })
    }

    #[test]
    fn test_rejects_scalar_documents() {
        for doc in [json!(1), json!("text"), json!(null), json!(true)] {
            assert!(matches!(
                compile_document(&doc, Options::new()),
                Err(CompileError::InvalidInput)
            ));
        }
    }

    #[test]
    fn test_register_custom_rule() {
        let mut engine = Engine::new();
        assert!(engine.register("const", Rule::new(constant)).is_none());
        let out = engine.compile(&json!({"answer": {"$const": true}})).unwrap();
        assert_eq!(out.get("answer").unwrap(), Some(Value::Int(42)));
        // the default engine is unaffected
        let plain = Engine::new().compile(&json!({"answer": {"$const": true}})).unwrap();
        assert_eq!(
            plain.to_json().unwrap(),
            json!({"answer": {"$const": true}})
        );
    }

    #[test]
    fn test_each_compile_gets_its_own_scope_and_cache() {
        let loader = MemoryLoader::new().with("/dep.json", json!({"v": 1}));
        let engine = Engine::with_options(Options::new().with_root("/").with_loader(loader));
        let doc = json!({"a": 1, "dep": {"$require": "dep.json"}});

        let one = engine.compile(&doc).unwrap();
        let two = engine.compile(&doc).unwrap();
        assert!(one.get("dep").unwrap() != two.get("dep").unwrap());
        assert!(engine.options().scope().is_none());
        assert!(engine.options().cache().is_empty());
    }

    #[test]
    fn test_shared_cache_returns_same_module() {
        let loader = MemoryLoader::new().with("/dep.json", json!({"v": 1}));
        let engine = Engine::with_options(Options::new().with_root("/").with_loader(loader))
            .with_shared_cache(Cache::new());
        let doc = json!({"dep": {"$require": "dep.json"}});

        let one = engine.compile(&doc).unwrap();
        let two = engine.compile(&doc).unwrap();
        assert_eq!(one.get("dep").unwrap(), two.get("dep").unwrap());
        assert_eq!(engine.options().cache().len(), 1);
    }
}

//! Compilation options.
//!
//! `Options` is passed by value through the compiler. Deriving a copy for a
//! branch (see [`Options::for_file`]) only changes that branch; the scope cell
//! and the cache are handles shared by every copy of one compilation tree.

use crate::error::CompileError;
use crate::loader::{FsLoader, Loader};
use crate::rules::Rules;
use crate::scope::ScopeSlot;
use crate::value::{ObjectRef, Value};
use regex::Regex;
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

/// Matches `${identifier(.identifier)*}` placeholders; group 1 is the path.
pub const DEFAULT_INTERPOLATION: &str = r"\$\{\s*([A-Za-z_$][\w$]*(?:\.[A-Za-z_$][\w$]*)*)\s*\}";

fn default_interpolation() -> Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(DEFAULT_INTERPOLATION).expect("default interpolation pattern"))
        .clone()
}

/// Compiled results of `$require`d files, keyed by resolved file identity.
#[derive(Clone, Default)]
pub struct Cache(Rc<RefCell<CacheInner>>);

#[derive(Default)]
struct CacheInner {
    ready: HashMap<PathBuf, Value>,
    loading: HashSet<PathBuf>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &Path) -> Option<Value> {
        self.0.borrow().ready.get(id).cloned()
    }

    pub fn contains(&self, id: &Path) -> bool {
        self.0.borrow().ready.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.0.borrow().ready.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&self, id: PathBuf, value: Value) {
        let mut inner = self.0.borrow_mut();
        inner.loading.remove(&id);
        inner.ready.insert(id, value);
    }

    /// Mark `id` as being compiled. Returns false when it already is.
    pub(crate) fn begin(&self, id: &Path) -> bool {
        self.0.borrow_mut().loading.insert(id.to_path_buf())
    }

    pub(crate) fn abort(&self, id: &Path) {
        self.0.borrow_mut().loading.remove(id);
    }
}

#[derive(Clone)]
pub struct Options {
    rules: Rc<Rules>,
    scope: ScopeSlot,
    interpolation: Regex,
    cache: Cache,
    root: Option<PathBuf>,
    dir: Option<PathBuf>,
    id: Option<PathBuf>,
    loader: Rc<dyn Loader>,
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

impl Options {
    /// Built-in rules, no scope, default interpolation, fresh cache,
    /// filesystem loader. `root` and `dir` are filled by rule initialization.
    pub fn new() -> Self {
        Self {
            rules: Rc::new(Rules::new()),
            scope: ScopeSlot::empty(),
            interpolation: default_interpolation(),
            cache: Cache::new(),
            root: None,
            dir: None,
            id: None,
            loader: Rc::new(FsLoader),
        }
    }

    pub fn with_scope(mut self, scope: ObjectRef) -> Self {
        self.scope = ScopeSlot::supplied(scope);
        self
    }

    pub fn with_rules(mut self, rules: Rules) -> Self {
        self.rules = Rc::new(rules);
        self
    }

    pub fn with_interpolation(mut self, pattern: Regex) -> Self {
        self.interpolation = pattern;
        self
    }

    pub fn with_cache(mut self, cache: Cache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<PathBuf>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loader = Rc::new(loader);
        self
    }

    /// Options for compiling the file identified by `id`: same tree (scope,
    /// cache, rules, loader), new `dir` and `id`.
    pub fn for_file(&self, id: &Path) -> Self {
        let mut derived = self.clone();
        derived.dir = Some(
            id.parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("/")),
        );
        derived.id = Some(id.to_path_buf());
        derived
    }

    /// Same options with a scope cell of their own, for a new compilation tree.
    pub(crate) fn fork_scope(mut self) -> Self {
        self.scope = self.scope.fork();
        self
    }

    /// Fill `root`/`dir` if unset. Idempotent.
    pub(crate) fn fill_locations(&mut self, root: impl FnOnce() -> PathBuf, dir: &Path) {
        if self.root.is_none() {
            self.root = Some(root());
        }
        if self.dir.is_none() {
            self.dir = Some(dir.to_path_buf());
        }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    pub(crate) fn rules_handle(&self) -> Rc<Rules> {
        Rc::clone(&self.rules)
    }

    pub(crate) fn rules_mut(&mut self) -> &mut Rules {
        Rc::make_mut(&mut self.rules)
    }

    /// Current scope object, if one was supplied or already assigned.
    pub fn scope(&self) -> Option<ObjectRef> {
        self.scope.get()
    }

    pub(crate) fn scope_slot(&self) -> &ScopeSlot {
        &self.scope
    }

    pub fn interpolation(&self) -> &Regex {
        &self.interpolation
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn id(&self) -> Option<&Path> {
        self.id.as_deref()
    }

    pub fn loader(&self) -> &dyn Loader {
        self.loader.as_ref()
    }
}

/// Serializable form of [`Options`], as read from a config file or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionsConfig {
    pub root: Option<PathBuf>,
    pub dir: Option<PathBuf>,
    pub scope: Option<serde_json::Value>,
    pub interpolation: Option<String>,
}

impl OptionsConfig {
    pub fn from_json(json: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(json)
    }

    /// Fill `self` from `defaults` wherever `self` leaves a field unset.
    pub fn or(self, defaults: OptionsConfig) -> Self {
        Self {
            root: self.root.or(defaults.root),
            dir: self.dir.or(defaults.dir),
            scope: self.scope.or(defaults.scope),
            interpolation: self.interpolation.or(defaults.interpolation),
        }
    }

    pub fn into_options(self) -> Result<Options, CompileError> {
        let mut options = Options::new();
        if let Some(root) = self.root {
            options = options.with_root(root);
        }
        if let Some(dir) = self.dir {
            options = options.with_dir(dir);
        }
        if let Some(scope) = self.scope {
            match Value::from_json(&scope) {
                Value::Object(obj) => options = options.with_scope(obj),
                _ => return Err(CompileError::InvalidScope),
            }
        }
        if let Some(pattern) = self.interpolation {
            let regex = Regex::new(&pattern).map_err(|e| CompileError::InvalidPattern {
                pattern,
                reason: e.to_string(),
            })?;
            options = options.with_interpolation(regex);
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_for_file_derives_dir_and_id_and_shares_cache() {
        let base = Options::new().with_root("/srv").with_dir("/");
        let derived = base.for_file(Path::new("/config/app.json"));
        assert_eq!(derived.dir(), Some(Path::new("/config")));
        assert_eq!(derived.id(), Some(Path::new("/config/app.json")));
        assert_eq!(derived.root(), Some(Path::new("/srv")));
        assert_eq!(base.id(), None);

        derived.cache().insert(PathBuf::from("/x.json"), Value::Int(1));
        assert!(base.cache().contains(Path::new("/x.json")));
    }

    #[test]
    fn test_fill_locations_is_idempotent() {
        let mut options = Options::new().with_dir("/a");
        options.fill_locations(|| PathBuf::from("/root"), Path::new("/"));
        options.fill_locations(|| PathBuf::from("/other"), Path::new("/b"));
        assert_eq!(options.root(), Some(Path::new("/root")));
        assert_eq!(options.dir(), Some(Path::new("/a")));
    }

    #[test]
    fn test_config_into_options() {
        let config = OptionsConfig::from_json(&json!({
            "root": "/data",
            "scope": {"name": "world"},
            "interpolation": "#\\{(\\w+)\\}"
        }))
        .expect("valid config");
        let options = config.into_options().expect("valid options");
        assert_eq!(options.root(), Some(Path::new("/data")));
        assert_eq!(options.dir(), None);
        let scope = options.scope().expect("scope supplied");
        assert_eq!(scope.get("name").unwrap(), Some(Value::from("world")));
        assert!(options.interpolation().is_match("#{name}"));
    }

    #[test]
    fn test_config_rejects_bad_input() {
        assert!(OptionsConfig::from_json(&json!({"unknown": 1})).is_err());
        let scope_not_object = OptionsConfig {
            scope: Some(json!([1])),
            ..Default::default()
        };
        assert!(matches!(
            scope_not_object.into_options(),
            Err(CompileError::InvalidScope)
        ));
        let bad_pattern = OptionsConfig {
            interpolation: Some("(".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            bad_pattern.into_options(),
            Err(CompileError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_config_or_fills_missing_fields() {
        let merged = OptionsConfig {
            root: Some(PathBuf::from("/mine")),
            ..Default::default()
        }
        .or(OptionsConfig {
            root: Some(PathBuf::from("/theirs")),
            dir: Some(PathBuf::from("/sub")),
            ..Default::default()
        });
        assert_eq!(merged.root, Some(PathBuf::from("/mine")));
        assert_eq!(merged.dir, Some(PathBuf::from("/sub")));
    }
}

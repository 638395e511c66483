//! jsonex core crate.
//!
//! Compiles JSON documents with embedded markers into live value trees:
//!
//! - `{"$": "a + b"}` nested in a mapping becomes a lazy slot that re-evaluates
//!   on every read against the shared scope; at the root of a compile call it
//!   is evaluated once.
//! - `"Hello ${user.name}"` strings in mappings become lazy interpolations.
//! - `{"$require": "file.json"}` includes another compiled document, at most
//!   once per cache.
//! - `{"$extend": base, "$with": overrides}` merges compiled documents.
//!
//! Layers:
//!
//! - `value` + `scope`: shared container handles, lazy slots, name lookup.
//! - `reader` + `expr` + `vm`: the expression language.
//! - `binding`: lazy expression and interpolation slots.
//! - `rules` + `loader` + `copy`: marker rules, file loading, structural copy.
//! - `compiler` + `engine` + `options`: the recursive compiler and its entry
//!   points.
//!
//! Everything is single-threaded (`Rc`-based); a compiled tree is not `Send`.

pub mod binding;
pub mod compiler;
pub mod copy;
pub mod engine;
pub mod error;
pub mod expr;
pub mod loader;
pub mod options;
mod reader;
pub mod rules;
pub mod scope;
pub mod value;
pub mod vm;

pub use compiler::{EXPRESSION_KEY, NodePath, Segment};
pub use copy::{CopyOptions, copy, defaults, merge};
pub use engine::{Engine, compile_document};
pub use error::{CompileError, EvalError, EvalResult, ExprError, LoadError};
pub use expr::{Expr, Expression};
pub use loader::{FsLoader, Loader, MemoryLoader};
pub use options::{Cache, DEFAULT_INTERPOLATION, Options, OptionsConfig};
pub use rules::{EXTEND_KEY, REQUIRE_KEY, Rule, RuleInit, RuleOutcome, RuleRoutine, Rules, WITH_KEY};
pub use scope::{SELF_BINDING, Scope, ScopeSlot};
pub use value::{ArrayRef, ObjectRef, Slot, Value};
pub use vm::eval_expr;

/// Input documents are plain `serde_json` values.
pub type Document = serde_json::Value;

use crate::compiler::NodePath;
use std::path::PathBuf;
use thiserror::Error;

/// Result of reading a value out of a compiled document.
pub type EvalResult = Result<crate::Value, EvalError>;

/// Failure raised while a lazy slot (or an eager root expression) evaluates.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("property \"{key}\" is read-only")]
    ReadOnly { key: String },
    #[error("cyclic reference while evaluating {what}")]
    Cycle { what: String },
    #[error("the container bound to `_` no longer exists")]
    OwnerDropped,
    #[error("{0}")]
    Custom(String),
}

impl EvalError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Failure while tokenizing or parsing expression text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("unexpected character '{0}' at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number literal \"{0}\"")]
    InvalidNumber(String),
    #[error("unexpected token {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression must be a string, found {0}")]
    NotAString(&'static str),
}

/// Failure reported by a [`Loader`](crate::Loader).
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no document registered for {0}")]
    NotFound(PathBuf),
}

/// Fatal compilation failure. Compilation either fully succeeds or returns one
/// of these; no partial result is produced.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("argument #1 should be an object or an array")]
    InvalidInput,
    #[error("scope should be an object")]
    InvalidScope,
    #[error("invalid interpolation pattern \"{pattern}\": {reason}")]
    InvalidPattern { pattern: String, reason: String },
    #[error("rule \"{rule}\" has no routine")]
    MissingRoutine { rule: String },
    #[error("value of file \"{}\" is not an object or an array", path.display())]
    NotAnObject { path: PathBuf },
    #[error("failed to load \"{}\": {source}", path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: LoadError,
    },
    #[error("$require at {at} expects a relative path string")]
    InvalidRequire { at: NodePath },
    #[error("file \"{}\" requires itself", path.display())]
    CyclicRequire { path: PathBuf },
    #[error("invalid expression at {at}: {source}")]
    Expression {
        at: NodePath,
        #[source]
        source: ExprError,
    },
    #[error("failed to evaluate expression at {at}: {source}")]
    Eval {
        at: NodePath,
        #[source]
        source: EvalError,
    },
}

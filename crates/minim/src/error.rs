use std::{fmt, str::FromStr, sync::Arc};

use strum::{Display, EnumString, IntoStaticStr};

use crate::action::SourceLine;

/// Result type alias for evaluator operations that can halt with a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Runtime error taxonomy.
///
/// Errors are values, not exceptions: the evaluator halts the current frame
/// and threads one of these records up the call chain, where an `error` block
/// may catch it and convert it to a boolean or a descriptor pair.
///
/// Uses strum derives so the user-visible name of each kind (`arg_count`,
/// `index`, ...) is derived from the variant, and `except` can parse a
/// caller-supplied type string back into a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// Wrong number of arguments to a built-in or user function.
    ArgCount,
    /// An argument had an unsupported kind.
    ArgType,
    /// A name did not resolve in the frame chain.
    Undeclared,
    /// Container index or key out of range / missing.
    Index,
    /// Invalid, dangling, or foreign pointer dereference.
    Id,
    Type,
    Value,
    ZeroDivision,
    Regex,
    Json,
    /// Host/system facility failure (subprocess, environment, ...).
    Sys,
    File,
    Permission,
    /// Reader interrupt surfaced from the prompt collaborator.
    Interrupt,
    /// Unterminated string or other unrecoverable lexical failure.
    Lex,
    Todo,
}

impl ErrorKind {
    /// Parses a user-supplied type string, degrading to `Value` when the
    /// string names no known kind. Used by `except`.
    #[must_use]
    pub fn from_user(name: &str) -> Self {
        Self::from_str(name).unwrap_or(Self::Value)
    }
}

/// One runtime error: the kind, a human message, and the source line the
/// failing action was compiled from.
#[derive(Debug, Clone)]
pub struct RunError {
    pub kind: ErrorKind,
    pub message: String,
    /// Name of the action that failed (`'`, `+`, a builtin name, ...).
    pub action: String,
    pub source: Arc<SourceLine>,
    /// Whether a diagnostic was already printed for this error; set by the
    /// innermost frame that surfaced it so outer frames do not repeat it.
    pub(crate) reported: bool,
}

impl RunError {
    pub(crate) fn new(
        kind: ErrorKind,
        message: impl Into<String>,
        action: impl Into<String>,
        source: Arc<SourceLine>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            action: action.into(),
            source,
            reported: false,
        }
    }

    /// 1-based line number of the originating source line.
    #[must_use]
    pub fn line(&self) -> usize {
        self.source.number + 1
    }

    /// Whether the evaluator already printed a diagnostic for this error.
    /// Lexical failures surface without one, so drivers print those
    /// themselves.
    #[must_use]
    pub fn already_reported(&self) -> bool {
        self.reported
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Runtime error: {msg}\nLocation: line {line}\nAction: {action}\nType: {kind}\nLine:\n{src}",
            msg = self.message,
            line = self.line(),
            action = self.action,
            kind = self.kind,
            src = self.source.text,
        )
    }
}

impl std::error::Error for RunError {}

//! Template compile and render errors

use thiserror::Error;

/// Error raised while compiling a template. Always a configuration error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unterminated action starting at byte {0}")]
    UnterminatedAction(usize),

    #[error("unterminated comment starting at byte {0}")]
    UnterminatedComment(usize),

    #[error("unterminated string literal at byte {0}")]
    UnterminatedString(usize),

    #[error("invalid escape sequence '\\{0}' in string literal")]
    InvalidEscape(char),

    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unexpected {found} in action at byte {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("empty action at byte {0}")]
    EmptyAction(usize),

    #[error("unsupported action '{0}': templates cannot branch, loop or include other templates")]
    UnsupportedAction(String),

    #[error("unknown field '.{0}' (available: .SignalFxMetricName, .SignalFxLabels)")]
    UnknownField(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("function '{name}' expects {expected} argument(s), got {got}")]
    Arity {
        name: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("expression nested too deeply at byte {0}")]
    TooDeep(usize),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),
}

/// Error raised while rendering a compiled template against one data point.
///
/// Never fatal: the caller drops the data point and counts it as failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("label '{0}' is not present on the data point")]
    MissingLabel(String),
}

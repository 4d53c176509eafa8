//! Matcher compilation error types

use thiserror::Error;

/// Result type for matcher compilation
pub type Result<T> = std::result::Result<T, MatchError>;

/// Errors raised while compiling a `message_matcher` expression
#[derive(Debug, Error)]
pub enum MatchError {
    /// The expression was empty or all whitespace
    #[error("empty match expression")]
    Empty,

    /// A character the lexer does not recognize
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar {
        /// The offending character
        ch: char,
        /// Byte offset into the source
        offset: usize,
    },

    /// A quoted string was not closed
    #[error("unterminated string literal")]
    UnterminatedString,

    /// A `/regex/` literal was not closed
    #[error("unterminated regex literal")]
    UnterminatedRegex,

    /// A numeric literal failed to parse
    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    /// A field name that is not part of the message model
    #[error("unknown message field '{0}'")]
    UnknownField(String),

    /// The expression ended where more input was required
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// A token that cannot appear at this position
    #[error("unexpected token at position {0}")]
    UnexpectedToken(usize),

    /// Input remained after a complete expression
    #[error("trailing input after expression")]
    TrailingTokens,

    /// A regex literal failed to compile
    #[error("invalid regex: {0}")]
    Regex(#[from] regex::Error),

    /// Operator applied to a field of an incompatible type
    #[error("operator '{op}' cannot be applied to field '{field}'")]
    TypeMismatch {
        /// The operator, as written
        op: &'static str,
        /// The field name, as written
        field: String,
    },
}

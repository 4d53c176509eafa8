//! Relay - Matcher
//!
//! Compiled predicates over [`relay_message::Message`]. Every Filter and
//! Output declares its interest in messages with a `message_matcher`
//! expression; the router evaluates the compiled form against each message
//! it fans out.
//!
//! # Expression language
//!
//! ```text
//! Type == 'heartbeat' && Severity < 7
//! Logger =~ /^agent\./ || Fields[source] == 'tcp'
//! TRUE
//! ```
//!
//! - Envelope fields: `Type`, `Logger`, `Severity`, `Payload`, `Hostname`,
//!   `EnvVersion`, `Pid`, `Uuid`; dynamic fields as `Fields[name]`.
//! - Operators: `==` `!=` `<` `<=` `>` `>=`, regex `=~` `!~`, boolean
//!   `&&` `||` `!`, parentheses, literals `TRUE` / `FALSE`.
//! - Values: `'single'` or `"double"` quoted strings, integers, floats,
//!   `/regex/` literals.
//!
//! Compilation happens once at configuration load; evaluation allocates
//! only when the `Uuid` field is compared.

mod error;
mod lexer;
mod parser;

pub use error::{MatchError, Result};

use relay_message::Message;

use parser::Expr;

/// A compiled `message_matcher` predicate
///
/// # Example
///
/// ```
/// use relay_matcher::Matcher;
/// use relay_message::Message;
///
/// let matcher = Matcher::new("Type == 'counter' && Severity <= 6").unwrap();
///
/// let mut msg = Message::new();
/// msg.set_msg_type("counter");
/// msg.set_severity(5);
/// assert!(matcher.matches(&msg));
///
/// msg.set_severity(7);
/// assert!(!matcher.matches(&msg));
/// ```
pub struct Matcher {
    source: String,
    expr: Expr,
}

impl Matcher {
    /// Compile a match expression
    ///
    /// # Errors
    ///
    /// Returns [`MatchError`] on lexical, syntax or type errors, including
    /// invalid regex literals and unknown field names.
    pub fn new(source: &str) -> Result<Matcher> {
        let tokens = lexer::lex(source)?;
        let expr = parser::parse(&tokens)?;
        Ok(Matcher {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate the predicate against a message
    #[inline]
    pub fn matches(&self, msg: &Message) -> bool {
        self.expr.eval(msg)
    }

    /// The original expression source
    #[inline]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl std::fmt::Debug for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Matcher").field("source", &self.source).finish()
    }
}

impl std::fmt::Display for Matcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

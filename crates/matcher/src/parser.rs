//! Parser and evaluator for match expressions
//!
//! Standard recursive descent with `||` binding loosest, then `&&`, then
//! `!`. Type mismatches between a field and its comparison value are
//! compile-time errors; comparisons against fields absent from a message
//! evaluate to false.

use regex::Regex;
use relay_message::{FieldValue, Message};

use crate::error::{MatchError, Result};
use crate::lexer::Token;

#[derive(Debug)]
pub(crate) enum Expr {
    True,
    False,
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Cmp {
        field: Field,
        op: CmpOp,
        value: CmpValue,
    },
    ReMatch {
        field: Field,
        regex: Regex,
        negated: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Field {
    Type,
    Logger,
    Severity,
    Payload,
    Hostname,
    EnvVersion,
    Pid,
    Uuid,
    Dynamic(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CmpValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Field {
    fn from_name(name: &str) -> Option<Field> {
        match name {
            "Type" => Some(Field::Type),
            "Logger" => Some(Field::Logger),
            "Severity" => Some(Field::Severity),
            "Payload" => Some(Field::Payload),
            "Hostname" => Some(Field::Hostname),
            "EnvVersion" => Some(Field::EnvVersion),
            "Pid" => Some(Field::Pid),
            "Uuid" => Some(Field::Uuid),
            _ => None,
        }
    }

    fn name(&self) -> String {
        match self {
            Field::Type => "Type".into(),
            Field::Logger => "Logger".into(),
            Field::Severity => "Severity".into(),
            Field::Payload => "Payload".into(),
            Field::Hostname => "Hostname".into(),
            Field::EnvVersion => "EnvVersion".into(),
            Field::Pid => "Pid".into(),
            Field::Uuid => "Uuid".into(),
            Field::Dynamic(name) => format!("Fields[{name}]"),
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Field::Severity | Field::Pid)
    }

    fn is_string(&self) -> bool {
        matches!(
            self,
            Field::Type
                | Field::Logger
                | Field::Payload
                | Field::Hostname
                | Field::EnvVersion
                | Field::Uuid
        )
    }
}

pub(crate) fn parse(tokens: &[Token]) -> Result<Expr> {
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if parser.pos != tokens.len() {
        return Err(MatchError::TrailingTokens);
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<&'a Token> {
        let token = self.tokens.get(self.pos).ok_or(MatchError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        let pos = self.pos;
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(MatchError::UnexpectedToken(pos))
        }
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let pos = self.pos;
        match self.next()? {
            Token::True => Ok(Expr::True),
            Token::False => Ok(Expr::False),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => {
                let field = self.parse_field(name)?;
                self.parse_comparison(field)
            }
            _ => Err(MatchError::UnexpectedToken(pos)),
        }
    }

    fn parse_field(&mut self, name: &str) -> Result<Field> {
        if name == "Fields" {
            self.expect(&Token::LBracket)?;
            let pos = self.pos;
            let key = match self.next()? {
                Token::Ident(key) => key.clone(),
                Token::Str(key) => key.clone(),
                _ => return Err(MatchError::UnexpectedToken(pos)),
            };
            self.expect(&Token::RBracket)?;
            return Ok(Field::Dynamic(key));
        }
        Field::from_name(name).ok_or_else(|| MatchError::UnknownField(name.to_string()))
    }

    fn parse_comparison(&mut self, field: Field) -> Result<Expr> {
        let pos = self.pos;
        let op = match self.next()? {
            Token::Eq => CmpOp::Eq,
            Token::Ne => CmpOp::Ne,
            Token::Lt => CmpOp::Lt,
            Token::Le => CmpOp::Le,
            Token::Gt => CmpOp::Gt,
            Token::Ge => CmpOp::Ge,
            Token::ReMatch => return self.parse_regex(field, false),
            Token::ReNotMatch => return self.parse_regex(field, true),
            _ => return Err(MatchError::UnexpectedToken(pos)),
        };

        let pos = self.pos;
        let value = match self.next()? {
            Token::Str(s) => CmpValue::Str(s.clone()),
            Token::Int(i) => CmpValue::Int(*i),
            Token::Float(f) => CmpValue::Float(*f),
            _ => return Err(MatchError::UnexpectedToken(pos)),
        };

        // Static fields have known types; mismatches are compile errors.
        if field.is_numeric() && matches!(value, CmpValue::Str(_)) {
            return Err(MatchError::TypeMismatch {
                op: op.symbol(),
                field: field.name(),
            });
        }
        if field.is_string() && !matches!(value, CmpValue::Str(_)) {
            return Err(MatchError::TypeMismatch {
                op: op.symbol(),
                field: field.name(),
            });
        }

        Ok(Expr::Cmp { field, op, value })
    }

    fn parse_regex(&mut self, field: Field, negated: bool) -> Result<Expr> {
        if field.is_numeric() {
            return Err(MatchError::TypeMismatch {
                op: if negated { "!~" } else { "=~" },
                field: field.name(),
            });
        }
        let pos = self.pos;
        let pattern = match self.next()? {
            Token::Regex(p) => p.clone(),
            Token::Str(p) => p.clone(),
            _ => return Err(MatchError::UnexpectedToken(pos)),
        };
        let regex = Regex::new(&pattern)?;
        Ok(Expr::ReMatch {
            field,
            regex,
            negated,
        })
    }
}

impl CmpOp {
    fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    fn compare<T: PartialOrd>(&self, left: T, right: T) -> bool {
        match self {
            CmpOp::Eq => left == right,
            CmpOp::Ne => left != right,
            CmpOp::Lt => left < right,
            CmpOp::Le => left <= right,
            CmpOp::Gt => left > right,
            CmpOp::Ge => left >= right,
        }
    }
}

/// A field value resolved against a concrete message
enum Resolved<'a> {
    Str(&'a str),
    OwnedStr(String),
    Int(i64),
    Float(f64),
    Missing,
}

impl Field {
    fn resolve<'a>(&self, msg: &'a Message) -> Resolved<'a> {
        match self {
            Field::Type => msg.msg_type().map_or(Resolved::Missing, Resolved::Str),
            Field::Logger => msg.logger().map_or(Resolved::Missing, Resolved::Str),
            Field::Severity => Resolved::Int(msg.severity() as i64),
            Field::Payload => Resolved::Str(msg.payload()),
            Field::Hostname => msg.hostname().map_or(Resolved::Missing, Resolved::Str),
            Field::EnvVersion => msg.env_version().map_or(Resolved::Missing, Resolved::Str),
            Field::Pid => Resolved::Int(msg.pid() as i64),
            Field::Uuid => msg
                .uuid()
                .map_or(Resolved::Missing, |u| Resolved::OwnedStr(u.to_string())),
            Field::Dynamic(name) => match msg.field(name) {
                Some(FieldValue::String(s)) => Resolved::Str(s),
                Some(FieldValue::Int(i)) => Resolved::Int(*i),
                Some(FieldValue::Float(f)) => Resolved::Float(*f),
                _ => Resolved::Missing,
            },
        }
    }
}

impl Expr {
    pub(crate) fn eval(&self, msg: &Message) -> bool {
        match self {
            Expr::True => true,
            Expr::False => false,
            Expr::Not(inner) => !inner.eval(msg),
            Expr::And(left, right) => left.eval(msg) && right.eval(msg),
            Expr::Or(left, right) => left.eval(msg) || right.eval(msg),
            Expr::Cmp { field, op, value } => match (field.resolve(msg), value) {
                (Resolved::Str(actual), CmpValue::Str(expected)) => {
                    op.compare(actual, expected.as_str())
                }
                (Resolved::OwnedStr(actual), CmpValue::Str(expected)) => {
                    op.compare(actual.as_str(), expected.as_str())
                }
                (Resolved::Int(actual), CmpValue::Int(expected)) => op.compare(actual, *expected),
                (Resolved::Int(actual), CmpValue::Float(expected)) => {
                    op.compare(actual as f64, *expected)
                }
                (Resolved::Float(actual), CmpValue::Int(expected)) => {
                    op.compare(actual, *expected as f64)
                }
                (Resolved::Float(actual), CmpValue::Float(expected)) => {
                    op.compare(actual, *expected)
                }
                _ => false,
            },
            Expr::ReMatch {
                field,
                regex,
                negated,
            } => {
                let matched = match field.resolve(msg) {
                    Resolved::Str(s) => regex.is_match(s),
                    Resolved::OwnedStr(s) => regex.is_match(&s),
                    _ => return false,
                };
                matched != *negated
            }
        }
    }
}

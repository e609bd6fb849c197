//! Closed expression language for item and assignment conditions.
//!
//! Expressions are evaluated against a JSON context of the form
//! `{ "params": { .. }, "data": <payload> }`.
//!
//! Supported syntax:
//! - Comparisons: `==`, `!=`, `>`, `<`, `>=`, `<=`
//! - Boolean operators: `&&`, `||`, `!` (`&&` and `||` short-circuit)
//! - Membership: `x in list`, `"key" in object`
//! - Dot-path access: `params.ownerId`, `data.limits.max`
//! - Literals: integers, floats (optionally negative), `"strings"`, `true`,
//!   `false`, `null`, `[array, literals]`
//! - Parentheses for grouping

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::errors::RbacError;

/// A compiled predicate attached to an item or an assignment.
///
/// The text form is either an expression (see module docs) or `@name`, a
/// reference to a native rule registered with [`crate::rules::RuleRegistry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Condition {
    Expression { source: String, expr: Expr },
    Rule(String),
}

impl Condition {
    pub fn parse(text: &str) -> Result<Self, RbacError> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix('@') {
            let valid = !name.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-');
            if !valid {
                return Err(RbacError::InvalidCondition(format!(
                    "invalid rule reference `{text}`"
                )));
            }
            return Ok(Condition::Rule(name.to_string()));
        }
        let expr = parse_expression(text)?;
        Ok(Condition::Expression {
            source: text.to_string(),
            expr,
        })
    }

    /// Parse optional condition text; blank text means "no condition".
    pub fn parse_optional(text: Option<&str>) -> Result<Option<Self>, RbacError> {
        match text.map(str::trim) {
            None | Some("") => Ok(None),
            Some(t) => Self::parse(t).map(Some),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Expression { source, .. } => f.write_str(source),
            Condition::Rule(name) => write!(f, "@{name}"),
        }
    }
}

impl TryFrom<String> for Condition {
    type Error = RbacError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Condition::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.to_string()
    }
}

// ─── AST ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Path(Vec<String>),
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    In {
        element: Box<Expr>,
        collection: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
}

// ─── Lexer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Str(String),
    True,
    False,
    Null,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Cmp(CmpOp),
    And,
    Or,
    Not,
    In,
}

fn tokenize(input: &str) -> Result<Vec<Token>, RbacError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    let next_is = |i: usize, c: char| chars.get(i + 1) == Some(&c);

    while i < chars.len() {
        let c = chars[i];
        let (token, width) = match c {
            c if c.is_whitespace() => {
                i += 1;
                continue;
            }
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '=' if next_is(i, '=') => (Token::Cmp(CmpOp::Eq), 2),
            '!' if next_is(i, '=') => (Token::Cmp(CmpOp::Ne), 2),
            '!' => (Token::Not, 1),
            '>' if next_is(i, '=') => (Token::Cmp(CmpOp::Ge), 2),
            '>' => (Token::Cmp(CmpOp::Gt), 1),
            '<' if next_is(i, '=') => (Token::Cmp(CmpOp::Le), 2),
            '<' => (Token::Cmp(CmpOp::Lt), 1),
            '&' if next_is(i, '&') => (Token::And, 2),
            '|' if next_is(i, '|') => (Token::Or, 2),
            '"' => {
                let (s, end) = lex_string(&chars, i + 1)?;
                tokens.push(Token::Str(s));
                i = end;
                continue;
            }
            '-' if chars.get(i + 1).is_some_and(|d| d.is_ascii_digit()) => {
                let (n, end) = lex_number(&chars, i)?;
                tokens.push(Token::Number(n));
                i = end;
                continue;
            }
            c if c.is_ascii_digit() => {
                let (n, end) = lex_number(&chars, i)?;
                tokens.push(Token::Number(n));
                i = end;
                continue;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                });
                continue;
            }
            other => {
                return Err(RbacError::InvalidCondition(format!(
                    "unexpected character `{other}`"
                )));
            }
        };
        tokens.push(token);
        i += width;
    }
    Ok(tokens)
}

/// Lex a string body starting after the opening quote. Returns the unescaped
/// contents and the index just past the closing quote.
fn lex_string(chars: &[char], mut i: usize) -> Result<(String, usize), RbacError> {
    let mut out = String::new();
    while i < chars.len() {
        match chars[i] {
            '"' => return Ok((out, i + 1)),
            '\\' => {
                let escaped = chars.get(i + 1).ok_or_else(|| {
                    RbacError::InvalidCondition("unterminated string literal".into())
                })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => *other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(RbacError::InvalidCondition(
        "unterminated string literal".into(),
    ))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Value, usize), RbacError> {
    let mut i = start + 1;
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        i += 1;
    }
    let text: String = chars[start..i].iter().collect();
    let value = if text.contains('.') {
        let f: f64 = text
            .parse()
            .map_err(|_| RbacError::InvalidCondition(format!("invalid float `{text}`")))?;
        serde_json::Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| RbacError::InvalidCondition(format!("invalid float `{text}`")))?
    } else {
        let n: i64 = text
            .parse()
            .map_err(|_| RbacError::InvalidCondition(format!("invalid integer `{text}`")))?;
        Value::from(n)
    };
    Ok((value, i))
}

// ─── Parser ─────────────────────────────────────────────────────────────

/// Deepest nesting of parentheses, list literals and `!` accepted.
const MAX_NESTING: usize = 64;
/// Longest expression accepted, in tokens. Bounds the depth of `&&`/`||` chains.
const MAX_TOKENS: usize = 512;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// or_expr = and_expr ("||" and_expr)*
    fn parse_or(&mut self) -> Result<Expr, RbacError> {
        let mut left = self.parse_and()?;
        while self.eat(&Token::Or) {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// and_expr = comparison ("&&" comparison)*
    fn parse_and(&mut self) -> Result<Expr, RbacError> {
        let mut left = self.parse_comparison()?;
        while self.eat(&Token::And) {
            let right = self.parse_comparison()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    /// comparison = unary ((cmp_op | "in") unary)?
    fn parse_comparison(&mut self) -> Result<Expr, RbacError> {
        let left = self.parse_unary()?;
        match self.peek().cloned() {
            Some(Token::Cmp(op)) => {
                self.advance();
                let right = self.parse_unary()?;
                Ok(Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
            Some(Token::In) => {
                self.advance();
                let right = self.parse_unary()?;
                Ok(Expr::In {
                    element: Box::new(left),
                    collection: Box::new(right),
                })
            }
            _ => Ok(left),
        }
    }

    /// unary = "!" unary | primary
    fn parse_unary(&mut self) -> Result<Expr, RbacError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(RbacError::InvalidCondition(
                "expression nested too deeply".into(),
            ));
        }
        let expr = self.parse_unary_inner();
        self.depth -= 1;
        expr
    }

    fn parse_unary_inner(&mut self) -> Result<Expr, RbacError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    /// primary = literal | path | list | "(" or_expr ")"
    fn parse_primary(&mut self) -> Result<Expr, RbacError> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(n)),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(Token::Null) => Ok(Expr::Literal(Value::Null)),
            Some(Token::Ident(root)) => {
                let mut path = vec![root];
                while self.eat(&Token::Dot) {
                    match self.advance() {
                        Some(Token::Ident(seg)) => path.push(seg),
                        _ => {
                            return Err(RbacError::InvalidCondition(
                                "expected identifier after `.`".into(),
                            ));
                        }
                    }
                }
                Ok(Expr::Path(path))
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::List(items));
                }
                loop {
                    items.push(self.parse_unary()?);
                    if self.eat(&Token::RBracket) {
                        return Ok(Expr::List(items));
                    }
                    if !self.eat(&Token::Comma) {
                        return Err(RbacError::InvalidCondition(
                            "expected `,` or `]` in list literal".into(),
                        ));
                    }
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                if !self.eat(&Token::RParen) {
                    return Err(RbacError::InvalidCondition(
                        "expected closing parenthesis `)`".into(),
                    ));
                }
                Ok(expr)
            }
            other => Err(RbacError::InvalidCondition(format!(
                "unexpected token: {other:?}"
            ))),
        }
    }
}

/// Parse an expression string into an AST.
pub fn parse_expression(input: &str) -> Result<Expr, RbacError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(RbacError::InvalidCondition("empty expression".into()));
    }
    if tokens.len() > MAX_TOKENS {
        return Err(RbacError::InvalidCondition(format!(
            "expression too long ({} tokens, at most {MAX_TOKENS})",
            tokens.len()
        )));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_or()?;
    if let Some(trailing) = parser.peek() {
        return Err(RbacError::InvalidCondition(format!(
            "unexpected trailing token: {trailing:?}"
        )));
    }
    Ok(expr)
}

// ─── Evaluator ──────────────────────────────────────────────────────────

/// Raised when a well-formed expression cannot be evaluated against a context.
#[derive(Debug, Error, PartialEq)]
#[error("{0}")]
pub struct EvalError(String);

/// Evaluate an expression against a JSON context.
/// Returns `true` if the condition is satisfied.
pub fn evaluate(expr: &Expr, context: &Value) -> Result<bool, EvalError> {
    match eval_value(expr, context)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError(format!(
            "condition must evaluate to a boolean, got `{other}`"
        ))),
    }
}

fn eval_bool(expr: &Expr, context: &Value, op: &str) -> Result<bool, EvalError> {
    match eval_value(expr, context)? {
        Value::Bool(b) => Ok(b),
        _ => Err(EvalError(format!("`{op}` requires boolean operands"))),
    }
}

fn eval_value(expr: &Expr, context: &Value) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::List(items) => items
            .iter()
            .map(|e| eval_value(e, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Path(segments) => {
            let mut current = context;
            for seg in segments {
                current = match current.get(seg.as_str()) {
                    Some(v) => v,
                    None => return Ok(Value::Null),
                };
            }
            Ok(current.clone())
        }
        Expr::Not(inner) => Ok(Value::Bool(!eval_bool(inner, context, "!")?)),
        Expr::And(l, r) => Ok(Value::Bool(
            eval_bool(l, context, "&&")? && eval_bool(r, context, "&&")?,
        )),
        Expr::Or(l, r) => Ok(Value::Bool(
            eval_bool(l, context, "||")? || eval_bool(r, context, "||")?,
        )),
        Expr::In {
            element,
            collection,
        } => {
            let elem = eval_value(element, context)?;
            match eval_value(collection, context)? {
                Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| loose_eq(i, &elem)))),
                Value::Object(map) => match elem {
                    Value::String(key) => Ok(Value::Bool(map.contains_key(&key))),
                    _ => Err(EvalError(
                        "`in` on an object requires a string key on the left side".into(),
                    )),
                },
                Value::Null => Ok(Value::Bool(false)),
                _ => Err(EvalError(
                    "`in` operator requires an array or object on the right side".into(),
                )),
            }
        }
        Expr::Compare { op, left, right } => {
            let l = eval_value(left, context)?;
            let r = eval_value(right, context)?;
            let result = match op {
                CmpOp::Eq => loose_eq(&l, &r),
                CmpOp::Ne => !loose_eq(&l, &r),
                CmpOp::Gt | CmpOp::Lt | CmpOp::Ge | CmpOp::Le => {
                    let ordering = match (&l, &r) {
                        (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                        _ => match (l.as_f64(), r.as_f64()) {
                            (Some(a), Some(b)) => a.partial_cmp(&b),
                            _ => {
                                return Err(EvalError(
                                    "ordering comparison requires two numbers or two strings"
                                        .into(),
                                ))
                            }
                        },
                    };
                    let Some(ordering) = ordering else {
                        return Ok(Value::Bool(false));
                    };
                    match op {
                        CmpOp::Gt => ordering.is_gt(),
                        CmpOp::Lt => ordering.is_lt(),
                        CmpOp::Ge => ordering.is_ge(),
                        _ => ordering.is_le(),
                    }
                }
            };
            Ok(Value::Bool(result))
        }
    }
}

/// Equality that treats `1` and `1.0` as the same number.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        _ => a == b,
    }
}

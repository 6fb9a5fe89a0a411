//! CEL-style expression language.
//!
//! Supported forms:
//!
//! - literals: `1`, `2.5`, `"text"`, `'text'`, `true`, `false`, `null`, `[1, 2]`, `{"k": 1}`
//! - references: `clusterStatus.phase`, `items[0]`, `labels["app"]`
//! - operators, lowest precedence first: `?:`, `||`, `&&`, `== != < <= > >= in`, `+ -`, `* / %`, unary `! -`
//! - functions: `has(a.b)`, `size(x)`, `int(x)`, `double(x)`, `string(x)`, `bool(x)`, `matches(s, re)`
//! - methods: `s.startsWith(p)`, `s.endsWith(p)`, `s.contains(p)`, `s.matches(re)`, `s.lowerAscii()`,
//!   `s.upperAscii()`, `s.trim()`, `x.size()`
//! - macros: `list.exists(v, pred)`, `list.all(v, pred)`, `list.exists_one(v, pred)`,
//!   `list.filter(v, pred)`, `list.map(v, expr)`
//!
//! Referencing a missing field is an error; use `has()` to probe optional fields.
//! `&&` and `||` absorb an error on one side when the other side decides the result.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Number, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    #[error("syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("undeclared reference to '{0}'")]
    UndeclaredReference(String),

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("no matching overload for '{operation}' applied to ({operands})")]
    NoMatchingOverload { operation: String, operands: String },

    #[error("{0}")]
    Invalid(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow")]
    Overflow,
}

impl ExpressionError {
    fn overload(operation: &str, operands: &[&Value]) -> Self {
        ExpressionError::NoMatchingOverload {
            operation: operation.to_string(),
            operands: operands.iter().map(|value| type_name(value)).collect::<Vec<_>>().join(", "),
        }
    }

    /// True when the error came from a reference that does not resolve.
    pub fn is_missing_reference(&self) -> bool {
        matches!(self, ExpressionError::NoSuchKey(_) | ExpressionError::UndeclaredReference(_))
    }
}

/// A parsed expression, reusable across evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Expr,
}

impl Expression {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let tokens = lex(source)?;
        let mut parser = Parser {
            tokens,
            position: 0,
            end: source.len(),
        };
        let root = parser.parse_expression()?;
        if let Some(token) = parser.peek() {
            return Err(ExpressionError::Syntax {
                offset: token.offset,
                message: format!("unexpected {}", token.kind.describe()),
            });
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, vars: &Map<String, Value>) -> Result<Value, ExpressionError> {
        let mut environment = Environment { vars, locals: Vec::new() };
        environment.eval(&self.root)
    }
}

/// Parses and evaluates `source` in one step.
pub fn evaluate(source: &str, vars: &Map<String, Value>) -> Result<Value, ExpressionError> {
    Expression::parse(source)?.evaluate(vars)
}

/// Equality with numeric normalization (`1 == 1.0`), applied recursively.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a == b,
            _ => a.as_f64() == b.as_f64(),
        },
        (Value::Array(a), Value::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y)),
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(key, x)| b.get(key).is_some_and(|y| values_equal(x, y)))
        }
        _ => left == right,
    }
}

/// CEL-flavoured type name used in error messages.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(number) if number.is_f64() => "double",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Symbol(&'static str),
}

impl TokenKind {
    fn describe(&self) -> String {
        match self {
            TokenKind::Int(value) => format!("integer {value}"),
            TokenKind::Float(value) => format!("number {value}"),
            TokenKind::Str(value) => format!("string {value:?}"),
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Symbol(symbol) => format!("'{symbol}'"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

const TWO_CHAR_SYMBOLS: [&str; 6] = ["==", "!=", "<=", ">=", "&&", "||"];
const ONE_CHAR_SYMBOLS: [&str; 19] = ["(", ")", "[", "]", "{", "}", ".", ",", ":", "?", "!", "-", "+", "*", "/", "%", "<", ">", "="];

fn lex(source: &str) -> Result<Vec<Token>, ExpressionError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let offset = i;
        if c == b'"' || c == b'\'' {
            let (text, next) = lex_string(source, i)?;
            tokens.push(Token {
                kind: TokenKind::Str(text),
                offset,
            });
            i = next;
            continue;
        }
        if c.is_ascii_digit() {
            let mut end = i;
            let mut is_float = false;
            while end < bytes.len() && bytes[end].is_ascii_digit() {
                end += 1;
            }
            if end + 1 < bytes.len() && bytes[end] == b'.' && bytes[end + 1].is_ascii_digit() {
                is_float = true;
                end += 1;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
            }
            if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
                let mut exponent_end = end + 1;
                if exponent_end < bytes.len() && (bytes[exponent_end] == b'+' || bytes[exponent_end] == b'-') {
                    exponent_end += 1;
                }
                if exponent_end < bytes.len() && bytes[exponent_end].is_ascii_digit() {
                    is_float = true;
                    end = exponent_end;
                    while end < bytes.len() && bytes[end].is_ascii_digit() {
                        end += 1;
                    }
                }
            }
            let text = &source[i..end];
            let kind = if is_float {
                TokenKind::Float(text.parse().map_err(|_| syntax(offset, format!("invalid number '{text}'")))?)
            } else {
                TokenKind::Int(text.parse().map_err(|_| syntax(offset, format!("integer literal '{text}' out of range")))?)
            };
            tokens.push(Token { kind, offset });
            i = end;
            continue;
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            let mut end = i;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(source[i..end].to_string()),
                offset,
            });
            i = end;
            continue;
        }
        if let Some(symbol) = TWO_CHAR_SYMBOLS.iter().find(|symbol| source[i..].starts_with(**symbol)) {
            tokens.push(Token {
                kind: TokenKind::Symbol(*symbol),
                offset,
            });
            i += 2;
            continue;
        }
        if let Some(symbol) = ONE_CHAR_SYMBOLS.iter().find(|symbol| symbol.as_bytes()[0] == c) {
            if *symbol == "=" {
                return Err(syntax(offset, "unexpected '=' (use '==' for equality)"));
            }
            tokens.push(Token {
                kind: TokenKind::Symbol(*symbol),
                offset,
            });
            i += 1;
            continue;
        }
        let unexpected = source[i..].chars().next().unwrap_or('?');
        return Err(syntax(offset, format!("unexpected character '{unexpected}'")));
    }
    Ok(tokens)
}

fn lex_string(source: &str, start: usize) -> Result<(String, usize), ExpressionError> {
    let mut chars = source[start..].char_indices();
    let Some((_, quote)) = chars.next() else {
        return Err(syntax(start, "expected string"));
    };
    let mut text = String::new();
    while let Some((index, c)) = chars.next() {
        match c {
            c if c == quote => return Ok((text, start + index + c.len_utf8())),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                text.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
            other => text.push(other),
        }
    }
    Err(syntax(start, "unterminated string literal"))
}

fn syntax(offset: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Syntax {
        offset,
        message: message.into(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Not,
    Negate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Or,
    And,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    In,
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Remainder => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Ident(String),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    List(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
}

impl Expr {
    /// Human-readable reference path, used in missing-key errors.
    fn path(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Member(target, field) => format!("{}.{field}", target.path()),
            Expr::Index(target, _) => format!("{}[..]", target.path()),
            _ => "<expr>".to_string(),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn offset(&self) -> usize {
        self.peek().map(|token| token.offset).unwrap_or(self.end)
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token { kind: TokenKind::Symbol(found), .. }) if *found == symbol) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ExpressionError> {
        if self.eat_symbol(symbol) {
            return Ok(());
        }
        let found = self.peek().map(|token| token.kind.describe()).unwrap_or_else(|| "end of input".into());
        Err(syntax(self.offset(), format!("expected '{symbol}', found {found}")))
    }

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        let condition = self.parse_or()?;
        if self.eat_symbol("?") {
            let then_branch = self.parse_expression()?;
            self.expect_symbol(":")?;
            let else_branch = self.parse_expression()?;
            return Ok(Expr::Conditional(Box::new(condition), Box::new(then_branch), Box::new(else_branch)));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and()?;
        while self.eat_symbol("||") {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_relation()?;
        while self.eat_symbol("&&") {
            let right = self.parse_relation()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_relation(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_additive()?;
        loop {
            let op = match self.peek().map(|token| &token.kind) {
                Some(TokenKind::Symbol("==")) => BinaryOp::Equal,
                Some(TokenKind::Symbol("!=")) => BinaryOp::NotEqual,
                Some(TokenKind::Symbol("<")) => BinaryOp::Less,
                Some(TokenKind::Symbol("<=")) => BinaryOp::LessEqual,
                Some(TokenKind::Symbol(">")) => BinaryOp::Greater,
                Some(TokenKind::Symbol(">=")) => BinaryOp::GreaterEqual,
                Some(TokenKind::Ident(word)) if word == "in" => BinaryOp::In,
                _ => return Ok(left),
            };
            self.position += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Subtract
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Multiply
            } else if self.eat_symbol("/") {
                BinaryOp::Divide
            } else if self.eat_symbol("%") {
                BinaryOp::Remainder
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat_symbol("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)));
        }
        if self.eat_symbol("-") {
            return Ok(Expr::Unary(UnaryOp::Negate, Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_symbol(".") {
                let offset = self.offset();
                let Some(Token {
                    kind: TokenKind::Ident(name), ..
                }) = self.peek().cloned()
                else {
                    return Err(syntax(offset, "expected field or method name after '.'"));
                };
                self.position += 1;
                if self.eat_symbol("(") {
                    let args = self.parse_arguments(")")?;
                    expr = Expr::Call {
                        target: Some(Box::new(expr)),
                        name,
                        args,
                    };
                } else {
                    expr = Expr::Member(Box::new(expr), name);
                }
            } else if self.eat_symbol("[") {
                let index = self.parse_expression()?;
                self.expect_symbol("]")?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_arguments(&mut self, close: &str) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat_symbol(close) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if self.eat_symbol(close) {
                return Ok(args);
            }
            self.expect_symbol(",")?;
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.offset();
        let Some(token) = self.peek().cloned() else {
            return Err(syntax(offset, "unexpected end of expression"));
        };
        self.position += 1;
        match token.kind {
            TokenKind::Int(value) => Ok(Expr::Literal(Value::Number(value.into()))),
            TokenKind::Float(value) => Number::from_f64(value)
                .map(|number| Expr::Literal(Value::Number(number)))
                .ok_or_else(|| syntax(offset, "non-finite number literal")),
            TokenKind::Str(text) => Ok(Expr::Literal(Value::String(text))),
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ if self.eat_symbol("(") => {
                    let args = self.parse_arguments(")")?;
                    Ok(Expr::Call { target: None, name, args })
                }
                _ => Ok(Expr::Ident(name)),
            },
            TokenKind::Symbol("(") => {
                let inner = self.parse_expression()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Symbol("[") => Ok(Expr::List(self.parse_arguments("]")?)),
            TokenKind::Symbol("{") => {
                let mut entries = Vec::new();
                if self.eat_symbol("}") {
                    return Ok(Expr::Map(entries));
                }
                loop {
                    let key = self.parse_expression()?;
                    self.expect_symbol(":")?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if self.eat_symbol("}") {
                        return Ok(Expr::Map(entries));
                    }
                    self.expect_symbol(",")?;
                }
            }
            other => Err(syntax(offset, format!("unexpected {}", other.describe()))),
        }
    }
}

struct Environment<'a> {
    vars: &'a Map<String, Value>,
    locals: Vec<(String, Value)>,
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        let Value::Number(number) = value else {
            return None;
        };
        number.as_i64().map(Num::Int).or_else(|| number.as_f64().map(Num::Float))
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(value) => value as f64,
            Num::Float(value) => value,
        }
    }
}

fn float_value(value: f64) -> Result<Value, ExpressionError> {
    Number::from_f64(value)
        .map(Value::Number)
        .ok_or_else(|| ExpressionError::Invalid("result is not a finite number".into()))
}

fn int_value(value: Option<i64>) -> Result<Value, ExpressionError> {
    value.map(|integer| Value::Number(integer.into())).ok_or(ExpressionError::Overflow)
}

impl Environment<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, ExpressionError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.resolve(name),
            Expr::Member(target, field) => {
                let target_value = self.eval(target)?;
                match target_value {
                    Value::Object(mut map) => map.remove(field).ok_or_else(|| ExpressionError::NoSuchKey(expr.path())),
                    other => Err(ExpressionError::NoMatchingOverload {
                        operation: format!(".{field}"),
                        operands: type_name(&other).to_string(),
                    }),
                }
            }
            Expr::Index(target, index) => {
                let target_value = self.eval(target)?;
                let index_value = self.eval(index)?;
                index_into(target_value, &index_value, expr)
            }
            Expr::Call { target, name, args } => self.call(target.as_deref(), name, args),
            Expr::Unary(op, operand) => {
                let value = self.eval(operand)?;
                match (op, &value) {
                    (UnaryOp::Not, Value::Bool(flag)) => Ok(Value::Bool(!flag)),
                    (UnaryOp::Negate, _) => match Num::of(&value) {
                        Some(Num::Int(integer)) => int_value(integer.checked_neg()),
                        Some(Num::Float(float)) => float_value(-float),
                        None => Err(ExpressionError::overload("-", &[&value])),
                    },
                    (UnaryOp::Not, _) => Err(ExpressionError::overload("!", &[&value])),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => self.logical(left, right, false),
            Expr::Binary(BinaryOp::Or, left, right) => self.logical(left, right, true),
            Expr::Binary(op, left, right) => {
                let left_value = self.eval(left)?;
                let right_value = self.eval(right)?;
                binary(*op, &left_value, &right_value)
            }
            Expr::Conditional(condition, then_branch, else_branch) => match self.eval(condition)? {
                Value::Bool(true) => self.eval(then_branch),
                Value::Bool(false) => self.eval(else_branch),
                other => Err(ExpressionError::overload("?:", &[&other])),
            },
            Expr::List(items) => items.iter().map(|item| self.eval(item)).collect::<Result<Vec<_>, _>>().map(Value::Array),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::String(text) => text,
                        other => return Err(ExpressionError::overload("map key", &[&other])),
                    };
                    let value = self.eval(value)?;
                    map.insert(key, value);
                }
                Ok(Value::Object(map))
            }
        }
    }

    fn resolve(&self, name: &str) -> Result<Value, ExpressionError> {
        if let Some((_, value)) = self.locals.iter().rev().find(|(local, _)| local == name) {
            return Ok(value.clone());
        }
        self.vars
            .get(name)
            .cloned()
            .ok_or_else(|| ExpressionError::UndeclaredReference(name.to_string()))
    }

    /// `&&` when `short_circuit_on` is false, `||` when true.
    fn logical(&mut self, left: &Expr, right: &Expr, short_circuit_on: bool) -> Result<Value, ExpressionError> {
        let symbol = if short_circuit_on { "||" } else { "&&" };
        match self.eval(left) {
            Ok(Value::Bool(flag)) if flag == short_circuit_on => Ok(Value::Bool(flag)),
            Ok(Value::Bool(_)) => match self.eval(right)? {
                Value::Bool(flag) => Ok(Value::Bool(flag)),
                other => Err(ExpressionError::overload(symbol, &[&Value::Bool(!short_circuit_on), &other])),
            },
            Ok(other) => Err(ExpressionError::overload(symbol, &[&other])),
            Err(error) => match self.eval(right) {
                Ok(Value::Bool(flag)) if flag == short_circuit_on => Ok(Value::Bool(flag)),
                _ => Err(error),
            },
        }
    }

    fn call(&mut self, target: Option<&Expr>, name: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        if let Some(target) = target
            && matches!(name, "exists" | "all" | "exists_one" | "filter" | "map")
        {
            return self.comprehension(target, name, args);
        }
        if target.is_none() && name == "has" {
            return self.has(args);
        }

        let mut values = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target {
            values.push(self.eval(target)?);
        }
        for arg in args {
            values.push(self.eval(arg)?);
        }
        call_function(name, &values)
    }

    fn has(&mut self, args: &[Expr]) -> Result<Value, ExpressionError> {
        let [Expr::Member(target, field)] = args else {
            return Err(ExpressionError::Invalid("has() expects a single field selection, e.g. has(a.b)".into()));
        };
        match self.eval(target) {
            Ok(Value::Object(map)) => Ok(Value::Bool(map.contains_key(field))),
            Ok(_) => Ok(Value::Bool(false)),
            Err(error) if error.is_missing_reference() => Ok(Value::Bool(false)),
            Err(error) => Err(error),
        }
    }

    fn comprehension(&mut self, target: &Expr, name: &str, args: &[Expr]) -> Result<Value, ExpressionError> {
        let [Expr::Ident(variable), body] = args else {
            return Err(ExpressionError::Invalid(format!("{name}() expects a variable name and an expression")));
        };
        let items: Vec<Value> = match self.eval(target)? {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(key, _)| Value::String(key)).collect(),
            other => return Err(ExpressionError::overload(name, &[&other])),
        };

        let mut matches = 0usize;
        let mut collected = Vec::new();
        for item in items {
            self.locals.push((variable.clone(), item.clone()));
            let outcome = self.eval(body);
            self.locals.pop();
            let outcome = outcome?;
            if name == "map" {
                collected.push(outcome);
                continue;
            }
            let Value::Bool(flag) = outcome else {
                return Err(ExpressionError::overload(name, &[&outcome]));
            };
            match name {
                "exists" if flag => return Ok(Value::Bool(true)),
                "all" if !flag => return Ok(Value::Bool(false)),
                "filter" if flag => collected.push(item),
                "exists_one" if flag => matches += 1,
                _ => {}
            }
        }
        Ok(match name {
            "exists" => Value::Bool(false),
            "all" => Value::Bool(true),
            "exists_one" => Value::Bool(matches == 1),
            _ => Value::Array(collected),
        })
    }
}

fn index_into(target: Value, index: &Value, expr: &Expr) -> Result<Value, ExpressionError> {
    match (target, index) {
        (Value::Array(mut items), Value::Number(_)) => {
            let Some(Num::Int(position)) = Num::of(index) else {
                return Err(ExpressionError::overload("[]", &[&Value::Array(items), index]));
            };
            let length = items.len();
            usize::try_from(position)
                .ok()
                .filter(|position| *position < length)
                .map(|position| items.swap_remove(position))
                .ok_or_else(|| ExpressionError::Invalid(format!("index {position} out of range for list of size {length}")))
        }
        (Value::Object(mut map), Value::String(key)) => map
            .remove(key)
            .ok_or_else(|| ExpressionError::NoSuchKey(format!("{}[{key:?}]", expr_target_path(expr)))),
        (target, index) => Err(ExpressionError::overload("[]", &[&target, index])),
    }
}

fn expr_target_path(expr: &Expr) -> String {
    match expr {
        Expr::Index(target, _) => target.path(),
        other => other.path(),
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = compare(left, right).ok_or_else(|| ExpressionError::overload(op.symbol(), &[left, right]))?;
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering == Ordering::Less,
                BinaryOp::LessEqual => ordering != Ordering::Greater,
                BinaryOp::Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|item| values_equal(item, left)))),
            Value::Object(map) => match left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Err(ExpressionError::overload("in", &[left, right])),
            },
            _ => Err(ExpressionError::overload("in", &[left, right])),
        },
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.iter().chain(b).cloned().collect())),
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::Remainder => arithmetic(op, left, right),
        BinaryOp::And | BinaryOp::Or => Err(ExpressionError::overload(op.symbol(), &[left, right])),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExpressionError> {
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(ExpressionError::overload(op.symbol(), &[left, right]));
    };
    match (a, b) {
        (Num::Int(a), Num::Int(b)) => match op {
            BinaryOp::Add => int_value(a.checked_add(b)),
            BinaryOp::Subtract => int_value(a.checked_sub(b)),
            BinaryOp::Multiply => int_value(a.checked_mul(b)),
            BinaryOp::Divide if b == 0 => Err(ExpressionError::DivisionByZero),
            BinaryOp::Divide => int_value(a.checked_div(b)),
            BinaryOp::Remainder if b == 0 => Err(ExpressionError::DivisionByZero),
            BinaryOp::Remainder => int_value(a.checked_rem(b)),
            _ => Err(ExpressionError::overload(op.symbol(), &[left, right])),
        },
        (a, b) => {
            let (a, b) = (a.as_f64(), b.as_f64());
            match op {
                BinaryOp::Add => float_value(a + b),
                BinaryOp::Subtract => float_value(a - b),
                BinaryOp::Multiply => float_value(a * b),
                BinaryOp::Divide if b == 0.0 => Err(ExpressionError::DivisionByZero),
                BinaryOp::Divide => float_value(a / b),
                _ => Err(ExpressionError::overload(op.symbol(), &[left, right])),
            }
        }
    }
}

/// Orders numbers with numbers and strings with strings; other pairs are incomparable.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => match (Num::of(left)?, Num::of(right)?) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        },
    }
}

fn call_function(name: &str, args: &[Value]) -> Result<Value, ExpressionError> {
    match (name, args) {
        ("size", [value]) => match value {
            Value::String(text) => Ok(Value::Number(text.chars().count().into())),
            Value::Array(items) => Ok(Value::Number(items.len().into())),
            Value::Object(map) => Ok(Value::Number(map.len().into())),
            other => Err(ExpressionError::overload("size", &[other])),
        },
        ("int", [value]) => match value {
            Value::Number(_) => match Num::of(value) {
                Some(Num::Int(integer)) => Ok(Value::Number(integer.into())),
                Some(Num::Float(float)) if float.is_finite() && float.abs() < i64::MAX as f64 => Ok(Value::Number((float.trunc() as i64).into())),
                _ => Err(ExpressionError::Overflow),
            },
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(|integer| Value::Number(integer.into()))
                .map_err(|_| ExpressionError::Invalid(format!("cannot convert '{text}' to int"))),
            Value::Bool(flag) => Ok(Value::Number(i64::from(*flag).into())),
            other => Err(ExpressionError::overload("int", &[other])),
        },
        ("double" | "float", [value]) => match value {
            Value::Number(_) => Num::of(value).map(Num::as_f64).map_or(Err(ExpressionError::Overflow), float_value),
            Value::String(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| ExpressionError::Invalid(format!("cannot convert '{text}' to double")))
                .and_then(float_value),
            other => Err(ExpressionError::overload(name, &[other])),
        },
        ("string", [value]) => Ok(Value::String(match value {
            Value::String(text) => text.clone(),
            Value::Null => "null".to_string(),
            other => other.to_string(),
        })),
        ("bool", [value]) => match value {
            Value::Bool(flag) => Ok(Value::Bool(*flag)),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "t" => Ok(Value::Bool(true)),
                "false" | "0" | "f" => Ok(Value::Bool(false)),
                _ => Err(ExpressionError::Invalid(format!("cannot convert '{text}' to bool"))),
            },
            other => Err(ExpressionError::overload("bool", &[other])),
        },
        ("startsWith", [Value::String(text), Value::String(prefix)]) => Ok(Value::Bool(text.starts_with(prefix.as_str()))),
        ("endsWith", [Value::String(text), Value::String(suffix)]) => Ok(Value::Bool(text.ends_with(suffix.as_str()))),
        ("contains", [Value::String(text), Value::String(needle)]) => Ok(Value::Bool(text.contains(needle.as_str()))),
        ("contains", [Value::Array(items), needle]) => Ok(Value::Bool(items.iter().any(|item| values_equal(item, needle)))),
        ("matches", [Value::String(text), Value::String(pattern)]) => {
            let regex = Regex::new(pattern).map_err(|error| ExpressionError::Invalid(format!("invalid regular expression '{pattern}': {error}")))?;
            Ok(Value::Bool(regex.is_match(text)))
        }
        ("lowerAscii", [Value::String(text)]) => Ok(Value::String(text.to_ascii_lowercase())),
        ("upperAscii", [Value::String(text)]) => Ok(Value::String(text.to_ascii_uppercase())),
        ("trim", [Value::String(text)]) => Ok(Value::String(text.trim().to_string())),
        (
            "size" | "int" | "double" | "float" | "string" | "bool" | "startsWith" | "endsWith" | "contains" | "matches" | "lowerAscii"
            | "upperAscii" | "trim",
            _,
        ) => Err(ExpressionError::overload(name, &args.iter().collect::<Vec<_>>())),
        _ => Err(ExpressionError::UnknownFunction(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "clusterId": "c1",
            "replicas": 3,
            "ratio": 0.5,
            "clusterStatus": {
                "phase": "Ready",
                "nodes": 5,
                "conditions": [
                    {"type": "Available", "status": "True"},
                    {"type": "Degraded", "status": "False"}
                ],
                "labels": {"env": "prod"}
            },
            "regions": ["us-east-1", "eu-west-1"]
        }) else {
            unreachable!()
        };
        map
    }

    fn eval(source: &str) -> Result<Value, ExpressionError> {
        evaluate(source, &vars())
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(eval("clusterStatus.phase == 'Ready' && clusterStatus.nodes >= 3").unwrap(), json!(true));
        assert_eq!(eval("replicas > 5 || clusterId != \"c1\"").unwrap(), json!(false));
        assert_eq!(eval("!(replicas < 2)").unwrap(), json!(true));
        assert_eq!(eval("replicas == 3.0").unwrap(), json!(true));
        assert_eq!(eval("'abc' < 'abd'").unwrap(), json!(true));
    }

    #[test]
    fn arithmetic_follows_precedence() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), json!(7));
        assert_eq!(eval("(1 + 2) * 3").unwrap(), json!(9));
        assert_eq!(eval("7 % 4 - -1").unwrap(), json!(4));
        assert_eq!(eval("replicas * ratio").unwrap(), json!(1.5));
        assert_eq!(eval("'ns-' + clusterId").unwrap(), json!("ns-c1"));
        assert_eq!(eval("1 / 0").unwrap_err(), ExpressionError::DivisionByZero);
        assert_eq!(eval("9223372036854775807 + 1").unwrap_err(), ExpressionError::Overflow);
    }

    #[test]
    fn membership_and_indexing() {
        assert_eq!(eval("'eu-west-1' in regions").unwrap(), json!(true));
        assert_eq!(eval("'env' in clusterStatus.labels").unwrap(), json!(true));
        assert_eq!(eval("regions[1]").unwrap(), json!("eu-west-1"));
        assert_eq!(eval("clusterStatus.labels['env']").unwrap(), json!("prod"));
        assert!(matches!(eval("regions[9]"), Err(ExpressionError::Invalid(_))));
    }

    #[test]
    fn ternary_selects_a_branch() {
        assert_eq!(eval("replicas > 2 ? 'big' : 'small'").unwrap(), json!("big"));
        assert_eq!(eval("replicas > 5 ? 'big' : replicas > 1 ? 'medium' : 'small'").unwrap(), json!("medium"));
    }

    #[test]
    fn missing_fields_error_but_has_probes() {
        assert_eq!(eval("clusterStatus.missing == 1").unwrap_err(), ExpressionError::NoSuchKey("clusterStatus.missing".into()));
        assert_eq!(eval("unknown").unwrap_err(), ExpressionError::UndeclaredReference("unknown".into()));
        assert_eq!(eval("has(clusterStatus.phase)").unwrap(), json!(true));
        assert_eq!(eval("has(clusterStatus.missing)").unwrap(), json!(false));
        assert_eq!(eval("has(unknown.field)").unwrap(), json!(false));
    }

    #[test]
    fn logical_operators_absorb_errors_when_decided() {
        assert_eq!(eval("missing.x == 1 || true").unwrap(), json!(true));
        assert_eq!(eval("false && missing.x == 1").unwrap(), json!(false));
        assert!(eval("missing.x == 1 && true").is_err());
    }

    #[test]
    fn functions_and_methods() {
        assert_eq!(eval("size(regions)").unwrap(), json!(2));
        assert_eq!(eval("clusterId.size()").unwrap(), json!(2));
        assert_eq!(eval("int('42') + 1").unwrap(), json!(43));
        assert_eq!(eval("double(replicas)").unwrap(), json!(3.0));
        assert_eq!(eval("string(replicas)").unwrap(), json!("3"));
        assert_eq!(eval("clusterStatus.phase.startsWith('Re')").unwrap(), json!(true));
        assert_eq!(eval("clusterStatus.phase.lowerAscii()").unwrap(), json!("ready"));
        assert_eq!(eval("clusterId.matches('^c[0-9]+$')").unwrap(), json!(true));
        assert_eq!(eval("regions.contains('us-east-1')").unwrap(), json!(true));
        assert!(matches!(eval("nope(1)"), Err(ExpressionError::UnknownFunction(_))));
        assert!(matches!(eval("size(1)"), Err(ExpressionError::NoMatchingOverload { .. })));
    }

    #[test]
    fn comprehension_macros() {
        assert_eq!(
            eval("clusterStatus.conditions.exists(c, c.type == 'Available' && c.status == 'True')").unwrap(),
            json!(true)
        );
        assert_eq!(eval("clusterStatus.conditions.all(c, c.status == 'True')").unwrap(), json!(false));
        assert_eq!(eval("clusterStatus.conditions.exists_one(c, c.status == 'False')").unwrap(), json!(true));
        assert_eq!(eval("clusterStatus.conditions.filter(c, c.status == 'True').map(c, c.type)").unwrap(), json!(["Available"]));
        assert_eq!(eval("regions.map(r, r.upperAscii())").unwrap(), json!(["US-EAST-1", "EU-WEST-1"]));
    }

    #[test]
    fn list_and_map_literals() {
        assert_eq!(eval("[1, 2] + [3]").unwrap(), json!([1, 2, 3]));
        assert_eq!(eval("{'a': replicas}.a").unwrap(), json!(3));
        assert_eq!(eval("clusterStatus.phase in ['Ready', 'Running']").unwrap(), json!(true));
    }

    #[test]
    fn syntax_errors_report_offsets() {
        assert!(matches!(Expression::parse("a ==").unwrap_err(), ExpressionError::Syntax { offset: 4, .. }));
        assert!(matches!(Expression::parse("a = 1").unwrap_err(), ExpressionError::Syntax { offset: 2, .. }));
        assert!(matches!(Expression::parse("'open").unwrap_err(), ExpressionError::Syntax { offset: 0, .. }));
        assert!(matches!(Expression::parse("a b").unwrap_err(), ExpressionError::Syntax { offset: 2, .. }));
    }

    #[test]
    fn type_errors_name_the_operands() {
        let error = eval("clusterId > 1").unwrap_err();
        assert_eq!(error.to_string(), "no matching overload for '>' applied to (string, int)");
    }
}

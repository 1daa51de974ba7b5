//! Arithmetic formulas for computed fields.
//!
//! Formulas are restricted to `{field}` references, decimal literals, the
//! four arithmetic operators, and parentheses. A dedicated tokenizer and
//! recursive-descent parser enforce the grammar; nothing outside it ever
//! reaches evaluation.

use std::collections::BTreeSet;

use serde_json::Value;
use thiserror::Error;

use crate::draft::ValueMap;
use crate::spec::form::FormSchema;

/// Errors raised while parsing a formula. Evaluation failures are reported
/// as `None` by [`evaluate`]; parse errors are only surfaced as such during
/// schema verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated field reference")]
    UnterminatedReference,
    #[error("empty field reference")]
    EmptyReference,
    #[error("invalid numeric literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected end of formula")]
    UnexpectedEnd,
    #[error("unexpected token")]
    UnexpectedToken,
    #[error("unbalanced parentheses")]
    UnbalancedParens,
    #[error("formula is empty")]
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Reference(String),
    Plus,
    Minus,
    Star,
    Slash,
    Open,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(f64),
    Reference(String),
    Add(Box<Node>, Box<Node>),
    Sub(Box<Node>, Box<Node>),
    Mul(Box<Node>, Box<Node>),
    Div(Box<Node>, Box<Node>),
    Neg(Box<Node>),
}

/// A parsed formula ready for repeated evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    root: Node,
    references: BTreeSet<String>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.expression()?;
        if parser.pos != parser.tokens.len() {
            return Err(FormulaError::UnexpectedToken);
        }
        let mut references = BTreeSet::new();
        collect_references(&root, &mut references);
        Ok(Self { root, references })
    }

    /// Field names this formula reads.
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.references.iter().map(String::as_str)
    }

    /// Evaluates against a value snapshot. Absent values read as zero; a
    /// present non-numeric value, division by zero, or a non-finite result
    /// yields `None` ("not yet computable", never zero).
    pub fn evaluate(&self, values: &ValueMap) -> Option<f64> {
        let result = eval(&self.root, values)?;
        result.is_finite().then_some(result)
    }
}

/// Parses and evaluates in one step; any failure yields `None`.
pub fn evaluate(source: &str, values: &ValueMap) -> Option<f64> {
    Formula::parse(source).ok()?.evaluate(values)
}

/// Rounds to a fixed number of decimal places, half away from zero on the
/// decimal value. The scaled number is snapped to four decimals first so an
/// input like `2 + 3.05` rounds as 5.05, not as its binary neighbour 5.049….
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let scale = 10f64.powi(decimals as i32);
    let scaled = value * scale;
    let snapped: f64 = format!("{scaled:.4}").parse().unwrap_or(scaled);
    snapped.round() / scale
}

/// Applies every calculated field once, in declaration order, and returns
/// the updated map. A value is only written back when it differs from the
/// stored one, so re-running on unchanged inputs is a no-op.
pub fn apply_computed(schema: &FormSchema, values: &ValueMap) -> ValueMap {
    let mut out = values.clone();
    for field in &schema.fields {
        let Some(calc) = &field.calculation else {
            continue;
        };
        let computed = evaluate(&calc.formula, &out).map(|value| match calc.decimals {
            Some(decimals) => round_to(value, decimals),
            None => value,
        });
        match computed.and_then(|value| serde_json::Number::from_f64(value).map(Value::Number)) {
            Some(next) => {
                if out.get(&field.name) != Some(&next) {
                    out.insert(field.name.clone(), next);
                }
            }
            None => {
                out.remove(&field.name);
            }
        }
    }
    out
}

fn tokenize(source: &str) -> Result<Vec<Token>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '{' => {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(inner) => name.push(inner),
                        None => return Err(FormulaError::UnterminatedReference),
                    }
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    return Err(FormulaError::EmptyReference);
                }
                tokens.push(Token::Reference(name));
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&digit) = chars.peek() {
                    if digit.is_ascii_digit() || digit == '.' {
                        literal.push(digit);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed: f64 = literal
                    .parse()
                    .map_err(|_| FormulaError::InvalidNumber(literal.clone()))?;
                tokens.push(Token::Number(parsed));
            }
            other => return Err(FormulaError::UnexpectedChar(other)),
        }
    }

    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Node, FormulaError> {
        let mut node = self.term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.pos += 1;
                    node = Node::Add(Box::new(node), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.pos += 1;
                    node = Node::Sub(Box::new(node), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn term(&mut self) -> Result<Node, FormulaError> {
        let mut node = self.factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.pos += 1;
                    node = Node::Mul(Box::new(node), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.pos += 1;
                    node = Node::Div(Box::new(node), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        Ok(node)
    }

    fn factor(&mut self) -> Result<Node, FormulaError> {
        match self.next() {
            Some(Token::Minus) => Ok(Node::Neg(Box::new(self.factor()?))),
            Some(Token::Number(value)) => Ok(Node::Literal(value)),
            Some(Token::Reference(name)) => Ok(Node::Reference(name)),
            Some(Token::Open) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    Some(_) => Err(FormulaError::UnexpectedToken),
                    None => Err(FormulaError::UnbalancedParens),
                }
            }
            Some(_) => Err(FormulaError::UnexpectedToken),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }
}

fn collect_references(node: &Node, out: &mut BTreeSet<String>) {
    match node {
        Node::Literal(_) => {}
        Node::Reference(name) => {
            out.insert(name.clone());
        }
        Node::Add(left, right)
        | Node::Sub(left, right)
        | Node::Mul(left, right)
        | Node::Div(left, right) => {
            collect_references(left, out);
            collect_references(right, out);
        }
        Node::Neg(inner) => collect_references(inner, out),
    }
}

fn eval(node: &Node, values: &ValueMap) -> Option<f64> {
    match node {
        Node::Literal(value) => Some(*value),
        Node::Reference(name) => resolve_reference(values, name),
        Node::Add(left, right) => Some(eval(left, values)? + eval(right, values)?),
        Node::Sub(left, right) => Some(eval(left, values)? - eval(right, values)?),
        Node::Mul(left, right) => Some(eval(left, values)? * eval(right, values)?),
        Node::Div(left, right) => {
            let divisor = eval(right, values)?;
            if divisor == 0.0 {
                return None;
            }
            Some(eval(left, values)? / divisor)
        }
        Node::Neg(inner) => Some(-eval(inner, values)?),
    }
}

fn resolve_reference(values: &ValueMap, name: &str) -> Option<f64> {
    match values.get(name) {
        None | Some(Value::Null) => Some(0.0),
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse().ok()
            }
        }
        Some(_) => None,
    }
}

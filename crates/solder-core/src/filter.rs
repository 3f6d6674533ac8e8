//! LDAP-style filter expressions over [`Properties`].
//!
//! Service lookups, listener subscriptions, and reference targets all narrow
//! their matches with the classic parenthesised prefix syntax:
//!
//! ```text
//! (&(objectClass=com.example.Logger)(service.ranking>=10)(!(vendor=acme*)))
//! ```
//!
//! A filter is compiled once by [`Filter::parse`] and then evaluated
//! lock-free against property snapshots.  Attribute names compare
//! case-insensitively; string values compare case-sensitively except under
//! the approximate operator `~=`, which ignores case and whitespace.

use std::fmt;

use serde_json::Value;

use crate::constants::OBJECT_CLASS;
use crate::error::{ServiceError, ServiceResult};
use crate::properties::Properties;

#[derive(Debug, Clone, PartialEq)]
enum CompareOp {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present(String),
    Compare {
        attr: String,
        op: CompareOp,
        literal: String,
    },
    /// Pattern split on `*`: first part anchors the start, last part the end,
    /// inner parts must occur in order between them.
    Substring { attr: String, parts: Vec<String> },
}

/// A compiled filter expression.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use solder_core::{Filter, Properties};
///
/// let filter = Filter::parse("(&(kind=logger)(rank>=5))").unwrap();
/// let props = Properties::from_json(json!({"Kind": "logger", "rank": 7})).unwrap();
/// assert!(filter.matches(&props));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    source: String,
    root: Node,
}

impl Filter {
    /// Compiles `source` into a filter.
    ///
    /// Returns [`ServiceError::InvalidArgument`] for malformed expressions.
    pub fn parse(source: &str) -> ServiceResult<Self> {
        let mut parser = Parser {
            chars: source.char_indices().peekable(),
            source,
        };
        let root = parser.expression()?;
        parser.skip_whitespace();
        if parser.chars.next().is_some() {
            return Err(ServiceError::invalid(format!(
                "trailing input after filter expression: '{source}'"
            )));
        }
        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates the filter against a property snapshot.
    pub fn matches(&self, props: &Properties) -> bool {
        eval(&self.root, props)
    }

    /// Returns the literal of an `objectClass` equality test that must hold
    /// for the whole filter to match, when one exists.
    ///
    /// Listener dispatch uses this to index subscriptions by interface name
    /// and prune non-candidates without evaluating the full expression.
    pub fn objectclass_hint(&self) -> Option<&str> {
        fn scan(node: &Node) -> Option<&str> {
            match node {
                Node::Compare {
                    attr,
                    op: CompareOp::Equal,
                    literal,
                } if attr.eq_ignore_ascii_case(OBJECT_CLASS) => Some(literal),
                Node::And(children) => children.iter().find_map(scan),
                _ => None,
            }
        }
        scan(&self.root)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ─── Evaluation ───────────────────────────────────────────────────────────────

fn eval(node: &Node, props: &Properties) -> bool {
    match node {
        Node::And(children) => children.iter().all(|c| eval(c, props)),
        Node::Or(children) => children.iter().any(|c| eval(c, props)),
        Node::Not(child) => !eval(child, props),
        Node::Present(attr) => props.contains_key(attr),
        Node::Compare { attr, op, literal } => props
            .get(attr)
            .is_some_and(|value| compare_value(value, op, literal)),
        Node::Substring { attr, parts } => props
            .get(attr)
            .is_some_and(|value| substring_value(value, parts)),
    }
}

/// Scalar comparison; arrays match when any element does.
fn compare_value(value: &Value, op: &CompareOp, literal: &str) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| compare_value(v, op, literal)),
        Value::Bool(b) => {
            matches!(op, CompareOp::Equal | CompareOp::Approx)
                && literal.parse::<bool>() == Ok(*b)
        }
        Value::Number(n) => {
            let (Some(lhs), Ok(rhs)) = (n.as_f64(), literal.trim().parse::<f64>()) else {
                return false;
            };
            match op {
                CompareOp::Equal | CompareOp::Approx => lhs == rhs,
                CompareOp::GreaterEq => lhs >= rhs,
                CompareOp::LessEq => lhs <= rhs,
            }
        }
        Value::String(s) => match op {
            CompareOp::Equal => s == literal,
            CompareOp::Approx => {
                let fold = |v: &str| {
                    v.chars()
                        .filter(|c| !c.is_whitespace())
                        .flat_map(char::to_lowercase)
                        .collect::<String>()
                };
                fold(s) == fold(literal)
            }
            CompareOp::GreaterEq => s.as_str() >= literal,
            CompareOp::LessEq => s.as_str() <= literal,
        },
        Value::Null | Value::Object(_) => false,
    }
}

fn substring_value(value: &Value, parts: &[String]) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|v| substring_value(v, parts)),
        Value::String(s) => substring_match(s, parts),
        _ => false,
    }
}

fn substring_match(s: &str, parts: &[String]) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let Some(mut remainder) = s.strip_prefix(first.as_str()) else {
        return false;
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remainder.is_empty(),
    };
    for part in middle {
        match remainder.find(part.as_str()) {
            Some(pos) => remainder = &remainder[pos + part.len()..],
            None => return false,
        }
    }
    remainder.ends_with(last.as_str()) && remainder.len() >= last.len()
}

// ─── Parser ───────────────────────────────────────────────────────────────────

struct Parser<'a> {
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    source: &'a str,
}

impl Parser<'_> {
    fn error(&self, msg: &str) -> ServiceError {
        ServiceError::invalid(format!("malformed filter '{}': {msg}", self.source))
    }

    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
    }

    fn expect(&mut self, expected: char) -> ServiceResult<()> {
        self.skip_whitespace();
        match self.chars.next() {
            Some((_, c)) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{expected}'"))),
        }
    }

    fn expression(&mut self) -> ServiceResult<Node> {
        self.expect('(')?;
        self.skip_whitespace();
        let node = match self.chars.peek() {
            Some((_, '&')) => {
                self.chars.next();
                Node::And(self.operand_list()?)
            }
            Some((_, '|')) => {
                self.chars.next();
                Node::Or(self.operand_list()?)
            }
            Some((_, '!')) => {
                self.chars.next();
                Node::Not(Box::new(self.expression()?))
            }
            Some(_) => self.simple()?,
            None => return Err(self.error("unexpected end of input")),
        };
        self.expect(')')?;
        Ok(node)
    }

    fn operand_list(&mut self) -> ServiceResult<Vec<Node>> {
        let mut operands = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                Some((_, '(')) => operands.push(self.expression()?),
                _ if operands.is_empty() => return Err(self.error("operator needs operands")),
                _ => return Ok(operands),
            }
        }
    }

    /// `attr op value` inside parentheses already consumed by the caller.
    fn simple(&mut self) -> ServiceResult<Node> {
        let mut attr = String::new();
        loop {
            match self.chars.peek() {
                Some((_, c)) if !matches!(*c, '=' | '<' | '>' | '~' | '(' | ')') => {
                    attr.push(*c);
                    self.chars.next();
                }
                _ => break,
            }
        }
        let attr = attr.trim().to_string();
        if attr.is_empty() {
            return Err(self.error("empty attribute name"));
        }

        let op = match self.chars.next() {
            Some((_, '=')) => CompareOp::Equal,
            Some((_, '~')) => {
                self.expect('=')?;
                CompareOp::Approx
            }
            Some((_, '>')) => {
                self.expect('=')?;
                CompareOp::GreaterEq
            }
            Some((_, '<')) => {
                self.expect('=')?;
                CompareOp::LessEq
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        // Literal runs to the closing paren; backslash escapes the next char.
        let mut literal = String::new();
        let mut stars: Vec<usize> = Vec::new();
        loop {
            match self.chars.peek() {
                Some((_, ')')) | None => break,
                Some((_, '\\')) => {
                    self.chars.next();
                    match self.chars.next() {
                        Some((_, escaped)) => literal.push(escaped),
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some((_, '*')) => {
                    stars.push(literal.len());
                    literal.push('*');
                    self.chars.next();
                }
                Some((_, c)) => {
                    literal.push(*c);
                    self.chars.next();
                }
            }
        }

        if stars.is_empty() {
            return Ok(Node::Compare { attr, op, literal });
        }
        if op != CompareOp::Equal {
            return Err(self.error("wildcards are only valid with '='"));
        }
        if literal == "*" {
            return Ok(Node::Present(attr));
        }
        Ok(Node::Substring {
            attr,
            parts: literal.split('*').map(str::to_string).collect(),
        })
    }
}

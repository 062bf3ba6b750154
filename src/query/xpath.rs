// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

//! XPath 1.0 subset evaluated against [`Document`].
//!
//! Supported: location paths with the common axes (`child`, `descendant`, `descendant-or-self`,
//! `self`, `parent`, `ancestor`, `ancestor-or-self`, sibling, `following`, `preceding`,
//! `attribute`), the usual abbreviations, predicates, unions, comparison/boolean/arithmetic
//! operators, and a core function library. Variables and namespaces are not supported.
//!
//! Selections are returned in document order without duplicates.

use crate::model::{Document, NodeId, NodeKind};

/// A selected node. Attributes are addressed through their owning element.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeRef {
    Node(NodeId),
    Attribute { element: NodeId, name: String },
}

impl NodeRef {
    pub fn node(&self) -> NodeId {
        match self {
            Self::Node(id) => *id,
            Self::Attribute { element, .. } => *element,
        }
    }

    pub fn is_attribute(&self) -> bool {
        matches!(self, Self::Attribute { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("invalid XPath `{expression}`: {message}")]
    Syntax { expression: String, message: String },
    #[error("XPath `{expression}` could not be evaluated: {message}")]
    Evaluation { expression: String, message: String },
    #[error("XPath `{expression}` must select nodes, but it evaluates to a {found}")]
    NotANodeSet { expression: String, found: &'static str },
}

impl QueryError {
    pub fn expression(&self) -> &str {
        match self {
            Self::Syntax { expression, .. }
            | Self::Evaluation { expression, .. }
            | Self::NotANodeSet { expression, .. } => expression,
        }
    }
}

/// A compiled expression.
#[derive(Debug, Clone)]
pub struct XPath {
    source: String,
    expr: Expr,
}

impl XPath {
    pub fn compile(source: &str) -> Result<Self, QueryError> {
        let syntax = |message: String| QueryError::Syntax { expression: source.to_owned(), message };
        let tokens = tokenize(source).map_err(syntax)?;
        if tokens.is_empty() {
            return Err(syntax("expression is empty".to_owned()));
        }
        let expr = Parser { tokens, pos: 0 }.parse().map_err(syntax)?;
        Ok(Self { source: source.to_owned(), expr })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluates against the document node and returns the selected nodes.
    pub fn select(&self, doc: &Document) -> Result<Vec<NodeRef>, QueryError> {
        let evaluator = Evaluator::new(doc);
        let ctx = Context { item: NodeRef::Node(doc.document_node()), position: 1, size: 1 };
        match evaluator.eval(&ctx, &self.expr) {
            Ok(Value::Nodes(nodes)) => Ok(nodes),
            Ok(other) => Err(QueryError::NotANodeSet {
                expression: self.source.clone(),
                found: other.type_name(),
            }),
            Err(message) => Err(QueryError::Evaluation { expression: self.source.clone(), message }),
        }
    }
}

pub fn select(doc: &Document, expression: &str) -> Result<Vec<NodeRef>, QueryError> {
    XPath::compile(expression)?.select(doc)
}

// --- tokens ---

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Slash,
    DoubleSlash,
    Dot,
    DoubleDot,
    At,
    Star,
    Multiply,
    Pipe,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    DoubleColon,
    Plus,
    Minus,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Div,
    Mod,
    Literal(String),
    Number(f64),
    Name(String),
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// `*` and operator names are operators only when they follow an operand.
fn follows_operand(tokens: &[Tok]) -> bool {
    matches!(
        tokens.last(),
        Some(
            Tok::RBracket
                | Tok::RParen
                | Tok::Literal(_)
                | Tok::Number(_)
                | Tok::Name(_)
                | Tok::Star
                | Tok::Dot
                | Tok::DoubleDot
        )
    )
}

fn tokenize(input: &str) -> Result<Vec<Tok>, String> {
    let chars: Vec<char> = input.chars().collect();
    let at = |i: usize| chars.get(i).copied();
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(c) = at(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let (tok, width) = match c {
            '/' if at(i + 1) == Some('/') => (Tok::DoubleSlash, 2),
            '/' => (Tok::Slash, 1),
            '.' if at(i + 1) == Some('.') => (Tok::DoubleDot, 2),
            '.' if at(i + 1).is_some_and(|n| n.is_ascii_digit()) => read_number(&chars, i)?,
            '.' => (Tok::Dot, 1),
            '@' => (Tok::At, 1),
            '*' if follows_operand(&tokens) => (Tok::Multiply, 1),
            '*' => (Tok::Star, 1),
            '|' => (Tok::Pipe, 1),
            '[' => (Tok::LBracket, 1),
            ']' => (Tok::RBracket, 1),
            '(' => (Tok::LParen, 1),
            ')' => (Tok::RParen, 1),
            ',' => (Tok::Comma, 1),
            ':' if at(i + 1) == Some(':') => (Tok::DoubleColon, 2),
            '+' => (Tok::Plus, 1),
            '-' => (Tok::Minus, 1),
            '=' => (Tok::Eq, 1),
            '!' if at(i + 1) == Some('=') => (Tok::Ne, 2),
            '<' if at(i + 1) == Some('=') => (Tok::Le, 2),
            '<' => (Tok::Lt, 1),
            '>' if at(i + 1) == Some('=') => (Tok::Ge, 2),
            '>' => (Tok::Gt, 1),
            quote @ ('\'' | '"') => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .ok_or_else(|| format!("unterminated string literal at offset {i}"))?;
                let literal: String = chars[i + 1..i + 1 + end].iter().collect();
                (Tok::Literal(literal), end + 2)
            }
            c if c.is_ascii_digit() => read_number(&chars, i)?,
            c if is_name_start(c) => {
                let mut end = i + 1;
                while at(end).is_some_and(is_name_char) {
                    end += 1;
                }
                // prefix:local or prefix:*
                if at(end) == Some(':') && at(end + 1).is_some_and(|n| is_name_start(n) || n == '*') {
                    end += 2;
                    while at(end).is_some_and(is_name_char) {
                        end += 1;
                    }
                }
                let name: String = chars[i..end].iter().collect();
                let tok = if follows_operand(&tokens) {
                    match name.as_str() {
                        "and" => Tok::And,
                        "or" => Tok::Or,
                        "div" => Tok::Div,
                        "mod" => Tok::Mod,
                        _ => Tok::Name(name),
                    }
                } else {
                    Tok::Name(name)
                };
                (tok, end - i)
            }
            other => return Err(format!("unexpected character `{other}` at offset {i}")),
        };
        tokens.push(tok);
        i += width;
    }
    Ok(tokens)
}

fn read_number(chars: &[char], start: usize) -> Result<(Tok, usize), String> {
    let mut end = start;
    while chars.get(end).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
        end += 1;
    }
    let text: String = chars[start..end].iter().collect();
    let value = text.parse::<f64>().map_err(|_| format!("invalid number `{text}`"))?;
    Ok((Tok::Number(value), end - start))
}

// --- syntax tree ---

#[derive(Debug, Clone)]
enum Expr {
    Path { absolute: bool, steps: Vec<Step> },
    Filter { primary: Box<Expr>, predicates: Vec<Expr>, steps: Vec<Step> },
    Union(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Call(String, Vec<Expr>),
    Literal(String),
    Number(f64),
}

#[derive(Debug, Clone)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Expr>,
}

impl Step {
    fn descendant_or_self() -> Self {
        Self { axis: Axis::DescendantOrSelf, test: NodeTest::Node, predicates: Vec::new() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    SelfAxis,
    Parent,
    Ancestor,
    AncestorOrSelf,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
    Attribute,
}

impl Axis {
    fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "child" => Self::Child,
            "descendant" => Self::Descendant,
            "descendant-or-self" => Self::DescendantOrSelf,
            "self" => Self::SelfAxis,
            "parent" => Self::Parent,
            "ancestor" => Self::Ancestor,
            "ancestor-or-self" => Self::AncestorOrSelf,
            "following-sibling" => Self::FollowingSibling,
            "preceding-sibling" => Self::PrecedingSibling,
            "following" => Self::Following,
            "preceding" => Self::Preceding,
            "attribute" => Self::Attribute,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone)]
enum NodeTest {
    Name(String),
    Wildcard,
    Text,
    Comment,
    Node,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

// --- parser ---

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Tok> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok) -> Result<(), String> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(format!("expected {tok:?}, found {}", describe(self.peek())))
        }
    }

    fn parse(mut self) -> Result<Expr, String> {
        let expr = self.parse_or()?;
        match self.peek() {
            None => Ok(expr),
            Some(tok) => Err(format!("unexpected trailing token {tok:?}")),
        }
    }

    fn binary_chain(
        &mut self,
        ops: &[(Tok, BinOp)],
        next: fn(&mut Self) -> Result<Expr, String>,
    ) -> Result<Expr, String> {
        let mut left = next(self)?;
        'outer: loop {
            for (tok, op) in ops {
                if self.eat(tok) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        self.binary_chain(&[(Tok::Or, BinOp::Or)], Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        self.binary_chain(&[(Tok::And, BinOp::And)], Self::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        self.binary_chain(&[(Tok::Eq, BinOp::Eq), (Tok::Ne, BinOp::Ne)], Self::parse_relational)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        self.binary_chain(
            &[(Tok::Le, BinOp::Le), (Tok::Ge, BinOp::Ge), (Tok::Lt, BinOp::Lt), (Tok::Gt, BinOp::Gt)],
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        self.binary_chain(&[(Tok::Plus, BinOp::Add), (Tok::Minus, BinOp::Sub)], Self::parse_multiplicative)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        self.binary_chain(
            &[(Tok::Multiply, BinOp::Mul), (Tok::Div, BinOp::Div), (Tok::Mod, BinOp::Mod)],
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Tok::Minus) {
            Ok(Expr::Negate(Box::new(self.parse_unary()?)))
        } else {
            self.parse_union()
        }
    }

    fn parse_union(&mut self) -> Result<Expr, String> {
        let mut left = self.parse_path()?;
        while self.eat(&Tok::Pipe) {
            let right = self.parse_path()?;
            left = Expr::Union(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_path(&mut self) -> Result<Expr, String> {
        let starts_filter = match self.peek() {
            Some(Tok::LParen | Tok::Literal(_) | Tok::Number(_)) => true,
            Some(Tok::Name(name)) => {
                self.peek_at(1) == Some(&Tok::LParen) && !is_node_type(name)
            }
            None => return Err("unexpected end of expression".to_owned()),
            _ => false,
        };
        if !starts_filter {
            return self.parse_location_path();
        }

        let primary = self.parse_primary()?;
        let mut predicates = Vec::new();
        while self.eat(&Tok::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(&Tok::RBracket)?;
        }
        let steps = self.parse_relative_steps(false)?;
        if predicates.is_empty() && steps.is_empty() {
            return Ok(primary);
        }
        Ok(Expr::Filter { primary: Box::new(primary), predicates, steps })
    }

    fn parse_location_path(&mut self) -> Result<Expr, String> {
        let mut steps = Vec::new();
        let absolute = if self.eat(&Tok::DoubleSlash) {
            steps.push(Step::descendant_or_self());
            steps.push(self.parse_step()?);
            true
        } else if self.eat(&Tok::Slash) {
            if self.starts_step() {
                steps.push(self.parse_step()?);
            }
            true
        } else {
            steps.push(self.parse_step()?);
            false
        };
        steps.extend(self.parse_relative_steps(false)?);
        Ok(Expr::Path { absolute, steps })
    }

    fn parse_relative_steps(&mut self, mut required: bool) -> Result<Vec<Step>, String> {
        let mut steps = Vec::new();
        loop {
            if required {
                steps.push(self.parse_step()?);
                required = false;
            } else if self.eat(&Tok::DoubleSlash) {
                steps.push(Step::descendant_or_self());
                required = true;
            } else if self.eat(&Tok::Slash) {
                required = true;
            } else {
                return Ok(steps);
            }
        }
    }

    fn starts_step(&self) -> bool {
        matches!(self.peek(), Some(Tok::Dot | Tok::DoubleDot | Tok::At | Tok::Star | Tok::Name(_)))
    }

    fn parse_step(&mut self) -> Result<Step, String> {
        if self.eat(&Tok::Dot) {
            return Ok(Step { axis: Axis::SelfAxis, test: NodeTest::Node, predicates: Vec::new() });
        }
        if self.eat(&Tok::DoubleDot) {
            return Ok(Step { axis: Axis::Parent, test: NodeTest::Node, predicates: Vec::new() });
        }

        let axis = if self.eat(&Tok::At) {
            Axis::Attribute
        } else if self.peek_at(1) == Some(&Tok::DoubleColon) {
            let Some(Tok::Name(name)) = self.advance() else {
                return Err("expected axis name".to_owned());
            };
            self.expect(&Tok::DoubleColon)?;
            Axis::from_name(&name).ok_or_else(|| format!("unknown axis `{name}`"))?
        } else {
            Axis::Child
        };

        let test = match self.advance() {
            Some(Tok::Star) => NodeTest::Wildcard,
            Some(Tok::Name(name)) if is_node_type(&name) && self.peek() == Some(&Tok::LParen) => {
                self.expect(&Tok::LParen)?;
                self.expect(&Tok::RParen)?;
                match name.as_str() {
                    "text" => NodeTest::Text,
                    "comment" => NodeTest::Comment,
                    _ => NodeTest::Node,
                }
            }
            Some(Tok::Name(name)) => NodeTest::Name(name),
            other => return Err(format!("expected a node test, found {}", describe(other.as_ref()))),
        };

        let mut predicates = Vec::new();
        while self.eat(&Tok::LBracket) {
            predicates.push(self.parse_or()?);
            self.expect(&Tok::RBracket)?;
        }
        Ok(Step { axis, test, predicates })
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Tok::LParen) => {
                let inner = self.parse_or()?;
                self.expect(&Tok::RParen)?;
                Ok(inner)
            }
            Some(Tok::Literal(value)) => Ok(Expr::Literal(value)),
            Some(Tok::Number(value)) => Ok(Expr::Number(value)),
            Some(Tok::Name(name)) => {
                self.expect(&Tok::LParen)?;
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    args.push(self.parse_or()?);
                    while self.eat(&Tok::Comma) {
                        args.push(self.parse_or()?);
                    }
                    self.expect(&Tok::RParen)?;
                }
                Ok(Expr::Call(name, args))
            }
            other => Err(format!("unexpected {}", describe(other.as_ref()))),
        }
    }
}

fn is_node_type(name: &str) -> bool {
    matches!(name, "text" | "node" | "comment")
}

fn describe(tok: Option<&Tok>) -> String {
    match tok {
        Some(tok) => format!("{tok:?}"),
        None => "end of expression".to_owned(),
    }
}

// --- evaluation ---

#[derive(Debug, Clone)]
enum Value {
    Nodes(Vec<NodeRef>),
    Str(String),
    Num(f64),
    Bool(bool),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Nodes(_) => "node-set",
            Self::Str(_) => "string",
            Self::Num(_) => "number",
            Self::Bool(_) => "boolean",
        }
    }

    fn to_bool(&self) -> bool {
        match self {
            Self::Nodes(nodes) => !nodes.is_empty(),
            Self::Str(s) => !s.is_empty(),
            Self::Num(n) => *n != 0.0 && !n.is_nan(),
            Self::Bool(b) => *b,
        }
    }
}

fn parse_number(s: &str) -> f64 {
    s.trim().parse().unwrap_or(f64::NAN)
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned()
    } else if n == n.trunc() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

struct Context {
    item: NodeRef,
    position: usize,
    size: usize,
}

struct Evaluator<'a> {
    doc: &'a Document,
    order: Vec<NodeId>,
    ranks: Vec<usize>,
}

impl<'a> Evaluator<'a> {
    fn new(doc: &'a Document) -> Self {
        Self {
            doc,
            order: doc.descendants_or_self(doc.document_node()),
            ranks: doc.document_order(),
        }
    }

    fn rank(&self, id: NodeId) -> usize {
        self.ranks.get(id.index()).copied().unwrap_or(usize::MAX)
    }

    fn sort_key(&self, item: &NodeRef) -> (usize, usize) {
        match item {
            NodeRef::Node(id) => (self.rank(*id), 0),
            NodeRef::Attribute { element, name } => {
                let slot = self
                    .doc
                    .element(*element)
                    .and_then(|el| el.attributes().get_index_of(name.as_str()))
                    .unwrap_or(0);
                (self.rank(*element), slot + 1)
            }
        }
    }

    fn document_order(&self, mut items: Vec<NodeRef>) -> Vec<NodeRef> {
        items.sort_by_key(|item| self.sort_key(item));
        items.dedup();
        items
    }

    fn string_value(&self, item: &NodeRef) -> String {
        match item {
            NodeRef::Node(id) => self.doc.text_content(*id),
            NodeRef::Attribute { element, name } => self
                .doc
                .element(*element)
                .and_then(|el| el.attribute(name))
                .unwrap_or_default()
                .to_owned(),
        }
    }

    fn to_string(&self, value: &Value) -> String {
        match value {
            Value::Nodes(nodes) => nodes.first().map(|n| self.string_value(n)).unwrap_or_default(),
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_number(*n),
            Value::Bool(b) => b.to_string(),
        }
    }

    fn to_number(&self, value: &Value) -> f64 {
        match value {
            Value::Num(n) => *n,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => parse_number(&self.to_string(other)),
        }
    }

    fn eval(&self, ctx: &Context, expr: &Expr) -> Result<Value, String> {
        match expr {
            Expr::Literal(s) => Ok(Value::Str(s.clone())),
            Expr::Number(n) => Ok(Value::Num(*n)),
            Expr::Path { absolute, steps } => {
                let start = if *absolute {
                    NodeRef::Node(self.doc.document_node())
                } else {
                    ctx.item.clone()
                };
                self.eval_steps(vec![start], steps).map(Value::Nodes)
            }
            Expr::Filter { primary, predicates, steps } => {
                let Value::Nodes(mut nodes) = self.eval(ctx, primary)? else {
                    return Err("predicates and paths can only follow a node-set".to_owned());
                };
                for predicate in predicates {
                    nodes = self.filter(nodes, predicate)?;
                }
                self.eval_steps(nodes, steps).map(Value::Nodes)
            }
            Expr::Union(left, right) => match (self.eval(ctx, left)?, self.eval(ctx, right)?) {
                (Value::Nodes(mut a), Value::Nodes(b)) => {
                    a.extend(b);
                    Ok(Value::Nodes(self.document_order(a)))
                }
                _ => Err("the union operator `|` requires node-sets on both sides".to_owned()),
            },
            Expr::Negate(inner) => {
                let value = self.eval(ctx, inner)?;
                Ok(Value::Num(-self.to_number(&value)))
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let value = self.eval(ctx, left)?.to_bool() || self.eval(ctx, right)?.to_bool();
                Ok(Value::Bool(value))
            }
            Expr::Binary(BinOp::And, left, right) => {
                let value = self.eval(ctx, left)?.to_bool() && self.eval(ctx, right)?.to_bool();
                Ok(Value::Bool(value))
            }
            Expr::Binary(op, left, right) => {
                let lv = self.eval(ctx, left)?;
                let rv = self.eval(ctx, right)?;
                Ok(self.binary(*op, &lv, &rv))
            }
            Expr::Call(name, args) => self.call(ctx, name, args),
        }
    }

    fn eval_steps(&self, start: Vec<NodeRef>, steps: &[Step]) -> Result<Vec<NodeRef>, String> {
        let mut current = start;
        for step in steps {
            let mut next = Vec::new();
            for item in &current {
                let mut matched: Vec<NodeRef> = self
                    .axis(item, step.axis)
                    .into_iter()
                    .filter(|candidate| self.matches(candidate, step.axis, &step.test))
                    .collect();
                for predicate in &step.predicates {
                    matched = self.filter(matched, predicate)?;
                }
                next.extend(matched);
            }
            current = self.document_order(next);
        }
        Ok(current)
    }

    fn filter(&self, items: Vec<NodeRef>, predicate: &Expr) -> Result<Vec<NodeRef>, String> {
        let size = items.len();
        let mut kept = Vec::with_capacity(size);
        for (index, item) in items.into_iter().enumerate() {
            let ctx = Context { item, position: index + 1, size };
            let keep = match self.eval(&ctx, predicate)? {
                Value::Num(n) => n == ctx.position as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(ctx.item);
            }
        }
        Ok(kept)
    }

    fn axis(&self, item: &NodeRef, axis: Axis) -> Vec<NodeRef> {
        let doc = self.doc;
        let nodes = |ids: Vec<NodeId>| ids.into_iter().map(NodeRef::Node).collect::<Vec<_>>();

        let id = match item {
            NodeRef::Node(id) => *id,
            NodeRef::Attribute { element, .. } => {
                return match axis {
                    Axis::SelfAxis => vec![item.clone()],
                    Axis::Parent => vec![NodeRef::Node(*element)],
                    Axis::Ancestor => {
                        nodes(std::iter::once(*element).chain(doc.ancestors(*element)).collect())
                    }
                    Axis::AncestorOrSelf => {
                        let mut out = vec![item.clone()];
                        out.push(NodeRef::Node(*element));
                        out.extend(doc.ancestors(*element).map(NodeRef::Node));
                        out
                    }
                    _ => Vec::new(),
                };
            }
        };

        match axis {
            Axis::Child => nodes(doc.children(id).to_vec()),
            Axis::Descendant => nodes(doc.descendants_or_self(id).into_iter().skip(1).collect()),
            Axis::DescendantOrSelf => nodes(doc.descendants_or_self(id)),
            Axis::SelfAxis => vec![item.clone()],
            Axis::Parent => nodes(doc.parent(id).into_iter().collect()),
            Axis::Ancestor => nodes(doc.ancestors(id).collect()),
            Axis::AncestorOrSelf => nodes(std::iter::once(id).chain(doc.ancestors(id)).collect()),
            Axis::FollowingSibling | Axis::PrecedingSibling => {
                let Some(parent) = doc.parent(id) else {
                    return Vec::new();
                };
                let siblings = doc.children(parent);
                let Some(at) = siblings.iter().position(|&s| s == id) else {
                    return Vec::new();
                };
                if axis == Axis::FollowingSibling {
                    nodes(siblings[at + 1..].to_vec())
                } else {
                    nodes(siblings[..at].iter().rev().copied().collect())
                }
            }
            Axis::Following => {
                let rank = self.rank(id);
                let skip: Vec<NodeId> = doc.descendants_or_self(id);
                nodes(
                    self.order
                        .iter()
                        .copied()
                        .filter(|&n| self.rank(n) > rank && !skip.contains(&n))
                        .collect(),
                )
            }
            Axis::Preceding => {
                let rank = self.rank(id);
                let ancestors: Vec<NodeId> = doc.ancestors(id).collect();
                nodes(
                    self.order
                        .iter()
                        .rev()
                        .copied()
                        .filter(|&n| self.rank(n) < rank && !ancestors.contains(&n))
                        .collect(),
                )
            }
            Axis::Attribute => doc
                .element(id)
                .map(|el| {
                    el.attributes()
                        .keys()
                        .map(|name| NodeRef::Attribute { element: id, name: name.clone() })
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    fn matches(&self, item: &NodeRef, axis: Axis, test: &NodeTest) -> bool {
        match item {
            NodeRef::Attribute { name, .. } => match test {
                NodeTest::Node => true,
                NodeTest::Wildcard => axis == Axis::Attribute || axis == Axis::SelfAxis,
                NodeTest::Name(wanted) => {
                    (axis == Axis::Attribute || axis == Axis::SelfAxis) && wanted == name
                }
                NodeTest::Text | NodeTest::Comment => false,
            },
            NodeRef::Node(id) => match (self.doc.kind(*id), test) {
                (_, NodeTest::Node) => true,
                (_, _) if axis == Axis::Attribute => false,
                (NodeKind::Element, NodeTest::Wildcard) => true,
                (NodeKind::Element, NodeTest::Name(wanted)) => {
                    self.doc.element(*id).is_some_and(|el| el.name() == wanted)
                }
                (NodeKind::Text, NodeTest::Text) => true,
                (NodeKind::Comment, NodeTest::Comment) => true,
                _ => false,
            },
        }
    }

    fn binary(&self, op: BinOp, left: &Value, right: &Value) -> Value {
        match op {
            BinOp::Add => Value::Num(self.to_number(left) + self.to_number(right)),
            BinOp::Sub => Value::Num(self.to_number(left) - self.to_number(right)),
            BinOp::Mul => Value::Num(self.to_number(left) * self.to_number(right)),
            BinOp::Div => Value::Num(self.to_number(left) / self.to_number(right)),
            BinOp::Mod => Value::Num(self.to_number(left) % self.to_number(right)),
            _ => Value::Bool(self.compare(op, left, right)),
        }
    }

    /// Comparison with XPath's existential semantics for node-sets.
    fn compare(&self, op: BinOp, left: &Value, right: &Value) -> bool {
        match (left, right) {
            (Value::Nodes(a), Value::Nodes(b)) => a.iter().any(|x| {
                let xs = Value::Str(self.string_value(x));
                b.iter().any(|y| self.compare_atoms(op, &xs, &Value::Str(self.string_value(y))))
            }),
            (Value::Nodes(a), Value::Bool(_)) => {
                self.compare_atoms(op, &Value::Bool(!a.is_empty()), right)
            }
            (Value::Bool(_), Value::Nodes(b)) => {
                self.compare_atoms(op, left, &Value::Bool(!b.is_empty()))
            }
            (Value::Nodes(a), _) => {
                a.iter().any(|x| self.compare_atoms(op, &Value::Str(self.string_value(x)), right))
            }
            (_, Value::Nodes(b)) => {
                b.iter().any(|y| self.compare_atoms(op, left, &Value::Str(self.string_value(y))))
            }
            _ => self.compare_atoms(op, left, right),
        }
    }

    fn compare_atoms(&self, op: BinOp, left: &Value, right: &Value) -> bool {
        match op {
            BinOp::Eq | BinOp::Ne => {
                let equal = match (left, right) {
                    (Value::Bool(_), _) | (_, Value::Bool(_)) => left.to_bool() == right.to_bool(),
                    (Value::Num(_), _) | (_, Value::Num(_)) => {
                        self.to_number(left) == self.to_number(right)
                    }
                    _ => self.to_string(left) == self.to_string(right),
                };
                equal == (op == BinOp::Eq)
            }
            BinOp::Lt => self.to_number(left) < self.to_number(right),
            BinOp::Le => self.to_number(left) <= self.to_number(right),
            BinOp::Gt => self.to_number(left) > self.to_number(right),
            BinOp::Ge => self.to_number(left) >= self.to_number(right),
            _ => false,
        }
    }

    fn call(&self, ctx: &Context, name: &str, args: &[Expr]) -> Result<Value, String> {
        let arity = |min: usize, max: usize| -> Result<(), String> {
            if args.len() < min || args.len() > max {
                Err(format!("{name}() takes {min}..={max} argument(s), got {}", args.len()))
            } else {
                Ok(())
            }
        };
        let string_arg = |index: usize| -> Result<String, String> {
            match args.get(index) {
                Some(arg) => Ok(self.to_string(&self.eval(ctx, arg)?)),
                None => Ok(self.string_value(&ctx.item)),
            }
        };

        match name {
            "position" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.position as f64))
            }
            "last" => {
                arity(0, 0)?;
                Ok(Value::Num(ctx.size as f64))
            }
            "true" | "false" => {
                arity(0, 0)?;
                Ok(Value::Bool(name == "true"))
            }
            "count" => {
                arity(1, 1)?;
                match self.eval(ctx, &args[0])? {
                    Value::Nodes(nodes) => Ok(Value::Num(nodes.len() as f64)),
                    other => Err(format!("count() expects a node-set, got a {}", other.type_name())),
                }
            }
            "not" | "boolean" => {
                arity(1, 1)?;
                let value = self.eval(ctx, &args[0])?.to_bool();
                Ok(Value::Bool(if name == "not" { !value } else { value }))
            }
            "number" => {
                arity(0, 1)?;
                match args.first() {
                    Some(arg) => Ok(Value::Num(self.to_number(&self.eval(ctx, arg)?))),
                    None => Ok(Value::Num(parse_number(&self.string_value(&ctx.item)))),
                }
            }
            "sum" => {
                arity(1, 1)?;
                match self.eval(ctx, &args[0])? {
                    Value::Nodes(nodes) => Ok(Value::Num(
                        nodes.iter().map(|n| parse_number(&self.string_value(n))).sum(),
                    )),
                    other => Err(format!("sum() expects a node-set, got a {}", other.type_name())),
                }
            }
            "string" => {
                arity(0, 1)?;
                Ok(Value::Str(string_arg(0)?))
            }
            "string-length" => {
                arity(0, 1)?;
                Ok(Value::Num(string_arg(0)?.chars().count() as f64))
            }
            "normalize-space" => {
                arity(0, 1)?;
                Ok(Value::Str(string_arg(0)?.split_whitespace().collect::<Vec<_>>().join(" ")))
            }
            "concat" => {
                if args.len() < 2 {
                    return Err("concat() takes at least 2 arguments".to_owned());
                }
                let mut out = String::new();
                for index in 0..args.len() {
                    out.push_str(&string_arg(index)?);
                }
                Ok(Value::Str(out))
            }
            "contains" | "starts-with" | "ends-with" => {
                arity(2, 2)?;
                let (haystack, needle) = (string_arg(0)?, string_arg(1)?);
                Ok(Value::Bool(match name {
                    "contains" => haystack.contains(&needle),
                    "starts-with" => haystack.starts_with(&needle),
                    _ => haystack.ends_with(&needle),
                }))
            }
            "substring-before" | "substring-after" => {
                arity(2, 2)?;
                let (haystack, needle) = (string_arg(0)?, string_arg(1)?);
                let out = match haystack.find(&needle) {
                    Some(at) if name == "substring-before" => haystack[..at].to_owned(),
                    Some(at) => haystack[at + needle.len()..].to_owned(),
                    None => String::new(),
                };
                Ok(Value::Str(out))
            }
            "name" | "local-name" => {
                arity(0, 1)?;
                let target = match args.first() {
                    Some(arg) => match self.eval(ctx, arg)? {
                        Value::Nodes(nodes) => nodes.into_iter().next(),
                        other => {
                            return Err(format!("{name}() expects a node-set, got a {}", other.type_name()))
                        }
                    },
                    None => Some(ctx.item.clone()),
                };
                let qname = match target {
                    Some(NodeRef::Attribute { name, .. }) => name,
                    Some(NodeRef::Node(id)) => {
                        self.doc.element(id).map(|el| el.name().to_owned()).unwrap_or_default()
                    }
                    None => String::new(),
                };
                if name == "local-name" {
                    let local = qname.rsplit(':').next().unwrap_or_default().to_owned();
                    Ok(Value::Str(local))
                } else {
                    Ok(Value::Str(qname))
                }
            }
            other => Err(format!("unknown function `{other}()`")),
        }
    }
}

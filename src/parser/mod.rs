//! Table-driven expression parser.
//!
//! Every token is classified first (parameter, constant, intrinsic, user
//! function, ...), then matched against a small state table. Each row names
//! the stage it belongs to, the action to run and the stage to continue at.
//! Actions grow an operator-precedence tree where one stage holds the
//! operators of one precedence level as a sibling chain.

pub mod optimise;

use std::collections::HashMap;

use crate::ast::*;
use crate::config::MAX_FUNCTION_PARAMETER_LIST;
use crate::lexer::{LexError, Token, TokenCursor};
use crate::vm::{FunctionHandle, FunctionVM, VmError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Parse error at token {position}: {message}")]
pub struct ParseError {
    pub code: &'static str,
    pub position: usize,
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl ParseError {
    pub fn from_lex(e: &LexError) -> Self {
        ParseError {
            code: "FN-L001",
            position: 0,
            span: Span { start: e.position, end: e.position + e.snippet.len().max(1) },
            message: format!("Unexpected '{}' in function.", e.snippet),
            hint: Some(e.suggestion.clone()),
        }
    }
}

type Result<T> = std::result::Result<T, ParseError>;

// ── Environment ──────────────────────────────────────────────────────

/// What a non-parameter identifier stands for in the embedding scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Symbol {
    /// Inlined as a literal when the function is compiled.
    Constant(f64),
    /// Read from the VM's global store at evaluation time.
    Global(u32),
    Function(FunctionHandle),
}

pub trait Environment {
    fn lookup(&self, name: &str) -> Option<Symbol>;

    /// Value of the `clock` keyword.
    fn clock(&self) -> f64 {
        0.0
    }
}

/// Name table for hosts without a scene of their own, like the CLI.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    symbols: HashMap<String, Symbol>,
    next_global: u32,
    pub clock: f64,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn define_constant(&mut self, name: impl Into<String>, value: f64) {
        self.symbols.insert(name.into(), Symbol::Constant(value));
    }

    /// Binds `name` to the next free global slot and returns the slot.
    pub fn define_global(&mut self, name: impl Into<String>) -> u32 {
        let name = name.into();
        if let Some(Symbol::Global(k)) = self.symbols.get(&name) {
            return *k;
        }
        let k = self.next_global;
        self.next_global += 1;
        self.symbols.insert(name, Symbol::Global(k));
        k
    }

    pub fn define_function(&mut self, name: impl Into<String>, handle: FunctionHandle) {
        self.symbols.insert(name.into(), Symbol::Function(handle));
    }

    pub fn get(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }

    pub fn globals(&self) -> u32 {
        self.next_global
    }
}

impl Environment for SymbolTable {
    fn lookup(&self, name: &str) -> Option<Symbol> {
        self.get(name)
    }

    fn clock(&self) -> f64 {
        self.clock
    }
}

// ── Definitions ──────────────────────────────────────────────────────

pub const DEFAULT_PARAMETERS: [&str; 3] = ["x", "y", "z"];

pub fn default_parameters() -> Vec<String> {
    DEFAULT_PARAMETERS.iter().map(|s| s.to_string()).collect()
}

/// `name(p1, p2) = body` or `name = body`, split into its parts.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub name: String,
    pub parameters: Vec<String>,
    pub explicit_parameters: bool,
    pub body: String,
    /// Byte offset of `body` within the definition text.
    pub body_offset: usize,
}

impl Definition {
    /// Trap number when the body is exactly `internal(N)`.
    pub fn internal(&self) -> Option<u32> {
        let tokens = crate::lexer::lex(&self.body).ok()?;
        match tokens.as_slice() {
            [(Token::Ident(kw), _), (Token::LParen, _), (Token::Number(n), _), (Token::RParen, _)]
                if kw == "internal" && n.fract() == 0.0 && *n >= 0.0 =>
            {
                Some(*n as u32)
            }
            _ => None,
        }
    }
}

fn header_error(message: impl Into<String>, span: Span) -> ParseError {
    ParseError { code: "FN-P003", position: 0, span, message: message.into(), hint: None }
}

pub fn parse_definition(text: &str) -> Result<Definition> {
    let Some(eq) = text.find('=') else {
        return Err(header_error(
            "Expected '=' after the function name.",
            Span { start: text.len(), end: text.len() },
        ));
    };
    let header = &text[..eq];
    let tokens = crate::lexer::lex(header).map_err(|e| ParseError::from_lex(&e))?;
    let mut it = tokens.into_iter();

    let name = match it.next() {
        Some((Token::Ident(name), _)) => name,
        Some((t, span)) => return Err(header_error(format!("Expected 'function name', '{}' found instead", t.describe()), span)),
        None => return Err(header_error("Expected 'function name' before '='.", Span { start: 0, end: eq })),
    };

    let (parameters, explicit_parameters) = match it.next() {
        None => (default_parameters(), false),
        Some((Token::LParen, open)) => {
            let rest: Vec<(Token, Span)> = it.collect();
            (parameter_list(&rest, open)?, true)
        }
        Some((t, span)) => return Err(header_error(format!("Expected '(' or '=', '{}' found instead", t.describe()), span)),
    };

    Ok(Definition { name, parameters, explicit_parameters, body: text[eq + 1..].to_string(), body_offset: eq + 1 })
}

/// Parses the tokens after `(` up to and including the closing `)`.
fn parameter_list(tokens: &[(Token, Span)], open: Span) -> Result<Vec<String>> {
    let mut params = Vec::new();
    let mut i = 0;
    if let Some((Token::RParen, span)) = tokens.first() {
        return Err(header_error("At least one function parameter is required!", open.merge(*span)));
    }
    loop {
        match tokens.get(i) {
            Some((Token::Ident(p), span)) => {
                if params.len() == MAX_FUNCTION_PARAMETER_LIST {
                    return Err(header_error(
                        format!("At most {MAX_FUNCTION_PARAMETER_LIST} function parameters are supported."),
                        *span,
                    ));
                }
                params.push(p.clone());
            }
            Some((t, span)) => return Err(header_error(format!("Expected 'parameter identifier', '{}' found instead", t.describe()), *span)),
            None => return Err(header_error("Expected 'parameter identifier' before '='.", open)),
        }
        i += 1;
        match tokens.get(i) {
            Some((Token::Comma, _)) => i += 1,
            Some((Token::RParen, _)) => break,
            Some((t, span)) => return Err(header_error(format!("Expected ',' or ')', '{}' found instead", t.describe()), *span)),
            None => return Err(header_error("Expected ')' before '='.", open)),
        }
    }
    if let Some((t, span)) = tokens.get(i + 1) {
        return Err(header_error(format!("Expected '=', '{}' found instead", t.describe()), *span));
    }
    Ok(params)
}

/// Comma separated parameter names, as given to `fnvm -p`.
pub fn parse_parameter_names(text: &str) -> Result<Vec<String>> {
    let mut tokens = crate::lexer::lex(text).map_err(|e| ParseError::from_lex(&e))?;
    let end = Span { start: text.len(), end: text.len() };
    tokens.push((Token::RParen, end));
    parameter_list(&tokens, Span { start: 0, end: 0 })
}

// ── Parse table ──────────────────────────────────────────────────────

/// Token class after identifier resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Bar,
    Amp,
    Equals,
    NotEquals,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Bang,
    LParen,
    RParen,
    RBrace,
    Comma,
    Dot,
    End,
    Float,
    FloatId,
    FunctId,
    VectFunctId,
    Other,
}

enum Match {
    Is(Class),
    /// Any token written as an identifier.
    Ident,
    Any,
}

#[derive(Clone, Copy)]
enum Action {
    Grow,
    Noop,
    Put,
    Member,
    Call,
    New,
    Dot,
    Ret,
    Err,
}

struct Row {
    stage: i32,
    token: Match,
    action: Action,
    next: i32,
    op: Op,
}

const fn row(stage: i32, token: Match, action: Action, next: i32, op: Op) -> Row {
    Row { stage, token, action, next, op }
}

use Action as A;
use Class as C;

static TABLE: [Row; 34] = [
    row(5, Match::Is(C::Bar), A::Grow, 40, Op::Or),
    row(10, Match::Is(C::Amp), A::Grow, 40, Op::And),
    row(15, Match::Is(C::Equals), A::Grow, 40, Op::CmpEq),
    row(15, Match::Is(C::NotEquals), A::Grow, 40, Op::CmpNe),
    row(15, Match::Is(C::Less), A::Grow, 40, Op::CmpLt),
    row(15, Match::Is(C::LessEq), A::Grow, 40, Op::CmpLe),
    row(15, Match::Is(C::Greater), A::Grow, 40, Op::CmpGt),
    row(15, Match::Is(C::GreaterEq), A::Grow, 40, Op::CmpGe),
    row(20, Match::Is(C::Plus), A::Grow, 40, Op::Add),
    row(20, Match::Is(C::Minus), A::Grow, 40, Op::Sub),
    row(25, Match::Is(C::Star), A::Grow, 40, Op::Mul),
    row(25, Match::Is(C::Slash), A::Grow, 40, Op::Div),
    row(30, Match::Is(C::Caret), A::Grow, 40, Op::Pow),
    row(35, Match::Is(C::RParen), A::Ret, -1, Op::None),
    row(35, Match::Is(C::RBrace), A::Ret, -1, Op::None),
    row(35, Match::Is(C::Comma), A::Ret, -1, Op::None),
    row(35, Match::Is(C::End), A::Ret, -1, Op::None),
    row(35, Match::Any, A::Err, -1, Op::None),
    row(45, Match::Is(C::Dot), A::Dot, 60, Op::Dot),
    row(45, Match::Any, A::Err, -1, Op::None),
    // START_INDEX
    row(40, Match::Is(C::Plus), A::Noop, 50, Op::None),
    row(40, Match::Is(C::Minus), A::Grow, 50, Op::Neg),
    row(40, Match::Is(C::Bang), A::Err, -1, Op::Not),
    row(50, Match::Is(C::Float), A::Put, 5, Op::Constant),
    row(50, Match::Is(C::FloatId), A::Put, 5, Op::Variable),
    row(50, Match::Is(C::FunctId), A::Call, 5, Op::Call),
    row(50, Match::Is(C::VectFunctId), A::Call, 45, Op::Call),
    row(50, Match::Is(C::LParen), A::New, 55, Op::First),
    row(50, Match::Any, A::Err, -1, Op::None),
    row(55, Match::Is(C::RParen), A::Noop, 5, Op::None),
    row(55, Match::Any, A::Err, -1, Op::None),
    row(60, Match::Ident, A::Member, 5, Op::Member),
    row(60, Match::Any, A::Err, -1, Op::None),
    // never reached: every stage above ends in a wildcard
    row(-1, Match::Any, A::Err, -1, Op::None),
];

const START_INDEX: usize = 20;

const MAX_NESTING: usize = 256;

const SUSPICIOUS_IDENTIFIER: &str = "Suspicious identifier found in function! If you want to call a function make \
     sure the function you call has been declared. If you call an internal function, make sure it has been \
     declared as 'internal(N)'.";

fn expectation(stage: i32) -> &'static str {
    match stage {
        35 => "operator",
        45 => ".",
        40 => "sign or operand",
        50 => "operand",
        55 => ")",
        60 => "color or vector member",
        _ => "valid function expression",
    }
}

/// A token with its identifier resolved.
struct Lexeme {
    class: Class,
    ident: bool,
    value: f64,
    name: String,
    target: Option<CallTarget>,
    span: Span,
}

impl Match {
    fn accepts(&self, lx: &Lexeme) -> bool {
        match self {
            Match::Is(c) => *c == lx.class,
            Match::Ident => lx.ident,
            Match::Any => true,
        }
    }
}

// ── Parser ───────────────────────────────────────────────────────────

pub struct ExprParser<'a> {
    cursor: TokenCursor,
    tree: ExprTree,
    parameters: &'a [String],
    env: &'a dyn Environment,
    vm: &'a mut FunctionVM,
    depth: usize,
}

impl<'a> ExprParser<'a> {
    pub fn new(cursor: TokenCursor, parameters: &'a [String], env: &'a dyn Environment, vm: &'a mut FunctionVM) -> Self {
        ExprParser { cursor, tree: ExprTree::new(), parameters, env, vm, depth: 0 }
    }

    /// Parses a whole function body, optionally wrapped in `{ }`. On error
    /// every function reference taken so far is given back to the VM.
    pub fn parse(mut self) -> Result<ExprTree> {
        match self.parse_body() {
            Ok(root) => {
                self.tree.root = Some(root);
                Ok(self.tree)
            }
            Err(e) => {
                self.tree.release(self.vm);
                Err(e)
            }
        }
    }

    fn parse_body(&mut self) -> Result<NodeId> {
        let braced = matches!(self.cursor.next(), Some(Token::LBrace));
        if !braced {
            self.cursor.unget();
        }
        let root = self.parse_expr()?;
        let closing = self.cursor.next().cloned();
        match (braced, closing) {
            (false, None) => Ok(root),
            (true, Some(Token::RBrace)) => match self.cursor.next() {
                None => Ok(root),
                Some(_) => Err(self.expected("end of function")),
            },
            (true, _) => Err(self.expected("}")),
            (false, Some(_)) => Err(self.expected("end of function")),
        }
    }

    fn parse_expr(&mut self) -> Result<NodeId> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ParseError {
                code: "FN-P004",
                position: self.cursor.index(),
                span: self.cursor.span(),
                message: format!("Function expression nested deeper than {MAX_NESTING} levels."),
                hint: None,
            });
        }
        let first = self.tree.add(0, Op::First, self.cursor.span());
        let mut current = first;
        let mut start = START_INDEX;
        let mut after_ident = false;

        loop {
            let lx = self.next_lexeme();
            let mut i = start;
            while !TABLE[i].token.accepts(&lx) {
                i += 1;
            }
            let row = &TABLE[i];

            match row.action {
                A::Grow => current = self.grow(current, row.stage, row.op, lx.span),
                A::Noop => {}
                A::Put => self.put(current, row.op, &lx)?,
                A::Member => self.put_member(current, &lx)?,
                A::Call => current = self.call(current, &lx)?,
                A::New => self.group(current)?,
                A::Dot => current = self.dot(current, lx.span),
                A::Ret => {
                    self.cursor.unget();
                    break;
                }
                A::Err => return Err(self.stage_error(row.stage, lx.ident || after_ident)),
            }
            after_ident = lx.ident;

            if row.next >= 0 {
                if row.next < row.stage {
                    start = 0;
                }
                while TABLE[start].stage != row.next {
                    start += 1;
                }
            }
        }

        self.depth -= 1;
        Ok(first)
    }

    fn next_lexeme(&mut self) -> Lexeme {
        let token = self.cursor.next().cloned();
        let span = self.cursor.span();
        let simple = |class| Lexeme { class, ident: false, value: 0.0, name: String::new(), target: None, span };
        match token {
            None => simple(C::End),
            Some(Token::Bar) => simple(C::Bar),
            Some(Token::Amp) => simple(C::Amp),
            Some(Token::Equals) => simple(C::Equals),
            Some(Token::NotEquals) => simple(C::NotEquals),
            Some(Token::Less) => simple(C::Less),
            Some(Token::LessEq) => simple(C::LessEq),
            Some(Token::Greater) => simple(C::Greater),
            Some(Token::GreaterEq) => simple(C::GreaterEq),
            Some(Token::Plus) => simple(C::Plus),
            Some(Token::Minus) => simple(C::Minus),
            Some(Token::Star) => simple(C::Star),
            Some(Token::Slash) => simple(C::Slash),
            Some(Token::Caret) => simple(C::Caret),
            Some(Token::Bang) => simple(C::Bang),
            Some(Token::LParen) => simple(C::LParen),
            Some(Token::RParen) => simple(C::RParen),
            Some(Token::RBrace) => simple(C::RBrace),
            Some(Token::Comma) => simple(C::Comma),
            Some(Token::Dot) => simple(C::Dot),
            Some(Token::LBrace) => simple(C::Other),
            Some(Token::Number(value)) => Lexeme { value, ..simple(C::Float) },
            Some(Token::Ident(name)) => self.classify(name, span),
        }
    }

    /// Resolves an identifier: parameters shadow keywords, keywords shadow
    /// scene constants, and those shadow intrinsics and user functions.
    fn classify(&self, name: String, span: Span) -> Lexeme {
        let lexeme = |class: Class, value: f64, target: Option<CallTarget>| Lexeme { class, ident: true, value, name: name.clone(), target, span };

        if self.parameters.iter().any(|p| *p == name) {
            return lexeme(C::FloatId, 0.0, None);
        }
        match name.as_str() {
            "pi" => return lexeme(C::Float, std::f64::consts::PI, None),
            "tau" => return lexeme(C::Float, std::f64::consts::TAU, None),
            "clock" => return lexeme(C::Float, self.env.clock(), None),
            _ => {}
        }
        let symbol = self.env.lookup(&name);
        if let Some(Symbol::Constant(v)) = symbol {
            return lexeme(C::Float, v, None);
        }
        if let Some(b) = Builtin::from_name(&name) {
            return lexeme(C::FunctId, 0.0, Some(CallTarget::Builtin(b)));
        }
        if let Some(Symbol::Function(h)) = symbol {
            let vector = self.vm.function(h).map(|f| f.is_vector()).unwrap_or(false);
            return if vector {
                lexeme(C::VectFunctId, 0.0, Some(CallTarget::VectorFunction(h)))
            } else {
                lexeme(C::FunctId, 0.0, Some(CallTarget::Function(h)))
            };
        }
        lexeme(C::FloatId, 0.0, None)
    }

    // ── Actions ──────────────────────────────────────────────────────

    /// Inserts a chain operator of `stage` relative to `current` and
    /// returns the new operator node.
    fn grow(&mut self, current: NodeId, stage: i32, op: Op, span: Span) -> NodeId {
        let t = &mut self.tree;
        let mut cur = current;

        if t.node(cur).stage < stage {
            while let Some(c) = t.node(cur).child {
                if t.node(c).stage > stage {
                    break;
                }
                cur = c;
                if t.node(cur).stage == stage {
                    break;
                }
            }
        } else if t.node(cur).stage > stage {
            while let Some(p) = t.node(cur).parent {
                cur = p;
                if t.node(cur).stage <= stage {
                    break;
                }
            }
        }

        if t.node(cur).stage == stage {
            while let Some(n) = t.node(cur).next {
                cur = n;
            }
            let node = t.add(stage, op, span);
            t.node_mut(node).parent = t.node(cur).parent;
            t.node_mut(node).prev = Some(cur);
            t.node_mut(cur).next = Some(node);
            node
        } else {
            let leftmost = t.add(stage, Op::Leftmost, span);
            let taken = t.node(cur).child;
            t.node_mut(leftmost).parent = Some(cur);
            t.node_mut(leftmost).child = taken;
            t.node_mut(cur).child = Some(leftmost);
            let moved: Vec<NodeId> = t.siblings(taken).collect();
            for m in moved {
                t.node_mut(m).parent = Some(leftmost);
            }

            let node = t.add(stage, op, span);
            t.node_mut(node).prev = Some(leftmost);
            t.node_mut(node).parent = Some(cur);
            t.node_mut(leftmost).next = Some(node);
            node
        }
    }

    fn attach_child(&mut self, host: NodeId, node: NodeId) {
        self.tree.node_mut(host).child = Some(node);
        self.tree.node_mut(node).parent = Some(host);
    }

    fn put(&mut self, current: NodeId, op: Op, lx: &Lexeme) -> Result<()> {
        if self.tree.node(current).child.is_some() {
            return Err(self.expected("operator"));
        }
        let node = self.tree.add(50, op, lx.span);
        self.tree.node_mut(node).payload = match op {
            Op::Constant => Payload::Number(lx.value),
            _ => Payload::Name(lx.name.clone()),
        };
        self.attach_child(current, node);
        Ok(())
    }

    fn call(&mut self, current: NodeId, lx: &Lexeme) -> Result<NodeId> {
        let Some(target) = lx.target else {
            return Err(self.expected("operand"));
        };
        if let Some(h) = target.handle() {
            let taken = self.vm.function_and_reference(h).map(|_| ());
            taken.map_err(|e| self.vm_error(e))?;
        }
        let node = self.tree.add(50, Op::Call, lx.span);
        self.tree.node_mut(node).payload = Payload::Call(Call { name: lx.name.clone(), target });

        let mut host = current;
        while let Some(c) = self.tree.node(host).child {
            host = c;
        }
        self.attach_child(host, node);

        if self.cursor.next() != Some(&Token::LParen) {
            return Err(self.expected("("));
        }
        let first = self.parse_expr()?;
        self.attach_child(node, first);
        let mut last = first;
        loop {
            match self.cursor.next() {
                Some(Token::Comma) => {
                    let arg = self.parse_expr()?;
                    self.tree.node_mut(arg).parent = Some(node);
                    self.tree.node_mut(arg).prev = Some(last);
                    self.tree.node_mut(last).next = Some(arg);
                    last = arg;
                }
                Some(Token::RParen) => break,
                _ => return Err(self.expected(")")),
            }
        }
        let end = self.cursor.span();
        let n = self.tree.node_mut(node);
        n.span = n.span.merge(end);
        Ok(node)
    }

    fn group(&mut self, current: NodeId) -> Result<()> {
        let node = self.parse_expr()?;
        self.tree.node_mut(node).stage = STAGE_GROUP;
        self.attach_child(current, node);
        Ok(())
    }

    /// Wraps the vector call just parsed in a DOT node that will also own
    /// the member name.
    fn dot(&mut self, call: NodeId, span: Span) -> NodeId {
        let dot = self.tree.add(45, Op::Dot, span);
        if let Some(host) = self.tree.node(call).parent {
            self.attach_child(host, dot);
        }
        self.attach_child(dot, call);
        dot
    }

    fn put_member(&mut self, dot: NodeId, lx: &Lexeme) -> Result<()> {
        let Some(call) = self.tree.node(dot).child else {
            return Err(self.expected("color or vector member"));
        };
        let member = self.tree.add(60, Op::Member, lx.span);
        self.tree.node_mut(member).payload = Payload::Name(lx.name.clone());
        self.tree.node_mut(member).parent = Some(dot);
        self.tree.node_mut(member).prev = Some(call);
        self.tree.node_mut(call).next = Some(member);
        let d = self.tree.node_mut(dot);
        d.span = d.span.merge(lx.span);
        Ok(())
    }

    // ── Errors ───────────────────────────────────────────────────────

    fn expected(&self, what: &str) -> ParseError {
        ParseError {
            code: "FN-P001",
            position: self.cursor.index(),
            span: self.cursor.span(),
            message: format!("Expected '{what}', {} found instead", self.cursor.describe()),
            hint: None,
        }
    }

    /// `near_ident` is set when the failing token or the one before it was
    /// written as an identifier, e.g. `2 foo` or an unknown `foo(x)`.
    fn stage_error(&self, stage: i32, near_ident: bool) -> ParseError {
        let mut e = self.expected(expectation(stage));
        if stage == 35 && near_ident {
            e.hint = Some(SUSPICIOUS_IDENTIFIER.to_string());
        }
        e
    }

    fn vm_error(&self, e: VmError) -> ParseError {
        ParseError {
            code: "FN-R003",
            position: self.cursor.index(),
            span: self.cursor.span(),
            message: e.to_string(),
            hint: None,
        }
    }
}

/// Parses and optimises a function body.
pub fn parse_expression(
    source: &str,
    parameters: &[String],
    env: &dyn Environment,
    vm: &mut FunctionVM,
) -> Result<ExprTree> {
    let mut tree = parse_unoptimised(source, parameters, env, vm)?;
    match optimise::optimise(&mut tree) {
        Ok(()) => Ok(tree),
        Err(e) => {
            tree.release(vm);
            Err(e)
        }
    }
}

/// Parses a function body into the tree exactly as written.
pub fn parse_unoptimised(
    source: &str,
    parameters: &[String],
    env: &dyn Environment,
    vm: &mut FunctionVM,
) -> Result<ExprTree> {
    let cursor = TokenCursor::lex(source).map_err(|e| ParseError::from_lex(&e))?;
    ExprParser::new(cursor, parameters, env, vm).parse()
}

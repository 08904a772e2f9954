pub mod builtin;
pub mod source_map;

pub use builtin::Builtin;
pub use source_map::SourceMap;

use crate::vm::FunctionHandle;

// ---- Span infrastructure ----

/// Byte range within source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const UNKNOWN: Span = Span { start: 0, end: 0 };

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

// ── Expression tree ──────────────────────────────────────────────────
//
// Nodes live in one arena and refer to each other by index. `child` is the
// node's single operand group, `prev`/`next` link siblings of one stage,
// `parent` points back up. Dropping the tree frees everything at once;
// function references held by CALL nodes are released by `release`.

pub type NodeId = usize;

/// Stage given to a parenthesised group so it binds tighter than anything.
pub const STAGE_GROUP: i32 = 10000;

/// Node kinds. The order matters: everything up to `Leftmost` heads or
/// continues an operator chain, everything from `First` on is an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Op {
    None,
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,
    Add,
    Sub,
    Or,
    Mul,
    Div,
    And,
    Pow,
    Neg,
    Not,
    Leftmost,
    First,
    Constant,
    Variable,
    Dot,
    Member,
    Call,
    Trap,
}

impl Op {
    /// True for chain operators and `Leftmost` chain heads.
    pub fn is_chain(self) -> bool {
        self <= Op::Leftmost
    }

    pub fn is_compare(self) -> bool {
        matches!(self, Op::CmpEq | Op::CmpNe | Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe)
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::None => "none",
            Op::CmpEq => "=",
            Op::CmpNe => "!=",
            Op::CmpLt => "<",
            Op::CmpLe => "<=",
            Op::CmpGt => ">",
            Op::CmpGe => ">=",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Or => "|",
            Op::Mul => "*",
            Op::Div => "/",
            Op::And => "&",
            Op::Pow => "^",
            Op::Neg => "neg",
            Op::Not => "!",
            Op::Leftmost => "leftmost",
            Op::First => "first",
            Op::Constant => "constant",
            Op::Variable => "variable",
            Op::Dot => "dot",
            Op::Member => "member",
            Op::Call => "call",
            Op::Trap => "trap",
        }
    }

    /// Applies a binary chain operator to two already evaluated operands.
    /// Comparison and logic results are 0.0 or 1.0, matching the VM code.
    pub fn apply(self, left: f64, right: f64) -> Option<f64> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        Some(match self {
            Op::CmpEq => truth(left == right),
            Op::CmpNe => truth(left != right),
            Op::CmpLt => truth(left < right),
            Op::CmpLe => truth(left <= right),
            Op::CmpGt => truth(left > right),
            Op::CmpGe => truth(left >= right),
            Op::Add => left + right,
            Op::Sub => left - right,
            Op::Or => truth(truth(left != 0.0) + truth(right != 0.0) != 0.0),
            Op::Mul => left * right,
            Op::Div => left / right,
            Op::And => truth(left != 0.0) * truth(right != 0.0),
            Op::Pow => left.powf(right),
            _ => return None,
        })
    }
}

/// What a CALL node invokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Builtin(Builtin),
    Function(FunctionHandle),
    VectorFunction(FunctionHandle),
}

impl CallTarget {
    /// Handle whose reference count this node holds, if any.
    pub fn handle(self) -> Option<FunctionHandle> {
        match self {
            CallTarget::Builtin(_) => None,
            CallTarget::Function(h) | CallTarget::VectorFunction(h) => Some(h),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub target: CallTarget,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Number(f64),
    Name(String),
    Call(Call),
    Trap(u32),
}

#[derive(Debug, Clone)]
pub struct ExprNode {
    pub stage: i32,
    pub op: Op,
    pub payload: Payload,
    pub span: Span,
    pub parent: Option<NodeId>,
    pub child: Option<NodeId>,
    pub prev: Option<NodeId>,
    pub next: Option<NodeId>,
}

impl ExprNode {
    pub fn number(&self) -> f64 {
        match self.payload {
            Payload::Number(n) => n,
            _ => 0.0,
        }
    }

    pub fn name(&self) -> &str {
        match &self.payload {
            Payload::Name(n) => n,
            Payload::Call(c) => &c.name,
            _ => "",
        }
    }

    pub fn call(&self) -> Option<&Call> {
        match &self.payload {
            Payload::Call(c) => Some(c),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExprTree {
    nodes: Vec<ExprNode>,
    pub root: Option<NodeId>,
}

impl ExprTree {
    pub fn new() -> Self {
        ExprTree::default()
    }

    pub fn add(&mut self, stage: i32, op: Op, span: Span) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(ExprNode {
            stage,
            op,
            payload: Payload::None,
            span,
            parent: None,
            child: None,
            prev: None,
            next: None,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &ExprNode {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut ExprNode {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates a sibling chain starting at `first`.
    pub fn siblings(&self, first: Option<NodeId>) -> Siblings<'_> {
        Siblings { tree: self, cur: first }
    }

    /// Turns a node into a constant leaf, dropping its operand links.
    pub fn make_constant(&mut self, id: NodeId, value: f64) {
        let n = &mut self.nodes[id];
        n.op = Op::Constant;
        n.payload = Payload::Number(value);
        n.child = None;
    }

    /// Unlinks `id` from its sibling chain.
    pub fn unlink(&mut self, id: NodeId) {
        let (prev, next) = (self.nodes[id].prev, self.nodes[id].next);
        if let Some(p) = prev {
            self.nodes[p].next = next;
        }
        if let Some(n) = next {
            self.nodes[n].prev = prev;
        }
        self.nodes[id].prev = None;
        self.nodes[id].next = None;
    }

    /// Whether the subtree below `id` still reaches a variable, following
    /// `next` links and children.
    pub fn right_has_variable(&self, id: Option<NodeId>) -> bool {
        self.siblings(id).any(|i| {
            let n = &self.nodes[i];
            n.op == Op::Variable || self.right_has_variable(n.child)
        })
    }

    /// Same as `right_has_variable` but walks `prev` links from `id`.
    pub fn left_has_variable(&self, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(i) = cur {
            let n = &self.nodes[i];
            if n.op == Op::Variable || self.right_has_variable(n.child) {
                return true;
            }
            cur = n.prev;
        }
        false
    }

    /// Handles referenced by CALL nodes anywhere in the arena, including
    /// nodes a failed parse or the optimiser left detached.
    pub fn referenced_functions(&self) -> Vec<FunctionHandle> {
        self.nodes.iter().filter_map(|n| n.call().and_then(|c| c.target.handle())).collect()
    }

    /// Releases the function references held by the tree's CALL nodes.
    pub fn release(self, vm: &mut crate::vm::FunctionVM) {
        for h in self.referenced_functions() {
            vm.remove_function(h);
        }
    }

    /// Nested JSON rendering used by `fnvm --tree`.
    pub fn to_json(&self) -> serde_json::Value {
        match self.root {
            Some(root) => self.node_json(root),
            None => serde_json::Value::Null,
        }
    }

    fn chain_json(&self, first: Option<NodeId>) -> Vec<serde_json::Value> {
        self.siblings(first).map(|i| self.node_json(i)).collect()
    }

    fn node_json(&self, id: NodeId) -> serde_json::Value {
        let n = &self.nodes[id];
        let mut obj = serde_json::json!({
            "op": n.op.symbol(),
            "stage": n.stage,
        });
        match &n.payload {
            Payload::None => {}
            Payload::Number(v) => obj["value"] = serde_json::Value::from(*v),
            Payload::Name(s) => obj["name"] = serde_json::Value::from(s.as_str()),
            Payload::Call(c) => obj["name"] = serde_json::Value::from(c.name.as_str()),
            Payload::Trap(k) => obj["trap"] = serde_json::Value::from(*k),
        }
        if n.child.is_some() {
            obj["children"] = serde_json::Value::Array(self.chain_json(n.child));
        }
        obj
    }
}

pub struct Siblings<'a> {
    tree: &'a ExprTree,
    cur: Option<NodeId>,
}

impl Iterator for Siblings<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cur?;
        self.cur = self.tree.nodes[id].next;
        Some(id)
    }
}

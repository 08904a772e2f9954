//! Constant folding on the parsed expression tree.
//!
//! Nodes are rewritten in place: a folded chain head or group keeps its id
//! and becomes a `Constant`, folded chain operators are unlinked and stay
//! behind in the arena unreferenced.

use super::ParseError;
use crate::ast::{Builtin, CallTarget, ExprTree, NodeId, Op, Payload};

type Result<T> = std::result::Result<T, ParseError>;

pub fn optimise(tree: &mut ExprTree) -> Result<()> {
    let root = tree.root;
    optimise_node(tree, root)
}

fn optimise_node(t: &mut ExprTree, id: Option<NodeId>) -> Result<()> {
    let Some(id) = id else {
        return Ok(());
    };
    rewrite_pow(t, id);

    if t.node(id).op.is_chain() {
        return optimise_chain(t, id);
    }

    if t.node(id).op == Op::Call {
        let args: Vec<NodeId> = t.siblings(t.node(id).child).collect();
        for arg in args {
            optimise_node(t, Some(arg))?;
        }
        optimise_call(t, id)?;
    } else {
        let child = t.node(id).child;
        optimise_node(t, child)?;
    }

    if t.node(id).op == Op::First {
        if let Some(value) = single_constant(t, t.node(id).child) {
            t.make_constant(id, value);
        }
    }
    Ok(())
}

/// `pow(a, b)` becomes the group `(a ^ b)` so it folds and compiles like
/// any other power chain.
fn rewrite_pow(t: &mut ExprTree, id: NodeId) {
    let n = t.node(id);
    let is_pow = n.call().map(|c| c.target) == Some(CallTarget::Builtin(Builtin::Pow));
    if !is_pow {
        return;
    }
    let args: Vec<NodeId> = t.siblings(n.child).collect();
    let [base, exponent] = args[..] else {
        return;
    };
    let n = t.node_mut(id);
    n.op = Op::First;
    n.payload = Payload::None;
    t.node_mut(base).op = Op::Leftmost;
    t.node_mut(exponent).op = Op::Pow;
    t.node_mut(exponent).prev = Some(base);
}

fn single_constant(t: &ExprTree, id: Option<NodeId>) -> Option<f64> {
    let n = t.node(id?);
    (n.op == Op::Constant && n.next.is_none()).then(|| n.number())
}

/// Whether `op` may combine its operand with the one of `prev` without
/// changing what the rest of the chain computes. Products and quotients
/// with a variable further left keep their order, `x*2*3` stays as written.
fn foldable(t: &ExprTree, op: Op, prev: NodeId, right: f64) -> bool {
    let prev_op = t.node(prev).op;
    let product = prev_op == Op::Leftmost || (prev_op == Op::Mul && !t.left_has_variable(prev));
    match op {
        Op::Add | Op::Sub => matches!(prev_op, Op::Leftmost | Op::Add),
        Op::Mul => product,
        // a zero divisor is left for the compiler to report
        Op::Div => product && right != 0.0,
        _ => prev_op == Op::Leftmost,
    }
}

fn optimise_chain(t: &mut ExprTree, head: NodeId) -> Result<()> {
    if let Some(value) = negated_constant(t, head)? {
        t.make_constant(head, value);
        t.node_mut(head).next = None;
        return Ok(());
    }

    let child = t.node(head).child;
    optimise_node(t, child)?;

    let mut ptr = t.node(head).next;
    while let Some(p) = ptr {
        let Some(prev) = t.node(p).prev else {
            break;
        };
        let right = t.node(p).child;
        optimise_node(t, right)?;

        if let Some(r) = right {
            if t.node(p).op == Op::Sub && t.node(r).op == Op::Constant {
                let v = t.node(r).number();
                t.node_mut(p).op = Op::Add;
                t.node_mut(r).payload = Payload::Number(-v);
            }
        }

        if let (Some(l), Some(r)) = (t.node(prev).child, right) {
            let (left, right) = (t.node(l), t.node(r));
            let op = t.node(p).op;
            if left.op == Op::Constant && right.op == Op::Constant && foldable(t, op, prev, right.number()) {
                if let Some(v) = op.apply(left.number(), right.number()) {
                    t.node_mut(l).payload = Payload::Number(v);
                    t.unlink(p);
                    ptr = t.node(prev).next;
                    continue;
                }
            }
        }
        ptr = t.node(p).next;
    }

    if t.node(head).next.is_none() {
        if let Some(value) = single_constant(t, t.node(head).child) {
            t.make_constant(head, value);
        }
    }
    Ok(())
}

/// Value of a sign chain like `-(2)` whose operand folds to a constant.
fn negated_constant(t: &mut ExprTree, head: NodeId) -> Result<Option<f64>> {
    let Some(first) = t.node(head).next else {
        return Ok(None);
    };
    if t.node(first).op != Op::Neg {
        return Ok(None);
    }
    let mut count = 0;
    let mut operand = None;
    for p in t.siblings(Some(first)) {
        count += 1;
        if t.node(p).child.is_some() {
            operand = Some(p);
            break;
        }
    }
    let Some(p) = operand else {
        return Ok(None);
    };
    let child = t.node(p).child;
    optimise_node(t, child)?;
    let Some(c) = t.node(p).child else {
        return Ok(None);
    };
    if t.node(c).op != Op::Constant {
        return Ok(None);
    }
    let v = t.node(c).number();
    Ok(Some(if count % 2 == 0 { v } else { -v }))
}

/// Folds an intrinsic called with one constant argument.
fn optimise_call(t: &mut ExprTree, id: NodeId) -> Result<()> {
    let Some(CallTarget::Builtin(b)) = t.node(id).call().map(|c| c.target) else {
        return Ok(());
    };
    let Some(arg) = single_constant(t, t.node(id).child) else {
        return Ok(());
    };
    match b.fold(arg) {
        Ok(Some(value)) => {
            t.make_constant(id, value);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(name) => Err(ParseError {
            code: "FN-P002",
            position: 0,
            span: t.node(id).span,
            message: format!("Domain error in '{name}'."),
            hint: None,
        }),
    }
}

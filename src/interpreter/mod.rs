//! Reference evaluator that walks the expression tree directly.
//!
//! It evaluates the tree exactly as parsed, so comparing it against the
//! compiled bytecode checks both the optimiser and the lowering. Runtime
//! guards mirror the VM: a zero divisor, `ln`/`log` of a non-positive value,
//! `0^0` and a zero second argument to `mod`/`div` all fail.

use crate::ast::*;
use crate::parser::{Environment, Symbol};
use crate::vm::{FunctionHandle, FunctionVM, VmError};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Runtime error: {message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    fn new(msg: impl Into<String>) -> Self {
        RuntimeError { message: msg.into() }
    }

    fn floating_point() -> Self {
        RuntimeError::new("Floating-point exception: division by zero or value outside the function's domain.")
    }
}

impl From<VmError> for RuntimeError {
    fn from(e: VmError) -> Self {
        RuntimeError::new(e.to_string())
    }
}

type Result<T> = std::result::Result<T, RuntimeError>;

struct Interpreter<'a> {
    tree: &'a ExprTree,
    parameters: &'a [String],
    args: &'a [f64],
    env: &'a dyn Environment,
    vm: &'a FunctionVM,
    /// `sum`/`prod` loop variables, innermost last.
    locals: Vec<(String, f64)>,
}

/// Evaluates `tree` with `args` bound to `parameters` in order. Missing
/// arguments read as 0.0.
pub fn evaluate(
    tree: &ExprTree,
    parameters: &[String],
    args: &[f64],
    env: &dyn Environment,
    vm: &FunctionVM,
) -> Result<f64> {
    let root = tree.root.ok_or_else(|| RuntimeError::new("empty expression"))?;
    let mut interp = Interpreter { tree, parameters, args, env, vm, locals: Vec::new() };
    interp.eval(root)
}

impl Interpreter<'_> {
    fn eval(&mut self, id: NodeId) -> Result<f64> {
        let n = self.tree.node(id);
        match n.op {
            op if op.is_chain() => self.eval_chain(id),
            Op::First => match n.child {
                Some(c) => self.eval(c),
                None => Err(RuntimeError::new("empty group")),
            },
            Op::Constant => Ok(n.number()),
            Op::Variable => self.variable(n.name()),
            Op::Call => self.call(id),
            Op::Dot => self.member_access(id),
            Op::Member | Op::Trap => Err(RuntimeError::new(format!("unexpected '{}' node", n.op.symbol()))),
            _ => Err(RuntimeError::new("unknown node")),
        }
    }

    fn operand(&mut self, child: Option<NodeId>) -> Result<f64> {
        match child {
            Some(c) => self.eval(c),
            None => Ok(0.0),
        }
    }

    fn eval_chain(&mut self, head: NodeId) -> Result<f64> {
        let mut acc = 0.0;
        let chain: Vec<NodeId> = self.tree.siblings(Some(head)).collect();
        for id in chain {
            let n = self.tree.node(id);
            let (op, child) = (n.op, n.child);
            let right = self.operand(child)?;
            acc = match op {
                Op::Leftmost => right,
                Op::Neg => -right,
                Op::Div if right == 0.0 => return Err(RuntimeError::floating_point()),
                Op::Pow if acc == 0.0 && right == 0.0 => return Err(RuntimeError::floating_point()),
                op => op.apply(acc, right).ok_or_else(|| RuntimeError::new(format!("'{}' is not a binary operator", op.symbol())))?,
            };
        }
        Ok(acc)
    }

    fn variable(&self, name: &str) -> Result<f64> {
        if let Some((_, v)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(*v);
        }
        if let Some(i) = self.parameters.iter().position(|p| p == name) {
            return Ok(self.args.get(i).copied().unwrap_or(0.0));
        }
        match self.env.lookup(name) {
            Some(Symbol::Global(k)) => Ok(self.vm.get_global(k as usize)),
            Some(Symbol::Constant(v)) => Ok(v),
            _ => Err(RuntimeError::new(format!("undefined identifier '{name}'"))),
        }
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn arguments(&self, call: NodeId) -> Vec<NodeId> {
        self.tree.siblings(self.tree.node(call).child).collect()
    }

    fn values(&mut self, args: &[NodeId]) -> Result<Vec<f64>> {
        args.iter().map(|&a| self.eval(a)).collect()
    }

    fn call(&mut self, id: NodeId) -> Result<f64> {
        let Some(call) = self.tree.node(id).call() else {
            return Err(RuntimeError::new("call without target"));
        };
        let (name, target) = (call.name.clone(), call.target);
        let args = self.arguments(id);
        match target {
            CallTarget::Builtin(b) => self.builtin(b, &name, &args),
            CallTarget::Function(h) => {
                let values = self.values(&args)?;
                self.check_arity(h, values.len())?;
                let mut ctx = self.vm.create_context();
                Ok(ctx.evaluate(h, &values)?)
            }
            CallTarget::VectorFunction(_) => Err(RuntimeError::new(format!("'{name}' needs a member access"))),
        }
    }

    fn check_arity(&self, h: FunctionHandle, supplied: usize) -> Result<()> {
        let required = self.vm.function(h)?.parameter_count();
        if supplied != required {
            return Err(RuntimeError::new(format!(
                "Invalid number of parameters: {supplied} supplied, {required} required!"
            )));
        }
        Ok(())
    }

    fn member_access(&mut self, dot: NodeId) -> Result<f64> {
        let call = self.tree.node(dot).child.ok_or_else(|| RuntimeError::new("member access without call"))?;
        let member = self.tree.node(call).next.ok_or_else(|| RuntimeError::new("member access without member"))?;
        let Some(CallTarget::VectorFunction(h)) = self.tree.node(call).call().map(|c| c.target) else {
            return Err(RuntimeError::new("member access on a scalar function"));
        };
        let args = self.arguments(call);
        let values = self.values(&args)?;
        self.check_arity(h, values.len())?;
        let mut ctx = self.vm.create_context();
        let result = ctx.evaluate_vector(h, &values)?;
        let at = |i: usize| result.get(i).copied().unwrap_or(0.0);
        let name = self.tree.node(member).name();
        Ok(match name {
            "x" | "u" | "red" => at(0),
            "y" | "v" | "green" => at(1),
            "z" | "blue" => at(2),
            "t" | "filter" => at(3),
            "transmit" => at(4),
            "gray" | "grey" => at(0) * 0.297 + at(1) * 0.589 + at(2) * 0.114,
            "hf" => (at(0) + at(1) / 255.0) * 0.996093,
            other => return Err(RuntimeError::new(format!("invalid member '{other}'"))),
        })
    }

    fn expect_args(&self, name: &str, args: &[NodeId], min: usize, max: usize) -> Result<()> {
        if args.len() < min || args.len() > max {
            return Err(RuntimeError::new(format!("Invalid number of parameters for '{name}'")));
        }
        Ok(())
    }

    fn builtin(&mut self, b: Builtin, name: &str, args: &[NodeId]) -> Result<f64> {
        match b {
            Builtin::Min | Builtin::Max => {
                self.expect_args(name, args, 2, usize::MAX)?;
                let values = self.values(args)?;
                let pick = |a: f64, v: f64| match b {
                    Builtin::Min if v < a => v,
                    Builtin::Max if v > a => v,
                    _ => a,
                };
                Ok(values[1..].iter().fold(values[0], |a, &v| pick(a, v)))
            }
            Builtin::Select => {
                self.expect_args(name, args, 3, 4)?;
                let cond = self.eval(args[0])?;
                if cond < 0.0 {
                    self.eval(args[1])
                } else if args.len() == 4 && cond > 0.0 {
                    self.eval(args[3])
                } else {
                    self.eval(args[2])
                }
            }
            Builtin::Sum | Builtin::Prod => {
                self.expect_args(name, args, 4, 4)?;
                self.sequence(b == Builtin::Sum, args)
            }
            _ => {
                if let Some(f) = b.sys2() {
                    self.expect_args(name, args, 2, 2)?;
                    let (l, r) = (self.eval(args[0])?, self.eval(args[1])?);
                    let guarded = match b {
                        Builtin::Mod | Builtin::Div => r == 0.0,
                        Builtin::Pow => l == 0.0 && r == 0.0,
                        _ => false,
                    };
                    if guarded {
                        return Err(RuntimeError::floating_point());
                    }
                    return Ok(f.apply(l, r));
                }
                self.expect_args(name, args, 1, 1)?;
                let v = self.eval(args[0])?;
                if matches!(b, Builtin::Ln | Builtin::Log) && v <= 0.0 {
                    return Err(RuntimeError::floating_point());
                }
                match b.fold(v) {
                    Ok(Some(value)) => Ok(value),
                    _ => Err(RuntimeError::new(format!("cannot evaluate '{name}'"))),
                }
            }
        }
    }

    /// `sum(i, from, to, expr)` and `prod(...)`: `i` steps by one while it
    /// stays at or below `to`.
    fn sequence(&mut self, sum: bool, args: &[NodeId]) -> Result<f64> {
        let var = match self.tree.node(args[0]) {
            n if n.op == Op::First => n.child.map(|c| self.tree.node(c)),
            n => Some(n),
        };
        let Some(var) = var.filter(|v| v.op == Op::Variable && v.next.is_none()) else {
            return Err(RuntimeError::new("Local variable name expected!"));
        };
        let name = var.name().to_string();
        let mut acc = if sum { 0.0 } else { 1.0 };
        let mut i = self.eval(args[1])?;
        let last = self.eval(args[2])?;
        while i <= last {
            self.locals.push((name.clone(), i));
            let v = self.eval(args[3]);
            self.locals.pop();
            acc = if sum { acc + v? } else { acc * v? };
            i += 1.0;
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{default_parameters, parse_unoptimised, SymbolTable};

    fn run_with(source: &str, args: &[f64], env: &SymbolTable, vm: &mut FunctionVM) -> Result<f64> {
        let params = default_parameters();
        let tree = parse_unoptimised(source, &params, env, vm).unwrap();
        let out = evaluate(&tree, &params, args, env, vm);
        tree.release(vm);
        out
    }

    fn run(source: &str, args: &[f64]) -> Result<f64> {
        run_with(source, args, &SymbolTable::new(), &mut FunctionVM::new())
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(run("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(run("x - y - z", &[10.0, 3.0, 2.0]).unwrap(), 5.0);
        assert_eq!(run("2 ^ 3 ^ 2", &[]).unwrap(), 64.0);
        assert_eq!(run("-2 ^ 2", &[]).unwrap(), 4.0);
        assert_eq!(run("-x * 3", &[2.0]).unwrap(), -6.0);
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(run("x < y", &[1.0, 2.0]).unwrap(), 1.0);
        assert_eq!(run("x >= y", &[1.0, 2.0]).unwrap(), 0.0);
        assert_eq!(run("x & y | z", &[1.0, 0.0, 3.0]).unwrap(), 1.0);
        assert_eq!(run("x != 1", &[1.0]).unwrap(), 0.0);
    }

    #[test]
    fn guards_mirror_the_vm() {
        assert!(run("1 / x", &[0.0]).is_err());
        assert!(run("ln(x)", &[0.0]).is_err());
        assert!(run("mod(x, y)", &[1.0, 0.0]).is_err());
        assert!(run("pow(x, y)", &[0.0, 0.0]).is_err());
        assert_eq!(run("mod(x, y)", &[-7.0, 3.0]).unwrap(), -1.0);
    }

    #[test]
    fn builtins() {
        assert_eq!(run("min(3, x, 2)", &[1.0]).unwrap(), 1.0);
        assert_eq!(run("max(3, x, 2)", &[1.0]).unwrap(), 3.0);
        assert_eq!(run("abs(x) + sqr(y)", &[-2.0, 3.0]).unwrap(), 11.0);
        assert_eq!(run("select(x, 1, 2)", &[-1.0]).unwrap(), 1.0);
        assert_eq!(run("select(x, 1, 2)", &[0.0]).unwrap(), 2.0);
        assert_eq!(run("select(x, 1, 2, 3)", &[0.5]).unwrap(), 3.0);
        assert_eq!(run("div(7, 2)", &[]).unwrap(), 3.0);
        assert!(run("min(1)", &[]).is_err());
    }

    #[test]
    fn sum_and_prod_loops() {
        assert_eq!(run("sum(i, 1, 4, i)", &[]).unwrap(), 10.0);
        assert_eq!(run("prod(i, 1, 4, i)", &[]).unwrap(), 24.0);
        assert_eq!(run("sum(i, 1, 2, sum(j, 1, i, j * x))", &[2.0]).unwrap(), 8.0);
        assert_eq!(run("sum(i, 3, 1, i)", &[]).unwrap(), 0.0);
        assert!(run("sum(1, 1, 2, x)", &[]).is_err());
    }

    #[test]
    fn globals_are_read_from_the_vm() {
        let mut env = SymbolTable::new();
        let k = env.define_global("g");
        let mut vm = FunctionVM::new();
        vm.set_global(k as usize, 2.5);
        assert_eq!(run_with("g * 2", &[], &env, &mut vm).unwrap(), 5.0);
    }

    #[test]
    fn undefined_identifier() {
        assert_eq!(run("w", &[]).unwrap_err().message, "undefined identifier 'w'");
    }
}

//! Lowering of optimised expression trees to VM bytecode, and the
//! parse, optimise and lower pipeline that installs functions in a
//! `FunctionVM`.
//!
//! Register use: R0 holds the value just computed, R1 the second operand
//! of two-argument intrinsics, R2..R4 the x/y/z parameters. Each open
//! operator chain keeps its pending left operand in R5; entering a nested
//! chain moves it to R6, then R7, then to stack slots above the parameters.
//!
//! A call frame looks like this, growing upwards from the caller's `sp`:
//!
//! ```text
//!   temporaries of the argument expressions
//!   call parameters          <- callee frame base (push)
//!   vector return values     (vector functions only)
//!   saved R5, R6, R7
//!   caller temporaries       <- sp
//!   caller parameters        <- frame base
//! ```

use std::f64::consts::PI;

use crate::ast::{Builtin, CallTarget, ExprTree, NodeId, Op, Span};
use crate::config::MAX_FUNCTION_PARAMETER_LIST;
use crate::diagnostic::Diagnostic;
use crate::parser::{self, Environment, ParseError, Symbol};
use crate::vm::intrinsics::Sys2;
use crate::vm::traps::{TrapId, TRAPS_TABLE, TRAP_TABLE};
use crate::vm::{
    Address, BinOp, Cond, FunctionCode, FunctionHandle, FunctionVM, Instruction, PrivateData, Reg, SourceInfo,
    VmError,
};

const RED_INTENSITY: f64 = 0.297;
const GREEN_INTENSITY: f64 = 0.589;
const BLUE_INTENSITY: f64 = 0.114;

/// Parameter registers for x/u, y/v and z.
const PARAMETER_REGISTERS: [Reg; 3] = [Reg::R2, Reg::R3, Reg::R4];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Vm(#[from] VmError),
    #[error("{message}")]
    Lowering { code: &'static str, span: Span, message: String },
}

type Result<T> = std::result::Result<T, CompileError>;

/// A function installed in the registry, plus what the compiler warned about.
#[derive(Debug)]
pub struct Compiled {
    pub handle: FunctionHandle,
    pub warnings: Vec<Diagnostic>,
}

// ── Pipeline ─────────────────────────────────────────────────────────

/// Parses, optimises and lowers `source` into a new function. The
/// function's own name (from `info`) resolves to itself, so it may call
/// itself. On error the registry is left as it was.
pub fn compile_function(
    vm: &mut FunctionVM,
    env: &dyn Environment,
    source: &str,
    info: SourceInfo,
    parameters: Vec<String>,
) -> Result<Compiled> {
    let handle = vm.declare_function(info, parameters)?;
    match compile_declared(vm, env, handle, source) {
        Ok(warnings) => Ok(Compiled { handle, warnings }),
        Err(e) => {
            vm.remove_function(handle);
            Err(e)
        }
    }
}

/// Compiles the body of a function reserved with `declare_function`.
/// Functions declared together can call each other before all of them
/// have bodies.
pub fn compile_declared(
    vm: &mut FunctionVM,
    env: &dyn Environment,
    handle: FunctionHandle,
    source: &str,
) -> Result<Vec<Diagnostic>> {
    let (info, parameters) = {
        let f = vm.function(handle)?;
        (f.source.clone(), f.parameters.clone())
    };
    let scope = OwnName { env, name: info.name.as_deref(), handle };
    let tree = parser::parse_expression(source, &parameters, &scope, vm)?;
    let lowered = lower(vm, &scope, &tree, handle, &info, &parameters);
    tree.release(vm);
    let (code, warnings) = lowered?;

    let calls: Vec<FunctionHandle> = code.callees().collect();
    if let Err(e) = vm.define_function(handle, code) {
        release_calls(vm, calls);
        return Err(e.into());
    }
    Ok(warnings)
}

/// Installs a function backed by a native trap. `parameters` names the
/// stack arguments when it has the trap's arity; otherwise they are named
/// `x, y, z, p3, p4, ...`.
pub fn compile_trap_function(
    vm: &mut FunctionVM,
    info: SourceInfo,
    trap: TrapId,
    parameters: &[String],
    private_data: Option<PrivateData>,
) -> Result<FunctionHandle> {
    let (inst, count, return_size) = match trap {
        TrapId::Scalar(k) => {
            let t = TRAP_TABLE.get(k as usize).ok_or_else(|| missing_internal(k))?;
            (Instruction::Trap(k), t.parameters, 0)
        }
        TrapId::Vector(k) => {
            let t = TRAPS_TABLE.get(k as usize).ok_or_else(|| missing_internal(k))?;
            (Instruction::TrapS(k), t.parameters, t.return_size)
        }
    };
    let names = if parameters.len() == count {
        parameters.to_vec()
    } else {
        (0..count)
            .map(|i| match default_parameter_name(i) {
                Some(n) => n.to_string(),
                None => format!("p{i}"),
            })
            .collect()
    };
    let code = FunctionCode {
        program: vec![inst, Instruction::Rts],
        return_size,
        private_data,
        ..FunctionCode::new(info, names)
    };
    Ok(vm.add_function(code)?)
}

fn default_parameter_name(i: usize) -> Option<&'static str> {
    parser::DEFAULT_PARAMETERS.get(i).copied()
}

fn missing_internal(k: u32) -> CompileError {
    CompileError::Lowering {
        code: "FN-C007",
        span: Span::UNKNOWN,
        message: format!("Function 'internal({k})' does not exist."),
    }
}

fn release_calls(vm: &mut FunctionVM, calls: impl IntoIterator<Item = FunctionHandle>) {
    for h in calls {
        vm.remove_function(h);
    }
}

/// Resolves the name of the function being compiled to its own handle.
struct OwnName<'a> {
    env: &'a dyn Environment,
    name: Option<&'a str>,
    handle: FunctionHandle,
}

impl Environment for OwnName<'_> {
    fn lookup(&self, name: &str) -> Option<Symbol> {
        if self.name == Some(name) {
            return Some(Symbol::Function(self.handle));
        }
        self.env.lookup(name)
    }

    fn clock(&self) -> f64 {
        self.env.clock()
    }
}

fn lower(
    vm: &mut FunctionVM,
    env: &dyn Environment,
    tree: &ExprTree,
    handle: FunctionHandle,
    info: &SourceInfo,
    parameters: &[String],
) -> Result<(FunctionCode, Vec<Diagnostic>)> {
    let Some(root) = tree.root else {
        return Err(CompileError::Lowering {
            code: "FN-P001",
            span: Span::UNKNOWN,
            message: "Expected 'valid function expression', end of input found instead".into(),
        });
    };
    let root_node = tree.node(root);
    if root_node.op == Op::Constant {
        let code = FunctionCode::constant(info.clone(), parameters.to_vec(), root_node.number());
        return Ok((code, Vec::new()));
    }

    let mut c = FnCompiler::new(vm, env, tree, handle, parameters);
    if let Err(e) = c.compile(root) {
        let program = std::mem::take(&mut c.program);
        release_calls(c.vm, program.iter().filter_map(Instruction::callee));
        return Err(e);
    }
    let code = FunctionCode {
        program: c.program,
        locals: c.local_names,
        ..FunctionCode::new(info.clone(), parameters.to_vec())
    };
    Ok((code, c.warnings))
}

// ── Compiler ─────────────────────────────────────────────────────────

struct FnCompiler<'a> {
    vm: &'a mut FunctionVM,
    env: &'a dyn Environment,
    tree: &'a ExprTree,
    handle: FunctionHandle,
    parameters: &'a [String],
    program: Vec<Instruction>,
    /// Parameter index loaded into each of R2, R3 and R4.
    registers: [Option<u32>; 3],
    /// Active `sum`/`prod` variables and their stack slots.
    locals: Vec<(String, u32)>,
    local_names: Vec<String>,
    /// Open operator chains.
    level: u32,
    /// First stack slot free for temporaries.
    sp: u32,
    max_stack: u32,
    warnings: Vec<Diagnostic>,
}

impl<'a> FnCompiler<'a> {
    fn new(
        vm: &'a mut FunctionVM,
        env: &'a dyn Environment,
        tree: &'a ExprTree,
        handle: FunctionHandle,
        parameters: &'a [String],
    ) -> Self {
        FnCompiler {
            vm,
            env,
            tree,
            handle,
            parameters,
            program: Vec::new(),
            registers: assign_registers(parameters),
            locals: Vec::new(),
            local_names: Vec::new(),
            level: 0,
            sp: 0,
            max_stack: 0,
            warnings: Vec::new(),
        }
    }

    fn compile(&mut self, root: NodeId) -> Result<()> {
        let grow = self.emit(Instruction::Nop);
        self.compile_parameters()?;
        self.level = 0;
        self.sp = self.parameters.len() as u32;
        self.max_stack = self.sp;
        self.compile_recursive(root)?;
        self.program[grow] = Instruction::Grow(self.max_stack);
        self.emit(Instruction::Rts);
        Ok(())
    }

    // ── Emission helpers ─────────────────────────────────────────────

    fn emit(&mut self, inst: Instruction) -> usize {
        self.program.push(inst);
        self.program.len() - 1
    }

    fn here(&self) -> u32 {
        self.program.len() as u32
    }

    fn konst(&mut self, value: f64) -> Result<u32> {
        Ok(self.vm.add_constant(value)?)
    }

    fn mov(&mut self, src: Reg, dst: Reg) {
        self.emit(Instruction::Move { src, dst });
    }

    fn op(&mut self, op: BinOp, src: Reg, dst: Reg) {
        self.emit(Instruction::Op { op, src, dst });
    }

    fn opi(&mut self, op: BinOp, value: f64, dst: Reg) -> Result<()> {
        let k = self.konst(value)?;
        self.emit(Instruction::OpI { op, k, dst });
        Ok(())
    }

    fn loadi(&mut self, value: f64, dst: Reg) -> Result<()> {
        let k = self.konst(value)?;
        self.emit(Instruction::LoadI { k, dst });
        Ok(())
    }

    fn load(&mut self, slot: u32, dst: Reg) {
        self.emit(Instruction::Load { addr: Address::Local(slot), dst });
    }

    fn store(&mut self, src: Reg, slot: u32) {
        self.emit(Instruction::Store { src, addr: Address::Local(slot) });
    }

    fn error(&self, code: &'static str, span: Span, message: impl Into<String>) -> CompileError {
        CompileError::Lowering { code, span, message: message.into() }
    }

    fn warn(&mut self, code: &'static str, span: Span, message: &str) {
        self.warnings.push(Diagnostic::warning(message).with_code(code).with_span(span, "here"));
    }

    // ── Pending results ──────────────────────────────────────────────

    /// Saves R5 before a nested chain reuses it and returns the stack slot
    /// used when the nesting is deep enough to spill.
    fn push_result(&mut self) -> u32 {
        self.max_stack = self.max_stack.max((self.sp + self.level).saturating_sub(2));
        match self.level {
            0 => {}
            1 => self.mov(Reg::R5, Reg::R6),
            2 => self.mov(Reg::R5, Reg::R7),
            level => self.store(Reg::R5, self.sp + level - 3),
        }
        self.level += 1;
        (self.sp + self.level).saturating_sub(4)
    }

    fn pop_result(&mut self, slot: u32) {
        self.level -= 1;
        match self.level {
            0 => {}
            1 => self.mov(Reg::R6, Reg::R5),
            2 => self.mov(Reg::R7, Reg::R5),
            _ => self.load(slot, Reg::R5),
        }
    }

    // ── Expressions ──────────────────────────────────────────────────

    /// Compiles `expr` and every sibling after it, leaving the value in R0.
    fn compile_recursive(&mut self, expr: NodeId) -> Result<()> {
        let chain = self.tree.node(expr).op.is_chain();
        let saved = if chain { Some(self.push_result()) } else { None };

        let mut cur = Some(expr);
        while let Some(i) = cur {
            self.compile_step(i)?;
            cur = self.tree.node(i).next;
        }

        if let Some(slot) = saved {
            self.mov(Reg::R5, Reg::R0);
            self.pop_result(slot);
        }
        Ok(())
    }

    /// A call argument is a group or a folded constant; its siblings are the
    /// other arguments and must not be compiled with it.
    fn compile_argument(&mut self, arg: NodeId) -> Result<()> {
        let n = self.tree.node(arg);
        match (n.op, n.child) {
            (Op::First, Some(c)) => self.compile_recursive(c),
            _ => self.compile_step(arg),
        }
    }

    fn compile_step(&mut self, i: NodeId) -> Result<()> {
        let tree = self.tree;
        let node = tree.node(i);

        if let Some(c) = node.child {
            let child = tree.node(c);
            if child.op == Op::Constant && self.constant_operand(node.op, child.number(), node.span.merge(child.span))? {
                return Ok(());
            }
            if node.op != Op::Call {
                self.compile_recursive(c)?;
            }
        }

        match node.op {
            Op::Constant => self.loadi(node.number(), Reg::R0)?,
            Op::Variable => self.compile_variable(node.name(), node.span)?,
            Op::Member => self.compile_member(node.name(), node.span)?,
            Op::Call => self.compile_call(i)?,
            op if op.is_compare() => {
                self.emit(Instruction::Cmp { src: Reg::R0, dst: Reg::R5 });
                self.emit(Instruction::Set { cond: compare_condition(op), dst: Reg::R5 });
            }
            Op::Add => self.op(BinOp::Add, Reg::R0, Reg::R5),
            Op::Sub => self.op(BinOp::Sub, Reg::R0, Reg::R5),
            Op::Mul => self.op(BinOp::Mul, Reg::R0, Reg::R5),
            Op::Or => {
                self.emit(Instruction::Tne { dst: Reg::R5 });
                self.emit(Instruction::Tne { dst: Reg::R0 });
                self.op(BinOp::Add, Reg::R0, Reg::R5);
                self.emit(Instruction::Tne { dst: Reg::R5 });
            }
            Op::Div => {
                self.emit(Instruction::Raise { cond: Cond::Eq, reg: Reg::R0 });
                self.op(BinOp::Div, Reg::R0, Reg::R5);
            }
            Op::And => {
                self.emit(Instruction::Tne { dst: Reg::R5 });
                self.emit(Instruction::Tne { dst: Reg::R0 });
                self.op(BinOp::Mul, Reg::R0, Reg::R5);
            }
            Op::Pow => {
                self.emit(Instruction::RaiseZeroPow { reg: Reg::R5 });
                self.mov(Reg::R0, Reg::R1);
                self.mov(Reg::R5, Reg::R0);
                self.emit(Instruction::Sys2(Sys2::Pow.index()));
                self.mov(Reg::R0, Reg::R5);
            }
            Op::Neg => {
                self.emit(Instruction::Neg { src: Reg::R0, dst: Reg::R5 });
            }
            Op::Leftmost => self.mov(Reg::R0, Reg::R5),
            // groups and member wrappers emit nothing of their own
            _ => {}
        }
        Ok(())
    }

    /// Chain operators with a constant right operand work on R5 directly.
    /// Returns false when the general sequence is still needed.
    fn constant_operand(&mut self, op: Op, value: f64, span: Span) -> Result<bool> {
        match op {
            Op::Add => {
                if value != 0.0 {
                    self.opi(BinOp::Add, value, Reg::R5)?;
                }
            }
            Op::Sub => {
                if value != 0.0 {
                    self.opi(BinOp::Sub, value, Reg::R5)?;
                }
            }
            Op::Mul => {
                if value != 1.0 {
                    self.opi(BinOp::Mul, value, Reg::R5)?;
                }
            }
            Op::Div => {
                if value == 0.0 {
                    return Err(self.error("FN-C002", span, "Division by zero."));
                }
                if value != 1.0 {
                    self.opi(BinOp::Mul, 1.0 / value, Reg::R5)?;
                }
            }
            Op::Pow => return self.constant_power(value, span),
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Small integer powers become multiplications.
    fn constant_power(&mut self, value: f64, span: Span) -> Result<bool> {
        use Reg::{R0, R5};
        let square = |c: &mut Self, r: Reg| c.op(BinOp::Mul, r, r);
        let times = |c: &mut Self, src: Reg, dst: Reg| c.op(BinOp::Mul, src, dst);

        match value {
            0.0 => {
                self.loadi(1.0, R5)?;
                self.warn("FN-W001", span, "Zero power optimised to constant 1.0!");
            }
            2.0 => square(self, R5),
            3.0 => {
                self.mov(R5, R0);
                times(self, R0, R5);
                times(self, R0, R5);
            }
            4.0 => {
                square(self, R5);
                square(self, R5);
            }
            5.0 => {
                self.mov(R5, R0);
                square(self, R5);
                square(self, R5);
                times(self, R0, R5);
            }
            6.0 => {
                self.mov(R5, R0);
                square(self, R5);
                square(self, R5);
                square(self, R0);
                times(self, R0, R5);
            }
            7.0 => {
                self.mov(R5, R0);
                square(self, R5);
                square(self, R5);
                times(self, R0, R5);
                square(self, R0);
                times(self, R0, R5);
            }
            8.0 => {
                square(self, R5);
                square(self, R5);
                square(self, R5);
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    // ── Identifiers ──────────────────────────────────────────────────

    fn compile_parameters(&mut self) -> Result<()> {
        for (owner, reg) in self.registers.into_iter().zip(PARAMETER_REGISTERS) {
            match owner {
                Some(i) => self.load(i, reg),
                None => self.loadi(0.0, reg)?,
            }
        }
        Ok(())
    }

    /// Reloads parameter registers a call has overwritten.
    fn restore_parameters(&mut self) {
        for (owner, reg) in self.registers.into_iter().zip(PARAMETER_REGISTERS) {
            if let Some(i) = owner {
                self.load(i, reg);
            }
        }
    }

    fn compile_variable(&mut self, name: &str, span: Span) -> Result<()> {
        if let Some(&(_, slot)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            self.load(slot, Reg::R0);
            return Ok(());
        }
        if let Some(i) = self.parameters.iter().position(|p| p == name) {
            let i = i as u32;
            match self.registers.iter().position(|r| *r == Some(i)) {
                Some(r) => self.mov(PARAMETER_REGISTERS[r], Reg::R0),
                None => self.load(i, Reg::R0),
            }
            return Ok(());
        }
        match self.env.lookup(name) {
            Some(Symbol::Global(k)) => {
                self.emit(Instruction::Load { addr: Address::Global(k), dst: Reg::R0 });
                Ok(())
            }
            Some(Symbol::Constant(v)) => self.loadi(v, Reg::R0),
            _ => Err(self.error(
                "FN-C006",
                span,
                format!("Expected 'parameter identifier or floating-point constant identifier', '{name}' found instead"),
            )),
        }
    }

    /// Reads one result of the vector call compiled just before.
    fn compile_member(&mut self, name: &str, span: Span) -> Result<()> {
        use Reg::{R0, R1};
        let rp = self.sp + self.level.saturating_sub(2) + (self.level + 1).min(3);
        let offset = match name {
            "x" | "u" | "red" => Some(0),
            "y" | "v" | "green" => Some(1),
            "z" | "blue" => Some(2),
            "t" | "filter" => Some(3),
            "transmit" => Some(4),
            _ => None,
        };
        if let Some(offset) = offset {
            self.load(rp + offset, R0);
            return Ok(());
        }
        match name {
            "gray" | "grey" => {
                self.load(rp, R0);
                self.opi(BinOp::Mul, RED_INTENSITY, R0)?;
                self.load(rp + 1, R1);
                self.opi(BinOp::Mul, GREEN_INTENSITY, R1)?;
                self.op(BinOp::Add, R1, R0);
                self.load(rp + 2, R1);
                self.opi(BinOp::Mul, BLUE_INTENSITY, R1)?;
                self.op(BinOp::Add, R1, R0);
            }
            "hf" => {
                self.load(rp, R0);
                self.load(rp + 1, R1);
                self.opi(BinOp::Mul, 1.0 / 255.0, R1)?;
                self.op(BinOp::Add, R1, R0);
                self.opi(BinOp::Mul, 0.996093, R0)?;
            }
            _ => {
                return Err(self.error(
                    "FN-C005",
                    span,
                    "Invalid member access: Valid member names are x, y, z, t, u, v, red, green, blue, grey, filter and transmit.",
                ));
            }
        }
        Ok(())
    }

    // ── Calls ────────────────────────────────────────────────────────

    fn compile_call(&mut self, id: NodeId) -> Result<()> {
        let tree = self.tree;
        let node = tree.node(id);
        let span = node.span;
        let Some(call) = node.call() else {
            return Err(self.error("FN-P001", span, "Expected 'function identifier'"));
        };
        let name = call.name.as_str();
        let args: Vec<NodeId> = tree.siblings(node.child).collect();
        if args.is_empty() {
            return Err(self.error("FN-C001", span, "Invalid number of parameters: At least one parameter expected!"));
        }

        match call.target {
            CallTarget::Function(h) => self.compile_function_call(h, &args, name, span),
            CallTarget::VectorFunction(h) => self.compile_function_call(h, &args, name, span),
            CallTarget::Builtin(b) => match b {
                Builtin::Min => self.compile_extremum(&args, Cond::Gt, name, span),
                Builtin::Max => self.compile_extremum(&args, Cond::Lt, name, span),
                Builtin::Select => self.compile_select(&args, span),
                Builtin::Sum => self.compile_seq_op(&args, BinOp::Add, 0.0, span),
                Builtin::Prod => self.compile_seq_op(&args, BinOp::Mul, 1.0, span),
                Builtin::Pow => self.compile_two_arguments(Sys2::Pow, &args, name, span),
                Builtin::Atan2 | Builtin::Mod | Builtin::Div => match b.sys2() {
                    Some(f) => self.compile_two_arguments(f, &args, name, span),
                    None => Ok(()),
                },
                _ => self.compile_one_argument(b, &args, name, span),
            },
        }
    }

    fn compile_one_argument(&mut self, b: Builtin, args: &[NodeId], name: &str, span: Span) -> Result<()> {
        if args.len() > 1 {
            return Err(self.error(
                "FN-C001",
                span,
                format!("Invalid number of parameters for '{name}': Only one parameter expected!"),
            ));
        }
        self.compile_argument(args[0])?;
        match b {
            Builtin::Abs => {
                self.emit(Instruction::Abs { src: Reg::R0, dst: Reg::R0 });
            }
            Builtin::Sqr => self.op(BinOp::Mul, Reg::R0, Reg::R0),
            Builtin::Radians => self.opi(BinOp::Mul, PI / 180.0, Reg::R0)?,
            Builtin::Degrees => self.opi(BinOp::Mul, 180.0 / PI, Reg::R0)?,
            _ => {
                let Some(f) = b.sys1() else {
                    return Err(self.error("FN-P001", span, "Expected 'function identifier'"));
                };
                if matches!(b, Builtin::Ln | Builtin::Log) {
                    self.emit(Instruction::Raise { cond: Cond::Le, reg: Reg::R0 });
                }
                self.emit(Instruction::Sys1(f.index()));
            }
        }
        Ok(())
    }

    /// `pow`, `atan2`, `mod` and `div`: right argument first, so the left
    /// one ends up in R0 and the right one in R1.
    fn compile_two_arguments(&mut self, f: Sys2, args: &[NodeId], name: &str, span: Span) -> Result<()> {
        if args.len() < 2 {
            return Err(self.error(
                "FN-C001",
                span,
                format!("Invalid number of parameters for '{name}': Two parameters expected!"),
            ));
        }
        if args.len() > 2 {
            return Err(self.error(
                "FN-C001",
                span,
                format!("Invalid number of parameters for '{name}': Only two parameters expected!"),
            ));
        }
        self.compile_argument(args[1])?;
        if matches!(f, Sys2::Mod | Sys2::Div) {
            self.emit(Instruction::Raise { cond: Cond::Eq, reg: Reg::R0 });
        }
        let slot = self.push_result();
        self.mov(Reg::R0, Reg::R5);
        self.compile_argument(args[0])?;
        self.mov(Reg::R5, Reg::R1);
        self.pop_result(slot);
        if f == Sys2::Pow {
            self.emit(Instruction::RaiseZeroPow { reg: Reg::R1 });
        }
        self.emit(Instruction::Sys2(f.index()));
        Ok(())
    }

    /// `min`/`max`: keeps the running extremum in R0. `keep` is the branch
    /// condition under which the new argument replaces nothing.
    fn compile_extremum(&mut self, args: &[NodeId], keep: Cond, name: &str, span: Span) -> Result<()> {
        if args.len() < 2 {
            return Err(self.error(
                "FN-C001",
                span,
                format!("Invalid number of parameters for '{name}': At least two parameters expected!"),
            ));
        }
        self.compile_argument(args[0])?;
        for &arg in &args[1..] {
            let slot = self.push_result();
            self.mov(Reg::R0, Reg::R5);
            self.compile_argument(arg)?;
            self.mov(Reg::R5, Reg::R1);
            self.pop_result(slot);
            self.emit(Instruction::Cmp { src: Reg::R0, dst: Reg::R1 });
            let target = self.here() + 2;
            self.emit(Instruction::Branch { cond: keep, target });
            self.mov(Reg::R1, Reg::R0);
        }
        Ok(())
    }

    /// `select(c, a, b)` is `a` when `c < 0`, else `b`. With a fourth
    /// argument `d`, `b` is only taken for `c == 0` and `d` for `c > 0`.
    fn compile_select(&mut self, args: &[NodeId], span: Span) -> Result<()> {
        if args.len() < 3 {
            return Err(self.error("FN-C001", span, "Invalid number of parameters: Three or four parameters expected!"));
        }
        if args.len() > 4 {
            return Err(self.error(
                "FN-C001",
                span,
                "Invalid number of parameters: Only three or four parameters expected!",
            ));
        }
        let fourth = args.len() == 4;

        self.compile_argument(args[0])?;
        let zero = self.konst(0.0)?;
        self.emit(Instruction::CmpI { k: zero, dst: Reg::R0 });
        let less = self.emit(Instruction::Nop);
        let greater = if fourth { Some(self.emit(Instruction::Nop)) } else { None };

        self.compile_argument(args[2])?;
        let equal_end = self.emit(Instruction::Nop);
        self.compile_argument(args[1])?;
        let less_end = if fourth {
            let at = self.emit(Instruction::Nop);
            self.compile_argument(args[3])?;
            Some(at)
        } else {
            None
        };
        let all_end = self.here();

        self.program[less] = Instruction::Branch { cond: Cond::Lt, target: equal_end as u32 + 1 };
        self.program[equal_end] = Instruction::Jmp(all_end);
        if let (Some(greater), Some(less_end)) = (greater, less_end) {
            self.program[greater] = Instruction::Branch { cond: Cond::Gt, target: less_end as u32 + 1 };
            self.program[less_end] = Instruction::Jmp(all_end);
        }
        Ok(())
    }

    /// `sum(i, from, to, expr)` and `prod(...)`. The accumulator, the loop
    /// variable and the limit get three stack slots above every pending
    /// result.
    fn compile_seq_op(&mut self, args: &[NodeId], accumulate: BinOp, neutral: f64, span: Span) -> Result<()> {
        if args.len() < 4 {
            return Err(self.error("FN-C001", span, "Invalid number of parameters: Four parameters expected!"));
        }
        if args.len() > 4 {
            return Err(self.error("FN-C001", span, "Invalid number of parameters: Only four parameters expected!"));
        }
        if self.locals.len() >= MAX_FUNCTION_PARAMETER_LIST {
            return Err(self.error("FN-C003", span, "Too many local variables!"));
        }
        let Some(name) = self.local_name(args[0]) else {
            return Err(self.error("FN-C004", self.tree.node(args[0]).span, "Local variable name expected!"));
        };

        let saved = self.push_result();
        let var_sp = if self.level >= 3 { self.sp + self.level - 3 } else { self.sp };
        self.max_stack = self.max_stack.max(var_sp + 3);
        let (acc, var, limit) = (var_sp, var_sp + 1, var_sp + 2);

        let outer_level = self.level;
        // nested pushes must land above the three slots
        self.level = var_sp + 3 - self.sp + 3;
        self.locals.push((name.clone(), var));
        if !self.local_names.contains(&name) {
            self.local_names.push(name);
        }

        self.loadi(neutral, Reg::R5)?;
        self.store(Reg::R5, acc);
        self.compile_argument(args[1])?;
        self.store(Reg::R0, var);
        self.compile_argument(args[2])?;
        self.store(Reg::R0, limit);

        let begin = self.here();
        self.load(var, Reg::R5);
        self.load(limit, Reg::R0);
        self.emit(Instruction::Cmp { src: Reg::R0, dst: Reg::R5 });
        let exit = self.emit(Instruction::Nop);

        self.compile_argument(args[3])?;
        self.load(acc, Reg::R5);
        self.op(accumulate, Reg::R0, Reg::R5);
        self.store(Reg::R5, acc);
        self.load(var, Reg::R5);
        self.opi(BinOp::Add, 1.0, Reg::R5)?;
        self.store(Reg::R5, var);
        self.emit(Instruction::Jmp(begin));
        self.program[exit] = Instruction::Branch { cond: Cond::Gt, target: self.here() };

        self.load(acc, Reg::R0);
        self.locals.pop();
        self.level = outer_level;
        self.pop_result(saved);
        Ok(())
    }

    fn local_name(&self, arg: NodeId) -> Option<String> {
        let n = self.tree.node(arg);
        let var = match (n.op, n.child) {
            (Op::First, Some(c)) => self.tree.node(c),
            _ => n,
        };
        (var.op == Op::Variable && var.next.is_none()).then(|| var.name().to_string())
    }

    /// Calls a user function, scalar or vector. R5..R7 are saved below the
    /// callee frame and the parameter registers are reloaded afterwards.
    fn compile_function_call(&mut self, h: FunctionHandle, args: &[NodeId], name: &str, span: Span) -> Result<()> {
        let (parameter_count, return_size) = {
            let f = self.vm.function(h)?;
            (f.parameter_count() as u32, f.return_size)
        };
        if h == self.handle {
            self.warn(
                "FN-W002",
                span,
                &format!("Recursive call of '{name}'. Make sure the recursion is not infinite."),
            );
        }
        if args.len() as u32 != parameter_count {
            return Err(self.error(
                "FN-C001",
                span,
                format!("Invalid number of parameters: {} supplied, {} required!", args.len(), parameter_count),
            ));
        }

        let level = self.level;
        let saved = self.sp + level.saturating_sub(2);
        let frame = saved + level.min(2) + 1;
        let call_parameters = frame + return_size;
        self.store(Reg::R5, saved);
        if level >= 1 {
            self.store(Reg::R6, saved + 1);
        }
        if level >= 2 {
            self.store(Reg::R7, saved + 2);
        }

        let outer_sp = self.sp;
        self.level = 0;
        self.sp = call_parameters + parameter_count;
        self.max_stack = self.max_stack.max(self.sp);
        for (i, &arg) in args.iter().enumerate() {
            self.compile_argument(arg)?;
            self.store(Reg::R0, call_parameters + i as u32);
        }
        self.level = level;
        self.sp = outer_sp;

        self.emit(Instruction::Push(frame));
        self.vm.function_and_reference(h)?;
        self.emit(Instruction::Call(h));
        self.emit(Instruction::Pop(frame));

        self.load(saved, Reg::R5);
        if level >= 1 {
            self.load(saved + 1, Reg::R6);
        }
        if level >= 2 {
            self.load(saved + 2, Reg::R7);
        }
        self.restore_parameters();
        Ok(())
    }
}

/// The first parameter named x/u, y/v or z gets the matching register.
fn assign_registers(parameters: &[String]) -> [Option<u32>; 3] {
    let mut owners = [None; 3];
    for (i, p) in parameters.iter().enumerate() {
        let r = match p.as_str() {
            "x" | "u" => 0,
            "y" | "v" => 1,
            "z" => 2,
            _ => continue,
        };
        if owners[r].is_none() {
            owners[r] = Some(i as u32);
        }
    }
    owners
}

fn compare_condition(op: Op) -> Cond {
    match op {
        Op::CmpEq => Cond::Eq,
        Op::CmpNe => Cond::Ne,
        Op::CmpLt => Cond::Lt,
        Op::CmpLe => Cond::Le,
        Op::CmpGt => Cond::Gt,
        _ => Cond::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{default_parameters, SymbolTable};
    use crate::vm::traps::{find_trap, Transform};
    use crate::vm::VmResult;
    use std::sync::Arc;

    fn compile(vm: &mut FunctionVM, env: &SymbolTable, source: &str) -> Result<Compiled> {
        compile_function(vm, env, source, SourceInfo::named("f"), default_parameters())
    }

    fn run(source: &str, args: &[f64]) -> VmResult<f64> {
        let mut vm = FunctionVM::new();
        let f = compile(&mut vm, &SymbolTable::new(), source).unwrap();
        let mut ctx = vm.create_context();
        ctx.evaluate(f.handle, args)
    }

    fn value(source: &str, args: &[f64]) -> f64 {
        run(source, args).unwrap()
    }

    fn walked(source: &str, args: &[f64]) -> f64 {
        let mut vm = FunctionVM::new();
        let env = SymbolTable::new();
        let tree = crate::parser::parse_unoptimised(source, &default_parameters(), &env, &mut vm).unwrap();
        crate::interpreter::evaluate(&tree, &default_parameters(), args, &env, &vm).unwrap()
    }

    fn lowering_code(e: CompileError) -> &'static str {
        match e {
            CompileError::Lowering { code, .. } => code,
            other => panic!("expected a lowering error, got {other:?}"),
        }
    }

    #[test]
    fn simple_chain_layout() {
        let mut vm = FunctionVM::new();
        let f = compile(&mut vm, &SymbolTable::new(), "x * 2").unwrap();
        let program = &vm.function(f.handle).unwrap().program;
        let two = vm.constants().iter().position(|c| *c == 2.0).unwrap() as u32;
        assert_eq!(
            program.as_slice(),
            &[
                Instruction::Grow(3),
                Instruction::Load { addr: Address::Local(0), dst: Reg::R2 },
                Instruction::Load { addr: Address::Local(1), dst: Reg::R3 },
                Instruction::Load { addr: Address::Local(2), dst: Reg::R4 },
                Instruction::Move { src: Reg::R2, dst: Reg::R0 },
                Instruction::Move { src: Reg::R0, dst: Reg::R5 },
                Instruction::OpI { op: BinOp::Mul, k: two, dst: Reg::R5 },
                Instruction::Move { src: Reg::R5, dst: Reg::R0 },
                Instruction::Rts,
            ]
        );
    }

    #[test]
    fn arithmetic_and_precedence() {
        assert_eq!(value("x * 2 + y / 4 - z", &[3.0, 8.0, 1.0]), 7.0);
        assert_eq!(value("-x * 3", &[2.0, 0.0, 0.0]), -6.0);
        assert_eq!(value("x - y - z", &[10.0, 3.0, 2.0]), 5.0);
        assert_eq!(value("(x + 1) * (y - 1)", &[1.0, 4.0, 0.0]), 6.0);
        assert_eq!(value("x / y", &[1.0, 4.0, 0.0]), 0.25);
    }

    #[test]
    fn deep_nesting_spills_to_the_stack() {
        assert_eq!(value("x+(x+(x+(x+(x+(x+(x+x))))))", &[1.5, 0.0, 0.0]), 12.0);
        let nested = "x-(y-(x-(y-(x-(y-1)))))";
        assert_eq!(value(nested, &[5.0, 2.0, 0.0]), 10.0);
        assert_eq!(value(nested, &[5.0, 2.0, 0.0]), walked(nested, &[5.0, 2.0, 0.0]));
    }

    #[test]
    fn comparisons_and_logic() {
        assert_eq!(value("x < y", &[1.0, 2.0, 0.0]), 1.0);
        assert_eq!(value("x >= y", &[1.0, 2.0, 0.0]), 0.0);
        assert_eq!(value("x = y", &[2.0, 2.0, 0.0]), 1.0);
        assert_eq!(value("x != y", &[2.0, 2.0, 0.0]), 0.0);
        assert_eq!(value("x | y", &[0.0, -3.0, 0.0]), 1.0);
        assert_eq!(value("x & y", &[5.0, 0.0, 0.0]), 0.0);
        assert_eq!(value("x & y | z", &[1.0, 0.0, 3.0]), 1.0);
    }

    #[test]
    fn integer_powers_match_powf() {
        for n in 2..=8 {
            let v = value(&format!("x ^ {n}"), &[1.7, 0.0, 0.0]);
            let expected = 1.7f64.powi(n);
            assert!((v - expected).abs() < 1e-12 * expected, "x^{n}: {v} vs {expected}");
        }
        assert!((value("x ^ 2.5", &[1.7, 0.0, 0.0]) - 1.7f64.powf(2.5)).abs() < 1e-12);
        assert!((value("x ^ y", &[2.0, 0.5, 0.0]) - 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn zero_power_warns() {
        let mut vm = FunctionVM::new();
        let f = compile(&mut vm, &SymbolTable::new(), "x ^ 0 + y").unwrap();
        assert_eq!(f.warnings.len(), 1);
        assert_eq!(f.warnings[0].code, Some("FN-W001"));
        assert_eq!(vm.create_context().evaluate(f.handle, &[0.0, 2.0, 0.0]).unwrap(), 3.0);
    }

    #[test]
    fn runtime_guards_raise() {
        assert!(matches!(run("1 / x", &[0.0, 0.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        assert!(matches!(run("ln(x)", &[-1.0, 0.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        assert!(matches!(run("log(x)", &[0.0, 0.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        assert!(matches!(run("mod(y, x)", &[0.0, 1.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        assert!(matches!(run("div(y, x)", &[0.0, 1.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        assert!(matches!(run("x ^ y", &[0.0, 0.0, 0.0]), Err(VmError::FloatingPoint { .. })));
        let e = run("1 / x", &[0.0, 0.0, 0.0]).unwrap_err();
        assert!(e.to_string().contains("function 'f'"));
    }

    #[test]
    fn constant_division_by_zero_is_a_compile_error() {
        let mut vm = FunctionVM::new();
        let e = compile(&mut vm, &SymbolTable::new(), "x / 0").unwrap_err();
        assert_eq!(e.to_string(), "Division by zero.");
        assert_eq!(lowering_code(e), "FN-C002");
        assert_eq!(vm.live_functions(), 0);
    }

    #[test]
    fn intrinsics() {
        assert!((value("sin(x) + 2*cos(y) - 1", &[0.0, 0.0, 0.0]) - 1.0).abs() < 1e-15);
        assert_eq!(value("abs(x) + sqr(y)", &[-2.0, 3.0, 0.0]), 11.0);
        assert!((value("degrees(x)", &[PI, 0.0, 0.0]) - 180.0).abs() < 1e-12);
        assert!((value("radians(x)", &[180.0, 0.0, 0.0]) - PI).abs() < 1e-12);
        assert_eq!(value("mod(x, y)", &[-7.0, 3.0, 0.0]), -1.0);
        assert_eq!(value("div(x, y)", &[7.0, 2.0, 0.0]), 3.0);
        assert_eq!(value("pow(x, y)", &[2.0, 10.0, 0.0]), 1024.0);
        assert!((value("atan2(x, y)", &[1.0, 1.0, 0.0]) - PI / 4.0).abs() < 1e-15);
        assert_eq!(value("floor(x) + ceil(y) + int(z)", &[1.5, 1.5, -1.5]), 2.0 - 1.0 + 1.0);
    }

    #[test]
    fn argument_counts_are_checked() {
        let mut vm = FunctionVM::new();
        let env = SymbolTable::new();
        let e = compile(&mut vm, &env, "sin(x, y)").unwrap_err();
        assert_eq!(e.to_string(), "Invalid number of parameters for 'sin': Only one parameter expected!");
        let e = compile(&mut vm, &env, "atan2(x)").unwrap_err();
        assert_eq!(e.to_string(), "Invalid number of parameters for 'atan2': Two parameters expected!");
        let e = compile(&mut vm, &env, "max(x)").unwrap_err();
        assert_eq!(e.to_string(), "Invalid number of parameters for 'max': At least two parameters expected!");
        let e = compile(&mut vm, &env, "select(x, y)").unwrap_err();
        assert_eq!(lowering_code(e), "FN-C001");
    }

    #[test]
    fn min_max_and_select() {
        assert_eq!(value("min(3, x, 2)", &[1.0, 0.0, 0.0]), 1.0);
        assert_eq!(value("max(3, x, 2)", &[1.0, 0.0, 0.0]), 3.0);
        assert_eq!(value("max(x, y, z)", &[1.0, 5.0, 2.0]), 5.0);
        assert_eq!(value("1 + min(x, y) * 2", &[4.0, 3.0, 0.0]), 7.0);
        assert_eq!(value("select(x, 1, 2)", &[-1.0, 0.0, 0.0]), 1.0);
        assert_eq!(value("select(x, 1, 2)", &[0.0, 0.0, 0.0]), 2.0);
        assert_eq!(value("select(x, 1, 2)", &[1.0, 0.0, 0.0]), 2.0);
        assert_eq!(value("select(x, 1, 2, 3)", &[-0.5, 0.0, 0.0]), 1.0);
        assert_eq!(value("select(x, 1, 2, 3)", &[0.0, 0.0, 0.0]), 2.0);
        assert_eq!(value("select(x, 1, 2, 3)", &[0.5, 0.0, 0.0]), 3.0);
    }

    #[test]
    fn sum_and_prod_loops() {
        assert_eq!(value("sum(i, 1, 4, i)", &[0.0; 3]), 10.0);
        assert_eq!(value("prod(i, 1, 4, i)", &[0.0; 3]), 24.0);
        assert_eq!(value("sum(i, 1, x, i * y)", &[3.0, 2.0, 0.0]), 12.0);
        assert_eq!(value("sum(i, 1, 2, sum(j, 1, i, j * x))", &[2.0, 0.0, 0.0]), 8.0);
        assert_eq!(value("sum(i, 3, 1, i)", &[0.0; 3]), 0.0);
        // pending values on every level while the loop runs
        assert_eq!(value("x+(x+(x+(x+sum(i,1,3,i+x))))", &[1.0, 0.0, 0.0]), 4.0 + 9.0);
    }

    #[test]
    fn loop_variable_must_be_a_name() {
        let mut vm = FunctionVM::new();
        let e = compile(&mut vm, &SymbolTable::new(), "sum(1, 1, 2, x)").unwrap_err();
        assert_eq!(e.to_string(), "Local variable name expected!");
    }

    #[test]
    fn too_many_locals() {
        fn nested(depth: usize) -> String {
            if depth == 0 {
                return "x".into();
            }
            format!("sum(i{depth}, 1, 1, {})", nested(depth - 1))
        }
        let mut vm = FunctionVM::new();
        assert!(compile(&mut vm, &SymbolTable::new(), &nested(MAX_FUNCTION_PARAMETER_LIST)).is_ok());
        let e = compile(&mut vm, &SymbolTable::new(), &nested(MAX_FUNCTION_PARAMETER_LIST + 1)).unwrap_err();
        assert_eq!(lowering_code(e), "FN-C003");
    }

    #[test]
    fn globals_and_undefined_names() {
        let mut env = SymbolTable::new();
        let g = env.define_global("g");
        let mut vm = FunctionVM::new();
        let f = compile(&mut vm, &env, "g * x").unwrap();
        vm.set_global(g as usize, 2.5);
        assert_eq!(vm.create_context().evaluate(f.handle, &[2.0, 0.0, 0.0]).unwrap(), 5.0);

        let e = compile(&mut vm, &env, "w + 1").unwrap_err();
        assert_eq!(
            e.to_string(),
            "Expected 'parameter identifier or floating-point constant identifier', 'w' found instead"
        );
    }

    #[test]
    fn custom_parameters_use_registers_and_stack() {
        let mut vm = FunctionVM::new();
        let params: Vec<String> = ["a", "v", "u", "x"].iter().map(|s| s.to_string()).collect();
        let f = compile_function(&mut vm, &SymbolTable::new(), "a * 1000 + v * 100 + u * 10 + x", SourceInfo::named("p"), params)
            .unwrap();
        assert_eq!(vm.create_context().evaluate(f.handle, &[1.0, 2.0, 3.0, 4.0]).unwrap(), 1234.0);
    }

    #[test]
    fn user_calls_save_pending_values() {
        let mut vm = FunctionVM::new();
        let mut env = SymbolTable::new();
        let g = compile_function(&mut vm, &env, "a * b", SourceInfo::named("g"), vec!["a".into(), "b".into()]).unwrap();
        env.define_function("g", g.handle);
        let f = compile(&mut vm, &env, "x + (y * (z - g(x, 2 + y)))").unwrap();
        assert_eq!(vm.reference_count(g.handle), 2);
        let mut ctx = vm.create_context();
        // 1 + 2 * (3 - 1 * 4)
        assert_eq!(ctx.evaluate(f.handle, &[1.0, 2.0, 3.0]).unwrap(), -1.0);
        assert_eq!(ctx.evaluate(f.handle, &[2.0, 1.0, 10.0]).unwrap(), 2.0 + (10.0 - 6.0));
    }

    #[test]
    fn call_argument_count_mismatch() {
        let mut vm = FunctionVM::new();
        let mut env = SymbolTable::new();
        let g = compile_function(&mut vm, &env, "a * b", SourceInfo::named("g"), vec!["a".into(), "b".into()]).unwrap();
        env.define_function("g", g.handle);
        let e = compile(&mut vm, &env, "g(x)").unwrap_err();
        assert_eq!(e.to_string(), "Invalid number of parameters: 1 supplied, 2 required!");
        // the failed compile gave its reference back
        assert_eq!(vm.reference_count(g.handle), 1);
        assert_eq!(vm.live_functions(), 1);
    }

    #[test]
    fn recursive_function_warns_and_runs() {
        let mut vm = FunctionVM::new();
        let f = compile_function(
            &mut vm,
            &SymbolTable::new(),
            "select(n - 1.5, 1, n * fact(n - 1))",
            SourceInfo::named("fact"),
            vec!["n".into()],
        )
        .unwrap();
        assert_eq!(f.warnings.len(), 1);
        assert_eq!(f.warnings[0].code, Some("FN-W002"));
        assert_eq!(vm.create_context().evaluate(f.handle, &[5.0]).unwrap(), 120.0);
        vm.remove_function(f.handle);
        assert_eq!(vm.live_functions(), 0);
    }

    #[test]
    fn vector_members() {
        let mut vm = FunctionVM::new();
        let mut env = SymbolTable::new();
        let Some(trap) = find_trap("f_transform") else { panic!("f_transform missing") };
        let t = compile_trap_function(
            &mut vm,
            SourceInfo::named("t"),
            trap,
            &[],
            Some(Arc::new(Transform::translate(1.0, 2.0, 3.0))),
        )
        .unwrap();
        env.define_function("t", t);
        let f = compile(&mut vm, &env, "t(x, y, z).y * 10 + t(x, y, z).x").unwrap();
        assert_eq!(vm.create_context().evaluate(f.handle, &[1.0, 1.0, 1.0]).unwrap(), 32.0);

        let grey = compile(&mut vm, &env, "x + t(0, 0, 0).grey").unwrap();
        let expected = 1.0 * RED_INTENSITY + 2.0 * GREEN_INTENSITY + 3.0 * BLUE_INTENSITY;
        assert!((vm.create_context().evaluate(grey.handle, &[0.0; 3]).unwrap() - expected).abs() < 1e-12);

        let e = compile(&mut vm, &env, "t(x, y, z).w").unwrap_err();
        assert_eq!(lowering_code(e), "FN-C005");
    }

    #[test]
    fn scalar_trap_functions() {
        let mut vm = FunctionVM::new();
        let mut env = SymbolTable::new();
        let Some(trap) = find_trap("f_sphere") else { panic!("f_sphere missing") };
        let s = compile_trap_function(&mut vm, SourceInfo::named("s"), trap, &[], None).unwrap();
        assert_eq!(vm.function(s).unwrap().parameters, vec!["x", "y", "z", "p3"]);
        env.define_function("s", s);
        let f = compile(&mut vm, &env, "s(x, y, z, 1) * 2").unwrap();
        assert_eq!(vm.create_context().evaluate(f.handle, &[3.0, 0.0, 4.0]).unwrap(), 8.0);

        let e = compile_trap_function(&mut vm, SourceInfo::named("n"), TrapId::Scalar(99), &[], None).unwrap_err();
        assert_eq!(e.to_string(), "Function 'internal(99)' does not exist.");
    }

    #[test]
    fn constant_body_has_no_program() {
        let mut vm = FunctionVM::new();
        let f = compile(&mut vm, &SymbolTable::new(), "pow(2, 10)").unwrap();
        let code = vm.function(f.handle).unwrap();
        assert!(code.program.is_empty());
        assert_eq!(code.constant, Some(1024.0));
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f.handle, &[]).unwrap(), 1024.0);
        assert_eq!(ctx.stats().dispatches, 0);
    }

    #[test]
    fn failed_compile_leaves_registry_unchanged() {
        let mut vm = FunctionVM::new();
        let mut env = SymbolTable::new();
        let g = compile(&mut vm, &env, "x + 1").unwrap();
        env.define_function("g", g.handle);
        assert!(compile(&mut vm, &env, "g(x, y, z) + g(1, 2, 3) / 0").is_err());
        assert!(compile(&mut vm, &env, "g(x, y, z) + (").is_err());
        assert_eq!(vm.live_functions(), 1);
        assert_eq!(vm.len(), 1);
        assert_eq!(vm.reference_count(g.handle), 1);
    }
}

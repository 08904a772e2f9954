use std::fmt;

use super::intrinsics::{sys1_name, sys2_name};
use super::FunctionHandle;

/// The eight scalar registers. R0 holds results, R1 the second intrinsic
/// argument, R2..R4 the x/y/z parameters and R5..R7 pending operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    R0 = 0,
    R1,
    R2,
    R3,
    R4,
    R5,
    R6,
    R7,
}

impl Reg {
    #[inline(always)]
    pub fn idx(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", *self as u8)
    }
}

/// Relation tested against the condition code left by `cmp`/`cmpi`, or
/// against zero by the exception instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Cond {
    /// `ccr` is `((src > dst) << 1) | (src == dst)`, so 2 means dst < src,
    /// 1 means equal and 0 means dst > src.
    #[inline(always)]
    pub fn holds(self, ccr: u8) -> bool {
        match self {
            Cond::Eq => ccr == 1,
            Cond::Ne => ccr != 1,
            Cond::Lt => ccr == 2,
            Cond::Le => ccr >= 1,
            Cond::Gt => ccr == 0,
            Cond::Ge => ccr <= 1,
        }
    }

    /// Tests `value <rel> 0.0`.
    #[inline(always)]
    pub fn against_zero(self, value: f64) -> bool {
        match self {
            Cond::Eq => value == 0.0,
            Cond::Ne => value != 0.0,
            Cond::Lt => value < 0.0,
            Cond::Le => value <= 0.0,
            Cond::Gt => value > 0.0,
            Cond::Ge => value >= 0.0,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
        }
    }
}

#[inline(always)]
pub fn condition_code(src: f64, dst: f64) -> u8 {
    (((src > dst) as u8) << 1) | (src == dst) as u8
}

/// Memory operand of `load`/`store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Global store slot `k`.
    Global(u32),
    /// Stack slot `k` above the frame pointer.
    Local(u32),
    /// Global slot `k + trunc(index)`.
    GlobalIndexed(u32, Reg),
    /// Stack slot `k + trunc(index)` above the frame pointer.
    LocalIndexed(u32, Reg),
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Global(k) => write!(f, "0({k})"),
            Address::Local(k) => write!(f, "SP({k})"),
            Address::GlobalIndexed(k, r) => write!(f, "0({k}+{r})"),
            Address::LocalIndexed(k, r) => write!(f, "SP({k}+{r})"),
        }
    }
}

/// Binary register operations, `dst = dst <op> src`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    #[inline(always)]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            BinOp::Add => a + b,
            BinOp::Sub => a - b,
            BinOp::Mul => a * b,
            BinOp::Div => a / b,
            BinOp::Mod => a % b,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::Div => "div",
            BinOp::Mod => "mod",
        }
    }
}

/// One VM instruction. Immediate operands (`k`) index the constant pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Instruction {
    // register to register
    Op { op: BinOp, src: Reg, dst: Reg },
    Move { src: Reg, dst: Reg },
    Cmp { src: Reg, dst: Reg },
    Neg { src: Reg, dst: Reg },
    Abs { src: Reg, dst: Reg },
    // immediate
    OpI { op: BinOp, k: u32, dst: Reg },
    LoadI { k: u32, dst: Reg },
    CmpI { k: u32, dst: Reg },
    // condition materialisation and zero tests
    Set { cond: Cond, dst: Reg },
    Teq { dst: Reg },
    Tne { dst: Reg },
    // memory
    Load { addr: Address, dst: Reg },
    Store { src: Reg, addr: Address },
    // exception triggers
    Raise { cond: Cond, reg: Reg },
    RaiseZeroPow { reg: Reg },
    // control flow
    Branch { cond: Cond, target: u32 },
    Jmp(u32),
    Jsr(u32),
    Rts,
    Call(FunctionHandle),
    Sys1(u32),
    Sys2(u32),
    Trap(u32),
    TrapS(u32),
    // stack management
    Grow(u32),
    Push(u32),
    Pop(u32),
    Nop,
}

impl Instruction {
    /// Registry handle this instruction holds a reference to.
    pub fn callee(&self) -> Option<FunctionHandle> {
        match self {
            Instruction::Call(h) => Some(*h),
            _ => None,
        }
    }

    /// Renders the instruction, resolving constant operands through `consts`.
    pub fn display<'a>(&'a self, consts: &'a [f64]) -> Disassembly<'a> {
        Disassembly { inst: self, consts }
    }
}

pub struct Disassembly<'a> {
    inst: &'a Instruction,
    consts: &'a [f64],
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let konst = |k: &u32| self.consts.get(*k as usize).copied().unwrap_or(f64::NAN);
        match self.inst {
            Instruction::Op { op, src, dst } => write!(f, "{:<8}{src},{dst}", op.mnemonic()),
            Instruction::Move { src, dst } => write!(f, "{:<8}{src},{dst}", "move"),
            Instruction::Cmp { src, dst } => write!(f, "{:<8}{src},{dst}", "cmp"),
            Instruction::Neg { src, dst } => write!(f, "{:<8}{src},{dst}", "neg"),
            Instruction::Abs { src, dst } => write!(f, "{:<8}{src},{dst}", "abs"),
            Instruction::OpI { op, k, dst } => {
                let m = format!("{}i", op.mnemonic());
                write!(f, "{m:<8}{:.6},{dst}   # const({k})", konst(k))
            }
            Instruction::LoadI { k, dst } => write!(f, "{:<8}{:.6},{dst}   # const({k})", "loadi", konst(k)),
            Instruction::CmpI { k, dst } => write!(f, "{:<8}{:.6},{dst}   # const({k})", "cmpi", konst(k)),
            Instruction::Set { cond, dst } => write!(f, "s{:<7}{dst}", cond.suffix()),
            Instruction::Teq { dst } => write!(f, "{:<8}{dst}", "teq"),
            Instruction::Tne { dst } => write!(f, "{:<8}{dst}", "tne"),
            Instruction::Load { addr, dst } => write!(f, "{:<8}{addr},{dst}", "load"),
            Instruction::Store { src, addr } => write!(f, "{:<8}{src},{addr}", "store"),
            Instruction::Raise { cond, reg } => write!(f, "x{:<7}{reg}", cond.suffix()),
            Instruction::RaiseZeroPow { reg } => write!(f, "{:<8}R0,{reg}", "xdz"),
            Instruction::Branch { cond, target } => write!(f, "b{:<7}{target}", cond.suffix()),
            Instruction::Jmp(k) => write!(f, "{:<8}{k}", "jmp"),
            Instruction::Jsr(k) => write!(f, "{:<8}{k}", "jsr"),
            Instruction::Rts => write!(f, "rts"),
            Instruction::Call(h) => write!(f, "{:<8}{}", "call", h.index()),
            Instruction::Sys1(k) => write!(f, "{:<8}{k}   # {}", "sys1", sys1_name(*k)),
            Instruction::Sys2(k) => write!(f, "{:<8}{k}   # {}", "sys2", sys2_name(*k)),
            Instruction::Trap(k) => write!(f, "{:<8}{k}", "trap"),
            Instruction::TrapS(k) => write!(f, "{:<8}{k}", "traps"),
            Instruction::Grow(k) => write!(f, "{:<8}{k}", "grow"),
            Instruction::Push(k) => write!(f, "{:<8}{k}", "push"),
            Instruction::Pop(k) => write!(f, "{:<8}{k}", "pop"),
            Instruction::Nop => write!(f, "nop"),
        }
    }
}

use super::function::FunctionHandle;
use super::instruction::{condition_code, Address, Instruction, Reg};
use super::intrinsics::{SYS1_TABLE, SYS2_TABLE};
use super::registry::FunctionVM;
use super::traps::{TRAPS_TABLE, TRAP_TABLE};
use super::{RuntimeFault, VmError, VmResult};

/// Return address of an active `jsr` or `call`.
#[derive(Debug, Clone, Copy)]
struct Frame {
    pc: usize,
    function: FunctionHandle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Top-level `execute` calls.
    pub calls: u64,
    /// Entries into the dispatch loop; constant functions never enter it.
    pub dispatches: u64,
    pub deepest_call_stack: usize,
}

/// Per-thread evaluation state: operand stack, call frames and argument
/// cursor. Borrows the VM, so functions cannot be added or removed while a
/// context is alive.
pub struct FPUContext<'vm> {
    vm: &'vm FunctionVM,
    stack: Vec<f64>,
    frames: Vec<Frame>,
    next_argument: usize,
    stats: ContextStats,
}

impl<'vm> FPUContext<'vm> {
    pub fn new(vm: &'vm FunctionVM) -> Self {
        let cfg = vm.config();
        FPUContext {
            vm,
            stack: vec![0.0; cfg.initial_stack_size],
            frames: Vec::with_capacity(cfg.max_call_depth.min(64)),
            next_argument: 0,
            stats: ContextStats::default(),
        }
    }

    pub fn vm(&self) -> &'vm FunctionVM {
        self.vm
    }

    pub fn stats(&self) -> ContextStats {
        self.stats
    }

    pub fn stack_size(&self) -> usize {
        self.stack.len()
    }

    // ── Arguments ────────────────────────────────────────────────────

    pub fn init_arguments(&mut self) {
        self.next_argument = 0;
    }

    /// Stores the next top-level argument at the following stack slot.
    pub fn push_argument(&mut self, value: f64) {
        self.set_local(self.next_argument, value);
        self.next_argument += 1;
    }

    /// Writes stack slot `k`, growing the stack when `k` is past its end.
    pub fn set_local(&mut self, k: usize, value: f64) {
        if k >= self.stack.len() {
            let size = (k + 1).max(self.vm.config().initial_stack_size);
            self.stack.resize(size, 0.0);
        }
        self.stack[k] = value;
    }

    pub fn get_local(&self, k: usize) -> f64 {
        self.stack.get(k).copied().unwrap_or(0.0)
    }

    // ── Evaluation ───────────────────────────────────────────────────

    /// Runs `handle` with the arguments pushed so far, frame pointer 0.
    pub fn execute(&mut self, handle: FunctionHandle) -> VmResult<f64> {
        self.stats.calls += 1;
        let code = self.vm.function(handle)?;
        if let Some(value) = code.constant {
            return Ok(value);
        }
        self.run(handle)
    }

    pub fn evaluate(&mut self, handle: FunctionHandle, args: &[f64]) -> VmResult<f64> {
        self.init_arguments();
        for &a in args {
            self.push_argument(a);
        }
        self.execute(handle)
    }

    /// Runs a vector function and returns its `return_size` results.
    pub fn evaluate_vector(&mut self, handle: FunctionHandle, args: &[f64]) -> VmResult<Vec<f64>> {
        let size = self.vm.function(handle)?.return_size as usize;
        self.init_arguments();
        for _ in 0..size {
            self.push_argument(0.0);
        }
        for &a in args {
            self.push_argument(a);
        }
        self.execute(handle)?;
        Ok(self.stack[..size].to_vec())
    }

    fn fault(&self, function: FunctionHandle, fault: RuntimeFault) -> VmError {
        VmError::Runtime { site: self.vm.site(function), fault }
    }

    fn exception(&self, function: FunctionHandle) -> VmError {
        VmError::FloatingPoint { site: self.vm.site(function) }
    }

    fn enter(&mut self, pc: usize, function: FunctionHandle) -> VmResult<()> {
        self.frames.push(Frame { pc, function });
        let depth = self.frames.len();
        self.stats.deepest_call_stack = self.stats.deepest_call_stack.max(depth);
        if depth >= self.vm.config().max_call_depth {
            return Err(self.fault(function, RuntimeFault::RecursionLimit));
        }
        Ok(())
    }

    fn run(&mut self, start: FunctionHandle) -> VmResult<f64> {
        let vm = self.vm;
        let consts = vm.constants();
        let max_stack = vm.config().max_stack_size;
        let growth = vm.config().initial_stack_size;

        self.stats.dispatches += 1;
        self.frames.clear();

        let mut r = [0.0f64; 8];
        let mut ccr: u8 = 0;
        let mut func = start;
        let mut program: &'vm [Instruction] = &vm.function(start)?.program;
        let mut pc: usize = 0;
        let mut sp: usize = 0;

        macro_rules! reg {
            ($r:expr) => {
                r[$r.idx()]
            };
        }
        macro_rules! konst {
            ($k:expr) => {
                consts.get($k as usize).copied().unwrap_or(0.0)
            };
        }

        loop {
            let Some(&inst) = program.get(pc) else {
                return Err(self.fault(func, RuntimeFault::ProgramCounter));
            };
            match inst {
                Instruction::Op { op, src, dst } => reg!(dst) = op.apply(reg!(dst), reg!(src)),
                Instruction::Move { src, dst } => reg!(dst) = reg!(src),
                Instruction::Cmp { src, dst } => ccr = condition_code(reg!(src), reg!(dst)),
                Instruction::Neg { src, dst } => reg!(dst) = -reg!(src),
                Instruction::Abs { src, dst } => reg!(dst) = reg!(src).abs(),

                Instruction::OpI { op, k, dst } => reg!(dst) = op.apply(reg!(dst), konst!(k)),
                Instruction::LoadI { k, dst } => reg!(dst) = konst!(k),
                Instruction::CmpI { k, dst } => ccr = condition_code(konst!(k), reg!(dst)),

                Instruction::Set { cond, dst } => reg!(dst) = if cond.holds(ccr) { 1.0 } else { 0.0 },
                Instruction::Teq { dst } => reg!(dst) = if reg!(dst) == 0.0 { 1.0 } else { 0.0 },
                Instruction::Tne { dst } => reg!(dst) = if reg!(dst) != 0.0 { 1.0 } else { 0.0 },

                Instruction::Load { addr, dst } => {
                    let k = slot(addr, sp, &r);
                    r[dst.idx()] = match addr {
                        Address::Global(_) | Address::GlobalIndexed(..) => vm.get_global(k),
                        Address::Local(_) | Address::LocalIndexed(..) => match self.stack.get(k) {
                            Some(v) => *v,
                            None => return Err(self.fault(func, RuntimeFault::StackOverflow)),
                        },
                    };
                }
                Instruction::Store { src, addr } => {
                    let k = slot(addr, sp, &r);
                    let value = reg!(src);
                    match addr {
                        Address::Global(_) | Address::GlobalIndexed(..) => {
                            if !vm.store_global(k, value) {
                                return Err(self.fault(func, RuntimeFault::GlobalOutOfRange(k)));
                            }
                        }
                        Address::Local(_) | Address::LocalIndexed(..) => match self.stack.get_mut(k) {
                            Some(cell) => *cell = value,
                            None => return Err(self.fault(func, RuntimeFault::StackOverflow)),
                        },
                    }
                }

                Instruction::Raise { cond, reg } => {
                    if cond.against_zero(reg!(reg)) {
                        return Err(self.exception(func));
                    }
                }
                Instruction::RaiseZeroPow { reg } => {
                    if r[0] == 0.0 && reg!(reg) == 0.0 {
                        return Err(self.exception(func));
                    }
                }

                Instruction::Branch { cond, target } => {
                    if cond.holds(ccr) {
                        pc = target as usize;
                        continue;
                    }
                }
                Instruction::Jmp(target) => {
                    pc = target as usize;
                    continue;
                }
                Instruction::Jsr(target) => {
                    self.enter(pc, func)?;
                    pc = target as usize;
                    continue;
                }
                Instruction::Call(callee) => {
                    let code = vm.function(callee)?;
                    if let Some(value) = code.constant {
                        r[0] = value;
                    } else {
                        self.enter(pc, func)?;
                        func = callee;
                        program = &code.program;
                        pc = 0;
                        continue;
                    }
                }
                Instruction::Rts => match self.frames.pop() {
                    None => return Ok(r[0]),
                    Some(frame) => {
                        func = frame.function;
                        program = &vm.function(func)?.program;
                        pc = frame.pc + 1;
                        continue;
                    }
                },
                Instruction::Sys1(k) => match SYS1_TABLE.get(k as usize) {
                    Some((_, f)) => r[0] = f(r[0]),
                    None => return Err(self.fault(func, RuntimeFault::UnknownIntrinsic(k))),
                },
                Instruction::Sys2(k) => match SYS2_TABLE.get(k as usize) {
                    Some((_, f)) => r[0] = f(r[0], r[1]),
                    None => return Err(self.fault(func, RuntimeFault::UnknownIntrinsic(k))),
                },
                Instruction::Trap(k) => match TRAP_TABLE.get(k as usize) {
                    Some(trap) => r[0] = (trap.func)(self, sp, func)?,
                    None => return Err(self.fault(func, RuntimeFault::UnknownIntrinsic(k))),
                },
                Instruction::TrapS(k) => match TRAPS_TABLE.get(k as usize) {
                    Some(trap) => (trap.func)(self, sp, func)?,
                    None => return Err(self.fault(func, RuntimeFault::UnknownIntrinsic(k))),
                },

                Instruction::Grow(k) => {
                    let need = sp + k as usize;
                    if need >= max_stack {
                        return Err(self.fault(func, RuntimeFault::StackFull));
                    }
                    if need >= self.stack.len() {
                        let size = self.stack.len() + (k as usize + 1).max(growth);
                        self.stack.resize(size, 0.0);
                    }
                }
                Instruction::Push(k) => {
                    if sp + k as usize >= self.stack.len() {
                        return Err(self.fault(func, RuntimeFault::StackOverflow));
                    }
                    sp += k as usize;
                }
                Instruction::Pop(k) => {
                    if k as usize > sp {
                        return Err(self.fault(func, RuntimeFault::StackUnderflow));
                    }
                    sp -= k as usize;
                }
                Instruction::Nop => {}
            }
            pc += 1;
        }
    }
}

/// Stack or global index an address operand refers to.
fn slot(addr: Address, sp: usize, r: &[f64; 8]) -> usize {
    let index = |reg: Reg| r[reg.idx()] as usize;
    match addr {
        Address::Global(k) => k as usize,
        Address::Local(k) => sp + k as usize,
        Address::GlobalIndexed(k, reg) => k as usize + index(reg),
        Address::LocalIndexed(k, reg) => sp + k as usize + index(reg),
    }
}

// ── Context pool ─────────────────────────────────────────────────────

/// Reuses contexts so their grown stacks survive between evaluations.
pub struct ContextPool<'vm> {
    vm: &'vm FunctionVM,
    free: Vec<FPUContext<'vm>>,
}

impl<'vm> ContextPool<'vm> {
    pub fn new(vm: &'vm FunctionVM) -> Self {
        ContextPool { vm, free: Vec::new() }
    }

    pub fn acquire(&mut self) -> FPUContext<'vm> {
        self.free.pop().unwrap_or_else(|| FPUContext::new(self.vm))
    }

    /// Contexts created for another VM are dropped instead of pooled.
    pub fn release(&mut self, mut ctx: FPUContext<'vm>) {
        if std::ptr::eq(ctx.vm, self.vm) {
            ctx.init_arguments();
            self.free.push(ctx);
        }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::instruction::{BinOp, Cond};
    use crate::vm::traps::Transform;
    use crate::vm::{FunctionCode, SourceInfo};
    use std::sync::Arc;

    fn install(vm: &mut FunctionVM, name: &str, params: &[&str], program: Vec<Instruction>) -> FunctionHandle {
        let mut code = FunctionCode::new(SourceInfo::named(name), params.iter().map(|p| p.to_string()).collect());
        code.program = program;
        vm.add_function(code).unwrap()
    }

    #[test]
    fn adds_two_arguments() {
        let mut vm = FunctionVM::new();
        let f = install(
            &mut vm,
            "add",
            &["a", "b"],
            vec![
                Instruction::Load { addr: Address::Local(0), dst: Reg::R0 },
                Instruction::Load { addr: Address::Local(1), dst: Reg::R5 },
                Instruction::Op { op: BinOp::Add, src: Reg::R0, dst: Reg::R5 },
                Instruction::Move { src: Reg::R5, dst: Reg::R0 },
                Instruction::Rts,
            ],
        );
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f, &[2.0, 3.5]).unwrap(), 5.5);
        assert_eq!(ctx.stats().calls, 1);
        assert_eq!(ctx.stats().dispatches, 1);
    }

    #[test]
    fn constant_function_skips_dispatch() {
        let mut vm = FunctionVM::new();
        let f = vm.add_function(FunctionCode::constant(SourceInfo::named("c"), vec![], 4.0)).unwrap();
        let mut ctx = vm.create_context();
        assert_eq!(ctx.execute(f).unwrap(), 4.0);
        assert_eq!(ctx.stats().dispatches, 0);
    }

    #[test]
    fn branch_selects_smaller() {
        let mut vm = FunctionVM::new();
        // min(a, b)
        let f = install(
            &mut vm,
            "min",
            &["a", "b"],
            vec![
                Instruction::Load { addr: Address::Local(0), dst: Reg::R0 },
                Instruction::Load { addr: Address::Local(1), dst: Reg::R1 },
                Instruction::Cmp { src: Reg::R0, dst: Reg::R1 },
                Instruction::Branch { cond: Cond::Gt, target: 5 },
                Instruction::Move { src: Reg::R1, dst: Reg::R0 },
                Instruction::Rts,
            ],
        );
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f, &[3.0, 7.0]).unwrap(), 3.0);
        assert_eq!(ctx.evaluate(f, &[9.0, 7.0]).unwrap(), 7.0);
    }

    #[test]
    fn division_guard_raises() {
        let mut vm = FunctionVM::new();
        let f = install(
            &mut vm,
            "inv",
            &["a"],
            vec![
                Instruction::Load { addr: Address::Local(0), dst: Reg::R0 },
                Instruction::LoadI { k: 1, dst: Reg::R5 },
                Instruction::Raise { cond: Cond::Eq, reg: Reg::R0 },
                Instruction::Op { op: BinOp::Div, src: Reg::R0, dst: Reg::R5 },
                Instruction::Move { src: Reg::R5, dst: Reg::R0 },
                Instruction::Rts,
            ],
        );
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f, &[4.0]).unwrap(), 0.25);
        let err = ctx.evaluate(f, &[0.0]).unwrap_err();
        assert!(matches!(err, VmError::FloatingPoint { ref site } if site.function.as_deref() == Some("inv")));
    }

    #[test]
    fn zero_to_zero_power_raises() {
        let mut vm = FunctionVM::new();
        let f = install(
            &mut vm,
            "p",
            &["a", "b"],
            vec![
                Instruction::Load { addr: Address::Local(0), dst: Reg::R0 },
                Instruction::Load { addr: Address::Local(1), dst: Reg::R1 },
                Instruction::RaiseZeroPow { reg: Reg::R1 },
                Instruction::Sys2(0),
                Instruction::Rts,
            ],
        );
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f, &[2.0, 3.0]).unwrap(), 8.0);
        assert_eq!(ctx.evaluate(f, &[0.0, 2.0]).unwrap(), 0.0);
        assert!(ctx.evaluate(f, &[0.0, 0.0]).is_err());
    }

    #[test]
    fn pop_below_zero_underflows() {
        let mut vm = FunctionVM::new();
        let f = install(&mut vm, "u", &[], vec![Instruction::Pop(1), Instruction::Rts]);
        let err = vm.create_context().execute(f).unwrap_err();
        assert_eq!(err.to_string(), "Runtime error detected in function 'u'. Function evaluation stack underflow.");
    }

    #[test]
    fn push_past_stack_overflows() {
        let cfg = VmConfig { initial_stack_size: 4, ..VmConfig::default() };
        let mut vm = FunctionVM::with_config(cfg);
        let f = install(&mut vm, "o", &[], vec![Instruction::Push(4), Instruction::Rts]);
        let err = vm.create_context().execute(f).unwrap_err();
        assert!(matches!(err, VmError::Runtime { fault: RuntimeFault::StackOverflow, .. }));
    }

    #[test]
    fn grow_extends_then_refuses() {
        let cfg = VmConfig { initial_stack_size: 4, max_stack_size: 64, ..VmConfig::default() };
        let mut vm = FunctionVM::with_config(cfg);
        let ok = install(&mut vm, "g", &[], vec![Instruction::Grow(10), Instruction::Push(10), Instruction::Rts]);
        let full = install(&mut vm, "h", &[], vec![Instruction::Grow(64), Instruction::Rts]);
        let mut ctx = vm.create_context();
        ctx.execute(ok).unwrap();
        assert!(ctx.stack_size() > 10);
        let err = ctx.execute(full).unwrap_err();
        assert!(matches!(err, VmError::Runtime { fault: RuntimeFault::StackFull, .. }));
    }

    #[test]
    fn recursion_depth_limit() {
        let cfg = VmConfig { max_call_depth: 8, ..VmConfig::default() };
        let mut vm = FunctionVM::with_config(cfg);
        let mut chain = install(&mut vm, "leaf", &[], vec![Instruction::LoadI { k: 1, dst: Reg::R0 }, Instruction::Rts]);
        for i in 0..7 {
            vm.copy_function(chain).unwrap();
            chain = install(&mut vm, &format!("c{i}"), &[], vec![Instruction::Call(chain), Instruction::Rts]);
        }
        let mut ctx = vm.create_context();
        // seven frames deep fits under a limit of eight
        assert_eq!(ctx.execute(chain).unwrap(), 1.0);
        assert_eq!(ctx.stats().deepest_call_stack, 7);

        vm.copy_function(chain).unwrap();
        let deeper = install(&mut vm, "c7", &[], vec![Instruction::Call(chain), Instruction::Rts]);
        let mut ctx = vm.create_context();
        let err = ctx.execute(deeper).unwrap_err();
        assert!(err.to_string().ends_with("Maximum function evaluation recursion level reached."));
    }

    #[test]
    fn call_returns_past_call_site() {
        let mut vm = FunctionVM::new();
        let k = vm.add_constant(10.0).unwrap();
        let ten = install(&mut vm, "ten", &[], vec![Instruction::LoadI { k, dst: Reg::R0 }, Instruction::Rts]);
        vm.copy_function(ten).unwrap();
        let f = install(
            &mut vm,
            "f",
            &[],
            vec![
                Instruction::Call(ten),
                Instruction::OpI { op: BinOp::Add, k: 1, dst: Reg::R0 },
                Instruction::Rts,
            ],
        );
        let mut ctx = vm.create_context();
        assert_eq!(ctx.execute(f).unwrap(), 11.0);
        assert_eq!(ctx.stats().deepest_call_stack, 1);
    }

    #[test]
    fn globals_load_and_store() {
        let mut vm = FunctionVM::new();
        let f = install(
            &mut vm,
            "g",
            &[],
            vec![
                Instruction::Load { addr: Address::Global(0), dst: Reg::R0 },
                Instruction::OpI { op: BinOp::Add, k: 1, dst: Reg::R0 },
                Instruction::Store { src: Reg::R0, addr: Address::Global(1) },
                Instruction::Rts,
            ],
        );
        vm.set_global(0, 41.0);
        let mut ctx = vm.create_context();
        assert_eq!(ctx.execute(f).unwrap(), 42.0);
        assert_eq!(vm.get_global(1), 42.0);
    }

    #[test]
    fn running_off_the_end_is_reported() {
        let mut vm = FunctionVM::new();
        let f = install(&mut vm, "open", &[], vec![Instruction::Nop]);
        let err = vm.create_context().execute(f).unwrap_err();
        assert!(matches!(err, VmError::Runtime { fault: RuntimeFault::ProgramCounter, .. }));
    }

    #[test]
    fn scalar_trap_reads_stack_frame() {
        let mut vm = FunctionVM::new();
        let f = install(&mut vm, "f_sphere", &["x", "y", "z", "r"], vec![Instruction::Trap(3), Instruction::Rts]);
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate(f, &[3.0, 0.0, 4.0, 1.0]).unwrap(), 4.0);
    }

    #[test]
    fn vector_trap_uses_private_transform() {
        let mut vm = FunctionVM::new();
        let mut code = FunctionCode::new(SourceInfo::named("shift"), vec!["x".into(), "y".into(), "z".into()]);
        code.program = vec![Instruction::TrapS(0), Instruction::Rts];
        code.return_size = 3;
        code.private_data = Some(Arc::new(Transform::translate(1.0, 0.0, -1.0)));
        let f = vm.add_function(code).unwrap();
        let mut ctx = vm.create_context();
        assert_eq!(ctx.evaluate_vector(f, &[1.0, 2.0, 3.0]).unwrap(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn set_local_grows_stack() {
        let vm = FunctionVM::new();
        let mut ctx = vm.create_context();
        ctx.set_local(1000, 5.0);
        assert_eq!(ctx.get_local(1000), 5.0);
        assert_eq!(ctx.get_local(5000), 0.0);
    }

    #[test]
    fn pool_reuses_contexts() {
        let vm = FunctionVM::new();
        let mut pool = ContextPool::new(&vm);
        let mut ctx = pool.acquire();
        ctx.set_local(2000, 1.0);
        pool.release(ctx);
        assert_eq!(pool.available(), 1);
        let ctx = pool.acquire();
        assert!(ctx.stack_size() > 2000);
        assert_eq!(pool.available(), 0);

        let other = FunctionVM::new();
        pool.release(other.create_context());
        assert_eq!(pool.available(), 0);
        drop(ctx);
    }
}

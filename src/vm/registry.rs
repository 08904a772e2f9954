use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::FPUContext;
use super::function::{FunctionCode, FunctionHandle, SourceInfo};
use super::instruction::{Address, Instruction};
use super::{ErrorSite, VmError, VmResult};
use crate::config::VmConfig;

struct Slot {
    code: FunctionCode,
    /// Zero means the slot sits on the free list.
    reference_count: u32,
    next_free: Option<u32>,
    /// False while a declared function waits for its body.
    defined: bool,
}

/// Function registry, constant pool and global store.
///
/// Handles are slot indices. Freed slots are kept on a LIFO free list and
/// reused; the last slot is never free, so adding a function and removing
/// it again restores the registry exactly.
pub struct FunctionVM {
    config: VmConfig,
    slots: Vec<Slot>,
    free_head: Option<u32>,
    consts: Vec<f64>,
    globals: Vec<AtomicU64>,
}

impl Default for FunctionVM {
    fn default() -> Self {
        FunctionVM::new()
    }
}

impl FunctionVM {
    pub fn new() -> Self {
        FunctionVM::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = FunctionVM { config, slots: Vec::new(), free_head: None, consts: Vec::new(), globals: Vec::new() };
        vm.seed_constants();
        vm
    }

    fn seed_constants(&mut self) {
        self.consts.push(0.0);
        self.consts.push(1.0);
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Drops every function, constant and global.
    pub fn reset(&mut self) {
        self.slots.clear();
        self.free_head = None;
        self.consts.clear();
        self.globals.clear();
        self.seed_constants();
    }

    pub fn create_context(&self) -> FPUContext<'_> {
        FPUContext::new(self)
    }

    // ── Constant pool ────────────────────────────────────────────────

    /// Interns `value` and returns its pool index. Values are matched
    /// bit for bit, so `0.0` and `-0.0` get separate entries.
    pub fn add_constant(&mut self, value: f64) -> VmResult<u32> {
        let bits = value.to_bits();
        if let Some(k) = self.consts.iter().position(|c| c.to_bits() == bits) {
            return Ok(k as u32);
        }
        if self.consts.len() >= self.config.max_constants as usize {
            return Err(VmError::TooManyConstants { limit: self.config.max_constants });
        }
        self.consts.push(value);
        Ok(self.consts.len() as u32 - 1)
    }

    pub fn constants(&self) -> &[f64] {
        &self.consts
    }

    pub fn constant(&self, k: u32) -> f64 {
        self.consts.get(k as usize).copied().unwrap_or(0.0)
    }

    // ── Global store ─────────────────────────────────────────────────

    /// Writes global `k`, growing the store as needed.
    pub fn set_global(&mut self, k: usize, value: f64) {
        self.ensure_globals(k + 1);
        self.globals[k].store(value.to_bits(), Ordering::Relaxed);
    }

    /// Global `k`, or 0.0 when the store is smaller.
    pub fn get_global(&self, k: usize) -> f64 {
        self.globals.get(k).map(|g| f64::from_bits(g.load(Ordering::Relaxed))).unwrap_or(0.0)
    }

    /// Writes through a shared reference. Returns false if `k` is out of range.
    pub fn store_global(&self, k: usize, value: f64) -> bool {
        match self.globals.get(k) {
            Some(g) => {
                g.store(value.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    pub fn globals_len(&self) -> usize {
        self.globals.len()
    }

    fn ensure_globals(&mut self, len: usize) {
        while self.globals.len() < len {
            self.globals.push(AtomicU64::new(0));
        }
    }

    // ── Functions ────────────────────────────────────────────────────

    /// Installs `code` with a reference count of one.
    pub fn add_function(&mut self, code: FunctionCode) -> VmResult<FunctionHandle> {
        self.reserve_globals(&code);
        let handle = self.allocate()?;
        let slot = &mut self.slots[handle.0 as usize];
        slot.code = code;
        slot.defined = true;
        Ok(handle)
    }

    /// Reserves a handle for a function whose body is not compiled yet, so
    /// it can call itself or be called before it is defined.
    pub fn declare_function(&mut self, source: SourceInfo, parameters: Vec<String>) -> VmResult<FunctionHandle> {
        let handle = self.allocate()?;
        let slot = &mut self.slots[handle.0 as usize];
        slot.code = FunctionCode::new(source, parameters);
        slot.defined = false;
        Ok(handle)
    }

    /// Installs the body of a declared function.
    pub fn define_function(&mut self, handle: FunctionHandle, code: FunctionCode) -> VmResult<()> {
        self.reserve_globals(&code);
        let slot = self.live_slot_mut(handle).ok_or(VmError::UnknownFunction { handle })?;
        if slot.defined {
            return Err(VmError::AlreadyDefined { handle });
        }
        slot.code = code;
        slot.defined = true;
        Ok(())
    }

    pub fn is_defined(&self, handle: FunctionHandle) -> bool {
        self.live_slot(handle).is_some_and(|s| s.defined)
    }

    pub fn function(&self, handle: FunctionHandle) -> VmResult<&FunctionCode> {
        self.live_slot(handle).map(|s| &s.code).ok_or(VmError::UnknownFunction { handle })
    }

    /// Looks a function up and takes a reference to it.
    pub fn function_and_reference(&mut self, handle: FunctionHandle) -> VmResult<&FunctionCode> {
        let slot = self.live_slot_mut(handle).ok_or(VmError::UnknownFunction { handle })?;
        slot.reference_count += 1;
        Ok(&slot.code)
    }

    /// Takes another reference and returns the same handle.
    pub fn copy_function(&mut self, handle: FunctionHandle) -> VmResult<FunctionHandle> {
        self.function_and_reference(handle)?;
        Ok(handle)
    }

    pub fn destroy_function(&mut self, handle: FunctionHandle) {
        self.remove_function(handle);
    }

    pub fn reference_count(&self, handle: FunctionHandle) -> u32 {
        self.live_slot(handle).map(|s| s.reference_count).unwrap_or(0)
    }

    /// Drops one reference. A function whose count reaches zero is freed
    /// together with the references its calls hold. Groups of functions
    /// that only keep each other alive are freed as well. Unknown or
    /// already freed handles are ignored.
    pub fn remove_function(&mut self, handle: FunctionHandle) {
        let mut pending = vec![handle];
        while let Some(h) = pending.pop() {
            let Some(slot) = self.live_slot_mut(h) else { continue };
            slot.reference_count -= 1;
            if slot.reference_count == 0 {
                let code = self.release_slot(h);
                pending.extend(code.callees());
                continue;
            }
            let garbage = self.unreachable_group(h);
            if garbage.is_empty() {
                continue;
            }
            let mut codes = Vec::with_capacity(garbage.len());
            for &g in &garbage {
                if let Some(slot) = self.live_slot_mut(g) {
                    slot.reference_count = 0;
                    codes.push(std::mem::take(&mut slot.code));
                }
            }
            for code in &codes {
                pending.extend(code.callees().filter(|c| !garbage.contains(c)));
            }
            // Highest index first so trailing slots are trimmed in one go.
            let mut order = garbage;
            order.sort_unstable_by(|a, b| b.cmp(a));
            for g in order {
                self.free_slot(g);
            }
        }
    }

    /// Number of slots, live or free.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn live_functions(&self) -> usize {
        self.slots.iter().filter(|s| s.reference_count > 0).count()
    }

    /// Free slot indices in reuse order.
    pub fn free_slots(&self) -> Vec<u32> {
        let mut out = Vec::new();
        let mut cur = self.free_head;
        while let Some(i) = cur {
            out.push(i);
            cur = self.slots[i as usize].next_free;
        }
        out
    }

    /// Listing of a function's program, one instruction per line.
    pub fn disassemble(&self, handle: FunctionHandle) -> VmResult<String> {
        let code = self.function(handle)?;
        let name = code.source.name.as_deref().unwrap_or("<unnamed>");
        let mut out = format!("{name}({}):\n", code.parameters.join(", "));
        if let Some(v) = code.constant {
            out.push_str(&format!("        constant {v}\n"));
        }
        for (pc, inst) in code.program.iter().enumerate() {
            out.push_str(&format!("{pc:>6}  {}\n", inst.display(&self.consts)));
        }
        Ok(out)
    }

    pub(crate) fn site(&self, handle: FunctionHandle) -> ErrorSite {
        self.live_slot(handle).map(|s| ErrorSite::from_source(&s.code.source)).unwrap_or_default()
    }

    fn live_slot(&self, handle: FunctionHandle) -> Option<&Slot> {
        self.slots.get(handle.0 as usize).filter(|s| s.reference_count > 0)
    }

    fn live_slot_mut(&mut self, handle: FunctionHandle) -> Option<&mut Slot> {
        self.slots.get_mut(handle.0 as usize).filter(|s| s.reference_count > 0)
    }

    fn allocate(&mut self) -> VmResult<FunctionHandle> {
        if let Some(i) = self.free_head {
            let slot = &mut self.slots[i as usize];
            self.free_head = slot.next_free.take();
            slot.reference_count = 1;
            return Ok(FunctionHandle(i));
        }
        if self.slots.len() >= self.config.max_functions as usize {
            return Err(VmError::TooManyFunctions { limit: self.config.max_functions });
        }
        self.slots.push(Slot { code: FunctionCode::default(), reference_count: 1, next_free: None, defined: false });
        Ok(FunctionHandle(self.slots.len() as u32 - 1))
    }

    fn release_slot(&mut self, handle: FunctionHandle) -> FunctionCode {
        let code = std::mem::take(&mut self.slots[handle.0 as usize].code);
        self.free_slot(handle);
        code
    }

    /// Returns a slot whose count is already zero to the free list, or
    /// trims it (and any free slots below it) when it is the last one.
    fn free_slot(&mut self, handle: FunctionHandle) {
        let i = handle.0 as usize;
        if i >= self.slots.len() {
            return;
        }
        self.slots[i].code = FunctionCode::default();
        self.slots[i].defined = false;
        if i + 1 != self.slots.len() {
            self.slots[i].next_free = self.free_head;
            self.free_head = Some(i as u32);
            return;
        }
        self.slots.pop();
        while self.slots.last().is_some_and(|s| s.reference_count == 0) {
            let last = self.slots.len() as u32 - 1;
            self.unlink_free(last);
            self.slots.pop();
        }
    }

    fn unlink_free(&mut self, index: u32) {
        let next = self.slots[index as usize].next_free.take();
        if self.free_head == Some(index) {
            self.free_head = next;
            return;
        }
        let mut cur = self.free_head;
        while let Some(i) = cur {
            let slot = &mut self.slots[i as usize];
            if slot.next_free == Some(index) {
                slot.next_free = next;
                return;
            }
            cur = slot.next_free;
        }
    }

    /// Trial deletion: the functions reachable from `start` whose every
    /// remaining reference comes from calls inside that set, and that are
    /// not reachable from a member referenced from outside.
    fn unreachable_group(&self, start: FunctionHandle) -> Vec<FunctionHandle> {
        let mut internal: HashMap<FunctionHandle, u32> = HashMap::from([(start, 0)]);
        let mut members = vec![start];
        let mut i = 0;
        while i < members.len() {
            let h = members[i];
            i += 1;
            let Some(slot) = self.live_slot(h) else { continue };
            for callee in slot.code.callees() {
                if self.live_slot(callee).is_none() {
                    continue;
                }
                *internal.entry(callee).or_insert_with(|| {
                    members.push(callee);
                    0
                }) += 1;
            }
        }

        let mut alive: Vec<FunctionHandle> =
            members.iter().copied().filter(|h| self.reference_count(*h) > internal[h]).collect();
        if alive.contains(&start) {
            return Vec::new();
        }
        let mut marked: HashSet<FunctionHandle> = alive.iter().copied().collect();
        while let Some(h) = alive.pop() {
            let Some(slot) = self.live_slot(h) else { continue };
            for callee in slot.code.callees() {
                if internal.contains_key(&callee) && marked.insert(callee) {
                    alive.push(callee);
                }
            }
        }
        members.into_iter().filter(|h| !marked.contains(h)).collect()
    }

    /// Grows the global store to cover every fixed global address in `code`.
    fn reserve_globals(&mut self, code: &FunctionCode) {
        let top = code
            .program
            .iter()
            .filter_map(|inst| match inst {
                Instruction::Load { addr: Address::Global(k), .. }
                | Instruction::Store { addr: Address::Global(k), .. } => Some(*k as usize + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);
        self.ensure_globals(top);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::Reg;

    fn leaf(name: &str) -> FunctionCode {
        FunctionCode::constant(SourceInfo::named(name), vec![], 1.0)
    }

    fn caller(name: &str, callees: &[FunctionHandle]) -> FunctionCode {
        let mut code = FunctionCode::new(SourceInfo::named(name), vec![]);
        code.program = callees.iter().map(|h| Instruction::Call(*h)).collect();
        code.program.push(Instruction::Rts);
        code
    }

    #[test]
    fn fresh_vm_seeds_zero_and_one() {
        let vm = FunctionVM::new();
        assert_eq!(vm.constants(), &[0.0, 1.0]);
    }

    #[test]
    fn constants_are_interned() {
        let mut vm = FunctionVM::new();
        assert_eq!(vm.add_constant(1.0).unwrap(), 1);
        let k = vm.add_constant(2.5).unwrap();
        assert_eq!(vm.add_constant(2.5).unwrap(), k);
        assert_ne!(vm.add_constant(-0.0).unwrap(), 0);
    }

    #[test]
    fn constant_limit() {
        let cfg = VmConfig { max_constants: 3, ..VmConfig::default() };
        let mut vm = FunctionVM::with_config(cfg);
        vm.add_constant(7.0).unwrap();
        assert_eq!(vm.add_constant(8.0), Err(VmError::TooManyConstants { limit: 3 }));
    }

    #[test]
    fn add_remove_round_trip_on_empty_free_list() {
        let mut vm = FunctionVM::new();
        let a = vm.add_function(leaf("a")).unwrap();
        let before = (vm.len(), vm.free_slots());
        let b = vm.add_function(leaf("b")).unwrap();
        vm.remove_function(b);
        assert_eq!((vm.len(), vm.free_slots()), before);
        assert_eq!(vm.reference_count(a), 1);
    }

    #[test]
    fn add_remove_round_trip_with_free_slots() {
        let mut vm = FunctionVM::new();
        let a = vm.add_function(leaf("a")).unwrap();
        let b = vm.add_function(leaf("b")).unwrap();
        let _c = vm.add_function(leaf("c")).unwrap();
        vm.remove_function(a);
        vm.remove_function(b);
        let before = (vm.len(), vm.free_slots());
        assert_eq!(before.1, vec![1, 0]);
        let d = vm.add_function(leaf("d")).unwrap();
        assert_eq!(d.index(), 1);
        vm.remove_function(d);
        assert_eq!((vm.len(), vm.free_slots()), before);
    }

    #[test]
    fn trailing_free_slots_are_trimmed() {
        let mut vm = FunctionVM::new();
        let a = vm.add_function(leaf("a")).unwrap();
        let b = vm.add_function(leaf("b")).unwrap();
        let c = vm.add_function(leaf("c")).unwrap();
        vm.remove_function(b);
        vm.remove_function(c);
        assert_eq!(vm.len(), 1);
        assert!(vm.free_slots().is_empty());
        vm.remove_function(a);
        assert!(vm.is_empty());
    }

    #[test]
    fn callee_outlives_first_caller() {
        let mut vm = FunctionVM::new();
        let f = vm.add_function(leaf("f")).unwrap();
        vm.copy_function(f).unwrap();
        let g = vm.add_function(caller("g", &[f])).unwrap();
        vm.copy_function(f).unwrap();
        let h = vm.add_function(caller("h", &[f])).unwrap();
        vm.remove_function(f);
        assert_eq!(vm.reference_count(f), 2);
        vm.remove_function(g);
        assert_eq!(vm.reference_count(f), 1);
        vm.remove_function(h);
        assert_eq!(vm.reference_count(f), 0);
        assert!(vm.is_empty());
    }

    #[test]
    fn self_recursive_function_is_freed() {
        let mut vm = FunctionVM::new();
        let f = vm.declare_function(SourceInfo::named("f"), vec!["x".into()]).unwrap();
        vm.copy_function(f).unwrap();
        vm.define_function(f, caller("f", &[f])).unwrap();
        assert_eq!(vm.reference_count(f), 2);
        vm.remove_function(f);
        assert_eq!(vm.reference_count(f), 0);
        assert!(vm.is_empty());
    }

    #[test]
    fn mutual_recursion_freed_once() {
        let mut vm = FunctionVM::new();
        let keep = vm.add_function(leaf("keep")).unwrap();
        let a = vm.declare_function(SourceInfo::named("a"), vec![]).unwrap();
        let b = vm.declare_function(SourceInfo::named("b"), vec![]).unwrap();
        vm.copy_function(b).unwrap();
        vm.define_function(a, caller("a", &[b])).unwrap();
        vm.copy_function(a).unwrap();
        vm.define_function(b, caller("b", &[a])).unwrap();
        vm.remove_function(b);
        assert_eq!(vm.reference_count(a), 2);
        assert_eq!(vm.reference_count(b), 1);
        vm.remove_function(a);
        assert_eq!(vm.reference_count(a), 0);
        assert_eq!(vm.reference_count(b), 0);
        assert_eq!(vm.len(), 1);
        assert_eq!(vm.reference_count(keep), 1);
    }

    #[test]
    fn cycle_kept_alive_from_outside() {
        let mut vm = FunctionVM::new();
        let a = vm.declare_function(SourceInfo::named("a"), vec![]).unwrap();
        let b = vm.declare_function(SourceInfo::named("b"), vec![]).unwrap();
        vm.copy_function(b).unwrap();
        vm.define_function(a, caller("a", &[b])).unwrap();
        vm.copy_function(a).unwrap();
        vm.define_function(b, caller("b", &[a])).unwrap();
        vm.copy_function(b).unwrap();
        let user = vm.add_function(caller("user", &[b])).unwrap();
        vm.remove_function(a);
        vm.remove_function(b);
        assert_eq!(vm.reference_count(a), 1);
        assert_eq!(vm.reference_count(b), 2);
        vm.remove_function(user);
        assert!(vm.is_empty());
    }

    #[test]
    fn unknown_handles_are_ignored_or_reported() {
        let mut vm = FunctionVM::new();
        let ghost = FunctionHandle(9);
        vm.remove_function(ghost);
        assert_eq!(vm.function(ghost).unwrap_err(), VmError::UnknownFunction { handle: ghost });
        let f = vm.add_function(leaf("f")).unwrap();
        vm.remove_function(f);
        vm.remove_function(f);
        assert!(vm.function(f).is_err());
    }

    #[test]
    fn define_twice_is_rejected() {
        let mut vm = FunctionVM::new();
        let f = vm.declare_function(SourceInfo::named("f"), vec![]).unwrap();
        assert!(!vm.is_defined(f));
        vm.define_function(f, leaf("f")).unwrap();
        assert!(vm.is_defined(f));
        assert_eq!(vm.define_function(f, leaf("f")), Err(VmError::AlreadyDefined { handle: f }));
    }

    #[test]
    fn function_limit() {
        let cfg = VmConfig { max_functions: 2, ..VmConfig::default() };
        let mut vm = FunctionVM::with_config(cfg);
        vm.add_function(leaf("a")).unwrap();
        vm.add_function(leaf("b")).unwrap();
        assert_eq!(vm.add_function(leaf("c")).unwrap_err(), VmError::TooManyFunctions { limit: 2 });
    }

    #[test]
    fn globals_grow_and_default_to_zero() {
        let mut vm = FunctionVM::new();
        assert_eq!(vm.get_global(3), 0.0);
        assert!(!vm.store_global(3, 1.0));
        vm.set_global(3, 2.5);
        assert_eq!(vm.globals_len(), 4);
        assert_eq!(vm.get_global(3), 2.5);
        assert!(vm.store_global(0, -1.0));
        assert_eq!(vm.get_global(0), -1.0);
    }

    #[test]
    fn global_addresses_reserved_on_install() {
        let mut vm = FunctionVM::new();
        let mut code = FunctionCode::new(SourceInfo::default(), vec![]);
        code.program = vec![
            Instruction::Load { addr: Address::Global(5), dst: Reg::R0 },
            Instruction::Rts,
        ];
        vm.add_function(code).unwrap();
        assert_eq!(vm.globals_len(), 6);
    }

    #[test]
    fn reset_restores_fresh_state() {
        let mut vm = FunctionVM::new();
        vm.add_constant(9.0).unwrap();
        vm.add_function(leaf("a")).unwrap();
        vm.set_global(2, 1.0);
        vm.reset();
        assert!(vm.is_empty());
        assert_eq!(vm.constants(), &[0.0, 1.0]);
        assert_eq!(vm.globals_len(), 0);
    }

    #[test]
    fn disassembly_lists_every_instruction() {
        let mut vm = FunctionVM::new();
        let mut code = FunctionCode::new(SourceInfo::named("g"), vec!["x".into()]);
        code.program = vec![
            Instruction::Load { addr: Address::Local(0), dst: Reg::R2 },
            Instruction::Move { src: Reg::R2, dst: Reg::R0 },
            Instruction::Rts,
        ];
        let h = vm.add_function(code).unwrap();
        let text = vm.disassemble(h).unwrap();
        assert!(text.starts_with("g(x):\n"));
        assert_eq!(text.lines().count(), 4);
        assert!(text.contains("SP(0),R2"));

        let k = vm.add_function(leaf("k")).unwrap();
        assert!(vm.disassemble(k).unwrap().contains("constant 1"));
    }
}

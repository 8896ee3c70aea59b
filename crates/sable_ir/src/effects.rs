//! Effect classification.
//!
//! Two layers: pure boolean predicates over a node (may it read, write,
//! throw, not return), and a coarse abstract-heap summary used to answer
//! "can these two instructions be reordered" without walking operands.
//! Heaps are encoded as pre/post intervals in a conceptual tree, so
//! interference is two integer comparisons.

use crate::{
    inst::{Callee, InstKind},
    FnAttrs, Inst, Module,
};

// ---------------------------------------------------------------------------
// MemoryEffects
// ---------------------------------------------------------------------------

/// Declared memory behavior of a callee or call site.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryEffects {
    /// May read and write arbitrary memory.
    #[default]
    ReadWrite,
    /// Reads but never writes.
    ReadOnly,
    /// Writes but never reads.
    WriteOnly,
    /// Touches no memory at all.
    None,
}

impl MemoryEffects {
    #[inline]
    pub fn may_read(self) -> bool {
        matches!(self, MemoryEffects::ReadWrite | MemoryEffects::ReadOnly)
    }

    #[inline]
    pub fn may_write(self) -> bool {
        matches!(self, MemoryEffects::ReadWrite | MemoryEffects::WriteOnly)
    }

    fn from_caps(read: bool, write: bool) -> Self {
        match (read, write) {
            (true, true) => MemoryEffects::ReadWrite,
            (true, false) => MemoryEffects::ReadOnly,
            (false, true) => MemoryEffects::WriteOnly,
            (false, false) => MemoryEffects::None,
        }
    }

    /// The behavior guaranteed by both declarations at once.
    pub fn intersect(self, other: Self) -> Self {
        Self::from_caps(
            self.may_read() && other.may_read(),
            self.may_write() && other.may_write(),
        )
    }
}

// ---------------------------------------------------------------------------
// AbstractHeap
// ---------------------------------------------------------------------------

/// A node in the abstract-heap tree, encoded as a pre/post interval.
/// Two heaps interfere iff their intervals overlap, i.e. one is an
/// ancestor of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AbstractHeap {
    pre: u32,
    post: u32,
}

impl AbstractHeap {
    pub fn new(pre: u32, post: u32) -> Self {
        assert!(pre <= post);
        Self { pre, post }
    }

    #[inline]
    pub fn interferes_with(&self, other: &AbstractHeap) -> bool {
        self.pre <= other.post && other.pre <= self.post
    }
}

/// The fixed heaps every module carries. `world` is the root: everything
/// interferes with it.
#[derive(Debug, Clone)]
pub struct BaseHeaps {
    pub world: AbstractHeap,
    pub memory: AbstractHeap,
    pub control: AbstractHeap,
    pub ssa_state: AbstractHeap,
}

impl Default for BaseHeaps {
    fn default() -> Self {
        Self {
            world: AbstractHeap::new(1, 8),
            memory: AbstractHeap::new(2, 3),
            control: AbstractHeap::new(4, 5),
            ssa_state: AbstractHeap::new(6, 7),
        }
    }
}

// ---------------------------------------------------------------------------
// FastEffects
// ---------------------------------------------------------------------------

/// One side (reads or writes) of an effect summary.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EffectSet {
    heaps: Vec<AbstractHeap>,
}

impl EffectSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.heaps.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heaps.is_empty()
    }

    pub fn push(&mut self, heap: AbstractHeap) {
        self.heaps.push(heap);
    }

    pub fn interferes_with(&self, heap: &AbstractHeap) -> bool {
        self.heaps.iter().any(|h| h.interferes_with(heap))
    }

    fn interferes_with_any(&self, other: &EffectSet) -> bool {
        other.heaps.iter().any(|h| self.interferes_with(h))
    }
}

/// A reads/writes pair summarizing one instruction's effects.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FastEffects {
    pub reads: EffectSet,
    pub writes: EffectSet,
}

impl FastEffects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.reads.clear();
        self.writes.clear();
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty() && self.writes.is_empty()
    }

    /// Whether reordering the two summarized instructions could change
    /// behavior: read/write, write/read, or write/write overlap.
    pub fn interferes_with(&self, other: &FastEffects) -> bool {
        self.reads.interferes_with_any(&other.writes)
            || self.writes.interferes_with_any(&other.reads)
            || self.writes.interferes_with_any(&other.writes)
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

impl Inst {
    /// The effective function-level attributes of a call-like node: the
    /// call site's own attributes merged with the callee's declaration.
    fn call_fn_attrs(&self, m: &Module) -> Option<FnAttrs> {
        let (callee, attrs) = match &self.kind {
            InstKind::Call { callee, attrs, .. }
            | InstKind::Invoke { callee, attrs, .. }
            | InstKind::CallBr { callee, attrs, .. } => (callee, attrs),
            _ => return None,
        };
        let site = attrs.fn_attrs;
        Some(match callee {
            Callee::Direct(f) => {
                let decl = m.func(*f).attrs;
                FnAttrs {
                    nothrow: site.nothrow || decl.nothrow,
                    will_return: site.will_return || decl.will_return,
                    memory: site.memory.intersect(decl.memory),
                }
            }
            Callee::Indirect(_) => site,
        })
    }

    /// May this instruction read from memory?
    ///
    /// Loads always may; a store only when it is not provably unordered
    /// and plain; call-like nodes per their declared memory behavior.
    pub fn may_read_from_memory(&self, m: &Module) -> bool {
        match &self.kind {
            InstKind::Load { .. }
            | InstKind::VaArg { .. }
            | InstKind::Fence { .. }
            | InstKind::Cmpxchg { .. }
            | InstKind::AtomicRmw { .. }
            | InstKind::CatchPad { .. }
            | InstKind::CatchRet { .. } => true,
            InstKind::Store {
                volatile, ordering, ..
            } => !(ordering.is_unordered() && !volatile),
            k if k.is_call_like() => self.call_fn_attrs(m).unwrap().memory.may_read(),
            _ => false,
        }
    }

    /// May this instruction write to memory?
    pub fn may_write_to_memory(&self, m: &Module) -> bool {
        match &self.kind {
            InstKind::Store { .. }
            | InstKind::VaArg { .. }
            | InstKind::Fence { .. }
            | InstKind::Cmpxchg { .. }
            | InstKind::AtomicRmw { .. }
            | InstKind::CatchPad { .. }
            | InstKind::CatchRet { .. } => true,
            InstKind::Load {
                volatile, ordering, ..
            } => !(ordering.is_unordered() && !volatile),
            k if k.is_call_like() => self.call_fn_attrs(m).unwrap().memory.may_write(),
            _ => false,
        }
    }

    pub fn is_atomic(&self) -> bool {
        match &self.kind {
            InstKind::Cmpxchg { .. } | InstKind::AtomicRmw { .. } | InstKind::Fence { .. } => true,
            InstKind::Load { ordering, .. } | InstKind::Store { ordering, .. } => {
                ordering.is_atomic()
            }
            _ => false,
        }
    }

    /// Whether this atomic instruction performs an atomic load.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the instruction is not atomic.
    pub fn has_atomic_load(&self) -> bool {
        debug_assert!(self.is_atomic());
        matches!(
            self.kind,
            InstKind::Cmpxchg { .. } | InstKind::AtomicRmw { .. } | InstKind::Load { .. }
        )
    }

    /// Whether this atomic instruction performs an atomic store.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the instruction is not atomic.
    pub fn has_atomic_store(&self) -> bool {
        debug_assert!(self.is_atomic());
        matches!(
            self.kind,
            InstKind::Cmpxchg { .. } | InstKind::AtomicRmw { .. } | InstKind::Store { .. }
        )
    }

    /// Volatility. For call-like nodes, only the few intrinsics that encode
    /// volatility as a trailing constant argument qualify.
    pub fn is_volatile(&self, m: &Module) -> bool {
        match &self.kind {
            InstKind::Load { volatile, .. }
            | InstKind::Store { volatile, .. }
            | InstKind::AtomicRmw { volatile, .. }
            | InstKind::Cmpxchg { volatile, .. } => *volatile,
            InstKind::Call {
                callee: Callee::Direct(f),
                args,
                ..
            }
            | InstKind::Invoke {
                callee: Callee::Direct(f),
                args,
                ..
            } => match m.func(*f).intrinsic {
                Some(intr) if intr.has_volatile_arg() => args
                    .last()
                    .is_some_and(|&flag| m.inst(flag).is_const(1)),
                _ => false,
            },
            _ => false,
        }
    }

    /// May this instruction transfer control by unwinding?
    ///
    /// `include_phase_one_unwind` also counts pads that stop only the
    /// second (cleanup-running) phase: phase-one unwinding passes straight
    /// through pure cleanup pads, so callers needing valid unwind info
    /// through them set the flag.
    pub fn may_throw(&self, m: &Module, include_phase_one_unwind: bool) -> bool {
        match &self.kind {
            InstKind::Call { .. } => !self.call_fn_attrs(m).unwrap().nothrow,
            InstKind::CleanupRet { unwind, .. } => unwind.is_none(),
            InstKind::CatchSwitch { unwind, .. } => unwind.is_none(),
            InstKind::Resume(_) => true,
            InstKind::Invoke { unwind, .. } => {
                // The pad itself does not unwind, but an unwind skipping a
                // passable pad continues into the caller's frame.
                match m.first_non_phi(*unwind).map(|r| &m.inst(r).kind) {
                    Some(InstKind::LandingPad { clauses, cleanup }) => {
                        can_unwind_past_landing_pad(clauses, *cleanup, include_phase_one_unwind)
                    }
                    _ => false,
                }
            }
            InstKind::CleanupPad { .. } => include_phase_one_unwind,
            _ => false,
        }
    }

    /// Is this instruction guaranteed to transfer execution to its
    /// successor? A volatile store is not; a call is only with an explicit
    /// guarantee.
    pub fn will_return(&self, m: &Module) -> bool {
        match &self.kind {
            InstKind::Store { volatile, .. } => !volatile,
            k if k.is_call_like() => self.call_fn_attrs(m).unwrap().will_return,
            _ => true,
        }
    }

    pub fn may_have_side_effects(&self, m: &Module) -> bool {
        self.may_write_to_memory(m) || self.may_throw(m, false) || !self.will_return(m)
    }

    /// Whether erasing this instruction cannot change observable behavior
    /// through anything but its result value.
    pub fn is_safe_to_remove(&self, m: &Module) -> bool {
        (!matches!(self.kind, InstKind::Call { .. }) || !self.may_have_side_effects(m))
            && !self.is_terminator()
            && !self.is_eh_pad()
    }

    pub fn is_lifetime_start_or_end(&self, m: &Module) -> bool {
        match &self.kind {
            InstKind::Call {
                callee: Callee::Direct(f),
                ..
            } => matches!(
                m.func(*f).intrinsic,
                Some(crate::inst::Intrinsic::LifetimeStart | crate::inst::Intrinsic::LifetimeEnd)
            ),
            _ => false,
        }
    }

    /// Summarizes this instruction's effects over the module's base heaps.
    pub fn get_effects(&self, m: &Module, effects: &mut FastEffects) {
        let heaps = m.heaps();
        if self.may_read_from_memory(m) {
            effects.reads.push(heaps.memory);
        }
        if self.may_write_to_memory(m) {
            effects.writes.push(heaps.memory);
        }
        if matches!(self.kind, InstKind::Phi { .. }) {
            effects.reads.push(heaps.ssa_state);
        }
        if self.is_terminator() || self.may_throw(m, false) {
            effects.writes.push(heaps.control);
        }
        if self.is_volatile(m) || self.is_atomic() {
            // Volatile and atomic accesses order against everything.
            effects.reads.push(heaps.world);
            effects.writes.push(heaps.world);
        }
    }
}

/// A landing pad is passable — an unwind may continue past it — when it is
/// a pure cleanup pad (stops phase two only) or when none of its clauses
/// unconditionally catches everything.
fn can_unwind_past_landing_pad(
    clauses: &[crate::inst::Clause],
    cleanup: bool,
    include_phase_one_unwind: bool,
) -> bool {
    // Phase one skips cleanup landing pads entirely, so the unwind
    // effectively leaves this frame.
    if cleanup {
        return include_phase_one_unwind;
    }
    // A catch-all clause (null catch or empty filter) stops every unwind.
    if clauses.iter().any(|c| c.catches_all()) {
        return false;
    }
    // Only some exceptions are caught; the rest continue unwinding.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{AtomicOrdering, Clause, Intrinsic, SyncScope};
    use crate::{Block, Callee, Func, Inst, InstKind, Type};
    use sable_interner::{Interner, Symbol};
    use sable_sourcemap::SourceSpan;
    use smallvec::SmallVec;

    const SPAN: SourceSpan = SourceSpan::empty(0);

    fn store_with_ordering(m: &mut Module, ordering: AtomicOrdering) -> crate::InstRef {
        let p = m.new_inst(Inst::alloca(Type::Int32, 4, SPAN));
        let v = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let mut store = Inst::store(p, v, 4, SPAN);
        if let InstKind::Store { ordering: o, .. } = &mut store.kind {
            *o = ordering;
        }
        m.new_inst(store)
    }

    #[test]
    fn unordered_store_writes_but_is_not_atomic() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);

        let s = store_with_ordering(&mut m, AtomicOrdering::Unordered);
        assert!(m.inst(s).may_write_to_memory(&m));
        assert!(!m.inst(s).may_read_from_memory(&m));
        assert!(m.inst(s).is_atomic());

        let s = store_with_ordering(&mut m, AtomicOrdering::NotAtomic);
        assert!(m.inst(s).may_write_to_memory(&m));
        assert!(!m.inst(s).is_atomic());

        let s = store_with_ordering(&mut m, AtomicOrdering::Monotonic);
        assert!(m.inst(s).is_atomic());
        // Ordered stores pin surrounding reads as well.
        assert!(m.inst(s).may_read_from_memory(&m));
        assert!(m.inst(s).has_atomic_store());
        assert!(!m.inst(s).has_atomic_load());
    }

    #[test]
    fn volatile_store_is_not_guaranteed_to_return() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let p = m.new_inst(Inst::alloca(Type::Int32, 4, SPAN));
        let v = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));

        let mut store = Inst::store(p, v, 4, SPAN);
        if let InstKind::Store { volatile, .. } = &mut store.kind {
            *volatile = true;
        }
        let s = m.new_inst(store);

        assert!(m.inst(s).is_volatile(&m));
        assert!(!m.inst(s).will_return(&m));
        assert!(m.inst(s).may_have_side_effects(&m));
    }

    #[test]
    fn call_memory_effects_delegate_to_the_callee() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);

        let pure = m.new_func(Func {
            attrs: crate::FnAttrs {
                nothrow: true,
                will_return: true,
                memory: MemoryEffects::None,
            },
            ..Func::default()
        });
        let reader = m.new_func(Func {
            attrs: crate::FnAttrs {
                memory: MemoryEffects::ReadOnly,
                ..Default::default()
            },
            ..Func::default()
        });

        let c1 = m.new_inst(Inst::call(Type::Int32, pure, [], SPAN));
        assert!(!m.inst(c1).may_read_from_memory(&m));
        assert!(!m.inst(c1).may_write_to_memory(&m));
        assert!(!m.inst(c1).may_throw(&m, false));
        assert!(m.inst(c1).will_return(&m));
        assert!(!m.inst(c1).may_have_side_effects(&m));
        assert!(m.inst(c1).is_safe_to_remove(&m));

        let c2 = m.new_inst(Inst::call(Type::Int32, reader, [], SPAN));
        assert!(m.inst(c2).may_read_from_memory(&m));
        assert!(!m.inst(c2).may_write_to_memory(&m));
        // No will-return guarantee: the call has side effects.
        assert!(m.inst(c2).may_have_side_effects(&m));
        assert!(!m.inst(c2).is_safe_to_remove(&m));
    }

    #[test]
    fn memcpy_volatility_comes_from_the_flag_argument() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let memcpy = m.new_func(Func {
            intrinsic: Some(Intrinsic::MemCpy),
            ..Func::default()
        });

        let dst = m.new_inst(Inst::alloca(Type::Int64, 8, SPAN));
        let src = m.new_inst(Inst::alloca(Type::Int64, 8, SPAN));
        let len = m.new_inst(Inst::const_int(Type::Int64, 16, SPAN));
        let yes = m.new_inst(Inst::const_int(Type::Int1, 1, SPAN));
        let no = m.new_inst(Inst::const_int(Type::Int1, 0, SPAN));

        let volatile = m.new_inst(Inst::call(Type::Void, memcpy, [dst, src, len, yes], SPAN));
        let plain = m.new_inst(Inst::call(Type::Void, memcpy, [dst, src, len, no], SPAN));

        assert!(m.inst(volatile).is_volatile(&m));
        assert!(!m.inst(plain).is_volatile(&m));
    }

    #[test]
    fn invoke_over_catch_all_landing_pad_cannot_throw() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let callee = m.new_func(Func::default());
        let pad_block = m.new_block(Block::default());
        let normal = m.new_block(Block::default());

        let pad = m.new_inst(Inst::new(
            Type::Ptr,
            InstKind::LandingPad {
                clauses: vec![Clause::Catch(None)],
                cleanup: false,
            },
            SPAN,
        ));
        m.push_inst(pad_block, pad);

        let invoke = m.new_inst(Inst::new(
            Type::Void,
            InstKind::Invoke {
                callee: Callee::Direct(callee),
                args: SmallVec::new(),
                conv: Default::default(),
                attrs: Default::default(),
                bundles: Vec::new(),
                normal,
                unwind: pad_block,
            },
            SPAN,
        ));

        assert!(!m.inst(invoke).may_throw(&m, false));
        assert!(!m.inst(invoke).may_throw(&m, true));
    }

    #[test]
    fn invoke_over_cleanup_pad_throws_only_in_phase_one() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let callee = m.new_func(Func::default());
        let pad_block = m.new_block(Block::default());
        let normal = m.new_block(Block::default());

        let pad = m.new_inst(Inst::new(
            Type::Ptr,
            InstKind::LandingPad {
                clauses: Vec::new(),
                cleanup: true,
            },
            SPAN,
        ));
        m.push_inst(pad_block, pad);

        let invoke = m.new_inst(Inst::new(
            Type::Void,
            InstKind::Invoke {
                callee: Callee::Direct(callee),
                args: SmallVec::new(),
                conv: Default::default(),
                attrs: Default::default(),
                bundles: Vec::new(),
                normal,
                unwind: pad_block,
            },
            SPAN,
        ));

        assert!(!m.inst(invoke).may_throw(&m, false));
        assert!(m.inst(invoke).may_throw(&m, true));
    }

    #[test]
    fn selective_filter_pad_is_passable() {
        let sym = Symbol::default();
        let selective = [Clause::Filter(vec![sym])];
        assert!(can_unwind_past_landing_pad(&selective, false, false));

        let catch_all = [Clause::Filter(Vec::new())];
        assert!(!can_unwind_past_landing_pad(&catch_all, false, false));
    }

    #[test]
    fn unwind_to_caller_terminators_throw() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let pad = m.new_inst(Inst::new(
            Type::Void,
            InstKind::CleanupPad {
                parent: None,
                args: SmallVec::new(),
            },
            SPAN,
        ));

        let to_caller = m.new_inst(Inst::new(
            Type::Void,
            InstKind::CleanupRet { pad, unwind: None },
            SPAN,
        ));
        assert!(m.inst(to_caller).may_throw(&m, false));

        let local = m.new_block(Block::default());
        let to_pad = m.new_inst(Inst::new(
            Type::Void,
            InstKind::CleanupRet {
                pad,
                unwind: Some(local),
            },
            SPAN,
        ));
        assert!(!m.inst(to_pad).may_throw(&m, false));

        let resume = m.new_inst(Inst::new(Type::Void, InstKind::Resume(pad), SPAN));
        assert!(m.inst(resume).may_throw(&m, false));
    }

    #[test]
    fn fence_reads_and_writes_and_is_atomic() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let f = m.new_inst(Inst::fence(
            AtomicOrdering::SeqCst,
            SyncScope::System,
            SPAN,
        ));
        assert!(m.inst(f).may_read_from_memory(&m));
        assert!(m.inst(f).may_write_to_memory(&m));
        assert!(m.inst(f).is_atomic());
        // Fences order other accesses but perform none themselves.
        assert!(!m.inst(f).has_atomic_load());
        assert!(!m.inst(f).has_atomic_store());
    }

    #[test]
    fn effect_summaries_detect_interference() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let p = m.new_inst(Inst::alloca(Type::Int32, 4, SPAN));
        let v = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));

        let load = m.new_inst(Inst::load(Type::Int32, p, 4, SPAN));
        let store = m.new_inst(Inst::store(p, v, 4, SPAN));
        let konst = m.new_inst(Inst::const_int(Type::Int32, 2, SPAN));

        let mut fx_load = FastEffects::new();
        let mut fx_store = FastEffects::new();
        let mut fx_const = FastEffects::new();
        m.inst(load).get_effects(&m, &mut fx_load);
        m.inst(store).get_effects(&m, &mut fx_store);
        m.inst(konst).get_effects(&m, &mut fx_const);

        assert!(fx_load.interferes_with(&fx_store));
        assert!(fx_store.interferes_with(&fx_store));
        assert!(!fx_load.interferes_with(&fx_load));
        assert!(fx_const.is_empty());
        assert!(!fx_const.interferes_with(&fx_store));
    }
}

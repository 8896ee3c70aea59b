use crate::{
    dbg::DbgMarker,
    flags::InstFlags,
    meta::{MetadataKind, MetadataValue},
    BlockRef, FuncRef, InstRef, Type,
};

use sable_interner::Symbol;
use sable_sourcemap::SourceSpan;

use smallvec::SmallVec;

use std::{collections::HashMap, fmt};

// ---------------------------------------------------------------------------
// Operator kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinaryOp {
    /// Wrap flags (nuw/nsw) are meaningful for these.
    #[inline]
    pub fn is_overflowing(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Shl
        )
    }

    /// The exact flag is meaningful for these.
    #[inline]
    pub fn is_possibly_exact(self) -> bool {
        matches!(
            self,
            BinaryOp::UDiv | BinaryOp::SDiv | BinaryOp::LShr | BinaryOp::AShr
        )
    }

    #[inline]
    pub fn is_float(self) -> bool {
        matches!(
            self,
            BinaryOp::FAdd | BinaryOp::FSub | BinaryOp::FMul | BinaryOp::FDiv | BinaryOp::FRem
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
    PtrToInt,
    IntToPtr,
    Bitcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IcmpPred {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FcmpPred {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RmwOp {
    Xchg,
    Add,
    Sub,
    And,
    Or,
    Xor,
    Max,
    Min,
    UMax,
    UMin,
}

// ---------------------------------------------------------------------------
// Memory model
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicOrdering {
    #[default]
    NotAtomic,
    Unordered,
    Monotonic,
    Acquire,
    Release,
    AcqRel,
    SeqCst,
}

impl AtomicOrdering {
    #[inline]
    pub fn is_atomic(self) -> bool {
        !matches!(self, AtomicOrdering::NotAtomic)
    }

    /// Not-atomic or unordered: no ordering constraint beyond atomicity of
    /// the access itself.
    #[inline]
    pub fn is_unordered(self) -> bool {
        matches!(self, AtomicOrdering::NotAtomic | AtomicOrdering::Unordered)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncScope {
    #[default]
    System,
    SingleThread,
}

// ---------------------------------------------------------------------------
// Calls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    C,
    Fast,
    Cold,
}

impl Default for CallConv {
    fn default() -> Self {
        CallConv::C
    }
}

/// A call target: a function in the module or a computed pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callee {
    Direct(FuncRef),
    Indirect(InstRef),
}

/// One operand-bundle schema entry: tag plus operand arity. Bundle operand
/// values are owned by the operand subsystem; equivalence only compares the
/// schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Bundle {
    pub tag: Symbol,
    pub arity: u32,
}

bitflags::bitflags! {
    /// Per-parameter / return-value attributes at a call site.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamAttrs: u8 {
        const NOUNDEF = 1 << 0;
        const NONNULL = 1 << 1;
        const DEREFERENCEABLE = 1 << 2;
        const ALIGN = 1 << 3;
        const NOALIAS = 1 << 4;
    }
}

impl ParamAttrs {
    /// Attributes whose violation is immediate undefined behavior rather
    /// than a poison value.
    pub const UB_IMPLYING: ParamAttrs = ParamAttrs::NOUNDEF
        .union(ParamAttrs::DEREFERENCEABLE)
        .union(ParamAttrs::NOALIAS);
}

/// The attribute list carried by a call-like instruction.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct CallAttrs {
    pub fn_attrs: crate::FnAttrs,
    pub ret: ParamAttrs,
    pub params: Vec<ParamAttrs>,
}

/// Intrinsics the library recognizes by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// `memcpy(dst, src, len, volatile)`
    MemCpy,
    /// `memmove(dst, src, len, volatile)`
    MemMove,
    /// `memset(dst, val, len, volatile)`
    MemSet,
    LifetimeStart,
    LifetimeEnd,
}

impl Intrinsic {
    /// Intrinsics that encode volatility as a trailing constant argument.
    #[inline]
    pub fn has_volatile_arg(self) -> bool {
        matches!(
            self,
            Intrinsic::MemCpy | Intrinsic::MemMove | Intrinsic::MemSet
        )
    }
}

// ---------------------------------------------------------------------------
// Exception handling
// ---------------------------------------------------------------------------

/// A landing-pad clause. `Catch(None)` is the catch-all null clause; an
/// empty filter also catches everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Clause {
    Catch(Option<Symbol>),
    Filter(Vec<Symbol>),
}

impl Clause {
    /// True if this clause unconditionally stops an unwind.
    #[inline]
    pub fn catches_all(&self) -> bool {
        match self {
            Clause::Catch(typeinfo) => typeinfo.is_none(),
            Clause::Filter(tys) => tys.is_empty(),
        }
    }
}

// ---------------------------------------------------------------------------
// InstKind
// ---------------------------------------------------------------------------

/// The closed opcode set. Each variant carries its operand refs and its
/// opcode-specific non-operand state; the packed flag word lives on the
/// [`Inst`] itself.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub enum InstKind {
    /// Pseudo-op: occupies a slot, computes nothing. Skipped by the
    /// next/prev-real-instruction walks.
    #[default]
    Nop,
    Const(i64),
    Alloca {
        allocated: Type,
        align: u32,
    },
    Load {
        ptr: InstRef,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Store {
        ptr: InstRef,
        val: InstRef,
        align: u32,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Fence {
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    AtomicRmw {
        op: RmwOp,
        ptr: InstRef,
        val: InstRef,
        volatile: bool,
        ordering: AtomicOrdering,
        scope: SyncScope,
    },
    Cmpxchg {
        ptr: InstRef,
        expected: InstRef,
        replacement: InstRef,
        volatile: bool,
        weak: bool,
        success: AtomicOrdering,
        failure: AtomicOrdering,
        scope: SyncScope,
    },
    Gep {
        /// The element type the indices step through.
        elem: Type,
        base: InstRef,
        indices: SmallVec<[InstRef; 4]>,
    },
    /// Floating-point negation.
    Fneg(InstRef),
    Binary {
        op: BinaryOp,
        lhs: InstRef,
        rhs: InstRef,
    },
    Cast {
        op: CastOp,
        val: InstRef,
    },
    Icmp {
        pred: IcmpPred,
        lhs: InstRef,
        rhs: InstRef,
    },
    Fcmp {
        pred: FcmpPred,
        lhs: InstRef,
        rhs: InstRef,
    },
    Phi {
        /// Incoming (value, predecessor) pairs, in predecessor order.
        incoming: Vec<(InstRef, BlockRef)>,
    },
    Select {
        cond: InstRef,
        if_true: InstRef,
        if_false: InstRef,
    },
    ExtractValue {
        agg: InstRef,
        indices: SmallVec<[u32; 2]>,
    },
    InsertValue {
        agg: InstRef,
        elem: InstRef,
        indices: SmallVec<[u32; 2]>,
    },
    Shuffle {
        lhs: InstRef,
        rhs: InstRef,
        mask: Vec<i32>,
    },
    VaArg {
        list: InstRef,
    },
    Freeze(InstRef),
    Call {
        callee: Callee,
        args: SmallVec<[InstRef; 4]>,
        tail: bool,
        conv: CallConv,
        attrs: CallAttrs,
        bundles: Vec<Bundle>,
    },
    LandingPad {
        clauses: Vec<Clause>,
        cleanup: bool,
    },
    CleanupPad {
        parent: Option<InstRef>,
        args: SmallVec<[InstRef; 2]>,
    },
    CatchPad {
        parent: InstRef,
        args: SmallVec<[InstRef; 2]>,
    },

    // Terminators.
    Ret(Option<InstRef>),
    Br(BlockRef),
    CondBr {
        cond: InstRef,
        if_true: BlockRef,
        if_false: BlockRef,
    },
    Switch {
        cond: InstRef,
        default: BlockRef,
        cases: Vec<(i64, BlockRef)>,
    },
    Invoke {
        callee: Callee,
        args: SmallVec<[InstRef; 4]>,
        conv: CallConv,
        attrs: CallAttrs,
        bundles: Vec<Bundle>,
        normal: BlockRef,
        unwind: BlockRef,
    },
    CallBr {
        callee: Callee,
        args: SmallVec<[InstRef; 4]>,
        conv: CallConv,
        attrs: CallAttrs,
        bundles: Vec<Bundle>,
        fallthrough: BlockRef,
        indirect: Vec<BlockRef>,
    },
    Resume(InstRef),
    CleanupRet {
        pad: InstRef,
        /// `None` unwinds to the caller.
        unwind: Option<BlockRef>,
    },
    CatchRet {
        pad: InstRef,
        dest: BlockRef,
    },
    CatchSwitch {
        parent: Option<InstRef>,
        handlers: Vec<BlockRef>,
        /// `None` unwinds to the caller.
        unwind: Option<BlockRef>,
    },
    Unreachable,
}

impl InstKind {
    #[inline]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Ret(_)
                | InstKind::Br(_)
                | InstKind::CondBr { .. }
                | InstKind::Switch { .. }
                | InstKind::Invoke { .. }
                | InstKind::CallBr { .. }
                | InstKind::Resume(_)
                | InstKind::CleanupRet { .. }
                | InstKind::CatchRet { .. }
                | InstKind::CatchSwitch { .. }
                | InstKind::Unreachable
        )
    }

    /// Exception-pad entry instructions. Catch-switch is both an EH pad and
    /// a terminator.
    #[inline]
    pub fn is_eh_pad(&self) -> bool {
        matches!(
            self,
            InstKind::LandingPad { .. }
                | InstKind::CleanupPad { .. }
                | InstKind::CatchPad { .. }
                | InstKind::CatchSwitch { .. }
        )
    }

    #[inline]
    pub fn is_call_like(&self) -> bool {
        matches!(
            self,
            InstKind::Call { .. } | InstKind::Invoke { .. } | InstKind::CallBr { .. }
        )
    }

    /// Wrap flags (nuw/nsw) may be set on this opcode.
    #[inline]
    pub fn is_overflowing_binary_op(&self) -> bool {
        matches!(self, InstKind::Binary { op, .. } if op.is_overflowing())
    }

    /// The exact flag may be set on this opcode.
    #[inline]
    pub fn is_possibly_exact_op(&self) -> bool {
        matches!(self, InstKind::Binary { op, .. } if op.is_possibly_exact())
    }

    /// The non-negative flag may be set on this opcode (zero-extension).
    #[inline]
    pub fn is_possibly_non_neg(&self) -> bool {
        matches!(
            self,
            InstKind::Cast {
                op: CastOp::ZExt,
                ..
            }
        )
    }

    /// Same opcode, in the dispatch sense: the variant plus its sub-operator
    /// where one variant covers a family.
    pub fn same_opcode(&self, other: &InstKind) -> bool {
        match (self, other) {
            (InstKind::Binary { op: a, .. }, InstKind::Binary { op: b, .. }) => a == b,
            (InstKind::Cast { op: a, .. }, InstKind::Cast { op: b, .. }) => a == b,
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }

    pub fn opcode_name(&self) -> &'static str {
        match self {
            InstKind::Nop => "nop",
            InstKind::Const(_) => "const",
            InstKind::Alloca { .. } => "alloca",
            InstKind::Load { .. } => "load",
            InstKind::Store { .. } => "store",
            InstKind::Fence { .. } => "fence",
            InstKind::AtomicRmw { .. } => "atomicrmw",
            InstKind::Cmpxchg { .. } => "cmpxchg",
            InstKind::Gep { .. } => "getelementptr",
            InstKind::Fneg(_) => "fneg",
            InstKind::Binary { op, .. } => match op {
                BinaryOp::Add => "add",
                BinaryOp::Sub => "sub",
                BinaryOp::Mul => "mul",
                BinaryOp::UDiv => "udiv",
                BinaryOp::SDiv => "sdiv",
                BinaryOp::URem => "urem",
                BinaryOp::SRem => "srem",
                BinaryOp::And => "and",
                BinaryOp::Or => "or",
                BinaryOp::Xor => "xor",
                BinaryOp::Shl => "shl",
                BinaryOp::LShr => "lshr",
                BinaryOp::AShr => "ashr",
                BinaryOp::FAdd => "fadd",
                BinaryOp::FSub => "fsub",
                BinaryOp::FMul => "fmul",
                BinaryOp::FDiv => "fdiv",
                BinaryOp::FRem => "frem",
            },
            InstKind::Cast { op, .. } => match op {
                CastOp::Trunc => "trunc",
                CastOp::ZExt => "zext",
                CastOp::SExt => "sext",
                CastOp::FpTrunc => "fptrunc",
                CastOp::FpExt => "fpext",
                CastOp::FpToUi => "fptoui",
                CastOp::FpToSi => "fptosi",
                CastOp::UiToFp => "uitofp",
                CastOp::SiToFp => "sitofp",
                CastOp::PtrToInt => "ptrtoint",
                CastOp::IntToPtr => "inttoptr",
                CastOp::Bitcast => "bitcast",
            },
            InstKind::Icmp { .. } => "icmp",
            InstKind::Fcmp { .. } => "fcmp",
            InstKind::Phi { .. } => "phi",
            InstKind::Select { .. } => "select",
            InstKind::ExtractValue { .. } => "extractvalue",
            InstKind::InsertValue { .. } => "insertvalue",
            InstKind::Shuffle { .. } => "shufflevector",
            InstKind::VaArg { .. } => "va_arg",
            InstKind::Freeze(_) => "freeze",
            InstKind::Call { .. } => "call",
            InstKind::LandingPad { .. } => "landingpad",
            InstKind::CleanupPad { .. } => "cleanuppad",
            InstKind::CatchPad { .. } => "catchpad",
            InstKind::Ret(_) => "ret",
            InstKind::Br(_) | InstKind::CondBr { .. } => "br",
            InstKind::Switch { .. } => "switch",
            InstKind::Invoke { .. } => "invoke",
            InstKind::CallBr { .. } => "callbr",
            InstKind::Resume(_) => "resume",
            InstKind::CleanupRet { .. } => "cleanupret",
            InstKind::CatchRet { .. } => "catchret",
            InstKind::CatchSwitch { .. } => "catchswitch",
            InstKind::Unreachable => "unreachable",
        }
    }
}

// ---------------------------------------------------------------------------
// Inst
// ---------------------------------------------------------------------------

/// An instruction node.
///
/// Created detached; belongs to at most one block at a time; destroyed only
/// while detached. The membership engine in [`crate::edit`] is the only
/// code that changes `block`, `order`, or the marker.
#[derive(Debug, Default, Clone)]
pub struct Inst {
    pub ty: Type,
    pub kind: InstKind,
    pub span: SourceSpan,
    /// Back-reference to the owning block; `None` while detached.
    pub(crate) block: Option<BlockRef>,
    /// Position token. Meaningful only while the owning block's order-valid
    /// bit is set.
    pub(crate) order: u32,
    pub(crate) flags: InstFlags,
    pub(crate) dbg: Option<DbgMarker>,
    pub(crate) metadata: Vec<(MetadataKind, MetadataValue)>,
}

impl Inst {
    #[inline]
    pub fn new(ty: Type, kind: InstKind, span: SourceSpan) -> Self {
        Self {
            ty,
            kind,
            span,
            ..Default::default()
        }
    }

    /// The owning block, or `None` while detached.
    #[inline]
    pub fn parent(&self) -> Option<BlockRef> {
        self.block
    }

    #[inline]
    pub fn flags(&self) -> InstFlags {
        self.flags
    }

    /// The debug marker, present only while attached to a block using the
    /// out-of-band debug representation.
    #[inline]
    pub fn dbg_marker(&self) -> Option<&DbgMarker> {
        self.dbg.as_ref()
    }

    #[inline]
    pub fn has_dbg_values(&self) -> bool {
        self.dbg.as_ref().is_some_and(|m| !m.is_empty())
    }

    // -----------------------------------------------------------------------
    // Factory methods
    // -----------------------------------------------------------------------

    #[inline]
    pub fn nop(span: SourceSpan) -> Self {
        Self::new(Type::Void, InstKind::Nop, span)
    }

    #[inline]
    pub fn const_int(ty: Type, value: i64, span: SourceSpan) -> Self {
        Self::new(ty, InstKind::Const(value), span)
    }

    #[inline]
    pub fn alloca(allocated: Type, align: u32, span: SourceSpan) -> Self {
        Self::new(Type::Ptr, InstKind::Alloca { allocated, align }, span)
    }

    /// A plain (non-atomic, non-volatile) load.
    #[inline]
    pub fn load(ty: Type, ptr: InstRef, align: u32, span: SourceSpan) -> Self {
        Self::new(
            ty,
            InstKind::Load {
                ptr,
                align,
                volatile: false,
                ordering: AtomicOrdering::NotAtomic,
                scope: SyncScope::System,
            },
            span,
        )
    }

    /// A plain (non-atomic, non-volatile) store.
    #[inline]
    pub fn store(ptr: InstRef, val: InstRef, align: u32, span: SourceSpan) -> Self {
        Self::new(
            Type::Void,
            InstKind::Store {
                ptr,
                val,
                align,
                volatile: false,
                ordering: AtomicOrdering::NotAtomic,
                scope: SyncScope::System,
            },
            span,
        )
    }

    #[inline]
    pub fn fence(ordering: AtomicOrdering, scope: SyncScope, span: SourceSpan) -> Self {
        Self::new(Type::Void, InstKind::Fence { ordering, scope }, span)
    }

    #[inline]
    pub fn binary(ty: Type, op: BinaryOp, lhs: InstRef, rhs: InstRef, span: SourceSpan) -> Self {
        Self::new(ty, InstKind::Binary { op, lhs, rhs }, span)
    }

    #[inline]
    pub fn cast(to: Type, op: CastOp, val: InstRef, span: SourceSpan) -> Self {
        Self::new(to, InstKind::Cast { op, val }, span)
    }

    #[inline]
    pub fn icmp(pred: IcmpPred, lhs: InstRef, rhs: InstRef, span: SourceSpan) -> Self {
        Self::new(Type::Int1, InstKind::Icmp { pred, lhs, rhs }, span)
    }

    #[inline]
    pub fn fcmp(pred: FcmpPred, lhs: InstRef, rhs: InstRef, span: SourceSpan) -> Self {
        Self::new(Type::Int1, InstKind::Fcmp { pred, lhs, rhs }, span)
    }

    #[inline]
    pub fn phi(ty: Type, incoming: Vec<(InstRef, BlockRef)>, span: SourceSpan) -> Self {
        Self::new(ty, InstKind::Phi { incoming }, span)
    }

    #[inline]
    pub fn select(
        ty: Type,
        cond: InstRef,
        if_true: InstRef,
        if_false: InstRef,
        span: SourceSpan,
    ) -> Self {
        Self::new(
            ty,
            InstKind::Select {
                cond,
                if_true,
                if_false,
            },
            span,
        )
    }

    #[inline]
    pub fn gep(
        elem: Type,
        base: InstRef,
        indices: impl IntoIterator<Item = InstRef>,
        span: SourceSpan,
    ) -> Self {
        Self::new(
            Type::Ptr,
            InstKind::Gep {
                elem,
                base,
                indices: indices.into_iter().collect(),
            },
            span,
        )
    }

    /// A direct call with default convention and empty attribute list.
    #[inline]
    pub fn call(
        ty: Type,
        callee: FuncRef,
        args: impl IntoIterator<Item = InstRef>,
        span: SourceSpan,
    ) -> Self {
        Self::new(
            ty,
            InstKind::Call {
                callee: Callee::Direct(callee),
                args: args.into_iter().collect(),
                tail: false,
                conv: CallConv::default(),
                attrs: CallAttrs::default(),
                bundles: Vec::new(),
            },
            span,
        )
    }

    #[inline]
    pub fn ret(val: Option<InstRef>, span: SourceSpan) -> Self {
        Self::new(Type::Void, InstKind::Ret(val), span)
    }

    #[inline]
    pub fn br(dest: BlockRef, span: SourceSpan) -> Self {
        Self::new(Type::Void, InstKind::Br(dest), span)
    }

    #[inline]
    pub fn cond_br(cond: InstRef, if_true: BlockRef, if_false: BlockRef, span: SourceSpan) -> Self {
        Self::new(
            Type::Void,
            InstKind::CondBr {
                cond,
                if_true,
                if_false,
            },
            span,
        )
    }

    #[inline]
    pub fn switch(
        cond: InstRef,
        default: BlockRef,
        cases: Vec<(i64, BlockRef)>,
        span: SourceSpan,
    ) -> Self {
        Self::new(
            Type::Void,
            InstKind::Switch {
                cond,
                default,
                cases,
            },
            span,
        )
    }

    #[inline]
    pub fn unreachable(span: SourceSpan) -> Self {
        Self::new(Type::Void, InstKind::Unreachable, span)
    }

    // -----------------------------------------------------------------------
    // Classification
    // -----------------------------------------------------------------------

    #[inline]
    pub fn is_terminator(&self) -> bool {
        self.kind.is_terminator()
    }

    #[inline]
    pub fn is_eh_pad(&self) -> bool {
        self.kind.is_eh_pad()
    }

    #[inline]
    pub fn is_const(&self, val: i64) -> bool {
        matches!(self.kind, InstKind::Const(v) if v == val)
    }

    /// Fast-math flags are meaningful on this node: FP arithmetic, FP
    /// comparison, and FP-typed phi/select/call-like nodes.
    pub fn is_fp_math_op(&self) -> bool {
        match &self.kind {
            InstKind::Fneg(_) | InstKind::Fcmp { .. } => true,
            InstKind::Binary { op, .. } => op.is_float(),
            InstKind::Phi { .. } | InstKind::Select { .. } => self.ty.is_float(),
            k if k.is_call_like() => self.ty.is_float(),
            _ => false,
        }
    }

    /// Associative at the IR level. FP add/mul qualify only when reassociation
    /// is allowed and signed zeros are ignorable.
    pub fn is_associative(&self) -> bool {
        match &self.kind {
            InstKind::Binary { op, .. } => match op {
                BinaryOp::Add | BinaryOp::Mul | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor => {
                    true
                }
                BinaryOp::FAdd | BinaryOp::FMul => self
                    .flags
                    .contains(InstFlags::REASSOC | InstFlags::NSZ),
                _ => false,
            },
            _ => false,
        }
    }

    pub fn is_commutative(&self) -> bool {
        matches!(
            self.kind,
            InstKind::Binary {
                op: BinaryOp::Add
                    | BinaryOp::Mul
                    | BinaryOp::And
                    | BinaryOp::Or
                    | BinaryOp::Xor
                    | BinaryOp::FAdd
                    | BinaryOp::FMul,
                ..
            }
        )
    }

    #[inline]
    pub fn opcode_name(&self) -> &'static str {
        self.kind.opcode_name()
    }

    // -----------------------------------------------------------------------
    // Operands
    // -----------------------------------------------------------------------

    /// Appends every value operand, in operand order.
    pub fn operands(&self, out: &mut Vec<InstRef>) {
        match &self.kind {
            InstKind::Nop
            | InstKind::Const(_)
            | InstKind::Alloca { .. }
            | InstKind::Fence { .. }
            | InstKind::LandingPad { .. }
            | InstKind::Ret(None)
            | InstKind::Br(_)
            | InstKind::Unreachable => {}
            InstKind::Load { ptr, .. } => out.push(*ptr),
            InstKind::Store { ptr, val, .. } => out.extend([*ptr, *val]),
            InstKind::AtomicRmw { ptr, val, .. } => out.extend([*ptr, *val]),
            InstKind::Cmpxchg {
                ptr,
                expected,
                replacement,
                ..
            } => out.extend([*ptr, *expected, *replacement]),
            InstKind::Gep { base, indices, .. } => {
                out.push(*base);
                out.extend(indices.iter().copied());
            }
            InstKind::Fneg(val) | InstKind::Freeze(val) => out.push(*val),
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Icmp { lhs, rhs, .. }
            | InstKind::Fcmp { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            InstKind::Cast { val, .. } => out.push(*val),
            InstKind::Phi { incoming } => out.extend(incoming.iter().map(|(v, _)| *v)),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => out.extend([*cond, *if_true, *if_false]),
            InstKind::ExtractValue { agg, .. } => out.push(*agg),
            InstKind::InsertValue { agg, elem, .. } => out.extend([*agg, *elem]),
            InstKind::Shuffle { lhs, rhs, .. } => out.extend([*lhs, *rhs]),
            InstKind::VaArg { list } => out.push(*list),
            InstKind::Call { callee, args, .. }
            | InstKind::Invoke { callee, args, .. }
            | InstKind::CallBr { callee, args, .. } => {
                if let Callee::Indirect(ptr) = callee {
                    out.push(*ptr);
                }
                out.extend(args.iter().copied());
            }
            InstKind::CleanupPad { parent, args } => {
                out.extend(parent.iter().copied());
                out.extend(args.iter().copied());
            }
            InstKind::CatchPad { parent, args } => {
                out.push(*parent);
                out.extend(args.iter().copied());
            }
            InstKind::Ret(Some(val)) => out.push(*val),
            InstKind::CondBr { cond, .. } | InstKind::Switch { cond, .. } => out.push(*cond),
            InstKind::Resume(val) => out.push(*val),
            InstKind::CleanupRet { pad, .. } | InstKind::CatchRet { pad, .. } => out.push(*pad),
            InstKind::CatchSwitch { parent, .. } => out.extend(parent.iter().copied()),
        }
    }

    pub fn num_operands(&self) -> usize {
        let mut ops = Vec::new();
        self.operands(&mut ops);
        ops.len()
    }

    /// Rewrites every value operand through `map`; refs not present in the
    /// map are left alone.
    pub fn replace_args(&mut self, map: &HashMap<InstRef, InstRef>) {
        let replace = |r: &mut InstRef| {
            if let Some(new_ref) = map.get(r) {
                *r = *new_ref;
            }
        };

        match &mut self.kind {
            InstKind::Nop
            | InstKind::Const(_)
            | InstKind::Alloca { .. }
            | InstKind::Fence { .. }
            | InstKind::LandingPad { .. }
            | InstKind::Ret(None)
            | InstKind::Br(_)
            | InstKind::Unreachable => {}
            InstKind::Load { ptr, .. } => replace(ptr),
            InstKind::Store { ptr, val, .. } | InstKind::AtomicRmw { ptr, val, .. } => {
                replace(ptr);
                replace(val);
            }
            InstKind::Cmpxchg {
                ptr,
                expected,
                replacement,
                ..
            } => {
                replace(ptr);
                replace(expected);
                replace(replacement);
            }
            InstKind::Gep { base, indices, .. } => {
                replace(base);
                indices.iter_mut().for_each(replace);
            }
            InstKind::Fneg(val)
            | InstKind::Freeze(val)
            | InstKind::Cast { val, .. }
            | InstKind::VaArg { list: val }
            | InstKind::Ret(Some(val))
            | InstKind::Resume(val) => replace(val),
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::Icmp { lhs, rhs, .. }
            | InstKind::Fcmp { lhs, rhs, .. }
            | InstKind::Shuffle { lhs, rhs, .. } => {
                replace(lhs);
                replace(rhs);
            }
            InstKind::Phi { incoming } => incoming.iter_mut().for_each(|(v, _)| replace(v)),
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => {
                replace(cond);
                replace(if_true);
                replace(if_false);
            }
            InstKind::ExtractValue { agg, .. } => replace(agg),
            InstKind::InsertValue { agg, elem, .. } => {
                replace(agg);
                replace(elem);
            }
            InstKind::Call { callee, args, .. }
            | InstKind::Invoke { callee, args, .. }
            | InstKind::CallBr { callee, args, .. } => {
                if let Callee::Indirect(ptr) = callee {
                    replace(ptr);
                }
                args.iter_mut().for_each(replace);
            }
            InstKind::CleanupPad { parent, args } => {
                parent.iter_mut().for_each(replace);
                args.iter_mut().for_each(replace);
            }
            InstKind::CatchPad { parent, args } => {
                replace(parent);
                args.iter_mut().for_each(replace);
            }
            InstKind::CondBr { cond, .. } | InstKind::Switch { cond, .. } => replace(cond),
            InstKind::CleanupRet { pad, .. } | InstKind::CatchRet { pad, .. } => replace(pad),
            InstKind::CatchSwitch { parent, .. } => parent.iter_mut().for_each(replace),
        }
    }

    // -----------------------------------------------------------------------
    // Successors
    // -----------------------------------------------------------------------

    /// Number of CFG successors.
    ///
    /// # Panics
    ///
    /// Panics if this is not a terminator.
    pub fn num_successors(&self) -> usize {
        match &self.kind {
            InstKind::Ret(_) | InstKind::Resume(_) | InstKind::Unreachable => 0,
            InstKind::Br(_) | InstKind::CatchRet { .. } => 1,
            InstKind::CondBr { .. } | InstKind::Invoke { .. } => 2,
            InstKind::Switch { cases, .. } => 1 + cases.len(),
            InstKind::CallBr { indirect, .. } => 1 + indirect.len(),
            InstKind::CleanupRet { unwind, .. } => unwind.is_some() as usize,
            InstKind::CatchSwitch {
                handlers, unwind, ..
            } => handlers.len() + unwind.is_some() as usize,
            _ => panic!("successor query on non-terminator '{}'", self.opcode_name()),
        }
    }

    /// The `idx`-th CFG successor.
    ///
    /// # Panics
    ///
    /// Panics if this is not a terminator or `idx` is out of range.
    pub fn successor(&self, idx: usize) -> BlockRef {
        let out_of_range = || panic!("successor index {} out of range", idx);
        match &self.kind {
            InstKind::Br(dest) if idx == 0 => *dest,
            InstKind::CondBr {
                if_true, if_false, ..
            } => match idx {
                0 => *if_true,
                1 => *if_false,
                _ => out_of_range(),
            },
            InstKind::Switch { default, cases, .. } => {
                if idx == 0 {
                    *default
                } else {
                    cases.get(idx - 1).map(|(_, b)| *b).unwrap_or_else(out_of_range)
                }
            }
            InstKind::Invoke { normal, unwind, .. } => match idx {
                0 => *normal,
                1 => *unwind,
                _ => out_of_range(),
            },
            InstKind::CallBr {
                fallthrough,
                indirect,
                ..
            } => {
                if idx == 0 {
                    *fallthrough
                } else {
                    indirect.get(idx - 1).copied().unwrap_or_else(out_of_range)
                }
            }
            InstKind::CleanupRet {
                unwind: Some(dest), ..
            } if idx == 0 => *dest,
            InstKind::CatchRet { dest, .. } if idx == 0 => *dest,
            InstKind::CatchSwitch {
                handlers, unwind, ..
            } => {
                if idx < handlers.len() {
                    handlers[idx]
                } else if idx == handlers.len() {
                    unwind.unwrap_or_else(|| out_of_range())
                } else {
                    out_of_range()
                }
            }
            k if k.is_terminator() => out_of_range(),
            k => panic!("successor query on non-terminator '{}'", k.opcode_name()),
        }
    }

    /// Replaces the `idx`-th CFG successor.
    ///
    /// # Panics
    ///
    /// Panics if this is not a terminator or `idx` is out of range.
    pub fn set_successor(&mut self, idx: usize, block: BlockRef) {
        let name = self.opcode_name();
        let out_of_range = || panic!("successor index {} out of range", idx);
        match &mut self.kind {
            InstKind::Br(dest) if idx == 0 => *dest = block,
            InstKind::CondBr {
                if_true, if_false, ..
            } => match idx {
                0 => *if_true = block,
                1 => *if_false = block,
                _ => out_of_range(),
            },
            InstKind::Switch { default, cases, .. } => {
                if idx == 0 {
                    *default = block;
                } else if let Some((_, b)) = cases.get_mut(idx - 1) {
                    *b = block;
                } else {
                    out_of_range()
                }
            }
            InstKind::Invoke { normal, unwind, .. } => match idx {
                0 => *normal = block,
                1 => *unwind = block,
                _ => out_of_range(),
            },
            InstKind::CallBr {
                fallthrough,
                indirect,
                ..
            } => {
                if idx == 0 {
                    *fallthrough = block;
                } else if let Some(b) = indirect.get_mut(idx - 1) {
                    *b = block;
                } else {
                    out_of_range()
                }
            }
            InstKind::CleanupRet {
                unwind: Some(dest), ..
            } if idx == 0 => *dest = block,
            InstKind::CatchRet { dest, .. } if idx == 0 => *dest = block,
            InstKind::CatchSwitch {
                handlers, unwind, ..
            } => {
                if idx < handlers.len() {
                    handlers[idx] = block;
                } else if idx == handlers.len() && unwind.is_some() {
                    *unwind = Some(block);
                } else {
                    out_of_range()
                }
            }
            k if k.is_terminator() => out_of_range(),
            _ => panic!("successor query on non-terminator '{}'", name),
        }
    }

    /// Rewrites every successor slot equal to `old` to `new`.
    pub fn replace_successor_with(&mut self, old: BlockRef, new: BlockRef) {
        for idx in 0..self.num_successors() {
            if self.successor(idx) == old {
                self.set_successor(idx, new);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

struct CommaSep<'a, T>(&'a [T]);

impl<'a, T: fmt::Display> fmt::Display for CommaSep<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut it = self.0.iter();
        if let Some(first) = it.next() {
            write!(f, "{}", first)?;
            for item in it {
                write!(f, ", {}", item)?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for InstKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstKind::Const(v) => write!(f, "const {}", v),
            InstKind::Alloca { allocated, align } => {
                write!(f, "alloca {}, align {}", allocated, align)
            }
            InstKind::Load { ptr, align, .. } => write!(f, "load {}, align {}", ptr, align),
            InstKind::Store {
                ptr, val, align, ..
            } => write!(f, "store {}, {}, align {}", ptr, val, align),
            InstKind::Gep { base, indices, .. } => {
                write!(f, "getelementptr {}", base)?;
                if !indices.is_empty() {
                    write!(f, ", {}", CommaSep(indices))?;
                }
                Ok(())
            }
            InstKind::Fneg(val) => write!(f, "fneg {}", val),
            InstKind::Binary { lhs, rhs, .. } => {
                write!(f, "{} {}, {}", self.opcode_name(), lhs, rhs)
            }
            InstKind::Cast { val, .. } => write!(f, "{} {}", self.opcode_name(), val),
            InstKind::Icmp { lhs, rhs, .. } | InstKind::Fcmp { lhs, rhs, .. } => {
                write!(f, "{} {}, {}", self.opcode_name(), lhs, rhs)
            }
            InstKind::Phi { incoming } => {
                write!(f, "phi")?;
                for (val, block) in incoming {
                    write!(f, " [{}, {}]", val, block)?;
                }
                Ok(())
            }
            InstKind::Select {
                cond,
                if_true,
                if_false,
            } => write!(f, "select {}, {}, {}", cond, if_true, if_false),
            InstKind::Call { args, .. } => write!(f, "call ({})", CommaSep(args)),
            InstKind::Ret(val) => match val {
                Some(v) => write!(f, "ret {}", v),
                None => write!(f, "ret void"),
            },
            InstKind::Br(dest) => write!(f, "br {}", dest),
            InstKind::CondBr {
                cond,
                if_true,
                if_false,
            } => write!(f, "br {}, {}, {}", cond, if_true, if_false),
            InstKind::Switch {
                cond,
                default,
                cases,
            } => {
                write!(f, "switch {} [ default: {}", cond, default)?;
                for (val, block) in cases {
                    write!(f, ", {}: {}", val, block)?;
                }
                write!(f, " ]")
            }
            InstKind::Invoke { normal, unwind, .. } => {
                write!(f, "invoke to {} unwind {}", normal, unwind)
            }
            other => write!(f, "{}", other.opcode_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;

    fn iref(n: u32) -> InstRef {
        InstRef(NonZeroU32::new(n).unwrap())
    }

    fn bref(n: u32) -> BlockRef {
        BlockRef(NonZeroU32::new(n).unwrap())
    }

    #[test]
    fn terminator_classification() {
        let span = SourceSpan::default();
        assert!(Inst::ret(None, span).is_terminator());
        assert!(Inst::br(bref(1), span).is_terminator());
        assert!(Inst::unreachable(span).is_terminator());
        assert!(!Inst::nop(span).is_terminator());
        assert!(!Inst::load(Type::Int32, iref(1), 4, span).is_terminator());
    }

    #[test]
    fn catch_switch_is_both_pad_and_terminator() {
        let k = InstKind::CatchSwitch {
            parent: None,
            handlers: vec![bref(1), bref(2)],
            unwind: None,
        };
        assert!(k.is_terminator());
        assert!(k.is_eh_pad());
    }

    #[test]
    fn successor_dispatch() {
        let span = SourceSpan::default();
        let mut br = Inst::cond_br(iref(1), bref(2), bref(3), span);
        assert_eq!(br.num_successors(), 2);
        assert_eq!(br.successor(0), bref(2));
        assert_eq!(br.successor(1), bref(3));

        br.set_successor(1, bref(4));
        assert_eq!(br.successor(1), bref(4));

        br.replace_successor_with(bref(2), bref(4));
        assert_eq!(br.successor(0), bref(4));
    }

    #[test]
    fn switch_successors_include_default_and_cases() {
        let span = SourceSpan::default();
        let sw = Inst::switch(iref(1), bref(9), vec![(0, bref(2)), (1, bref(3))], span);
        assert_eq!(sw.num_successors(), 3);
        assert_eq!(sw.successor(0), bref(9));
        assert_eq!(sw.successor(2), bref(3));
    }

    #[test]
    fn cleanup_ret_unwind_to_caller_has_no_successors() {
        let k = InstKind::CleanupRet {
            pad: iref(1),
            unwind: None,
        };
        let inst = Inst::new(Type::Void, k, SourceSpan::default());
        assert_eq!(inst.num_successors(), 0);
    }

    #[test]
    #[should_panic(expected = "non-terminator")]
    fn successor_query_on_non_terminator_panics() {
        Inst::nop(SourceSpan::default()).num_successors();
    }

    #[test]
    fn operand_collection() {
        let span = SourceSpan::default();
        let mut ops = Vec::new();

        Inst::store(iref(1), iref(2), 4, span).operands(&mut ops);
        assert_eq!(ops, [iref(1), iref(2)]);

        ops.clear();
        let phi = Inst::phi(
            Type::Int32,
            vec![(iref(3), bref(1)), (iref(4), bref(2))],
            span,
        );
        phi.operands(&mut ops);
        assert_eq!(ops, [iref(3), iref(4)]);
        assert_eq!(phi.num_operands(), 2);
    }

    #[test]
    fn replace_args_rewrites_operands() {
        let span = SourceSpan::default();
        let mut inst = Inst::binary(Type::Int32, BinaryOp::Add, iref(1), iref(2), span);

        let map = HashMap::from([(iref(1), iref(5))]);
        inst.replace_args(&map);

        let mut ops = Vec::new();
        inst.operands(&mut ops);
        assert_eq!(ops, [iref(5), iref(2)]);
    }

    #[test]
    fn same_opcode_distinguishes_sub_operators() {
        let span = SourceSpan::default();
        let add = Inst::binary(Type::Int32, BinaryOp::Add, iref(1), iref(2), span);
        let add2 = Inst::binary(Type::Int32, BinaryOp::Add, iref(3), iref(4), span);
        let sub = Inst::binary(Type::Int32, BinaryOp::Sub, iref(1), iref(2), span);

        assert!(add.kind.same_opcode(&add2.kind));
        assert!(!add.kind.same_opcode(&sub.kind));
        assert!(!add.kind.same_opcode(&InstKind::Nop));
    }

    #[test]
    fn fp_math_classification() {
        let span = SourceSpan::default();
        assert!(Inst::binary(Type::Float, BinaryOp::FAdd, iref(1), iref(2), span).is_fp_math_op());
        assert!(Inst::select(Type::Double, iref(1), iref(2), iref(3), span).is_fp_math_op());
        assert!(!Inst::binary(Type::Int32, BinaryOp::Add, iref(1), iref(2), span).is_fp_math_op());
        assert!(!Inst::select(Type::Int32, iref(1), iref(2), iref(3), span).is_fp_math_op());
    }
}

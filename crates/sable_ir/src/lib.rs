//! An arena-based compiler IR centered on the instruction node.
//!
//! A [`Module`] owns three arenas — instructions, blocks, functions — keyed
//! by `NonZeroU32` refs. A block owns the ordered sequence of its member
//! instructions; an instruction holds a back-reference to the block it
//! currently belongs to (`None` while detached). All structural edits go
//! through the membership engine in [`edit`], which keeps three things in
//! lockstep: the sequence itself, the block's lazy instruction numbering,
//! and the debug-annotation markers that ride along with instructions.

pub mod builder;
pub mod dbg;
pub mod edit;
pub mod effects;
pub mod equiv;
pub mod flags;
pub mod insertion;
pub mod inst;
pub mod meta;
pub mod verify;

pub use sable_interner as interner;
pub use sable_sourcemap as sourcemap;

pub use dbg::{DbgMarker, DbgOperand, DbgValue};
pub use edit::InsertPt;
pub use effects::{AbstractHeap, BaseHeaps, EffectSet, FastEffects, MemoryEffects};
pub use equiv::EquivFlags;
pub use flags::InstFlags;
pub use inst::{
    AtomicOrdering, BinaryOp, Bundle, CallAttrs, CallConv, Callee, CastOp, Clause, FcmpPred,
    IcmpPred, Inst, InstKind, Intrinsic, ParamAttrs, RmwOp, SyncScope,
};
pub use meta::{MetadataKind, MetadataValue};

use interner::{Interner, Symbol};
use sourcemap::SourceSpan;

use std::{fmt, num::NonZeroU32};

// ---------------------------------------------------------------------------
// Type
// ---------------------------------------------------------------------------

/// The result type of an instruction.
///
/// This is deliberately not a full type system: nodes carry the type they
/// produce, and the handful of shapes below is what the flag, equivalence,
/// and effect machinery needs to reason about.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    #[default]
    Void,
    Int1,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Ptr,
    Vector {
        lanes: u32,
        elem: ScalarType,
    },
}

/// The element type of a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int1,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    Ptr,
}

impl ScalarType {
    #[inline]
    pub fn ty(self) -> Type {
        match self {
            ScalarType::Int1 => Type::Int1,
            ScalarType::Int8 => Type::Int8,
            ScalarType::Int16 => Type::Int16,
            ScalarType::Int32 => Type::Int32,
            ScalarType::Int64 => Type::Int64,
            ScalarType::Float => Type::Float,
            ScalarType::Double => Type::Double,
            ScalarType::Ptr => Type::Ptr,
        }
    }
}

impl Type {
    #[inline]
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// The scalar element type: vectors yield their element, everything
    /// else yields itself.
    #[inline]
    pub fn scalar_ty(&self) -> Type {
        match self {
            Type::Vector { elem, .. } => elem.ty(),
            other => *other,
        }
    }

    /// True for floating-point types and vectors of them.
    #[inline]
    pub fn is_float(&self) -> bool {
        matches!(self.scalar_ty(), Type::Float | Type::Double)
    }

    pub fn size(&self) -> u32 {
        match self {
            Type::Void => 0,
            Type::Int1 | Type::Int8 => 1,
            Type::Int16 => 2,
            Type::Int32 | Type::Float => 4,
            Type::Int64 | Type::Double | Type::Ptr => 8,
            Type::Vector { lanes, elem } => lanes * elem.ty().size(),
        }
    }
}

// ---------------------------------------------------------------------------
// Refs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstRef(pub(crate) NonZeroU32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef(pub(crate) NonZeroU32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncRef(pub(crate) NonZeroU32);

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// A basic block: the ordered container an instruction belongs to.
///
/// The block owns the sequence (`insts`), the order-valid bit backing the
/// lazy numbering in [`edit`], and the trailing debug marker holding
/// annotations positioned past the last instruction.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: Symbol,
    pub span: SourceSpan,
    pub insts: Vec<InstRef>,
    /// Set while every member's `order` token is consistent with sequence
    /// position. Cleared by any structural edit.
    pub(crate) order_valid: bool,
    /// Whether this block carries debug annotations out-of-band in markers
    /// rather than as interleaved pseudo-instructions.
    pub new_dbg_format: bool,
    pub(crate) trailing_dbg: Option<DbgMarker>,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            name: Symbol::default(),
            span: SourceSpan::default(),
            insts: Vec::new(),
            order_valid: false,
            new_dbg_format: true,
            trailing_dbg: None,
        }
    }
}

impl Block {
    #[inline]
    pub fn is_order_valid(&self) -> bool {
        self.order_valid
    }

    /// Annotations logically positioned after the last instruction, if any.
    #[inline]
    pub fn trailing_dbg(&self) -> Option<&DbgMarker> {
        self.trailing_dbg.as_ref()
    }
}

// ---------------------------------------------------------------------------
// Func
// ---------------------------------------------------------------------------

/// Function-level facts the effect classifier consumes for call sites.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FnAttrs {
    /// The function is guaranteed not to unwind.
    pub nothrow: bool,
    /// The function is guaranteed to return (no infinite loops, no exits).
    pub will_return: bool,
    pub memory: MemoryEffects,
}

#[derive(Debug, Default, Clone)]
pub struct Func {
    pub name: Symbol,
    pub span: SourceSpan,
    pub blocks: Vec<BlockRef>,
    pub attrs: FnAttrs,
    /// Set when this function is a recognized intrinsic.
    pub intrinsic: Option<Intrinsic>,
}

impl Func {
    /// A declaration has no body.
    #[inline]
    pub fn is_decl(&self) -> bool {
        self.blocks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Module
// ---------------------------------------------------------------------------

/// The arena owner: all instructions, blocks, and functions live here.
///
/// Slot 0 of each arena is a reserved default entry so refs can be
/// `NonZeroU32`. Deletion pushes the ref onto a free list; slots are not
/// currently reused.
pub struct Module<'a> {
    pub interner: &'a mut Interner,
    pub(crate) heaps: BaseHeaps,
    pub(crate) insts: Vec<Inst>,
    pub(crate) insts_free: Vec<InstRef>,
    blocks: Vec<Block>,
    blocks_free: Vec<BlockRef>,
    funcs: Vec<Func>,
    funcs_free: Vec<FuncRef>,
}

impl<'a> Module<'a> {
    pub fn new(interner: &'a mut Interner) -> Self {
        Self {
            interner,
            heaps: BaseHeaps::default(),
            insts: vec![Inst::default()],
            insts_free: Vec::new(),
            blocks: vec![Block::default()],
            blocks_free: Vec::new(),
            funcs: vec![Func::default()],
            funcs_free: Vec::new(),
        }
    }

    /// The module's base abstract heaps, used by effect classification.
    #[inline]
    pub fn heaps(&self) -> &BaseHeaps {
        &self.heaps
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    #[inline]
    pub fn inst(&self, inst: InstRef) -> &Inst {
        &self.insts[inst.0.get() as usize]
    }

    #[inline]
    pub fn block(&self, block: BlockRef) -> &Block {
        &self.blocks[block.0.get() as usize]
    }

    #[inline]
    pub fn func(&self, func: FuncRef) -> &Func {
        &self.funcs[func.0.get() as usize]
    }

    #[inline]
    pub fn inst_mut(&mut self, inst: InstRef) -> &mut Inst {
        &mut self.insts[inst.0.get() as usize]
    }

    #[inline]
    pub fn block_mut(&mut self, block: BlockRef) -> &mut Block {
        &mut self.blocks[block.0.get() as usize]
    }

    #[inline]
    pub fn func_mut(&mut self, func: FuncRef) -> &mut Func {
        &mut self.funcs[func.0.get() as usize]
    }

    // -----------------------------------------------------------------------
    // Creation
    // -----------------------------------------------------------------------

    /// Allocates a detached instruction.
    pub fn new_inst(&mut self, inst: Inst) -> InstRef {
        debug_assert!(inst.block.is_none(), "new instructions start detached");
        let r = InstRef(NonZeroU32::new(self.insts.len() as u32).unwrap());
        self.insts.push(inst);
        r
    }

    pub fn new_block(&mut self, block: Block) -> BlockRef {
        let r = BlockRef(NonZeroU32::new(self.blocks.len() as u32).unwrap());
        self.blocks.push(block);
        r
    }

    pub fn new_func(&mut self, func: Func) -> FuncRef {
        let r = FuncRef(NonZeroU32::new(self.funcs.len() as u32).unwrap());
        self.funcs.push(func);
        r
    }

    // -----------------------------------------------------------------------
    // Iterators
    // -----------------------------------------------------------------------

    pub fn iter_insts(&self) -> impl Iterator<Item = InstRef> + '_ {
        // Slot 0 is the reserved default entry.
        (1..self.insts.len())
            .map(|i| InstRef(NonZeroU32::new(i as u32).unwrap()))
            .filter(move |r| !self.insts_free.contains(r))
    }

    pub fn iter_blocks(&self) -> impl Iterator<Item = BlockRef> + '_ {
        (1..self.blocks.len())
            .map(|i| BlockRef(NonZeroU32::new(i as u32).unwrap()))
            .filter(move |r| !self.blocks_free.contains(r))
    }

    pub fn iter_funcs(&self) -> impl Iterator<Item = FuncRef> + '_ {
        (1..self.funcs.len())
            .map(|i| FuncRef(NonZeroU32::new(i as u32).unwrap()))
            .filter(move |r| !self.funcs_free.contains(r))
    }

    pub fn iter_funcs_with_refs(&self) -> impl Iterator<Item = (FuncRef, &Func)> {
        self.iter_funcs().map(move |r| (r, self.func(r)))
    }

    pub fn iter_blocks_with_refs(&self) -> impl Iterator<Item = (BlockRef, &Block)> {
        self.iter_blocks().map(move |r| (r, self.block(r)))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The first instruction of `block` that is not a phi node.
    pub fn first_non_phi(&self, block: BlockRef) -> Option<InstRef> {
        self.block(block)
            .insts
            .iter()
            .copied()
            .find(|&r| !matches!(self.inst(r).kind, InstKind::Phi { .. }))
    }

    /// Predecessor map over every block in the module.
    pub fn predecessors(&self) -> std::collections::HashMap<BlockRef, Vec<BlockRef>> {
        let mut preds: std::collections::HashMap<BlockRef, Vec<BlockRef>> =
            std::collections::HashMap::new();
        for (block_ref, block) in self.iter_blocks_with_refs() {
            if let Some(&term) = block.insts.last() {
                let term = self.inst(term);
                if term.is_terminator() {
                    for idx in 0..term.num_successors() {
                        preds.entry(term.successor(idx)).or_default().push(block_ref);
                    }
                }
            }
        }
        preds
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for InstRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0.get())
    }
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0.get())
    }
}

impl fmt::Display for FuncRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0.get())
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int1 => write!(f, "i1"),
            Type::Int8 => write!(f, "i8"),
            Type::Int16 => write!(f, "i16"),
            Type::Int32 => write!(f, "i32"),
            Type::Int64 => write!(f, "i64"),
            Type::Float => write!(f, "float"),
            Type::Double => write!(f, "double"),
            Type::Ptr => write!(f, "ptr"),
            Type::Vector { lanes, elem } => write!(f, "<{} x {}>", lanes, elem.ty()),
        }
    }
}

impl<'a> fmt::Display for Module<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (func_ref, func) in self.iter_funcs_with_refs() {
            let name = self.interner.get(func.name).unwrap_or("?");
            if func.is_decl() {
                writeln!(f, "declare @{}({})", name, func_ref)?;
                continue;
            }
            writeln!(f, "define @{}({}) {{", name, func_ref)?;
            for block_ref in &func.blocks {
                let block = self.block(*block_ref);
                let block_name = self.interner.get(block.name).unwrap_or("?");
                writeln!(f, "{}({}):", block_name, block_ref)?;
                for inst_ref in &block.insts {
                    let inst = self.inst(*inst_ref);
                    if inst.ty.is_void() {
                        writeln!(f, "  {}", inst.kind)?;
                    } else {
                        writeln!(f, "  {} = {} {}", inst_ref, inst.ty, inst.kind)?;
                    }
                }
            }
            writeln!(f, "}}")?;
        }
        Ok(())
    }
}

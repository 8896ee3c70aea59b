//! Convenience builder for constructing functions block by block.

use crate::{Block, BlockRef, Func, FuncRef, Inst, InstRef, Module};

use sable_interner::{Interner, Symbol};
use sable_sourcemap::SourceSpan;

/// Owns a [`Module`] and a current (function, block) position; inserted
/// instructions are appended to the current block through the membership
/// engine.
pub struct IrBuilder<'a> {
    func: Option<FuncRef>,
    block: Option<BlockRef>,
    pub module: Module<'a>,
}

impl<'a> IrBuilder<'a> {
    pub fn new(interner: &'a mut Interner) -> Self {
        Self {
            module: Module::new(interner),
            func: None,
            block: None,
        }
    }

    pub fn build(self) -> Module<'a> {
        self.module
    }

    #[inline]
    pub fn func(&self) -> Option<FuncRef> {
        self.func
    }

    #[inline]
    pub fn block(&self) -> Option<BlockRef> {
        self.block
    }

    pub fn new_func(&mut self, name: &str, span: SourceSpan) -> FuncRef {
        let name = self.module.interner.intern(name);
        let func = self.module.new_func(Func {
            name,
            span,
            ..Default::default()
        });
        self.func = Some(func);
        func
    }

    #[inline]
    pub fn switch_to_func(&mut self, func: FuncRef) {
        self.func = Some(func);
        self.block = None;
    }

    #[inline]
    pub fn switch_to_block(&mut self, block: BlockRef) {
        self.block = Some(block);
    }

    /// Creates a block in the current function and makes it current.
    pub fn new_block(&mut self, name: &str, span: SourceSpan) -> BlockRef {
        let name = self.module.interner.intern(name);
        self.new_block_interned(name, span)
    }

    pub fn new_block_interned(&mut self, name: Symbol, span: SourceSpan) -> BlockRef {
        let block = self.module.new_block(Block {
            name,
            span,
            ..Default::default()
        });
        let func = self.func.expect("no current function");
        self.module.func_mut(func).blocks.push(block);
        self.block = Some(block);
        block
    }

    /// Appends `inst` to the current block.
    pub fn insert(&mut self, inst: Inst) -> InstRef {
        let block = self.block.expect("no current block");
        let r = self.module.new_inst(inst);
        self.module.push_inst(block, r);
        r
    }

    /// Allocates `inst` detached, without inserting it anywhere.
    #[inline]
    pub fn insert_detached(&mut self, inst: Inst) -> InstRef {
        self.module.new_inst(inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{inst::BinaryOp, Type};
    use sable_sourcemap::SourceSpan;

    const SPAN: SourceSpan = SourceSpan::empty(0);

    #[test]
    fn builder_appends_through_the_membership_engine() {
        let mut interner = Interner::new();
        let mut b = IrBuilder::new(&mut interner);

        b.new_func("main", SPAN);
        let entry = b.new_block("entry", SPAN);

        let x = b.insert(Inst::const_int(Type::Int32, 2, SPAN));
        let y = b.insert(Inst::const_int(Type::Int32, 3, SPAN));
        let sum = b.insert(Inst::binary(Type::Int32, BinaryOp::Add, x, y, SPAN));
        b.insert(Inst::ret(Some(sum), SPAN));

        let m = b.build();
        assert_eq!(m.block(entry).insts.len(), 4);
        assert_eq!(m.inst(sum).parent(), Some(entry));
        assert!(m.inst(sum).dbg_marker().is_some());
    }

    #[test]
    fn switching_blocks_redirects_insertion() {
        let mut interner = Interner::new();
        let mut b = IrBuilder::new(&mut interner);

        b.new_func("main", SPAN);
        let first = b.new_block("entry", SPAN);
        let second = b.new_block("exit", SPAN);

        // new_block moved the cursor to `second`.
        let r = b.insert(Inst::ret(None, SPAN));
        assert_eq!(b.module.inst(r).parent(), Some(second));

        b.switch_to_block(first);
        let jump = b.insert(Inst::br(second, SPAN));
        assert_eq!(b.module.inst(jump).parent(), Some(first));
    }
}

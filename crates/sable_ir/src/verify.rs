//! Structural verification.
//!
//! Walks a module and reports violations of the node/container invariants
//! as values. Verification never mutates and never panics: it is the
//! diagnostic counterpart to the assertions the mutation paths enforce.

use crate::{flags::InstFlags, inst::InstKind, BlockRef, InstRef, Module};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyDiagnostic {
    #[error("block {0} does not end with a terminator")]
    MissingTerminator(BlockRef),
    #[error("terminator {0} is not the last instruction of {1}")]
    TerminatorNotLast(InstRef, BlockRef),
    #[error("instruction {0} back-reference disagrees with its containing block {1}")]
    BadParent(InstRef, BlockRef),
    #[error("detached instruction {0} holds a debug marker")]
    MarkerOnDetached(InstRef),
    #[error("instruction {0} holds a debug marker but {1} stores debug info inline")]
    MarkerInOldFormatBlock(InstRef, BlockRef),
    #[error("phi {0} appears after a non-phi instruction")]
    PhiNotLeading(InstRef),
    #[error("instruction {0} carries flags its opcode does not support")]
    InvalidFlags(InstRef),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyResult {
    pub diagnostics: Vec<VerifyDiagnostic>,
}

impl VerifyResult {
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

pub struct Verifier<'m, 'i> {
    module: &'m Module<'i>,
    result: VerifyResult,
}

impl<'m, 'i> Verifier<'m, 'i> {
    pub fn new(module: &'m Module<'i>) -> Self {
        Self {
            module,
            result: VerifyResult::default(),
        }
    }

    pub fn verify(mut self) -> VerifyResult {
        let module = self.module;
        for (block_ref, block) in module.iter_blocks_with_refs() {
            self.verify_block(block_ref);

            for &inst_ref in &block.insts {
                let inst = module.inst(inst_ref);
                if inst.parent() != Some(block_ref) {
                    self.result
                        .diagnostics
                        .push(VerifyDiagnostic::BadParent(inst_ref, block_ref));
                }
                if inst.dbg_marker().is_some() && !block.new_dbg_format {
                    self.result
                        .diagnostics
                        .push(VerifyDiagnostic::MarkerInOldFormatBlock(inst_ref, block_ref));
                }
                self.verify_flags(inst_ref);
            }
        }

        for inst_ref in module.iter_insts() {
            let inst = module.inst(inst_ref);
            if inst.parent().is_none() && inst.dbg_marker().is_some() {
                self.result
                    .diagnostics
                    .push(VerifyDiagnostic::MarkerOnDetached(inst_ref));
            }
        }

        self.result
    }

    fn verify_block(&mut self, block_ref: BlockRef) {
        let block = self.module.block(block_ref);

        match block.insts.last() {
            None => self
                .result
                .diagnostics
                .push(VerifyDiagnostic::MissingTerminator(block_ref)),
            Some(&last) => {
                if !self.module.inst(last).is_terminator() {
                    self.result
                        .diagnostics
                        .push(VerifyDiagnostic::MissingTerminator(block_ref));
                }
            }
        }

        let mut seen_non_phi = false;
        for (idx, &inst_ref) in block.insts.iter().enumerate() {
            let inst = self.module.inst(inst_ref);
            if inst.is_terminator() && idx + 1 != block.insts.len() {
                self.result
                    .diagnostics
                    .push(VerifyDiagnostic::TerminatorNotLast(inst_ref, block_ref));
            }
            if matches!(inst.kind, InstKind::Phi { .. }) {
                if seen_non_phi {
                    self.result
                        .diagnostics
                        .push(VerifyDiagnostic::PhiNotLeading(inst_ref));
                }
            } else {
                seen_non_phi = true;
            }
        }
    }

    fn verify_flags(&mut self, inst_ref: InstRef) {
        let inst = self.module.inst(inst_ref);

        let mut allowed = InstFlags::empty();
        if inst.kind.is_overflowing_binary_op() {
            allowed |= InstFlags::NUW | InstFlags::NSW;
        }
        if inst.kind.is_possibly_exact_op() {
            allowed |= InstFlags::EXACT;
        }
        if inst.kind.is_possibly_non_neg() {
            allowed |= InstFlags::NNEG;
        }
        if matches!(inst.kind, InstKind::Gep { .. }) {
            allowed |= InstFlags::INBOUNDS;
        }
        if inst.is_fp_math_op() {
            allowed |= InstFlags::FAST;
        }

        if !(inst.flags() - allowed).is_empty() {
            self.result
                .diagnostics
                .push(VerifyDiagnostic::InvalidFlags(inst_ref));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, Inst, InstFlags, Type};
    use sable_interner::Interner;
    use sable_sourcemap::SourceSpan;

    const SPAN: SourceSpan = SourceSpan::empty(0);

    #[test]
    fn well_formed_block_verifies_cleanly() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());

        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let ret = m.new_inst(Inst::ret(Some(x), SPAN));
        m.push_inst(b, x);
        m.push_inst(b, ret);

        let result = Verifier::new(&m).verify();
        assert!(result.is_ok(), "{:?}", result.diagnostics);
    }

    #[test]
    fn missing_terminator_is_reported() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());
        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        m.push_inst(b, x);

        let result = Verifier::new(&m).verify();
        assert_eq!(
            result.diagnostics,
            [VerifyDiagnostic::MissingTerminator(b)]
        );
    }

    #[test]
    fn terminator_in_the_middle_is_reported() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());

        let early_ret = m.new_inst(Inst::ret(None, SPAN));
        let late_ret = m.new_inst(Inst::ret(None, SPAN));
        m.push_inst(b, early_ret);
        m.push_inst(b, late_ret);

        let result = Verifier::new(&m).verify();
        assert_eq!(
            result.diagnostics,
            [VerifyDiagnostic::TerminatorNotLast(early_ret, b)]
        );
    }

    #[test]
    fn trailing_phi_is_reported() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());

        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let phi = m.new_inst(Inst::phi(Type::Int32, Vec::new(), SPAN));
        let ret = m.new_inst(Inst::ret(None, SPAN));
        m.push_inst(b, x);
        m.push_inst(b, phi);
        m.push_inst(b, ret);

        let result = Verifier::new(&m).verify();
        assert_eq!(result.diagnostics, [VerifyDiagnostic::PhiNotLeading(phi)]);
    }

    #[test]
    fn foreign_flags_are_reported() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());

        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let ret = m.new_inst(Inst::ret(None, SPAN));
        m.push_inst(b, x);
        m.push_inst(b, ret);

        // A const cannot carry wrap flags; poke the raw word to simulate a
        // corrupted node.
        m.inst_mut(x).flags = InstFlags::NUW;

        let result = Verifier::new(&m).verify();
        assert_eq!(result.diagnostics, [VerifyDiagnostic::InvalidFlags(x)]);
    }

    #[test]
    fn diagnostics_render_messages() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b = m.new_block(Block::default());
        let _ = b;

        let result = Verifier::new(&m).verify();
        assert_eq!(result.diagnostics.len(), 1);
        let text = result.diagnostics[0].to_string();
        assert!(text.contains("terminator"), "{}", text);
    }
}

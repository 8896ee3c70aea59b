//! The packed per-node flag word.
//!
//! Flag bits are only meaningful for opcodes that declare the matching
//! capability: wrap flags on overflowing binary operators, exactness on the
//! exact-division/shift family, non-negative on zero-extension, in-bounds
//! on address computation, and the fast-math bundle on floating-point
//! operators. Reading or writing a flag on an incapable opcode is a
//! contract violation and trips an assertion in debug builds.

use crate::{inst::InstKind, Inst, InstRef, Module};

bitflags::bitflags! {
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstFlags: u16 {
        /// No unsigned wrap (add/sub/mul/shl).
        const NUW = 1 << 0;
        /// No signed wrap (add/sub/mul/shl).
        const NSW = 1 << 1;
        /// Exact division/shift (udiv/sdiv/lshr/ashr).
        const EXACT = 1 << 2;
        /// Zero-extension of a known-non-negative value.
        const NNEG = 1 << 3;
        /// In-bounds address computation.
        const INBOUNDS = 1 << 4;

        /// Allow reassociation.
        const REASSOC = 1 << 5;
        /// No NaNs.
        const NNAN = 1 << 6;
        /// No infinities.
        const NINF = 1 << 7;
        /// No signed zeros.
        const NSZ = 1 << 8;
        /// Allow reciprocal.
        const ARCP = 1 << 9;
        /// Allow floating-point contraction.
        const CONTRACT = 1 << 10;
        /// Allow approximate library functions.
        const AFN = 1 << 11;

        /// The aggregate "fast" bundle: all seven fast-math bits.
        const FAST = Self::REASSOC.bits()
            | Self::NNAN.bits()
            | Self::NINF.bits()
            | Self::NSZ.bits()
            | Self::ARCP.bits()
            | Self::CONTRACT.bits()
            | Self::AFN.bits();
    }
}

impl Inst {
    #[inline]
    fn set_flag(&mut self, flag: InstFlags, on: bool) {
        self.flags.set(flag, on);
    }

    // -----------------------------------------------------------------------
    // Wrap flags
    // -----------------------------------------------------------------------

    pub fn has_no_unsigned_wrap(&self) -> bool {
        debug_assert!(self.kind.is_overflowing_binary_op(), "nuw on invalid op");
        self.flags.contains(InstFlags::NUW)
    }

    pub fn set_has_no_unsigned_wrap(&mut self, on: bool) {
        debug_assert!(self.kind.is_overflowing_binary_op(), "nuw on invalid op");
        self.set_flag(InstFlags::NUW, on);
    }

    pub fn has_no_signed_wrap(&self) -> bool {
        debug_assert!(self.kind.is_overflowing_binary_op(), "nsw on invalid op");
        self.flags.contains(InstFlags::NSW)
    }

    pub fn set_has_no_signed_wrap(&mut self, on: bool) {
        debug_assert!(self.kind.is_overflowing_binary_op(), "nsw on invalid op");
        self.set_flag(InstFlags::NSW, on);
    }

    // -----------------------------------------------------------------------
    // Exactness, non-negative, in-bounds
    // -----------------------------------------------------------------------

    pub fn is_exact(&self) -> bool {
        debug_assert!(self.kind.is_possibly_exact_op(), "exact on invalid op");
        self.flags.contains(InstFlags::EXACT)
    }

    pub fn set_exact(&mut self, on: bool) {
        debug_assert!(self.kind.is_possibly_exact_op(), "exact on invalid op");
        self.set_flag(InstFlags::EXACT, on);
    }

    pub fn has_non_neg(&self) -> bool {
        debug_assert!(self.kind.is_possibly_non_neg(), "nneg on non-zext op");
        self.flags.contains(InstFlags::NNEG)
    }

    pub fn set_non_neg(&mut self, on: bool) {
        debug_assert!(self.kind.is_possibly_non_neg(), "nneg on non-zext op");
        self.set_flag(InstFlags::NNEG, on);
    }

    pub fn is_in_bounds(&self) -> bool {
        debug_assert!(
            matches!(self.kind, InstKind::Gep { .. }),
            "inbounds on non-gep op"
        );
        self.flags.contains(InstFlags::INBOUNDS)
    }

    pub fn set_in_bounds(&mut self, on: bool) {
        debug_assert!(
            matches!(self.kind, InstKind::Gep { .. }),
            "inbounds on non-gep op"
        );
        self.set_flag(InstFlags::INBOUNDS, on);
    }

    // -----------------------------------------------------------------------
    // Fast-math flags
    // -----------------------------------------------------------------------

    pub fn fast_math_flags(&self) -> InstFlags {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags & InstFlags::FAST
    }

    /// Replaces the whole fast-math bundle.
    pub fn set_fast_math_flags(&mut self, fmf: InstFlags) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags = (self.flags - InstFlags::FAST) | (fmf & InstFlags::FAST);
    }

    pub fn copy_fast_math_flags(&mut self, fmf: InstFlags) {
        self.set_fast_math_flags(fmf);
    }

    pub fn is_fast(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::FAST)
    }

    /// Sets or clears the whole bundle; "fast" implies every fast-math bit.
    pub fn set_fast(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::FAST, on);
    }

    pub fn has_allow_reassoc(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::REASSOC)
    }

    pub fn set_allow_reassoc(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::REASSOC, on);
    }

    pub fn has_no_nans(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::NNAN)
    }

    pub fn set_has_no_nans(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::NNAN, on);
    }

    pub fn has_no_infs(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::NINF)
    }

    pub fn set_has_no_infs(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::NINF, on);
    }

    pub fn has_no_signed_zeros(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::NSZ)
    }

    pub fn set_has_no_signed_zeros(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::NSZ, on);
    }

    pub fn has_allow_reciprocal(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::ARCP)
    }

    pub fn set_allow_reciprocal(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::ARCP, on);
    }

    pub fn has_allow_contract(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::CONTRACT)
    }

    pub fn set_allow_contract(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::CONTRACT, on);
    }

    pub fn has_approx_func(&self) -> bool {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.flags.contains(InstFlags::AFN)
    }

    pub fn set_has_approx_func(&mut self, on: bool) {
        debug_assert!(self.is_fp_math_op(), "fast-math flags on invalid op");
        self.set_flag(InstFlags::AFN, on);
    }

    // -----------------------------------------------------------------------
    // Poison-generating flags
    // -----------------------------------------------------------------------

    /// The flag bits whose presence can make this opcode yield poison.
    fn poison_generating_mask(&self) -> InstFlags {
        let mut mask = InstFlags::empty();
        if self.kind.is_overflowing_binary_op() {
            mask |= InstFlags::NUW | InstFlags::NSW;
        }
        if self.kind.is_possibly_exact_op() {
            mask |= InstFlags::EXACT;
        }
        if matches!(self.kind, InstKind::Gep { .. }) {
            mask |= InstFlags::INBOUNDS;
        }
        if self.kind.is_possibly_non_neg() {
            mask |= InstFlags::NNEG;
        }
        if self.is_fp_math_op() {
            mask |= InstFlags::NNAN | InstFlags::NINF;
        }
        mask
    }

    pub fn has_poison_generating_flags(&self) -> bool {
        self.flags.intersects(self.poison_generating_mask())
    }

    /// Clears exactly the flags whose presence can make this operation
    /// produce poison.
    pub fn drop_poison_generating_flags(&mut self) {
        self.flags -= self.poison_generating_mask();
        debug_assert!(!self.has_poison_generating_flags());
    }
}

// Flag transfer needs to look at two arena slots at once, so these live on
// the module: capabilities of the source are snapshotted, then the
// destination is mutated.
impl<'a> Module<'a> {
    /// Copies each capability-compatible flag bundle from `src` onto `dst`.
    /// Wrap flags transfer only when `include_wrap_flags` is set. The
    /// in-bounds bit is OR-combined, matching its use when a computed
    /// address replaces a stricter one.
    pub fn copy_ir_flags(&mut self, dst: InstRef, src: InstRef, include_wrap_flags: bool) {
        let s = self.inst(src);
        let sf = s.flags;
        let src_overflowing = s.kind.is_overflowing_binary_op();
        let src_exact = s.kind.is_possibly_exact_op();
        let src_fp = s.is_fp_math_op();
        let src_gep = matches!(s.kind, InstKind::Gep { .. });
        let src_nneg = s.kind.is_possibly_non_neg();

        let d = self.inst_mut(dst);
        if include_wrap_flags && src_overflowing && d.kind.is_overflowing_binary_op() {
            d.set_has_no_signed_wrap(sf.contains(InstFlags::NSW));
            d.set_has_no_unsigned_wrap(sf.contains(InstFlags::NUW));
        }
        if src_exact && d.kind.is_possibly_exact_op() {
            d.set_exact(sf.contains(InstFlags::EXACT));
        }
        if src_fp && d.is_fp_math_op() {
            d.copy_fast_math_flags(sf & InstFlags::FAST);
        }
        if src_gep && matches!(d.kind, InstKind::Gep { .. }) {
            let on = sf.contains(InstFlags::INBOUNDS) || d.is_in_bounds();
            d.set_in_bounds(on);
        }
        if src_nneg && d.kind.is_possibly_non_neg() {
            d.set_non_neg(sf.contains(InstFlags::NNEG));
        }
    }

    /// Intersects each flag bundle of `dst` with `src`, weakening `dst` to
    /// be valid whenever either node's property held only conditionally.
    /// Used when merging equivalent computations.
    pub fn and_ir_flags(&mut self, dst: InstRef, src: InstRef) {
        let s = self.inst(src);
        let sf = s.flags;
        let src_overflowing = s.kind.is_overflowing_binary_op();
        let src_exact = s.kind.is_possibly_exact_op();
        let src_fp = s.is_fp_math_op();
        let src_gep = matches!(s.kind, InstKind::Gep { .. });
        let src_nneg = s.kind.is_possibly_non_neg();

        let d = self.inst_mut(dst);
        if src_overflowing && d.kind.is_overflowing_binary_op() {
            let nsw = d.flags.contains(InstFlags::NSW) && sf.contains(InstFlags::NSW);
            let nuw = d.flags.contains(InstFlags::NUW) && sf.contains(InstFlags::NUW);
            d.set_has_no_signed_wrap(nsw);
            d.set_has_no_unsigned_wrap(nuw);
        }
        if src_exact && d.kind.is_possibly_exact_op() {
            d.set_exact(d.is_exact() && sf.contains(InstFlags::EXACT));
        }
        if src_fp && d.is_fp_math_op() {
            let fmf = d.fast_math_flags() & (sf & InstFlags::FAST);
            d.copy_fast_math_flags(fmf);
        }
        if src_gep && matches!(d.kind, InstKind::Gep { .. }) {
            let on = sf.contains(InstFlags::INBOUNDS) && d.is_in_bounds();
            d.set_in_bounds(on);
        }
        if src_nneg && d.kind.is_possibly_non_neg() {
            d.set_non_neg(d.has_non_neg() && sf.contains(InstFlags::NNEG));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{BinaryOp, CastOp};
    use crate::Type;
    use sable_interner::Interner;
    use sable_sourcemap::SourceSpan;

    fn module(interner: &mut Interner) -> Module<'_> {
        Module::new(interner)
    }

    #[test]
    fn wrap_flags_on_overflowing_ops() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Int32, 1, span));
        let add = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, a, a, span));

        m.inst_mut(add).set_has_no_unsigned_wrap(true);
        m.inst_mut(add).set_has_no_signed_wrap(true);
        assert!(m.inst(add).has_no_unsigned_wrap());
        assert!(m.inst(add).has_no_signed_wrap());

        m.inst_mut(add).set_has_no_signed_wrap(false);
        assert!(!m.inst(add).has_no_signed_wrap());
        assert!(m.inst(add).has_no_unsigned_wrap());
    }

    #[test]
    fn drop_poison_generating_flags_clears_them_all() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Int32, 1, span));

        // Every poison-capable opcode family in turn.
        let add = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, a, a, span));
        m.inst_mut(add).set_has_no_unsigned_wrap(true);
        m.inst_mut(add).set_has_no_signed_wrap(true);

        let div = m.new_inst(Inst::binary(Type::Int32, BinaryOp::UDiv, a, a, span));
        m.inst_mut(div).set_exact(true);

        let gep = m.new_inst(Inst::gep(Type::Int32, a, [a], span));
        m.inst_mut(gep).set_in_bounds(true);

        let zext = m.new_inst(Inst::cast(Type::Int64, CastOp::ZExt, a, span));
        m.inst_mut(zext).set_non_neg(true);

        let fadd = m.new_inst(Inst::binary(Type::Float, BinaryOp::FAdd, a, a, span));
        m.inst_mut(fadd).set_has_no_nans(true);
        m.inst_mut(fadd).set_has_no_infs(true);
        m.inst_mut(fadd).set_has_no_signed_zeros(true);

        for r in [add, div, gep, zext, fadd] {
            assert!(m.inst(r).has_poison_generating_flags());
            m.inst_mut(r).drop_poison_generating_flags();
            assert!(!m.inst(r).has_poison_generating_flags());
        }

        // nsz does not generate poison and must survive the drop.
        assert!(m.inst(fadd).has_no_signed_zeros());
    }

    #[test]
    fn fast_implies_every_fast_math_bit() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Float, 1, span));
        let fmul = m.new_inst(Inst::binary(Type::Float, BinaryOp::FMul, a, a, span));

        m.inst_mut(fmul).set_fast(true);
        assert!(m.inst(fmul).is_fast());
        assert!(m.inst(fmul).has_allow_reassoc());
        assert!(m.inst(fmul).has_no_nans());
        assert!(m.inst(fmul).has_approx_func());

        m.inst_mut(fmul).set_allow_reciprocal(false);
        assert!(!m.inst(fmul).is_fast());
        assert!(m.inst(fmul).has_no_nans());
    }

    #[test]
    fn copy_ir_flags_respects_wrap_gate() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Int32, 1, span));
        let src = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, a, a, span));
        m.inst_mut(src).set_has_no_unsigned_wrap(true);
        m.inst_mut(src).set_has_no_signed_wrap(true);

        let dst = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Mul, a, a, span));
        m.copy_ir_flags(dst, src, false);
        assert!(!m.inst(dst).has_no_unsigned_wrap());

        m.copy_ir_flags(dst, src, true);
        assert!(m.inst(dst).has_no_unsigned_wrap());
        assert!(m.inst(dst).has_no_signed_wrap());
    }

    #[test]
    fn and_ir_flags_is_idempotent() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Float, 1, span));

        let x = m.new_inst(Inst::binary(Type::Float, BinaryOp::FAdd, a, a, span));
        m.inst_mut(x).set_allow_reassoc(true);
        m.inst_mut(x).set_has_no_nans(true);

        let y = m.new_inst(Inst::binary(Type::Float, BinaryOp::FAdd, a, a, span));
        m.inst_mut(y).set_fast(true);

        m.and_ir_flags(y, x);
        let once = m.inst(y).flags();
        m.and_ir_flags(y, x);
        assert_eq!(m.inst(y).flags(), once);

        // Only the bits both sides had survive.
        assert!(m.inst(y).has_allow_reassoc());
        assert!(m.inst(y).has_no_nans());
        assert!(!m.inst(y).has_no_infs());
        assert!(!m.inst(y).is_fast());
    }

    #[test]
    fn gep_inbounds_ors_on_copy_and_ands_on_intersect() {
        let span = SourceSpan::default();
        let mut interner = Interner::new();
        let mut m = module(&mut interner);
        let a = m.new_inst(Inst::const_int(Type::Int64, 0, span));

        let src = m.new_inst(Inst::gep(Type::Int32, a, [a], span));
        let dst = m.new_inst(Inst::gep(Type::Int32, a, [a], span));
        m.inst_mut(dst).set_in_bounds(true);

        // Source lacks inbounds; copy keeps the destination's bit.
        m.copy_ir_flags(dst, src, true);
        assert!(m.inst(dst).is_in_bounds());

        // Intersection drops it.
        m.and_ir_flags(dst, src);
        assert!(!m.inst(dst).is_in_bounds());
    }
}

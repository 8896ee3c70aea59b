//! Structural equivalence predicates.
//!
//! Three predicates, increasingly strict: `has_same_special_state` compares
//! opcode-specific non-operand state, `is_same_operation_as` compares
//! operation shape (opcode, arity, types), and `is_identical_to` compares
//! operand values as well. Redundancy-elimination passes lean on the shape
//! predicate; CSE and deduplication lean on the identity ones.

use crate::{inst::InstKind, InstRef, Module, Type};

bitflags::bitflags! {
    /// Comparison modes for [`Module::is_same_operation_as`].
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EquivFlags: u8 {
        /// Treat differing alignments as equal.
        const IGNORE_ALIGNMENT = 1 << 0;
        /// Compare only scalar element types, so a vectorized operation
        /// matches its scalar form.
        const SCALAR_TYPES = 1 << 1;
    }
}

impl<'a> Module<'a> {
    /// Whether all opcode-specific non-operand state of `a` and `b`
    /// matches: volatility, alignment, orderings, predicates, attribute
    /// lists, index paths, masks. Opcodes with no special state compare
    /// equal trivially.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `a` and `b` have different opcodes.
    pub fn has_same_special_state(&self, a: InstRef, b: InstRef, ignore_alignment: bool) -> bool {
        let (ia, ib) = (self.inst(a), self.inst(b));
        debug_assert!(
            ia.kind.same_opcode(&ib.kind),
            "special-state comparison across different opcodes"
        );

        match (&ia.kind, &ib.kind) {
            (InstKind::Const(v1), InstKind::Const(v2)) => v1 == v2,
            (
                InstKind::Alloca {
                    allocated: t1,
                    align: a1,
                },
                InstKind::Alloca {
                    allocated: t2,
                    align: a2,
                },
            ) => t1 == t2 && (a1 == a2 || ignore_alignment),
            (
                InstKind::Load {
                    align: a1,
                    volatile: v1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstKind::Load {
                    align: a2,
                    volatile: v2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            )
            | (
                InstKind::Store {
                    align: a1,
                    volatile: v1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstKind::Store {
                    align: a2,
                    volatile: v2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            ) => v1 == v2 && (a1 == a2 || ignore_alignment) && o1 == o2 && s1 == s2,
            (
                InstKind::Icmp { pred: p1, .. },
                InstKind::Icmp { pred: p2, .. },
            ) => p1 == p2,
            (
                InstKind::Fcmp { pred: p1, .. },
                InstKind::Fcmp { pred: p2, .. },
            ) => p1 == p2,
            (
                InstKind::Call {
                    tail: t1,
                    conv: c1,
                    attrs: at1,
                    bundles: bn1,
                    ..
                },
                InstKind::Call {
                    tail: t2,
                    conv: c2,
                    attrs: at2,
                    bundles: bn2,
                    ..
                },
            ) => t1 == t2 && c1 == c2 && at1 == at2 && bn1 == bn2,
            (
                InstKind::Invoke {
                    conv: c1,
                    attrs: at1,
                    bundles: bn1,
                    ..
                },
                InstKind::Invoke {
                    conv: c2,
                    attrs: at2,
                    bundles: bn2,
                    ..
                },
            )
            | (
                InstKind::CallBr {
                    conv: c1,
                    attrs: at1,
                    bundles: bn1,
                    ..
                },
                InstKind::CallBr {
                    conv: c2,
                    attrs: at2,
                    bundles: bn2,
                    ..
                },
            ) => c1 == c2 && at1 == at2 && bn1 == bn2,
            (
                InstKind::ExtractValue { indices: i1, .. },
                InstKind::ExtractValue { indices: i2, .. },
            )
            | (
                InstKind::InsertValue { indices: i1, .. },
                InstKind::InsertValue { indices: i2, .. },
            ) => i1 == i2,
            (
                InstKind::Fence {
                    ordering: o1,
                    scope: s1,
                },
                InstKind::Fence {
                    ordering: o2,
                    scope: s2,
                },
            ) => o1 == o2 && s1 == s2,
            (
                InstKind::Cmpxchg {
                    volatile: v1,
                    weak: w1,
                    success: su1,
                    failure: f1,
                    scope: s1,
                    ..
                },
                InstKind::Cmpxchg {
                    volatile: v2,
                    weak: w2,
                    success: su2,
                    failure: f2,
                    scope: s2,
                    ..
                },
            ) => v1 == v2 && w1 == w2 && su1 == su2 && f1 == f2 && s1 == s2,
            (
                InstKind::AtomicRmw {
                    op: op1,
                    volatile: v1,
                    ordering: o1,
                    scope: s1,
                    ..
                },
                InstKind::AtomicRmw {
                    op: op2,
                    volatile: v2,
                    ordering: o2,
                    scope: s2,
                    ..
                },
            ) => op1 == op2 && v1 == v2 && o1 == o2 && s1 == s2,
            (
                InstKind::Shuffle { mask: m1, .. },
                InstKind::Shuffle { mask: m2, .. },
            ) => m1 == m2,
            (InstKind::Gep { elem: e1, .. }, InstKind::Gep { elem: e2, .. }) => e1 == e2,
            _ => true,
        }
    }

    /// Whether `a` and `b` are the same *operation*: same opcode, same
    /// operand count, matching result and operand types (optionally by
    /// scalar element type), and matching special state (optionally
    /// ignoring alignment). Operand values are deliberately not compared.
    pub fn is_same_operation_as(&self, a: InstRef, b: InstRef, flags: EquivFlags) -> bool {
        let ignore_alignment = flags.contains(EquivFlags::IGNORE_ALIGNMENT);
        let scalar_types = flags.contains(EquivFlags::SCALAR_TYPES);
        let ty_eq = |x: Type, y: Type| {
            if scalar_types {
                x.scalar_ty() == y.scalar_ty()
            } else {
                x == y
            }
        };

        let (ia, ib) = (self.inst(a), self.inst(b));
        if !ia.kind.same_opcode(&ib.kind) || !ty_eq(ia.ty, ib.ty) {
            return false;
        }

        let mut ops_a = Vec::new();
        let mut ops_b = Vec::new();
        ia.operands(&mut ops_a);
        ib.operands(&mut ops_b);
        if ops_a.len() != ops_b.len() {
            return false;
        }
        for (&x, &y) in ops_a.iter().zip(&ops_b) {
            if !ty_eq(self.inst(x).ty, self.inst(y).ty) {
                return false;
            }
        }

        self.has_same_special_state(a, b, ignore_alignment)
    }

    /// Whether `a` and `b` compute the same value assuming both execute:
    /// same opcode, result type, operand values (by reference identity),
    /// special state, and — for phi nodes — the same incoming-block
    /// sequence in the same order. The flag words may differ.
    ///
    /// The closed variant representation folds opcode, operands, and
    /// special state into one structural comparison.
    pub fn is_identical_to_when_defined(&self, a: InstRef, b: InstRef) -> bool {
        let (ia, ib) = (self.inst(a), self.inst(b));
        ia.ty == ib.ty && ia.kind == ib.kind
    }

    /// [`Module::is_identical_to_when_defined`] plus a bit-identical flag
    /// word.
    pub fn is_identical_to(&self, a: InstRef, b: InstRef) -> bool {
        self.is_identical_to_when_defined(a, b) && self.inst(a).flags() == self.inst(b).flags()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{AtomicOrdering, BinaryOp, CallAttrs, CallConv, Callee};
    use crate::{Block, Func, Inst, ScalarType};
    use sable_interner::Interner;
    use sable_sourcemap::SourceSpan;

    const SPAN: SourceSpan = SourceSpan::empty(0);

    #[test]
    fn load_special_state_with_and_without_alignment() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let p = m.new_inst(Inst::alloca(Type::Int32, 4, SPAN));

        let l1 = m.new_inst(Inst::load(Type::Int32, p, 4, SPAN));
        let l2 = m.new_inst(Inst::load(Type::Int32, p, 8, SPAN));

        assert!(!m.has_same_special_state(l1, l2, false));
        assert!(m.has_same_special_state(l1, l2, true));
        assert!(m.is_same_operation_as(l1, l2, EquivFlags::IGNORE_ALIGNMENT));
        assert!(!m.is_same_operation_as(l1, l2, EquivFlags::empty()));
    }

    #[test]
    fn atomic_ordering_is_special_state() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let p = m.new_inst(Inst::alloca(Type::Int32, 4, SPAN));

        let plain = m.new_inst(Inst::load(Type::Int32, p, 4, SPAN));
        let mut atomic = Inst::load(Type::Int32, p, 4, SPAN);
        if let InstKind::Load { ordering, .. } = &mut atomic.kind {
            *ordering = AtomicOrdering::Monotonic;
        }
        let atomic = m.new_inst(atomic);

        assert!(!m.has_same_special_state(plain, atomic, true));
    }

    #[test]
    fn calls_same_shape_different_arguments() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let callee = m.new_func(Func::default());

        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let y = m.new_inst(Inst::const_int(Type::Int32, 2, SPAN));

        let c1 = m.new_inst(Inst::call(Type::Int32, callee, [x], SPAN));
        let c2 = m.new_inst(Inst::call(Type::Int32, callee, [y], SPAN));

        // Same callee, convention, attributes, and bundle schema, but
        // different argument values: same operation, not identical.
        assert!(m.is_same_operation_as(c1, c2, EquivFlags::empty()));
        assert!(!m.is_identical_to(c1, c2));

        let c3 = m.new_inst(Inst::call(Type::Int32, callee, [x], SPAN));
        assert!(m.is_identical_to(c1, c3));
    }

    #[test]
    fn tail_call_bit_is_special_state() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let callee = m.new_func(Func::default());
        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));

        let plain = m.new_inst(Inst::call(Type::Int32, callee, [x], SPAN));
        let tail = m.new_inst(Inst::new(
            Type::Int32,
            InstKind::Call {
                callee: Callee::Direct(callee),
                args: [x].into_iter().collect(),
                tail: true,
                conv: CallConv::C,
                attrs: CallAttrs::default(),
                bundles: Vec::new(),
            },
            SPAN,
        ));

        assert!(!m.has_same_special_state(plain, tail, false));
        assert!(!m.is_same_operation_as(plain, tail, EquivFlags::empty()));
    }

    #[test]
    fn identical_requires_bit_identical_flags() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));

        let a = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, x, x, SPAN));
        let b = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, x, x, SPAN));
        m.inst_mut(b).set_has_no_signed_wrap(true);

        assert!(m.is_identical_to_when_defined(a, b));
        assert!(!m.is_identical_to(a, b));

        m.inst_mut(a).set_has_no_signed_wrap(true);
        assert!(m.is_identical_to(a, b));
    }

    #[test]
    fn phi_incoming_block_order_matters() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let b1 = m.new_block(Block::default());
        let b2 = m.new_block(Block::default());
        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let y = m.new_inst(Inst::const_int(Type::Int32, 2, SPAN));

        let p1 = m.new_inst(Inst::phi(Type::Int32, vec![(x, b1), (y, b2)], SPAN));
        let p2 = m.new_inst(Inst::phi(Type::Int32, vec![(x, b1), (y, b2)], SPAN));
        let p3 = m.new_inst(Inst::phi(Type::Int32, vec![(y, b2), (x, b1)], SPAN));

        assert!(m.is_identical_to(p1, p2));
        // Same values, same blocks, different association order.
        assert!(!m.is_identical_to(p1, p3));
    }

    #[test]
    fn scalar_type_mode_matches_vector_against_scalar_shape() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let vec_ty = Type::Vector {
            lanes: 4,
            elem: ScalarType::Int32,
        };

        let xs = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));
        let xv = m.new_inst(Inst::const_int(vec_ty, 1, SPAN));

        let scalar_add = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, xs, xs, SPAN));
        let vector_add = m.new_inst(Inst::binary(vec_ty, BinaryOp::Add, xv, xv, SPAN));

        assert!(!m.is_same_operation_as(scalar_add, vector_add, EquivFlags::empty()));
        assert!(m.is_same_operation_as(scalar_add, vector_add, EquivFlags::SCALAR_TYPES));
    }

    #[test]
    fn different_binary_operators_are_different_operations() {
        let mut interner = Interner::new();
        let mut m = Module::new(&mut interner);
        let x = m.new_inst(Inst::const_int(Type::Int32, 1, SPAN));

        let add = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Add, x, x, SPAN));
        let sub = m.new_inst(Inst::binary(Type::Int32, BinaryOp::Sub, x, x, SPAN));

        assert!(!m.is_same_operation_as(add, sub, EquivFlags::empty()));
        assert!(!m.is_identical_to_when_defined(add, sub));
    }
}

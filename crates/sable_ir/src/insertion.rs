//! Batched insertion.
//!
//! Passes that sweep a block often want to plant new instructions at many
//! positions without perturbing the sequence mid-walk. An [`InsertionSet`]
//! records positions up front and splices everything in one `execute` call;
//! each splice goes through the membership engine, so markers and order
//! invalidation behave exactly as for single insertions.

use crate::{edit::InsertPt, BlockRef, Inst, InstRef, Module};

#[derive(Debug)]
struct Insertion {
    index: usize,
    inst: Inst,
}

#[derive(Debug, Default)]
pub struct InsertionSet {
    insertions: Vec<Insertion>,
}

impl InsertionSet {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
    }

    /// Schedules `inst` to be inserted immediately before `before`.
    /// Positions are captured now; the sequence must not change until
    /// `execute`.
    pub fn insert_before(&mut self, m: &Module, before: InstRef, inst: Inst) {
        let pt = m.cursor_before(before);
        self.insertions.push(Insertion {
            index: pt.index,
            inst,
        });
    }

    /// Schedules `inst` for the end of the block.
    pub fn push(&mut self, m: &Module, block: BlockRef, inst: Inst) {
        self.insertions.push(Insertion {
            index: m.block(block).insts.len(),
            inst,
        });
    }

    /// Splices every scheduled instruction into `block` and returns their
    /// refs in registration order. The set is left empty.
    pub fn execute(&mut self, m: &mut Module, block: BlockRef) -> Vec<InstRef> {
        if self.insertions.is_empty() {
            return Vec::new();
        }

        // Stable by index, then spliced back-to-front so captured indices
        // stay valid and same-index insertions keep registration order.
        self.insertions.sort_by_key(|i| i.index);

        let mut refs = vec![None; self.insertions.len()];
        for (slot, insertion) in self.insertions.drain(..).enumerate().rev() {
            let r = m.new_inst(insertion.inst);
            m.insert_at(
                r,
                InsertPt {
                    block,
                    index: insertion.index,
                    at_head: false,
                },
            );
            refs[slot] = Some(r);
        }
        refs.into_iter().flatten().collect()
    }
}

//! The list membership engine and the order oracle.
//!
//! Every structural edit — insert, move, remove, erase — goes through this
//! module. Each edit keeps three things consistent in one step: the block's
//! instruction sequence, the block-wide order-valid bit backing
//! [`Module::comes_before`], and the debug markers that must travel (or
//! deliberately stay behind) whenever an instruction changes position.
//!
//! Marker co-mutation is factored into named hooks (`handle_marker_removal`,
//! `take_dbg_at`, `flush_trailing_dbg`) invoked at fixed points in each edit
//! path, so the marker rules are testable apart from the splicing itself.

use crate::{
    dbg::{DbgMarker, DbgValue},
    inst::InstKind,
    BlockRef, Inst, InstRef, MetadataKind, Module,
};

/// An insertion cursor: a position in a block's sequence plus the head/tail
/// bit deciding whether debug annotations already attached at that position
/// end up before or after a newly inserted instruction.
///
/// `index == len` is the end-of-block position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertPt {
    pub block: BlockRef,
    pub index: usize,
    /// When set, an insertion at this cursor lands *before* the debug
    /// annotations attached at the position, so nothing is absorbed.
    pub at_head: bool,
}

impl<'a> Module<'a> {
    // -----------------------------------------------------------------------
    // Cursors
    // -----------------------------------------------------------------------

    /// The position of `inst` within its block.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is not in `block`'s sequence.
    pub(crate) fn index_of(&self, block: BlockRef, inst: InstRef) -> usize {
        self.block(block)
            .insts
            .iter()
            .position(|&r| r == inst)
            .expect("instruction not in its block's sequence")
    }

    /// A cursor immediately before `inst`, after any debug annotations
    /// attached there.
    pub fn cursor_before(&self, inst: InstRef) -> InsertPt {
        let block = self.inst(inst).block.expect("cursor on detached instruction");
        InsertPt {
            block,
            index: self.index_of(block, inst),
            at_head: false,
        }
    }

    /// A cursor immediately after `inst`, before the next instruction's
    /// debug annotations.
    pub fn cursor_after(&self, inst: InstRef) -> InsertPt {
        let block = self.inst(inst).block.expect("cursor on detached instruction");
        InsertPt {
            block,
            index: self.index_of(block, inst) + 1,
            at_head: true,
        }
    }

    /// The end-of-block cursor.
    pub fn end_of(&self, block: BlockRef) -> InsertPt {
        InsertPt {
            block,
            index: self.block(block).insts.len(),
            at_head: false,
        }
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Inserts a detached instruction at `pt`.
    ///
    /// In a block using out-of-band debug storage this also creates the
    /// instruction's (empty) marker and, unless the cursor's head bit is
    /// set, absorbs the annotations previously attached at the insertion
    /// point so they keep preceding the same program point.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is already attached or the cursor is out of range.
    pub fn insert_at(&mut self, inst: InstRef, pt: InsertPt) {
        assert!(
            self.inst(inst).block.is_none(),
            "inserting an already-attached instruction"
        );
        debug_assert!(
            self.inst(inst).dbg.is_none(),
            "detached instruction holds a debug marker"
        );
        let len = self.block(pt.block).insts.len();
        assert!(pt.index <= len, "insertion cursor out of range");

        self.block_mut(pt.block).insts.insert(pt.index, inst);
        self.inst_mut(inst).block = Some(pt.block);
        self.block_mut(pt.block).order_valid = false;

        if !self.block(pt.block).new_dbg_format {
            return;
        }

        self.inst_mut(inst).dbg = Some(DbgMarker::new());
        if !pt.at_head {
            let absorbed = self.take_dbg_at(pt.block, pt.index + 1);
            if !absorbed.is_empty() {
                self.inst_mut(inst)
                    .dbg
                    .as_mut()
                    .unwrap()
                    .absorb_values(absorbed, false);
            }
        }

        // A new terminator must not strand annotations past the block's end.
        if self.inst(inst).is_terminator() {
            self.flush_trailing_dbg(pt.block);
        }
    }

    /// Inserts a detached instruction immediately before `before`.
    pub fn insert_before(&mut self, inst: InstRef, before: InstRef) {
        let pt = self.cursor_before(before);
        self.insert_at(inst, pt);
    }

    /// Inserts a detached instruction immediately after `after`. The new
    /// instruction cannot pick up annotations: everything at that position
    /// already belongs to the following instruction.
    pub fn insert_after(&mut self, inst: InstRef, after: InstRef) {
        let pt = self.cursor_after(after);
        self.insert_at(inst, pt);
    }

    /// Appends a detached instruction to `block`.
    pub fn push_inst(&mut self, block: BlockRef, inst: InstRef) {
        let pt = self.end_of(block);
        self.insert_at(inst, pt);
    }

    // -----------------------------------------------------------------------
    // Removal
    // -----------------------------------------------------------------------

    /// Detaches `inst` from its block, keeping it alive.
    ///
    /// Debug annotations attached to `inst` stay behind at the old
    /// position, migrating to whichever instruction now occupies the gap
    /// (or to the block's trailing marker).
    ///
    /// # Panics
    ///
    /// Panics if `inst` is detached.
    pub fn remove_from_parent(&mut self, inst: InstRef) {
        let block = self.inst(inst).block.expect("removing a detached instruction");
        self.handle_marker_removal(inst);
        // Markers never survive detachment.
        self.inst_mut(inst).dbg = None;

        let idx = self.index_of(block, inst);
        self.block_mut(block).insts.remove(idx);
        self.inst_mut(inst).block = None;
        self.block_mut(block).order_valid = false;
    }

    /// Detaches and destroys `inst` in one step.
    pub fn erase_from_parent(&mut self, inst: InstRef) {
        self.remove_from_parent(inst);
        self.destroy_inst(inst);
    }

    /// Destroys a detached instruction.
    ///
    /// Outstanding debug-value references to the destroyed instruction are
    /// rewritten to the undefined-value placeholder rather than left
    /// dangling, and identity-tagging metadata is cleared.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is still attached.
    pub fn destroy_inst(&mut self, inst: InstRef) {
        assert!(
            self.inst(inst).block.is_none(),
            "destroying an attached instruction"
        );
        debug_assert!(self.inst(inst).dbg.is_none());

        self.undef_dbg_references(inst);
        self.inst_mut(inst).erase_metadata(MetadataKind::AssignId);
        self.insts_free.push(inst);
    }

    // -----------------------------------------------------------------------
    // Movement
    // -----------------------------------------------------------------------

    /// Moves `inst` (attached anywhere) to `pt`.
    ///
    /// Without `preserve_dbg`, annotations attached to `inst` stay behind
    /// at the old position and `inst` re-derives marker state at the
    /// destination exactly as a fresh insertion would. With `preserve_dbg`
    /// the marker contents ride along unconditionally.
    pub fn move_to(&mut self, inst: InstRef, pt: InsertPt, preserve_dbg: bool) {
        let src_block = self.inst(inst).block.expect("moving a detached instruction");
        let src_idx = self.index_of(src_block, inst);
        assert!(
            pt.index <= self.block(pt.block).insts.len(),
            "move cursor out of range"
        );

        let dest_new_format = self.block(pt.block).new_dbg_format;
        let in_place = pt.block == src_block && pt.index == src_idx;

        if self.inst(inst).dbg.is_some() {
            if !dest_new_format {
                // The destination has no marker storage; annotations always
                // stay behind.
                self.handle_marker_removal(inst);
                self.inst_mut(inst).dbg = None;
            } else if !preserve_dbg && !in_place {
                self.handle_marker_removal(inst);
            }
        }

        // Splice between the sequences.
        self.block_mut(src_block).insts.remove(src_idx);
        let mut index = pt.index;
        if pt.block == src_block && index > src_idx {
            index -= 1;
        }
        self.block_mut(pt.block).insts.insert(index, inst);
        self.inst_mut(inst).block = Some(pt.block);
        self.block_mut(src_block).order_valid = false;
        self.block_mut(pt.block).order_valid = false;

        if dest_new_format && !preserve_dbg {
            if self.inst(inst).dbg.is_none() {
                self.inst_mut(inst).dbg = Some(DbgMarker::new());
            }
            if !pt.at_head {
                let absorbed = self.take_dbg_at(pt.block, index + 1);
                if !absorbed.is_empty() {
                    self.inst_mut(inst)
                        .dbg
                        .as_mut()
                        .unwrap()
                        .absorb_values(absorbed, false);
                }
            }
        }

        if self.inst(inst).is_terminator() {
            self.flush_trailing_dbg(pt.block);
        }
    }

    /// Moves `inst` right before `target`; its annotations stay behind.
    pub fn move_before(&mut self, inst: InstRef, target: InstRef) {
        let pt = self.cursor_before(target);
        self.move_to(inst, pt, false);
    }

    /// Moves `inst` right before `target`, carrying its annotations along.
    pub fn move_before_preserving(&mut self, inst: InstRef, target: InstRef) {
        let pt = self.cursor_before(target);
        self.move_to(inst, pt, true);
    }

    /// Moves `inst` right after `target`; its annotations stay behind.
    pub fn move_after(&mut self, inst: InstRef, target: InstRef) {
        let pt = self.cursor_after(target);
        self.move_to(inst, pt, false);
    }

    /// Moves `inst` right after `target`, carrying its annotations along.
    pub fn move_after_preserving(&mut self, inst: InstRef, target: InstRef) {
        let pt = self.cursor_after(target);
        self.move_to(inst, pt, true);
    }

    // -----------------------------------------------------------------------
    // Marker hooks
    // -----------------------------------------------------------------------

    /// Detaches `inst`'s marker, delivering its annotations to the next
    /// position in the sequence so they stay at the same program point.
    fn handle_marker_removal(&mut self, inst: InstRef) {
        let Some(block) = self.inst(inst).block else {
            return;
        };
        if !self.block(block).new_dbg_format {
            return;
        }
        let Some(marker) = self.inst_mut(inst).dbg.as_mut() else {
            return;
        };
        let values = marker.take_values();
        if values.is_empty() {
            return;
        }

        let next_index = self.index_of(block, inst) + 1;
        if next_index >= self.block(block).insts.len() {
            self.block_mut(block)
                .trailing_dbg
                .get_or_insert_with(DbgMarker::new)
                .absorb_values(values, true);
        } else {
            let next = self.block(block).insts[next_index];
            self.inst_mut(next)
                .dbg
                .get_or_insert_with(DbgMarker::new)
                .absorb_values(values, true);
        }
    }

    /// Takes the annotations attached at sequence position `index`: the
    /// marker of the instruction there, or the trailing marker at the end.
    fn take_dbg_at(&mut self, block: BlockRef, index: usize) -> Vec<DbgValue> {
        if index >= self.block(block).insts.len() {
            self.block_mut(block)
                .trailing_dbg
                .as_mut()
                .map(|m| m.take_values())
                .unwrap_or_default()
        } else {
            let at = self.block(block).insts[index];
            self.inst_mut(at)
                .dbg
                .as_mut()
                .map(|m| m.take_values())
                .unwrap_or_default()
        }
    }

    /// Moves any annotations trailing the block onto the terminator's
    /// marker so they are not stranded past the end of the sequence.
    pub(crate) fn flush_trailing_dbg(&mut self, block: BlockRef) {
        if !self.block(block).new_dbg_format {
            return;
        }
        let values = match self.block_mut(block).trailing_dbg.take() {
            Some(mut marker) => marker.take_values(),
            None => return,
        };
        if values.is_empty() {
            return;
        }
        match self.block(block).insts.last().copied() {
            Some(last) => self
                .inst_mut(last)
                .dbg
                .get_or_insert_with(DbgMarker::new)
                .absorb_values(values, false),
            None => self
                .block_mut(block)
                .trailing_dbg
                .get_or_insert_with(DbgMarker::new)
                .absorb_values(values, false),
        }
    }

    /// Rewrites every debug-value reference to `target`, module-wide, to
    /// the undefined-value placeholder.
    fn undef_dbg_references(&mut self, target: InstRef) {
        for inst in self.insts.iter_mut() {
            if let Some(marker) = inst.dbg.as_mut() {
                marker.undef_references(target);
            }
        }
        for block in self.blocks.iter_mut() {
            if let Some(marker) = block.trailing_dbg.as_mut() {
                marker.undef_references(target);
            }
        }
    }

    /// Attaches a debug annotation to `inst`'s marker.
    ///
    /// # Panics
    ///
    /// Panics if `inst` is not in a block with out-of-band debug storage.
    pub fn attach_dbg_value(&mut self, inst: InstRef, value: DbgValue) {
        let marker = self
            .inst_mut(inst)
            .dbg
            .as_mut()
            .expect("attaching a debug value to an instruction without a marker");
        marker.push(value);
    }

    /// Attaches a debug annotation past the end of `block`.
    pub fn attach_trailing_dbg_value(&mut self, block: BlockRef, value: DbgValue) {
        self.block_mut(block)
            .trailing_dbg
            .get_or_insert_with(DbgMarker::new)
            .push(value);
    }

    // -----------------------------------------------------------------------
    // Order oracle
    // -----------------------------------------------------------------------

    /// Whether `a` is strictly earlier than `b` in their (shared) block.
    ///
    /// Renumbers the block first if any structural edit happened since the
    /// last query; the comparison itself is a constant-time integer
    /// comparison.
    ///
    /// # Panics
    ///
    /// Panics if either instruction is detached or they belong to
    /// different blocks.
    pub fn comes_before(&mut self, a: InstRef, b: InstRef) -> bool {
        let pa = self.inst(a).block.expect("order query on detached instruction");
        let pb = self.inst(b).block.expect("order query on detached instruction");
        assert_eq!(pa, pb, "cross-block order comparison");

        if !self.block(pa).order_valid {
            self.renumber_block(pa);
        }
        self.inst(a).order < self.inst(b).order
    }

    /// Reassigns strictly increasing position tokens across the block and
    /// marks its order valid.
    pub fn renumber_block(&mut self, block: BlockRef) {
        for i in 0..self.block(block).insts.len() {
            let r = self.block(block).insts[i];
            self.inst_mut(r).order = i as u32;
        }
        self.block_mut(block).order_valid = true;
    }

    // -----------------------------------------------------------------------
    // Position queries
    // -----------------------------------------------------------------------

    /// The position right after this instruction's definition where a use
    /// could be inserted, or `None` when no unique position exists (a
    /// callbr defines its value in several successors; a catch-switch
    /// block has no legal insertion point at all).
    pub fn insertion_point_after_def(&self, inst: InstRef) -> Option<InsertPt> {
        let node = self.inst(inst);
        assert!(!node.ty.is_void(), "instruction defines no result");

        let (block, index) = match &node.kind {
            InstKind::Phi { .. } => {
                let block = node.block.expect("detached instruction has no insertion point");
                (block, self.first_insertion_index(block))
            }
            InstKind::Invoke { normal, .. } => (*normal, self.first_insertion_index(*normal)),
            // The value is available in several successors; there is no
            // single dominating position.
            InstKind::CallBr { .. } => return None,
            _ => {
                assert!(
                    !node.is_terminator(),
                    "only invoke/callbr terminators define a result"
                );
                let block = node.block.expect("detached instruction has no insertion point");
                (block, self.index_of(block, inst) + 1)
            }
        };

        if index == self.block(block).insts.len() {
            return None;
        }
        Some(InsertPt {
            block,
            index,
            at_head: false,
        })
    }

    /// The first position in `block` past leading phi nodes and
    /// exception-pad entries.
    fn first_insertion_index(&self, block: BlockRef) -> usize {
        let insts = &self.block(block).insts;
        insts
            .iter()
            .position(|&r| {
                let kind = &self.inst(r).kind;
                !matches!(kind, InstKind::Phi { .. }) && !kind.is_eh_pad()
            })
            .unwrap_or(insts.len())
    }

    /// The next instruction in the block that is not a pseudo-op.
    pub fn next_nondebug(&self, inst: InstRef) -> Option<InstRef> {
        let block = self.inst(inst).block?;
        let idx = self.index_of(block, inst);
        self.block(block).insts[idx + 1..]
            .iter()
            .copied()
            .find(|&r| !matches!(self.inst(r).kind, InstKind::Nop))
    }

    /// The previous instruction in the block that is not a pseudo-op.
    pub fn prev_nondebug(&self, inst: InstRef) -> Option<InstRef> {
        let block = self.inst(inst).block?;
        let idx = self.index_of(block, inst);
        self.block(block).insts[..idx]
            .iter()
            .rev()
            .copied()
            .find(|&r| !matches!(self.inst(r).kind, InstKind::Nop))
    }
}

//! Keyed side-table metadata and the clone engine.
//!
//! The metadata storage engine itself lives outside this library; nodes
//! carry a small keyed list of `(kind, value)` entries and never inspect
//! payloads beyond the fixed kinds special-cased below. The debug location
//! is the node's span and is not stored in the list; [`MetadataKind::DebugLoc`]
//! exists so allow-lists can name it.

use crate::{inst::InstKind, Inst, InstRef, Module, ParamAttrs};

use sable_interner::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataKind {
    /// Value-range fact. Produces poison when violated.
    Range,
    /// Non-null fact. Produces poison when violated.
    Nonnull,
    /// Alignment fact. Produces poison when violated.
    Align,
    /// Asserted-defined fact. Violation is immediate undefined behavior.
    Noundef,
    /// Type-based aliasing fact. Violation is undefined behavior.
    Tbaa,
    AliasScope,
    Noalias,
    /// Free-form marker with no semantic weight.
    Annotation,
    /// Identity tag for assignment tracking; cleared at destruction.
    AssignId,
    /// Branch-weight profile data.
    Prof,
    /// The debug location. Lives in the node's span, not in the list.
    DebugLoc,
}

impl MetadataKind {
    /// Kinds whose presence can make the operation yield poison (and are
    /// therefore safe to keep when speculating).
    #[inline]
    pub fn is_poison_generating(self) -> bool {
        matches!(
            self,
            MetadataKind::Range | MetadataKind::Nonnull | MetadataKind::Align
        )
    }
}

/// Metadata payload. Opaque to this library except for the shapes it has
/// to rewrite itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataValue {
    /// Handle into an external metadata graph.
    Node(u32),
    /// Interned string payload (annotations).
    Str(Symbol),
    /// Taken/not-taken weights for a two-successor terminator.
    BranchWeights(u64, u64),
}

impl Inst {
    // -----------------------------------------------------------------------
    // Attach / detach
    // -----------------------------------------------------------------------

    /// Attaches `value` under `kind`, replacing any existing entry of that
    /// kind.
    pub fn set_metadata(&mut self, kind: MetadataKind, value: MetadataValue) {
        debug_assert!(kind != MetadataKind::DebugLoc, "debug location lives in the span");
        match self.metadata.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, slot)) => *slot = value,
            None => self.metadata.push((kind, value)),
        }
    }

    pub fn erase_metadata(&mut self, kind: MetadataKind) {
        self.metadata.retain(|(k, _)| *k != kind);
    }

    pub fn metadata(&self, kind: MetadataKind) -> Option<&MetadataValue> {
        self.metadata
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v)
    }

    #[inline]
    pub fn has_metadata(&self, kind: MetadataKind) -> bool {
        self.metadata.iter().any(|(k, _)| *k == kind)
    }

    pub fn metadata_entries(&self) -> impl Iterator<Item = &(MetadataKind, MetadataValue)> {
        self.metadata.iter()
    }

    /// Drops every entry whose kind is not in `keep`.
    pub fn drop_unknown_metadata(&mut self, keep: &[MetadataKind]) {
        self.metadata.retain(|(k, _)| keep.contains(k));
    }

    // -----------------------------------------------------------------------
    // Semantic drops
    // -----------------------------------------------------------------------

    pub fn has_poison_generating_metadata(&self) -> bool {
        self.metadata.iter().any(|(k, _)| k.is_poison_generating())
    }

    pub fn drop_poison_generating_metadata(&mut self) {
        self.metadata.retain(|(k, _)| !k.is_poison_generating());
    }

    /// Strips everything that asserts immediate-UB facts while keeping
    /// poison-only facts: range/nonnull/align survive (violations produce
    /// poison, safe to speculate), the annotation marker survives (no
    /// semantic weight), and on call-like nodes the UB-implying parameter
    /// and return attributes are stripped as well.
    pub fn drop_ub_implying_attrs_and_metadata(&mut self) {
        self.drop_unknown_metadata(&[
            MetadataKind::Annotation,
            MetadataKind::Range,
            MetadataKind::Nonnull,
            MetadataKind::Align,
        ]);

        if let InstKind::Call { attrs, .. }
        | InstKind::Invoke { attrs, .. }
        | InstKind::CallBr { attrs, .. } = &mut self.kind
        {
            attrs.ret -= ParamAttrs::UB_IMPLYING;
            for param in &mut attrs.params {
                *param -= ParamAttrs::UB_IMPLYING;
            }
        }
    }

    /// Reorders two-successor branch-weight profile data after the
    /// successors were swapped.
    pub fn swap_prof_metadata(&mut self) {
        if let Some((_, MetadataValue::BranchWeights(taken, not_taken))) = self
            .metadata
            .iter_mut()
            .find(|(k, _)| *k == MetadataKind::Prof)
        {
            std::mem::swap(taken, not_taken);
        }
    }
}

impl<'a> Module<'a> {
    /// Produces a structurally equal, fully detached duplicate of `src`:
    /// same operand bindings, result type, and debug location, the flag
    /// word copied verbatim, and every metadata entry copied.
    pub fn clone_inst(&mut self, src: InstRef) -> InstRef {
        let mut dup = self.inst(src).clone();
        dup.block = None;
        dup.dbg = None;
        dup.order = 0;
        self.new_inst(dup)
    }

    /// Copies metadata entries from `src` onto `dst`. An empty `allowlist`
    /// copies everything; otherwise only the listed kinds transfer. The
    /// debug location transfers when allowed.
    pub fn copy_metadata(&mut self, dst: InstRef, src: InstRef, allowlist: &[MetadataKind]) {
        let s = self.inst(src);
        let entries: Vec<_> = s
            .metadata
            .iter()
            .filter(|(k, _)| allowlist.is_empty() || allowlist.contains(k))
            .cloned()
            .collect();
        let span = s.span;
        let copy_loc = allowlist.is_empty() || allowlist.contains(&MetadataKind::DebugLoc);

        let d = self.inst_mut(dst);
        for (kind, value) in entries {
            d.set_metadata(kind, value);
        }
        if copy_loc {
            d.span = span;
        }
    }
}

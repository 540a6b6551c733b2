//! Accessibility descriptions collected from the render tree.
//!
//! Render boxes contribute a [`SemanticsConfig`]; the pipeline tracks which
//! semantics boundaries are dirty and hands the drained set to a
//! [`SemanticsSink`] once per frame. Translating descriptions into a platform
//! accessibility format happens on the other side of the sink.

use bitflags::bitflags;

use crate::render::{PipelineOwner, RenderId};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SemanticsFlags: u32 {
        const BUTTON      = 1 << 0;
        const LINK        = 1 << 1;
        const HEADER      = 1 << 2;
        const TEXT_FIELD  = 1 << 3;
        const FOCUSABLE   = 1 << 4;
        const HIDDEN      = 1 << 5;
        const LIVE_REGION = 1 << 6;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SemanticsConfig {
    pub flags: SemanticsFlags,
    pub label: Option<String>,
    pub value: Option<String>,
    /// Forces a semantics boundary even with an empty contribution.
    pub is_semantic_boundary: bool,
    /// Descendant contributions collapse into this node.
    pub merges_descendants: bool,
}

impl SemanticsConfig {
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
            && self.label.is_none()
            && self.value.is_none()
            && !self.is_semantic_boundary
            && !self.merges_descendants
    }

    /// Folds a descendant contribution into this one. Labels concatenate in
    /// paint order; flags union.
    pub fn merge(&mut self, other: &SemanticsConfig) {
        self.flags |= other.flags;
        match (&mut self.label, &other.label) {
            (Some(mine), Some(theirs)) => {
                mine.push(' ');
                mine.push_str(theirs);
            }
            (None, Some(theirs)) => self.label = Some(theirs.clone()),
            _ => {}
        }
        if self.value.is_none() {
            self.value = other.value.clone();
        }
    }
}

/// Consumes the per-frame set of dirty semantics boundaries.
pub trait SemanticsSink: Send {
    fn update(&mut self, tree: &PipelineOwner, dirty_boundaries: &[RenderId], scale: f64);
}

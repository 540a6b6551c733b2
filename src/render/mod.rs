//! Render tree and pipeline: layout protocol, dirty-boundary scheduling, and
//! the per-frame flush drains.
//!
//! Render objects live in an arena owned by [`PipelineOwner`]; handles are
//! generational ids. Trait calls that need the tree use the take-and-restore
//! pattern: the box is swapped out of its node for the duration of the call
//! so it can receive `&mut PipelineOwner` without aliasing.

pub mod paint;

pub use paint::{
    composite_frame, merge_view_placements, paint_boundary_to_layer, Canvas, Color, DisplayList,
    DrawOp, Paint, PaintContext, PaintLayer, PaintStyle, PictureRecorder, ViewPlacement,
};

use std::collections::HashSet;
use std::sync::Arc;

use bitflags::bitflags;

use crate::arena::{Arena, Id};
use crate::element::ElementId;
use crate::layout::{Constraints, Offset, Size};
use crate::semantics::SemanticsConfig;
use crate::widgets::AsAny;

pub type RenderId = Id<RenderNode>;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const NEEDS_LAYOUT    = 1 << 0;
        const NEEDS_PAINT     = 1 << 1;
        const NEEDS_SEMANTICS = 1 << 2;
    }
}

/// One box in the render tree.
///
/// The protocol is parent-driven: parents size and position children during
/// their own `perform_layout`, and paint them through the context so layer
/// substitution stays transparent.
pub trait RenderBox: AsAny + Send {
    fn perform_layout(
        &mut self,
        tree: &mut PipelineOwner,
        id: RenderId,
        constraints: Constraints,
    ) -> Size;

    /// Paints this box in layer-local coordinates. The default paints all
    /// children at their stored offsets.
    fn paint(&self, tree: &mut PipelineOwner, id: RenderId, ctx: &mut PaintContext) {
        for (child, offset) in tree.children_with_offsets(id) {
            ctx.paint_child(tree, child, offset);
        }
    }

    /// Opting in gives this box a persistent paint layer; ancestors reference
    /// the layer instead of re-recording its content.
    fn is_repaint_boundary(&self) -> bool {
        false
    }

    fn describe_semantics(&self, config: &mut SemanticsConfig) {
        let _ = config;
    }

    /// An embedded native view hosted at this box's position, if any.
    fn platform_view_id(&self) -> Option<i64> {
        None
    }

    fn dispose(&mut self) {}
}

/// Swapped into a node while its real box is borrowed for a trait call.
struct PlaceholderBox;

impl RenderBox for PlaceholderBox {
    fn perform_layout(
        &mut self,
        _tree: &mut PipelineOwner,
        _id: RenderId,
        constraints: Constraints,
    ) -> Size {
        constraints.smallest()
    }

    fn paint(&self, _tree: &mut PipelineOwner, _id: RenderId, _ctx: &mut PaintContext) {}
}

pub struct RenderNode {
    render_box: Box<dyn RenderBox>,
    parent: Option<RenderId>,
    children: Vec<RenderId>,
    depth: u32,
    /// Position in the parent's coordinate space, assigned by the parent
    /// during its layout.
    offset: Offset,
    size: Size,
    constraints: Option<Constraints>,
    relayout_boundary: Option<RenderId>,
    repaint_boundary: Option<RenderId>,
    semantics_boundary: Option<RenderId>,
    flags: NodeFlags,
    /// Persistent across frames for repaint boundaries. Re-recording replaces
    /// the contents, never the Arc, so ancestor display lists that reference
    /// it pick up new content without re-recording themselves.
    layer: Option<Arc<PaintLayer>>,
}

/// A deferred-build obligation discovered during layout: the element gets its
/// real constraints and may rebuild its subtree before layout continues.
#[derive(Debug, Clone, Copy)]
pub struct DeferredRequest {
    pub element: ElementId,
    pub constraints: Constraints,
}

#[derive(Default)]
pub struct PipelineOwner {
    nodes: Arena<RenderNode>,
    root: Option<RenderId>,
    dirty_layout: HashSet<RenderId>,
    dirty_paint: HashSet<RenderId>,
    dirty_semantics: HashSet<RenderId>,
    deferred: Vec<DeferredRequest>,
    on_needs_frame: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl PipelineOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_needs_frame(&mut self, callback: Arc<dyn Fn() + Send + Sync>) {
        self.on_needs_frame = Some(callback);
    }

    fn request_frame(&self) {
        if let Some(cb) = &self.on_needs_frame {
            cb();
        }
    }

    // ---- tree structure ----------------------------------------------------

    /// Inserts a detached node. New nodes need everything once attached.
    pub fn insert(&mut self, render_box: Box<dyn RenderBox>) -> RenderId {
        self.nodes.insert(RenderNode {
            render_box,
            parent: None,
            children: Vec::new(),
            depth: 0,
            offset: Offset::zero(),
            size: Size::zero(),
            constraints: None,
            relayout_boundary: None,
            repaint_boundary: None,
            semantics_boundary: None,
            flags: NodeFlags::all(),
            layer: None,
        })
    }

    pub fn set_root(&mut self, id: RenderId) {
        self.root = Some(id);
    }

    pub fn root(&self) -> Option<RenderId> {
        self.root
    }

    pub fn contains(&self, id: RenderId) -> bool {
        self.nodes.contains(id)
    }

    /// Appends `child` under `parent`. Boundary caches of the child are stale
    /// after a move and are recomputed by the next layout.
    pub fn attach_child(&mut self, parent: RenderId, child: RenderId) {
        let parent_depth = match self.nodes.get(parent) {
            Some(node) => node.depth,
            None => panic!("attach_child: parent render node is gone"),
        };
        {
            let node = self
                .nodes
                .get_mut(child)
                .unwrap_or_else(|| panic!("attach_child: child render node is gone"));
            node.parent = Some(parent);
            node.relayout_boundary = None;
            node.repaint_boundary = None;
            node.semantics_boundary = None;
            node.flags.insert(NodeFlags::NEEDS_LAYOUT | NodeFlags::NEEDS_PAINT);
        }
        self.redepth(child, parent_depth + 1);
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.push(child);
        }
        self.mark_needs_layout(parent);
    }

    /// Replaces `parent`'s child list, used by multi-child hosts after
    /// reconciliation reordered their element children.
    pub fn set_children(&mut self, parent: RenderId, children: Vec<RenderId>) {
        let changed = match self.nodes.get(parent) {
            Some(node) => node.children != children,
            None => return,
        };
        if !changed {
            return;
        }
        let parent_depth = self.nodes.get(parent).map(|n| n.depth).unwrap_or(0);
        for &child in &children {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(parent);
            }
            self.redepth(child, parent_depth + 1);
        }
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children = children;
        }
        self.mark_needs_layout(parent);
        self.mark_needs_paint(parent);
    }

    /// Removes a node from the tree and frees it. Its children must already
    /// be detached (element unmount recurses children first).
    pub fn detach(&mut self, id: RenderId) {
        let parent = self.nodes.get(id).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(node) = self.nodes.get_mut(parent) {
                node.children.retain(|&c| c != id);
            }
            self.mark_needs_layout(parent);
            self.mark_needs_paint(parent);
        }
        self.dirty_layout.remove(&id);
        self.dirty_paint.remove(&id);
        self.dirty_semantics.remove(&id);
        if let Some(mut node) = self.nodes.remove(id) {
            node.render_box.dispose();
            node.layer = None;
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    fn redepth(&mut self, id: RenderId, depth: u32) {
        let children = match self.nodes.get_mut(id) {
            Some(node) => {
                if node.depth == depth {
                    return;
                }
                node.depth = depth;
                node.children.clone()
            }
            None => return,
        };
        for child in children {
            self.redepth(child, depth + 1);
        }
    }

    // ---- accessors ---------------------------------------------------------

    pub fn parent_of(&self, id: RenderId) -> Option<RenderId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn depth_of(&self, id: RenderId) -> u32 {
        self.nodes.get(id).map(|n| n.depth).unwrap_or(0)
    }

    pub fn children_of(&self, id: RenderId) -> Vec<RenderId> {
        self.nodes.get(id).map(|n| n.children.clone()).unwrap_or_default()
    }

    pub fn children_with_offsets(&self, id: RenderId) -> Vec<(RenderId, Offset)> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|&c| self.nodes.get(c).map(|n| (c, n.offset)))
            .collect()
    }

    pub fn size_of(&self, id: RenderId) -> Size {
        self.nodes.get(id).map(|n| n.size).unwrap_or_default()
    }

    pub fn offset_of(&self, id: RenderId) -> Offset {
        self.nodes.get(id).map(|n| n.offset).unwrap_or_default()
    }

    /// Positions a child; parents call this from `perform_layout`.
    pub fn set_child_offset(&mut self, child: RenderId, offset: Offset) {
        if let Some(node) = self.nodes.get_mut(child) {
            if node.offset != offset {
                node.offset = offset;
            }
        }
    }

    pub fn constraints_of(&self, id: RenderId) -> Option<Constraints> {
        self.nodes.get(id).and_then(|n| n.constraints)
    }

    pub fn relayout_boundary_of(&self, id: RenderId) -> Option<RenderId> {
        self.nodes.get(id).and_then(|n| n.relayout_boundary)
    }

    pub fn repaint_boundary_of(&self, id: RenderId) -> Option<RenderId> {
        self.nodes.get(id).and_then(|n| n.repaint_boundary)
    }

    pub fn needs_layout(&self, id: RenderId) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.flags.contains(NodeFlags::NEEDS_LAYOUT))
            .unwrap_or(false)
    }

    pub fn needs_paint(&self, id: RenderId) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.flags.contains(NodeFlags::NEEDS_PAINT))
            .unwrap_or(false)
    }

    pub fn needs_semantics(&self, id: RenderId) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.flags.contains(NodeFlags::NEEDS_SEMANTICS))
            .unwrap_or(false)
    }

    /// Whether any layout, paint or semantics work is pending.
    pub fn needs_visual_work(&self) -> bool {
        !self.dirty_layout.is_empty()
            || !self.dirty_paint.is_empty()
            || !self.dirty_semantics.is_empty()
    }

    /// Whether any semantics boundaries await a flush.
    pub fn has_pending_semantics(&self) -> bool {
        !self.dirty_semantics.is_empty()
    }

    pub fn layer_of(&self, id: RenderId) -> Option<Arc<PaintLayer>> {
        self.nodes.get(id).and_then(|n| n.layer.clone())
    }

    /// The persistent layer for a boundary, created on first use.
    pub fn ensure_layer(&mut self, id: RenderId) -> Arc<PaintLayer> {
        let node = self
            .nodes
            .get_mut(id)
            .unwrap_or_else(|| panic!("ensure_layer: render node is gone"));
        node.layer
            .get_or_insert_with(|| Arc::new(PaintLayer::new()))
            .clone()
    }

    pub fn is_repaint_boundary(&self, id: RenderId) -> bool {
        self.nodes
            .get(id)
            .map(|n| n.render_box.is_repaint_boundary())
            .unwrap_or(false)
    }

    pub fn platform_view_id(&self, id: RenderId) -> Option<i64> {
        self.nodes.get(id).and_then(|n| n.render_box.platform_view_id())
    }

    pub fn semantics_config(&self, id: RenderId) -> SemanticsConfig {
        let mut config = SemanticsConfig::default();
        if let Some(node) = self.nodes.get(id) {
            node.render_box.describe_semantics(&mut config);
        }
        config
    }

    /// Layer-local coordinates accumulate from the root; this resolves a
    /// node's absolute origin for platform-view geometry.
    pub fn absolute_origin(&self, id: RenderId) -> Offset {
        let mut origin = Offset::zero();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.nodes.get(current) else {
                break;
            };
            origin = origin + node.offset;
            cursor = node.parent;
        }
        origin
    }

    /// Takes the box out of its node, runs `f` with it and the tree, and puts
    /// it back. Mirrors the borrow shape used across the crate for trait
    /// calls that re-enter the tree.
    pub fn with_box_mut<R>(
        &mut self,
        id: RenderId,
        f: impl FnOnce(&mut dyn RenderBox, &mut PipelineOwner) -> R,
    ) -> Option<R> {
        let mut taken: Box<dyn RenderBox> = {
            let node = self.nodes.get_mut(id)?;
            std::mem::replace(&mut node.render_box, Box::new(PlaceholderBox))
        };
        let result = f(taken.as_mut(), self);
        if let Some(node) = self.nodes.get_mut(id) {
            node.render_box = taken;
        }
        Some(result)
    }

    // ---- dirty marking -----------------------------------------------------

    /// Walks up marking every node until the relayout boundary, which gets
    /// scheduled. Intermediate flags keep the relayout chain unbroken when
    /// layout later descends from the boundary.
    pub fn mark_needs_layout(&mut self, id: RenderId) {
        let (already, boundary, parent) = match self.nodes.get_mut(id) {
            Some(node) => {
                let already = node.flags.contains(NodeFlags::NEEDS_LAYOUT);
                node.flags.insert(NodeFlags::NEEDS_LAYOUT);
                (already, node.relayout_boundary, node.parent)
            }
            None => return,
        };
        if already {
            return;
        }
        if boundary == Some(id) {
            if self.dirty_layout.insert(id) {
                self.request_frame();
            }
        } else if let Some(parent) = parent {
            self.mark_needs_layout(parent);
        } else {
            // Not yet connected or genuinely the root. Schedule self so the
            // node is reached either way.
            if self.dirty_layout.insert(id) {
                self.request_frame();
            }
        }
    }

    /// Walks up to the repaint boundary. No early return on an already-set
    /// flag: freshly attached nodes carry the flag without having been
    /// scheduled, and the dirty set deduplicates anyway. The cached layer is
    /// kept; re-recording replaces its contents in place.
    pub fn mark_needs_paint(&mut self, id: RenderId) {
        let (boundary, parent, opt_in) = match self.nodes.get_mut(id) {
            Some(node) => {
                node.flags.insert(NodeFlags::NEEDS_PAINT);
                (
                    node.repaint_boundary,
                    node.parent,
                    node.render_box.is_repaint_boundary(),
                )
            }
            None => return,
        };
        if boundary == Some(id) || (boundary.is_none() && opt_in) {
            if self.dirty_paint.insert(id) {
                self.request_frame();
            }
        } else if let Some(parent) = parent {
            self.mark_needs_paint(parent);
        } else if self.dirty_paint.insert(id) {
            self.request_frame();
        }
    }

    pub fn mark_needs_semantics(&mut self, id: RenderId) {
        let (boundary, parent) = match self.nodes.get_mut(id) {
            Some(node) => {
                node.flags.insert(NodeFlags::NEEDS_SEMANTICS);
                (node.semantics_boundary, node.parent)
            }
            None => return,
        };
        if boundary == Some(id) {
            if self.dirty_semantics.insert(id) {
                self.request_frame();
            }
        } else if let Some(parent) = parent {
            self.mark_needs_semantics(parent);
        } else if self.dirty_semantics.insert(id) {
            self.request_frame();
        }
    }

    // ---- layout ------------------------------------------------------------

    /// Lays out one node. Recomputes the three boundary caches top-down,
    /// skips if the node is clean under unchanged constraints, and otherwise
    /// delegates to the box's `perform_layout`.
    pub fn layout_child(
        &mut self,
        id: RenderId,
        constraints: Constraints,
        parent_uses_size: bool,
    ) {
        let (parent, opt_in_repaint) = match self.nodes.get(id) {
            Some(node) => (node.parent, node.render_box.is_repaint_boundary()),
            None => panic!("layout_child: render node is gone"),
        };

        let relayout_boundary = if constraints.is_tight() || parent.is_none() || !parent_uses_size
        {
            Some(id)
        } else {
            parent.and_then(|p| self.nodes.get(p)).and_then(|p| p.relayout_boundary)
        };
        let repaint_boundary = if opt_in_repaint || parent.is_none() {
            Some(id)
        } else {
            parent.and_then(|p| self.nodes.get(p)).and_then(|p| p.repaint_boundary)
        };
        let semantics_boundary = if !self.semantics_config(id).is_empty() || parent.is_none() {
            Some(id)
        } else {
            parent
                .and_then(|p| self.nodes.get(p))
                .and_then(|p| p.semantics_boundary)
        };

        let skip = {
            let node = self
                .nodes
                .get_mut(id)
                .unwrap_or_else(|| panic!("layout_child: render node is gone"));
            node.relayout_boundary = relayout_boundary;
            node.repaint_boundary = repaint_boundary;
            node.semantics_boundary = semantics_boundary;
            !node.flags.contains(NodeFlags::NEEDS_LAYOUT) && node.constraints == Some(constraints)
        };
        if skip {
            return;
        }

        if let Some(node) = self.nodes.get_mut(id) {
            node.constraints = Some(constraints);
            node.flags.remove(NodeFlags::NEEDS_LAYOUT);
        }
        let size = self
            .with_box_mut(id, |render_box, tree| {
                render_box.perform_layout(tree, id, constraints)
            })
            .unwrap_or_else(Size::zero);
        if let Some(node) = self.nodes.get_mut(id) {
            node.size = size;
        }
        // Content was re-laid-out, so whatever it draws is stale.
        self.mark_needs_paint(id);
        self.mark_needs_semantics(id);
    }

    /// Deferred-build obligations recorded during the current layout drain.
    pub fn push_deferred_request(&mut self, request: DeferredRequest) {
        self.deferred.push(request);
    }

    pub fn take_deferred_requests(&mut self) -> Vec<DeferredRequest> {
        std::mem::take(&mut self.deferred)
    }

    /// One layout drain: lays out the root under `constraints`, then drains
    /// newly scheduled relayout boundaries ascending by depth until the set
    /// is empty. Deferred-build requests recorded along the way stay queued
    /// for the caller.
    pub fn flush_layout(&mut self, root: RenderId, constraints: Constraints) {
        if self.nodes.contains(root) {
            self.dirty_layout.remove(&root);
            self.layout_child(root, constraints, false);
        }
        loop {
            if self.dirty_layout.is_empty() {
                break;
            }
            let mut batch: Vec<RenderId> = self.dirty_layout.drain().collect();
            batch.sort_by_key(|&id| self.depth_of(id));
            for id in batch {
                let still_dirty = self
                    .nodes
                    .get(id)
                    .map(|n| n.flags.contains(NodeFlags::NEEDS_LAYOUT))
                    .unwrap_or(false);
                if !still_dirty {
                    continue;
                }
                match self.constraints_of(id) {
                    Some(c) => self.layout_child(id, c, false),
                    None => {
                        log::debug!(
                            "skipping relayout of {:?}: no constraints recorded yet",
                            id
                        );
                    }
                }
            }
        }
    }

    /// Returns the repaint boundaries that still need recording, ascending by
    /// depth, consuming the dirty set. Flags clear as boundaries re-record.
    pub fn flush_paint(&mut self) -> Vec<RenderId> {
        let mut batch: Vec<RenderId> = self.dirty_paint.drain().collect();
        batch.sort_by_key(|&id| self.depth_of(id));
        batch.retain(|&id| {
            self.nodes
                .get(id)
                .map(|n| n.flags.contains(NodeFlags::NEEDS_PAINT))
                .unwrap_or(false)
        });
        batch
    }

    /// Returns the still-dirty semantics boundaries ascending by depth and
    /// clears their flags.
    pub fn flush_semantics(&mut self) -> Vec<RenderId> {
        let mut batch: Vec<RenderId> = self.dirty_semantics.drain().collect();
        batch.sort_by_key(|&id| self.depth_of(id));
        batch.retain(|&id| {
            self.nodes
                .get(id)
                .map(|n| n.flags.contains(NodeFlags::NEEDS_SEMANTICS))
                .unwrap_or(false)
        });
        for &id in &batch {
            if let Some(node) = self.nodes.get_mut(id) {
                node.flags.remove(NodeFlags::NEEDS_SEMANTICS);
            }
        }
        batch
    }

    pub(crate) fn clear_needs_paint(&mut self, id: RenderId) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.flags.remove(NodeFlags::NEEDS_PAINT);
        }
    }
}

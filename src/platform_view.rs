//! Geometry batching for embedded platform views.
//!
//! Painting records a [`ViewPlacement`] per embedded view each time the
//! owning subtree repaints. The registry dedupes those placements against a
//! per-view cache and forwards only real changes to the embedder, once per
//! frame. A view that goes unpainted in a frame keeps its last geometry;
//! cached-layer reuse legitimately skips repainting unchanged subtrees, so
//! absence from a batch carries no signal. Hiding a view is an explicit
//! [`PlatformViewRegistry::remove_view`].

use std::collections::HashMap;

use crate::layout::{Offset, Rect, Size};
use crate::render::ViewPlacement;

/// Resolved on-screen geometry of one embedded view, in logical coordinates
/// relative to the surface origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewGeometry {
    pub offset: Offset,
    pub size: Size,
    pub clip: Option<Rect>,
}

impl ViewGeometry {
    pub fn from_placement(placement: &ViewPlacement) -> Self {
        Self {
            offset: Offset::new(placement.rect.x, placement.rect.y),
            size: Size::new(placement.rect.width, placement.rect.height),
            clip: placement.clip,
        }
    }
}

/// Embedder side of the registry. Receives only geometry that actually
/// changed, plus removals.
pub trait GeometryChannel: Send {
    fn set_geometry(&mut self, view_id: i64, geometry: &ViewGeometry);
    fn remove_view(&mut self, view_id: i64);
}

/// Per-view geometry cache with frame-batched change forwarding.
#[derive(Default)]
pub struct PlatformViewRegistry {
    cache: HashMap<i64, ViewGeometry>,
    batch: Vec<(i64, ViewGeometry)>,
    in_batch: bool,
}

impl PlatformViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a frame's batch. Updates outside a batch are rejected.
    pub fn begin_batch(&mut self) {
        self.batch.clear();
        self.in_batch = true;
    }

    /// Stages one view's geometry. A no-op when the geometry matches the
    /// cache, so stable frames send nothing.
    pub fn update_view_geometry(&mut self, view_id: i64, geometry: ViewGeometry) {
        if !self.in_batch {
            log::debug!("view {view_id} geometry update outside a batch; dropped");
            return;
        }
        if self.cache.get(&view_id) == Some(&geometry) {
            return;
        }
        self.batch.retain(|(id, _)| *id != view_id);
        self.batch.push((view_id, geometry));
    }

    pub fn update_from_placement(&mut self, placement: &ViewPlacement) {
        self.update_view_geometry(placement.view_id, ViewGeometry::from_placement(placement));
    }

    /// Closes the batch, pushing staged changes to the channel and into the
    /// cache. Returns how many views changed.
    pub fn flush_batch(&mut self, channel: &mut dyn GeometryChannel) -> usize {
        self.in_batch = false;
        let staged = std::mem::take(&mut self.batch);
        let changed = staged.len();
        for (view_id, geometry) in staged {
            channel.set_geometry(view_id, &geometry);
            self.cache.insert(view_id, geometry);
        }
        changed
    }

    /// Drops a view from the cache and tells the embedder to hide it.
    pub fn remove_view(&mut self, view_id: i64, channel: &mut dyn GeometryChannel) {
        self.batch.retain(|(id, _)| *id != view_id);
        if self.cache.remove(&view_id).is_some() {
            channel.remove_view(view_id);
        }
    }

    pub fn known_views(&self) -> usize {
        self.cache.len()
    }
}

//! Build scheduling: which elements need rebuilding, and the depth-ordered
//! flush that drains them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, Weak};

use crate::element::{ElementId, ElementTree};

#[derive(Default)]
struct DirtyElements {
    set: HashSet<ElementId>,
    order: Vec<ElementId>,
}

/// Owns the dirty-element set. Cheap to share; all state is behind locks so
/// handles can schedule from any thread while the frame lock is held
/// elsewhere.
#[derive(Default)]
pub struct BuildOwner {
    dirty: Mutex<DirtyElements>,
    on_needs_frame: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl BuildOwner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_needs_frame(&self, callback: Arc<dyn Fn() + Send + Sync>) {
        *self.on_needs_frame.lock().unwrap() = Some(callback);
    }

    /// Adds an element to the dirty set. Fires the needs-frame callback only
    /// when membership actually changed.
    pub fn schedule_build(&self, element: ElementId) {
        let inserted = {
            let mut dirty = self.dirty.lock().unwrap();
            if dirty.set.insert(element) {
                dirty.order.push(element);
                true
            } else {
                false
            }
        };
        if inserted {
            let callback = self.on_needs_frame.lock().unwrap().clone();
            if let Some(cb) = callback {
                cb();
            }
        }
    }

    pub fn has_dirty_elements(&self) -> bool {
        !self.dirty.lock().unwrap().set.is_empty()
    }

    /// Whether the next frame has anything to do: dirty elements, or pending
    /// layout/paint/semantics in the pipeline.
    pub fn needs_work(&self, tree: &ElementTree) -> bool {
        self.has_dirty_elements() || tree.pipeline().needs_visual_work()
    }

    /// Rebuilds scheduled elements in depth order, parents first, so a parent
    /// rebuild that unmounts a child retires the child's entry before it is
    /// reached. Loops until a pass schedules nothing new.
    pub fn flush_build(&self, tree: &mut ElementTree) {
        loop {
            let mut batch = {
                let mut dirty = self.dirty.lock().unwrap();
                dirty.set.clear();
                std::mem::take(&mut dirty.order)
            };
            if batch.is_empty() {
                break;
            }
            batch.sort_by_key(|&id| tree.depth_of(id));
            log::trace!("flushing {} dirty elements", batch.len());
            // Flag up front: a parent rebuild that refreshes a child clears
            // the child's flag, so its entry is a no-op when the loop
            // reaches it.
            for &id in &batch {
                tree.flag_scheduled(id);
            }
            for id in batch {
                tree.rebuild_if_needed(id);
            }
        }
    }
}

/// A way for application code (state objects, async completions) to request
/// a rebuild of one element without holding the tree. Safe to use after the
/// element unmounted: the stale id is dropped at flush.
#[derive(Clone)]
pub struct RebuildHandle {
    element: ElementId,
    owner: Weak<BuildOwner>,
}

impl RebuildHandle {
    pub(crate) fn new(element: ElementId, owner: Weak<BuildOwner>) -> Self {
        Self { element, owner }
    }

    pub fn mark_needs_build(&self) {
        if let Some(owner) = self.owner.upgrade() {
            owner.schedule_build(self.element);
        }
    }
}

//! Built-in structural widgets: error capture, repaint isolation, and
//! constraint-dependent building.

use std::sync::Arc;

use crate::element::BuildCx;
use crate::errors::BuildError;
use crate::layout::{Constraints, Offset, Size};
use crate::render::{PipelineOwner, RenderBox, RenderId};
use crate::widgets::{
    AsAny, DeferredWidget, Key, RenderChildren, RenderWidget, State, StatefulWidget, Widget,
};

/// Captures build failures from its subtree and swaps in a fallback.
///
/// The nearest boundary above a failing element receives the error; the
/// failed subtree is dropped from the tree and the boundary rebuilds with
/// `fallback`. A new widget configuration clears the capture and retries
/// the child.
pub struct ErrorBoundary {
    key: Key,
    child: Option<Widget>,
    fallback: Arc<dyn Fn(&BuildError) -> Option<Widget> + Send + Sync>,
}

impl ErrorBoundary {
    pub fn new(
        child: Option<Widget>,
        fallback: impl Fn(&BuildError) -> Option<Widget> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: Key::None,
            child,
            fallback: Arc::new(fallback),
        }
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }
}

impl StatefulWidget for ErrorBoundary {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn create_state(&self) -> Box<dyn State> {
        Box::new(ErrorBoundaryState::default())
    }
}

#[derive(Default)]
pub(crate) struct ErrorBoundaryState {
    pub(crate) captured: Option<BuildError>,
}

impl State for ErrorBoundaryState {
    fn did_update_widget(&mut self, _old: &dyn StatefulWidget) {
        // A fresh configuration retries the child.
        self.captured = None;
    }

    fn build(&mut self, cx: &mut BuildCx) -> Option<Widget> {
        let Widget::Stateful(w) = cx.widget() else {
            return None;
        };
        let Some(boundary) = (*w).as_any().downcast_ref::<ErrorBoundary>() else {
            return None;
        };
        match &self.captured {
            Some(error) => (boundary.fallback)(error),
            None => boundary.child.clone(),
        }
    }
}

/// Isolates its subtree into a cached paint layer. Repaints below the
/// boundary re-record only that layer; ancestors keep referencing it.
pub struct RepaintBoundary {
    child: Option<Widget>,
}

impl RepaintBoundary {
    pub fn new(child: Option<Widget>) -> Self {
        Self { child }
    }
}

impl RenderWidget for RepaintBoundary {
    fn create_render(&self) -> Box<dyn RenderBox> {
        Box::new(RepaintBoundaryBox)
    }

    fn children(&self) -> RenderChildren {
        RenderChildren::Single(self.child.clone())
    }
}

/// Layout passthrough whose only job is being a repaint boundary.
struct RepaintBoundaryBox;

impl RenderBox for RepaintBoundaryBox {
    fn perform_layout(
        &mut self,
        tree: &mut PipelineOwner,
        id: RenderId,
        constraints: Constraints,
    ) -> Size {
        match tree.children_of(id).first().copied() {
            Some(child) => {
                tree.layout_child(child, constraints, true);
                tree.set_child_offset(child, Offset::zero());
                tree.size_of(child)
            }
            None => constraints.smallest(),
        }
    }

    fn is_repaint_boundary(&self) -> bool {
        true
    }
}

/// Defers building into the layout pass so the builder sees the real
/// incoming constraints. The builder reruns when the element is marked
/// dirty or when the constraints change, and is skipped otherwise.
pub struct LayoutBuilder {
    key: Key,
    builder: Arc<dyn Fn(&mut BuildCx, Constraints) -> Option<Widget> + Send + Sync>,
}

impl LayoutBuilder {
    pub fn new(
        builder: impl Fn(&mut BuildCx, Constraints) -> Option<Widget> + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: Key::None,
            builder: Arc::new(builder),
        }
    }

    pub fn with_key(mut self, key: Key) -> Self {
        self.key = key;
        self
    }
}

impl DeferredWidget for LayoutBuilder {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn build_deferred(&self, cx: &mut BuildCx, constraints: Constraints) -> Option<Widget> {
        (self.builder)(cx, constraints)
    }
}

//! Element tree: the retained middle layer between widget values and render
//! objects.
//!
//! Elements own identity and state. Reconciliation (in [`reconcile`]) decides
//! which elements survive a rebuild; this module owns their lifecycle:
//! mount, update, rebuild, unmount. Application build code runs behind a
//! panic guard so one failing widget cannot take the frame down.

pub mod build_owner;
mod reconcile;

pub use build_owner::{BuildOwner, RebuildHandle};
pub use reconcile::IndexedSlot;

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::arena::{Arena, Id};
use crate::errors::{BuildError, BuildPhase, DiagnosticSink, LogSink};
use crate::layout::{Constraints, Offset, Size};
use crate::render::{
    DeferredRequest, NodeFlags, PipelineOwner, RenderBox, RenderId,
};
use crate::widgets::{
    Aspect, AspectDeps, AsAny, DisposeStack, InheritedWidget, RenderChildren, State,
    StatelessWidget, Widget,
};
use crate::widgets::ErrorBoundary;

pub type ElementId = Id<ElementNode>;

/// Builds the widget shown in place of a failed subtree when no
/// [`ErrorBoundary`] ancestor captured the failure.
pub type ErrorWidgetBuilder = Arc<dyn Fn(&BuildError) -> Option<Widget> + Send + Sync>;

/// Explicit per-tree configuration; nothing here is process-global.
#[derive(Clone)]
pub struct TreeConfig {
    pub diagnostics: Arc<dyn DiagnosticSink>,
    pub error_widget: Option<ErrorWidgetBuilder>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            diagnostics: Arc::new(LogSink),
            error_widget: None,
        }
    }
}

pub(crate) enum ElementKind {
    Stateless {
        child: Option<ElementId>,
    },
    Stateful {
        state: Box<dyn State>,
        disposers: DisposeStack,
        child: Option<ElementId>,
    },
    Render {
        render: RenderId,
        children: Vec<ElementId>,
    },
    Inherited {
        child: Option<ElementId>,
        dependents: HashMap<ElementId, AspectDeps>,
    },
    Deferred {
        render: RenderId,
        child: Option<ElementId>,
        child_dirty: bool,
        previous_constraints: Option<Constraints>,
        has_built: bool,
    },
}

pub struct ElementNode {
    widget: Widget,
    parent: Option<ElementId>,
    depth: u32,
    slot: Option<IndexedSlot>,
    dirty: bool,
    mounted: bool,
    /// Render object of the nearest render-backed ancestor, cached at mount.
    render_parent: Option<RenderId>,
    pub(crate) kind: ElementKind,
}

/// Swapped into a stateful element while its real state is borrowed.
struct InertState;

impl State for InertState {
    fn build(&mut self, _cx: &mut BuildCx) -> Option<Widget> {
        None
    }
}

/// Shown where a build failed and nothing else handled it.
struct InertPlaceholder;

impl StatelessWidget for InertPlaceholder {
    fn build(&self, _cx: &mut BuildCx) -> Option<Widget> {
        None
    }
}

/// Pass-through render object hosted by a deferred element. Layout records a
/// build obligation carrying the real constraints; the element-side drain
/// runs the builder between layout passes.
pub(crate) struct DeferredSlotBox {
    pub(crate) element: Option<ElementId>,
}

impl RenderBox for DeferredSlotBox {
    fn perform_layout(
        &mut self,
        tree: &mut PipelineOwner,
        id: RenderId,
        constraints: Constraints,
    ) -> Size {
        if let Some(element) = self.element {
            tree.push_deferred_request(DeferredRequest {
                element,
                constraints,
            });
        }
        let children = tree.children_of(id);
        if let Some(&child) = children.first() {
            tree.layout_child(child, constraints, true);
            tree.set_child_offset(child, Offset::zero());
            tree.size_of(child)
        } else {
            constraints.smallest()
        }
    }
}

pub struct ElementTree {
    nodes: Arena<ElementNode>,
    root: Option<ElementId>,
    pipeline: PipelineOwner,
    owner: Arc<BuildOwner>,
    config: TreeConfig,
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl ElementTree {
    pub fn new(config: TreeConfig) -> Self {
        Self {
            nodes: Arena::new(),
            root: None,
            pipeline: PipelineOwner::new(),
            owner: Arc::new(BuildOwner::new()),
            config,
        }
    }

    pub fn build_owner(&self) -> &Arc<BuildOwner> {
        &self.owner
    }

    pub fn pipeline(&self) -> &PipelineOwner {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut PipelineOwner {
        &mut self.pipeline
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    pub fn set_diagnostics(&mut self, sink: Arc<dyn DiagnosticSink>) {
        self.config.diagnostics = sink;
    }

    pub fn set_error_widget(&mut self, builder: Option<ErrorWidgetBuilder>) {
        self.config.error_widget = builder;
    }

    pub fn root(&self) -> Option<ElementId> {
        self.root
    }

    pub fn element_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: ElementId) -> bool {
        self.nodes.contains(id)
    }

    pub fn depth_of(&self, id: ElementId) -> u32 {
        self.nodes.get(id).map(|n| n.depth).unwrap_or(0)
    }

    pub fn parent_of(&self, id: ElementId) -> Option<ElementId> {
        self.nodes.get(id).and_then(|n| n.parent)
    }

    pub fn widget_of(&self, id: ElementId) -> Option<Widget> {
        self.nodes.get(id).map(|n| n.widget.clone())
    }

    pub fn slot_of(&self, id: ElementId) -> Option<IndexedSlot> {
        self.nodes.get(id).and_then(|n| n.slot.clone())
    }

    pub fn is_dirty(&self, id: ElementId) -> bool {
        self.nodes.get(id).map(|n| n.dirty).unwrap_or(false)
    }

    /// Direct element children, regardless of kind.
    pub fn children_of(&self, id: ElementId) -> Vec<ElementId> {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(ElementKind::Stateless { child })
            | Some(ElementKind::Stateful { child, .. })
            | Some(ElementKind::Inherited { child, .. })
            | Some(ElementKind::Deferred { child, .. }) => child.iter().copied().collect(),
            Some(ElementKind::Render { children, .. }) => children.clone(),
            None => Vec::new(),
        }
    }

    /// The render object hosted directly by this element, if render-backed.
    pub fn render_object_of(&self, id: ElementId) -> Option<RenderId> {
        match self.nodes.get(id).map(|n| &n.kind) {
            Some(ElementKind::Render { render, .. })
            | Some(ElementKind::Deferred { render, .. }) => Some(*render),
            _ => None,
        }
    }

    /// First render object at or below `id`, in element order.
    pub fn first_render_object(&self, id: ElementId) -> Option<RenderId> {
        if let Some(render) = self.render_object_of(id) {
            return Some(render);
        }
        self.children_of(id)
            .into_iter()
            .find_map(|c| self.first_render_object(c))
    }

    // ---- root --------------------------------------------------------------

    /// Mounts, updates or removes the root widget, then points the pipeline
    /// at the root render object.
    pub fn set_root(&mut self, widget: Option<Widget>) -> Option<ElementId> {
        let old_root = self.root;
        let new_root = self.update_child(old_root, widget, None, None);
        self.root = new_root;
        if let Some(root) = new_root {
            if let Some(render) = self.first_render_object(root) {
                self.pipeline.set_root(render);
                self.pipeline.mark_needs_layout(render);
                self.pipeline.mark_needs_paint(render);
            }
        }
        new_root
    }

    // ---- scheduling --------------------------------------------------------

    pub fn mark_needs_build(&mut self, id: ElementId) {
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        if node.dirty || !node.mounted {
            return;
        }
        node.dirty = true;
        self.owner.schedule_build(id);
    }

    /// Entry point for the build flush. Skips elements a parent rebuild
    /// already brought up to date earlier in the same pass.
    pub fn rebuild_if_needed(&mut self, id: ElementId) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        if !node.mounted || !node.dirty {
            return;
        }
        self.perform_rebuild(id);
    }

    /// Handle-scheduled ids arrive without the in-tree flag; the flush sets
    /// it for the whole batch before draining.
    pub(crate) fn flag_scheduled(&mut self, id: ElementId) {
        if let Some(node) = self.nodes.get_mut(id) {
            if node.mounted {
                node.dirty = true;
            }
        }
    }

    // ---- lifecycle ---------------------------------------------------------

    pub(crate) fn mount(
        &mut self,
        widget: Widget,
        parent: Option<ElementId>,
        slot: Option<IndexedSlot>,
    ) -> ElementId {
        let (depth, render_parent) = match parent {
            Some(p) => {
                let node = self
                    .nodes
                    .get(p)
                    .unwrap_or_else(|| panic!("mount: parent element is gone"));
                let host = match &node.kind {
                    ElementKind::Render { render, .. }
                    | ElementKind::Deferred { render, .. } => Some(*render),
                    _ => node.render_parent,
                };
                (node.depth + 1, host)
            }
            None => (0, None),
        };

        let kind = match &widget {
            Widget::Stateless(_) => ElementKind::Stateless { child: None },
            Widget::Stateful(w) => ElementKind::Stateful {
                state: w.create_state(),
                disposers: DisposeStack::default(),
                child: None,
            },
            Widget::Render(w) => ElementKind::Render {
                render: self.pipeline.insert(w.create_render()),
                children: Vec::new(),
            },
            Widget::Inherited(_) => ElementKind::Inherited {
                child: None,
                dependents: HashMap::new(),
            },
            Widget::Deferred(_) => ElementKind::Deferred {
                render: self.pipeline.insert(Box::new(DeferredSlotBox { element: None })),
                child: None,
                child_dirty: true,
                previous_constraints: None,
                has_built: false,
            },
        };

        let id = self.nodes.insert(ElementNode {
            widget: widget.clone(),
            parent,
            depth,
            slot,
            dirty: false,
            mounted: true,
            render_parent,
            kind,
        });
        log::trace!("mounted {} as {:?} at depth {}", widget.type_name(), id, depth);

        // The render object attaches before any children exist, so child
        // render objects always find their host in place.
        if let Some(render) = self.render_object_of(id) {
            if let Some(host) = render_parent {
                self.pipeline.attach_child(host, render);
            }
            if matches!(widget, Widget::Deferred(_)) {
                self.pipeline.with_box_mut(render, |render_box, _| {
                    if let Some(slot_box) =
                        render_box.as_any_mut().downcast_mut::<DeferredSlotBox>()
                    {
                        slot_box.element = Some(id);
                    }
                });
                self.pipeline.mark_needs_layout(render);
            }
        }

        if matches!(widget, Widget::Stateful(_)) {
            let mut state = self.take_state(id);
            state.init(&mut BuildCx {
                tree: self,
                element: id,
            });
            self.restore_state(id, state);
        }

        self.perform_rebuild(id);
        id
    }

    pub(crate) fn unmount(&mut self, id: ElementId) {
        let children = self.children_of(id);
        for child in children {
            self.unmount(child);
        }
        let Some(mut node) = self.nodes.remove(id) else {
            return;
        };
        node.mounted = false;
        log::trace!("unmounted {} {:?}", node.widget.type_name(), id);
        match node.kind {
            ElementKind::Render { render, .. } | ElementKind::Deferred { render, .. } => {
                self.pipeline.detach(render);
            }
            ElementKind::Stateful { mut disposers, .. } => {
                disposers.run();
            }
            _ => {}
        }
        if self.root == Some(id) {
            self.root = None;
        }
    }

    /// Absorbs a compatible new widget into an existing element.
    pub(crate) fn update_element(&mut self, id: ElementId, new_widget: Widget) {
        let old_widget = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            std::mem::replace(&mut node.widget, new_widget.clone())
        };

        match &old_widget {
            Widget::Stateful(old) => {
                let old = old.clone();
                let mut state = self.take_state(id);
                state.did_update_widget(old.as_ref());
                self.restore_state(id, state);
            }
            Widget::Inherited(old) => {
                if let Widget::Inherited(new) = &new_widget {
                    self.notify_inherited_dependents(id, old.clone(), new.clone());
                }
            }
            _ => {}
        }
        self.perform_rebuild(id);
    }

    pub(crate) fn update_slot(&mut self, id: ElementId, slot: Option<IndexedSlot>) {
        let child = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            node.slot = slot.clone();
            match &node.kind {
                // Proxying elements hand their slot to their child; render
                // hosts own their position through the parent's child list.
                ElementKind::Stateless { child }
                | ElementKind::Stateful { child, .. }
                | ElementKind::Inherited { child, .. } => *child,
                ElementKind::Render { .. } | ElementKind::Deferred { .. } => None,
            }
        };
        if let Some(child) = child {
            self.update_slot(child, slot);
        }
    }

    // ---- rebuild -----------------------------------------------------------

    fn perform_rebuild(&mut self, id: ElementId) {
        let (widget, slot) = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            if !node.mounted {
                return;
            }
            node.dirty = false;
            (node.widget.clone(), node.slot.clone())
        };

        match widget {
            Widget::Stateless(w) => {
                let name = (*w).type_name();
                let built = self.safe_build(name, id, |tree| {
                    w.build(&mut BuildCx { tree, element: id })
                });
                self.reconcile_single_child(id, built, slot);
            }
            Widget::Stateful(w) => {
                let name = (*w).type_name();
                let mut state = self.take_state(id);
                let built = self.safe_build(name, id, |tree| {
                    state.build(&mut BuildCx { tree, element: id })
                });
                self.restore_state(id, state);
                self.reconcile_single_child(id, built, slot);
            }
            Widget::Inherited(w) => {
                self.reconcile_single_child(id, w.child(), slot);
            }
            Widget::Render(w) => {
                let Some(render) = self.render_object_of(id) else {
                    return;
                };
                let flags = self
                    .pipeline
                    .with_box_mut(render, |render_box, _| w.update_render(render_box))
                    .unwrap_or(NodeFlags::empty());
                if flags.contains(NodeFlags::NEEDS_LAYOUT) {
                    self.pipeline.mark_needs_layout(render);
                }
                if flags.contains(NodeFlags::NEEDS_PAINT) {
                    self.pipeline.mark_needs_paint(render);
                }
                if flags.contains(NodeFlags::NEEDS_SEMANTICS) {
                    self.pipeline.mark_needs_semantics(render);
                }

                let new_widgets = match w.children() {
                    RenderChildren::Leaf => Vec::new(),
                    RenderChildren::Single(child) => child.into_iter().collect(),
                    RenderChildren::Multi(children) => children,
                };
                let old_children = match self.nodes.get(id).map(|n| &n.kind) {
                    Some(ElementKind::Render { children, .. }) => children.clone(),
                    _ => Vec::new(),
                };
                let new_children = self.update_children(id, old_children, new_widgets);
                if let Some(node) = self.nodes.get_mut(id) {
                    if let ElementKind::Render { children, .. } = &mut node.kind {
                        *children = new_children.clone();
                    }
                }
                self.sync_render_children(id, render, &new_children);
            }
            Widget::Deferred(_) => {
                // Build-phase dirt converts into layout work; the builder
                // itself runs with real constraints during the layout drain.
                let Some(render) = self.render_object_of(id) else {
                    return;
                };
                if let Some(node) = self.nodes.get_mut(id) {
                    if let ElementKind::Deferred { child_dirty, .. } = &mut node.kind {
                        *child_dirty = true;
                    }
                }
                self.pipeline.mark_needs_layout(render);
            }
        }
    }

    fn reconcile_single_child(
        &mut self,
        id: ElementId,
        built: Option<Widget>,
        slot: Option<IndexedSlot>,
    ) {
        let old_child = self.children_of(id).first().copied();
        let new_child = self.update_child(old_child, built, Some(id), slot);
        if let Some(node) = self.nodes.get_mut(id) {
            match &mut node.kind {
                ElementKind::Stateless { child }
                | ElementKind::Stateful { child, .. }
                | ElementKind::Inherited { child, .. }
                | ElementKind::Deferred { child, .. } => *child = new_child,
                ElementKind::Render { .. } => {}
            }
        }
    }

    fn sync_render_children(&mut self, id: ElementId, render: RenderId, children: &[ElementId]) {
        let _ = id;
        let mut list = Vec::new();
        for &child in children {
            self.collect_render_objects(child, &mut list);
        }
        self.pipeline.set_children(render, list);
    }

    /// Topmost render objects below an element, in element order.
    fn collect_render_objects(&self, id: ElementId, out: &mut Vec<RenderId>) {
        if let Some(render) = self.render_object_of(id) {
            out.push(render);
            return;
        }
        for child in self.children_of(id) {
            self.collect_render_objects(child, out);
        }
    }

    // ---- state plumbing ----------------------------------------------------

    fn take_state(&mut self, id: ElementId) -> Box<dyn State> {
        let node = self
            .nodes
            .get_mut(id)
            .unwrap_or_else(|| panic!("take_state: element is gone"));
        match &mut node.kind {
            ElementKind::Stateful { state, .. } => {
                std::mem::replace(state, Box::new(InertState))
            }
            _ => panic!("take_state: element is not stateful"),
        }
    }

    fn restore_state(&mut self, id: ElementId, new_state: Box<dyn State>) {
        if let Some(node) = self.nodes.get_mut(id) {
            if let ElementKind::Stateful { state, .. } = &mut node.kind {
                *state = new_state;
            }
        }
    }

    /// Runs `f` against the captured state of a stateful element, if the
    /// state has the expected concrete type.
    pub fn with_state_mut<S: State, R>(
        &mut self,
        id: ElementId,
        f: impl FnOnce(&mut S) -> R,
    ) -> Option<R> {
        let mut state = match self.nodes.get_mut(id).map(|n| &mut n.kind) {
            Some(ElementKind::Stateful { state, .. }) => {
                std::mem::replace(state, Box::new(InertState))
            }
            _ => return None,
        };
        let result = (&mut *state as &mut dyn std::any::Any)
            .downcast_mut::<S>()
            .map(f);
        self.restore_state(id, state);
        result
    }

    // ---- error containment -------------------------------------------------

    /// Runs an application build behind a panic guard. A panic becomes a
    /// [`BuildError`]: reported once, then resolved to a boundary capture,
    /// the configured fallback widget, or an inert placeholder.
    fn safe_build(
        &mut self,
        widget_name: &'static str,
        id: ElementId,
        build: impl FnOnce(&mut Self) -> Option<Widget>,
    ) -> Option<Widget> {
        match catch_unwind(AssertUnwindSafe(|| build(self))) {
            Ok(widget) => widget,
            Err(payload) => {
                let error = BuildError::from_panic(BuildPhase::Build, widget_name, payload);
                self.config.diagnostics.report(&error);
                self.resolve_build_error(id, error)
            }
        }
    }

    fn resolve_build_error(&mut self, id: ElementId, error: BuildError) -> Option<Widget> {
        if let Some(boundary) = self.find_error_boundary(id) {
            let delivered = self.with_state_mut(
                boundary,
                |state: &mut crate::widgets::ErrorBoundaryState| {
                    state.captured = Some(error.clone());
                },
            );
            if delivered.is_some() {
                self.mark_needs_build(boundary);
                return None;
            }
        }
        if let Some(builder) = self.config.error_widget.clone() {
            return builder(&error);
        }
        Some(Widget::stateless(InertPlaceholder))
    }

    fn find_error_boundary(&self, from: ElementId) -> Option<ElementId> {
        let mut cursor = self.parent_of(from);
        while let Some(el) = cursor {
            if let Some(Widget::Stateful(w)) = self.widget_of(el) {
                // Deref past the Arc so the check sees the widget's type.
                if (*w).as_any().is::<ErrorBoundary>() {
                    return Some(el);
                }
            }
            cursor = self.parent_of(el);
        }
        None
    }

    // ---- inherited dependencies --------------------------------------------

    fn find_inherited_ancestor<W: InheritedWidget + 'static>(
        &self,
        from: ElementId,
    ) -> Option<(ElementId, Arc<dyn InheritedWidget>)> {
        let mut cursor = self.parent_of(from);
        while let Some(el) = cursor {
            if let Some(node) = self.nodes.get(el) {
                if matches!(node.kind, ElementKind::Inherited { .. }) {
                    if let Widget::Inherited(w) = &node.widget {
                        if (**w).as_any().is::<W>() {
                            return Some((el, w.clone()));
                        }
                    }
                }
            }
            cursor = self.parent_of(el);
        }
        None
    }

    fn register_dependent(
        &mut self,
        provider: ElementId,
        dependent: ElementId,
        aspect: Option<Aspect>,
    ) {
        if let Some(node) = self.nodes.get_mut(provider) {
            if let ElementKind::Inherited { dependents, .. } = &mut node.kind {
                let deps = dependents.entry(dependent).or_default();
                match aspect {
                    None => deps.add_all(),
                    Some(a) => deps.add(a),
                }
            }
        }
    }

    fn notify_inherited_dependents(
        &mut self,
        id: ElementId,
        old: Arc<dyn InheritedWidget>,
        new: Arc<dyn InheritedWidget>,
    ) {
        if !new.update_should_notify(old.as_ref()) {
            return;
        }
        let dependents: Vec<(ElementId, AspectDeps)> =
            match self.nodes.get(id).map(|n| &n.kind) {
                Some(ElementKind::Inherited { dependents, .. }) => {
                    dependents.iter().map(|(k, v)| (*k, v.clone())).collect()
                }
                _ => return,
            };
        let mut dead = Vec::new();
        for (dependent, deps) in dependents {
            if !self.nodes.contains(dependent) {
                dead.push(dependent);
                continue;
            }
            let notify = new
                .update_should_notify_dependent(old.as_ref(), &deps)
                .unwrap_or(true);
            if !notify {
                continue;
            }
            if matches!(
                self.nodes.get(dependent).map(|n| &n.kind),
                Some(ElementKind::Stateful { .. })
            ) {
                let mut state = self.take_state(dependent);
                state.did_change_dependencies();
                self.restore_state(dependent, state);
            }
            self.mark_needs_build(dependent);
        }
        if !dead.is_empty() {
            if let Some(node) = self.nodes.get_mut(id) {
                if let ElementKind::Inherited { dependents, .. } = &mut node.kind {
                    for d in dead {
                        dependents.remove(&d);
                    }
                }
            }
        }
    }

    // ---- deferred builds ---------------------------------------------------

    /// Runs the deferred builder for one element, if its dirty state or a
    /// constraints change calls for it, and reconciles the built subtree.
    pub(crate) fn deferred_layout_callback(&mut self, id: ElementId, constraints: Constraints) {
        let (widget, render, should_build, slot) = {
            let Some(node) = self.nodes.get_mut(id) else {
                return;
            };
            if !node.mounted {
                return;
            }
            let Widget::Deferred(w) = node.widget.clone() else {
                return;
            };
            let slot = node.slot.clone();
            match &mut node.kind {
                ElementKind::Deferred {
                    render,
                    child_dirty,
                    previous_constraints,
                    has_built,
                    ..
                } => {
                    let should = *child_dirty
                        || !*has_built
                        || *previous_constraints != Some(constraints);
                    *child_dirty = false;
                    *previous_constraints = Some(constraints);
                    *has_built = true;
                    (w, *render, should, slot)
                }
                _ => return,
            }
        };
        if !should_build {
            return;
        }
        let name = (*widget).type_name();
        let built = self.safe_build(name, id, |tree| {
            widget.build_deferred(&mut BuildCx { tree, element: id }, constraints)
        });
        self.reconcile_single_child(id, built, slot);
        let children = self.children_of(id);
        self.sync_render_children(id, render, &children);
    }

    /// The layout phase: alternates render-side boundary drains with
    /// deferred-build callbacks until both are exhausted.
    pub fn flush_layout_for_root(&mut self, constraints: Constraints) {
        let Some(root) = self.pipeline.root() else {
            return;
        };
        loop {
            self.pipeline.flush_layout(root, constraints);
            let requests = self.pipeline.take_deferred_requests();
            if requests.is_empty() {
                break;
            }
            for request in requests {
                self.deferred_layout_callback(request.element, request.constraints);
            }
        }
    }
}

/// Capabilities handed to application build code: ancestor lookups,
/// inherited-value dependencies, rebuild handles and disposal registration.
pub struct BuildCx<'a> {
    tree: &'a mut ElementTree,
    element: ElementId,
}

impl<'a> BuildCx<'a> {
    pub fn element(&self) -> ElementId {
        self.element
    }

    pub fn widget(&self) -> Widget {
        self.tree
            .widget_of(self.element)
            .unwrap_or_else(|| panic!("build context for a dead element"))
    }

    /// A handle the state can keep to request rebuilds later, from any
    /// thread. Stale after unmount, and harmless then.
    pub fn rebuild_handle(&self) -> RebuildHandle {
        RebuildHandle::new(self.element, Arc::downgrade(&self.tree.owner))
    }

    /// Registers a cleanup to run when this element unmounts. Only stateful
    /// elements carry a dispose stack.
    pub fn on_dispose(&mut self, f: impl FnOnce() + Send + 'static) {
        if let Some(node) = self.tree.nodes.get_mut(self.element) {
            if let ElementKind::Stateful { disposers, .. } = &mut node.kind {
                disposers.push(f);
                return;
            }
        }
        log::debug!("on_dispose outside a stateful element; running immediately");
        f();
    }

    pub fn find_ancestor(&self, pred: impl Fn(&Widget) -> bool) -> Option<ElementId> {
        let mut cursor = self.tree.parent_of(self.element);
        while let Some(el) = cursor {
            if let Some(w) = self.tree.widget_of(el) {
                if pred(&w) {
                    return Some(el);
                }
            }
            cursor = self.tree.parent_of(el);
        }
        None
    }

    /// Reads an inherited value without registering a dependency.
    pub fn read_inherited<W: InheritedWidget + 'static, R>(
        &self,
        f: impl FnOnce(&W) -> R,
    ) -> Option<R> {
        let (_, widget) = self.tree.find_inherited_ancestor::<W>(self.element)?;
        (*widget).as_any().downcast_ref::<W>().map(f)
    }

    /// Reads an inherited value and subscribes to every future change.
    pub fn depend_on_inherited<W: InheritedWidget + 'static, R>(
        &mut self,
        f: impl FnOnce(&W) -> R,
    ) -> Option<R> {
        self.depend_inner(None, f)
    }

    /// Reads an inherited value, subscribing only to `aspect`. Aspect sets
    /// accumulate across builds.
    pub fn depend_on_inherited_aspect<W: InheritedWidget + 'static, R>(
        &mut self,
        aspect: Aspect,
        f: impl FnOnce(&W) -> R,
    ) -> Option<R> {
        self.depend_inner(Some(aspect), f)
    }

    fn depend_inner<W: InheritedWidget + 'static, R>(
        &mut self,
        aspect: Option<Aspect>,
        f: impl FnOnce(&W) -> R,
    ) -> Option<R> {
        let (provider, widget) = self.tree.find_inherited_ancestor::<W>(self.element)?;
        self.tree.register_dependent(provider, self.element, aspect);
        (*widget).as_any().downcast_ref::<W>().map(f)
    }
}

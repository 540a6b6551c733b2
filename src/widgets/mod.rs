//! Widget model: immutable configuration values, the capability traits
//! behind them, and mutable state for stateful widgets.
//!
//! A [`Widget`] is cheap to clone (the payload sits behind an `Arc`) and
//! carries no identity of its own; identity lives in the element tree. The
//! closed set of variants makes the element inflation path a single match
//! instead of a chain of downcasts.

mod error_boundary;

pub use error_boundary::{ErrorBoundary, LayoutBuilder, RepaintBoundary};
pub(crate) use error_boundary::ErrorBoundaryState;

use std::any::{Any, TypeId};
use std::collections::HashSet;
use std::sync::Arc;

use crate::element::BuildCx;
use crate::layout::Constraints;
use crate::render::{NodeFlags, RenderBox};

/// Object-safe access to the concrete type behind a trait object.
/// Blanket-implemented; widget authors never write it by hand.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Reconciliation identity refinement.
///
/// `Never` is the escape hatch for payloads without a usable equality: it
/// compares unequal to everything, itself included, which forces a fresh
/// element on every update.
#[derive(Debug, Clone, Default)]
pub enum Key {
    #[default]
    None,
    Index(i64),
    Text(String),
    Never,
}

impl Key {
    pub fn matches(&self, other: &Key) -> bool {
        match (self, other) {
            (Key::None, Key::None) => true,
            (Key::Index(a), Key::Index(b)) => a == b,
            (Key::Text(a), Key::Text(b)) => a == b,
            _ => false,
        }
    }

    /// The hashable identity used by the keyed phase of list reconciliation.
    /// `None` and `Never` keys take the positional path instead.
    pub(crate) fn equatable(&self) -> Option<EquatableKey> {
        match self {
            Key::Index(i) => Some(EquatableKey::Index(*i)),
            Key::Text(t) => Some(EquatableKey::Text(t.clone())),
            Key::None | Key::Never => None,
        }
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        self.matches(other)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum EquatableKey {
    Index(i64),
    Text(String),
}

/// Named facet of an inherited value, for partial dependency registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Aspect(pub &'static str);

/// What one dependent element registered against an inherited ancestor.
/// The set only grows for the life of the dependent.
#[derive(Debug, Clone, Default)]
pub struct AspectDeps {
    depends_on_all: bool,
    aspects: HashSet<Aspect>,
}

impl AspectDeps {
    pub fn depends_on_all(&self) -> bool {
        self.depends_on_all
    }

    pub fn aspects(&self) -> &HashSet<Aspect> {
        &self.aspects
    }

    pub(crate) fn add_all(&mut self) {
        self.depends_on_all = true;
    }

    pub(crate) fn add(&mut self, aspect: Aspect) {
        self.aspects.insert(aspect);
    }
}

#[derive(Clone)]
pub enum Widget {
    Stateless(Arc<dyn StatelessWidget>),
    Stateful(Arc<dyn StatefulWidget>),
    Render(Arc<dyn RenderWidget>),
    Inherited(Arc<dyn InheritedWidget>),
    Deferred(Arc<dyn DeferredWidget>),
}

impl Widget {
    pub fn stateless(widget: impl StatelessWidget + 'static) -> Self {
        Widget::Stateless(Arc::new(widget))
    }

    pub fn stateful(widget: impl StatefulWidget + 'static) -> Self {
        Widget::Stateful(Arc::new(widget))
    }

    pub fn render(widget: impl RenderWidget + 'static) -> Self {
        Widget::Render(Arc::new(widget))
    }

    pub fn inherited(widget: impl InheritedWidget + 'static) -> Self {
        Widget::Inherited(Arc::new(widget))
    }

    pub fn deferred(widget: impl DeferredWidget + 'static) -> Self {
        Widget::Deferred(Arc::new(widget))
    }

    pub fn key(&self) -> Key {
        match self {
            Widget::Stateless(w) => w.key(),
            Widget::Stateful(w) => w.key(),
            Widget::Render(w) => w.key(),
            Widget::Inherited(w) => w.key(),
            Widget::Deferred(w) => w.key(),
        }
    }

    // The explicit derefs reach the trait object behind the Arc; calling
    // through the Arc would resolve the blanket `AsAny` on the Arc itself
    // and report the pointer's type, not the widget's.
    pub fn concrete_type(&self) -> TypeId {
        match self {
            Widget::Stateless(w) => (**w).as_any().type_id(),
            Widget::Stateful(w) => (**w).as_any().type_id(),
            Widget::Render(w) => (**w).as_any().type_id(),
            Widget::Inherited(w) => (**w).as_any().type_id(),
            Widget::Deferred(w) => (**w).as_any().type_id(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Widget::Stateless(w) => (**w).type_name(),
            Widget::Stateful(w) => (**w).type_name(),
            Widget::Render(w) => (**w).type_name(),
            Widget::Inherited(w) => (**w).type_name(),
            Widget::Deferred(w) => (**w).type_name(),
        }
    }

    /// Whether an element configured by `self` can absorb `new` in place.
    /// Same variant, same concrete type, matching keys.
    pub fn can_update(&self, new: &Widget) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(new)
            && self.concrete_type() == new.concrete_type()
            && self.key().matches(&new.key())
    }
}

impl std::fmt::Debug for Widget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Widget({})", self.type_name())
    }
}

pub trait StatelessWidget: AsAny + Send + Sync {
    fn key(&self) -> Key {
        Key::None
    }

    fn build(&self, cx: &mut BuildCx) -> Option<Widget>;
}

pub trait StatefulWidget: AsAny + Send + Sync {
    fn key(&self) -> Key {
        Key::None
    }

    fn create_state(&self) -> Box<dyn State>;
}

/// Child arity of a render-backed widget. Fixed for a given widget type.
pub enum RenderChildren {
    Leaf,
    Single(Option<Widget>),
    Multi(Vec<Widget>),
}

pub trait RenderWidget: AsAny + Send + Sync {
    fn key(&self) -> Key {
        Key::None
    }

    fn create_render(&self) -> Box<dyn RenderBox>;

    /// Pushes changed configuration into an existing render object. The
    /// returned flags say what the change invalidates; the element applies
    /// the corresponding marks on the node.
    fn update_render(&self, render: &mut dyn RenderBox) -> NodeFlags {
        let _ = render;
        NodeFlags::empty()
    }

    fn children(&self) -> RenderChildren {
        RenderChildren::Leaf
    }
}

pub trait InheritedWidget: AsAny + Send + Sync {
    fn key(&self) -> Key {
        Key::None
    }

    fn child(&self) -> Option<Widget>;

    /// Coarse gate: did the exposed value change at all?
    fn update_should_notify(&self, old: &dyn InheritedWidget) -> bool;

    /// Aspect-aware refinement, consulted per dependent once the coarse gate
    /// passed. `None` means the widget is not aspect-aware and the coarse
    /// gate alone decides for every dependent.
    fn update_should_notify_dependent(
        &self,
        old: &dyn InheritedWidget,
        deps: &AspectDeps,
    ) -> Option<bool> {
        let _ = (old, deps);
        None
    }
}

/// A widget whose build needs real layout constraints. Its element defers
/// building into the layout pass.
pub trait DeferredWidget: AsAny + Send + Sync {
    fn key(&self) -> Key {
        Key::None
    }

    fn build_deferred(&self, cx: &mut BuildCx, constraints: Constraints) -> Option<Widget>;
}

/// Mutable companion of a [`StatefulWidget`], owned by its element.
pub trait State: Any + Send {
    /// Runs once after mount, before the first build.
    fn init(&mut self, cx: &mut BuildCx) {
        let _ = cx;
    }

    /// Runs when the element absorbed a new widget of the same type.
    fn did_update_widget(&mut self, old: &dyn StatefulWidget) {
        let _ = old;
    }

    /// Runs when an inherited value this element depends on changed.
    fn did_change_dependencies(&mut self) {}

    fn build(&mut self, cx: &mut BuildCx) -> Option<Widget>;
}

/// LIFO cleanup registrations for a stateful element.
///
/// Runs each closure exactly once, in reverse registration order. Once
/// disposed, new registrations run immediately.
#[derive(Default)]
pub struct DisposeStack {
    disposers: Vec<Box<dyn FnOnce() + Send>>,
    disposed: bool,
}

impl DisposeStack {
    pub fn push(&mut self, f: impl FnOnce() + Send + 'static) {
        if self.disposed {
            f();
        } else {
            self.disposers.push(Box::new(f));
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn run(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        while let Some(f) = self.disposers.pop() {
            f();
        }
    }
}

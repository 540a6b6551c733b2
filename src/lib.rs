//! trellis: a declarative widget tree runtime.
//!
//! Applications describe their UI as a tree of immutable [`widgets::Widget`]
//! values; the runtime reconciles those descriptions into a persistent
//! element tree, lays out and paints a parallel render tree with
//! boundary-aware dirty tracking, and composites cached layers into a frame.
//! The graphics backend, input handling, and platform embedding stay outside:
//! the embedder hands a [`render::Canvas`] and a logical size to
//! [`frame::FrameScheduler::draw_frame`] whenever
//! [`frame::FrameScheduler::needs_frame`] says so.

pub mod arena;
pub mod dispatch;
pub mod element;
pub mod errors;
pub mod frame;
pub mod layout;
pub mod platform_view;
pub mod render;
pub mod semantics;
pub mod widgets;

pub mod prelude {
    pub use crate::element::{BuildCx, ElementId, ElementTree, RebuildHandle, TreeConfig};
    pub use crate::errors::{BuildError, DiagnosticSink};
    pub use crate::frame::{FrameScheduler, Ticker};
    pub use crate::layout::{Constraints, Offset, Rect, Size};
    pub use crate::render::{
        Canvas, Color, NodeFlags, Paint, PipelineOwner, RenderBox, RenderId,
    };
    pub use crate::widgets::{
        Aspect, DeferredWidget, ErrorBoundary, InheritedWidget, Key, LayoutBuilder,
        RenderChildren, RenderWidget, RepaintBoundary, State, StatefulWidget, StatelessWidget,
        Widget,
    };
}

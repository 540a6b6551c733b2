//! Painting: replayable display lists, persistent boundary layers, and the
//! paint context used by render boxes.
//!
//! A repaint boundary's layer is referenced by ancestor display lists through
//! an `Arc`. Re-recording a boundary swaps the layer's contents, so ancestors
//! see updated pixels at composite time without re-recording themselves.

use std::sync::{Arc, Mutex};

use crate::layout::{Offset, Rect, Size};
use crate::render::{PipelineOwner, RenderId};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PaintStyle {
    Fill,
    Stroke { width: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Paint {
    pub color: Color,
    pub style: PaintStyle,
}

impl Paint {
    pub fn fill(color: Color) -> Self {
        Self {
            color,
            style: PaintStyle::Fill,
        }
    }

    pub fn stroke(color: Color, width: f64) -> Self {
        Self {
            color,
            style: PaintStyle::Stroke { width },
        }
    }
}

/// The drawing capability the runtime paints into. Rasterization lives on
/// the other side of this trait.
pub trait Canvas {
    fn save(&mut self);
    fn restore(&mut self);
    fn translate(&mut self, dx: f64, dy: f64);
    fn scale(&mut self, sx: f64, sy: f64);
    fn clip_rect(&mut self, rect: Rect);
    fn clear(&mut self, color: Color);
    fn draw_rect(&mut self, rect: Rect, paint: &Paint);

    /// Draws a boundary layer's current contents. Immediate-mode canvases
    /// replay; recorders override to store the reference instead.
    fn draw_cached_layer(&mut self, layer: &Arc<PaintLayer>) {
        layer.replay_onto(self);
    }
}

#[derive(Debug, Clone)]
pub enum DrawOp {
    Save,
    Restore,
    Translate(f64, f64),
    Scale(f64, f64),
    ClipRect(Rect),
    Clear(Color),
    Rect(Rect, Paint),
    /// Reference to another boundary's layer, resolved at replay time.
    Layer(Arc<PaintLayer>),
}

#[derive(Debug, Clone, Default)]
pub struct DisplayList {
    ops: Vec<DrawOp>,
}

impl DisplayList {
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn push(&mut self, op: DrawOp) {
        self.ops.push(op);
    }

    pub fn replay_onto<C: Canvas + ?Sized>(&self, canvas: &mut C) {
        for op in &self.ops {
            match op {
                DrawOp::Save => canvas.save(),
                DrawOp::Restore => canvas.restore(),
                DrawOp::Translate(dx, dy) => canvas.translate(*dx, *dy),
                DrawOp::Scale(sx, sy) => canvas.scale(*sx, *sy),
                DrawOp::ClipRect(rect) => canvas.clip_rect(*rect),
                DrawOp::Clear(color) => canvas.clear(*color),
                DrawOp::Rect(rect, paint) => canvas.draw_rect(*rect, paint),
                DrawOp::Layer(layer) => canvas.draw_cached_layer(layer),
            }
        }
    }
}

/// Persistent recording for one repaint boundary. Identity is the `Arc`;
/// contents swap on re-record.
pub struct PaintLayer {
    contents: Mutex<DisplayList>,
}

impl PaintLayer {
    pub fn new() -> Self {
        Self {
            contents: Mutex::new(DisplayList::default()),
        }
    }

    pub fn replace(&self, list: DisplayList) {
        *self.contents.lock().unwrap() = list;
    }

    pub fn op_count(&self) -> usize {
        self.contents.lock().unwrap().len()
    }

    pub fn replay_onto<C: Canvas + ?Sized>(&self, canvas: &mut C) {
        // Layers form a tree, so nested replays lock distinct layers.
        self.contents.lock().unwrap().replay_onto(canvas);
    }
}

impl Default for PaintLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PaintLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaintLayer({} ops)", self.op_count())
    }
}

/// Records canvas calls into a display list.
#[derive(Default)]
pub struct PictureRecorder {
    list: DisplayList,
}

impl PictureRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> DisplayList {
        self.list
    }
}

impl Canvas for PictureRecorder {
    fn save(&mut self) {
        self.list.push(DrawOp::Save);
    }

    fn restore(&mut self) {
        self.list.push(DrawOp::Restore);
    }

    fn translate(&mut self, dx: f64, dy: f64) {
        self.list.push(DrawOp::Translate(dx, dy));
    }

    fn scale(&mut self, sx: f64, sy: f64) {
        self.list.push(DrawOp::Scale(sx, sy));
    }

    fn clip_rect(&mut self, rect: Rect) {
        self.list.push(DrawOp::ClipRect(rect));
    }

    fn clear(&mut self, color: Color) {
        self.list.push(DrawOp::Clear(color));
    }

    fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.list.push(DrawOp::Rect(rect, *paint));
    }

    fn draw_cached_layer(&mut self, layer: &Arc<PaintLayer>) {
        self.list.push(DrawOp::Layer(layer.clone()));
    }
}

/// Where an embedded native view ended up this frame, in logical root
/// coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewPlacement {
    pub view_id: i64,
    pub rect: Rect,
    pub clip: Option<Rect>,
}

/// Carries the canvas plus the absolute-coordinate bookkeeping painting
/// needs: canvas ops are layer-local, platform-view geometry is absolute.
pub struct PaintContext<'a> {
    canvas: &'a mut dyn Canvas,
    origin: Offset,
    clip_stack: Vec<Rect>,
    views: Vec<ViewPlacement>,
}

impl<'a> PaintContext<'a> {
    pub fn new(canvas: &'a mut dyn Canvas) -> Self {
        Self::with_origin(canvas, Offset::zero())
    }

    pub fn with_origin(canvas: &'a mut dyn Canvas, origin: Offset) -> Self {
        Self {
            canvas,
            origin,
            clip_stack: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn canvas(&mut self) -> &mut dyn Canvas {
        self.canvas
    }

    pub fn draw_rect(&mut self, rect: Rect, paint: &Paint) {
        self.canvas.draw_rect(rect, paint);
    }

    /// Clips this box's subtree to `rect` (local coordinates). Unwinds when
    /// the box's paint returns.
    pub fn clip_rect(&mut self, rect: Rect) {
        self.canvas.clip_rect(rect);
        self.clip_stack
            .push(rect.translate(self.origin.dx, self.origin.dy));
    }

    fn current_clip(&self) -> Option<Rect> {
        let mut iter = self.clip_stack.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| {
            let x = acc.x.max(r.x);
            let y = acc.y.max(r.y);
            let right = (acc.x + acc.width).min(r.x + r.width);
            let bottom = (acc.y + acc.height).min(r.y + r.height);
            Rect::new(x, y, (right - x).max(0.0), (bottom - y).max(0.0))
        }))
    }

    pub fn take_views(&mut self) -> Vec<ViewPlacement> {
        std::mem::take(&mut self.views)
    }

    /// Paints one child at `offset` in the current box's coordinates. Clean
    /// repaint boundaries contribute their cached layer by reference; dirty
    /// ones do too, because their layer is re-recorded in the same flush.
    pub fn paint_child(&mut self, tree: &mut PipelineOwner, child: RenderId, offset: Offset) {
        if !tree.contains(child) {
            return;
        }
        if tree.is_repaint_boundary(child) {
            let layer = tree.ensure_layer(child);
            self.canvas.save();
            self.canvas.translate(offset.dx, offset.dy);
            self.canvas.draw_cached_layer(&layer);
            self.canvas.restore();
            return;
        }

        let absolute = self.origin + offset;
        tree.clear_needs_paint(child);
        if let Some(view_id) = tree.platform_view_id(child) {
            self.views.push(ViewPlacement {
                view_id,
                rect: Rect::from_offset_size(absolute, tree.size_of(child)),
                clip: self.current_clip(),
            });
        }

        self.canvas.save();
        self.canvas.translate(offset.dx, offset.dy);
        let saved_origin = self.origin;
        let clip_depth = self.clip_stack.len();
        self.origin = absolute;
        tree.with_box_mut(child, |render_box, tree| {
            render_box.paint(tree, child, self);
        });
        self.origin = saved_origin;
        self.clip_stack.truncate(clip_depth);
        self.canvas.restore();
    }
}

/// Re-records one repaint boundary into its persistent layer. Returns the
/// platform-view placements discovered while recording.
pub fn paint_boundary_to_layer(tree: &mut PipelineOwner, id: RenderId) -> Vec<ViewPlacement> {
    if !tree.contains(id) {
        return Vec::new();
    }
    let origin = tree.absolute_origin(id);
    let layer = tree.ensure_layer(id);
    let mut recorder = PictureRecorder::new();
    let views = {
        let mut ctx = PaintContext::with_origin(&mut recorder, origin);
        tree.clear_needs_paint(id);
        if let Some(view_id) = tree.platform_view_id(id) {
            ctx.views.push(ViewPlacement {
                view_id,
                rect: Rect::from_offset_size(origin, tree.size_of(id)),
                clip: None,
            });
        }
        tree.with_box_mut(id, |render_box, tree| {
            render_box.paint(tree, id, &mut ctx);
        });
        ctx.take_views()
    };
    layer.replace(recorder.finish());
    views
}

/// Paints the tree onto `canvas`, substituting cached layers for repaint
/// boundaries. Runs after the paint flush, when every layer is current.
pub fn composite_frame(
    tree: &mut PipelineOwner,
    root: RenderId,
    canvas: &mut dyn Canvas,
) -> Vec<ViewPlacement> {
    // The root is always its own repaint boundary, so after a paint flush its
    // layer is current and compositing is a single replay. Falling through to
    // a direct paint only happens when no layer was ever recorded.
    if let Some(layer) = tree.layer_of(root) {
        canvas.draw_cached_layer(&layer);
        return Vec::new();
    }
    if tree.is_repaint_boundary(root) {
        let layer = tree.ensure_layer(root);
        canvas.draw_cached_layer(&layer);
        return Vec::new();
    }
    let mut ctx = PaintContext::new(canvas);
    ctx.paint_child(tree, root, Offset::zero());
    ctx.take_views()
}

/// One frame's platform-view output: paint and composite placements merged,
/// later placements for a view winning.
pub fn merge_view_placements(batches: Vec<Vec<ViewPlacement>>) -> Vec<ViewPlacement> {
    let mut merged: Vec<ViewPlacement> = Vec::new();
    for batch in batches {
        for placement in batch {
            if let Some(existing) = merged.iter_mut().find(|p| p.view_id == placement.view_id) {
                *existing = placement;
            } else {
                merged.push(placement);
            }
        }
    }
    merged
}

//! Frame orchestration: one lock, one pass, fixed phase order.
//!
//! `FrameScheduler` serializes every tree mutation behind a single mutex and
//! runs the full pipeline per frame: dispatch, tickers, build, layout (with
//! deferred builds), semantics, paint, composite, platform-view flush. The
//! embedder owns the event loop; the scheduler only says when it wants a
//! frame and does the work when asked.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::dispatch::{DispatchQueue, FrameRequest};
use crate::element::{ElementTree, TreeConfig};
use crate::layout::{Constraints, Size};
use crate::platform_view::{GeometryChannel, PlatformViewRegistry};
use crate::render::{
    composite_frame, merge_view_placements, paint_boundary_to_layer, Canvas, Color, ViewPlacement,
};
use crate::semantics::SemanticsSink;
use crate::widgets::Widget;

/// How long semantics flushes may be deferred while tickers run. Animations
/// produce streams of geometry changes assistive technology cannot follow;
/// past this window the update goes out anyway.
const SEMANTICS_DEFERRAL_TIMEOUT: Duration = Duration::from_millis(500);

/// Per-frame animation hook. Returns whether it wants another frame; a
/// finished ticker is dropped. Curves and ballistics live with the embedder.
pub trait Ticker: Send {
    fn tick(&mut self, now: Instant) -> bool;
}

struct FrameState {
    tree: ElementTree,
    root_widget: Option<Widget>,
    root_dirty: bool,
    tickers: Vec<Box<dyn Ticker>>,
    semantics: Option<Box<dyn SemanticsSink>>,
    semantics_deferred_since: Option<Instant>,
    registry: PlatformViewRegistry,
    geometry: Option<Box<dyn GeometryChannel>>,
    device_scale: f64,
}

pub struct FrameScheduler {
    state: Mutex<FrameState>,
    dispatch: Arc<DispatchQueue>,
    request: Arc<FrameRequest>,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl FrameScheduler {
    pub fn new(config: TreeConfig) -> Self {
        let request = Arc::new(FrameRequest::new());
        let mut tree = ElementTree::new(config);

        // Invalidation from either tree requests a frame through the same
        // coalesced flag.
        let for_builds = request.clone();
        tree.build_owner()
            .set_on_needs_frame(Arc::new(move || for_builds.request()));
        let for_pipeline = request.clone();
        tree.pipeline_mut()
            .set_on_needs_frame(Arc::new(move || for_pipeline.request()));

        Self {
            state: Mutex::new(FrameState {
                tree,
                root_widget: None,
                root_dirty: false,
                tickers: Vec::new(),
                semantics: None,
                semantics_deferred_since: None,
                registry: PlatformViewRegistry::new(),
                geometry: None,
                device_scale: 1.0,
            }),
            dispatch: Arc::new(DispatchQueue::new()),
            request,
        }
    }

    /// The coalesced needs-frame signal, for wiring an event-loop wakeup.
    pub fn frame_request(&self) -> &Arc<FrameRequest> {
        &self.request
    }

    /// Replaces the root widget. Takes effect at the top of the next frame.
    pub fn set_root(&self, widget: Option<Widget>) {
        {
            let mut state = self.state.lock().unwrap();
            state.root_widget = widget;
            state.root_dirty = true;
        }
        self.request.request();
    }

    /// Enqueues a closure to run on the frame thread before the next build
    /// pass. Callable from any thread.
    pub fn dispatch(&self, f: impl FnOnce() + Send + 'static) {
        self.dispatch.enqueue(f);
        self.request.request();
    }

    pub fn add_ticker(&self, ticker: Box<dyn Ticker>) {
        self.state.lock().unwrap().tickers.push(ticker);
        self.request.request();
    }

    pub fn set_semantics_sink(&self, sink: Option<Box<dyn SemanticsSink>>) {
        self.state.lock().unwrap().semantics = sink;
    }

    pub fn set_geometry_channel(&self, channel: Option<Box<dyn GeometryChannel>>) {
        self.state.lock().unwrap().geometry = channel;
    }

    pub fn set_device_scale(&self, scale: f64) {
        self.state.lock().unwrap().device_scale = scale;
    }

    /// Read access to the tree, under the frame lock. Not callable from
    /// dispatch callbacks or frame phases.
    pub fn with_tree<R>(&self, f: impl FnOnce(&mut ElementTree) -> R) -> R {
        f(&mut self.state.lock().unwrap().tree)
    }

    /// Whether a frame should be scheduled: an unmounted root, pending
    /// dispatch work, an explicit request, live tickers, or dirty tree work.
    pub fn needs_frame(&self) -> bool {
        if self.request.is_requested() || !self.dispatch.is_empty() {
            return true;
        }
        let state = self.state.lock().unwrap();
        state.root_dirty
            || !state.tickers.is_empty()
            || state.tree.build_owner().needs_work(&state.tree)
    }

    /// Runs one full frame against `canvas` at `logical_size`.
    pub fn draw_frame(&self, canvas: &mut dyn Canvas, logical_size: Size) {
        // Dispatch runs before the lock so callbacks may call back into the
        // scheduler.
        self.request.take();
        for f in self.dispatch.drain() {
            f();
        }

        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;
        let now = Instant::now();

        state.tickers.retain_mut(|t| t.tick(now));

        if state.root_dirty {
            state.root_dirty = false;
            state.tree.set_root(state.root_widget.clone());
        }

        let owner = state.tree.build_owner().clone();
        owner.flush_build(&mut state.tree);

        state
            .tree
            .flush_layout_for_root(Constraints::tight(logical_size));

        Self::flush_semantics_phase(state, now);

        state.registry.begin_batch();
        let mut view_batches: Vec<Vec<ViewPlacement>> = Vec::new();
        let dirty_paint = state.tree.pipeline_mut().flush_paint();
        for id in dirty_paint {
            view_batches.push(paint_boundary_to_layer(state.tree.pipeline_mut(), id));
        }

        canvas.clear(Color::TRANSPARENT);
        if let Some(root_render) = state.tree.pipeline().root() {
            view_batches.push(composite_frame(
                state.tree.pipeline_mut(),
                root_render,
                canvas,
            ));
        }

        for placement in merge_view_placements(view_batches) {
            state.registry.update_from_placement(&placement);
        }
        if let Some(channel) = state.geometry.as_mut() {
            state.registry.flush_batch(channel.as_mut());
        }

        // The frame's own marks re-armed the coalesced request through the
        // needs-frame callbacks, and the flushes above consumed that work.
        // Re-arm only for what the frame left behind.
        self.request.take();
        if state.root_dirty
            || !state.tickers.is_empty()
            || state.tree.build_owner().needs_work(&state.tree)
        {
            self.request.request();
        }
    }

    /// Semantics flushes are deferred while tickers run, up to a timeout.
    /// The window is anchored at the first flush actually skipped with work
    /// pending; an idle ticker does not start the clock.
    fn flush_semantics_phase(state: &mut FrameState, now: Instant) {
        if !state.tree.pipeline().has_pending_semantics() {
            state.semantics_deferred_since = None;
            return;
        }
        if !state.tickers.is_empty() {
            let since = *state.semantics_deferred_since.get_or_insert(now);
            if now.duration_since(since) < SEMANTICS_DEFERRAL_TIMEOUT {
                return;
            }
        }
        let dirty = state.tree.pipeline_mut().flush_semantics();
        state.semantics_deferred_since = None;
        if dirty.is_empty() {
            return;
        }
        if let Some(sink) = state.semantics.as_mut() {
            sink.update(state.tree.pipeline(), &dirty, state.device_scale);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{PictureRecorder, PipelineOwner, RenderBox, RenderId};
    use crate::widgets::RenderWidget;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SolidBox;

    impl RenderBox for SolidBox {
        fn perform_layout(
            &mut self,
            _tree: &mut PipelineOwner,
            _id: RenderId,
            constraints: Constraints,
        ) -> Size {
            constraints.biggest()
        }
    }

    struct Solid;

    impl RenderWidget for Solid {
        fn create_render(&self) -> Box<dyn RenderBox> {
            Box::new(SolidBox)
        }
    }

    struct CountingTicker {
        remaining: usize,
        ticks: Arc<AtomicUsize>,
    }

    impl Ticker for CountingTicker {
        fn tick(&mut self, _now: Instant) -> bool {
            self.ticks.fetch_add(1, Ordering::Relaxed);
            self.remaining -= 1;
            self.remaining > 0
        }
    }

    fn draw(scheduler: &FrameScheduler) {
        let mut recorder = PictureRecorder::new();
        scheduler.draw_frame(&mut recorder, Size::new(200.0, 100.0));
    }

    #[test]
    fn test_set_root_requests_and_mounts() {
        let scheduler = FrameScheduler::default();
        assert!(!scheduler.needs_frame());
        scheduler.set_root(Some(Widget::render(Solid)));
        assert!(scheduler.needs_frame());

        draw(&scheduler);
        scheduler.with_tree(|tree| {
            let root = tree.root().unwrap();
            let render = tree.render_object_of(root).unwrap();
            assert_eq!(tree.pipeline().size_of(render), Size::new(200.0, 100.0));
        });
        assert!(!scheduler.needs_frame());
    }

    #[test]
    fn test_dispatch_runs_before_build() {
        let scheduler = FrameScheduler::default();
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        scheduler.dispatch(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        assert!(scheduler.needs_frame());
        draw(&scheduler);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert!(!scheduler.needs_frame());
    }

    #[test]
    fn test_frame_work_leaves_no_ghost_request() {
        let scheduler = FrameScheduler::default();
        scheduler.set_root(Some(Widget::render(Solid)));
        draw(&scheduler);
        assert!(!scheduler.needs_frame());

        // A paint mark re-fires the needs-frame callback; the frame that
        // services it must come back quiescent.
        scheduler.with_tree(|tree| {
            let root = tree.root().unwrap();
            let render = tree.render_object_of(root).unwrap();
            tree.pipeline_mut().mark_needs_paint(render);
        });
        assert!(scheduler.needs_frame());
        draw(&scheduler);
        assert!(!scheduler.needs_frame());
    }

    #[test]
    fn test_semantics_deferral_anchors_at_first_skipped_flush() {
        let scheduler = FrameScheduler::default();
        scheduler.set_root(Some(Widget::render(Solid)));
        draw(&scheduler);

        let mut guard = scheduler.state.lock().unwrap();
        let state = &mut *guard;
        state.tickers.push(Box::new(CountingTicker {
            remaining: 100,
            ticks: Arc::new(AtomicUsize::new(0)),
        }));

        // A running ticker with nothing pending does not start the clock.
        let t0 = Instant::now();
        FrameScheduler::flush_semantics_phase(state, t0);
        assert!(state.semantics_deferred_since.is_none());

        // Work appearing well past t0 opens the window then, not at t0.
        let render = state.tree.pipeline().root().unwrap();
        state.tree.pipeline_mut().mark_needs_semantics(render);
        let t1 = t0 + SEMANTICS_DEFERRAL_TIMEOUT * 2;
        FrameScheduler::flush_semantics_phase(state, t1);
        assert_eq!(state.semantics_deferred_since, Some(t1));
        assert!(state.tree.pipeline().has_pending_semantics());

        // The window closes relative to that anchor.
        FrameScheduler::flush_semantics_phase(state, t1 + SEMANTICS_DEFERRAL_TIMEOUT);
        assert!(!state.tree.pipeline().has_pending_semantics());
        assert!(state.semantics_deferred_since.is_none());
    }

    #[test]
    fn test_tickers_keep_frames_coming_until_done() {
        let scheduler = FrameScheduler::default();
        let ticks = Arc::new(AtomicUsize::new(0));
        scheduler.add_ticker(Box::new(CountingTicker {
            remaining: 2,
            ticks: ticks.clone(),
        }));

        draw(&scheduler);
        assert!(scheduler.needs_frame());
        draw(&scheduler);
        assert!(!scheduler.needs_frame());
        assert_eq!(ticks.load(Ordering::Relaxed), 2);
    }
}

//! Mounted document lifecycle

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use log::{debug, warn};

use crate::anchors::{AnchorId, AnchorRegistry};
use crate::cache::RasterCache;
use crate::clock::{FixedRateClock, FrameClock};
use crate::engine::{
    CanvasJob, HostGeometry, LayerUpdate, PageSequences, PageSlot, PassRequest, canvas_worker,
    pass_driver,
};
use crate::geometry::{Point, Rect, Size, raster_dims};
use crate::kernel::runtime;
use crate::layers::{
    AnnotationBox, AnnotationLayer, DomPage, LinkAction, PageContainer, RasterSurface, TextLayer,
};
use crate::pipeline::{self, RenderError};
use crate::resources::ResourcePool;
use crate::session::RenderSession;
use crate::task::{PassId, PassOutcome, RenderTask};
use crate::types::{AnnotationAction, PageSemantics, Rgba};

/// Hook used to open `Url` annotation targets
pub type UrlOpener = Arc<dyn Fn(&str) + Send + Sync>;

fn default_url_opener() -> UrlOpener {
    Arc::new(|url: &str| {
        if let Err(e) = open::that(url) {
            warn!("Failed to open link {url:?}: {e}");
        }
    })
}

/// Default capacity of the canvas raster cache
pub const DEFAULT_RASTER_CACHE: usize = 32;

/// Configuration for mounting a document
#[derive(Clone)]
pub struct MountOptions {
    /// On-screen container width in window units
    pub container_width: f32,
    pub raster_cache_capacity: usize,
    pub clock: Arc<dyn FrameClock>,
    pub url_opener: UrlOpener,
}

impl MountOptions {
    #[must_use]
    pub fn new(container_width: f32) -> Self {
        Self {
            container_width,
            raster_cache_capacity: DEFAULT_RASTER_CACHE,
            clock: Arc::new(FixedRateClock::default()),
            url_opener: default_url_opener(),
        }
    }

    #[must_use]
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.raster_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn FrameClock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_url_opener(mut self, opener: UrlOpener) -> Self {
        self.url_opener = opener;
        self
    }
}

/// Where activating an annotation leads
#[derive(Clone, Debug, PartialEq)]
pub enum AnnotationTarget {
    /// An external target was handed to the url opener
    Opened,
    /// Scroll to the destination page's anchor
    Scroll { page: usize, offset: f32 },
    /// The destination anchor is not wired yet; nothing happened
    Unwired,
}

struct TaskState {
    task: RenderTask,
    finished: bool,
    outcome: Option<PassOutcome>,
    canvas_seen: usize,
}

impl TaskState {
    fn new(task: RenderTask) -> Self {
        Self {
            task,
            finished: false,
            outcome: None,
            canvas_seen: 0,
        }
    }

    /// Finished, and every dispatched canvas chain has answered
    fn is_idle(&self) -> bool {
        if !self.finished {
            return false;
        }
        match &self.outcome {
            Some(PassOutcome::Completed { canvas_jobs, .. }) => self.canvas_seen >= *canvas_jobs,
            _ => true,
        }
    }
}

fn validate_geometry(geometry: &HostGeometry) -> Result<(), RenderError> {
    if !(geometry.dom_scale.is_finite() && geometry.dom_scale > 0.0) {
        return Err(RenderError::Config(format!(
            "dom scale must be positive and finite, got {}",
            geometry.dom_scale
        )));
    }
    if !geometry.window.is_positive() {
        return Err(RenderError::Config(format!(
            "viewport must be positive, got {}x{}",
            geometry.window.width, geometry.window.height
        )));
    }
    Ok(())
}

/// A document mounted against a live host surface.
///
/// Owns the session, the per-page layer triples, the anchor registry,
/// the resource pool and the two worker threads (pass driver and canvas
/// worker). The host forwards viewport events in and calls `pump` from
/// its frame loop to apply committed layer updates.
pub struct DocumentView {
    session: Arc<RenderSession>,
    pages: Vec<DomPage>,
    registry: AnchorRegistry,
    pool: Arc<ResourcePool>,
    geometry: HostGeometry,
    container_width: f32,

    pass_tx: Sender<PassRequest>,
    canvas_tx: Sender<CanvasJob>,
    update_rx: Receiver<LayerUpdate>,
    driver: Option<JoinHandle<()>>,
    canvas: Option<JoinHandle<()>>,

    seqs: Arc<PageSequences>,
    cache: Arc<Mutex<RasterCache>>,
    next_pass: u64,
    current: Option<TaskState>,
    outcomes: Vec<(PassId, PassOutcome)>,

    url_opener: UrlOpener,
    disposed: bool,
}

impl DocumentView {
    /// Mounts a session: paints the initial layer set, binds the
    /// resource sink, spawns the repaint workers and triggers the cold
    /// first pass.
    pub fn mount(
        session: RenderSession,
        geometry: HostGeometry,
        options: MountOptions,
    ) -> Result<Self, RenderError> {
        runtime::ensure_initialized();
        validate_geometry(&geometry)?;
        pipeline::validate_config(&session, options.container_width)?;

        let session = Arc::new(session);

        let pool = Arc::new(ResourcePool::new());
        let sink_pool = pool.clone();
        session.bind_resource_sink(Arc::new(move |entry| sink_pool.push(entry)))?;

        let mut registry = AnchorRegistry::new();
        let output = pipeline::paint(&session, &mut registry, options.container_width)?;
        for (page, fault) in &output.failures {
            warn!("page {page} failed during mount paint: {fault}");
        }
        let pages = output.pages;

        let seqs = Arc::new(PageSequences::new(pages.len()));
        let cache = Arc::new(Mutex::new(RasterCache::new(options.raster_cache_capacity)));

        let (pass_tx, pass_rx) = flume::unbounded();
        let (canvas_tx, canvas_rx) = flume::unbounded();
        let (update_tx, update_rx) = flume::unbounded();

        let driver = {
            let session = session.clone();
            let clock = options.clock.clone();
            let canvas_tx = canvas_tx.clone();
            let update_tx = update_tx.clone();
            let seqs = seqs.clone();
            std::thread::spawn(move || {
                pass_driver(session, clock, canvas_tx, update_tx, pass_rx, seqs);
            })
        };
        let canvas = {
            let session = session.clone();
            let cache = cache.clone();
            std::thread::spawn(move || canvas_worker(session, cache, canvas_rx, update_tx))
        };

        let mut view = Self {
            session,
            pages,
            registry,
            pool,
            geometry,
            container_width: options.container_width,
            pass_tx,
            canvas_tx,
            update_rx,
            driver: Some(driver),
            canvas: Some(canvas),
            seqs,
            cache,
            next_pass: 1,
            current: None,
            outcomes: Vec::new(),
            url_opener: options.url_opener,
            disposed: false,
        };
        view.request_pass()?;
        Ok(view)
    }

    /// Scroll or resize of the host window; preempts the running pass
    pub fn on_viewport_change(&mut self, geometry: HostGeometry) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        validate_geometry(&geometry)?;
        self.geometry = geometry;
        self.request_pass()
    }

    /// Container resize at unchanged pixel density: CSS scales only,
    /// no repaint pass and no canvas work
    pub fn resize_container(&mut self, container_width: f32) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        pipeline::resize(&mut self.pages, container_width)?;
        self.container_width = container_width;
        Ok(())
    }

    /// Rebuilds the layer list after a `manipulate` call. Pages whose
    /// geometry is unchanged keep their layers until the next pass
    /// refreshes them incrementally; changed pages get blank shells.
    pub fn reload(&mut self) -> Result<(), RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        self.supersede_current();
        pipeline::validate_config(&self.session, self.container_width)?;

        let infos = self.session.pages_info()?;
        if infos.is_empty() {
            return Err(RenderError::NoPages);
        }

        let density = self.session.pixel_per_pt();
        let background = Rgba::from_hex(&self.session.background_color()).ok_or_else(|| {
            RenderError::Config(format!(
                "background color must match #rrggbb, got {:?}",
                self.session.background_color()
            ))
        })?;

        let old: Vec<DomPage> = std::mem::take(&mut self.pages);
        let mut old_by_index: HashMap<usize, DomPage> =
            old.into_iter().map(|p| (p.index, p)).collect();

        for (i, info) in infos.iter().enumerate() {
            let reusable = old_by_index.remove(&i).filter(|p| p.info == *info);
            let page = match reusable {
                Some(page) => page,
                None => {
                    let (width_px, height_px) =
                        raster_dims(Size::new(info.width, info.height), density);
                    let mut page = DomPage {
                        index: i,
                        info: *info,
                        container: PageContainer::new(width_px, height_px),
                        raster: RasterSurface::new(width_px, height_px, background),
                        text: TextLayer::default(),
                        annotations: AnnotationLayer::default(),
                    };
                    page.container.rescale(self.container_width);
                    page.text.set_scale(self.container_width, info.width);
                    page
                }
            };
            self.pages.push(page);
        }

        for removed in old_by_index.keys() {
            self.registry.page_unmounted(*removed);
        }
        for (i, page) in self.pages.iter_mut().enumerate() {
            for anchor in self.registry.page_mounted(i) {
                page.annotations.mount_anchor(anchor);
            }
            if let Some(anchor) = self.registry.wired_anchor_for(i) {
                page.annotations.mount_anchor(anchor);
            }
        }

        self.seqs.ensure_pages(self.pages.len());
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .invalidate_all();
        self.request_pass()
    }

    /// Drains worker responses and applies the authoritative layer
    /// updates; returns how many were applied. Call from the host's
    /// frame loop.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(update) = self.update_rx.try_recv() {
            if self.apply_update(update) {
                applied += 1;
            }
        }
        applied
    }

    /// Pumps until the current pass and its canvas chains settle, or
    /// the timeout elapses
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if self.is_idle() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.is_idle();
            }
            match self.update_rx.recv_timeout(remaining) {
                Ok(update) => {
                    self.apply_update(update);
                }
                Err(_) => return self.is_idle(),
            }
        }
    }

    /// Activates an annotation: `Url` goes to the url opener, `GoTo`
    /// resolves through the anchor registry. An unwired anchor is a
    /// quiet `Unwired`, never an error.
    pub fn open_annotation(
        &self,
        page: usize,
        index: usize,
    ) -> Result<AnnotationTarget, RenderError> {
        if self.disposed {
            return Err(RenderError::Disposed);
        }
        let dom = self
            .pages
            .get(page)
            .ok_or_else(|| RenderError::Config(format!("page {page} out of range")))?;
        let annotation = dom.annotations.boxes.get(index).ok_or_else(|| {
            RenderError::Config(format!("annotation {index} out of range on page {page}"))
        })?;

        match &annotation.action {
            LinkAction::Url(url) => {
                (self.url_opener)(url);
                Ok(AnnotationTarget::Opened)
            }
            LinkAction::GoTo { anchor, .. } => match self.registry.resolve(anchor) {
                Some(dest) => Ok(AnnotationTarget::Scroll {
                    page: dest,
                    offset: self.scroll_offset_for_page(dest),
                }),
                None => {
                    warn!("annotation anchor {} not wired yet", anchor.as_str());
                    Ok(AnnotationTarget::Unwired)
                }
            },
        }
    }

    /// Y offset of a page's top edge in document units
    #[must_use]
    pub fn scroll_offset_for_page(&self, page: usize) -> f32 {
        self.pages.iter().take(page).map(|p| p.info.height).sum()
    }

    /// Shuts the workers down, tears the resource pool down and frees
    /// the session. Dropping an undisposed view does the same.
    pub fn dispose(mut self) {
        self.teardown();
    }

    #[must_use]
    pub fn pages(&self) -> &[DomPage] {
        &self.pages
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn session(&self) -> &RenderSession {
        &self.session
    }

    #[must_use]
    pub fn resource_pool(&self) -> &ResourcePool {
        &self.pool
    }

    #[must_use]
    pub fn anchor_registry(&self) -> &AnchorRegistry {
        &self.registry
    }

    /// Outcome of the most recently finished pass
    #[must_use]
    pub fn last_pass_outcome(&self) -> Option<&PassOutcome> {
        self.outcomes.last().map(|(_, outcome)| outcome)
    }

    /// Every finished pass in order, with its id
    #[must_use]
    pub fn pass_outcomes(&self) -> &[(PassId, PassOutcome)] {
        &self.outcomes
    }

    fn is_idle(&self) -> bool {
        self.current.as_ref().is_none_or(TaskState::is_idle)
    }

    fn is_current_pass(&self, pass: PassId) -> bool {
        self.current.as_ref().is_some_and(|s| s.task.id == pass)
    }

    fn request_pass(&mut self) -> Result<(), RenderError> {
        self.supersede_current();

        let id = PassId::new(self.next_pass);
        self.next_pass += 1;
        let task = RenderTask::new(id);

        let request = PassRequest::Run {
            task: task.clone(),
            geometry: self.geometry,
            root_bounds: self.root_bounds(),
            pages: self.page_slots(),
            revision: self.session.revision(),
        };
        self.current = Some(TaskState::new(task));
        self.pass_tx
            .send(request)
            .map_err(|_| RenderError::Disposed)?;
        Ok(())
    }

    /// Cancels the running pass and blocks until its acknowledgement.
    /// Commits it made before the acknowledgement are still applied;
    /// everything after belongs to the next pass.
    fn supersede_current(&mut self) {
        let (id, token, finished) = match &self.current {
            Some(state) => (state.task.id, state.task.token.clone(), state.finished),
            None => return,
        };
        if finished {
            self.current = None;
            return;
        }

        token.cancel();
        loop {
            match self.update_rx.recv() {
                Ok(update) => {
                    let done = matches!(
                        &update,
                        LayerUpdate::PassFinished { pass, .. } if *pass == id
                    );
                    self.apply_update(update);
                    if done {
                        break;
                    }
                }
                // Workers are gone; nothing left to acknowledge.
                Err(_) => break,
            }
        }
        self.current = None;
    }

    fn note_canvas_response(&mut self, pass: PassId) {
        if let Some(state) = self.current.as_mut() {
            if state.task.id == pass {
                state.canvas_seen += 1;
            }
        }
    }

    fn apply_update(&mut self, update: LayerUpdate) -> bool {
        match update {
            LayerUpdate::Vector { pass, page, svg } => {
                if self.is_current_pass(pass) && page < self.pages.len() {
                    self.pages[page].raster.vector = svg;
                    true
                } else {
                    debug!("stale vector commit for page {page} dropped");
                    false
                }
            }
            LayerUpdate::Semantics {
                pass,
                page,
                semantics,
            } => {
                if self.is_current_pass(pass) && page < self.pages.len() {
                    self.apply_semantics(page, semantics);
                    true
                } else {
                    debug!("stale semantics commit for page {page} dropped");
                    false
                }
            }
            LayerUpdate::Canvas {
                pass,
                page,
                seq,
                pixels,
            } => {
                self.note_canvas_response(pass);
                // Canvas authority is the page sequence, not the pass: a
                // chain from an older pass is still wanted if no newer
                // chain was dispatched for the page.
                if page < self.pages.len() && seq == self.seqs.current(page) {
                    self.pages[page].raster.commit_pixels(pixels);
                    true
                } else {
                    debug!("stale canvas commit for page {page} dropped");
                    false
                }
            }
            LayerUpdate::CanvasSkipped { pass, page, seq } => {
                debug!("canvas chain for page {page} (seq {seq}) answered with a skip");
                self.note_canvas_response(pass);
                false
            }
            LayerUpdate::PassFinished { pass, outcome } => {
                if let Some(state) = self.current.as_mut() {
                    if state.task.id == pass {
                        state.finished = true;
                        state.outcome = Some(outcome.clone());
                    }
                }
                debug!("pass {pass:?} finished: {outcome:?}");
                self.outcomes.push((pass, outcome));
                false
            }
        }
    }

    fn apply_semantics(&mut self, page: usize, semantics: PageSemantics) {
        let page_count = self.pages.len();

        let mut boxes = Vec::with_capacity(semantics.annotations.len());
        let mut wires: Vec<(usize, AnchorId)> = Vec::new();
        for ann in &semantics.annotations {
            let action = match &ann.action {
                AnnotationAction::Url { url } => LinkAction::Url(url.clone()),
                AnnotationAction::GoTo { page: dest } => {
                    let anchor = self.registry.request(*dest, *dest < page_count);
                    if *dest < page_count {
                        wires.push((*dest, anchor.clone()));
                    }
                    LinkAction::GoTo {
                        page: *dest,
                        anchor,
                    }
                }
            };
            boxes.push(AnnotationBox {
                rect: ann.screen_box(),
                action,
            });
        }

        let container_width = self.container_width;
        let dom = &mut self.pages[page];
        dom.text.set_content(semantics.text);
        dom.text.set_scale(container_width, dom.info.width);
        dom.annotations.boxes = boxes;

        for (dest, anchor) in wires {
            self.pages[dest].annotations.mount_anchor(anchor);
        }
    }

    fn page_slots(&self) -> Vec<PageSlot> {
        let scale = self.geometry.dom_scale;
        let origin = self.geometry.root_origin;
        let mut doc_top = 0.0f32;

        self.pages
            .iter()
            .map(|p| {
                let bounds = Rect::from_origin_size(
                    Point::new(origin.x, origin.y + doc_top * scale),
                    Size::new(p.info.width * scale, p.info.height * scale),
                );
                let slot = PageSlot {
                    index: p.index,
                    bounds,
                    doc_top,
                    width_px: p.container.raster_width_px,
                    height_px: p.container.raster_height_px,
                };
                doc_top += p.info.height;
                slot
            })
            .collect()
    }

    fn root_bounds(&self) -> Rect {
        let scale = self.geometry.dom_scale;
        let width = self.pages.iter().map(|p| p.info.width).fold(0.0, f32::max);
        let height: f32 = self.pages.iter().map(|p| p.info.height).sum();
        Rect::from_origin_size(
            self.geometry.root_origin,
            Size::new(width * scale, height * scale),
        )
    }

    fn teardown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(state) = &self.current {
            state.task.token.cancel();
        }
        let _ = self.pass_tx.send(PassRequest::Shutdown);
        let _ = self.canvas_tx.send(CanvasJob::Shutdown);
        if let Some(handle) = self.driver.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.canvas.take() {
            let _ = handle.join();
        }

        if let Err(e) = self.pool.tear_down() {
            warn!("resource pool teardown on dispose: {e}");
        }
        if let Err(e) = self.session.free() {
            warn!("freeing session on dispose: {e}");
        }
    }
}

impl Drop for DocumentView {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for DocumentView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentView")
            .field("pages", &self.pages.len())
            .field("geometry", &self.geometry)
            .field("container_width", &self.container_width)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

//! Test doubles: a scriptable kernel and artifact builders

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::geometry::{Point, Rect, Size, raster_dims};
use crate::kernel::{
    CanvasRenderOptions, Kernel, KernelFault, MutateAction, PageMetrics, RepaintStage,
    ResourceSink, SessionHandle,
};
use crate::resources::ResourceEntry;
use crate::types::{
    Annotation, GlyphPos, PagePaint, PageSemantics, RasterPixels, TextContent, TextLine,
};

/// Builders for the toy artifact format the fake kernel understands:
/// a page-count byte followed by two little-endian f32 per page.
pub mod artifact {
    /// Encodes page geometry as an artifact payload
    #[must_use]
    pub fn pages(dims: &[(f32, f32)]) -> Vec<u8> {
        let mut out = vec![dims.len() as u8];
        for (w, h) in dims {
            out.extend_from_slice(&w.to_le_bytes());
            out.extend_from_slice(&h.to_le_bytes());
        }
        out
    }

    pub(super) fn decode(bytes: &[u8]) -> Vec<(f32, f32)> {
        let Some((&count, rest)) = bytes.split_first() else {
            return Vec::new();
        };
        rest.chunks_exact(8)
            .take(count as usize)
            .map(|chunk| {
                let w = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let h = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                (w, h)
            })
            .collect()
    }
}

/// One recorded kernel invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelCall {
    CreateSession,
    FreeSession,
    Manipulate(MutateAction),
    PagesInfo,
    Relayout,
    NeedRepaint { page: usize, stage: RepaintStage },
    RepaintLayout { page: usize },
    RenderSvgDiff,
    RepaintSemantics { page: usize },
    PrepareCanvas { page: usize },
    RepaintCanvas { page: usize },
    RenderPageToCanvas { page: usize },
}

struct FakeSession {
    pages: Vec<(f32, f32)>,
    freed: bool,
    /// Mutation count; doubles as the fill byte of rendered pixels so
    /// tests can tell which artifact revision a surface shows
    mutations: u8,
    relayout_dirty: bool,
    stage_dirty: HashSet<(usize, RepaintStage)>,
    sink: Option<ResourceSink>,
}

impl FakeSession {
    fn mark_all_dirty(&mut self) {
        self.relayout_dirty = true;
        self.stage_dirty.clear();
        for page in 0..self.pages.len() {
            for stage in RepaintStage::LADDER {
                self.stage_dirty.insert((page, stage));
            }
        }
    }
}

#[derive(Default)]
struct FakeState {
    sessions: HashMap<u64, FakeSession>,
    next_handle: u64,
    journal: Vec<KernelCall>,
    annotations: HashMap<usize, Vec<Annotation>>,
    mount_resources: Vec<ResourceEntry>,
}

/// Scriptable in-memory kernel. Tracks dirtiness the way a real kernel
/// would: mutation marks everything dirty, executing a stage clears its
/// flag, and relayout reports dirty while any repaint work is pending.
#[derive(Default)]
pub struct FakeKernel {
    state: Mutex<FakeState>,
    /// Sleep inserted into front-stage execution, for preemption tests
    stage_delay: Mutex<Option<Duration>>,
    /// Sleep inserted into PrepareCanvas, for stale-chain tests
    canvas_delay: Mutex<Option<Duration>>,
    fail_once: Mutex<Option<(usize, RepaintStage)>>,
}

impl FakeKernel {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_session<'a>(
        state: &'a mut FakeState,
        handle: SessionHandle,
    ) -> Result<&'a mut FakeSession, KernelFault> {
        match state.sessions.get_mut(&handle.0) {
            Some(session) if !session.freed => Ok(session),
            _ => Err(KernelFault::UnknownHandle(handle)),
        }
    }

    /// Everything the kernel has been asked to do, in order
    #[must_use]
    pub fn journal(&self) -> Vec<KernelCall> {
        self.state().journal.clone()
    }

    /// How many times a given page's canvas was actually rasterized
    #[must_use]
    pub fn canvas_paints(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|c| matches!(c, KernelCall::RepaintCanvas { .. }))
            .count()
    }

    /// Scripts the annotations every session reports for a page
    pub fn set_annotations(&self, page: usize, annotations: Vec<Annotation>) {
        self.state().annotations.insert(page, annotations);
    }

    /// Scripts resources pushed when a sink is bound
    pub fn set_mount_resources(&self, resources: Vec<ResourceEntry>) {
        self.state().mount_resources = resources;
    }

    /// Marks every stage of every page dirty again
    pub fn taint_all(&self) {
        let mut state = self.state();
        for session in state.sessions.values_mut() {
            if !session.freed {
                session.mark_all_dirty();
            }
        }
    }

    /// Marks one page/stage combination dirty
    pub fn taint(&self, page: usize, stage: RepaintStage) {
        let mut state = self.state();
        for session in state.sessions.values_mut() {
            if !session.freed {
                session.stage_dirty.insert((page, stage));
            }
        }
    }

    pub fn set_stage_delay(&self, delay: Duration) {
        *self
            .stage_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn set_canvas_delay(&self, delay: Duration) {
        *self
            .canvas_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    /// The next execution of this page/stage fails
    pub fn fail_stage_once(&self, page: usize, stage: RepaintStage) {
        *self
            .fail_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some((page, stage));
    }

    fn front_delay(&self) {
        let delay = *self
            .stage_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    fn take_failure(&self, page: usize, stage: RepaintStage) -> bool {
        let mut fail = self.fail_once.lock().unwrap_or_else(PoisonError::into_inner);
        if *fail == Some((page, stage)) {
            *fail = None;
            return true;
        }
        false
    }

    fn page_semantics(state: &FakeState, session: &FakeSession, page: usize) -> PageSemantics {
        let width = session.pages.get(page).map_or(0.0, |p| p.0);
        let text = TextContent {
            lines: vec![TextLine {
                bounds: Rect::from_origin_size(Point::new(0.0, 10.0), Size::new(width, 12.0)),
                glyphs: format!("page {page}")
                    .chars()
                    .enumerate()
                    .map(|(i, ch)| GlyphPos {
                        x: i as f32 * 6.0,
                        ch,
                    })
                    .collect(),
            }],
        };
        PageSemantics {
            text,
            annotations: state.annotations.get(&page).cloned().unwrap_or_default(),
        }
    }

    fn solid_pixels(session: &FakeSession, page: usize, pixel_per_pt: f32) -> RasterPixels {
        let (w, h) = session.pages.get(page).copied().unwrap_or((1.0, 1.0));
        let (width_px, height_px) = raster_dims(Size::new(w, h), pixel_per_pt);
        RasterPixels {
            pixels: vec![session.mutations; width_px as usize * height_px as usize * 4],
            width_px,
            height_px,
        }
    }
}

impl Kernel for FakeKernel {
    fn create_session(&self, artifact: Option<&[u8]>) -> Result<SessionHandle, KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::CreateSession);
        state.next_handle += 1;
        let handle = state.next_handle;

        let mut session = FakeSession {
            pages: artifact.map(artifact::decode).unwrap_or_default(),
            freed: false,
            mutations: 0,
            relayout_dirty: false,
            stage_dirty: HashSet::new(),
            sink: None,
        };
        if !session.pages.is_empty() {
            session.mark_all_dirty();
        }
        state.sessions.insert(handle, session);
        Ok(SessionHandle(handle))
    }

    fn free_session(&self, handle: SessionHandle) -> Result<(), KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::FreeSession);
        let session = Self::live_session(&mut state, handle)?;
        session.freed = true;
        session.sink = None;
        Ok(())
    }

    fn manipulate_data(
        &self,
        handle: SessionHandle,
        action: MutateAction,
        data: &[u8],
    ) -> Result<(), KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::Manipulate(action));
        let session = Self::live_session(&mut state, handle)?;
        session.pages = artifact::decode(data);
        session.mutations = session.mutations.wrapping_add(1);
        session.mark_all_dirty();
        Ok(())
    }

    fn pages_info(&self, handle: SessionHandle) -> Result<Vec<PageMetrics>, KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::PagesInfo);
        let session = Self::live_session(&mut state, handle)?;
        Ok(session
            .pages
            .iter()
            .enumerate()
            .map(|(i, (w, h))| PageMetrics {
                page_off: i,
                width_pt: *w,
                height_pt: *h,
            })
            .collect())
    }

    fn relayout(&self, handle: SessionHandle, _rect: Rect) -> Result<bool, KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::Relayout);
        let session = Self::live_session(&mut state, handle)?;
        // Dirty while any repaint work is pending, so a pass superseding
        // a cancelled one still finds the leftover stages.
        let dirty = session.relayout_dirty || !session.stage_dirty.is_empty();
        session.relayout_dirty = false;
        Ok(dirty)
    }

    fn need_repaint(
        &self,
        handle: SessionHandle,
        page: usize,
        _rect: Rect,
        stage: RepaintStage,
    ) -> Result<bool, KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::NeedRepaint { page, stage });
        let session = Self::live_session(&mut state, handle)?;
        Ok(session.stage_dirty.contains(&(page, stage)))
    }

    fn repaint_layout(
        &self,
        handle: SessionHandle,
        page: usize,
        _rect: Rect,
    ) -> Result<(), KernelFault> {
        self.front_delay();
        if self.take_failure(page, RepaintStage::Layout) {
            return Err(KernelFault::call("repaint_layout", "scripted failure"));
        }
        let mut state = self.state();
        state.journal.push(KernelCall::RepaintLayout { page });
        let session = Self::live_session(&mut state, handle)?;
        session.stage_dirty.remove(&(page, RepaintStage::Layout));
        Ok(())
    }

    fn render_svg_diff(&self, handle: SessionHandle, rect: Rect) -> Result<String, KernelFault> {
        self.front_delay();
        let mut state = self.state();
        state.journal.push(KernelCall::RenderSvgDiff);
        let session = Self::live_session(&mut state, handle)?;

        // The window is doc-global; clear the Svg flag of every page it
        // touches.
        let pages = session.pages.clone();
        let mut top = 0.0f32;
        for (page, (_, height)) in pages.iter().enumerate() {
            let bottom = top + height;
            if rect.hi.y > top && rect.lo.y < bottom {
                session.stage_dirty.remove(&(page, RepaintStage::Svg));
            }
            top = bottom;
        }

        Ok(format!(
            "<svg data-window=\"{},{},{},{}\"/>",
            rect.lo.x,
            rect.lo.y,
            rect.width(),
            rect.height()
        ))
    }

    fn repaint_semantics(
        &self,
        handle: SessionHandle,
        page: usize,
        _rect: Rect,
    ) -> Result<PageSemantics, KernelFault> {
        self.front_delay();
        if self.take_failure(page, RepaintStage::Semantics) {
            return Err(KernelFault::call("repaint_semantics", "scripted failure"));
        }
        let mut state = self.state();
        state.journal.push(KernelCall::RepaintSemantics { page });
        {
            let session = Self::live_session(&mut state, handle)?;
            session.stage_dirty.remove(&(page, RepaintStage::Semantics));
        }
        let session = state
            .sessions
            .get(&handle.0)
            .filter(|s| !s.freed)
            .ok_or(KernelFault::UnknownHandle(handle))?;
        Ok(Self::page_semantics(&state, session, page))
    }

    fn prepare_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        _rect: Rect,
        _opts: &CanvasRenderOptions,
    ) -> Result<(), KernelFault> {
        let delay = *self
            .canvas_delay
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        if self.take_failure(page, RepaintStage::PrepareCanvas) {
            return Err(KernelFault::call("prepare_canvas", "scripted failure"));
        }
        let mut state = self.state();
        state.journal.push(KernelCall::PrepareCanvas { page });
        let session = Self::live_session(&mut state, handle)?;
        session
            .stage_dirty
            .remove(&(page, RepaintStage::PrepareCanvas));
        Ok(())
    }

    fn repaint_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        _rect: Rect,
        opts: &CanvasRenderOptions,
    ) -> Result<RasterPixels, KernelFault> {
        if self.take_failure(page, RepaintStage::Canvas) {
            return Err(KernelFault::call("repaint_canvas", "scripted failure"));
        }
        let (pixels, sink) = {
            let mut state = self.state();
            state.journal.push(KernelCall::RepaintCanvas { page });
            let session = Self::live_session(&mut state, handle)?;
            session.stage_dirty.remove(&(page, RepaintStage::Canvas));
            (
                Self::solid_pixels(session, page, opts.pixel_per_pt),
                session.sink.clone(),
            )
        };
        // Stage execution pushes glyph primitives, like mount does.
        if let Some(sink) = sink {
            sink(ResourceEntry {
                id: format!("glyph-page-{page}"),
                markup: format!("<symbol id=\"glyph-page-{page}\"/>"),
            });
        }
        Ok(pixels)
    }

    fn render_page_to_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        opts: &CanvasRenderOptions,
    ) -> Result<PagePaint, KernelFault> {
        let mut state = self.state();
        state.journal.push(KernelCall::RenderPageToCanvas { page });
        let session = state
            .sessions
            .get(&handle.0)
            .filter(|s| !s.freed)
            .ok_or(KernelFault::UnknownHandle(handle))?;
        let semantics = Self::page_semantics(&state, session, page);
        Ok(PagePaint {
            pixels: Self::solid_pixels(session, page, opts.pixel_per_pt),
            text: semantics.text,
            annotations: semantics.annotations,
        })
    }

    fn bind_resource_sink(&self, handle: SessionHandle, sink: ResourceSink) {
        let resources = {
            let mut state = self.state();
            let Ok(session) = Self::live_session(&mut state, handle) else {
                return;
            };
            session.sink = Some(sink.clone());
            state.mount_resources.clone()
        };
        for entry in resources {
            sink(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_round_trip() {
        let bytes = artifact::pages(&[(595.0, 842.0), (300.0, 400.0)]);
        assert_eq!(artifact::decode(&bytes), vec![(595.0, 842.0), (300.0, 400.0)]);
        assert!(artifact::decode(&[]).is_empty());
    }

    #[test]
    fn stage_execution_clears_dirtiness() {
        let kernel = FakeKernel::new();
        let artifact = artifact::pages(&[(100.0, 100.0)]);
        let handle = kernel.create_session(Some(&artifact)).expect("create");

        assert!(
            kernel
                .need_repaint(handle, 0, Rect::ZERO, RepaintStage::Layout)
                .expect("dirty check")
        );
        kernel
            .repaint_layout(handle, 0, Rect::ZERO)
            .expect("layout");
        assert!(
            !kernel
                .need_repaint(handle, 0, Rect::ZERO, RepaintStage::Layout)
                .expect("dirty check")
        );
    }

    #[test]
    fn relayout_reports_pending_work() {
        let kernel = FakeKernel::new();
        let artifact = artifact::pages(&[(100.0, 100.0)]);
        let handle = kernel.create_session(Some(&artifact)).expect("create");

        assert!(kernel.relayout(handle, Rect::ZERO).expect("relayout"));
        // Still dirty: the stages have not run yet.
        assert!(kernel.relayout(handle, Rect::ZERO).expect("relayout"));
    }
}

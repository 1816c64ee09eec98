//! Native rendering kernel contract

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;
use crate::resources::ResourceEntry;
use crate::types::{PageInfo, PagePaint, PageSemantics, RasterPixels};

/// Opaque handle over one document's state inside the native kernel.
///
/// Handles are minted by `create_session` and never synthesized here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionHandle(pub u64);

/// Binary mutation applied to a session's document state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutateAction {
    /// Discard prior state and install the payload as the full document
    Reset,
    /// Apply the payload as an incremental patch against current state
    Merge,
}

/// One phase of the repaint ladder, strictly ordered per page
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RepaintStage {
    Layout = 0,
    Svg = 1,
    Semantics = 2,
    PrepareCanvas = 3,
    Canvas = 4,
}

impl RepaintStage {
    /// All stages in execution order
    pub const LADDER: [Self; 5] = [
        Self::Layout,
        Self::Svg,
        Self::Semantics,
        Self::PrepareCanvas,
        Self::Canvas,
    ];

    #[must_use]
    pub const fn rank(self) -> u8 {
        self as u8
    }
}

/// Per-page geometry as reported on the kernel wire
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageMetrics {
    /// 0-based page index
    pub page_off: usize,
    pub width_pt: f32,
    pub height_pt: f32,
}

impl From<PageMetrics> for PageInfo {
    fn from(m: PageMetrics) -> Self {
        Self {
            page_offset: m.page_off,
            width: m.width_pt,
            height: m.height_pt,
        }
    }
}

/// Options for a full page paint
#[derive(Clone, Debug)]
pub struct CanvasRenderOptions {
    pub pixel_per_pt: f32,
    /// `#rrggbb` background fill behind the page content
    pub background_color: String,
}

/// Errors surfaced by the native kernel
#[derive(Debug, Clone, thiserror::Error)]
pub enum KernelFault {
    #[error("kernel call {call} failed: {detail}")]
    Call { call: &'static str, detail: String },

    #[error("unknown session handle {0:?}")]
    UnknownHandle(SessionHandle),
}

impl KernelFault {
    pub fn call(call: &'static str, detail: impl Into<String>) -> Self {
        Self::Call {
            call,
            detail: detail.into(),
        }
    }
}

/// Callback the kernel uses to push resource-pool entries (glyph
/// primitives) into the host surface during mount and stage execution
pub type ResourceSink = Arc<dyn Fn(ResourceEntry) + Send + Sync>;

/// The narrow contract this crate requires from a native rendering
/// kernel. Implementations own layout, vector generation and
/// rasterization; they must be internally synchronized, since the pass
/// driver and the canvas worker call in from different threads.
pub trait Kernel: Send + Sync {
    fn create_session(&self, artifact: Option<&[u8]>) -> Result<SessionHandle, KernelFault>;

    fn free_session(&self, handle: SessionHandle) -> Result<(), KernelFault>;

    fn manipulate_data(
        &self,
        handle: SessionHandle,
        action: MutateAction,
        data: &[u8],
    ) -> Result<(), KernelFault>;

    fn pages_info(&self, handle: SessionHandle) -> Result<Vec<PageMetrics>, KernelFault>;

    /// Fast relayout over the visible rect; returns whether anything
    /// changed. Clean means a repaint pass has no work to do.
    fn relayout(&self, handle: SessionHandle, rect: Rect) -> Result<bool, KernelFault>;

    /// Whether a stage's cached output is stale for the page's visible rect
    fn need_repaint(
        &self,
        handle: SessionHandle,
        page: usize,
        rect: Rect,
        stage: RepaintStage,
    ) -> Result<bool, KernelFault>;

    fn repaint_layout(
        &self,
        handle: SessionHandle,
        page: usize,
        rect: Rect,
    ) -> Result<(), KernelFault>;

    /// Windowed partial re-serialization of the vector scene
    fn render_svg_diff(&self, handle: SessionHandle, rect: Rect) -> Result<String, KernelFault>;

    /// Rebuilds the page's text and annotation metadata for the
    /// visible rect
    fn repaint_semantics(
        &self,
        handle: SessionHandle,
        page: usize,
        rect: Rect,
    ) -> Result<PageSemantics, KernelFault>;

    /// Slow canvas setup (backing surface allocation at the configured
    /// density); decoupled from the per-frame path by the canvas worker
    fn prepare_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        rect: Rect,
        opts: &CanvasRenderOptions,
    ) -> Result<(), KernelFault>;

    /// Rasterizes the page's full surface at the configured density; the
    /// rect guides prioritization, not cropping
    fn repaint_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        rect: Rect,
        opts: &CanvasRenderOptions,
    ) -> Result<RasterPixels, KernelFault>;

    /// Full page paint used by the non-incremental pipeline
    fn render_page_to_canvas(
        &self,
        handle: SessionHandle,
        page: usize,
        opts: &CanvasRenderOptions,
    ) -> Result<PagePaint, KernelFault>;

    fn bind_resource_sink(&self, handle: SessionHandle, sink: ResourceSink);
}

pub mod runtime {
    //! Process-wide kernel module state, initialized once and lazily

    use std::sync::{Mutex, OnceLock, PoisonError};

    use log::debug;

    #[derive(Default)]
    struct RuntimeState {
        initialized: bool,
        requests: u64,
    }

    static RUNTIME: OnceLock<Mutex<RuntimeState>> = OnceLock::new();

    fn state() -> &'static Mutex<RuntimeState> {
        RUNTIME.get_or_init(Mutex::default)
    }

    /// Initializes the kernel module state. Idempotent; safe to call from
    /// any number of concurrently mounted documents.
    pub fn ensure_initialized() {
        let mut guard = state().lock().unwrap_or_else(PoisonError::into_inner);
        guard.requests += 1;
        if !guard.initialized {
            guard.initialized = true;
            debug!("kernel runtime initialized");
        }
    }

    /// Whether the runtime has been initialized at least once
    #[must_use]
    pub fn is_initialized() -> bool {
        state()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .initialized
    }

    /// How many times initialization has been requested
    #[must_use]
    pub fn init_requests() -> u64 {
        state()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ladder_is_strictly_ordered() {
        for pair in RepaintStage::LADDER.windows(2) {
            assert!(pair[0] < pair[1], "{:?} must precede {:?}", pair[0], pair[1]);
        }
        assert_eq!(RepaintStage::Layout.rank(), 0);
        assert_eq!(RepaintStage::Canvas.rank(), 4);
    }

    #[test]
    fn runtime_init_is_idempotent() {
        let before = runtime::init_requests();
        runtime::ensure_initialized();
        runtime::ensure_initialized();
        assert!(runtime::is_initialized());
        assert_eq!(runtime::init_requests(), before + 2);
    }
}

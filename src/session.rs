//! Owned render session over a native document handle

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::warn;
use regex::Regex;

use crate::geometry::Rect;
use crate::kernel::{
    CanvasRenderOptions, Kernel, KernelFault, MutateAction, RepaintStage, ResourceSink,
    SessionHandle, runtime,
};
use crate::types::{PageInfo, PagePaint, PageSemantics, RasterPixels};

/// Default pixel density when none is configured
pub const DEFAULT_PIXEL_PER_PT: f32 = 3.0;
/// Default page background
pub const DEFAULT_BACKGROUND: &str = "#ffffff";

static COLOR_PATTERN: OnceLock<Regex> = OnceLock::new();

fn color_pattern() -> &'static Regex {
    COLOR_PATTERN.get_or_init(|| Regex::new("^#[0-9a-f]{6}$").expect("pattern is valid"))
}

/// Errors from session lifetime and configuration
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("session used after free")]
    UseAfterFree,

    #[error("session already freed")]
    AlreadyFreed,

    #[error("pixel density must be positive and finite, got {0}")]
    InvalidDensity(f32),

    #[error("background color must match #rrggbb, got {0:?}")]
    InvalidBackground(String),

    #[error(transparent)]
    Kernel(#[from] KernelFault),
}

#[derive(Clone, Debug)]
struct RenderPrefs {
    background_color: String,
    pixel_per_pt: f32,
}

/// The live handle over one document's state inside the native kernel.
///
/// The native handle is exclusively owned by this wrapper; lifetime is
/// explicit (create, operate, free). Every method checks a runtime
/// "freed" tag so use-after-free fails loudly here instead of reaching
/// the native side. Methods take `&self` because the pass driver and
/// canvas worker share the session through an `Arc`; the kernel is
/// responsible for its own internal synchronization.
pub struct RenderSession {
    kernel: Arc<dyn Kernel>,
    handle: SessionHandle,
    freed: AtomicBool,
    revision: AtomicU64,
    prefs: Mutex<RenderPrefs>,
}

impl std::fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSession")
            .field("handle", &self.handle)
            .field("freed", &self.freed.load(Ordering::Relaxed))
            .field("revision", &self.revision.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl RenderSession {
    /// Creates a session, optionally installing an initial artifact.
    /// Without one the session starts with zero pages.
    pub fn create(kernel: Arc<dyn Kernel>, artifact: Option<&[u8]>) -> Result<Self, SessionError> {
        runtime::ensure_initialized();
        let handle = kernel.create_session(artifact)?;
        Ok(Self {
            kernel,
            handle,
            freed: AtomicBool::new(false),
            revision: AtomicU64::new(0),
            prefs: Mutex::new(RenderPrefs {
                background_color: DEFAULT_BACKGROUND.to_string(),
                pixel_per_pt: DEFAULT_PIXEL_PER_PT,
            }),
        })
    }

    fn guard(&self) -> Result<(), SessionError> {
        if self.freed.load(Ordering::SeqCst) {
            return Err(SessionError::UseAfterFree);
        }
        Ok(())
    }

    fn prefs(&self) -> std::sync::MutexGuard<'_, RenderPrefs> {
        self.prefs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies a binary mutation. `Reset` replaces the whole document,
    /// `Merge` applies an incremental compiler diff. Either invalidates
    /// every previously retrieved `PageInfo`.
    pub fn manipulate(&self, action: MutateAction, data: &[u8]) -> Result<(), SessionError> {
        self.guard()?;
        self.kernel.manipulate_data(self.handle, action, data)?;
        self.revision.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Artifact revision, bumped by every successful mutation
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }

    /// Per-page geometry in document order. Must be re-queried after
    /// every `manipulate`.
    pub fn pages_info(&self) -> Result<Vec<PageInfo>, SessionError> {
        self.guard()?;
        let metrics = self.kernel.pages_info(self.handle)?;
        Ok(metrics.into_iter().map(PageInfo::from).collect())
    }

    pub fn page_count(&self) -> Result<usize, SessionError> {
        Ok(self.pages_info()?.len())
    }

    /// Widest page width in document units
    pub fn doc_width(&self) -> Result<f32, SessionError> {
        Ok(self
            .pages_info()?
            .iter()
            .map(|p| p.width)
            .fold(0.0, f32::max))
    }

    /// Sum of page heights in document units
    pub fn doc_height(&self) -> Result<f32, SessionError> {
        Ok(self.pages_info()?.iter().map(|p| p.height).sum())
    }

    #[must_use]
    pub fn background_color(&self) -> String {
        self.prefs().background_color.clone()
    }

    /// Sets the page background. Rejected before any native work when
    /// the value does not match `#rrggbb`; never silently clamped.
    pub fn set_background_color(&self, color: &str) -> Result<(), SessionError> {
        self.guard()?;
        if !color_pattern().is_match(color) {
            return Err(SessionError::InvalidBackground(color.to_string()));
        }
        self.prefs().background_color = color.to_string();
        Ok(())
    }

    #[must_use]
    pub fn pixel_per_pt(&self) -> f32 {
        self.prefs().pixel_per_pt
    }

    /// Sets the raster density. Non-positive or non-finite values are
    /// rejected, never clamped.
    pub fn set_pixel_per_pt(&self, density: f32) -> Result<(), SessionError> {
        self.guard()?;
        if !(density.is_finite() && density > 0.0) {
            return Err(SessionError::InvalidDensity(density));
        }
        self.prefs().pixel_per_pt = density;
        Ok(())
    }

    /// Snapshot of the current render configuration
    pub(crate) fn canvas_options(&self) -> CanvasRenderOptions {
        let prefs = self.prefs();
        CanvasRenderOptions {
            pixel_per_pt: prefs.pixel_per_pt,
            background_color: prefs.background_color.clone(),
        }
    }

    /// Releases the native handle. The first call wins; any later call
    /// reports `AlreadyFreed`, and every other operation after free
    /// reports `UseAfterFree`.
    pub fn free(&self) -> Result<(), SessionError> {
        if self.freed.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyFreed);
        }
        self.kernel.free_session(self.handle)?;
        Ok(())
    }

    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::SeqCst)
    }

    // Kernel forwarding for the repaint machinery. Each call re-checks
    // the freed tag so a worker racing a free gets an error, not a
    // native crash.

    pub(crate) fn relayout(&self, rect: Rect) -> Result<bool, SessionError> {
        self.guard()?;
        Ok(self.kernel.relayout(self.handle, rect)?)
    }

    pub(crate) fn need_repaint(
        &self,
        page: usize,
        rect: Rect,
        stage: RepaintStage,
    ) -> Result<bool, SessionError> {
        self.guard()?;
        Ok(self.kernel.need_repaint(self.handle, page, rect, stage)?)
    }

    pub(crate) fn repaint_layout(&self, page: usize, rect: Rect) -> Result<(), SessionError> {
        self.guard()?;
        Ok(self.kernel.repaint_layout(self.handle, page, rect)?)
    }

    pub(crate) fn render_svg_diff(&self, rect: Rect) -> Result<String, SessionError> {
        self.guard()?;
        Ok(self.kernel.render_svg_diff(self.handle, rect)?)
    }

    pub(crate) fn repaint_semantics(
        &self,
        page: usize,
        rect: Rect,
    ) -> Result<PageSemantics, SessionError> {
        self.guard()?;
        Ok(self.kernel.repaint_semantics(self.handle, page, rect)?)
    }

    pub(crate) fn prepare_canvas(&self, page: usize, rect: Rect) -> Result<(), SessionError> {
        self.guard()?;
        let opts = self.canvas_options();
        Ok(self.kernel.prepare_canvas(self.handle, page, rect, &opts)?)
    }

    pub(crate) fn repaint_canvas(
        &self,
        page: usize,
        rect: Rect,
    ) -> Result<RasterPixels, SessionError> {
        self.guard()?;
        let opts = self.canvas_options();
        Ok(self.kernel.repaint_canvas(self.handle, page, rect, &opts)?)
    }

    pub(crate) fn render_page_to_canvas(&self, page: usize) -> Result<PagePaint, SessionError> {
        self.guard()?;
        let opts = self.canvas_options();
        Ok(self.kernel.render_page_to_canvas(self.handle, page, &opts)?)
    }

    pub(crate) fn bind_resource_sink(&self, sink: ResourceSink) -> Result<(), SessionError> {
        self.guard()?;
        self.kernel.bind_resource_sink(self.handle, sink);
        Ok(())
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if !self.freed.swap(true, Ordering::SeqCst) {
            warn!("session {:?} dropped without free", self.handle);
            if let Err(e) = self.kernel.free_session(self.handle) {
                warn!("freeing dropped session failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_pattern_accepts_lowercase_hex_only() {
        assert!(color_pattern().is_match("#0a1b2c"));
        assert!(!color_pattern().is_match("#0A1B2C"));
        assert!(!color_pattern().is_match("0a1b2c"));
        assert!(!color_pattern().is_match("#0a1b2c00"));
        assert!(!color_pattern().is_match("#fff"));
    }
}

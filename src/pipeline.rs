//! Non-incremental layered paint over a whole session

use log::warn;

use crate::anchors::AnchorRegistry;
use crate::geometry::{Size, raster_dims};
use crate::layers::{
    AnnotationBox, AnnotationLayer, DomPage, LinkAction, PageContainer, RasterSurface, TextLayer,
};
use crate::session::{RenderSession, SessionError};
use crate::types::{AnnotationAction, PagePaint, Rgba};

/// Errors from mounting and painting
#[derive(Debug, Clone, thiserror::Error)]
pub enum RenderError {
    /// Invalid configuration, rejected before any native work
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("No page found in session")]
    NoPages,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("document view already disposed")]
    Disposed,
}

/// Result of a full paint: the built pages plus any per-page failures.
/// A failed page keeps its blank background triple; it never aborts the
/// other pages.
pub struct PaintOutput {
    pub pages: Vec<DomPage>,
    pub failures: Vec<(usize, SessionError)>,
}

/// Checks the render configuration without touching the native side
pub(crate) fn validate_config(session: &RenderSession, container_width: f32) -> Result<(), RenderError> {
    let density = session.pixel_per_pt();
    if !(density.is_finite() && density > 0.0) {
        return Err(RenderError::Config(format!(
            "pixel density must be positive and finite, got {density}"
        )));
    }
    if Rgba::from_hex(&session.background_color()).is_none() {
        return Err(RenderError::Config(format!(
            "background color must match #rrggbb, got {:?}",
            session.background_color()
        )));
    }
    if !(container_width.is_finite() && container_width > 0.0) {
        return Err(RenderError::Config(format!(
            "container width must be positive, got {container_width}"
        )));
    }
    Ok(())
}

/// Paints every page of the session into a fresh layer set.
///
/// Configuration is validated before any raster surface is allocated or
/// native call made. Cross-page links are wired through the registry;
/// targets whose page builds later in the same pass stay pending until
/// the loop reaches them.
pub fn paint(
    session: &RenderSession,
    registry: &mut AnchorRegistry,
    container_width: f32,
) -> Result<PaintOutput, RenderError> {
    validate_config(session, container_width)?;

    let infos = session.pages_info()?;
    if infos.is_empty() {
        return Err(RenderError::NoPages);
    }

    let density = session.pixel_per_pt();
    let background = Rgba::from_hex(&session.background_color()).ok_or_else(|| {
        RenderError::Config(format!(
            "background color must match #rrggbb, got {:?}",
            session.background_color()
        ))
    })?;

    let mut pages = Vec::with_capacity(infos.len());
    let mut failures = Vec::new();

    for (i, info) in infos.iter().enumerate() {
        let (width_px, height_px) = raster_dims(Size::new(info.width, info.height), density);
        let mut page = DomPage {
            index: i,
            info: *info,
            container: PageContainer::new(width_px, height_px),
            raster: RasterSurface::new(width_px, height_px, background),
            text: TextLayer::default(),
            annotations: AnnotationLayer::default(),
        };
        page.container.rescale(container_width);

        match session.render_page_to_canvas(i) {
            Ok(paint) => {
                apply_paint(&mut page, paint, registry, i, container_width);
            }
            Err(e) => {
                warn!("painting page {i} failed, leaving blank layers: {e}");
                failures.push((i, e));
            }
        }

        pages.push(page);
    }

    // Every page exists now: drain the wires that were waiting on later
    // pages, then mount each page's own anchor.
    for (i, page) in pages.iter_mut().enumerate() {
        for anchor in registry.page_mounted(i) {
            page.annotations.mount_anchor(anchor);
        }
        if let Some(anchor) = registry.wired_anchor_for(i) {
            page.annotations.mount_anchor(anchor);
        }
    }

    Ok(PaintOutput { pages, failures })
}

fn apply_paint(
    page: &mut DomPage,
    paint: PagePaint,
    registry: &mut AnchorRegistry,
    index: usize,
    container_width: f32,
) {
    page.raster.commit_pixels(std::sync::Arc::new(paint.pixels));
    page.text = TextLayer::new(paint.text, 1.0);
    page.text.set_scale(container_width, page.info.width);

    let mut boxes = Vec::with_capacity(paint.annotations.len());
    for ann in &paint.annotations {
        let action = match &ann.action {
            AnnotationAction::Url { url } => LinkAction::Url(url.clone()),
            AnnotationAction::GoTo { page: dest } => {
                // A destination building later in this same pass is not
                // mounted yet; its wire is drained once the loop gets there.
                let anchor = registry.request(*dest, *dest < index);
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
    page.annotations.boxes = boxes;
}

/// Container resize at unchanged pixel density: only CSS-level scales
/// move, no surface is re-rasterized and no native call is made.
pub fn resize(pages: &mut [DomPage], container_width: f32) -> Result<(), RenderError> {
    if !(container_width.is_finite() && container_width > 0.0) {
        return Err(RenderError::Config(format!(
            "container width must be positive, got {container_width}"
        )));
    }
    for page in pages {
        page.container.rescale(container_width);
        page.text.set_scale(container_width, page.info.width);
    }
    Ok(())
}

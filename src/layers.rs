//! Per-page layer triple: raster surface, text selection, annotations

use std::sync::Arc;

use log::warn;
use rayon::prelude::*;

use crate::anchors::AnchorId;
use crate::geometry::Rect;
use crate::types::{PageInfo, RasterPixels, Rgba, TextContent};

/// Byte length above which surface fills go through rayon
const PARALLEL_FILL_BYTES: usize = 800_000;

/// Fills an RGBA pixel buffer with one color
pub(crate) fn fill_pixels(pixels: &mut [u8], color: Rgba) {
    let px = [color.r, color.g, color.b, color.a];
    if pixels.len() >= PARALLEL_FILL_BYTES {
        pixels.par_chunks_mut(4096).for_each(|chunk| {
            for p in chunk.chunks_exact_mut(4) {
                p.copy_from_slice(&px);
            }
        });
    } else {
        for p in pixels.chunks_exact_mut(4) {
            p.copy_from_slice(&px);
        }
    }
}

/// The canvas layer: the page's current vector markup plus its
/// rasterization
pub struct RasterSurface {
    pub width_px: u32,
    pub height_px: u32,
    pub pixels: Arc<RasterPixels>,
    /// Vector markup the pixels were painted from
    pub vector: String,
}

impl RasterSurface {
    /// Allocates a surface filled with the background color
    #[must_use]
    pub fn new(width_px: u32, height_px: u32, background: Rgba) -> Self {
        Self {
            width_px,
            height_px,
            pixels: Arc::new(RasterPixels::solid(width_px, height_px, background)),
            vector: String::new(),
        }
    }

    /// Commits rasterized pixels. A commit whose dimensions disagree
    /// with the surface is accepted but flagged; the kernel reported
    /// those dimensions and the surface follows them.
    pub fn commit_pixels(&mut self, pixels: Arc<RasterPixels>) {
        if pixels.width_px != self.width_px || pixels.height_px != self.height_px {
            warn!(
                "canvas commit {}x{} onto {}x{} surface",
                pixels.width_px, pixels.height_px, self.width_px, self.height_px
            );
            self.width_px = pixels.width_px;
            self.height_px = pixels.height_px;
        }
        self.pixels = pixels;
    }
}

impl std::fmt::Debug for RasterSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterSurface")
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("vector_len", &self.vector.len())
            .finish_non_exhaustive()
    }
}

/// Invisible selection layer aligned to glyph metrics
#[derive(Clone, Debug, Default)]
pub struct TextLayer {
    /// On-screen scale: container width over page width in points
    pub scale: f32,
    pub content: TextContent,
}

impl TextLayer {
    #[must_use]
    pub fn new(content: TextContent, scale: f32) -> Self {
        Self { scale, content }
    }

    pub fn set_content(&mut self, content: TextContent) {
        self.content = content;
    }

    /// Keeps selection coordinates matched to the container's on-screen
    /// width
    pub fn set_scale(&mut self, container_width: f32, page_width_pt: f32) {
        if page_width_pt > 0.0 {
            self.scale = container_width / page_width_pt;
        }
    }

    /// Text covered by a page-space rect, in reading order. Lines are
    /// selected by vertical overlap; the first and last lines are
    /// clipped horizontally so a selection can start and end mid-line.
    #[must_use]
    pub fn text_in_rect(&self, rect: Rect) -> String {
        let mut selected: Vec<(f32, String)> = Vec::new();

        for line in &self.content.lines {
            let top = line.bounds.lo.y;
            let bottom = line.bounds.hi.y;
            if bottom < rect.lo.y || top > rect.hi.y {
                continue;
            }

            let is_first = top <= rect.lo.y && bottom >= rect.lo.y;
            let is_last = top <= rect.hi.y && bottom >= rect.hi.y;

            let mut text = String::new();
            for glyph in &line.glyphs {
                let include = if is_first && is_last {
                    glyph.x >= rect.lo.x && glyph.x <= rect.hi.x
                } else if is_first {
                    glyph.x >= rect.lo.x
                } else if is_last {
                    glyph.x <= rect.hi.x
                } else {
                    true
                };
                if include {
                    text.push(glyph.ch);
                }
            }

            if !text.is_empty() {
                selected.push((top, text));
            }
        }

        selected.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        selected
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// What activating a wired link does
#[derive(Clone, Debug, PartialEq)]
pub enum LinkAction {
    /// Open the target externally
    Url(String),
    /// Jump to an anchor in another page's annotation layer
    GoTo { page: usize, anchor: AnchorId },
}

/// One clickable region of the annotation overlay
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationBox {
    /// On-screen box in page units, derived from the annotation's
    /// transform matrix
    pub rect: Rect,
    pub action: LinkAction,
}

/// Link overlay plus the anchors other pages' links land on
#[derive(Clone, Debug, Default)]
pub struct AnnotationLayer {
    pub boxes: Vec<AnnotationBox>,
    /// Anchors mounted into this page as navigation targets
    pub anchors: Vec<AnchorId>,
}

impl AnnotationLayer {
    pub fn mount_anchor(&mut self, anchor: AnchorId) {
        if !self.anchors.contains(&anchor) {
            self.anchors.push(anchor);
        }
    }
}

/// CSS-level sizing of one page's raster container. Resize touches only
/// the scale here, never the pixels behind it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PageContainer {
    pub raster_width_px: u32,
    pub raster_height_px: u32,
    /// Container width over raster width
    pub scale: f32,
}

impl PageContainer {
    #[must_use]
    pub fn new(raster_width_px: u32, raster_height_px: u32) -> Self {
        Self {
            raster_width_px,
            raster_height_px,
            scale: 1.0,
        }
    }

    pub fn rescale(&mut self, container_width: f32) {
        if self.raster_width_px > 0 && container_width > 0.0 {
            self.scale = container_width / self.raster_width_px as f32;
        }
    }
}

/// One visible page: the layer triple plus its owning container
#[derive(Debug)]
pub struct DomPage {
    /// 0-based page index
    pub index: usize,
    pub info: PageInfo,
    pub container: PageContainer,
    pub raster: RasterSurface,
    pub text: TextLayer,
    pub annotations: AnnotationLayer,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Point, Size};
    use crate::types::{GlyphPos, TextLine};

    fn line(y: f32, text: &str) -> TextLine {
        TextLine {
            bounds: Rect::from_origin_size(Point::new(0.0, y), Size::new(100.0, 10.0)),
            glyphs: text
                .chars()
                .enumerate()
                .map(|(i, ch)| GlyphPos {
                    x: i as f32 * 10.0,
                    ch,
                })
                .collect(),
        }
    }

    fn layer() -> TextLayer {
        TextLayer::new(
            TextContent {
                lines: vec![line(0.0, "first line"), line(20.0, "second"), line(40.0, "third")],
            },
            1.0,
        )
    }

    #[test]
    fn text_in_rect_full_lines() {
        let layer = layer();
        let rect = Rect::from_origin_size(Point::new(0.0, 15.0), Size::new(100.0, 40.0));
        assert_eq!(layer.text_in_rect(rect), "second\nthird");
    }

    #[test]
    fn text_in_rect_clips_first_line_by_x() {
        let layer = layer();
        // Selection starts inside the first line, 6 glyphs in.
        let rect = Rect::from_origin_size(Point::new(60.0, 5.0), Size::new(100.0, 20.0));
        assert_eq!(layer.text_in_rect(rect), "line\nsecond");
    }

    #[test]
    fn text_in_rect_empty_outside() {
        let layer = layer();
        let rect = Rect::from_origin_size(Point::new(0.0, 500.0), Size::new(10.0, 10.0));
        assert_eq!(layer.text_in_rect(rect), "");
    }

    #[test]
    fn rescale_only_touches_scale() {
        let mut container = PageContainer::new(1200, 1600);
        container.rescale(600.0);
        assert_eq!(container.scale, 0.5);
        assert_eq!(container.raster_width_px, 1200);

        container.rescale(0.0);
        assert_eq!(container.scale, 0.5);
    }

    #[test]
    fn fill_small_and_large_buffers() {
        let color = Rgba {
            r: 1,
            g: 2,
            b: 3,
            a: 255,
        };

        let mut small = vec![0u8; 16];
        fill_pixels(&mut small, color);
        assert_eq!(&small[0..4], &[1, 2, 3, 255]);
        assert_eq!(&small[12..16], &[1, 2, 3, 255]);

        let mut large = vec![0u8; PARALLEL_FILL_BYTES];
        fill_pixels(&mut large, color);
        assert_eq!(&large[PARALLEL_FILL_BYTES - 4..], &[1, 2, 3, 255]);
    }

    #[test]
    fn commit_mismatched_pixels_follows_kernel_dims() {
        let mut surface = RasterSurface::new(10, 10, Rgba::WHITE);
        let committed = Arc::new(RasterPixels {
            pixels: vec![0; 20 * 20 * 4],
            width_px: 20,
            height_px: 20,
        });
        surface.commit_pixels(committed);
        assert_eq!(surface.width_px, 20);
        assert_eq!(surface.height_px, 20);
    }
}

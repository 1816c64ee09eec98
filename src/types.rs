//! Layer metadata types produced by the native kernel

use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Size, Transform};

/// One positioned glyph inside a text line
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlyphPos {
    /// X coordinate of the glyph origin in page units
    pub x: f32,
    /// The character
    pub ch: char,
}

/// A line of text with its bounding box and glyph positions
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    /// Line bounding box in page units
    pub bounds: Rect,
    /// Glyphs in reading order
    pub glyphs: Vec<GlyphPos>,
}

impl TextLine {
    /// Concatenates the line's glyphs into a string
    #[must_use]
    pub fn text(&self) -> String {
        self.glyphs.iter().map(|g| g.ch).collect()
    }
}

/// Text semantics for one page, aligned to glyph metrics
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub lines: Vec<TextLine>,
}

/// What activating an annotation does
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AnnotationAction {
    /// Open an external target
    Url { url: String },
    /// Navigate to another page of the same document
    GoTo { page: usize },
}

/// One link annotation as emitted by the kernel
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Placement of the annotation box within the page
    pub transform: Transform,
    /// Untransformed box size in page units
    pub size: Size,
    pub action: AnnotationAction,
}

impl Annotation {
    /// On-screen box: the unit box scaled to `size`, mapped through the transform
    #[must_use]
    pub fn screen_box(&self) -> Rect {
        self.transform
            .map_rect(Rect::from_origin_size(crate::geometry::Point::ZERO, self.size))
    }
}

/// Raw rasterized pixels for one page surface
///
/// RGBA, 4 bytes per pixel, rows packed without padding.
#[derive(Clone, PartialEq)]
pub struct RasterPixels {
    pub pixels: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

impl RasterPixels {
    #[must_use]
    pub fn solid(width_px: u32, height_px: u32, color: Rgba) -> Self {
        let mut out = Self {
            pixels: vec![0; width_px as usize * height_px as usize * 4],
            width_px,
            height_px,
        };
        crate::layers::fill_pixels(&mut out.pixels, color);
        out
    }
}

impl std::fmt::Debug for RasterPixels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterPixels")
            .field("width_px", &self.width_px)
            .field("height_px", &self.height_px)
            .field("len", &self.pixels.len())
            .finish()
    }
}

/// An RGBA color
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Self = Self {
        r: 0xff,
        g: 0xff,
        b: 0xff,
        a: 0xff,
    };

    /// Parses a `#rrggbb` lowercase hex color; callers validate the
    /// pattern before reaching this point
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if digits.len() != 6 {
            return None;
        }
        let r = u8::from_str_radix(&digits[0..2], 16).ok()?;
        let g = u8::from_str_radix(&digits[2..4], 16).ok()?;
        let b = u8::from_str_radix(&digits[4..6], 16).ok()?;
        Some(Self { r, g, b, a: 0xff })
    }
}

/// Everything the kernel hands back from a full page paint
#[derive(Clone, Debug)]
pub struct PagePaint {
    pub pixels: RasterPixels,
    pub text: TextContent,
    pub annotations: Vec<Annotation>,
}

/// Output of the semantics stage: the selection text plus the link
/// annotations of one page
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSemantics {
    pub text: TextContent,
    pub annotations: Vec<Annotation>,
}

/// Per-page static geometry, valid for one artifact revision
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageInfo {
    /// 0-based page index
    pub page_offset: usize,
    /// Page width in document units
    pub width: f32,
    /// Page height in document units
    pub height: f32,
}

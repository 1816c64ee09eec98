//! Page-space and device-space geometry

use serde::{Deserialize, Serialize};

/// A point in document units
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Width and height in document units
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Returns true when both dimensions are finite and strictly positive
    #[must_use]
    pub fn is_positive(self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// An axis-aligned rectangle spanning `lo` (top-left) to `hi` (bottom-right)
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub lo: Point,
    pub hi: Point,
}

impl Rect {
    pub const ZERO: Self = Self {
        lo: Point::ZERO,
        hi: Point::ZERO,
    };

    #[must_use]
    pub const fn new(lo: Point, hi: Point) -> Self {
        Self { lo, hi }
    }

    #[must_use]
    pub fn from_origin_size(origin: Point, size: Size) -> Self {
        Self {
            lo: origin,
            hi: Point::new(origin.x + size.width, origin.y + size.height),
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.hi.x - self.lo.x
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.hi.y - self.lo.y
    }

    #[must_use]
    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    /// A rect is empty when it encloses no area
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.lo.x && p.x < self.hi.x && p.y >= self.lo.y && p.y < self.hi.y
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Intersection of two rects; an empty overlap collapses to `Rect::ZERO`
    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let lo = Point::new(self.lo.x.max(other.lo.x), self.lo.y.max(other.lo.y));
        let hi = Point::new(self.hi.x.min(other.hi.x), self.hi.y.min(other.hi.y));
        if hi.x <= lo.x || hi.y <= lo.y {
            return Self::ZERO;
        }
        Self { lo, hi }
    }

    #[must_use]
    pub fn translate(&self, dx: f32, dy: f32) -> Self {
        Self {
            lo: Point::new(self.lo.x + dx, self.lo.y + dy),
            hi: Point::new(self.hi.x + dx, self.hi.y + dy),
        }
    }
}

/// A 2x3 affine transform in SVG order: `[a b c d e f]` maps
/// `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

impl Transform {
    #[must_use]
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    #[must_use]
    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: 0.0,
            f: 0.0,
        }
    }

    #[must_use]
    pub const fn translate(tx: f32, ty: f32) -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: tx,
            f: ty,
        }
    }

    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.a * p.x + self.c * p.y + self.e,
            self.b * p.x + self.d * p.y + self.f,
        )
    }

    /// Maps all four corners and returns their bounding box
    #[must_use]
    pub fn map_rect(&self, rect: Rect) -> Rect {
        let corners = [
            self.apply(rect.lo),
            self.apply(Point::new(rect.hi.x, rect.lo.y)),
            self.apply(Point::new(rect.lo.x, rect.hi.y)),
            self.apply(rect.hi),
        ];
        let mut lo = corners[0];
        let mut hi = corners[0];
        for c in &corners[1..] {
            lo.x = lo.x.min(c.x);
            lo.y = lo.y.min(c.y);
            hi.x = hi.x.max(c.x);
            hi.y = hi.y.max(c.y);
        }
        Rect { lo, hi }
    }
}

/// Computes the document-space region visible inside the host window.
///
/// `window` is the host window's inner size, `root` the mounted root's
/// bounding box in window coordinates (its origin goes negative as the
/// host scrolls down), `dom_scale` the configured host scale factor. A
/// non-positive result collapses to the origin rather than propagating
/// negative geometry.
#[must_use]
pub fn visible_rect(window: Size, root: Rect, dom_scale: f32) -> Rect {
    if !(dom_scale.is_finite() && dom_scale > 0.0) {
        return Rect::ZERO;
    }

    let win = Rect::from_origin_size(Point::ZERO, window);
    let overlap = win.intersect(&root);
    if overlap.is_empty() {
        return Rect::ZERO;
    }

    let x = (overlap.lo.x - root.lo.x) / dom_scale;
    let y = (overlap.lo.y - root.lo.y) / dom_scale;
    let w = overlap.width() / dom_scale;
    let h = overlap.height() / dom_scale;
    if !(w > 0.0 && h > 0.0) || !(x.is_finite() && y.is_finite()) {
        return Rect::ZERO;
    }

    Rect::from_origin_size(Point::new(x, y), Size::new(w, h))
}

/// Raster surface dimensions for a page at the given pixel density.
///
/// Page dimensions are rounded up to whole points before scaling so a
/// fractionally sized page never loses its last pixel row. Non-empty
/// pages always get at least a 1x1 surface.
#[must_use]
pub fn raster_dims(page: Size, pixel_per_pt: f32) -> (u32, u32) {
    let w = (page.width.ceil() * pixel_per_pt).round();
    let h = (page.height.ceil() * pixel_per_pt).round();
    ((w as u32).max(1), (h as u32).max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_disjoint_is_zero() {
        let a = Rect::from_origin_size(Point::ZERO, Size::new(10.0, 10.0));
        let b = Rect::from_origin_size(Point::new(20.0, 20.0), Size::new(5.0, 5.0));
        assert_eq!(a.intersect(&b), Rect::ZERO);
        assert!(!a.intersects(&b));
    }

    #[test]
    fn visible_rect_fully_inside_window() {
        let window = Size::new(800.0, 600.0);
        let root = Rect::from_origin_size(Point::new(100.0, 50.0), Size::new(400.0, 300.0));
        let rect = visible_rect(window, root, 1.0);
        assert_eq!(rect.lo, Point::ZERO);
        assert_eq!(rect.size(), Size::new(400.0, 300.0));
    }

    #[test]
    fn visible_rect_scrolled_past_top() {
        // Root scrolled 200px up: visible region starts 200 units into the document.
        let window = Size::new(800.0, 600.0);
        let root = Rect::from_origin_size(Point::new(0.0, -200.0), Size::new(800.0, 1000.0));
        let rect = visible_rect(window, root, 1.0);
        assert_eq!(rect.lo, Point::new(0.0, 200.0));
        assert_eq!(rect.size(), Size::new(800.0, 600.0));
    }

    #[test]
    fn visible_rect_applies_dom_scale() {
        let window = Size::new(800.0, 600.0);
        let root = Rect::from_origin_size(Point::new(0.0, -100.0), Size::new(800.0, 1200.0));
        let rect = visible_rect(window, root, 2.0);
        assert_eq!(rect.lo, Point::new(0.0, 50.0));
        assert_eq!(rect.size(), Size::new(400.0, 300.0));
    }

    #[test]
    fn visible_rect_collapses_non_positive() {
        let window = Size::new(800.0, 600.0);
        let below = Rect::from_origin_size(Point::new(0.0, 700.0), Size::new(800.0, 1000.0));
        assert_eq!(visible_rect(window, below, 1.0), Rect::ZERO);

        let degenerate = Rect::from_origin_size(Point::ZERO, Size::new(0.0, 600.0));
        assert_eq!(visible_rect(window, degenerate, 1.0), Rect::ZERO);

        assert_eq!(visible_rect(window, below, 0.0), Rect::ZERO);
        assert_eq!(visible_rect(window, below, f32::NAN), Rect::ZERO);
    }

    #[test]
    fn raster_dims_rounds_page_up() {
        assert_eq!(raster_dims(Size::new(595.3, 841.9), 2.0), (1192, 1684));
        assert_eq!(raster_dims(Size::new(0.2, 0.2), 1.0), (1, 1));
    }

    #[test]
    fn transform_maps_rect_bounds() {
        let t = Transform::scale(2.0, 3.0);
        let r = Rect::from_origin_size(Point::new(1.0, 1.0), Size::new(2.0, 2.0));
        let mapped = t.map_rect(r);
        assert_eq!(mapped.lo, Point::new(2.0, 3.0));
        assert_eq!(mapped.hi, Point::new(6.0, 9.0));
    }

    #[test]
    fn transform_translate_then_apply() {
        let t = Transform::translate(5.0, -2.0);
        assert_eq!(t.apply(Point::new(1.0, 1.0)), Point::new(6.0, -1.0));
    }
}

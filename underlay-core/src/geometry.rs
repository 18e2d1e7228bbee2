//! Planar geometry for page coordinates.
//!
//! All rectangles live in a top-left-origin coordinate system where `y`
//! increases downward, matching how the pipeline addresses page content.
//! Matrices use the usual 2x3 affine layout `(a, b, c, d, e, f)` with
//! row-vector points: `x' = a*x + c*y + e`, `y' = b*x + d*y + f`.
//! Composing `m1 * m2` applies `m1` first.

use serde::{Deserialize, Serialize};

pub const EPSILON: f32 = 1e-5;

#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline(always)]
    pub fn distance_to(&self, other: Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    #[inline(always)]
    pub fn transform(&self, m: &Matrix) -> Point {
        Point {
            x: m.a * self.x + m.c * self.y + m.e,
            y: m.b * self.x + m.d * self.y + m.f,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Normalized so that `x0 <= x1` and `y0 <= y1`.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub const UNIT: Rect = Rect {
        x0: 0.0,
        y0: 0.0,
        x1: 1.0,
        y1: 1.0,
    };

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    #[inline(always)]
    pub fn area(&self) -> f32 {
        if self.is_empty() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.x1 - self.x0 <= 0.0 || self.y1 - self.y0 <= 0.0
    }

    #[inline(always)]
    pub fn center(&self) -> Point {
        Point {
            x: (self.x0 + self.x1) / 2.0,
            y: (self.y0 + self.y1) / 2.0,
        }
    }

    #[inline(always)]
    pub fn top_left(&self) -> Point {
        Point::new(self.x0, self.y0)
    }

    #[inline(always)]
    pub fn top_right(&self) -> Point {
        Point::new(self.x1, self.y0)
    }

    #[inline(always)]
    pub fn bottom_left(&self) -> Point {
        Point::new(self.x0, self.y1)
    }

    #[inline(always)]
    pub fn bottom_right(&self) -> Point {
        Point::new(self.x1, self.y1)
    }

    /// Non-empty open intersection, cheaper than building the intersection
    /// rectangle when only the predicate is needed.
    #[inline(always)]
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x0 < other.x1 && other.x0 < self.x1 && self.y0 < other.y1 && other.y0 < self.y1
    }

    #[inline(always)]
    pub fn contains(&self, other: &Rect) -> bool {
        other.x0 >= self.x0 && other.y0 >= self.y0 && other.x1 <= self.x1 && other.y1 <= self.y1
    }

    #[inline(always)]
    pub fn contains_point(&self, p: Point) -> bool {
        p.x >= self.x0 && p.x <= self.x1 && p.y >= self.y0 && p.y <= self.y1
    }

    /// May produce an empty (degenerate) rectangle when the inputs are
    /// disjoint; callers check `is_empty`.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x0 > x1 || y0 > y1 {
            Rect::default()
        } else {
            Rect { x0, y0, x1, y1 }
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    #[inline(always)]
    pub fn x_overlap(&self, other: &Rect) -> f32 {
        f32::max(
            0.0,
            f32::min(self.x1, other.x1) - f32::max(self.x0, other.x0),
        )
    }

    pub fn translate(&self, dx: f32, dy: f32) -> Rect {
        Rect {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    pub fn expand(&self, margin: f32) -> Rect {
        Rect {
            x0: self.x0 - margin,
            y0: self.y0 - margin,
            x1: self.x1 + margin,
            y1: self.y1 + margin,
        }
    }

    /// Shrinks by the given fraction of the width/height on every side.
    pub fn shrink_by_ratio(&self, ratio: f32) -> Rect {
        Rect {
            x0: self.x0 + self.width() * ratio,
            y0: self.y0 + self.height() * ratio,
            x1: self.x1 - self.width() * ratio,
            y1: self.y1 - self.height() * ratio,
        }
    }

    /// Bounding box of the transformed corners.
    pub fn transform(&self, m: &Matrix) -> Rect {
        self.quad().transform(m).bounding_rect()
    }

    pub fn quad(&self) -> Quad {
        Quad {
            ul: self.top_left(),
            ur: self.top_right(),
            ll: self.bottom_left(),
            lr: self.bottom_right(),
        }
    }

    /// Matrix that maps this rectangle onto `target`.
    pub fn to_rect(&self, target: &Rect) -> Matrix {
        let sx = target.width() / self.width();
        let sy = target.height() / self.height();
        Matrix {
            a: sx,
            b: 0.0,
            c: 0.0,
            d: sy,
            e: target.x0 - self.x0 * sx,
            f: target.y0 - self.y0 * sy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Matrix::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Matrix {
            a: sx,
            d: sy,
            ..Matrix::IDENTITY
        }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Matrix {
            e: tx,
            f: ty,
            ..Matrix::IDENTITY
        }
    }

    /// Rotation in degrees. In the top-left, y-down coordinate system a
    /// positive angle rotates clockwise on screen. Right angles are exact.
    pub fn rotate(degrees: f32) -> Self {
        let normalized = degrees.rem_euclid(360.0);
        let (sin, cos) = if (normalized - 0.0).abs() < EPSILON {
            (0.0, 1.0)
        } else if (normalized - 90.0).abs() < EPSILON {
            (1.0, 0.0)
        } else if (normalized - 180.0).abs() < EPSILON {
            (0.0, -1.0)
        } else if (normalized - 270.0).abs() < EPSILON {
            (-1.0, 0.0)
        } else {
            normalized.to_radians().sin_cos()
        };
        Matrix {
            a: cos,
            b: sin,
            c: -sin,
            d: cos,
            e: 0.0,
            f: 0.0,
        }
    }

    /// `self * other`: applies `self` first, then `other`.
    pub fn concat(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.b * other.c,
            b: self.a * other.b + self.b * other.d,
            c: self.c * other.a + self.d * other.c,
            d: self.c * other.b + self.d * other.d,
            e: self.e * other.a + self.f * other.c + other.e,
            f: self.e * other.b + self.f * other.d + other.f,
        }
    }

    /// `None` when the matrix is singular.
    pub fn inverse(&self) -> Option<Matrix> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let a = self.d / det;
        let b = -self.b / det;
        let c = -self.c / det;
        let d = self.a / det;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -(self.e * a + self.f * c),
            f: -(self.e * b + self.f * d),
        })
    }
}

/// Four ordered corners: upper-left, upper-right, lower-left, lower-right.
/// Unlike [`Rect`] a quad survives non-axis-aligned transforms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quad {
    pub ul: Point,
    pub ur: Point,
    pub ll: Point,
    pub lr: Point,
}

impl Quad {
    pub fn new(ul: Point, ur: Point, ll: Point, lr: Point) -> Self {
        Self { ul, ur, ll, lr }
    }

    pub fn transform(&self, m: &Matrix) -> Quad {
        Quad {
            ul: self.ul.transform(m),
            ur: self.ur.transform(m),
            ll: self.ll.transform(m),
            lr: self.lr.transform(m),
        }
    }

    /// Transforms around a fixed pivot point: shift the pivot to the origin,
    /// apply the matrix, shift back.
    pub fn morph(&self, pivot: Point, m: &Matrix) -> Quad {
        let shifted = Matrix::translate(-pivot.x, -pivot.y)
            .concat(m)
            .concat(&Matrix::translate(pivot.x, pivot.y));
        self.transform(&shifted)
    }

    pub fn bounding_rect(&self) -> Rect {
        let xs = [self.ul.x, self.ur.x, self.ll.x, self.lr.x];
        let ys = [self.ul.y, self.ur.y, self.ll.y, self.lr.y];
        Rect {
            x0: xs.iter().copied().fold(f32::INFINITY, f32::min),
            y0: ys.iter().copied().fold(f32::INFINITY, f32::min),
            x1: xs.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            y1: ys.iter().copied().fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_normalization() {
        let r = Rect::new(10.0, 20.0, 5.0, 2.0);
        assert_eq!(r, Rect::new(5.0, 2.0, 10.0, 20.0));
        assert!(!r.is_empty());
        assert_eq!(r.width(), 5.0);
        assert_eq!(r.height(), 18.0);
    }

    #[test]
    fn test_intersect_disjoint_is_empty() {
        let a = Rect::new(0.0, 0.0, 1.0, 1.0);
        let b = Rect::new(2.0, 2.0, 3.0, 3.0);
        assert!(!a.intersects(&b));
        assert!(a.intersect(&b).is_empty());
        assert_eq!(a.intersect(&b).area(), 0.0);
    }

    #[test]
    fn test_intersect_touching_edges() {
        // A shared edge is not an open intersection.
        let a = Rect::new(0.0, 0.0, 2.0, 2.0);
        let b = Rect::new(2.0, 0.0, 4.0, 2.0);
        assert!(!a.intersects(&b));
        assert_eq!(a.intersect(&b).area(), 0.0);
    }

    #[test]
    fn test_union_with_empty() {
        let a = Rect::new(1.0, 1.0, 2.0, 2.0);
        assert_eq!(Rect::default().union(&a), a);
        assert_eq!(a.union(&Rect::default()), a);
        let b = Rect::new(0.0, 3.0, 4.0, 5.0);
        assert_eq!(a.union(&b), Rect::new(0.0, 1.0, 4.0, 5.0));
    }

    #[test]
    fn test_contains() {
        let outer = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains(&Rect::new(2.0, 2.0, 8.0, 8.0)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Rect::new(2.0, 2.0, 11.0, 8.0)));
    }

    #[test]
    fn test_matrix_rotate_right_angles_are_exact() {
        let m = Matrix::rotate(90.0);
        let p = Point::new(1.0, 0.0).transform(&m);
        assert_eq!(p, Point::new(0.0, 1.0));

        let m = Matrix::rotate(-90.0);
        let p = Point::new(1.0, 0.0).transform(&m);
        assert_eq!(p, Point::new(0.0, -1.0));

        let m = Matrix::rotate(180.0);
        let p = Point::new(1.0, 2.0).transform(&m);
        assert_eq!(p, Point::new(-1.0, -2.0));
    }

    #[test]
    fn test_matrix_concat_order() {
        // Scale then translate is not translate then scale.
        let scaled_then_moved = Matrix::scale(2.0, 2.0).concat(&Matrix::translate(10.0, 0.0));
        let p = Point::new(1.0, 1.0).transform(&scaled_then_moved);
        assert_eq!(p, Point::new(12.0, 2.0));

        let moved_then_scaled = Matrix::translate(10.0, 0.0).concat(&Matrix::scale(2.0, 2.0));
        let p = Point::new(1.0, 1.0).transform(&moved_then_scaled);
        assert_eq!(p, Point::new(22.0, 2.0));
    }

    #[test]
    fn test_matrix_inverse_roundtrip() {
        let m = Matrix::scale(2.0, 3.0)
            .concat(&Matrix::rotate(30.0))
            .concat(&Matrix::translate(5.0, -7.0));
        let inv = m.inverse().unwrap();
        let p = Point::new(3.5, -1.25);
        let back = p.transform(&m).transform(&inv);
        assert!(p.distance_to(back) < 1e-3);

        assert!(Matrix::scale(0.0, 1.0).inverse().is_none());
    }

    #[test]
    fn test_to_rect_maps_corners() {
        let unit = Rect::UNIT;
        let target = Rect::new(100.0, 50.0, 300.0, 250.0);
        let m = unit.to_rect(&target);
        assert_eq!(Point::new(0.0, 0.0).transform(&m), target.top_left());
        assert_eq!(Point::new(1.0, 1.0).transform(&m), target.bottom_right());
    }

    #[test]
    fn test_quad_morph_rotates_around_pivot() {
        let r = Rect::new(10.0, 10.0, 20.0, 20.0);
        let pivot = Point::new(10.0, 10.0);
        let rotated = r.quad().morph(pivot, &Matrix::rotate(180.0));
        // 180 degrees around the top-left corner mirrors the rect.
        assert_eq!(rotated.bounding_rect(), Rect::new(0.0, 0.0, 10.0, 10.0));
    }

    #[test]
    fn test_rect_transform_is_bounding_box() {
        let r = Rect::new(0.0, 0.0, 10.0, 2.0);
        let rotated = r.transform(&Matrix::rotate(90.0));
        assert!((rotated.width() - 2.0).abs() < 1e-4);
        assert!((rotated.height() - 10.0).abs() < 1e-4);
    }
}

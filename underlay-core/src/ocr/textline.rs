//! Detected text geometry, transformed back into page coordinates.

use crate::geometry::{Matrix, Point, Quad, Rect};
use crate::ocr::provider::schema::{Geometry, OcrLine};

/// Detected angles within this distance of a right angle are treated as
/// detection noise and snapped; the text is drawn perfectly straight.
const SNAP_TO_RIGHT_ANGLE_DEGREES: f32 = 25.0;

#[derive(Debug, Clone)]
pub struct TextWord {
    pub text: String,
    pub derotated_rect: Rect,
    pub orientation: f32,
}

#[derive(Debug, Clone)]
pub struct TextLine {
    pub text: String,
    /// Orientation in degrees after snapping.
    pub orientation: f32,
    /// Axis-aligned box after rotating the detected quad back around the
    /// page's bottom-left corner.
    pub derotated_rect: Rect,
    /// Box in original page coordinates.
    pub rect: Rect,
    /// In [0, 1].
    pub confidence: f32,
    pub words: Vec<TextWord>,
}

impl TextLine {
    /// `transform` maps the provider's normalized coordinates to the page
    /// coordinates of the original (unrotated) page.
    pub fn from_ocr(
        line: &OcrLine,
        orientation: f32,
        page_height: f32,
        transform: &Matrix,
    ) -> TextLine {
        let derotator = Derotator {
            orientation,
            transform: *transform,
            page_height,
        };
        let (derotated_rect, orientation) = derotator.derotate(&line.geometry);

        let bb = &line.geometry.bounding_box;
        let rect = Rect::new(bb.left, bb.top, bb.left + bb.width, bb.top + bb.height)
            .transform(transform);

        let words = line
            .words
            .iter()
            .map(|word| {
                let (derotated_rect, orientation) = derotator.derotate(&word.geometry);
                TextWord {
                    text: word.text.clone(),
                    derotated_rect,
                    orientation,
                }
            })
            .collect();

        TextLine {
            text: line.text.clone(),
            orientation,
            derotated_rect,
            rect,
            confidence: line.confidence / 100.0,
            words,
        }
    }
}

pub(crate) struct Derotator {
    pub orientation: f32,
    pub transform: Matrix,
    pub page_height: f32,
}

impl Derotator {
    /// Rotates the detected quad back around the page's bottom-left corner
    /// and returns the axis-aligned result with the effective orientation.
    pub fn derotate(&self, geometry: &Geometry) -> (Rect, f32) {
        let mut orientation = self.orientation;

        let corner = |i: usize| -> Point {
            geometry
                .polygon
                .get(i)
                .map(|p| Point::new(p.x, p.y).transform(&self.transform))
                .unwrap_or_default()
        };
        // Corner order on the wire: top-left, top-right, bottom-right,
        // bottom-left.
        let (top_left, top_right, bottom_right, bottom_left) = if geometry.polygon.len() >= 4 {
            (corner(0), corner(1), corner(2), corner(3))
        } else {
            let bb = &geometry.bounding_box;
            let rect = Rect::new(bb.left, bb.top, bb.left + bb.width, bb.top + bb.height)
                .transform(&self.transform);
            (
                rect.top_left(),
                rect.top_right(),
                rect.bottom_right(),
                rect.bottom_left(),
            )
        };
        let quad = Quad::new(top_left, top_right, bottom_left, bottom_right);

        let closest_right_angle = (orientation / 90.0).round() * 90.0;
        let snapped = (orientation - closest_right_angle).abs() < SNAP_TO_RIGHT_ANGLE_DEGREES;
        if snapped {
            // Small detected angles are as likely to be noise as real skew;
            // drawing at the exact right angle reads better either way.
            orientation = closest_right_angle;
        }

        let pivot = Point::new(0.0, self.page_height);
        let derotated = quad
            .morph(pivot, &Matrix::rotate(-orientation))
            .bounding_rect();

        let derotated = if snapped {
            // Straighten: keep the midline, use the true glyph height.
            let middle_y = (derotated.y0 + derotated.y1) / 2.0;
            let line_height = top_left.distance_to(bottom_left);
            Rect::new(
                derotated.x0,
                middle_y - line_height / 2.0,
                derotated.x1,
                middle_y + line_height / 2.0,
            )
        } else {
            derotated
        };

        (derotated, orientation)
    }
}

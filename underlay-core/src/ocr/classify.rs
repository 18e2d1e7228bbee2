//! Decides whether a page already carries real (vector) text.

use crate::geometry::Rect;
use crate::pdf::{BboxEntry, BboxKind};

/// A page is digitally born as soon as it draws visible text, unless all of
/// that text is covered by an image.
///
/// The exception handles scans where a previous OCR pass stored its result
/// as regular fill-text and the scan image is painted over it afterwards;
/// such pages still need OCR. A page without any image always counts as
/// digitally born.
pub fn is_digitally_born(log: &[BboxEntry]) -> bool {
    let mut text_union = Rect::default();
    let mut all_text_covered = false;
    let mut has_image = false;

    for entry in log {
        match entry.kind {
            // Degenerate text rectangles occur in the wild and carry no
            // visible glyphs.
            BboxKind::FillText | BboxKind::StrokeText if !entry.rect.is_empty() => {
                all_text_covered = false;
                text_union = text_union.union(&entry.rect);
            }
            BboxKind::FillImage => {
                has_image = true;
                if !text_union.is_empty() && entry.rect.contains(&text_union) {
                    all_text_covered = true;
                }
            }
            _ => {}
        }
    }

    !(has_image && (text_union.is_empty() || all_text_covered))
}

//! Removal of invisible text layers left behind by earlier OCR passes.
//!
//! Two policies. The standard one only strips invisible (`ignore-text`)
//! glyphs. The aggressive one additionally strips visible text that an image
//! covers completely, and reports a coverage mask of the text that remains
//! visible so that no new OCR text gets placed on top of it.

use tracing::debug;

use crate::geometry::Rect;
use crate::mask::Mask;
use crate::pdf::{BboxEntry, BboxKind, Pdf, Result};

/// Fraction by which an `ignore-text` rect is shrunk before the coverage
/// test. Scans that emit one image slice per word draw those slices slightly
/// smaller than the OCR boxes; the shrunk probe keeps them removable.
const IGNORE_TEXT_SHRINK: f32 = 0.1;
const IGNORE_TEXT_MAX_COVERAGE: f32 = 0.2;

/// Redacts every invisible-text rectangle on the page.
pub fn clean_old_ocr(pdf: &mut Pdf, index: usize) -> Result<usize> {
    let log = pdf.bbox_log(index)?;
    let mut counter = 0;
    for entry in &log {
        if entry.kind == BboxKind::IgnoreText {
            pdf.add_redaction(index, entry.rect);
            counter += 1;
        }
    }
    if counter > 0 {
        // One batch: removing redactions one at a time makes the glyphs
        // that remain shift position.
        pdf.apply_redactions(index)?;
        debug!("{counter} boxes removed");
    }
    Ok(counter)
}

struct AggressivePlan {
    mask: Mask,
    invisible: Vec<Rect>,
    preserved: usize,
}

fn aggressive_plan(log: &[BboxEntry], page_rect: &Rect) -> AggressivePlan {
    let mut mask = Mask::new(page_rect);
    let mut possibly_visible: Vec<Rect> = Vec::new();
    let mut invisible: Vec<Rect> = Vec::new();

    for entry in log {
        match entry.kind {
            BboxKind::IgnoreText => {
                // Digitally-born documents sometimes draw their glyphs as
                // fill-path elements and add ignore-text on top to make the
                // text selectable. Those must stay.
                if !mask.intersects(&entry.rect) {
                    invisible.push(entry.rect);
                } else {
                    let probe = entry.rect.shrink_by_ratio(IGNORE_TEXT_SHRINK);
                    if mask.coverage_ratio(&probe) < IGNORE_TEXT_MAX_COVERAGE {
                        invisible.push(entry.rect);
                    }
                }
            }
            BboxKind::FillText | BboxKind::StrokeText | BboxKind::FillPath
                if !entry.rect.is_empty() =>
            {
                mask.add_rect(&entry.rect);
                possibly_visible.push(entry.rect);
            }
            BboxKind::FillImage => {
                let mut kept = Vec::with_capacity(possibly_visible.len());
                for text_rect in possibly_visible.drain(..) {
                    if entry.rect.contains(&text_rect) {
                        mask.remove_rect(&text_rect);
                        invisible.push(text_rect);
                    } else {
                        kept.push(text_rect);
                    }
                }
                possibly_visible = kept;
            }
            _ => {}
        }
    }

    AggressivePlan {
        mask,
        invisible,
        preserved: possibly_visible.len(),
    }
}

/// Also cleans visible text that is completely covered by an image.
///
/// Returns the mask of text that is still (at least partially) visible;
/// cells with value 1 mark locations where no OCR text may be drawn.
pub fn clean_old_ocr_aggressive(pdf: &mut Pdf, index: usize) -> Result<Mask> {
    let log = pdf.bbox_log(index)?;
    let page_rect = pdf.rect(index)?;
    let plan = aggressive_plan(&log, &page_rect);

    if !plan.invisible.is_empty() {
        for rect in &plan.invisible {
            pdf.add_redaction(index, *rect);
        }
        pdf.apply_redactions(index)?;
        debug!("{} boxes removed", plan.invisible.len());
    }
    if plan.preserved > 0 {
        debug!("{} boxes preserved", plan.preserved);
    }
    Ok(plan.mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testutil::single_page_pdf_with_content;

    fn entry(kind: BboxKind, x0: f32, y0: f32, x1: f32, y1: f32) -> BboxEntry {
        BboxEntry {
            kind,
            rect: Rect::new(x0, y0, x1, y1),
        }
    }

    fn page() -> Rect {
        Rect::new(0.0, 0.0, 600.0, 800.0)
    }

    #[test]
    fn test_plain_ignore_text_is_removed() {
        let log = [entry(BboxKind::IgnoreText, 10.0, 10.0, 100.0, 22.0)];
        let plan = aggressive_plan(&log, &page());
        assert_eq!(plan.invisible.len(), 1);
        assert_eq!(plan.preserved, 0);
        assert!(!plan.mask.intersects(&Rect::new(0.0, 0.0, 600.0, 800.0)));
    }

    #[test]
    fn test_ignore_text_over_fill_path_is_preserved() {
        // Glyphs drawn as paths with a selectable text layer on top.
        let log = [
            entry(BboxKind::FillPath, 10.0, 10.0, 100.0, 22.0),
            entry(BboxKind::IgnoreText, 10.0, 10.0, 100.0, 22.0),
        ];
        let plan = aggressive_plan(&log, &page());
        assert!(plan.invisible.is_empty());
        assert_eq!(plan.preserved, 1);
        assert!(plan.mask.intersects(&Rect::new(10.0, 10.0, 100.0, 22.0)));
    }

    #[test]
    fn test_barely_touching_ignore_text_is_still_removed() {
        // A word-sized image slice covers only the edge of the OCR box;
        // the shrunk probe sees almost no coverage.
        let log = [
            entry(BboxKind::FillPath, 10.0, 10.0, 12.0, 22.0),
            entry(BboxKind::IgnoreText, 10.0, 10.0, 200.0, 22.0),
        ];
        let plan = aggressive_plan(&log, &page());
        assert_eq!(plan.invisible.len(), 1);
    }

    #[test]
    fn test_text_covered_by_image_becomes_invisible() {
        let log = [
            entry(BboxKind::FillText, 10.0, 10.0, 100.0, 22.0),
            entry(BboxKind::FillImage, 0.0, 0.0, 600.0, 800.0),
        ];
        let plan = aggressive_plan(&log, &page());
        assert_eq!(plan.invisible.len(), 1);
        assert_eq!(plan.preserved, 0);
        assert!(!plan.mask.intersects(&Rect::new(10.0, 10.0, 100.0, 22.0)));
    }

    #[test]
    fn test_text_partially_covered_stays_visible() {
        let log = [
            entry(BboxKind::FillText, 10.0, 10.0, 100.0, 22.0),
            entry(BboxKind::FillImage, 0.0, 0.0, 50.0, 800.0),
        ];
        let plan = aggressive_plan(&log, &page());
        assert!(plan.invisible.is_empty());
        assert_eq!(plan.preserved, 1);
    }

    #[test]
    fn test_clean_old_ocr_removes_invisible_layer() {
        let mut pdf = single_page_pdf_with_content(
            600.0,
            800.0,
            "BT /F1 12 Tf 3 Tr 100 700 Td (old ocr) Tj ET\nBT /F1 12 Tf 100 100 Td (visible) Tj ET",
        );
        let removed = clean_old_ocr(&mut pdf, 0).unwrap();
        assert_eq!(removed, 1);
        let log = pdf.bbox_log(0).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, BboxKind::FillText);
    }

    #[test]
    fn test_clean_old_ocr_idempotent_without_ignore_text() {
        let mut pdf = single_page_pdf_with_content(
            600.0,
            800.0,
            "BT /F1 12 Tf 100 700 Td (visible) Tj ET",
        );
        let before = pdf.bbox_log(0).unwrap();
        assert_eq!(clean_old_ocr(&mut pdf, 0).unwrap(), 0);
        let after = pdf.bbox_log(0).unwrap();
        assert_eq!(before.len(), after.len());
        assert_eq!(before[0].rect, after[0].rect);
        assert_eq!(before[0].kind, after[0].kind);
    }
}

//! Per-page OCR application: tiling oversized pages, submitting clips to
//! the provider, combining tile results, and selecting which detected lines
//! end up in the text layer.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::geometry::{Matrix, Rect};
use crate::mask::Mask;
use crate::ocr::provider::{call_with_backoff, schema::OcrDocument, OcrProvider};
use crate::ocr::readingorder::sort_lines;
use crate::ocr::request::MAX_REQUEST_BYTES;
use crate::ocr::textline::TextLine;
use crate::pdf::Pdf;

use super::pipeline::PipelineError;

/// Tile edge length in points. The provider officially supports much larger
/// pages, but detection quality degrades well before its hard limit.
pub const MAX_DIMENSION_POINTS: f32 = 2000.0;

/// Line rectangles covered at least this much by an already-kept line are
/// duplicates from tile overlap.
const DUPLICATE_COVERAGE: f32 = 0.6;

/// Blocks below the global threshold only keep lines with confidence above
/// `(1 + threshold) / 2`; confident blocks keep anything above half their
/// average.
fn block_line_threshold(avg_confidence: f32, confidence_threshold: f32) -> f32 {
    if avg_confidence < confidence_threshold {
        (1.0 + confidence_threshold) / 2.0
    } else {
        avg_confidence / 2.0
    }
}

/// Splits an oversized rectangle into the main rect followed by overlapping
/// square tiles clipped to it. Small rectangles pass through unchanged.
pub fn clip_rects(main_rect: &Rect) -> Vec<Rect> {
    let overlap = MAX_DIMENSION_POINTS / 5.0;
    if main_rect.width() <= MAX_DIMENSION_POINTS && main_rect.height() <= MAX_DIMENSION_POINTS {
        return vec![*main_rect];
    }
    let step = MAX_DIMENSION_POINTS - overlap;
    let mut rects = vec![*main_rect];
    let mut x0 = 0.0;
    while x0 < main_rect.width() - overlap {
        let mut y0 = 0.0;
        while y0 < main_rect.height() - overlap {
            let tile = Rect::new(x0, y0, x0 + MAX_DIMENSION_POINTS, y0 + MAX_DIMENSION_POINTS);
            rects.push(tile.intersect(main_rect));
            y0 += step;
        }
        x0 += step;
    }
    debug!(
        "applying text extraction also to {} smaller page excerpts",
        rects.len() - 1
    );
    rects
}

fn covered_in(line: &TextLine, others: &[TextLine]) -> bool {
    others.iter().any(|other| {
        other.rect.intersect(&line.rect).area() >= DUPLICATE_COVERAGE * line.rect.area()
    })
}

/// Merges line sets from overlapping tiles. Lines of the first set win;
/// second-set lines only enter where they are not already covered.
pub fn combine_text_lines(first: Vec<TextLine>, second: Vec<TextLine>) -> Vec<TextLine> {
    let mut kept: Vec<TextLine> = first
        .into_iter()
        .filter(|line| !covered_in(line, &second))
        .collect();
    let additions: Vec<TextLine> = second
        .into_iter()
        .filter(|line| !covered_in(line, &kept))
        .collect();
    kept.extend(additions);
    kept
}

struct SelectedLines {
    draw: Vec<TextLine>,
    processed_rects: Vec<Rect>,
    vertical_detected: bool,
}

/// Walks the blocks in reading order and applies the confidence policy and
/// the visible-text mask. With `detect_vertical` set, upright rectangles
/// are not drawn but flagged for the rotated second pass.
fn select_lines(
    text_lines: Vec<TextLine>,
    mask: Option<&Mask>,
    confidence_threshold: f32,
    detect_vertical: bool,
) -> SelectedLines {
    let mut selected = SelectedLines {
        draw: Vec::new(),
        processed_rects: Vec::new(),
        vertical_detected: false,
    };
    for block in sort_lines(text_lines) {
        let avg_confidence =
            block.lines.iter().map(|l| l.confidence).sum::<f32>() / block.lines.len() as f32;
        let line_threshold = block_line_threshold(avg_confidence, confidence_threshold);

        for line in block.lines {
            if mask.is_some_and(|m| m.intersects(&line.rect)) {
                // Still-visible text lives here; adding OCR on top would
                // double it up.
                continue;
            }
            if detect_vertical {
                if line.rect.height() > line.rect.width() && line.text.chars().count() > 2 {
                    selected.vertical_detected = true;
                } else if line.confidence > line_threshold {
                    selected.processed_rects.push(line.rect);
                    selected.draw.push(line);
                } else if line.rect.width() > line.rect.height() && line.text.chars().count() > 2 {
                    // A clearly horizontal rect counts as handled even at
                    // low confidence, so the second pass masks it out.
                    selected.processed_rects.push(line.rect);
                }
            } else if line.confidence > line_threshold {
                selected.draw.push(line);
            }
        }
    }
    selected
}

/// One page's OCR job: owns the sanitized single-page request document and
/// submits clips of it to the provider.
pub struct OcrJob<'a> {
    provider: &'a dyn OcrProvider,
    confidence_threshold: f32,
    request_doc: Pdf,
    page_rect: Rect,
    visible_text_mask: Option<&'a Mask>,
    tmp_dir: &'a Path,
}

impl<'a> OcrJob<'a> {
    pub fn new(
        provider: &'a dyn OcrProvider,
        confidence_threshold: f32,
        request_doc: Pdf,
        visible_text_mask: Option<&'a Mask>,
        tmp_dir: &'a Path,
    ) -> Result<Self, PipelineError> {
        let page_rect = request_doc.rect(0)?;
        Ok(Self {
            provider,
            confidence_threshold,
            request_doc,
            page_rect,
            visible_text_mask,
            tmp_dir,
        })
    }

    pub fn page_rect(&self) -> Rect {
        self.page_rect
    }

    /// Full OCR for the page, with the double-page workaround and the
    /// vertical-text check applied.
    pub async fn apply_ocr(&mut self, clip_rect: Rect) -> Result<Vec<TextLine>, PipelineError> {
        let text_lines = self.ocr_text_lines(clip_rect, 0).await?;

        let fits_single_request = self.page_rect.width() < MAX_DIMENSION_POINTS
            && self.page_rect.height() < MAX_DIMENSION_POINTS;
        if fits_single_request
            && text_lines.len() > 30
            && text_lines
                .iter()
                .all(|line| !self.intersects_middle(&line.rect, line.confidence))
        {
            // Many lines and not a single confident one crossing the page
            // middle: almost certainly two scanned pages side by side.
            // OCR each half separately for better line grouping.
            debug!("double page workaround");
            let page_rect = self.page_rect;
            let middle = (page_rect.x0 + page_rect.x1) / 2.0;
            let left_clip = Rect::new(page_rect.x0, page_rect.y0, middle, page_rect.y1);
            let right_clip = Rect::new(middle, page_rect.y0, page_rect.x1, page_rect.y1);

            let left_lines = self.ocr_text_lines(left_clip, 0).await?;
            let mut lines_to_draw = self.apply_vertical_check(left_lines, left_clip).await?;

            let right_lines = self.ocr_text_lines(right_clip, 0).await?;
            lines_to_draw.extend(self.apply_vertical_check(right_lines, right_clip).await?);
            Ok(lines_to_draw)
        } else {
            self.apply_vertical_check(text_lines, clip_rect).await
        }
    }

    /// Selects lines to draw; when upright text is suspected, masks the
    /// already-handled horizontal text white and runs a second OCR pass
    /// with the page rotated 90 degrees.
    async fn apply_vertical_check(
        &mut self,
        text_lines: Vec<TextLine>,
        clip_rect: Rect,
    ) -> Result<Vec<TextLine>, PipelineError> {
        let selected = select_lines(
            text_lines,
            self.visible_text_mask,
            self.confidence_threshold,
            true,
        );
        let mut lines_to_draw = selected.draw;

        if selected.vertical_detected {
            debug!("potential vertical text detected, running OCR again with horizontal text masked");
            self.request_doc
                .white_out_rects(0, &selected.processed_rects)?;
            let vertical_lines = self.ocr_text_lines(clip_rect, 90).await?;
            let vertical_selected = select_lines(
                vertical_lines,
                self.visible_text_mask,
                self.confidence_threshold,
                false,
            );
            lines_to_draw.extend(vertical_selected.draw);
        }
        Ok(lines_to_draw)
    }

    /// OCR over all clip tiles of `clip_rect`, de-duplicating as tiles come
    /// in (earlier tiles win).
    async fn ocr_text_lines(
        &mut self,
        clip_rect: Rect,
        rotate: i32,
    ) -> Result<Vec<TextLine>, PipelineError> {
        let mut text_lines = Vec::new();
        for tile in clip_rects(&clip_rect) {
            let new_lines = self.ocr_clip(&tile, rotate).await?;
            text_lines = combine_text_lines(text_lines, new_lines);
        }
        Ok(text_lines)
    }

    /// Submits one clip to the provider and maps the response back into
    /// page coordinates. Provider failures degrade to an empty line set.
    async fn ocr_clip(
        &mut self,
        clip_rect: &Rect,
        rotate: i32,
    ) -> Result<Vec<TextLine>, PipelineError> {
        let old_rotation = self.request_doc.rotation(0)?;
        let old_cropbox = self.request_doc.cropbox(0)?;

        self.request_doc.set_cropbox_clip(0, clip_rect)?;
        self.request_doc
            .set_rotation(0, old_rotation + rotate)?;
        let tmp_path = self.tmp_file_path("pdf");
        let save_result = self.request_doc.save_deflated(&tmp_path);

        self.request_doc.set_rotation(0, old_rotation)?;
        let mediabox = self.request_doc.mediabox(0)?;
        self.request_doc
            .set_cropbox(0, old_cropbox.intersect(&mediabox))?;
        if let Err(err) = save_result {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(err.into());
        }

        let document = self.call_provider(&tmp_path).await;
        if let Err(err) = std::fs::remove_file(&tmp_path) {
            warn!("failed to remove request file {tmp_path:?}: {err}");
        }
        let document = match document {
            Some(document) => document,
            None => return Ok(Vec::new()),
        };

        let transform = provider_coordinate_transform(clip_rect, rotate);
        let page_height = self.page_rect.height();
        Ok(text_lines_from_document(
            &document,
            &transform,
            rotate,
            page_height,
        ))
    }

    async fn call_provider(&self, tmp_path: &Path) -> Option<OcrDocument> {
        let data = match std::fs::read(tmp_path) {
            Ok(data) => data,
            Err(err) => {
                warn!("failed to read request file back: {err}");
                return None;
            }
        };
        if data.len() >= MAX_REQUEST_BYTES {
            warn!("request document is {} bytes, skipping clip", data.len());
            return None;
        }
        match call_with_backoff(self.provider, &data).await {
            Ok(document) => Some(document),
            Err(err) => {
                // Both exhausted retries and hard rejections degrade to an
                // empty clip rather than failing the page.
                warn!("provider call failed: {err}");
                None
            }
        }
    }

    fn tmp_file_path(&self, extension: &str) -> PathBuf {
        self.tmp_dir
            .join(format!("clip_{}.{extension}", Uuid::new_v4()))
    }

    fn intersects_middle(&self, rect: &Rect, confidence: f32) -> bool {
        let middle = (self.page_rect.x0 + self.page_rect.x1) / 2.0;
        confidence > self.confidence_threshold && !(rect.x0 > middle || rect.x1 < middle)
    }
}

/// Transform from the provider's normalized coordinates (relative to the
/// rotated clip) back to unrotated page coordinates.
fn provider_coordinate_transform(clip_rect: &Rect, rotate: i32) -> Matrix {
    // The rectangle surrounding the rotated clip is what the provider saw.
    let rotated_clip_rect = clip_rect.transform(&Matrix::rotate(rotate as f32));
    let to_rotated = Rect::UNIT.to_rect(&rotated_clip_rect);
    to_rotated.concat(&Matrix::rotate(-rotate as f32))
}

fn text_lines_from_document(
    document: &OcrDocument,
    transform: &Matrix,
    rotate: i32,
    page_height: f32,
) -> Vec<TextLine> {
    let page = match document.pages.first() {
        Some(page) => page,
        None => return Vec::new(),
    };
    let orientation = page.orientation_degrees - rotate as f32;
    page.lines
        .iter()
        .map(|line| TextLine::from_ocr(line, orientation, page_height, transform))
        .collect()
}

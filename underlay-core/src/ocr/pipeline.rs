//! Per-document driver: classify, normalize, clean, OCR and overlay each
//! page, then write the compacted result and verify it.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::mask::Mask;
use crate::ocr::provider::OcrProvider;
use crate::ocr::textline::TextLine;
use crate::ocr::{apply, classify, clean, draw, normalize, request};
use crate::pdf::{Pdf, PdfError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Pdf(#[from] PdfError),
    /// Corrupt inputs can produce an empty or truncated output document,
    /// sometimes without any earlier error; the page count check catches
    /// them after the final save.
    #[error("output document contains {actual} pages instead of {expected}")]
    PageCountMismatch { expected: usize, actual: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    /// Errors worth one Ghostscript repair attempt: structurally bad input
    /// or a save that silently lost pages.
    fn is_repairable(&self) -> bool {
        match self {
            PipelineError::Pdf(err) => err.is_format_error(),
            PipelineError::PageCountMismatch { .. } => true,
            PipelineError::Io(_) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Global confidence threshold in [0, 1].
    pub confidence_threshold: f32,
    pub use_aggressive_strategy: bool,
    /// When set, only this page (zero-based) is processed and the output
    /// contains it plus a page with the visible overlay.
    pub debug_page: Option<usize>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProcessResult {
    pub number_of_pages: Option<usize>,
}

/// Runs the pipeline, falling back to a Ghostscript rewrite of the input
/// when the first attempt fails on an input-format problem.
pub async fn process(
    input_path: &Path,
    output_path: &Path,
    tmp_dir: &Path,
    provider: &dyn OcrProvider,
    options: &ProcessOptions,
) -> Result<ProcessResult, PipelineError> {
    match process_pdf(input_path, output_path, tmp_dir, provider, options).await {
        Ok(result) => Ok(result),
        Err(err) if err.is_repairable() => {
            warn!("encountered {err}; trying Ghostscript preprocessing");
            let repaired_path = tmp_dir.join("gs.pdf");
            ghostscript_rewrite(input_path, &repaired_path).await?;
            process_pdf(&repaired_path, output_path, tmp_dir, provider, options).await
        }
        Err(err) => Err(err),
    }
}

async fn ghostscript_rewrite(input_path: &Path, output_path: &Path) -> Result<(), PipelineError> {
    let status = tokio::process::Command::new("gs")
        .arg("-sDEVICE=pdfwrite")
        .arg("-dCompatibilityLevel=1.4")
        .arg("-dPDFSETTINGS=/default")
        .arg("-dNOPAUSE")
        .arg("-dQUIET")
        .arg("-dBATCH")
        .arg(format!("-sOutputFile={}", output_path.display()))
        .arg(input_path)
        .status()
        .await?;
    if !status.success() {
        warn!("ghostscript exited with {status}");
    }
    Ok(())
}

#[instrument(skip_all, fields(input = %in_path.display()))]
async fn process_pdf(
    in_path: &Path,
    out_path: &Path,
    tmp_dir: &Path,
    provider: &dyn OcrProvider,
    options: &ProcessOptions,
) -> Result<ProcessResult, PipelineError> {
    std::fs::create_dir_all(tmp_dir)?;

    let mut doc = Pdf::open(in_path)?;
    let in_page_count = doc.page_count();
    let mut debug_lines: Vec<TextLine> = Vec::new();

    for page_index in 0..in_page_count {
        if let Some(debug_page) = options.debug_page {
            if page_index != debug_page {
                continue;
            }
        }
        info!("page {}/{}", page_index + 1, in_page_count);

        let digitally_born = classify::is_digitally_born(&doc.bbox_log(page_index)?);

        if !digitally_born {
            normalize::resize_page(&mut doc, page_index)?;
            normalize::replace_jpx_images(&mut doc, page_index)?;
            normalize::crop_images(&mut doc, page_index)?;
        }

        let visible_text_mask: Option<Mask> = if options.use_aggressive_strategy {
            Some(clean::clean_old_ocr_aggressive(&mut doc, page_index)?)
        } else if !digitally_born {
            clean::clean_old_ocr(&mut doc, page_index)?;
            None
        } else {
            info!("skipping digitally-born page");
            continue;
        };

        let lines_to_draw = process_page(
            &doc,
            page_index,
            provider,
            tmp_dir,
            options,
            visible_text_mask.as_ref(),
        )
        .await?;
        draw::draw_ocr_text_page(&mut doc, page_index, &lines_to_draw, false)?;
        if options.debug_page.is_some() {
            debug_lines = lines_to_draw;
        }
    }

    if let Some(debug_page) = options.debug_page {
        doc.keep_only_page(debug_page)?;
        draw::append_visible_overlay_page(&mut doc, 0, &debug_lines)?;
    }

    doc.save_compact(out_path)?;

    // Re-open to verify both readability and the page count; corrupt inputs
    // have produced broken outputs without any error before.
    let out_page_count = Pdf::open(out_path)?.page_count();
    if options.debug_page.is_none() && out_page_count != in_page_count {
        return Err(PipelineError::PageCountMismatch {
            expected: in_page_count,
            actual: out_page_count,
        });
    }
    Ok(ProcessResult {
        number_of_pages: Some(out_page_count),
    })
}

/// OCR for a single page; failures that only affect this page degrade to an
/// empty line set.
async fn process_page(
    doc: &Pdf,
    page_index: usize,
    provider: &dyn OcrProvider,
    tmp_dir: &Path,
    options: &ProcessOptions,
    visible_text_mask: Option<&Mask>,
) -> Result<Vec<TextLine>, PipelineError> {
    let request_doc = match request::build_request_document(doc, page_index)? {
        Some(request_doc) => request_doc,
        None => return Ok(Vec::new()),
    };
    let mut job = apply::OcrJob::new(
        provider,
        options.confidence_threshold,
        request_doc,
        visible_text_mask,
        tmp_dir,
    )?;
    let clip = job.page_rect();
    job.apply_ocr(clip).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;
    use crate::ocr::provider::schema::{
        BoundingBox, Geometry, OcrDocument, OcrLine, OcrPage, OcrWord, PolygonPoint,
    };
    use crate::ocr::provider::stub::StubProvider;
    use crate::pdf::testutil::{document_with_pages, tiny_jpeg};
    use crate::pdf::BboxKind;

    fn normalized_geometry(left: f32, top: f32, width: f32, height: f32) -> Geometry {
        Geometry {
            bounding_box: BoundingBox {
                left,
                top,
                width,
                height,
            },
            polygon: vec![
                PolygonPoint { x: left, y: top },
                PolygonPoint {
                    x: left + width,
                    y: top,
                },
                PolygonPoint {
                    x: left + width,
                    y: top + height,
                },
                PolygonPoint {
                    x: left,
                    y: top + height,
                },
            ],
        }
    }

    fn one_line_response(text: &str) -> OcrDocument {
        let geometry = normalized_geometry(0.1, 0.1, 0.4, 0.02);
        OcrDocument {
            pages: vec![OcrPage {
                lines: vec![OcrLine {
                    text: text.into(),
                    confidence: 99.0,
                    geometry: geometry.clone(),
                    words: vec![OcrWord {
                        text: text.into(),
                        confidence: 99.0,
                        geometry,
                    }],
                }],
                orientation_degrees: 0.0,
            }],
        }
    }

    fn scan_document(pages: usize) -> (tempfile::TempDir, std::path::PathBuf) {
        let tmp = tempfile::tempdir().expect("tempdir");
        // Every page is a full-bleed scan image: not digitally born.
        let mut pdf = document_with_pages(&vec![String::new(); pages], 600.0, 800.0);
        for index in 0..pages {
            let name = crate::pdf::testutil::add_jpeg_xobject(&mut pdf, index, tiny_jpeg(24, 32), 24, 32);
            pdf.set_page_content(
                index,
                format!("q 600 0 0 800 0 0 cm /{name} Do Q").into_bytes(),
            )
            .expect("set content");
        }
        let path = tmp.path().join("input.pdf");
        let bytes = pdf.save_to_bytes().expect("serialize");
        std::fs::write(&path, bytes).expect("write input");
        (tmp, path)
    }

    fn options() -> ProcessOptions {
        ProcessOptions {
            confidence_threshold: 0.9,
            use_aggressive_strategy: false,
            debug_page: None,
        }
    }

    #[tokio::test]
    async fn test_process_preserves_page_count() {
        let (tmp, input) = scan_document(3);
        let output = tmp.path().join("output.pdf");
        let provider = StubProvider::new(vec![Ok(one_line_response("hello"))]);
        let result = process(&input, &output, tmp.path(), &provider, &options())
            .await
            .expect("pipeline");
        assert_eq!(result.number_of_pages, Some(3));
        assert_eq!(Pdf::open(&output).unwrap().page_count(), 3);
    }

    #[tokio::test]
    async fn test_process_adds_invisible_text_layer() {
        let (tmp, input) = scan_document(1);
        let output = tmp.path().join("output.pdf");
        let provider = StubProvider::new(vec![Ok(one_line_response("buried treasure"))]);
        process(&input, &output, tmp.path(), &provider, &options())
            .await
            .expect("pipeline");

        let out = Pdf::open(&output).unwrap();
        let log = out.bbox_log(0).unwrap();
        let ignore_entries: Vec<_> = log
            .iter()
            .filter(|e| e.kind == BboxKind::IgnoreText)
            .collect();
        assert_eq!(ignore_entries.len(), 1, "log was {log:?}");
        // Normalized (0.1, 0.1, 0.4 wide) on a 600x800 page.
        let rect = ignore_entries[0].rect;
        assert!((rect.x0 - 60.0).abs() < 2.0, "rect {rect:?}");
        assert!((rect.x1 - 300.0).abs() < 2.0, "rect {rect:?}");
    }

    #[tokio::test]
    async fn test_digitally_born_pages_are_skipped() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pdf = document_with_pages(
            &["BT /F1 12 Tf 100 700 Td (born digital) Tj ET".to_string()],
            600.0,
            800.0,
        );
        let input = tmp.path().join("input.pdf");
        let mut pdf = pdf;
        std::fs::write(&input, pdf.save_to_bytes().unwrap()).unwrap();
        let output = tmp.path().join("output.pdf");

        let provider = StubProvider::new(vec![Ok(one_line_response("nothing"))]);
        process(&input, &output, tmp.path(), &provider, &options())
            .await
            .expect("pipeline");
        assert_eq!(provider.call_count(), 0, "no OCR for digitally-born pages");
        let out = Pdf::open(&output).unwrap();
        assert!(out
            .bbox_log(0)
            .unwrap()
            .iter()
            .all(|e| e.kind != BboxKind::IgnoreText));
    }

    #[tokio::test]
    async fn test_debug_page_mode_outputs_two_pages() {
        let (tmp, input) = scan_document(3);
        let output = tmp.path().join("output.pdf");
        let provider = StubProvider::new(vec![Ok(one_line_response("page two"))]);
        let mut opts = options();
        opts.debug_page = Some(1);
        let result = process(&input, &output, tmp.path(), &provider, &opts)
            .await
            .expect("pipeline");
        assert_eq!(result.number_of_pages, Some(2));
        // Exactly one OCR call: only the selected page was processed.
        assert_eq!(provider.call_count(), 1);

        let out = Pdf::open(&output).unwrap();
        assert_eq!(out.page_count(), 2);
        // The appended overlay page carries visible text.
        assert!(out
            .bbox_log(1)
            .unwrap()
            .iter()
            .any(|e| e.kind == BboxKind::FillText));
    }

    #[tokio::test]
    async fn test_provider_rejection_still_produces_output() {
        let (tmp, input) = scan_document(1);
        let output = tmp.path().join("output.pdf");
        let provider = StubProvider::new(vec![Err(
            crate::ocr::provider::OcrError::InvalidParameter("too big".into()),
        )]);
        let result = process(&input, &output, tmp.path(), &provider, &options())
            .await
            .expect("pipeline must absorb provider rejections");
        assert_eq!(result.number_of_pages, Some(1));
    }

    #[tokio::test]
    async fn test_unreadable_input_fails() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let input = tmp.path().join("input.pdf");
        std::fs::write(&input, b"not a pdf at all").unwrap();
        let output = tmp.path().join("output.pdf");
        let provider = StubProvider::new(vec![]);
        let result = process(&input, &output, tmp.path(), &provider, &options()).await;
        assert!(result.is_err());
    }
}

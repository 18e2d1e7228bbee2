//! Strongly typed adapter over the PDF toolkit.
//!
//! The rest of the pipeline never touches `lopdf` objects directly; it deals
//! in [`BboxEntry`], [`ImageInfo`] and the [`Pdf`] wrapper. This keeps the
//! untyped dictionary-poking confined to one module tree.

pub mod content;
pub mod document;
pub mod fonts;
pub mod images;
#[cfg(test)]
pub(crate) mod testutil;

pub use document::Pdf;
pub use images::{ExtractedImage, ImageEncoding, ImageInfo};

use crate::geometry::Rect;

/// Semantic category of a drawing operation on a page.
///
/// `IgnoreText` is text drawn in invisible render mode, which is how OCR
/// layers are stored; `FillText`/`StrokeText` are visible glyphs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BboxKind {
    FillText,
    StrokeText,
    IgnoreText,
    FillPath,
    FillImage,
    Other,
}

/// One entry of the page's drawing-operator log, in page coordinates
/// (top-left origin, y down).
#[derive(Debug, Clone, Copy)]
pub struct BboxEntry {
    pub kind: BboxKind,
    pub rect: Rect,
}

#[derive(Debug, thiserror::Error)]
pub enum PdfError {
    #[error("pdf parse error: {0}")]
    Parse(#[from] lopdf::Error),
    #[error("malformed pdf: {0}")]
    Malformed(String),
    #[error("page {0} out of range")]
    PageOutOfRange(usize),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("unsupported image format: {0}")]
    UnsupportedImage(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PdfError {
    /// Input-format errors are the class that a Ghostscript repair pass can
    /// plausibly fix; everything else propagates directly.
    pub fn is_format_error(&self) -> bool {
        matches!(self, PdfError::Parse(_) | PdfError::Malformed(_))
    }
}

pub type Result<T> = std::result::Result<T, PdfError>;

//! Page normalization ahead of OCR: tiny or rotated pages are re-rendered,
//! JPX images converted, and oversized scan images cropped to the page.

use tracing::{debug, warn};

use crate::geometry::{Matrix, Rect};
use crate::pdf::{images, ImageEncoding, Pdf, PdfError, Result};

/// Pages narrower than this are enlarged; OCR providers return poor
/// geometry on stamp-sized pages.
const MIN_PAGE_WIDTH: f32 = 144.0;
const ENLARGE_FACTOR: f32 = 20.0;

/// Images may stick out this far (in points) beyond the page before
/// cropping pays off.
const CROP_MARGIN: f32 = 10.0;

/// Cropped image data must shrink below this fraction of the original
/// encoded size to be worth the quality loss of re-encoding.
const CROP_MIN_SHRINK: f32 = 0.8;

/// Re-renders pages that are too small or carry a non-zero rotation.
/// Afterwards the page has `Rotate 0` and at least the minimum width.
pub fn resize_page(pdf: &mut Pdf, index: usize) -> Result<()> {
    let rect = pdf.rect(index)?;
    let rotation = pdf.rotation(index)?;
    if rect.width() < MIN_PAGE_WIDTH {
        debug!(
            "resizing/enlarging page with small dimensions {:.2}x{:.2}",
            rect.width(),
            rect.height()
        );
        pdf.rebuild_page_scaled(index, ENLARGE_FACTOR)?;
    } else if rotation != 0 {
        debug!("resetting page rotation from {rotation} to 0");
        pdf.rebuild_page_scaled(index, 1.0)?;
    }
    Ok(())
}

/// Re-encodes JPX images as JPEG. Several viewers, most notably the Edge
/// browser, display JPX slowly or at bad quality.
pub fn replace_jpx_images(pdf: &mut Pdf, index: usize) -> Result<()> {
    for info in pdf.image_infos(index)? {
        if info.encoding != ImageEncoding::Jpx {
            continue;
        }
        debug!("converting JPX image to JPEG (bbox {:?})", info.bbox);
        match pdf.decode_image(info.xref) {
            Ok(img) => pdf.replace_image(info.xref, &img)?,
            Err(err) if is_image_skip(&err) => {
                warn!("skipping JPX conversion: {err}");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Determines the axis-aligned rotation encoded in an image placement
/// matrix, if any.
fn rotation_from_transform(transform: &Matrix) -> Option<i32> {
    let eps = crate::geometry::EPSILON;
    if transform.b.abs() < eps && transform.c.abs() < eps {
        if transform.a.abs() > eps && transform.d.abs() > eps {
            if transform.a > 0.0 && transform.d > 0.0 {
                return Some(0);
            }
            if transform.a < 0.0 && transform.d < 0.0 {
                return Some(180);
            }
        }
    }
    if transform.a.abs() < eps && transform.d.abs() < eps {
        if transform.b.abs() > eps && transform.c.abs() > eps {
            if transform.b > 0.0 && transform.c < 0.0 {
                return Some(90);
            }
            if transform.b < 0.0 && transform.c > 0.0 {
                return Some(270);
            }
        }
    }
    None
}

/// Crops a scan image that extends far beyond the page down to the visible
/// region, re-inserting it only when that meaningfully shrinks the file.
pub fn crop_images(pdf: &mut Pdf, index: usize) -> Result<()> {
    if pdf.rotation(index)? != 0 {
        // Cropped images have ended up misplaced on rotated pages before;
        // the resize step normally reset the rotation already.
        debug!(
            "skipping page because rotation is not 0 but {}",
            pdf.rotation(index)?
        );
        return Ok(());
    }
    let infos = pdf.image_infos(index)?;
    if infos.len() > 1 {
        // Mutating one image invalidates the recorded geometry of the
        // others; a page with several images is left alone.
        debug!("skipping page with {} images", infos.len());
        return Ok(());
    }
    let page_rect = pdf.rect(index)?;

    for info in infos {
        if info.encoding == ImageEncoding::Jbig2 {
            debug!("skipping JBIG2 image");
            continue;
        }

        // Slightly oversized images are not worth re-encoding; cropping is
        // unlikely to reduce the file size and may even grow it.
        if page_rect.expand(CROP_MARGIN).contains(&info.bbox) {
            continue;
        }
        if !page_rect.intersects(&info.bbox) {
            debug!("image does not intersect the visible part of the page, skipping");
            continue;
        }
        debug!(
            "cropping image (bbox {:?}, page rect {:?})",
            info.bbox, page_rect
        );

        let rotation = match rotation_from_transform(&info.transform) {
            Some(rotation) => rotation,
            None => {
                debug!("image rotation could not be computed from transform matrix, skipping");
                continue;
            }
        };
        let inverse = match info.transform.inverse() {
            Some(inverse) => inverse,
            None => continue,
        };

        let img = match pdf.decode_image(info.xref) {
            Ok(img) => img,
            Err(err) if is_image_skip(&err) => {
                warn!("skipping image crop: {err}");
                continue;
            }
            Err(err) => return Err(err),
        };

        // The transform maps the image's unit square onto its bbox, so the
        // inverse maps the page rect into normalized image coordinates;
        // scaling by the pixel dimensions yields the visible region in
        // pixel space.
        let crop_px = page_rect
            .transform(&inverse)
            .transform(&Matrix::scale(info.width as f32, info.height as f32))
            .intersect(&Rect::new(0.0, 0.0, info.width as f32, info.height as f32));
        if crop_px.is_empty() {
            continue;
        }
        let x = crop_px.x0.round().max(0.0) as u32;
        let y = crop_px.y0.round().max(0.0) as u32;
        let w = (crop_px.width().round() as u32).clamp(1, info.width.saturating_sub(x).max(1));
        let h = (crop_px.height().round() as u32).clamp(1, info.height.saturating_sub(y).max(1));
        let cropped = img.crop_imm(x, y, w, h);
        let encoded = images::encode_jpeg(&cropped)?;
        if encoded.len() as f32 > CROP_MIN_SHRINK * info.size as f32 {
            debug!("skipping crop as new image is not significantly smaller");
            continue;
        }

        pdf.delete_image(index, &info.name)?;
        let location = page_rect.intersect(&info.bbox);
        pdf.insert_jpeg_image(index, &location, &encoded, w, h, -rotation)?;
    }
    Ok(())
}

fn is_image_skip(err: &PdfError) -> bool {
    matches!(
        err,
        PdfError::UnsupportedImage(_) | PdfError::Image(_) | PdfError::Malformed(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testutil::{add_jpeg_xobject, single_page_pdf_with_content, tiny_jpeg};

    #[test]
    fn test_rotation_from_transform() {
        assert_eq!(
            rotation_from_transform(&Matrix::new(100.0, 0.0, 0.0, 50.0, 0.0, 0.0)),
            Some(0)
        );
        assert_eq!(
            rotation_from_transform(&Matrix::new(-100.0, 0.0, 0.0, -50.0, 0.0, 0.0)),
            Some(180)
        );
        assert_eq!(
            rotation_from_transform(&Matrix::new(0.0, 100.0, -50.0, 0.0, 0.0, 0.0)),
            Some(90)
        );
        assert_eq!(
            rotation_from_transform(&Matrix::new(0.0, -100.0, 50.0, 0.0, 0.0, 0.0)),
            Some(270)
        );
        // Sheared placement: no axis-aligned rotation.
        assert_eq!(
            rotation_from_transform(&Matrix::new(70.0, 70.0, -70.0, 70.0, 0.0, 0.0)),
            None
        );
    }

    #[test]
    fn test_resize_enlarges_small_page() {
        let mut pdf = single_page_pdf_with_content(100.0, 140.0, "");
        resize_page(&mut pdf, 0).unwrap();
        let rect = pdf.rect(0).unwrap();
        assert_eq!(rect, Rect::new(0.0, 0.0, 2000.0, 2800.0));
    }

    #[test]
    fn test_resize_resets_rotation_without_scaling() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        pdf.set_rotation(0, 270).unwrap();
        resize_page(&mut pdf, 0).unwrap();
        assert_eq!(pdf.rotation(0).unwrap(), 0);
        assert_eq!(pdf.rect(0).unwrap(), Rect::new(0.0, 0.0, 800.0, 600.0));
    }

    #[test]
    fn test_resize_leaves_normal_page_alone() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "BT /F1 10 Tf (x) Tj ET");
        let before = pdf.page_content(0).unwrap();
        resize_page(&mut pdf, 0).unwrap();
        assert_eq!(pdf.page_content(0).unwrap(), before);
    }

    #[test]
    fn test_crop_skips_contained_image() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let jpeg = tiny_jpeg(60, 80);
        let name = add_jpeg_xobject(&mut pdf, 0, jpeg, 60, 80);
        pdf.set_page_content(0, format!("q 600 0 0 800 0 0 cm /{name} Do Q").into_bytes())
            .unwrap();
        crop_images(&mut pdf, 0).unwrap();
        let infos = pdf.image_infos(0).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!((infos[0].width, infos[0].height), (60, 80));
    }

    #[test]
    fn test_crop_skips_rotated_page() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let jpeg = tiny_jpeg(60, 80);
        let name = add_jpeg_xobject(&mut pdf, 0, jpeg.clone(), 60, 80);
        pdf.set_page_content(
            0,
            format!("q 1200 0 0 800 0 0 cm /{name} Do Q").into_bytes(),
        )
        .unwrap();
        pdf.set_rotation(0, 90).unwrap();
        crop_images(&mut pdf, 0).unwrap();
        assert_eq!(pdf.image_infos(0).unwrap()[0].width, 60);
    }
}

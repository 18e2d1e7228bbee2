//! Builds the compacted single-page document submitted to the OCR provider.

use tracing::{debug, warn};

use crate::pdf::{Pdf, Result};

/// Hard request-size limit of the OCR provider.
pub const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;
const MAX_DOWNSCALE_ATTEMPTS: usize = 10;

/// Extracts the page into its own compacted document. When the encoded size
/// exceeds the provider limit, every embedded image is halved in both
/// dimensions (re-encoded as JPEG) and the size re-checked, up to a bounded
/// number of rounds. Returns `None` when the page cannot be brought under
/// the budget; the caller skips OCR for it.
pub fn build_request_document(pdf: &Pdf, index: usize) -> Result<Option<Pdf>> {
    let mut single = pdf.single_page_document(index)?;
    let mut size = single.save_to_bytes()?.len();

    for _ in 0..MAX_DOWNSCALE_ATTEMPTS {
        if size < MAX_REQUEST_BYTES {
            return Ok(Some(single));
        }
        debug!("request document is {size} bytes, downscaling images");
        downscale_images_x2(&mut single, 0)?;
        let new_size = single.save_to_bytes()?.len();
        if new_size >= size {
            warn!("downscaling made no progress ({size} -> {new_size} bytes), skipping page");
            return Ok(None);
        }
        size = new_size;
    }

    if size < MAX_REQUEST_BYTES {
        Ok(Some(single))
    } else {
        warn!("request document still {size} bytes after downscaling, skipping page");
        Ok(None)
    }
}

/// Halves width and height of every decodable image on the page.
fn downscale_images_x2(pdf: &mut Pdf, index: usize) -> Result<()> {
    for info in pdf.image_infos(index)? {
        let img = match pdf.decode_image(info.xref) {
            Ok(img) => img,
            Err(err) => {
                warn!("skipping downscale of image {:?}: {err}", info.name);
                continue;
            }
        };
        debug!(
            "downscaling image (width {}, height {}, bbox {:?})",
            info.width, info.height, info.bbox
        );
        let halved = img.resize_exact(
            (img.width() / 2).max(1),
            (img.height() / 2).max(1),
            image::imageops::FilterType::Triangle,
        );
        pdf.replace_image(info.xref, &halved)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testutil::{add_jpeg_xobject, document_with_pages, tiny_jpeg};

    #[test]
    fn test_small_page_passes_through() {
        let pdf = document_with_pages(
            &["BT /F1 10 Tf (hi) Tj ET".to_string(), String::new()],
            600.0,
            800.0,
        );
        let single = build_request_document(&pdf, 0).unwrap();
        let single = single.expect("small page fits the budget");
        assert_eq!(single.page_count(), 1);
    }

    #[test]
    fn test_downscale_halves_image_dimensions() {
        let mut pdf = document_with_pages(&[String::new()], 600.0, 800.0);
        let jpeg = tiny_jpeg(64, 32);
        let name = add_jpeg_xobject(&mut pdf, 0, jpeg, 64, 32);
        pdf.set_page_content(0, format!("q 600 0 0 800 0 0 cm /{name} Do Q").into_bytes())
            .unwrap();
        downscale_images_x2(&mut pdf, 0).unwrap();
        let info = &pdf.image_infos(0).unwrap()[0];
        assert_eq!((info.width, info.height), (32, 16));
    }
}

//! In-memory PDF fixtures for unit tests.

use lopdf::{Dictionary, Object, Stream};

use super::Pdf;

fn media_box(width: f32, height: f32) -> Object {
    Object::Array(vec![
        0.0f32.into(),
        0.0f32.into(),
        width.into(),
        height.into(),
    ])
}

/// Document with `n` empty pages of the given size.
pub fn blank_document(n: usize, width: f32, height: f32) -> Pdf {
    document_with_pages(&vec![String::new(); n], width, height)
}

/// Single page carrying the given raw content stream.
pub fn single_page_pdf_with_content(width: f32, height: f32, content: &str) -> Pdf {
    document_with_pages(&[content.to_string()], width, height)
}

/// Document with one page per content string, all pages the same size, with
/// Helvetica registered as /F1 on every page.
pub fn document_with_pages(contents: &[String], width: f32, height: f32) -> Pdf {
    let mut doc = lopdf::Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(Object::Dictionary(Dictionary::from_iter([
        ("Type", Object::Name(b"Font".to_vec())),
        ("Subtype", Object::Name(b"Type1".to_vec())),
        ("BaseFont", Object::Name(b"Helvetica".to_vec())),
    ])));

    let mut kids = Vec::new();
    for content in contents {
        let content_id = doc.add_object(Object::Stream(Stream::new(
            Dictionary::new(),
            content.as_bytes().to_vec(),
        )));
        let resources = Dictionary::from_iter([(
            "Font",
            Object::Dictionary(Dictionary::from_iter([("F1", Object::Reference(font_id))])),
        )]);
        let page_id = doc.add_object(Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Page".to_vec())),
            ("Parent", Object::Reference(pages_id)),
            ("MediaBox", media_box(width, height)),
            ("Resources", Object::Dictionary(resources)),
            ("Contents", Object::Reference(content_id)),
        ])));
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(Dictionary::from_iter([
            ("Type", Object::Name(b"Pages".to_vec())),
            ("Kids", Object::Array(kids)),
            ("Count", Object::Integer(count)),
        ])),
    );

    let catalog_id = doc.add_object(Object::Dictionary(Dictionary::from_iter([
        ("Type", Object::Name(b"Catalog".to_vec())),
        ("Pages", Object::Reference(pages_id)),
    ])));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    Pdf::from_lopdf(doc)
}

/// Registers a JPEG image XObject on the page and returns its resource name;
/// the caller draws it with a `cm`/`Do` pair in the page content.
pub fn add_jpeg_xobject(pdf: &mut Pdf, index: usize, jpeg: Vec<u8>, width: u32, height: u32) -> String {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    pdf.add_xobject(index, Stream::new(dict, jpeg))
        .expect("adding xobject to test page cannot fail")
}

/// Tiny valid JPEG produced by the image crate, for image-op tests.
pub fn tiny_jpeg(width: u32, height: u32) -> Vec<u8> {
    use image::RgbImage;
    let img = RgbImage::from_pixel(width, height, image::Rgb([128u8, 100, 90]));
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
    encoder
        .encode_image(&img)
        .expect("encoding test jpeg cannot fail");
    out
}

//! Embedded-image inspection and mutation.

use image::DynamicImage;
use lopdf::{Dictionary, Object, ObjectId, Stream};
use lopdf::content::Operation;

use super::{Pdf, PdfError, Result};
use crate::geometry::{Matrix, Rect};

/// Storage encoding of an embedded image stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageEncoding {
    Jpeg,
    /// JPEG 2000; several viewers render these poorly.
    Jpx,
    Jbig2,
    Fax,
    /// Plain (possibly deflated) samples.
    Raw,
    Other,
}

impl ImageEncoding {
    fn from_filters(filters: &[&[u8]]) -> Self {
        for filter in filters {
            match *filter {
                b"DCTDecode" => return ImageEncoding::Jpeg,
                b"JPXDecode" => return ImageEncoding::Jpx,
                b"JBIG2Decode" => return ImageEncoding::Jbig2,
                b"CCITTFaxDecode" => return ImageEncoding::Fax,
                _ => {}
            }
        }
        if filters
            .iter()
            .all(|f| matches!(*f, b"FlateDecode" | b"LZWDecode" | b"RunLengthDecode"))
        {
            ImageEncoding::Raw
        } else {
            ImageEncoding::Other
        }
    }
}

/// One image placed on a page.
#[derive(Debug, Clone)]
pub struct ImageInfo {
    /// Object id of the image stream.
    pub xref: ObjectId,
    /// Resource name under which the page draws it.
    pub name: String,
    pub width: u32,
    pub height: u32,
    /// Bounding box in page space.
    pub bbox: Rect,
    /// Maps the unit square (pixel orientation: (0,0) = top-left of the
    /// image) onto the placed image in page space.
    pub transform: Matrix,
    pub encoding: ImageEncoding,
    /// Encoded size in bytes.
    pub size: usize,
}

#[derive(Debug)]
pub struct ExtractedImage {
    pub encoding: ImageEncoding,
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

fn stream_filters(dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Object::Name(name) => Some(name.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn dimension(dict: &Dictionary, key: &[u8]) -> u32 {
    match dict.get(key) {
        Ok(Object::Integer(v)) => (*v).max(0) as u32,
        _ => 0,
    }
}

impl Pdf {
    fn image_xobject_id(&self, index: usize, name: &str) -> Result<ObjectId> {
        let resources = self.resources(index)?;
        let xobjects = resources
            .get(b"XObject")
            .ok()
            .map(|x| self.resolve(x))
            .and_then(|x| x.as_dict().ok())
            .ok_or_else(|| PdfError::Malformed("page has no XObject resources".into()))?;
        match xobjects.get(name.as_bytes()) {
            Ok(Object::Reference(id)) => Ok(*id),
            _ => Err(PdfError::Malformed(format!(
                "image resource {name} is not a reference"
            ))),
        }
    }

    fn image_stream(&self, xref: ObjectId) -> Result<&Stream> {
        match self.doc.get_object(xref)? {
            Object::Stream(stream) => Ok(stream),
            _ => Err(PdfError::Malformed("image xref is not a stream".into())),
        }
    }

    /// Images placed on the page, in drawing order.
    pub fn image_infos(&self, index: usize) -> Result<Vec<ImageInfo>> {
        let to_page = self.content_to_page(index)?;
        // Flip so that the unit square's (0, 0) means the top-left pixel,
        // which is what pixel-space crop computations expect.
        let flip = Matrix::new(1.0, 0.0, 0.0, -1.0, 0.0, 1.0);
        let mut infos = Vec::new();
        for placement in self.image_placements(index)? {
            let xref = match self.image_xobject_id(index, &placement.name) {
                Ok(xref) => xref,
                Err(_) => continue,
            };
            let stream = self.image_stream(xref)?;
            let filters = stream_filters(&stream.dict);
            let filter_refs: Vec<&[u8]> = filters.iter().map(|f| f.as_slice()).collect();
            let transform = flip.concat(&placement.ctm).concat(&to_page);
            infos.push(ImageInfo {
                xref,
                name: placement.name.clone(),
                width: dimension(&stream.dict, b"Width"),
                height: dimension(&stream.dict, b"Height"),
                bbox: Rect::UNIT.transform(&transform),
                transform,
                encoding: ImageEncoding::from_filters(&filter_refs),
                size: stream.content.len(),
            });
        }
        Ok(infos)
    }

    /// Raw encoded bytes of an embedded image.
    pub fn extract_image(&self, xref: ObjectId) -> Result<ExtractedImage> {
        let stream = self.image_stream(xref)?;
        let filters = stream_filters(&stream.dict);
        let filter_refs: Vec<&[u8]> = filters.iter().map(|f| f.as_slice()).collect();
        Ok(ExtractedImage {
            encoding: ImageEncoding::from_filters(&filter_refs),
            data: stream.content.clone(),
            width: dimension(&stream.dict, b"Width"),
            height: dimension(&stream.dict, b"Height"),
        })
    }

    /// Decodes an embedded image into pixels. JPEG and plain-sample images
    /// are supported; everything else reports `UnsupportedImage` and the
    /// caller skips the operation for that image.
    pub fn decode_image(&self, xref: ObjectId) -> Result<DynamicImage> {
        let stream = self.image_stream(xref)?;
        let filters = stream_filters(&stream.dict);
        let filter_refs: Vec<&[u8]> = filters.iter().map(|f| f.as_slice()).collect();
        match ImageEncoding::from_filters(&filter_refs) {
            ImageEncoding::Jpeg => Ok(image::load_from_memory(&stream.content)?),
            ImageEncoding::Raw => {
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                let width = dimension(&stream.dict, b"Width");
                let height = dimension(&stream.dict, b"Height");
                let bits = match stream.dict.get(b"BitsPerComponent") {
                    Ok(Object::Integer(v)) => *v,
                    _ => 8,
                };
                if bits != 8 {
                    return Err(PdfError::UnsupportedImage(format!(
                        "{bits} bits per component"
                    )));
                }
                let colorspace = match stream.dict.get(b"ColorSpace") {
                    Ok(Object::Name(name)) => name.clone(),
                    Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                        Ok(Object::Name(name)) => name.clone(),
                        _ => Vec::new(),
                    },
                    _ => Vec::new(),
                };
                match colorspace.as_slice() {
                    b"DeviceRGB" => image::RgbImage::from_raw(width, height, data)
                        .map(DynamicImage::ImageRgb8)
                        .ok_or_else(|| {
                            PdfError::Malformed("rgb sample data does not match dimensions".into())
                        }),
                    b"DeviceGray" => image::GrayImage::from_raw(width, height, data)
                        .map(DynamicImage::ImageLuma8)
                        .ok_or_else(|| {
                            PdfError::Malformed("gray sample data does not match dimensions".into())
                        }),
                    other => Err(PdfError::UnsupportedImage(
                        String::from_utf8_lossy(other).into_owned(),
                    )),
                }
            }
            other => Err(PdfError::UnsupportedImage(format!("{other:?}"))),
        }
    }

    /// Re-encodes the pixels as JPEG and overwrites the image stream in
    /// place; every placement of the image picks up the new data.
    pub fn replace_image(&mut self, xref: ObjectId, img: &DynamicImage) -> Result<()> {
        let jpeg = encode_jpeg(img)?;
        let stream = jpeg_image_stream(&jpeg, img.width(), img.height());
        self.doc.objects.insert(xref, Object::Stream(stream));
        Ok(())
    }

    /// Removes every placement of the image from the page; the stream itself
    /// is dropped by the compacting save.
    pub fn delete_image(&mut self, index: usize, name: &str) -> Result<()> {
        self.remove_image_draws(index, name)
    }

    /// Places pre-encoded JPEG data into `rect` (page space), rotated
    /// counter-clockwise by `rotate` degrees (a multiple of 90).
    pub fn insert_jpeg_image(
        &mut self,
        index: usize,
        rect: &Rect,
        jpeg: &[u8],
        width: u32,
        height: u32,
        rotate: i32,
    ) -> Result<()> {
        let stream = jpeg_image_stream(jpeg, width, height);
        let name = self.add_xobject(index, stream)?;

        let to_content = self.page_to_content(index)?;
        let r = rect.transform(&to_content);
        let (w, h) = (r.width(), r.height());
        let cm = match rotate.rem_euclid(360) {
            90 => Matrix::new(0.0, h, -w, 0.0, r.x0 + w, r.y0),
            180 => Matrix::new(-w, 0.0, 0.0, -h, r.x1, r.y1),
            270 => Matrix::new(0.0, -h, w, 0.0, r.x0, r.y0 + h),
            _ => Matrix::new(w, 0.0, 0.0, h, r.x0, r.y0),
        };
        let ops = vec![
            Operation::new(
                "cm",
                vec![
                    cm.a.into(),
                    cm.b.into(),
                    cm.c.into(),
                    cm.d.into(),
                    cm.e.into(),
                    cm.f.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.into_bytes())]),
        ];
        self.append_operations(index, ops)
    }
}

pub(crate) fn encode_jpeg(img: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = img.to_rgb8();
    let mut out = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut out, 85);
    encoder.encode_image(&rgb)?;
    Ok(out)
}

fn jpeg_image_stream(jpeg: &[u8], width: u32, height: u32) -> Stream {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(b"DeviceRGB".to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(b"DCTDecode".to_vec()));
    Stream::new(dict, jpeg.to_vec())
}

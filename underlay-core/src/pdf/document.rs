//! Document wrapper: page access, boxes, rotation, page-tree surgery and
//! save profiles.
//!
//! Pages are always addressed by index and resolved through the page tree on
//! every call. Caching page handles across mutations is how subtle staleness
//! bugs happen (replaced images reporting outdated geometry), so we simply
//! never hold on to one.

use std::collections::HashMap;
use std::path::Path;

use lopdf::{Dictionary, Object, ObjectId, Stream};

use super::{content, PdfError, Result};
use crate::geometry::{Matrix, Rect};

const DEFAULT_MEDIABOX: Rect = Rect {
    x0: 0.0,
    y0: 0.0,
    x1: 612.0,
    y1: 792.0,
};

fn dictionary_mut(doc: &mut lopdf::Document, id: ObjectId) -> Result<&mut Dictionary> {
    match doc.get_object_mut(id)? {
        Object::Dictionary(dict) => Ok(dict),
        _ => Err(PdfError::Malformed(format!(
            "object {id:?} is not a dictionary"
        ))),
    }
}

pub struct Pdf {
    pub(crate) doc: lopdf::Document,
    pending_redactions: HashMap<usize, Vec<Rect>>,
}

impl Pdf {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let doc = lopdf::Document::load(path)?;
        Ok(Self::from_lopdf(doc))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let doc = lopdf::Document::load_mem(data)?;
        Ok(Self::from_lopdf(doc))
    }

    pub(crate) fn from_lopdf(doc: lopdf::Document) -> Self {
        Pdf {
            doc,
            pending_redactions: HashMap::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.doc.get_pages().len()
    }

    pub(crate) fn page_object_id(&self, index: usize) -> Result<ObjectId> {
        self.doc
            .get_pages()
            .values()
            .nth(index)
            .copied()
            .ok_or(PdfError::PageOutOfRange(index))
    }

    /// Follows references until a direct object is reached.
    pub(crate) fn resolve<'a>(&'a self, mut obj: &'a Object) -> &'a Object {
        let mut hops = 0;
        while let Object::Reference(id) = obj {
            match self.doc.get_object(*id) {
                Ok(target) if hops < 16 => {
                    obj = target;
                    hops += 1;
                }
                _ => break,
            }
        }
        obj
    }

    /// Page attribute with inheritance through the Pages tree
    /// (MediaBox, CropBox, Rotate and Resources are inheritable).
    pub(crate) fn page_attr(&self, page_id: ObjectId, key: &[u8]) -> Option<Object> {
        let mut current = page_id;
        for _ in 0..32 {
            let dict = self.doc.get_dictionary(current).ok()?;
            if let Ok(value) = dict.get(key) {
                return Some(self.resolve(value).clone());
            }
            match dict.get(b"Parent") {
                Ok(Object::Reference(parent)) => current = *parent,
                _ => return None,
            }
        }
        None
    }

    fn box_attr(&self, index: usize, key: &[u8]) -> Result<Option<Rect>> {
        let page_id = self.page_object_id(index)?;
        Ok(self
            .page_attr(page_id, key)
            .as_ref()
            .and_then(rect_from_array))
    }

    /// Media box in PDF space (y up), normalized.
    pub fn mediabox(&self, index: usize) -> Result<Rect> {
        Ok(self.box_attr(index, b"MediaBox")?.unwrap_or(DEFAULT_MEDIABOX))
    }

    /// Crop box in PDF space (y up); defaults to the media box.
    pub fn cropbox(&self, index: usize) -> Result<Rect> {
        match self.box_attr(index, b"CropBox")? {
            Some(r) => Ok(r),
            None => self.mediabox(index),
        }
    }

    /// Sets the crop box from raw PDF-space coordinates.
    pub fn set_cropbox(&mut self, index: usize, rect: Rect) -> Result<()> {
        let page_id = self.page_object_id(index)?;
        let dict = dictionary_mut(&mut self.doc, page_id)?;
        dict.set(
            "CropBox",
            Object::Array(vec![
                rect.x0.into(),
                rect.y0.into(),
                rect.x1.into(),
                rect.y1.into(),
            ]),
        );
        Ok(())
    }

    /// Sets the crop box from a clip given in page space. The clip is mapped
    /// through the current rotation/crop and intersected with the media box;
    /// crop boxes that are nominally but not numerically inside the media box
    /// make later crop updates fail otherwise.
    pub fn set_cropbox_clip(&mut self, index: usize, clip: &Rect) -> Result<()> {
        let to_content = self.page_to_content(index)?;
        let content_rect = clip.transform(&to_content);
        let clipped = content_rect.intersect(&self.mediabox(index)?);
        self.set_cropbox(index, clipped)
    }

    /// Page rotation normalized to {0, 90, 180, 270}.
    pub fn rotation(&self, index: usize) -> Result<i32> {
        let page_id = self.page_object_id(index)?;
        let raw = match self.page_attr(page_id, b"Rotate") {
            Some(Object::Integer(v)) => v as i32,
            _ => 0,
        };
        Ok((raw.rem_euclid(360) / 90) * 90)
    }

    pub fn set_rotation(&mut self, index: usize, rotation: i32) -> Result<()> {
        let page_id = self.page_object_id(index)?;
        let dict = dictionary_mut(&mut self.doc, page_id)?;
        dict.set("Rotate", Object::Integer(rotation.rem_euclid(360) as i64));
        Ok(())
    }

    /// The page rectangle in page space: origin at the top-left of the page
    /// as displayed, dimensions swapped for 90/270 rotations.
    pub fn rect(&self, index: usize) -> Result<Rect> {
        let crop = self.cropbox(index)?;
        let rotation = self.rotation(index)?;
        let (w, h) = match rotation {
            90 | 270 => (crop.height(), crop.width()),
            _ => (crop.width(), crop.height()),
        };
        Ok(Rect::new(0.0, 0.0, w, h))
    }

    /// Affine map from PDF content space (y up) to page space (y down,
    /// top-left origin, rotation applied).
    pub(crate) fn content_to_page(&self, index: usize) -> Result<Matrix> {
        let crop = self.cropbox(index)?;
        let rotation = self.rotation(index)?;
        Ok(match rotation {
            90 => Matrix::new(0.0, 1.0, 1.0, 0.0, -crop.y0, -crop.x0),
            180 => Matrix::new(-1.0, 0.0, 0.0, 1.0, crop.x1, -crop.y0),
            270 => Matrix::new(0.0, -1.0, -1.0, 0.0, crop.y1, crop.x1),
            _ => Matrix::new(1.0, 0.0, 0.0, -1.0, -crop.x0, crop.y1),
        })
    }

    /// Inverse of [`Self::content_to_page`].
    pub(crate) fn page_to_content(&self, index: usize) -> Result<Matrix> {
        let crop = self.cropbox(index)?;
        let rotation = self.rotation(index)?;
        Ok(match rotation {
            90 => Matrix::new(0.0, 1.0, 1.0, 0.0, crop.x0, crop.y0),
            180 => Matrix::new(-1.0, 0.0, 0.0, 1.0, crop.x1, crop.y0),
            270 => Matrix::new(0.0, -1.0, -1.0, 0.0, crop.x1, crop.y1),
            _ => Matrix::new(1.0, 0.0, 0.0, -1.0, crop.x0, crop.y1),
        })
    }

    /// Decompressed, concatenated content of the page.
    pub(crate) fn page_content(&self, index: usize) -> Result<Vec<u8>> {
        let page_id = self.page_object_id(index)?;
        let mut data = Vec::new();
        for content_id in self.doc.get_page_contents(page_id) {
            if let Ok(Object::Stream(stream)) = self.doc.get_object(content_id) {
                let part = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                if !data.is_empty() {
                    data.push(b'\n');
                }
                data.extend_from_slice(&part);
            }
        }
        Ok(data)
    }

    /// Replaces the page content with a single fresh stream.
    pub(crate) fn set_page_content(&mut self, index: usize, data: Vec<u8>) -> Result<()> {
        let page_id = self.page_object_id(index)?;
        let stream_id = self
            .doc
            .add_object(Object::Stream(Stream::new(Dictionary::new(), data)));
        let dict = dictionary_mut(&mut self.doc, page_id)?;
        dict.set("Contents", Object::Reference(stream_id));
        Ok(())
    }

    /// Appends raw operations after the existing content, isolated in a
    /// saved graphics state.
    pub(crate) fn append_content(&mut self, index: usize, ops: &[u8]) -> Result<()> {
        let mut data = self.page_content(index)?;
        data.extend_from_slice(b"\nq\n");
        data.extend_from_slice(ops);
        data.extend_from_slice(b"\nQ\n");
        self.set_page_content(index, data)
    }

    /// Resolved Resources dictionary of the page (may be inherited).
    pub(crate) fn resources(&self, index: usize) -> Result<Dictionary> {
        let page_id = self.page_object_id(index)?;
        match self.page_attr(page_id, b"Resources") {
            Some(Object::Dictionary(dict)) => Ok(dict),
            _ => Ok(Dictionary::new()),
        }
    }

    /// Makes sure the page owns a Resources dictionary (not shared, not
    /// inherited) and returns a mutable handle on it.
    fn own_resources_mut(&mut self, index: usize) -> Result<&mut Dictionary> {
        let resolved = self.resources(index)?;
        let page_id = self.page_object_id(index)?;
        let dict = dictionary_mut(&mut self.doc, page_id)?;
        if !matches!(dict.get(b"Resources"), Ok(Object::Dictionary(_))) {
            dict.set("Resources", Object::Dictionary(resolved));
        }
        match dict.get_mut(b"Resources") {
            Ok(Object::Dictionary(res)) => Ok(res),
            _ => Err(PdfError::Malformed("page resources unavailable".into())),
        }
    }

    /// Registers the built-in Helvetica font on the page and returns the
    /// resource name to select it with.
    pub(crate) fn ensure_helvetica(&mut self, index: usize) -> Result<String> {
        let name = "FUv0";
        let font = {
            let mut dict = Dictionary::new();
            dict.set("Type", Object::Name(b"Font".to_vec()));
            dict.set("Subtype", Object::Name(b"Type1".to_vec()));
            dict.set("BaseFont", Object::Name(super::fonts::HELVETICA.as_bytes().to_vec()));
            dict.set("Encoding", Object::Name(b"WinAnsiEncoding".to_vec()));
            dict
        };
        let font_id = self.doc.add_object(Object::Dictionary(font));
        let res = self.own_resources_mut(index)?;
        match res.get_mut(b"Font") {
            Ok(Object::Dictionary(fonts)) => {
                if !fonts.has(name.as_bytes()) {
                    fonts.set(name, Object::Reference(font_id));
                }
            }
            _ => {
                let mut fonts = Dictionary::new();
                fonts.set(name, Object::Reference(font_id));
                res.set("Font", Object::Dictionary(fonts));
            }
        }
        Ok(name.to_string())
    }

    /// Adds an XObject to the page resources under a unique name.
    pub(crate) fn add_xobject(&mut self, index: usize, stream: Stream) -> Result<String> {
        let object_id = self.doc.add_object(Object::Stream(stream));
        let name = format!("XUv{}", object_id.0);
        let res = self.own_resources_mut(index)?;
        match res.get_mut(b"XObject") {
            Ok(Object::Dictionary(xobjects)) => {
                xobjects.set(name.as_bytes(), Object::Reference(object_id));
            }
            _ => {
                let mut xobjects = Dictionary::new();
                xobjects.set(name.as_bytes(), Object::Reference(object_id));
                res.set("XObject", Object::Dictionary(xobjects));
            }
        }
        Ok(name)
    }

    // --- redactions -------------------------------------------------------

    pub fn add_redaction(&mut self, index: usize, rect: Rect) {
        self.pending_redactions.entry(index).or_default().push(rect);
    }

    /// Applies all queued redactions for the page in one batch, removing
    /// text draws under the redacted areas while leaving images alone.
    /// Returns the number of redaction rectangles applied.
    pub fn apply_redactions(&mut self, index: usize) -> Result<usize> {
        let rects = self.pending_redactions.remove(&index).unwrap_or_default();
        if rects.is_empty() {
            return Ok(0);
        }
        content::redact_text(self, index, &rects)?;
        Ok(rects.len())
    }

    // --- page-tree surgery ------------------------------------------------

    fn root_pages_id(&self) -> Result<ObjectId> {
        let root = match self.doc.trailer.get(b"Root") {
            Ok(Object::Reference(id)) => *id,
            _ => return Err(PdfError::Malformed("trailer has no Root".into())),
        };
        let catalog = self.doc.get_dictionary(root)?;
        match catalog.get(b"Pages") {
            Ok(Object::Reference(id)) => Ok(*id),
            _ => Err(PdfError::Malformed("catalog has no Pages".into())),
        }
    }

    fn remove_page_from_tree(doc: &mut lopdf::Document, page_id: ObjectId) -> Result<()> {
        let mut child = page_id;
        let mut parent = match doc.get_dictionary(child)?.get(b"Parent") {
            Ok(Object::Reference(id)) => Some(*id),
            _ => None,
        };
        let mut unlink = true;
        while let Some(parent_id) = parent {
            let parent_dict = dictionary_mut(doc, parent_id)?;
            if unlink {
                if let Ok(Object::Array(kids)) = parent_dict.get_mut(b"Kids") {
                    kids.retain(|kid| !matches!(kid, Object::Reference(id) if *id == child));
                }
                unlink = false;
            }
            let count = match parent_dict.get(b"Count") {
                Ok(Object::Integer(n)) => *n,
                _ => 0,
            };
            parent_dict.set("Count", Object::Integer((count - 1).max(0)));
            child = parent_id;
            parent = match doc.get_dictionary(parent_id)?.get(b"Parent") {
                Ok(Object::Reference(id)) => Some(*id),
                _ => None,
            };
        }
        doc.objects.remove(&page_id);
        Ok(())
    }

    /// New document holding a copy of just the given page.
    pub fn single_page_document(&self, index: usize) -> Result<Pdf> {
        let keep = self.page_object_id(index)?;
        let mut doc = self.doc.clone();
        let others: Vec<ObjectId> = self
            .doc
            .get_pages()
            .values()
            .copied()
            .filter(|id| *id != keep)
            .collect();
        for page_id in others {
            Self::remove_page_from_tree(&mut doc, page_id)?;
        }
        doc.prune_objects();
        Ok(Pdf::from_lopdf(doc))
    }

    /// Drops every page except the given one, in place.
    pub fn keep_only_page(&mut self, index: usize) -> Result<()> {
        let keep = self.page_object_id(index)?;
        let others: Vec<ObjectId> = self
            .doc
            .get_pages()
            .values()
            .copied()
            .filter(|id| *id != keep)
            .collect();
        for page_id in others {
            Self::remove_page_from_tree(&mut self.doc, page_id)?;
        }
        Ok(())
    }

    /// Appends an empty page of the given page-space dimensions; returns its
    /// index.
    pub fn add_blank_page(&mut self, width: f32, height: f32) -> Result<usize> {
        let pages_id = self.root_pages_id()?;
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(Dictionary::new(), Vec::new())));
        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        page.set("Parent", Object::Reference(pages_id));
        page.set(
            "MediaBox",
            Object::Array(vec![
                0.0f32.into(),
                0.0f32.into(),
                width.into(),
                height.into(),
            ]),
        );
        page.set("Resources", Object::Dictionary(Dictionary::new()));
        page.set("Contents", Object::Reference(content_id));
        let page_id = self.doc.add_object(Object::Dictionary(page));

        let pages = dictionary_mut(&mut self.doc, pages_id)?;
        match pages.get_mut(b"Kids") {
            Ok(Object::Array(kids)) => kids.push(Object::Reference(page_id)),
            _ => {
                pages.set("Kids", Object::Array(vec![Object::Reference(page_id)]));
            }
        }
        let count = match pages.get(b"Count") {
            Ok(Object::Integer(n)) => *n,
            _ => 0,
        };
        pages.set("Count", Object::Integer(count + 1));
        Ok(self.page_count() - 1)
    }

    /// Re-renders the page into a fresh, unrotated page scaled by `factor`.
    ///
    /// The original content is wrapped into a Form XObject and drawn through
    /// a rotation-resolving transform, so the new page displays identically
    /// at `factor` times the size with `Rotate 0`. The page object keeps its
    /// id, which leaves the surrounding page tree untouched.
    pub fn rebuild_page_scaled(&mut self, index: usize, factor: f32) -> Result<()> {
        let page_id = self.page_object_id(index)?;
        let crop = self.cropbox(index)?;
        let rotation = self.rotation(index)?;
        let content = self.page_content(index)?;
        let resources = self.resources(index)?;
        let parent = self
            .doc
            .get_dictionary(page_id)?
            .get(b"Parent")
            .ok()
            .cloned();

        let mut form_dict = Dictionary::new();
        form_dict.set("Type", Object::Name(b"XObject".to_vec()));
        form_dict.set("Subtype", Object::Name(b"Form".to_vec()));
        form_dict.set(
            "BBox",
            Object::Array(vec![
                crop.x0.into(),
                crop.y0.into(),
                crop.x1.into(),
                crop.y1.into(),
            ]),
        );
        form_dict.set("Resources", Object::Dictionary(resources));
        let form_id = self
            .doc
            .add_object(Object::Stream(Stream::new(form_dict, content)));

        let f = factor;
        let (width, height, cm) = match rotation {
            90 => (
                crop.height() * f,
                crop.width() * f,
                Matrix::new(0.0, -f, f, 0.0, -f * crop.y0, f * crop.x1),
            ),
            180 => (
                crop.width() * f,
                crop.height() * f,
                Matrix::new(-f, 0.0, 0.0, -f, f * crop.x1, f * crop.y1),
            ),
            270 => (
                crop.height() * f,
                crop.width() * f,
                Matrix::new(0.0, f, -f, 0.0, f * crop.y1, -f * crop.x0),
            ),
            _ => (
                crop.width() * f,
                crop.height() * f,
                Matrix::new(f, 0.0, 0.0, f, -f * crop.x0, -f * crop.y0),
            ),
        };

        let ops = format!(
            "q\n{} {} {} {} {} {} cm\n/FmUv Do\nQ\n",
            cm.a, cm.b, cm.c, cm.d, cm.e, cm.f
        );
        let content_id = self
            .doc
            .add_object(Object::Stream(Stream::new(Dictionary::new(), ops.into_bytes())));

        let mut xobjects = Dictionary::new();
        xobjects.set("FmUv", Object::Reference(form_id));
        let mut new_resources = Dictionary::new();
        new_resources.set("XObject", Object::Dictionary(xobjects));

        let mut page = Dictionary::new();
        page.set("Type", Object::Name(b"Page".to_vec()));
        if let Some(parent_ref) = parent {
            page.set("Parent", parent_ref);
        }
        page.set(
            "MediaBox",
            Object::Array(vec![
                0.0f32.into(),
                0.0f32.into(),
                width.into(),
                height.into(),
            ]),
        );
        page.set("Resources", Object::Dictionary(new_resources));
        page.set("Contents", Object::Reference(content_id));
        page.set("Rotate", Object::Integer(0));
        self.doc.objects.insert(page_id, Object::Dictionary(page));
        Ok(())
    }

    // --- saving -----------------------------------------------------------

    /// Save with stream deflation only; used for the single-page request
    /// documents where speed matters more than minimal size.
    pub fn save_deflated<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.doc.compress();
        self.doc.save(path)?;
        Ok(())
    }

    /// Compacted save: unreferenced objects dropped, objects renumbered,
    /// streams deflated.
    pub fn save_compact<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        self.doc.prune_objects();
        self.doc.renumber_objects();
        self.doc.compress();
        self.doc.save(path)?;
        Ok(())
    }

    pub fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.doc.compress();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

/// Point/Rect conversion helpers shared by the content scanner.
pub(crate) fn rect_from_array(obj: &Object) -> Option<Rect> {
    let arr = match obj {
        Object::Array(arr) if arr.len() == 4 => arr,
        _ => return None,
    };
    let mut values = [0.0f32; 4];
    for (slot, item) in values.iter_mut().zip(arr.iter()) {
        *slot = number(item)?;
    }
    Some(Rect::new(values[0], values[1], values[2], values[3]))
}

pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v),
        _ => None,
    }
}

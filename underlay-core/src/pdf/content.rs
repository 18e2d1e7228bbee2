//! Content-stream interpretation.
//!
//! Walks a page's drawing operators with a small graphics-state machine and
//! reports every text show, path fill and image placement with its bounding
//! box in page coordinates. The same walk drives the drawing-operator log,
//! the batched text redactions and the image-placement listing.
//!
//! Text extents are estimated with Helvetica metrics regardless of the
//! actual font; the log consumers only need containment and overlap
//! relations, not typographically exact boxes.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object};

use super::document::number;
use super::{BboxEntry, BboxKind, Pdf, Result};
use crate::geometry::{Matrix, Point, Rect};
use crate::pdf::fonts;

const MAX_FORM_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub(crate) struct ImagePlacement {
    pub name: String,
    /// Composed transform placing the image unit square in content space.
    pub ctm: Matrix,
}

#[derive(Debug)]
enum Drawn {
    Text { kind: BboxKind, rect: Rect },
    Path { kind: BboxKind, rect: Rect },
    Image { placement: ImagePlacement, rect: Rect },
}

#[derive(Debug)]
struct Event {
    drawn: Drawn,
    /// Index into the page's top-level operation list; `None` inside form
    /// XObjects.
    top_level_index: Option<usize>,
}

struct TextState {
    tm: Matrix,
    tlm: Matrix,
    size: f32,
    leading: f32,
    hscale: f32,
    render_mode: i64,
}

impl Default for TextState {
    fn default() -> Self {
        TextState {
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            size: 0.0,
            leading: 0.0,
            hscale: 1.0,
            render_mode: 0,
        }
    }
}

struct Interpreter<'a> {
    pdf: &'a Pdf,
    to_page: Matrix,
    events: Vec<Event>,
}

impl<'a> Interpreter<'a> {
    fn run(
        &mut self,
        operations: &[Operation],
        resources: &Dictionary,
        base_ctm: Matrix,
        depth: usize,
        top_level: bool,
    ) {
        let mut ctm = base_ctm;
        let mut stack: Vec<Matrix> = Vec::new();
        let mut text = TextState::default();
        let mut path: Vec<Point> = Vec::new();

        for (op_index, op) in operations.iter().enumerate() {
            let index = top_level.then_some(op_index);
            let operands = &op.operands;
            match op.operator.as_str() {
                "q" => stack.push(ctm),
                "Q" => {
                    if let Some(saved) = stack.pop() {
                        ctm = saved;
                    }
                }
                "cm" => {
                    if let Some(m) = matrix_from_operands(operands) {
                        ctm = m.concat(&ctm);
                    }
                }

                // -- text state ------------------------------------------
                "BT" => {
                    text.tm = Matrix::IDENTITY;
                    text.tlm = Matrix::IDENTITY;
                }
                "ET" => {}
                "Tf" => {
                    if let Some(size) = operands.get(1).and_then(number) {
                        text.size = size;
                    }
                }
                "Tz" => {
                    if let Some(scale) = operands.first().and_then(number) {
                        text.hscale = scale / 100.0;
                    }
                }
                "TL" => {
                    if let Some(leading) = operands.first().and_then(number) {
                        text.leading = leading;
                    }
                }
                "Tr" => {
                    if let Some(Object::Integer(mode)) = operands.first() {
                        text.render_mode = *mode;
                    }
                }
                "Td" => {
                    self.text_move(&mut text, operands.first(), operands.get(1));
                }
                "TD" => {
                    if let Some(ty) = operands.get(1).and_then(number) {
                        text.leading = -ty;
                    }
                    self.text_move(&mut text, operands.first(), operands.get(1));
                }
                "Tm" => {
                    if let Some(m) = matrix_from_operands(operands) {
                        text.tm = m;
                        text.tlm = m;
                    }
                }
                "T*" => self.next_line(&mut text),

                // -- text showing ----------------------------------------
                "Tj" => {
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_text(&mut text, &ctm, text_width_units(bytes), index);
                    }
                }
                "'" => {
                    self.next_line(&mut text);
                    if let Some(Object::String(bytes, _)) = operands.first() {
                        self.show_text(&mut text, &ctm, text_width_units(bytes), index);
                    }
                }
                "\"" => {
                    self.next_line(&mut text);
                    if let Some(Object::String(bytes, _)) = operands.get(2) {
                        self.show_text(&mut text, &ctm, text_width_units(bytes), index);
                    }
                }
                "TJ" => {
                    if let Some(Object::Array(items)) = operands.first() {
                        let mut units = 0.0f32;
                        for item in items {
                            match item {
                                Object::String(bytes, _) => units += text_width_units(bytes),
                                other => {
                                    if let Some(adjust) = number(other) {
                                        units -= adjust / 1000.0;
                                    }
                                }
                            }
                        }
                        self.show_text(&mut text, &ctm, units, index);
                    }
                }

                // -- path construction and painting ----------------------
                "m" | "l" => {
                    if let Some(p) = point_from_operands(operands, 0) {
                        path.push(p.transform(&ctm));
                    }
                }
                "c" => {
                    for i in 0..3 {
                        if let Some(p) = point_from_operands(operands, i * 2) {
                            path.push(p.transform(&ctm));
                        }
                    }
                }
                "v" | "y" => {
                    for i in 0..2 {
                        if let Some(p) = point_from_operands(operands, i * 2) {
                            path.push(p.transform(&ctm));
                        }
                    }
                }
                "re" => {
                    if let (Some(x), Some(y), Some(w), Some(h)) = (
                        operands.first().and_then(number),
                        operands.get(1).and_then(number),
                        operands.get(2).and_then(number),
                        operands.get(3).and_then(number),
                    ) {
                        for corner in [
                            Point::new(x, y),
                            Point::new(x + w, y),
                            Point::new(x + w, y + h),
                            Point::new(x, y + h),
                        ] {
                            path.push(corner.transform(&ctm));
                        }
                    }
                }
                "f" | "F" | "f*" | "b" | "b*" | "B" | "B*" => {
                    self.paint_path(&mut path, BboxKind::FillPath, index);
                }
                "S" | "s" => {
                    self.paint_path(&mut path, BboxKind::Other, index);
                }
                "n" => path.clear(),

                // -- XObjects --------------------------------------------
                "Do" => {
                    if let Some(Object::Name(name)) = operands.first() {
                        self.invoke_xobject(name, resources, &ctm, depth, index);
                    }
                }
                "BI" => {
                    // Inline image; extent is the unit square under the CTM.
                    let rect = Rect::UNIT.transform(&ctm.concat(&self.to_page));
                    self.events.push(Event {
                        drawn: Drawn::Image {
                            placement: ImagePlacement {
                                name: String::new(),
                                ctm,
                            },
                            rect,
                        },
                        top_level_index: index,
                    });
                }
                _ => {}
            }
        }
    }

    fn text_move(&mut self, text: &mut TextState, tx: Option<&Object>, ty: Option<&Object>) {
        let tx = tx.and_then(number).unwrap_or(0.0);
        let ty = ty.and_then(number).unwrap_or(0.0);
        text.tlm = Matrix::translate(tx, ty).concat(&text.tlm);
        text.tm = text.tlm;
    }

    fn next_line(&mut self, text: &mut TextState) {
        text.tlm = Matrix::translate(0.0, -text.leading).concat(&text.tlm);
        text.tm = text.tlm;
    }

    /// Records a text-show event and advances the text matrix.
    fn show_text(
        &mut self,
        text: &mut TextState,
        ctm: &Matrix,
        width_units: f32,
        index: Option<usize>,
    ) {
        let advance = width_units * text.size * text.hscale;
        if text.size > 0.0 && advance.abs() > 0.0 {
            let local = Rect::new(
                0.0,
                fonts::descent(text.size),
                advance,
                fonts::ascent(text.size),
            );
            let full = text.tm.concat(ctm).concat(&self.to_page);
            let rect = local.transform(&full);
            let kind = match text.render_mode {
                3 | 7 => BboxKind::IgnoreText,
                1 | 5 => BboxKind::StrokeText,
                _ => BboxKind::FillText,
            };
            self.events.push(Event {
                drawn: Drawn::Text { kind, rect },
                top_level_index: index,
            });
        }
        text.tm = Matrix::translate(advance, 0.0).concat(&text.tm);
    }

    fn paint_path(&mut self, path: &mut Vec<Point>, kind: BboxKind, index: Option<usize>) {
        if path.is_empty() {
            return;
        }
        let mut rect = Rect::new(path[0].x, path[0].y, path[0].x, path[0].y);
        for p in path.iter() {
            rect.x0 = rect.x0.min(p.x);
            rect.y0 = rect.y0.min(p.y);
            rect.x1 = rect.x1.max(p.x);
            rect.y1 = rect.y1.max(p.y);
        }
        let rect = rect.transform(&self.to_page);
        self.events.push(Event {
            drawn: Drawn::Path { kind, rect },
            top_level_index: index,
        });
        path.clear();
    }

    fn invoke_xobject(
        &mut self,
        name: &[u8],
        resources: &Dictionary,
        ctm: &Matrix,
        depth: usize,
        index: Option<usize>,
    ) {
        let pdf = self.pdf;
        let xobject = resources
            .get(b"XObject")
            .ok()
            .map(|x| pdf.resolve(x))
            .and_then(|x| x.as_dict().ok())
            .and_then(|xobjects| xobjects.get(name).ok())
            .map(|x| pdf.resolve(x));
        let stream = match xobject {
            Some(Object::Stream(stream)) => stream,
            _ => return,
        };
        let subtype = match stream.dict.get(b"Subtype") {
            Ok(Object::Name(subtype)) => subtype.as_slice(),
            _ => return,
        };
        match subtype {
            b"Image" => {
                let rect = Rect::UNIT.transform(&ctm.concat(&self.to_page));
                self.events.push(Event {
                    drawn: Drawn::Image {
                        placement: ImagePlacement {
                            name: String::from_utf8_lossy(name).into_owned(),
                            ctm: *ctm,
                        },
                        rect,
                    },
                    top_level_index: index,
                });
            }
            b"Form" if depth < MAX_FORM_DEPTH => {
                let form_matrix = stream
                    .dict
                    .get(b"Matrix")
                    .ok()
                    .and_then(|m| m.as_array().ok())
                    .and_then(|arr| matrix_from_operands(arr))
                    .unwrap_or(Matrix::IDENTITY);
                let inner_resources = stream
                    .dict
                    .get(b"Resources")
                    .ok()
                    .map(|r| pdf.resolve(r))
                    .and_then(|r| r.as_dict().ok())
                    .cloned()
                    .unwrap_or_else(|| resources.clone());
                let data = stream
                    .decompressed_content()
                    .unwrap_or_else(|_| stream.content.clone());
                if let Ok(content) = Content::decode(&data) {
                    self.run(
                        &content.operations,
                        &inner_resources,
                        form_matrix.concat(ctm),
                        depth + 1,
                        false,
                    );
                }
            }
            _ => {}
        }
    }
}

fn matrix_from_operands(operands: &[Object]) -> Option<Matrix> {
    if operands.len() < 6 {
        return None;
    }
    let mut values = [0.0f32; 6];
    for (slot, obj) in values.iter_mut().zip(operands.iter()) {
        *slot = number(obj)?;
    }
    Some(Matrix::new(
        values[0], values[1], values[2], values[3], values[4], values[5],
    ))
}

fn point_from_operands(operands: &[Object], offset: usize) -> Option<Point> {
    Some(Point::new(
        operands.get(offset).and_then(number)?,
        operands.get(offset + 1).and_then(number)?,
    ))
}

/// Approximate width of a string in em units (font size 1).
fn text_width_units(bytes: &[u8]) -> f32 {
    bytes
        .iter()
        .map(|&b| fonts::char_width(b as char) as f32)
        .sum::<f32>()
        / 1000.0
}

fn scan(pdf: &Pdf, index: usize) -> Result<Vec<Event>> {
    let data = pdf.page_content(index)?;
    let content = Content::decode(&data)?;
    let resources = pdf.resources(index)?;
    let to_page = pdf.content_to_page(index)?;
    let mut interpreter = Interpreter {
        pdf,
        to_page,
        events: Vec::new(),
    };
    interpreter.run(&content.operations, &resources, Matrix::IDENTITY, 0, true);
    Ok(interpreter.events)
}

impl Pdf {
    /// The page's drawing-operator log: one `(kind, rect)` entry per text
    /// show, path paint and image placement, in drawing order.
    pub fn bbox_log(&self, index: usize) -> Result<Vec<BboxEntry>> {
        Ok(scan(self, index)?
            .into_iter()
            .map(|event| match event.drawn {
                Drawn::Text { kind, rect } => BboxEntry { kind, rect },
                Drawn::Path { kind, rect } => BboxEntry { kind, rect },
                Drawn::Image { rect, .. } => BboxEntry {
                    kind: BboxKind::FillImage,
                    rect,
                },
            })
            .collect())
    }

    /// All image placements on the page, with their content-space transform.
    pub(crate) fn image_placements(&self, index: usize) -> Result<Vec<ImagePlacement>> {
        Ok(scan(self, index)?
            .into_iter()
            .filter_map(|event| match event.drawn {
                Drawn::Image { placement, .. } if !placement.name.is_empty() => Some(placement),
                _ => None,
            })
            .collect())
    }

    /// Removes every placement of the named image from the page content.
    pub(crate) fn remove_image_draws(&mut self, index: usize, name: &str) -> Result<()> {
        let data = self.page_content(index)?;
        let content = Content::decode(&data)?;
        let kept: Vec<Operation> = content
            .operations
            .into_iter()
            .filter(|op| {
                !(op.operator == "Do"
                    && matches!(op.operands.first(),
                        Some(Object::Name(n)) if n.as_slice() == name.as_bytes()))
            })
            .collect();
        let encoded = Content { operations: kept }
            .encode()
            .map_err(super::PdfError::Parse)?;
        self.set_page_content(index, encoded)
    }

    /// Appends encoded operations to the page content inside an isolated
    /// graphics state.
    pub(crate) fn append_operations(&mut self, index: usize, ops: Vec<Operation>) -> Result<()> {
        let encoded = Content { operations: ops }
            .encode()
            .map_err(super::PdfError::Parse)?;
        self.append_content(index, &encoded)
    }

    /// Paints opaque white over the given page-space rectangles.
    pub(crate) fn white_out_rects(&mut self, index: usize, rects: &[Rect]) -> Result<()> {
        if rects.is_empty() {
            return Ok(());
        }
        let to_content = self.page_to_content(index)?;
        let mut ops = vec![Operation::new(
            "rg",
            vec![1.0f32.into(), 1.0f32.into(), 1.0f32.into()],
        )];
        for rect in rects {
            let r = rect.transform(&to_content);
            ops.push(Operation::new(
                "re",
                vec![r.x0.into(), r.y0.into(), r.width().into(), r.height().into()],
            ));
            ops.push(Operation::new("f", vec![]));
        }
        self.append_operations(index, ops)
    }
}

/// Rewrites the page content with every text draw under one of `rects`
/// removed. All redactions are applied in one batch; removing them one at a
/// time shifts the positioning of the text that remains. Images are left in
/// place. Line-advance operators folded into `'`/`"` are preserved as bare
/// `T*` so that surviving text keeps its position.
pub(crate) fn redact_text(pdf: &mut Pdf, index: usize, rects: &[Rect]) -> Result<()> {
    let events = scan(pdf, index)?;
    let data = pdf.page_content(index)?;
    let content = Content::decode(&data)?;
    let mut doomed = vec![false; content.operations.len()];
    for event in events {
        if let (Drawn::Text { rect, .. }, Some(op_index)) = (&event.drawn, event.top_level_index) {
            if rects.iter().any(|r| r.intersects(rect)) {
                doomed[op_index] = true;
            }
        }
    }
    if !doomed.iter().any(|&d| d) {
        return Ok(());
    }
    let mut kept = Vec::with_capacity(content.operations.len());
    for (op_index, op) in content.operations.into_iter().enumerate() {
        if !doomed[op_index] {
            kept.push(op);
        } else if op.operator == "'" || op.operator == "\"" {
            kept.push(Operation::new("T*", vec![]));
        }
    }
    let encoded = Content { operations: kept }
        .encode()
        .map_err(super::PdfError::Parse)?;
    pdf.set_page_content(index, encoded)
}

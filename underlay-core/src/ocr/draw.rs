//! Invisible text layer synthesis.
//!
//! Approach strongly inspired by OCRmyPDF's hOCR transform: each detected
//! word is drawn with the built-in Helvetica font, horizontally scaled so
//! that it exactly spans its detected rectangle, in render mode 3 so the
//! glyphs stay invisible. Explicit spaces are stretched to bridge word
//! gaps; without them several PDF viewers combine adjacent words when
//! extracting text.

use lopdf::content::Operation;
use lopdf::{Object, StringFormat};

use crate::geometry::{Matrix, Rect};
use crate::ocr::textline::{TextLine, TextWord};
use crate::pdf::{fonts, Pdf, Result};

/// Text render mode: invisible (neither fill nor stroke).
const RENDER_MODE_INVISIBLE: i64 = 3;

struct LayerBuilder {
    ops: Vec<Operation>,
    font_name: String,
    visible: bool,
    page_height: f32,
    rotated_group: bool,
}

impl LayerBuilder {
    fn new(font_name: String, visible: bool, page_height: f32) -> Self {
        LayerBuilder {
            ops: Vec::new(),
            font_name,
            visible,
            page_height,
            rotated_group: false,
        }
    }

    fn begin_orientation(&mut self, orientation: f32) {
        self.end_orientation();
        if orientation != 0.0 {
            let m = Matrix::rotate(-orientation);
            self.ops.push(Operation::new("q", vec![]));
            self.ops.push(Operation::new(
                "cm",
                vec![
                    m.a.into(),
                    m.b.into(),
                    m.c.into(),
                    m.d.into(),
                    m.e.into(),
                    m.f.into(),
                ],
            ));
            self.rotated_group = true;
        }
    }

    fn end_orientation(&mut self) {
        if self.rotated_group {
            self.ops.push(Operation::new("Q", vec![]));
            self.rotated_group = false;
        }
    }

    fn draw_line(&mut self, line: &TextLine) {
        let width_per_em = fonts::string_width(&line.text, 1.0);
        if width_per_em <= 0.0 || line.derotated_rect.is_empty() {
            return;
        }
        // Fill the rectangle's width without overshooting its height.
        let font_size = f32::min(
            line.derotated_rect.height(),
            line.derotated_rect.width() / width_per_em,
        );
        if font_size <= 0.0 {
            return;
        }
        let padding = (line.derotated_rect.height() - font_size) / 2.0;
        let descent = fonts::descent(font_size);
        // The synthesizer works bottom-up while detection coordinates grow
        // downward, hence the page-height flip.
        let line_text_y = (self.page_height - line.derotated_rect.y1) + padding - descent;

        let mut words = line.words.iter().peekable();
        while let Some(word) = words.next() {
            self.draw_word(
                word,
                words.peek().copied(),
                line,
                font_size,
                padding,
                descent,
                line_text_y,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn draw_word(
        &mut self,
        word: &TextWord,
        next_word: Option<&TextWord>,
        line: &TextLine,
        font_size: f32,
        line_vertical_padding: f32,
        descent: f32,
        line_text_y: f32,
    ) {
        let mut text = word.text.clone();
        let mut width = word.derotated_rect.width();

        let word_y_middle = (word.derotated_rect.y0 + word.derotated_rect.y1) / 2.0;
        let central_band = (line.derotated_rect.y0 + line_vertical_padding)
            ..(line.derotated_rect.y1 - line_vertical_padding);
        let text_y = if !central_band.contains(&word_y_middle) {
            // A slightly rotated detection we snapped to horizontal can put
            // a word on this "line" that vertically belongs elsewhere; such
            // words keep their own vertical position.
            let word_padding = (word.derotated_rect.height() - font_size) / 2.0;
            (self.page_height - word.derotated_rect.y1) + word_padding - descent
        } else {
            if let Some(next) = next_word {
                if next.derotated_rect.x0 > word.derotated_rect.x1 {
                    // Render an explicit space stretched up to the next
                    // word's start.
                    text.push(' ');
                    width = next.derotated_rect.x0 - word.derotated_rect.x0;
                }
            }
            line_text_y
        };

        let text_width = fonts::string_width(&text, font_size);
        if text_width <= 0.0 || width <= 0.0 {
            return;
        }
        self.ops.push(Operation::new("BT", vec![]));
        self.ops.push(Operation::new(
            "Tf",
            vec![
                Object::Name(self.font_name.clone().into_bytes()),
                font_size.into(),
            ],
        ));
        if !self.visible {
            self.ops
                .push(Operation::new("Tr", vec![RENDER_MODE_INVISIBLE.into()]));
        }
        self.ops.push(Operation::new(
            "Tz",
            vec![(100.0 * width / text_width).into()],
        ));
        self.ops.push(Operation::new(
            "Tm",
            vec![
                1.0f32.into(),
                0.0f32.into(),
                0.0f32.into(),
                1.0f32.into(),
                word.derotated_rect.x0.into(),
                text_y.into(),
            ],
        ));
        self.ops
            .push(Operation::new("Tj", vec![pdf_text(&text)]));
        self.ops.push(Operation::new("ET", vec![]));
    }

    fn finish(mut self) -> Vec<Operation> {
        self.end_orientation();
        self.ops
    }
}

/// Encodes text for a `Tj` operand. The built-in font is selected with
/// WinAnsi encoding, which Latin-1 approximates; anything outside is
/// replaced. The invisible layer only has to survive text extraction, not
/// faithful display.
fn pdf_text(text: &str) -> Object {
    let bytes = text
        .chars()
        .map(|c| {
            let code = c as u32;
            if (0x20..=0xff).contains(&code) {
                code as u8
            } else {
                b'?'
            }
        })
        .collect();
    Object::String(bytes, StringFormat::Literal)
}

fn text_layer_ops(
    font_name: &str,
    page_rect: &Rect,
    lines: &[TextLine],
    visible: bool,
) -> Vec<Operation> {
    let mut builder = LayerBuilder::new(font_name.to_string(), visible, page_rect.height());
    let mut current_orientation = 0.0;
    for line in lines {
        if line.orientation != current_orientation {
            builder.begin_orientation(line.orientation);
            current_orientation = line.orientation;
        }
        builder.draw_line(line);
    }
    builder.finish()
}

/// Overlays the hidden (or, for debugging, visible) text layer onto the
/// page.
pub fn draw_ocr_text_page(
    pdf: &mut Pdf,
    index: usize,
    lines: &[TextLine],
    visible: bool,
) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let page_rect = pdf.rect(index)?;
    let font_name = pdf.ensure_helvetica(index)?;

    // The layer is generated in bottom-up page coordinates; map it into
    // content space under the page's current rotation, then neutralize the
    // rotation while the overlay is merged.
    let flip = Matrix::new(1.0, 0.0, 0.0, -1.0, 0.0, page_rect.height());
    let into_content = flip.concat(&pdf.page_to_content(index)?);

    let original_rotation = pdf.rotation(index)?;
    pdf.set_rotation(index, 0)?;
    let mut ops = vec![Operation::new(
        "cm",
        vec![
            into_content.a.into(),
            into_content.b.into(),
            into_content.c.into(),
            into_content.d.into(),
            into_content.e.into(),
            into_content.f.into(),
        ],
    )];
    ops.extend(text_layer_ops(&font_name, &page_rect, lines, visible));
    pdf.append_operations(index, ops)?;
    pdf.set_rotation(index, original_rotation)?;
    Ok(())
}

/// Appends a page showing the same text layer visibly; used by the
/// debug-page mode to inspect detection quality next to the original.
pub fn append_visible_overlay_page(
    pdf: &mut Pdf,
    source_index: usize,
    lines: &[TextLine],
) -> Result<usize> {
    let page_rect = pdf.rect(source_index)?;
    let index = pdf.add_blank_page(page_rect.width(), page_rect.height())?;
    draw_ocr_text_page(pdf, index, lines, true)?;
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::testutil::single_page_pdf_with_content;
    use crate::pdf::BboxKind;

    fn word(text: &str, rect: Rect) -> TextWord {
        TextWord {
            text: text.to_string(),
            derotated_rect: rect,
            orientation: 0.0,
        }
    }

    fn line(text: &str, rect: Rect, words: Vec<TextWord>) -> TextLine {
        TextLine {
            text: text.to_string(),
            orientation: 0.0,
            derotated_rect: rect,
            rect,
            confidence: 0.99,
            words,
        }
    }

    #[test]
    fn test_overlay_is_invisible_text() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let lines = vec![line(
            "Hello world",
            Rect::new(100.0, 100.0, 300.0, 112.0),
            vec![
                word("Hello", Rect::new(100.0, 100.0, 180.0, 112.0)),
                word("world", Rect::new(200.0, 100.0, 300.0, 112.0)),
            ],
        )];
        draw_ocr_text_page(&mut pdf, 0, &lines, false).unwrap();
        let log = pdf.bbox_log(0).unwrap();
        assert_eq!(log.len(), 2, "one entry per word");
        for entry in &log {
            assert_eq!(entry.kind, BboxKind::IgnoreText);
        }
        // Words land at their detected horizontal positions.
        assert!((log[0].rect.x0 - 100.0).abs() < 1.0, "got {:?}", log[0].rect);
        assert!((log[1].rect.x0 - 200.0).abs() < 1.0, "got {:?}", log[1].rect);
        // The stretched explicit space makes the first word reach the
        // second one.
        assert!((log[0].rect.x1 - 200.0).abs() < 1.0, "got {:?}", log[0].rect);
        // Vertically within the detected band.
        assert!(log[0].rect.y0 > 95.0 && log[0].rect.y1 < 117.0, "got {:?}", log[0].rect);
    }

    #[test]
    fn test_visible_debug_layer_uses_fill_text() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let lines = vec![line(
            "debug",
            Rect::new(50.0, 50.0, 150.0, 62.0),
            vec![word("debug", Rect::new(50.0, 50.0, 150.0, 62.0))],
        )];
        draw_ocr_text_page(&mut pdf, 0, &lines, true).unwrap();
        let log = pdf.bbox_log(0).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, BboxKind::FillText);
    }

    #[test]
    fn test_empty_lines_leave_page_untouched() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let before = pdf.page_content(0).unwrap();
        draw_ocr_text_page(&mut pdf, 0, &[], false).unwrap();
        assert_eq!(pdf.page_content(0).unwrap(), before);
    }

    #[test]
    fn test_rotation_restored_after_overlay() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        pdf.set_rotation(0, 180).unwrap();
        let lines = vec![line(
            "text",
            Rect::new(10.0, 10.0, 60.0, 20.0),
            vec![word("text", Rect::new(10.0, 10.0, 60.0, 20.0))],
        )];
        draw_ocr_text_page(&mut pdf, 0, &lines, false).unwrap();
        assert_eq!(pdf.rotation(0).unwrap(), 180);
    }

    #[test]
    fn test_append_visible_overlay_page() {
        let mut pdf = single_page_pdf_with_content(600.0, 800.0, "");
        let lines = vec![line(
            "overlay",
            Rect::new(10.0, 10.0, 110.0, 22.0),
            vec![word("overlay", Rect::new(10.0, 10.0, 110.0, 22.0))],
        )];
        let index = append_visible_overlay_page(&mut pdf, 0, &lines).unwrap();
        assert_eq!(index, 1);
        assert_eq!(pdf.page_count(), 2);
        let log = pdf.bbox_log(1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind, BboxKind::FillText);
    }

    #[test]
    fn test_pdf_text_replaces_non_latin() {
        match pdf_text("añ€") {
            Object::String(bytes, _) => assert_eq!(bytes, vec![b'a', 0xf1, b'?']),
            other => panic!("unexpected operand {other:?}"),
        }
    }
}

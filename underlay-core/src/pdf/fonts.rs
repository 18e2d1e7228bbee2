//! Metrics for the standard Helvetica font.
//!
//! The text layer is rendered with one of the fourteen built-in PDF fonts so
//! that no font program has to be embedded. Widths below are the AFM values
//! in 1/1000 em for the printable ASCII range; everything outside that range
//! is approximated with the average lowercase width, which is close enough
//! for sizing invisible glyphs into a detected rectangle.

pub const HELVETICA: &str = "Helvetica";

const ASCENT: f32 = 718.0;
const DESCENT: f32 = -207.0;
const FALLBACK_WIDTH: u16 = 556;

#[rustfmt::skip]
const WIDTHS: [u16; 95] = [
    // 0x20 space .. 0x2f /
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    // 0x30 0 .. 0x3f ?
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    // 0x40 @ .. 0x4f O
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    // 0x50 P .. 0x5f _
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    // 0x60 ` .. 0x6f o
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    // 0x70 p .. 0x7e ~
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

pub fn char_width(c: char) -> u16 {
    let code = c as u32;
    if (0x20..=0x7e).contains(&code) {
        WIDTHS[(code - 0x20) as usize]
    } else {
        FALLBACK_WIDTH
    }
}

/// Width of `text` rendered at `size` points.
pub fn string_width(text: &str, size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| char_width(c) as u32).sum();
    units as f32 / 1000.0 * size
}

/// Distance from the baseline to the bottom of the glyph box, as a negative
/// number of points.
pub fn descent(size: f32) -> f32 {
    DESCENT / 1000.0 * size
}

pub fn ascent(size: f32) -> f32 {
    ASCENT / 1000.0 * size
}

//! Embedded 8x8 bitmap font
//!
//! Text is turned into axis-aligned rectangles, one per horizontal run of
//! set pixels, scaled so that a glyph cell is `size` pixels tall. Output is
//! identical on every machine since no system font is consulted.

use font8x8::{BASIC_FONTS, LATIN_FONTS, UnicodeFonts};

/// Glyph cell edge in font pixels
const CELL: usize = 8;

const BULLET: [u8; 8] = [0x00, 0x00, 0x18, 0x3C, 0x3C, 0x18, 0x00, 0x00];

/// A filled rectangle in text-box coordinates
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GlyphRun {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

fn glyph(ch: char) -> [u8; 8] {
    if ch == '\u{2022}' {
        return BULLET;
    }
    BASIC_FONTS
        .get(ch)
        .or_else(|| LATIN_FONTS.get(ch))
        .or_else(|| BASIC_FONTS.get('?'))
        .unwrap_or([0; 8])
}

/// Advance width of one character at `size` pixels
#[must_use]
pub fn advance(size: f32) -> f32 {
    size
}

/// Width and height of `text` rendered at `size` pixels
#[must_use]
pub fn measure(text: &str, size: f32) -> (f32, f32) {
    (text.chars().count() as f32 * advance(size), size)
}

/// Rectangles covering `text` with its box's top-left corner at the origin
#[must_use]
pub fn layout(text: &str, size: f32) -> Vec<GlyphRun> {
    let unit = size / CELL as f32;
    let mut runs = Vec::new();

    for (index, ch) in text.chars().enumerate() {
        let origin = index as f32 * advance(size);
        for (row, bits) in glyph(ch).iter().enumerate() {
            let mut col = 0;
            while col < CELL {
                // Bit 0 is the leftmost pixel.
                if bits & (1 << col) == 0 {
                    col += 1;
                    continue;
                }
                let start = col;
                while col < CELL && bits & (1 << col) != 0 {
                    col += 1;
                }
                runs.push(GlyphRun {
                    x: origin + start as f32 * unit,
                    y: row as f32 * unit,
                    width: (col - start) as f32 * unit,
                    height: unit,
                });
            }
        }
    }

    runs
}

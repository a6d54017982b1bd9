//! 5×7 bitmap glyphs for size labels.
//!
//! Labels only ever contain a formatted millimeter value, so the set is
//! limited to digits, `.`, `-` and `m`.

pub const GLYPH_WIDTH: u32 = 5;
pub const GLYPH_HEIGHT: u32 = 7;

/// Rows top to bottom; bit 4 is the leftmost column.
pub fn glyph(c: char) -> Option<[u8; 7]> {
    let rows = match c {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        'm' => [0x00, 0x00, 0x1A, 0x15, 0x15, 0x11, 0x11],
        _ => return None,
    };
    Some(rows)
}

/// Lit pixel offsets `(column, row)` of a glyph.
pub fn lit_pixels(rows: [u8; 7]) -> impl Iterator<Item = (u32, u32)> {
    (0..GLYPH_HEIGHT).flat_map(move |row| {
        (0..GLYPH_WIDTH).filter_map(move |col| {
            let bit = 1u8 << (GLYPH_WIDTH - 1 - col);
            (rows[row as usize] & bit != 0).then_some((col, row))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_characters_are_covered() {
        for c in "0123456789.-m".chars() {
            assert!(glyph(c).is_some(), "missing glyph {c}");
        }
        assert!(glyph('x').is_none());
    }

    #[test]
    fn dot_lights_bottom_rows_only() {
        let lit: Vec<_> = lit_pixels(glyph('.').unwrap()).collect();
        assert_eq!(lit, vec![(1, 5), (2, 5), (1, 6), (2, 6)]);
    }
}

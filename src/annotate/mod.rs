//! Annotation renderer: bounding boxes and size labels over the source image.
//!
//! Each record gets a rectangle outline at its bbox and a `"{mm:.1}mm"` label
//! directly above the box's top-left corner. Labels are clipped so they never
//! start above the image's top edge. Labels of neighbouring stones may overlap.

mod glyphs;

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::error::{StoneError, StoneResult};
use crate::stone::StoneRecord;

use glyphs::{glyph, lit_pixels, GLYPH_HEIGHT, GLYPH_WIDTH};

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 48, 48]);
pub const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
pub const BOX_STROKE_PX: i32 = 2;
pub const GLYPH_SCALE: u32 = 2;
pub const LABEL_PADDING_PX: u32 = 2;
pub const LABEL_MARGIN_PX: f64 = 2.0;

/// Height of a rendered label, background included.
pub const LABEL_HEIGHT_PX: u32 = GLYPH_HEIGHT * GLYPH_SCALE + 2 * LABEL_PADDING_PX;

pub fn size_label(record: &StoneRecord) -> String {
    format!("{:.1}mm", record.diameter_mm)
}

/// Top-left corner of a record's label: directly above the bbox, clipped at y = 0.
pub fn label_origin(record: &StoneRecord) -> (i32, i32) {
    let x = record.bbox.x1.round() as i32;
    let y = (record.bbox.y1 - LABEL_HEIGHT_PX as f64 - LABEL_MARGIN_PX).max(0.0);
    (x, y.round() as i32)
}

fn label_width(text: &str) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 2 * LABEL_PADDING_PX;
    }
    n * GLYPH_WIDTH * GLYPH_SCALE + (n - 1) * GLYPH_SCALE + 2 * LABEL_PADDING_PX
}

/// An annotated copy of the source image.
#[derive(Clone, Debug)]
pub struct AnnotatedImage {
    pub image: RgbImage,
    /// Encoding of the uploaded image; artifact files are written in it.
    pub source_format: ImageFormat,
}

impl AnnotatedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_jpeg(&self, quality: u8) -> StoneResult<Vec<u8>> {
        let mut buf = Vec::new();
        JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
            .encode_image(&self.image)
            .map_err(|e| StoneError::ImageDecode(format!("encode annotated jpeg: {}", e)))?;
        Ok(buf)
    }

    /// Encode in the source image's format.
    pub fn to_source_format(&self, jpeg_quality: u8) -> StoneResult<Vec<u8>> {
        if self.source_format == ImageFormat::Jpeg {
            return self.to_jpeg(jpeg_quality);
        }
        let mut buf = Cursor::new(Vec::new());
        self.image
            .write_to(&mut buf, self.source_format)
            .map_err(|e| StoneError::ImageDecode(format!("encode annotated image: {}", e)))?;
        Ok(buf.into_inner())
    }

    pub fn file_extension(&self) -> &'static str {
        self.source_format
            .extensions_str()
            .first()
            .copied()
            .unwrap_or("img")
    }
}

/// Decode `source` and draw every record onto it.
pub fn render(source: &[u8], records: &[StoneRecord]) -> StoneResult<AnnotatedImage> {
    let format = image::guess_format(source)
        .map_err(|e| StoneError::ImageDecode(format!("unrecognised image: {}", e)))?;
    let decoded = image::load_from_memory_with_format(source, format)
        .map_err(|e| StoneError::ImageDecode(e.to_string()))?;
    Ok(render_decoded(&decoded, format, records))
}

/// Draw every record onto an already decoded image.
pub fn render_decoded(
    image: &DynamicImage,
    source_format: ImageFormat,
    records: &[StoneRecord],
) -> AnnotatedImage {
    let mut canvas = image.to_rgb8();
    for record in records {
        draw_box(&mut canvas, record);
        draw_label(&mut canvas, record);
    }
    AnnotatedImage {
        image: canvas,
        source_format,
    }
}

fn draw_box(canvas: &mut RgbImage, record: &StoneRecord) {
    let x = record.bbox.x1.round() as i32;
    let y = record.bbox.y1.round() as i32;
    let w = record.bbox.width().round().max(1.0) as u32;
    let h = record.bbox.height().round().max(1.0) as u32;
    for i in 0..BOX_STROKE_PX {
        let grow = 2 * i as u32;
        let rect = Rect::at(x - i, y - i).of_size(w + grow, h + grow);
        draw_hollow_rect_mut(canvas, rect, BOX_COLOR);
    }
}

fn draw_label(canvas: &mut RgbImage, record: &StoneRecord) {
    let text = size_label(record);
    let (x, y) = label_origin(record);
    draw_filled_rect_mut(
        canvas,
        Rect::at(x, y).of_size(label_width(&text), LABEL_HEIGHT_PX),
        BOX_COLOR,
    );

    let mut pen_x = x + LABEL_PADDING_PX as i32;
    let pen_y = y + LABEL_PADDING_PX as i32;
    let advance = ((GLYPH_WIDTH + 1) * GLYPH_SCALE) as i32;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            for (col, row) in lit_pixels(rows) {
                let px = pen_x + (col * GLYPH_SCALE) as i32;
                let py = pen_y + (row * GLYPH_SCALE) as i32;
                draw_filled_rect_mut(
                    canvas,
                    Rect::at(px, py).of_size(GLYPH_SCALE, GLYPH_SCALE),
                    LABEL_TEXT_COLOR,
                );
            }
        }
        pen_x += advance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationScale;
    use crate::detect::Detection;
    use crate::stone::normalize;

    fn record_at(b: [f64; 4], w: u32, h: u32) -> StoneRecord {
        let dets = [Detection::new(b.into(), 0.9, None)];
        normalize(&dets, CalibrationScale::estimate(w, h), w, h)
            .records
            .remove(0)
    }

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([10, 10, 10]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    #[test]
    fn label_sits_above_box_and_clips_at_top() {
        let rec = record_at([100.0, 100.0, 150.0, 150.0], 800, 600);
        assert_eq!(size_label(&rec), "12.5mm");
        let (x, y) = label_origin(&rec);
        assert_eq!(x, 100);
        assert_eq!(y, 100 - LABEL_HEIGHT_PX as i32 - 2);

        let near_top = record_at([40.0, 5.0, 60.0, 30.0], 800, 600);
        assert_eq!(label_origin(&near_top), (40, 0));
    }

    #[test]
    fn draws_outline_and_keeps_dimensions() {
        let rec = record_at([100.0, 100.0, 150.0, 150.0], 300, 300);
        let annotated = render(&png_bytes(300, 300), &[rec]).unwrap();
        assert_eq!((annotated.width(), annotated.height()), (300, 300));
        assert_eq!(annotated.source_format, ImageFormat::Png);
        assert_eq!(*annotated.image.get_pixel(100, 125), BOX_COLOR);
        assert_eq!(*annotated.image.get_pixel(149, 125), BOX_COLOR);
        // Interior untouched.
        assert_eq!(*annotated.image.get_pixel(125, 125), Rgb([10, 10, 10]));
    }

    #[test]
    fn no_records_leaves_image_unchanged() {
        let annotated = render(&png_bytes(20, 20), &[]).unwrap();
        assert!(annotated.image.pixels().all(|p| *p == Rgb([10, 10, 10])));
    }

    #[test]
    fn corrupt_source_is_image_decode_error() {
        let err = render(b"definitely not an image", &[]).unwrap_err();
        assert!(matches!(err, StoneError::ImageDecode(_)));
    }

    #[test]
    fn encodes_jpeg_and_source_format() {
        let rec = record_at([2.0, 30.0, 12.0, 40.0], 64, 64);
        let annotated = render(&png_bytes(64, 64), &[rec]).unwrap();
        let jpeg = annotated.to_jpeg(85).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let png = annotated.to_source_format(85).unwrap();
        assert_eq!(image::guess_format(&png).unwrap(), ImageFormat::Png);
        assert_eq!(annotated.file_extension(), "png");
    }
}

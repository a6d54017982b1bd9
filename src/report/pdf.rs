//! PDF view of a report.
//!
//! Layout (US Letter, points): title, patient-information placeholder table,
//! annotated image, stone-burden summary box, per-stone detail table and the
//! recommendation list. The detail table continues on new pages as needed.
//! Every number comes from the report's records and summary through
//! `format`, so it matches the JSON view digit for digit.

use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use super::format;
use super::Report;
use crate::error::{StoneError, StoneResult};

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 54.0;
const POINTS_PER_INCH: f64 = 72.0;

/// Area the image is fitted into, before the caps below.
const IMAGE_AREA_WIDTH: f64 = 8.0 * POINTS_PER_INCH;
const IMAGE_AREA_HEIGHT: f64 = 10.0 * POINTS_PER_INCH;
const IMAGE_MAX_WIDTH: f64 = 6.0 * POINTS_PER_INCH;
const IMAGE_MAX_HEIGHT: f64 = 4.0 * POINTS_PER_INCH;

const ROW_HEIGHT: f64 = 18.0;
const TABLE_COLUMNS: [(&str, f64); 6] = [
    ("ID", 40.0),
    ("Position", 110.0),
    ("Size (mm)", 80.0),
    ("Side", 70.0),
    ("Type", 124.0),
    ("Confidence", 80.0),
];

const FONT_REGULAR: &str = "F1";
const FONT_BOLD: &str = "F2";
const IMAGE_NAME: &str = "Im1";

/// JPEG bytes of the annotated image with their pixel dimensions.
#[derive(Clone, Copy, Debug)]
pub struct PdfImage<'a> {
    pub jpeg: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// Displayed size of an image fitted into the report's image slot.
pub fn fit_image(width: u32, height: u32) -> (f64, f64) {
    if width == 0 || height == 0 {
        return (0.0, 0.0);
    }
    let (w, h) = (width as f64, height as f64);
    let max_w = IMAGE_AREA_WIDTH.min(IMAGE_MAX_WIDTH);
    let max_h = IMAGE_AREA_HEIGHT.min(IMAGE_MAX_HEIGHT);
    let scale = (max_w / w).min(max_h / h);
    (w * scale, h * scale)
}

/// Render the report as a single PDF document.
pub fn render_pdf(report: &Report, image: Option<PdfImage<'_>>) -> StoneResult<Vec<u8>> {
    let mut pages = PageSet::new();
    write_header(&mut pages, report);
    write_patient_table(&mut pages, report);
    write_image(&mut pages, image);
    write_summary_box(&mut pages, report);
    write_detail_table(&mut pages, report);
    write_recommendations(&mut pages, report);
    pages.into_pdf(image)
}

fn write_header(pages: &mut PageSet, report: &Report) {
    pages.text(MARGIN, pages.y, 18.0, true, "Kidney Stone Analysis Report");
    pages.y -= 16.0;
    let generated = format!("Analysis timestamp: {}", report.timestamp_string());
    pages.text(MARGIN, pages.y, 9.0, false, &generated);
    pages.y -= 24.0;
}

fn write_patient_table(pages: &mut PageSet, report: &Report) {
    pages.text(MARGIN, pages.y, 12.0, true, "Patient Information");
    pages.y -= 8.0;
    let scan_date = report.analysis_timestamp.format("%Y-%m-%d").to_string();
    let image_name = report
        .metadata
        .filename
        .clone()
        .unwrap_or_else(|| "-".to_string());
    let rows = [
        ("Patient Name", "____________________".to_string()),
        ("Patient ID", "____________________".to_string()),
        ("Date of Birth", "____________________".to_string()),
        ("Scan Date", scan_date),
        ("Image", image_name),
    ];
    let label_width = 140.0;
    let value_width = PAGE_WIDTH - 2.0 * MARGIN - label_width;
    for (label, value) in rows {
        let top = pages.y;
        pages.stroke_rect(MARGIN, top - ROW_HEIGHT, label_width, ROW_HEIGHT);
        pages.stroke_rect(MARGIN + label_width, top - ROW_HEIGHT, value_width, ROW_HEIGHT);
        pages.text(MARGIN + 6.0, top - 13.0, 10.0, true, label);
        pages.text(MARGIN + label_width + 6.0, top - 13.0, 10.0, false, &value);
        pages.y -= ROW_HEIGHT;
    }
    pages.y -= 20.0;
}

fn write_image(pages: &mut PageSet, image: Option<PdfImage<'_>>) {
    pages.text(MARGIN, pages.y, 12.0, true, "Annotated Scan");
    pages.y -= 10.0;
    match image {
        Some(img) => {
            let (w, h) = fit_image(img.width, img.height);
            pages.ensure_space(h + 10.0);
            let x = (PAGE_WIDTH - w) / 2.0;
            let y = pages.y - h;
            pages.draw_image(x, y, w, h);
            pages.y = y - 20.0;
        }
        None => {
            pages.text(MARGIN, pages.y - 12.0, 10.0, false, "Annotated image unavailable");
            pages.y -= 32.0;
        }
    }
}

fn write_summary_box(pages: &mut PageSet, report: &Report) {
    let summary = &report.summary;
    let severity = report.severity_descriptor();
    let lines = [
        format!("Total stones: {}", summary.total_stones),
        format!("Total stone burden: {} mm", format::mm(summary.total_burden_mm)),
        format!("Largest stone: {} mm", format::mm(summary.largest_stone_mm)),
        format!(
            "Average confidence: {}",
            format::percent(summary.average_confidence)
        ),
        format!("Severity: {} - {}", severity.level, severity.description),
        format!(
            "Scale factor: {:.3} mm/pixel ({}x{})",
            report.metadata.scale.mm_per_px(),
            report.metadata.image_width,
            report.metadata.image_height
        ),
    ];
    let box_height = 28.0 + lines.len() as f64 * 15.0;
    pages.ensure_space(box_height + 10.0);
    let top = pages.y;
    let width = PAGE_WIDTH - 2.0 * MARGIN;
    pages.fill_rect(MARGIN, top - box_height, width, box_height, 0.93);
    pages.stroke_rect(MARGIN, top - box_height, width, box_height);
    pages.text(MARGIN + 10.0, top - 18.0, 12.0, true, "Stone Burden Summary");
    let mut y = top - 36.0;
    for line in &lines {
        pages.text(MARGIN + 10.0, y, 10.0, false, line);
        y -= 15.0;
    }
    if report.metadata.synthetic_fallback {
        pages.text(
            MARGIN + 250.0,
            top - 18.0,
            9.0,
            false,
            "(synthetic detections - detector unavailable)",
        );
    }
    pages.y = top - box_height - 20.0;
}

fn table_header(pages: &mut PageSet) {
    let mut x = MARGIN;
    let top = pages.y;
    let total: f64 = TABLE_COLUMNS.iter().map(|(_, w)| w).sum();
    pages.fill_rect(MARGIN, top - ROW_HEIGHT, total, ROW_HEIGHT, 0.85);
    for (title, width) in TABLE_COLUMNS {
        pages.stroke_rect(x, top - ROW_HEIGHT, width, ROW_HEIGHT);
        pages.text(x + 4.0, top - 13.0, 9.0, true, title);
        x += width;
    }
    pages.y -= ROW_HEIGHT;
}

fn write_detail_table(pages: &mut PageSet, report: &Report) {
    pages.ensure_space(3.0 * ROW_HEIGHT + 14.0);
    pages.text(MARGIN, pages.y, 12.0, true, "Stone Details");
    pages.y -= 8.0;
    if report.records.is_empty() {
        pages.text(MARGIN, pages.y - 12.0, 10.0, false, "No stones detected.");
        pages.y -= 32.0;
        return;
    }
    table_header(pages);
    for record in &report.records {
        if pages.y - ROW_HEIGHT < MARGIN {
            pages.new_page();
            table_header(pages);
        }
        let cells = [
            record.id.to_string(),
            record.position.label(),
            format::mm(record.diameter_mm),
            record.position.horizontal.side().to_string(),
            record.stone_type.clone(),
            format::percent(record.confidence),
        ];
        let top = pages.y;
        let mut x = MARGIN;
        for ((_, width), cell) in TABLE_COLUMNS.iter().zip(cells.iter()) {
            pages.stroke_rect(x, top - ROW_HEIGHT, *width, ROW_HEIGHT);
            pages.text(x + 4.0, top - 13.0, 9.0, false, cell);
            x += width;
        }
        pages.y -= ROW_HEIGHT;
    }
    pages.y -= 20.0;
}

fn write_recommendations(pages: &mut PageSet, report: &Report) {
    pages.ensure_space(40.0);
    pages.text(MARGIN, pages.y, 12.0, true, "Recommendations");
    pages.y -= 18.0;
    for rec in &report.recommendations {
        pages.ensure_space(16.0);
        pages.text(MARGIN + 8.0, pages.y, 10.0, false, &format!("\u{2022} {}", rec));
        pages.y -= 15.0;
    }
    pages.ensure_space(30.0);
    pages.y -= 10.0;
    pages.text(
        MARGIN,
        pages.y,
        8.0,
        false,
        "Automatically generated measurements. Not a diagnosis; review with a qualified clinician.",
    );
}

/// Content streams under construction, one per page.
struct PageSet {
    pages: Vec<Vec<Operation>>,
    y: f64,
}

impl PageSet {
    fn new() -> Self {
        Self {
            pages: vec![Vec::new()],
            y: PAGE_HEIGHT - MARGIN,
        }
    }

    fn ops(&mut self) -> &mut Vec<Operation> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
        }
        let last = self.pages.len() - 1;
        &mut self.pages[last]
    }

    fn new_page(&mut self) {
        self.pages.push(Vec::new());
        self.y = PAGE_HEIGHT - MARGIN;
    }

    fn ensure_space(&mut self, height: f64) {
        if self.y - height < MARGIN {
            self.new_page();
        }
    }

    fn text(&mut self, x: f64, y: f64, size: f64, bold: bool, text: &str) {
        let font = if bold { FONT_BOLD } else { FONT_REGULAR };
        let ops = self.ops();
        ops.push(Operation::new("BT", vec![]));
        ops.push(Operation::new("Tf", vec![font.into(), real(size)]));
        ops.push(Operation::new("Td", vec![real(x), real(y)]));
        ops.push(Operation::new(
            "Tj",
            vec![Object::string_literal(win_ansi(text))],
        ));
        ops.push(Operation::new("ET", vec![]));
    }

    fn stroke_rect(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let ops = self.ops();
        ops.push(Operation::new("w", vec![real(0.5)]));
        ops.push(Operation::new("re", vec![real(x), real(y), real(w), real(h)]));
        ops.push(Operation::new("S", vec![]));
    }

    fn fill_rect(&mut self, x: f64, y: f64, w: f64, h: f64, gray: f64) {
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new("g", vec![real(gray)]));
        ops.push(Operation::new("re", vec![real(x), real(y), real(w), real(h)]));
        ops.push(Operation::new("f", vec![]));
        ops.push(Operation::new("Q", vec![]));
    }

    fn draw_image(&mut self, x: f64, y: f64, w: f64, h: f64) {
        let ops = self.ops();
        ops.push(Operation::new("q", vec![]));
        ops.push(Operation::new(
            "cm",
            vec![real(w), real(0.0), real(0.0), real(h), real(x), real(y)],
        ));
        ops.push(Operation::new("Do", vec![Object::Name(IMAGE_NAME.as_bytes().to_vec())]));
        ops.push(Operation::new("Q", vec![]));
    }

    fn into_pdf(self, image: Option<PdfImage<'_>>) -> StoneResult<Vec<u8>> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let regular_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => "WinAnsiEncoding",
        });
        let bold_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
            "Encoding" => "WinAnsiEncoding",
        });

        let mut resources = dictionary! {
            "Font" => dictionary! {
                FONT_REGULAR => regular_id,
                FONT_BOLD => bold_id,
            },
        };
        if let Some(img) = image {
            let image_stream = Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => Object::Integer(img.width as i64),
                    "Height" => Object::Integer(img.height as i64),
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => Object::Integer(8),
                    "Filter" => "DCTDecode",
                },
                img.jpeg.to_vec(),
            );
            let image_id = doc.add_object(image_stream);
            resources.set(
                "XObject",
                dictionary! {
                    IMAGE_NAME => image_id,
                },
            );
        }
        let resources_id = doc.add_object(resources);

        let mut kids = Vec::with_capacity(self.pages.len());
        for operations in self.pages {
            let encoded = Content { operations }
                .encode()
                .map_err(|e| StoneError::ReportGeneration(format!("encode page content: {}", e)))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(Object::Reference(page_id));
        }

        let page_count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => Object::Integer(page_count),
                "Resources" => resources_id,
                "MediaBox" => vec![real(0.0), real(0.0), real(PAGE_WIDTH), real(PAGE_HEIGHT)],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out)
            .map_err(|e| StoneError::ReportGeneration(format!("write pdf: {}", e)))?;
        Ok(out)
    }
}

fn real(value: f64) -> Object {
    Object::Real(value as _)
}

/// Encode text for the standard Type1 fonts. Characters outside
/// WinAnsiEncoding become `?`.
fn win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            ' '..='~' => c as u8,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{00A0}'..='\u{00FF}' => c as u32 as u8,
            _ => b'?',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_respects_caps_and_aspect_ratio() {
        let (w, h) = fit_image(1200, 600);
        assert!((w - 432.0).abs() < 1e-9);
        assert!((h - 216.0).abs() < 1e-9);

        let (w, h) = fit_image(300, 900);
        assert!((h - 288.0).abs() < 1e-9);
        assert!((w - 96.0).abs() < 1e-9);

        assert_eq!(fit_image(0, 10), (0.0, 0.0));
    }

    #[test]
    fn win_ansi_maps_dashes_and_bullets() {
        assert_eq!(win_ansi("2–3"), vec![b'2', 0x96, b'3']);
        assert_eq!(win_ansi("\u{2022} a"), vec![0x95, b' ', b'a']);
        assert_eq!(win_ansi("µ"), vec![0xB5]);
        assert_eq!(win_ansi("字"), vec![b'?']);
    }
}

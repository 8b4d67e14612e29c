//! Page composition and PDF stitching for the layout-preserving translator
//! (4.N supplement): paints a region's [`LayoutPlan`] onto its page raster
//! with real glyph outlines, then stitches every translated page raster
//! into a new PDF document.
//!
//! No counterpart exists in the teacher, which only ever reads PDFs via
//! pdfium and never writes one. Grounded instead in `lopdf`, the same way
//! the `SigmundGranaas-petty` example repo's `render-lopdf`/`pdf-composer`
//! crates and the `carjorvaz-pdf-translator-rs` reference manifest use it
//! for the identical task (translate-and-restitch a PDF): each full-page
//! raster becomes an embedded image XObject on its own page.

use crate::error::PipelineError;
use crate::layout_render::{LayoutPlan, LinePart};
use fontdb::{Database, Family, Query};
use image::{ImageEncoder, RgbaImage};
use lopdf::{dictionary, Document, Object, Stream};
use tiny_skia::{FillRule, Paint, PathBuilder, Pixmap, Transform};
use ttf_parser::{Face as OutlineFace, GlyphId, OutlineBuilder};

/// Lazily-loaded system font database shared across a render pass — one
/// instance per document job, since enumerating system fonts is the
/// expensive part.
pub struct FontContext {
    db: Database,
}

impl Default for FontContext {
    fn default() -> Self {
        let mut db = Database::new();
        db.load_system_fonts();
        FontContext { db }
    }
}

impl FontContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Best-available system font family for `language` (4.N: glyph
    /// coverage, not just Latin, is required once translation targets CJK
    /// or Arabic scripts).
    fn family_for(language: &str) -> Family<'static> {
        match language {
            "zh" | "zh-cn" | "zh-en-mixed" | "简体中文" => Family::Name("Noto Sans CJK SC"),
            "繁体中文" => Family::Name("Noto Sans CJK TC"),
            "ja" | "日语" => Family::Name("Noto Sans CJK JP"),
            "ko" | "한국어" | "韩语" => Family::Name("Noto Sans CJK KR"),
            "ar" | "阿拉伯语" => Family::Name("Noto Sans Arabic"),
            _ => Family::SansSerif,
        }
    }

    /// Paint one region's fitted layout onto `page` at `(x0, y0)` (the
    /// region's top-left corner), using `language` to pick a glyph-covering
    /// system font. Returns `false` without modifying `page` if no matching
    /// font is installed — the caller should leave the original raster
    /// pixels in place for that region rather than fail the whole page.
    pub fn paint_region(&self, page: &mut RgbaImage, x0: f64, y0: f64, plan: &LayoutPlan, language: &str) -> bool {
        let family = Self::family_for(language);
        let query = Query { families: &[family], ..Default::default() };
        let Some(face_id) = self.db.query(&query).or_else(|| {
            self.db.query(&Query { families: &[Family::SansSerif], ..Default::default() })
        }) else {
            return false;
        };

        let mut painted = false;
        self.db.with_face_data(face_id, |data, face_index| {
            let Ok(outline_face) = OutlineFace::parse(data, face_index) else { return };
            let Some(shape_face) = rustybuzz::Face::from_slice(data, face_index) else { return };

            let mut cursor_y = y0 + plan.font_size; // first baseline one font-size down from the box top
            for line in &plan.lines {
                let mut cursor_x = x0;
                for part in &line.parts {
                    match part {
                        LinePart::Text(text) => {
                            cursor_x = paint_run(page, &outline_face, &shape_face, text, plan.font_size, cursor_x, cursor_y);
                        }
                        LinePart::Math(raw) => {
                            // A fully typeset math renderer is out of scope; the
                            // stripped body is painted as a plain glyph run so the
                            // page at least carries the content, sized per the
                            // formula-width heuristic rather than per-glyph shaping.
                            let body = raw.trim_start_matches('$').trim_end_matches('$');
                            cursor_x = paint_run(page, &outline_face, &shape_face, body, plan.font_size, cursor_x, cursor_y);
                        }
                    }
                }
                cursor_y += plan.line_height;
                painted = true;
            }
        });
        painted
    }
}

/// Shape and paint one run of plain text starting at `(x, y)` (baseline
/// origin), returning the pen's x position after the run.
fn paint_run(
    page: &mut RgbaImage,
    outline_face: &OutlineFace,
    shape_face: &rustybuzz::Face,
    text: &str,
    font_size: f64,
    x: f64,
    y: f64,
) -> f64 {
    let mut buffer = rustybuzz::UnicodeBuffer::new();
    buffer.push_str(text);
    buffer.guess_segment_properties();
    let glyph_buffer = rustybuzz::shape(shape_face, &[], buffer);

    let units_per_em = outline_face.units_per_em().max(1) as f64;
    let scale = font_size / units_per_em;

    let mut pen_x = x;
    let mut paint = Paint::default();
    paint.set_color_rgba8(0, 0, 0, 255);
    paint.anti_alias = true;

    for (info, pos) in glyph_buffer.glyph_infos().iter().zip(glyph_buffer.glyph_positions()) {
        let glyph_x = pen_x + pos.x_offset as f64 * scale;
        let glyph_y = y - pos.y_offset as f64 * scale;

        let mut builder = SkiaOutlineBuilder::default();
        if outline_face.outline_glyph(GlyphId(info.glyph_id as u16), &mut builder).is_some() {
            if let Some(path) = builder.build() {
                let transform = Transform::from_row(
                    scale as f32,
                    0.0,
                    0.0,
                    -scale as f32,
                    glyph_x as f32,
                    glyph_y as f32,
                );
                let mut pixmap_ref = PixmapRefMut(page);
                pixmap_ref.fill_path(&path, &paint, FillRule::Winding, transform);
            }
        }

        pen_x += pos.x_advance as f64 * scale;
    }

    pen_x
}

/// Adapts `ttf_parser::OutlineBuilder` callbacks into a `tiny_skia::Path`.
#[derive(Default)]
struct SkiaOutlineBuilder {
    builder: PathBuilder,
}

impl SkiaOutlineBuilder {
    fn build(self) -> Option<tiny_skia::Path> {
        self.builder.finish()
    }
}

impl OutlineBuilder for SkiaOutlineBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x, y);
    }
    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x, y);
    }
    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(x1, y1, x, y);
    }
    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }
    fn close(&mut self) {
        self.builder.close();
    }
}

/// A thin adapter letting a plain `image::RgbaImage` act as a fill target
/// for `tiny_skia`, which otherwise only fills its own `Pixmap` buffer —
/// this crate paints translated regions directly onto the page raster
/// produced by the Preprocessor (4.D) rather than maintaining a parallel
/// `Pixmap` per page.
struct PixmapRefMut<'a>(&'a mut RgbaImage);

impl<'a> PixmapRefMut<'a> {
    fn fill_path(&mut self, path: &tiny_skia::Path, paint: &Paint, rule: FillRule, transform: Transform) {
        let (w, h) = (self.0.width(), self.0.height());
        let Some(mut scratch) = Pixmap::new(w, h) else { return };
        // Copy existing pixels so the fill composites over the page rather
        // than over a blank buffer.
        scratch.data_mut().copy_from_slice(self.0.as_raw());
        scratch.fill_path(path, paint, rule, transform, None);
        self.0.copy_from_slice(scratch.data());
    }
}

/// Flood-fill a region with white before painting translated text into it
/// (4.N step 6/7: the translated text replaces the source glyphs rather than
/// overlaying them). Bounds are clamped to the page.
pub fn blank_region(page: &mut RgbaImage, x0: f64, y0: f64, x1: f64, y1: f64) {
    let (w, h) = (page.width(), page.height());
    let xs = (x0.max(0.0) as u32).min(w);
    let ys = (y0.max(0.0) as u32).min(h);
    let xe = (x1.max(0.0) as u32).min(w);
    let ye = (y1.max(0.0) as u32).min(h);
    for y in ys..ye {
        for x in xs..xe {
            page.put_pixel(x, y, image::Rgba([255, 255, 255, 255]));
        }
    }
}

/// Stitch a document's page rasters into a new PDF (4.N supplement): each
/// page becomes one PDF page with a single full-page JPEG image XObject,
/// sized at 72 DPI points regardless of the raster's own DPI (the PDF's
/// `MediaBox` is always in points; `dpi` converts the raster's pixel
/// dimensions back to points).
pub fn stitch_pages_to_pdf(pages: &[RgbaImage], dpi: u32) -> Result<Document, PipelineError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    let scale = 72.0 / dpi.max(1) as f64;

    for page in pages {
        let jpeg_bytes = encode_jpeg(page)?;
        let pt_w = page.width() as f64 * scale;
        let pt_h = page.height() as f64 * scale;

        let img_dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => page.width() as i64,
            "Height" => page.height() as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        let img_id = doc.add_object(Stream::new(img_dict, jpeg_bytes));

        let content = format!("q {pt_w:.2} 0 0 {pt_h:.2} 0 0 cm /Im0 Do Q");
        let content_id = doc.add_object(Stream::new(lopdf::Dictionary::new(), content.into_bytes()));

        let mut xobjects = lopdf::Dictionary::new();
        xobjects.set("Im0", Object::Reference(img_id));
        let mut resources = lopdf::Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let page_dict = dictionary! {
            "Type" => "Page",
            "Parent" => Object::Reference(pages_id),
            "Contents" => Object::Reference(content_id),
            "Resources" => Object::Dictionary(resources),
            "MediaBox" => vec![0.into(), 0.into(), pt_w.into(), pt_h.into()],
        };
        kids.push(Object::Reference(doc.add_object(page_dict)));
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => kids.clone(),
        "Count" => kids.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    doc.compress();

    Ok(doc)
}

fn encode_jpeg(page: &RgbaImage) -> Result<Vec<u8>, PipelineError> {
    let rgb = image::DynamicImage::ImageRgba8(page.clone()).to_rgb8();
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .write_image(rgb.as_raw(), rgb.width(), rgb.height(), image::ExtendedColorType::Rgb8)
        .map_err(|e| PipelineError::Internal(format!("jpeg encode failed: {e}")))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stitching_zero_pages_produces_an_empty_pdf() {
        let doc = stitch_pages_to_pdf(&[], 300).unwrap();
        assert!(doc.trailer.has(b"Root"));
    }

    #[test]
    fn stitching_one_page_produces_one_pdf_page() {
        let page = RgbaImage::from_pixel(100, 100, image::Rgba([255, 255, 255, 255]));
        let doc = stitch_pages_to_pdf(&[page], 300).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn blank_region_whites_out_only_the_requested_rectangle() {
        let mut page = RgbaImage::from_pixel(10, 10, image::Rgba([0, 0, 0, 255]));
        blank_region(&mut page, 2.0, 2.0, 5.0, 5.0);
        assert_eq!(*page.get_pixel(3, 3), image::Rgba([255, 255, 255, 255]));
        assert_eq!(*page.get_pixel(0, 0), image::Rgba([0, 0, 0, 255]));
    }

    #[test]
    fn font_context_falls_back_to_sans_serif_for_unknown_language() {
        // Exercises the family-selection path without asserting a specific
        // installed font exists in the test environment.
        let family = FontContext::family_for("unknown-lang-xyz");
        assert!(matches!(family, Family::SansSerif));
    }
}

use crate::canvas::{Command, ImageFit, RenderedDocument};
use crate::error::BadgePressError;
use crate::font::FontRegistry;
use crate::types::{Color, Pt};
use base64::Engine;
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::path::Path as FsPath;
use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use ttf_parser::{GlyphId, OutlineBuilder};

/// One rasterized badge side. Wraps the pixel buffer so callers can pick the
/// encoding (PNG for previews, raw RGB for the PDF embedder) without
/// re-rendering.
pub struct RasterPage {
    pixmap: Pixmap,
}

impl RasterPage {
    pub fn width_px(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height_px(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn to_png(&self) -> Result<Vec<u8>, BadgePressError> {
        self.pixmap
            .encode_png()
            .map_err(|e| BadgePressError::Raster(format!("png encode failed: {e}")))
    }

    /// Straight (non-premultiplied) RGB, row-major. Pages are composited onto
    /// opaque white so alpha carries no information by this point.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixmap.pixels().len() * 3);
        for pixel in self.pixmap.pixels() {
            let demul = pixel.demultiply();
            out.push(demul.red());
            out.push(demul.green());
            out.push(demul.blue());
        }
        out
    }
}

#[derive(Clone)]
struct RasterState {
    transform: Transform,
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    opacity: f32,
    font_name: String,
    font_size: Pt,
    clip_mask: Option<Mask>,
}

impl Default for RasterState {
    fn default() -> Self {
        Self {
            transform: Transform::identity(),
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            opacity: 1.0,
            font_name: "Helvetica".to_string(),
            font_size: Pt::from_f32(12.0),
            clip_mask: None,
        }
    }
}

/// Replays a rendered document into one pixmap per page at the given DPI.
///
/// Command coordinates are top-down page points; the base transform is a pure
/// scale, so no global flip is involved.
pub fn rasterize(
    document: &RenderedDocument,
    dpi: u32,
    registry: Option<&FontRegistry>,
) -> Result<Vec<RasterPage>, BadgePressError> {
    let dpi = if dpi == 0 { 300 } else { dpi };
    let width_px = pt_milli_to_px_u32(document.page_size.width.to_milli_i64(), dpi)?;
    let height_px = pt_milli_to_px_u32(document.page_size.height.to_milli_i64(), dpi)?;
    let scale = dpi as f32 / 72.0;
    let base_transform = Transform::from_scale(scale, scale);

    let mut pages = Vec::with_capacity(document.pages.len());
    let mut image_cache: HashMap<String, Option<Pixmap>> = HashMap::new();

    for page in &document.pages {
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            BadgePressError::Raster(format!(
                "invalid raster size {width_px}x{height_px} at {dpi} DPI"
            ))
        })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        let mut state = RasterState::default();
        let mut stack: Vec<RasterState> = Vec::new();
        let mut path_builder = PathBuilder::new();
        let mut has_path = false;

        for cmd in &page.commands {
            match cmd {
                Command::SaveState => stack.push(state.clone()),
                Command::RestoreState => {
                    if let Some(restored) = stack.pop() {
                        state = restored;
                    }
                }
                Command::Translate(x, y) => {
                    state.transform = state
                        .transform
                        .pre_concat(Transform::from_translate(x.to_f32(), y.to_f32()));
                }
                Command::Rotate(degrees) => {
                    state.transform = state.transform.pre_concat(Transform::from_rotate(*degrees));
                }
                Command::SetFillColor(color) => state.fill_color = *color,
                Command::SetStrokeColor(color) => state.stroke_color = *color,
                Command::SetLineWidth(width) => {
                    state.line_width = width.max(Pt::ZERO);
                }
                Command::SetOpacity(opacity) => state.opacity = opacity.clamp(0.0, 1.0),
                Command::SetFontName(name) => state.font_name = name.clone(),
                Command::SetFontSize(size) => state.font_size = *size,
                Command::ClipRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if let Some(rect) = Rect::from_xywh(
                        x.to_f32(),
                        y.to_f32(),
                        width.to_f32(),
                        height.to_f32(),
                    ) {
                        let path = PathBuilder::from_rect(rect);
                        apply_clip_path(
                            &mut state,
                            &path,
                            base_transform,
                            width_px,
                            height_px,
                        );
                    }
                }
                Command::MoveTo { x, y } => {
                    path_builder.move_to(x.to_f32(), y.to_f32());
                    has_path = true;
                }
                Command::LineTo { x, y } => {
                    path_builder.line_to(x.to_f32(), y.to_f32());
                    has_path = true;
                }
                Command::CurveTo {
                    x1,
                    y1,
                    x2,
                    y2,
                    x,
                    y,
                } => {
                    path_builder.cubic_to(
                        x1.to_f32(),
                        y1.to_f32(),
                        x2.to_f32(),
                        y2.to_f32(),
                        x.to_f32(),
                        y.to_f32(),
                    );
                    has_path = true;
                }
                Command::ClosePath => {
                    if has_path {
                        path_builder.close();
                    }
                }
                Command::Fill => {
                    if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                        let paint = fill_paint(state.fill_color, state.opacity);
                        pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::Winding,
                            base_transform.pre_concat(state.transform),
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::Stroke => {
                    if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                        stroke_path(&mut pixmap, &state, &path, base_transform);
                    }
                }
                Command::FillStroke => {
                    if let Some(path) = take_path(&mut path_builder, &mut has_path) {
                        let paint = fill_paint(state.fill_color, state.opacity);
                        pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::Winding,
                            base_transform.pre_concat(state.transform),
                            state.clip_mask.as_ref(),
                        );
                        stroke_path(&mut pixmap, &state, &path, base_transform);
                    }
                }
                Command::DrawString { x, y, text } => {
                    draw_string(
                        &mut pixmap,
                        &state,
                        x.to_f32(),
                        y.to_f32(),
                        text,
                        base_transform,
                        registry,
                    );
                }
                Command::DrawRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    if let Some(rect) = Rect::from_xywh(
                        x.to_f32(),
                        y.to_f32(),
                        width.to_f32(),
                        height.to_f32(),
                    ) {
                        let path = PathBuilder::from_rect(rect);
                        let paint = fill_paint(state.fill_color, state.opacity);
                        pixmap.fill_path(
                            &path,
                            &paint,
                            FillRule::Winding,
                            base_transform.pre_concat(state.transform),
                            state.clip_mask.as_ref(),
                        );
                    }
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    source,
                    fit,
                } => {
                    let loaded = image_cache
                        .entry(source.clone())
                        .or_insert_with(|| load_image_pixmap(source));
                    match loaded.as_ref() {
                        Some(image) => draw_image(
                            &mut pixmap,
                            &state,
                            image,
                            x.to_f32(),
                            y.to_f32(),
                            width.to_f32(),
                            height.to_f32(),
                            *fit,
                            base_transform,
                            width_px,
                            height_px,
                        ),
                        None => {
                            // Missing asset: outline the slot so the gap is
                            // visible on proofs instead of silently blank.
                            if let Some(rect) = Rect::from_xywh(
                                x.to_f32(),
                                y.to_f32(),
                                width.to_f32(),
                                height.to_f32(),
                            ) {
                                let path = PathBuilder::from_rect(rect);
                                stroke_path(&mut pixmap, &state, &path, base_transform);
                            }
                        }
                    }
                }
                Command::Meta { .. } => {}
            }
        }

        pages.push(RasterPage { pixmap });
    }

    Ok(pages)
}

#[allow(clippy::too_many_arguments)]
fn draw_image(
    pixmap: &mut Pixmap,
    state: &RasterState,
    image: &Pixmap,
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    fit: ImageFit,
    base_transform: Transform,
    page_width_px: u32,
    page_height_px: u32,
) {
    let src_w = image.width() as f32;
    let src_h = image.height() as f32;
    if src_w <= 0.0 || src_h <= 0.0 || width <= 0.0 || height <= 0.0 {
        return;
    }

    let (sx, sy) = match fit {
        ImageFit::Stretch => (width / src_w, height / src_h),
        ImageFit::Contain => {
            let s = (width / src_w).min(height / src_h);
            (s, s)
        }
        ImageFit::Cover => {
            let s = (width / src_w).max(height / src_h);
            (s, s)
        }
    };
    let dx = x + (width - src_w * sx) / 2.0;
    let dy = y + (height - src_h * sy) / 2.0;
    let image_ts = Transform::from_row(sx, 0.0, 0.0, sy, dx, dy);
    let device_ts = base_transform
        .pre_concat(state.transform)
        .pre_concat(image_ts);

    // Cover overflows the box; clip the spill to the destination rect.
    let clip = if fit == ImageFit::Cover {
        let mut clipped = state.clone();
        if let Some(rect) = Rect::from_xywh(x, y, width, height) {
            let path = PathBuilder::from_rect(rect);
            apply_clip_path(&mut clipped, &path, base_transform, page_width_px, page_height_px);
        }
        clipped.clip_mask
    } else {
        state.clip_mask.clone()
    };

    let mut paint = PixmapPaint::default();
    paint.quality = FilterQuality::Bilinear;
    paint.opacity = state.opacity;
    pixmap.draw_pixmap(0, 0, image.as_ref(), &paint, device_ts, clip.as_ref());
}

fn draw_string(
    pixmap: &mut Pixmap,
    state: &RasterState,
    x: f32,
    y: f32,
    text: &str,
    base_transform: Transform,
    registry: Option<&FontRegistry>,
) {
    let font_size = state.font_size.to_f32();
    if font_size <= 0.0 || text.is_empty() {
        return;
    }
    let Some(font) = registry.and_then(|r| r.resolve(&state.font_name)) else {
        return;
    };
    let Ok(face) = ttf_parser::Face::parse(&font.data, 0) else {
        return;
    };
    let Some(hb_face) = HbFace::from_slice(&font.data, 0) else {
        return;
    };
    let units_per_em = face.units_per_em().max(1) as f32;
    let scale = font_size / units_per_em;

    let mut buffer = UnicodeBuffer::new();
    buffer.push_str(text);
    let shaped = rustybuzz::shape(&hb_face, &[], buffer);
    let infos = shaped.glyph_infos();
    let positions = shaped.glyph_positions();

    let paint = fill_paint(state.fill_color, state.opacity);
    let device_transform = base_transform.pre_concat(state.transform);
    let mut pen_x = x;
    for (info, pos) in infos.iter().zip(positions.iter()) {
        let origin_x = pen_x + pos.x_offset as f32 * scale;
        let origin_y = y - pos.y_offset as f32 * scale;
        let mut builder = GlyphPathBuilder::new(origin_x, origin_y, scale);
        if face
            .outline_glyph(GlyphId(info.glyph_id as u16), &mut builder)
            .is_some()
        {
            if let Some(path) = builder.finish() {
                pixmap.fill_path(
                    &path,
                    &paint,
                    FillRule::Winding,
                    device_transform,
                    state.clip_mask.as_ref(),
                );
            }
        }
        pen_x += pos.x_advance as f32 * scale;
    }
}

fn stroke_path(pixmap: &mut Pixmap, state: &RasterState, path: &Path, base_transform: Transform) {
    let paint = fill_paint(state.stroke_color, state.opacity);
    let mut stroke = Stroke::default();
    stroke.width = state.line_width.to_f32().max(0.0);
    pixmap.stroke_path(
        path,
        &paint,
        &stroke,
        base_transform.pre_concat(state.transform),
        state.clip_mask.as_ref(),
    );
}

fn apply_clip_path(
    state: &mut RasterState,
    path: &Path,
    base_transform: Transform,
    width: u32,
    height: u32,
) {
    let transform = base_transform.pre_concat(state.transform);
    if let Some(mask) = state.clip_mask.as_mut() {
        mask.intersect_path(path, FillRule::Winding, true, transform);
        return;
    }
    let Some(mut mask) = Mask::new(width, height) else {
        return;
    };
    mask.fill_path(path, FillRule::Winding, true, transform);
    state.clip_mask = Some(mask);
}

fn fill_paint(color: Color, opacity: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(to_sk_color(color, opacity));
    paint.anti_alias = true;
    paint
}

fn to_sk_color(color: Color, opacity: f32) -> tiny_skia::Color {
    let r = color.r.clamp(0.0, 1.0);
    let g = color.g.clamp(0.0, 1.0);
    let b = color.b.clamp(0.0, 1.0);
    let a = opacity.clamp(0.0, 1.0);
    tiny_skia::Color::from_rgba(r, g, b, a)
        .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
}

fn take_path(path_builder: &mut PathBuilder, has_path: &mut bool) -> Option<Path> {
    if !*has_path {
        return None;
    }
    *has_path = false;
    let builder = std::mem::replace(path_builder, PathBuilder::new());
    builder.finish()
}

fn pt_milli_to_px_u32(pt_milli: i64, dpi: u32) -> Result<u32, BadgePressError> {
    let px = pt_milli_to_px_i64(pt_milli, dpi)?;
    if px <= 0 {
        return Err(BadgePressError::Raster(format!(
            "non-positive pixel dimension {px} for pt_milli={pt_milli} dpi={dpi}"
        )));
    }
    u32::try_from(px).map_err(|_| {
        BadgePressError::Raster(format!(
            "pixel dimension out of range: {px} for pt_milli={pt_milli} dpi={dpi}"
        ))
    })
}

fn pt_milli_to_px_i64(pt_milli: i64, dpi: u32) -> Result<i64, BadgePressError> {
    if dpi == 0 {
        return Err(BadgePressError::Raster("dpi must be > 0".to_string()));
    }
    let num = (pt_milli as i128).saturating_mul(dpi as i128);
    let den = 72_000_i128;
    let px = if num >= 0 {
        (num + (den / 2)) / den
    } else {
        -(((-num) + (den / 2)) / den)
    };
    i64::try_from(px).map_err(|_| {
        BadgePressError::Raster(format!(
            "pixel conversion overflow: pt_milli={pt_milli} dpi={dpi}"
        ))
    })
}

fn load_image_pixmap(source: &str) -> Option<Pixmap> {
    if let Some((mime, data)) = parse_data_uri(source) {
        return decode_image_to_pixmap(&data, Some(&mime));
    }
    let bytes = std::fs::read(FsPath::new(source)).ok()?;
    decode_image_to_pixmap(&bytes, None)
}

fn decode_image_to_pixmap(data: &[u8], mime: Option<&str>) -> Option<Pixmap> {
    let guessed_format = if let Some(mime) = mime {
        if mime.contains("png") {
            Some(image::ImageFormat::Png)
        } else if mime.contains("jpeg") || mime.contains("jpg") {
            Some(image::ImageFormat::Jpeg)
        } else {
            None
        }
    } else {
        image::guess_format(data).ok()
    };

    let decoded = if let Some(fmt) = guessed_format {
        image::load_from_memory_with_format(data, fmt).ok()?
    } else {
        image::load_from_memory(data).ok()?
    };
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    let src = rgba.as_raw();
    let dst = pixmap.data_mut();
    for (src_px, dst_px) in src.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
        let a = src_px[3];
        dst_px[0] = premul_u8(src_px[0], a);
        dst_px[1] = premul_u8(src_px[1], a);
        dst_px[2] = premul_u8(src_px[2], a);
        dst_px[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn parse_data_uri(uri: &str) -> Option<(String, Vec<u8>)> {
    if !uri.starts_with("data:") {
        return None;
    }
    let (header, payload) = uri.split_once(',')?;
    let mime = header
        .trim_start_matches("data:")
        .split(';')
        .next()
        .filter(|v| !v.is_empty())
        .unwrap_or("application/octet-stream")
        .to_string();
    let data = if header.contains(";base64") {
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()?
    } else {
        payload.as_bytes().to_vec()
    };
    Some((mime, data))
}

struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }
}

// Glyph outlines are y-up; page space is y-down, hence the subtraction.
impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            self.origin_x + x1 * self.scale,
            self.origin_y - y1 * self.scale,
            self.origin_x + x2 * self.scale,
            self.origin_y - y2 * self.scale,
            self.origin_x + x * self.scale,
            self.origin_y - y * self.scale,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{Canvas, Page};
    use crate::types::Size;
    use image::RgbaImage;

    fn red() -> Color {
        Color::rgb(1.0, 0.0, 0.0)
    }

    fn pixel_at(page: &RasterPage, x: u32, y: u32) -> [u8; 3] {
        let rgb = page.to_rgb();
        let idx = ((y * page.width_px() + x) * 3) as usize;
        [rgb[idx], rgb[idx + 1], rgb[idx + 2]]
    }

    #[test]
    fn pt_milli_to_px_rounds_half_away_from_zero() {
        assert_eq!(pt_milli_to_px_i64(72_000, 150).unwrap(), 150);
        assert_eq!(pt_milli_to_px_i64(240, 150).unwrap(), 1);
        assert_eq!(pt_milli_to_px_i64(-240, 150).unwrap(), -1);
        assert_eq!(pt_milli_to_px_i64(239, 150).unwrap(), 0);
    }

    #[test]
    fn parse_data_uri_base64_decodes_payload() {
        let uri = "data:text/plain;base64,SGVsbG8=";
        let (mime, data) = parse_data_uri(uri).unwrap();
        assert_eq!(mime, "text/plain");
        assert_eq!(data, b"Hello");
    }

    #[test]
    fn decode_image_to_pixmap_handles_png() {
        let mut src = RgbaImage::new(1, 1);
        src.put_pixel(0, 0, image::Rgba([255, 0, 0, 128]));
        let mut bytes = Vec::new();
        src.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageFormat::Png,
        )
        .unwrap();
        let pixmap = decode_image_to_pixmap(&bytes, Some("image/png")).unwrap();
        assert_eq!(pixmap.width(), 1);
        assert_eq!(pixmap.height(), 1);
    }

    #[test]
    fn filled_rect_lands_at_top_down_coordinates() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.set_fill_color(red());
        canvas.draw_rect(
            Pt::ZERO,
            Pt::ZERO,
            Pt::from_f32(20.0),
            Pt::from_f32(20.0),
        );
        let doc = canvas.finish();
        let pages = rasterize(&doc, 72, None).unwrap();
        assert_eq!(pages.len(), 1);
        // Inside the rect, near the top-left corner of the page.
        assert_eq!(pixel_at(&pages[0], 5, 5), [255, 0, 0]);
        // Bottom-left of the page stays white.
        let h = pages[0].height_px();
        assert_eq!(pixel_at(&pages[0], 5, h - 5), [255, 255, 255]);
    }

    #[test]
    fn missing_image_strokes_a_placeholder_outline() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.set_stroke_color(red());
        canvas.set_line_width(Pt::from_f32(4.0));
        canvas.draw_image(
            Pt::from_f32(10.0),
            Pt::from_f32(10.0),
            Pt::from_f32(50.0),
            Pt::from_f32(50.0),
            "/nonexistent/badge-asset.png",
            ImageFit::Contain,
        );
        let doc = canvas.finish();
        let pages = rasterize(&doc, 72, None).unwrap();
        let rgb = pages[0].to_rgb();
        let non_white = rgb.chunks_exact(3).any(|px| px != [255, 255, 255]);
        assert!(non_white, "placeholder outline should be visible");
    }

    #[test]
    fn each_document_page_becomes_one_raster_page() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f32(5.0), Pt::from_f32(5.0));
        canvas.show_page();
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f32(5.0), Pt::from_f32(5.0));
        let doc = canvas.finish();
        let pages = rasterize(&doc, 72, None).unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn rgb_buffer_has_three_bytes_per_pixel() {
        let doc = RenderedDocument {
            page_size: Size::badge_square(),
            pages: vec![Page::default()],
        };
        let pages = rasterize(&doc, 72, None).unwrap();
        let page = &pages[0];
        assert_eq!(
            page.to_rgb().len() as u32,
            page.width_px() * page.height_px() * 3
        );
    }

    #[test]
    fn zero_dpi_falls_back_to_print_default() {
        let doc = RenderedDocument {
            page_size: Size::badge_square(),
            pages: vec![Page::default()],
        };
        let pages = rasterize(&doc, 0, None).unwrap();
        // 100mm at 300 DPI.
        assert_eq!(pages[0].width_px(), 1181);
    }

    #[test]
    fn unknown_font_skips_text_without_failing() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.set_font("NoSuchFace", Pt::from_f32(24.0));
        canvas.draw_string(Pt::from_f32(10.0), Pt::from_f32(40.0), "hello");
        let doc = canvas.finish();
        let pages = rasterize(&doc, 72, None).unwrap();
        let rgb = pages[0].to_rgb();
        assert!(rgb.chunks_exact(3).all(|px| px == [255, 255, 255]));
    }
}

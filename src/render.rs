use crate::binding::{self, AttendeeBinding};
use crate::canvas::{Canvas, ImageFit, RenderedDocument};
use crate::diagnostics::DiagnosticsLogger;
use crate::font::FontRegistry;
use crate::sizing::{self, FieldRole, FitPolicySet, TextMeasurer};
use crate::template::{
    BadgeTemplate, Element, ElementFrame, FitMode, ImageElement, ShapeElement, ShapeType, Side,
    TextAlign, TextElement, DESIGN_UNITS,
};
use crate::types::{Color, Pt, Size};

/// Walks a resolved template with one attendee's data and produces the fully
/// resolved paint program: tokens substituted, adaptive sizes computed,
/// elements emitted in ascending z-order. Total — a malformed element is
/// skipped, never fatal for the page.
pub struct Renderer<'a> {
    pub measurer: &'a dyn TextMeasurer,
    pub registry: Option<&'a FontRegistry>,
    pub policies: &'a FitPolicySet,
    pub page_size: Size,
    pub diagnostics: Option<&'a DiagnosticsLogger>,
}

impl<'a> Renderer<'a> {
    pub fn render(&self, template: &BadgeTemplate, attendee: &AttendeeBinding) -> RenderedDocument {
        let mut canvas = Canvas::new(self.page_size);

        self.render_side(&mut canvas, &template.sides.front, attendee);
        if !template.sides.back.is_blank() {
            canvas.show_page();
            self.render_side(&mut canvas, &template.sides.back, attendee);
        }
        canvas.finish()
    }

    fn scale(&self) -> (f32, f32) {
        (
            self.page_size.width.to_f32() / DESIGN_UNITS,
            self.page_size.height.to_f32() / DESIGN_UNITS,
        )
    }

    fn render_side(&self, canvas: &mut Canvas, side: &Side, attendee: &AttendeeBinding) {
        canvas.meta("badge.attendee", attendee.uuid.clone());

        if let Some(background) = &side.background {
            if let Some(color) = background.color.as_deref() {
                canvas.set_fill_color(Color::from_hex(color));
                canvas.draw_rect(
                    Pt::ZERO,
                    Pt::ZERO,
                    self.page_size.width,
                    self.page_size.height,
                );
            }
            if let Some(image) = background.image.as_deref() {
                canvas.draw_image(
                    Pt::ZERO,
                    Pt::ZERO,
                    self.page_size.width,
                    self.page_size.height,
                    image,
                    ImageFit::Cover,
                );
            }
        }

        // Paint order is explicit z-index; the stable sort keeps list order
        // for ties so identical templates always paint identically.
        let mut ordered: Vec<&Element> = side.elements.iter().collect();
        ordered.sort_by_key(|element| element.z_index());

        for element in ordered {
            match element {
                Element::Text(text) => self.paint_text(canvas, text, attendee),
                Element::Shape(shape) => self.paint_shape(canvas, shape),
                Element::Image(image) => self.paint_image(canvas, image),
                Element::Unknown => {}
            }
        }
    }

    fn frame_box(&self, frame: &ElementFrame) -> Option<(Pt, Pt, Pt, Pt)> {
        if frame.width <= 0.0 || frame.height <= 0.0 {
            return None;
        }
        let (sx, sy) = self.scale();
        Some((
            Pt::from_f32(frame.x * sx),
            Pt::from_f32(frame.y * sy),
            Pt::from_f32(frame.width * sx),
            Pt::from_f32(frame.height * sy),
        ))
    }

    /// Runs `paint` inside a saved state, rotated about the box center when
    /// the element carries a rotation.
    fn with_frame(
        &self,
        canvas: &mut Canvas,
        frame: &ElementFrame,
        rect: (Pt, Pt, Pt, Pt),
        paint: impl FnOnce(&mut Canvas),
    ) {
        let (x, y, width, height) = rect;
        canvas.save_state();
        if frame.rotation != 0.0 {
            let cx = x + width.mul_ratio(1, 2);
            let cy = y + height.mul_ratio(1, 2);
            canvas.translate(cx, cy);
            canvas.rotate_degrees(frame.rotation);
            canvas.translate(Pt::ZERO - cx, Pt::ZERO - cy);
        }
        paint(canvas);
        canvas.restore_state();
    }

    fn paint_text(&self, canvas: &mut Canvas, element: &TextElement, attendee: &AttendeeBinding) {
        let Some(rect) = self.frame_box(&element.frame) else {
            return;
        };
        let (x, y, width, height) = rect;
        let text = binding::substitute(&element.content, attendee);
        if text.is_empty() {
            return;
        }

        let (sx, _) = self.scale();
        let base_size = Pt::from_f32(element.font_size.max(1.0) * sx);
        let font_name = element.effective_font_name();
        let size = match field_role(&element.content) {
            Some(role) => {
                let policy = self.policies.policy_for(role);
                let outcome =
                    sizing::fit(self.measurer, &font_name, &text, width, height, base_size, policy);
                if outcome.floor_reached {
                    if let Some(diagnostics) = self.diagnostics {
                        diagnostics.increment("sizing.floor_reached", 1);
                        diagnostics.event(
                            "sizing.floor_reached",
                            &[
                                ("element", element.frame.id.clone()),
                                ("attendee", attendee.uuid.clone()),
                                ("size_milli", outcome.size.to_milli_i64().to_string()),
                            ],
                        );
                    }
                }
                outcome.size
            }
            None => base_size,
        };

        let text_width = self.measurer.measure(&font_name, size, &text);
        let offset = match element.text_align {
            TextAlign::Left => Pt::ZERO,
            TextAlign::Center => (width - text_width).mul_ratio(1, 2),
            TextAlign::Right => width - text_width,
        };
        let baseline = y + self.centered_baseline(&font_name, size, height);

        self.with_frame(canvas, &element.frame, rect, |canvas| {
            canvas.set_fill_color(Color::from_hex(&element.color));
            canvas.set_font(&font_name, size);
            canvas.draw_string(x + offset, baseline, text);
        });
    }

    fn centered_baseline(&self, font_name: &str, size: Pt, box_height: Pt) -> Pt {
        match self.registry {
            Some(registry) => registry.centered_baseline(font_name, size, box_height),
            None => (box_height + size.mul_ratio(700, 1000)).mul_ratio(1, 2),
        }
    }

    fn paint_shape(&self, canvas: &mut Canvas, element: &ShapeElement) {
        let Some(rect) = self.frame_box(&element.frame) else {
            return;
        };
        let (x, y, width, height) = rect;
        let (sx, _) = self.scale();

        let fill = element.background_color.as_deref().map(Color::from_hex);
        let border = element.border_color.as_deref().map(Color::from_hex);
        let border_width = if border.is_some() && element.border_width > 0.0 {
            Some(Pt::from_f32(element.border_width * sx))
        } else {
            None
        };
        if fill.is_none() && border_width.is_none() {
            return;
        }

        self.with_frame(canvas, &element.frame, rect, |canvas| {
            if let Some(color) = fill {
                canvas.set_fill_color(color);
            }
            if let (Some(color), Some(stroke_width)) = (border, border_width) {
                canvas.set_stroke_color(color);
                canvas.set_line_width(stroke_width);
            }
            match element.shape_type {
                ShapeType::Rectangle | ShapeType::Other => {
                    canvas.move_to(x, y);
                    canvas.line_to(x + width, y);
                    canvas.line_to(x + width, y + height);
                    canvas.line_to(x, y + height);
                    canvas.close_path();
                }
                ShapeType::Ellipse => {
                    canvas.ellipse(x, y, width, height);
                }
            }
            match (fill.is_some(), border_width.is_some()) {
                (true, true) => canvas.fill_stroke(),
                (true, false) => canvas.fill(),
                (false, true) => canvas.stroke(),
                (false, false) => {}
            }
        });
    }

    fn paint_image(&self, canvas: &mut Canvas, element: &ImageElement) {
        let Some(rect) = self.frame_box(&element.frame) else {
            return;
        };
        let (x, y, width, height) = rect;
        if element.source.trim().is_empty() {
            // Nothing to fetch; leave the slot empty rather than fail.
            return;
        }
        let fit = match element.fit {
            FitMode::Contain => ImageFit::Contain,
            FitMode::Cover => ImageFit::Cover,
            FitMode::Fill => ImageFit::Stretch,
        };
        self.with_frame(canvas, &element.frame, rect, |canvas| {
            canvas.draw_image(x, y, width, height, element.source.clone(), fit);
        });
    }
}

/// Maps a text element onto its sizing role by the tokens it carries. The
/// name wins over company and job title when a template mixes them.
fn field_role(content: &str) -> Option<FieldRole> {
    if binding::mentions_token(content, "fullName") {
        Some(FieldRole::Name)
    } else if binding::mentions_token(content, "company") {
        Some(FieldRole::Company)
    } else if binding::mentions_token(content, "jobTitle") {
        Some(FieldRole::JobTitle)
    } else {
        None
    }
}

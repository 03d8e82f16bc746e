use crate::types::{Color, Pt, Size};

/// How an image's intrinsic aspect ratio maps onto its destination box.
/// Resolved at raster time, when the pixel dimensions are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFit {
    /// Letterbox inside the box.
    Contain,
    /// Fill the box, cropping overflow.
    Cover,
    /// Ignore aspect ratio.
    Stretch,
}

/// One resolved paint instruction. Coordinates are top-down page points; the
/// rasterizer owns the conversion to device pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    Translate(Pt, Pt),
    /// Degrees, clockwise in page space (matches template `rotation`).
    Rotate(f32),
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetOpacity(f32),
    SetFontName(String),
    SetFontSize(Pt),
    ClipRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    Stroke,
    FillStroke,
    /// Baseline-anchored text run.
    DrawString {
        x: Pt,
        y: Pt,
        text: String,
    },
    DrawRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
    DrawImage {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        source: String,
        fit: ImageFit,
    },
    /// Non-rendered marker used by tests and batch bookkeeping.
    Meta {
        key: String,
        value: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub commands: Vec<Command>,
}

/// The fully-resolved paint program for one attendee's badge: one page per
/// printed side. Ephemeral; discarded after export.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub page_size: Size,
    pub pages: Vec<Page>,
}

#[derive(Debug, Clone)]
struct DrawState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    font_name: String,
    font_size: Pt,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            font_name: "Helvetica".to_string(),
            font_size: Pt::from_f32(12.0),
        }
    }
}

/// Records paint instructions for one document, deduplicating redundant
/// state changes so identical renders emit identical command streams.
pub struct Canvas {
    page_size: Size,
    pages: Vec<Page>,
    current: Page,
    state: DrawState,
    state_stack: Vec<DrawState>,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            pages: Vec::new(),
            current: Page::default(),
            state: DrawState::default(),
            state_stack: Vec::new(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    fn push(&mut self, command: Command) {
        self.current.commands.push(command);
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.state.clone());
        self.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.state = state;
            self.push(Command::RestoreState);
        }
    }

    pub fn translate(&mut self, x: Pt, y: Pt) {
        self.push(Command::Translate(x, y));
    }

    pub fn rotate_degrees(&mut self, degrees: f32) {
        if degrees != 0.0 {
            self.push(Command::Rotate(degrees));
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.state.fill_color == color {
            return;
        }
        self.state.fill_color = color;
        self.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.state.stroke_color == color {
            return;
        }
        self.state.stroke_color = color;
        self.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = width.max(Pt::ZERO);
        if self.state.line_width == width {
            return;
        }
        self.state.line_width = width;
        self.push(Command::SetLineWidth(width));
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.push(Command::SetOpacity(opacity.clamp(0.0, 1.0)));
    }

    pub fn set_font(&mut self, name: &str, size: Pt) {
        if self.state.font_name != name {
            self.state.font_name = name.to_string();
            self.push(Command::SetFontName(name.to_string()));
        }
        if self.state.font_size != size {
            self.state.font_size = size;
            self.push(Command::SetFontSize(size));
        }
    }

    pub fn clip_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.push(Command::ClipRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.push(Command::LineTo { x, y });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.push(Command::Fill);
    }

    pub fn stroke(&mut self) {
        self.push(Command::Stroke);
    }

    pub fn fill_stroke(&mut self) {
        self.push(Command::FillStroke);
    }

    pub fn draw_string(&mut self, x: Pt, y: Pt, text: impl Into<String>) {
        self.push(Command::DrawString {
            x,
            y,
            text: text.into(),
        });
    }

    pub fn draw_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.push(Command::DrawRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn draw_image(
        &mut self,
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
        source: impl Into<String>,
        fit: ImageFit,
    ) {
        self.push(Command::DrawImage {
            x,
            y,
            width,
            height,
            source: source.into(),
            fit,
        });
    }

    pub fn meta(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.push(Command::Meta {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Appends an axis-aligned ellipse inscribed in the given box to the
    /// current path, as four cubic segments.
    pub fn ellipse(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        // Standard circle-to-bezier control factor.
        const KAPPA: f32 = 0.552_284_75;
        let rx = width.mul_ratio(1, 2);
        let ry = height.mul_ratio(1, 2);
        let cx = x + rx;
        let cy = y + ry;
        let ox = rx * KAPPA;
        let oy = ry * KAPPA;

        self.move_to(cx + rx, cy);
        self.curve_to(cx + rx, cy + oy, cx + ox, cy + ry, cx, cy + ry);
        self.curve_to(cx - ox, cy + ry, cx - rx, cy + oy, cx - rx, cy);
        self.curve_to(cx - rx, cy - oy, cx - ox, cy - ry, cx, cy - ry);
        self.curve_to(cx + ox, cy - ry, cx + rx, cy - oy, cx + rx, cy);
        self.close_path();
    }

    pub fn show_page(&mut self) {
        let finished = std::mem::take(&mut self.current);
        self.pages.push(finished);
        self.state = DrawState::default();
        self.state_stack.clear();
    }

    pub fn finish(mut self) -> RenderedDocument {
        if !self.current.commands.is_empty() || self.pages.is_empty() {
            self.show_page();
        }
        RenderedDocument {
            page_size: self.page_size,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redundant_state_changes_are_elided() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.set_fill_color(Color::BLACK); // default, elided
        canvas.set_fill_color(Color::WHITE);
        canvas.set_fill_color(Color::WHITE); // repeat, elided
        canvas.set_font("Inter", Pt::from_f32(14.0));
        canvas.set_font("Inter", Pt::from_f32(14.0)); // repeat, elided
        let doc = canvas.finish();
        assert_eq!(doc.pages.len(), 1);
        assert_eq!(doc.pages[0].commands.len(), 3);
    }

    #[test]
    fn restore_rolls_back_tracked_state() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.save_state();
        canvas.set_fill_color(Color::WHITE);
        canvas.restore_state();
        // Back at the default fill, so setting white again must re-emit.
        canvas.set_fill_color(Color::WHITE);
        let doc = canvas.finish();
        let white_sets = doc.pages[0]
            .commands
            .iter()
            .filter(|cmd| matches!(cmd, Command::SetFillColor(c) if *c == Color::WHITE))
            .count();
        assert_eq!(white_sets, 2);
    }

    #[test]
    fn show_page_starts_a_fresh_page() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.draw_rect(Pt::ZERO, Pt::ZERO, Pt::from_f32(10.0), Pt::from_f32(10.0));
        canvas.show_page();
        canvas.draw_string(Pt::ZERO, Pt::from_f32(20.0), "hi");
        let doc = canvas.finish();
        assert_eq!(doc.pages.len(), 2);
        assert_eq!(doc.pages[0].commands.len(), 1);
        assert_eq!(doc.pages[1].commands.len(), 1);
    }

    #[test]
    fn finish_always_yields_at_least_one_page() {
        let doc = Canvas::new(Size::badge_square()).finish();
        assert_eq!(doc.pages.len(), 1);
        assert!(doc.pages[0].commands.is_empty());
    }

    #[test]
    fn ellipse_emits_a_closed_four_segment_path() {
        let mut canvas = Canvas::new(Size::badge_square());
        canvas.ellipse(Pt::ZERO, Pt::ZERO, Pt::from_f32(40.0), Pt::from_f32(20.0));
        let doc = canvas.finish();
        let commands = &doc.pages[0].commands;
        assert!(matches!(commands[0], Command::MoveTo { .. }));
        let curves = commands
            .iter()
            .filter(|cmd| matches!(cmd, Command::CurveTo { .. }))
            .count();
        assert_eq!(curves, 4);
        assert!(matches!(commands.last(), Some(Command::ClosePath)));
    }
}

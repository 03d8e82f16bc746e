use crate::error::BadgePressError;
use serde::{Deserialize, Serialize};

/// Side of the design space a template is authored in. Element geometry is
/// expressed in these units and scaled uniformly onto the physical badge at
/// render time.
pub const DESIGN_UNITS: f32 = 400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateStatus {
    Draft,
    Official,
    Archived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BadgeTemplate {
    pub id: String,
    pub event_id: String,
    pub name: String,
    pub status: TemplateStatus,
    pub sides: Sides,
}

/// The persisted side payload is exactly `{front, back}`; this struct is the
/// public serialization contract and must stay backward-compatible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sides {
    pub front: Side,
    pub back: Side,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Side {
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub background: Option<Background>,
}

impl Side {
    pub fn is_blank(&self) -> bool {
        self.elements.is_empty() && self.background.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Background {
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

/// Geometry and paint-order fields shared by every element kind, in
/// template-space design units with a top-left origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementFrame {
    pub id: String,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub rotation: f32,
    #[serde(default)]
    pub z_index: i32,
}

/// One positioned primitive. New kinds must deserialize as `Unknown` so old
/// engines treat templates from newer editors as a no-op instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Element {
    Text(TextElement),
    Shape(ShapeElement),
    Image(ImageElement),
    #[serde(other)]
    Unknown,
}

impl Element {
    pub fn frame(&self) -> Option<&ElementFrame> {
        match self {
            Element::Text(el) => Some(&el.frame),
            Element::Shape(el) => Some(&el.frame),
            Element::Image(el) => Some(&el.frame),
            Element::Unknown => None,
        }
    }

    pub fn z_index(&self) -> i32 {
        self.frame().map(|frame| frame.z_index).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextAlign {
    Left,
    Center,
    Right,
}

impl Default for TextAlign {
    fn default() -> Self {
        TextAlign::Left
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(flatten)]
    pub frame: ElementFrame,
    pub content: String,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    /// Base (maximum) size in design units; adaptive sizing only shrinks.
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    #[serde(default = "default_font_weight")]
    pub font_weight: String,
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default)]
    pub text_align: TextAlign,
}

impl TextElement {
    /// Registry lookup name, folding the weight into the family the same way
    /// font full names are aliased ("Inter" + bold -> "Inter Bold").
    pub fn effective_font_name(&self) -> String {
        let weight = self.font_weight.trim().to_ascii_lowercase();
        let bold = weight == "bold" || weight.parse::<u32>().map(|w| w >= 600).unwrap_or(false);
        if bold {
            format!("{} Bold", self.font_family)
        } else {
            self.font_family.clone()
        }
    }
}

fn default_font_family() -> String {
    "Helvetica".to_string()
}

fn default_font_size() -> f32 {
    16.0
}

fn default_font_weight() -> String {
    "normal".to_string()
}

fn default_text_color() -> String {
    "#000000".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeType {
    Rectangle,
    Ellipse,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShapeElement {
    #[serde(flatten)]
    pub frame: ElementFrame,
    pub shape_type: ShapeType,
    #[serde(default)]
    pub background_color: Option<String>,
    #[serde(default)]
    pub border_color: Option<String>,
    #[serde(default)]
    pub border_width: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    Contain,
    Cover,
    Fill,
}

impl Default for FitMode {
    fn default() -> Self {
        FitMode::Contain
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    #[serde(flatten)]
    pub frame: ElementFrame,
    /// File path or data URI.
    pub source: String,
    #[serde(default)]
    pub fit: FitMode,
}

impl BadgeTemplate {
    pub fn decode(json: &str) -> Result<BadgeTemplate, BadgePressError> {
        let template: BadgeTemplate = serde_json::from_str(json)?;
        template.validate()?;
        Ok(template)
    }

    pub fn validate(&self) -> Result<(), BadgePressError> {
        for side in [&self.sides.front, &self.sides.back] {
            for element in &side.elements {
                if let Some(frame) = element.frame() {
                    if frame.width <= 0.0 || frame.height <= 0.0 {
                        return Err(BadgePressError::TemplateDecode(format!(
                            "element {} has non-positive geometry {}x{}",
                            frame.id, frame.width, frame.height
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn text_element(
    id: &str,
    (x, y, width, height): (f32, f32, f32, f32),
    content: &str,
    font_size: f32,
    bold: bool,
    color: &str,
) -> Element {
    Element::Text(TextElement {
        frame: ElementFrame {
            id: id.to_string(),
            x,
            y,
            width,
            height,
            rotation: 0.0,
            z_index: 2,
        },
        content: content.to_string(),
        font_family: default_font_family(),
        font_size,
        font_weight: if bold { "bold" } else { "normal" }.to_string(),
        color: color.to_string(),
        text_align: TextAlign::Center,
    })
}

/// Synthesizes the built-in fallback template: a fixed single-side 100mm
/// square layout. The geometry is a versioned constant; two calls always
/// produce identical structures so fallback output stays reproducible.
pub fn default_template(event_id: &str) -> BadgeTemplate {
    let front = Side {
        elements: vec![
            Element::Shape(ShapeElement {
                frame: ElementFrame {
                    id: "default-qr-slot".to_string(),
                    x: 160.0,
                    y: 36.0,
                    width: 80.0,
                    height: 80.0,
                    rotation: 0.0,
                    z_index: 1,
                },
                shape_type: ShapeType::Rectangle,
                background_color: None,
                border_color: Some("#9aa0a6".to_string()),
                border_width: 2.0,
            }),
            text_element(
                "default-uuid",
                (0.0, 122.0, 400.0, 18.0),
                "{uuid}",
                10.0,
                false,
                "#5f6368",
            ),
            text_element(
                "default-name",
                (40.0, 150.0, 320.0, 60.0),
                "{fullName}",
                36.0,
                true,
                "#000000",
            ),
            text_element(
                "default-company",
                (40.0, 214.0, 320.0, 36.0),
                "{company}",
                22.0,
                false,
                "#202124",
            ),
            text_element(
                "default-job-title",
                (40.0, 252.0, 320.0, 30.0),
                "{jobTitle}",
                18.0,
                false,
                "#5f6368",
            ),
            Element::Shape(ShapeElement {
                frame: ElementFrame {
                    id: "default-banner".to_string(),
                    x: 0.0,
                    y: 340.0,
                    width: 400.0,
                    height: 60.0,
                    rotation: 0.0,
                    z_index: 1,
                },
                shape_type: ShapeType::Rectangle,
                background_color: Some("#1f2a44".to_string()),
                border_color: None,
                border_width: 0.0,
            }),
            text_element(
                "default-guest-type",
                (0.0, 352.0, 400.0, 36.0),
                "{guestType}",
                20.0,
                true,
                "#ffffff",
            ),
        ],
        background: None,
    };

    BadgeTemplate {
        id: "builtin-default".to_string(),
        event_id: event_id.to_string(),
        name: "Built-in default badge".to_string(),
        status: TemplateStatus::Draft,
        sides: Sides {
            front,
            back: Side::default(),
        },
    }
}

use crate::error::BadgePressError;
use crate::types::Pt;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Mutex;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct WidthKey {
    font_index: usize,
    size_milli: i64,
    text: String,
}

#[derive(Debug)]
struct WidthCache {
    map: HashMap<WidthKey, Pt>,
    order: VecDeque<WidthKey>,
    max_entries: usize,
}

impl WidthCache {
    fn new(max_entries: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn get(&self, key: &WidthKey) -> Option<Pt> {
        self.map.get(key).copied()
    }

    fn insert(&mut self, key: WidthKey, value: Pt) {
        if self.map.contains_key(&key) {
            return;
        }
        self.map.insert(key.clone(), value);
        self.order.push_back(key);
        while self.map.len() > self.max_entries {
            if let Some(old) = self.order.pop_front() {
                self.map.remove(&old);
            } else {
                break;
            }
        }
    }
}

#[derive(Debug)]
pub struct RegisteredFont {
    pub name: String,
    pub data: Vec<u8>,
    /// Ascender and cap height scaled to a 1000-unit em.
    pub ascent: i16,
    pub cap_height: i16,
}

/// Holds the fonts available for measurement and rasterization, keyed by
/// every name the face advertises (family, full name, PostScript name).
///
/// Measurement for a family that is not registered degrades to a monospace
/// approximation (0.6em per char) instead of failing, which keeps the
/// shrink-to-fit loop total on machines with no fonts installed.
#[derive(Debug)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
    lookup: HashMap<String, usize>,
    width_cache: Mutex<WidthCache>,
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FontRegistry {
    pub fn new() -> Self {
        Self {
            fonts: Vec::new(),
            lookup: HashMap::new(),
            width_cache: Mutex::new(WidthCache::new(20_000)),
        }
    }

    pub fn register_dir(&mut self, path: impl AsRef<Path>) {
        let Ok(entries) = fs::read_dir(path.as_ref()) else {
            return;
        };
        let mut files: Vec<_> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        // Directory iteration order is platform-dependent; sort so alias
        // collisions resolve the same way everywhere.
        files.sort();
        for file in files {
            self.register_file(file);
        }
    }

    pub fn register_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        let Some(ext) = path.extension().and_then(|v| v.to_str()) else {
            return;
        };
        let ext = ext.to_ascii_lowercase();
        if ext != "ttf" && ext != "otf" {
            return;
        }
        let Ok(data) = fs::read(path) else {
            return;
        };
        let _ = self.register_bytes(data, path.file_stem().and_then(|v| v.to_str()));
    }

    pub fn register_bytes(
        &mut self,
        data: Vec<u8>,
        source_name: Option<&str>,
    ) -> Result<String, BadgePressError> {
        let source = source_name.unwrap_or("EmbeddedFont");
        let Ok(face) = ttf_parser::Face::parse(&data, 0) else {
            return Err(BadgePressError::InvalidConfiguration(format!(
                "invalid font data for {source}"
            )));
        };

        let (name, aliases) = face_names(&face, source);
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let ascent = scale_i16(face.ascender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);

        let index = self.fonts.len();
        self.fonts.push(RegisteredFont {
            name: name.clone(),
            data,
            ascent,
            cap_height,
        });
        for alias in std::iter::once(name.clone()).chain(aliases) {
            let key = normalize_name(&alias);
            if key.is_empty() || self.lookup.contains_key(&key) {
                continue;
            }
            self.lookup.insert(key, index);
        }
        Ok(name)
    }

    pub fn resolve(&self, name: &str) -> Option<&RegisteredFont> {
        self.lookup
            .get(&normalize_name(name))
            .and_then(|index| self.fonts.get(*index))
    }

    pub fn measure_text_width(&self, name: &str, font_size: Pt, text: &str) -> Pt {
        let Some(index) = self.lookup.get(&normalize_name(name)).copied() else {
            return approx_width(font_size, text);
        };
        let key = WidthKey {
            font_index: index,
            size_milli: font_size.to_milli_i64(),
            text: text.to_string(),
        };
        if let Ok(cache) = self.width_cache.lock() {
            if let Some(value) = cache.get(&key) {
                return value;
            }
        }
        let value = self
            .fonts
            .get(index)
            .and_then(|font| shaped_width(font, font_size, text))
            .unwrap_or_else(|| approx_width(font_size, text));
        if let Ok(mut cache) = self.width_cache.lock() {
            cache.insert(key, value);
        }
        value
    }

    /// Distance from a text box's top edge to the baseline that vertically
    /// centers capital letters inside `box_height`.
    pub fn centered_baseline(&self, name: &str, font_size: Pt, box_height: Pt) -> Pt {
        let cap_1000 = self
            .resolve(name)
            .map(|font| font.cap_height as i32)
            .unwrap_or(700);
        let cap = font_size.mul_ratio(cap_1000.clamp(1, 1000), 1000);
        (box_height + cap).mul_ratio(1, 2)
    }
}

/// Monospace approximation used when no face is available; 0.6em per char is
/// a slightly generous average for Latin text so fitted sizes err small.
pub(crate) fn approx_width(font_size: Pt, text: &str) -> Pt {
    let char_width = (font_size * 0.6f32).max(Pt::from_f32(1.0));
    char_width * (text.chars().count() as i32)
}

fn shaped_width(font: &RegisteredFont, font_size: Pt, text: &str) -> Option<Pt> {
    let face = HbFace::from_slice(&font.data, 0)?;
    let units_per_em = face.units_per_em().max(1) as i64;

    let mut buffer = UnicodeBuffer::new();
    buffer.set_direction(detect_direction(text));
    buffer.push_str(text);
    let output = rustybuzz::shape(&face, &[], buffer);
    let positions = output.glyph_positions();
    if positions.is_empty() {
        return Some(Pt::ZERO);
    }
    let mut total_units: i32 = 0;
    for pos in positions {
        let adv = (((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em) as i32;
        total_units = total_units.saturating_add(adv);
    }
    if total_units <= 0 {
        return Some(Pt::ZERO);
    }
    Some(font_size.mul_ratio(total_units, 1000))
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn face_names(face: &ttf_parser::Face<'_>, source: &str) -> (String, Vec<String>) {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut full = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY => {
                if family.is_none() {
                    family = Some(name);
                }
            }
            name_id::FULL_NAME => {
                if full.is_none() {
                    full = Some(name);
                }
            }
            name_id::POST_SCRIPT_NAME => {
                if post.is_none() {
                    post = Some(name);
                }
            }
            _ => {}
        }
    }

    let primary = full
        .clone()
        .or_else(|| family.clone())
        .or_else(|| post.clone())
        .unwrap_or_else(|| source.to_string());
    let mut aliases = Vec::new();
    for candidate in [family, full, post, Some(source.to_string())]
        .into_iter()
        .flatten()
    {
        if candidate != primary {
            aliases.push(candidate);
        }
    }
    (primary, aliases)
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_family_measures_with_monospace_approximation() {
        let registry = FontRegistry::new();
        let size = Pt::from_f32(10.0);
        let width = registry.measure_text_width("NoSuchFamily", size, "abcd");
        assert_eq!(width.to_milli_i64(), 24_000);
    }

    #[test]
    fn approximation_scales_linearly_with_length() {
        let size = Pt::from_f32(12.0);
        let short = approx_width(size, "ab");
        let long = approx_width(size, "abcd");
        assert_eq!(long.to_milli_i64(), short.to_milli_i64() * 2);
    }

    #[test]
    fn centered_baseline_splits_leftover_space() {
        let registry = FontRegistry::new();
        // Unregistered family assumes a 700/1000 cap height.
        let baseline =
            registry.centered_baseline("Nope", Pt::from_f32(10.0), Pt::from_f32(30.0));
        assert_eq!(baseline.to_milli_i64(), 18_500);
    }

    #[test]
    fn register_bytes_rejects_garbage() {
        let mut registry = FontRegistry::new();
        let err = registry
            .register_bytes(vec![0u8; 16], Some("bad.ttf"))
            .expect_err("garbage font data");
        assert!(matches!(
            err,
            BadgePressError::InvalidConfiguration(_)
        ));
    }

    #[test]
    fn name_normalization_strips_quotes_and_case() {
        assert_eq!(normalize_name(" \"Inter Bold\" "), "inter bold");
    }
}

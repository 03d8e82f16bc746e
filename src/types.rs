use fixed::types::I32F32;

/// Typographic point, stored as fixed-point so that repeated arithmetic is
/// bit-for-bit reproducible across runs and platforms.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn from_mm(value: f32) -> Pt {
        Pt::from_f32(value * 72.0 / 25.4)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        let denom = 1i128 << 32;
        let milli = milli as i128;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }

    pub fn mul_ratio(self, num: i32, denom: i32) -> Pt {
        if denom == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        let value = value.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt::from_milli_i64(value)
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_add(rhs.to_milli_i64()))
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i64(self.to_milli_i64().saturating_sub(rhs.to_milli_i64()))
    }
}

impl std::ops::Mul<i32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: i32) -> Pt {
        let milli = (self.to_milli_i64() as i128).saturating_mul(rhs as i128);
        let milli = milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt::from_milli_i64(milli)
    }
}

impl std::ops::Mul<f32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: f32) -> Pt {
        if !rhs.is_finite() {
            return Pt::ZERO;
        }
        Pt::from_f32(self.to_f32() * rhs)
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

/// Physical page size in points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self {
            width: Pt::from_mm(width_mm),
            height: Pt::from_mm(height_mm),
        }
    }

    /// The standard 100mm square badge stock.
    pub fn badge_square() -> Self {
        Self::from_mm(100.0, 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const WHITE: Color = Color {
        r: 1.0,
        g: 1.0,
        b: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Parses `#rgb` and `#rrggbb` hex notation, the only color syntax the
    /// template schema carries. Anything unparseable falls back to black so a
    /// sloppy template still renders.
    pub fn from_hex(raw: &str) -> Color {
        let hex = raw.trim().trim_start_matches('#');
        let expanded: String;
        let hex = match hex.len() {
            3 => {
                expanded = hex.chars().flat_map(|c| [c, c]).collect();
                expanded.as_str()
            }
            6 => hex,
            _ => return Color::BLACK,
        };
        let channel = |range: std::ops::Range<usize>| -> Option<f32> {
            u8::from_str_radix(hex.get(range)?, 16)
                .ok()
                .map(|v| v as f32 / 255.0)
        };
        match (channel(0..2), channel(2..4), channel(4..6)) {
            (Some(r), Some(g), Some(b)) => Color { r, g, b },
            _ => Color::BLACK,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt_mm_converts_to_points() {
        let pt = Pt::from_mm(100.0);
        assert!((pt.to_f32() - 283.465).abs() < 0.01);
    }

    #[test]
    fn pt_arithmetic_is_stable_at_milli_precision() {
        let a = Pt::from_f32(12.345);
        let b = Pt::from_f32(0.005);
        assert_eq!((a + b).to_milli_i64(), 12_350);
        assert_eq!((a - b).to_milli_i64(), 12_340);
        assert_eq!((a * 2).to_milli_i64(), 24_690);
    }

    #[test]
    fn mul_ratio_rounds_half_away_from_zero() {
        let v = Pt::from_f32(10.0);
        assert_eq!(v.mul_ratio(1, 3).to_milli_i64(), 3_333);
        assert_eq!(v.mul_ratio(500, 1000).to_milli_i64(), 5_000);
    }

    #[test]
    fn hex_colors_parse_and_fail_open() {
        let c = Color::from_hex("#336699");
        assert!((c.r - 0.2).abs() < 0.01);
        assert!((c.g - 0.4).abs() < 0.01);
        assert!((c.b - 0.6).abs() < 0.01);
        assert_eq!(Color::from_hex("#fff"), Color::WHITE);
        assert_eq!(Color::from_hex("garbage"), Color::BLACK);
        assert_eq!(Color::from_hex("#12"), Color::BLACK);
    }
}

use crate::font::{self, FontRegistry};
use crate::types::Pt;
use std::sync::Arc;

/// Text-measurement capability injected into the sizing calculator.
///
/// Implementations must be pure with respect to their inputs: the same
/// `(font_name, font_size, text)` tuple always measures the same width.
pub trait TextMeasurer: Send + Sync {
    fn measure(&self, font_name: &str, font_size: Pt, text: &str) -> Pt;
}

/// Measures through a [`FontRegistry`] (shaped widths with an approximation
/// fallback for unregistered families).
pub struct RegistryMeasurer {
    registry: Arc<FontRegistry>,
}

impl RegistryMeasurer {
    pub fn new(registry: Arc<FontRegistry>) -> Self {
        Self { registry }
    }
}

impl TextMeasurer for RegistryMeasurer {
    fn measure(&self, font_name: &str, font_size: Pt, text: &str) -> Pt {
        self.registry.measure_text_width(font_name, font_size, text)
    }
}

/// Monospace approximation for hosts with no typesetting facility at all.
pub struct ApproxMeasurer;

impl TextMeasurer for ApproxMeasurer {
    fn measure(&self, _font_name: &str, font_size: Pt, text: &str) -> Pt {
        font::approx_width(font_size, text)
    }
}

/// Which badge field a text element carries; the fields have different
/// acceptable minimum sizes, so each gets its own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    Name,
    Company,
    JobTitle,
}

/// Tuning for the shrink-to-fit loop. The floor and margin are business
/// configuration, not derived constants; defaults below were agreed with the
/// badge visual design owners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPolicy {
    /// The result never drops below `base * floor_ratio`.
    pub floor_ratio: f32,
    /// Fraction of the box width kept free as a safety margin.
    pub safety_margin: f32,
    /// Absolute lower bound, applied after the ratio floor.
    pub min_size: Pt,
    pub max_rounds: u32,
}

impl FitPolicy {
    /// The name is the most visually important field and gets the most
    /// generous floor.
    pub fn name() -> Self {
        Self {
            floor_ratio: 0.60,
            safety_margin: 0.05,
            min_size: Pt::from_f32(6.0),
            max_rounds: 8,
        }
    }

    pub fn company() -> Self {
        Self {
            floor_ratio: 0.50,
            ..Self::name()
        }
    }

    pub fn job_title() -> Self {
        Self {
            floor_ratio: 0.50,
            ..Self::name()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPolicySet {
    pub name: FitPolicy,
    pub company: FitPolicy,
    pub job_title: FitPolicy,
}

impl Default for FitPolicySet {
    fn default() -> Self {
        Self {
            name: FitPolicy::name(),
            company: FitPolicy::company(),
            job_title: FitPolicy::job_title(),
        }
    }
}

impl FitPolicySet {
    pub fn policy_for(&self, role: FieldRole) -> &FitPolicy {
        match role {
            FieldRole::Name => &self.name,
            FieldRole::Company => &self.company,
            FieldRole::JobTitle => &self.job_title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOutcome {
    pub size: Pt,
    /// True when the floor was hit while the text still overflowed; accepted
    /// with a known overflow risk rather than shrinking into illegibility.
    pub floor_reached: bool,
}

/// Computes the largest font size `<= base_size` at which `text` fits
/// `box_width` (less the safety margin), bounded below by the policy floor.
///
/// Proportional shrink: each round rescales by `usable / measured` and
/// re-measures, so a linear measurer converges in one step. Deterministic for
/// a deterministic measurer; there is no hidden state.
pub fn fit(
    measurer: &dyn TextMeasurer,
    font_name: &str,
    text: &str,
    box_width: Pt,
    box_height: Pt,
    base_size: Pt,
    policy: &FitPolicy,
) -> FitOutcome {
    let start = if box_height > Pt::ZERO {
        base_size.min(box_height)
    } else {
        base_size
    };
    if text.is_empty() || start <= Pt::ZERO || box_width <= Pt::ZERO {
        return FitOutcome {
            size: start.max(Pt::ZERO),
            floor_reached: false,
        };
    }

    let usable = box_width * (1.0 - policy.safety_margin.clamp(0.0, 0.9));
    let floor = (start * policy.floor_ratio.clamp(0.0, 1.0))
        .max(policy.min_size)
        .min(start);

    let mut size = start;
    for _ in 0..policy.max_rounds.max(1) {
        let measured = measurer.measure(font_name, size, text);
        if measured <= usable {
            return FitOutcome {
                size,
                floor_reached: false,
            };
        }
        if size <= floor {
            break;
        }
        let ratio = usable.to_f32() / measured.to_f32().max(0.001);
        let mut next = (size * ratio).max(floor);
        if next >= size {
            // Milli-point rounding can stall the loop arbitrarily close to a
            // fit; force a visible decrement.
            next = (size - Pt::from_f32(0.5)).max(floor);
        }
        size = next;
    }

    let still_over = measurer.measure(font_name, floor, text) > usable;
    FitOutcome {
        size: floor,
        floor_reached: still_over,
    }
}

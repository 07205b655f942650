//! Candidate regions and the three coordinate spaces they move through.
//!
//! ```text
//! oracle %-box ──▶ NormalizedBox ──▶ CorrectedBox ──▶ PixelBox
//!   (0–100)          (0–1, raw)      (0–1, clamped)   (px, expanded)
//! ```
//!
//! [`CorrectedBox`] can only be produced by
//! [`crate::pipeline::geometry::GeometryCorrector`], so any function that
//! takes one knows the page-bound invariants hold:
//! `x, y ≥ 0`, `x + width ≤ 1`, `y + height ≤ 1`, `width, height ≥ min_dimension`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of element a question or a candidate refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Figure,
    Table,
    #[default]
    Unspecified,
}

impl ElementKind {
    /// Human label used when building oracle queries ("Figure 3").
    pub fn label(&self) -> &'static str {
        match self {
            ElementKind::Figure => "Figure",
            ElementKind::Table => "Table",
            ElementKind::Unspecified => "Element",
        }
    }

    /// Classify a free-text element type reported by the oracle.
    pub fn from_type_name(name: &str) -> Self {
        let lower = name.to_lowercase();
        if lower.contains("table") || (lower.contains('表') && !lower.contains("图表")) {
            ElementKind::Table
        } else if lower.is_empty() {
            ElementKind::Unspecified
        } else {
            ElementKind::Figure
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A bounding box in normalized page coordinates, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl NormalizedBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// True when every field is finite and the box lies within the page.
    pub fn is_within_page(&self) -> bool {
        let eps = 1e-9;
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.x >= 0.0
            && self.y >= 0.0
            && self.width > 0.0
            && self.height > 0.0
            && self.right() <= 1.0 + eps
            && self.bottom() <= 1.0 + eps
    }

    /// Grow the box by `margin` on every side, clipped to the page.
    pub fn expanded(&self, margin: f64) -> Self {
        let left = (self.x - margin).max(0.0);
        let top = (self.y - margin).max(0.0);
        let right = (self.right() + margin).min(1.0);
        let bottom = (self.bottom() + margin).min(1.0);
        Self::new(left, top, right - left, bottom - top)
    }
}

/// A [`NormalizedBox`] that has been through geometry correction.
///
/// Deserialising re-checks that the box lies within the page, so a stored
/// result cannot smuggle in an off-page box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CorrectedBox(NormalizedBox);

impl<'de> Deserialize<'de> for CorrectedBox {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let inner = NormalizedBox::deserialize(deserializer)?;
        if inner.is_within_page() {
            Ok(Self(inner))
        } else {
            Err(serde::de::Error::custom(format!(
                "corrected box must lie within the page, got {:?}",
                inner
            )))
        }
    }
}

impl CorrectedBox {
    pub(crate) fn new_unchecked(inner: NormalizedBox) -> Self {
        Self(inner)
    }

    pub fn get(&self) -> &NormalizedBox {
        &self.0
    }

    pub fn into_inner(self) -> NormalizedBox {
        self.0
    }
}

impl std::ops::Deref for CorrectedBox {
    type Target = NormalizedBox;

    fn deref(&self) -> &NormalizedBox {
        &self.0
    }
}

/// A crop rectangle in pixel space: `[left, right) × [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl PixelBox {
    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

/// The oracle's self-assessment of how cleanly a region's edges were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryQuality {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl BoundaryQuality {
    /// Lenient parse of the oracle's label; unknown labels yield `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "excellent" => Some(BoundaryQuality::Excellent),
            "good" => Some(BoundaryQuality::Good),
            "fair" | "medium" | "average" => Some(BoundaryQuality::Fair),
            "poor" | "bad" => Some(BoundaryQuality::Poor),
            _ => None,
        }
    }
}

/// Secondary hints about whether a region captured the whole element.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletenessSignals {
    pub has_color: bool,
    pub has_title: bool,
    pub element_type: Option<String>,
}

/// One detected visual element on one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRegion {
    /// 1-indexed page number.
    pub page_number: usize,
    pub element_id: String,
    #[serde(rename = "type")]
    pub element_type: String,
    pub title: String,
    pub description: String,
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
    pub confidence: f64,
    pub matches_query: bool,
    pub boundary_quality: Option<BoundaryQuality>,
    pub completeness: Option<CompletenessSignals>,
}

impl CandidateRegion {
    /// Element kind, preferring the completeness signal over the free-text type.
    pub fn kind(&self) -> ElementKind {
        let declared = self
            .completeness
            .as_ref()
            .and_then(|c| c.element_type.as_deref())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(&self.element_type);
        match ElementKind::from_type_name(declared) {
            ElementKind::Unspecified => ElementKind::Figure,
            kind => kind,
        }
    }

    /// Short file-name-safe label used for artifact names.
    pub fn artifact_stem(&self) -> String {
        let base = if self.element_id.trim().is_empty() {
            self.kind().label().to_lowercase()
        } else {
            self.element_id.clone()
        };
        let cleaned: String = base
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c.to_ascii_lowercase() } else { '_' })
            .take(40)
            .collect();
        format!("p{}_{}", self.page_number, cleaned)
    }
}

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound of the normalized coordinate space used by the provider.
pub const NORMALIZED_SCALE: f64 = 1000.0;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionId(u64);

impl RegionId {
    pub fn next() -> Self {
        Self(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionKind {
    #[default]
    Speech,
    Thought,
    Narrative,
}

impl RegionKind {
    /// Unknown labels fall back to speech; the kind only drives styling.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "thought" => RegionKind::Thought,
            "narrative" | "narration" | "caption" => RegionKind::Narrative,
            _ => RegionKind::Speech,
        }
    }
}

/// Bounding box as `(y_min, x_min, y_max, x_max)` in `[0, 1000]`, relative to
/// the image that was sent with the request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub y_min: f64,
    pub x_min: f64,
    pub y_max: f64,
    pub x_max: f64,
}

impl NormalizedBox {
    pub fn new(y_min: f64, x_min: f64, y_max: f64, x_max: f64) -> Self {
        Self {
            y_min: clamp_coord(y_min),
            x_min: clamp_coord(x_min),
            y_max: clamp_coord(y_max),
            x_max: clamp_coord(x_max),
        }
    }

    pub fn from_array(values: [f64; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn top_fraction(&self) -> f64 {
        self.y_min / NORMALIZED_SCALE
    }
}

fn clamp_coord(value: f64) -> f64 {
    value.clamp(0.0, NORMALIZED_SCALE)
}

/// A region as described by the provider, before it is placed on the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawRegion {
    pub normalized_box: NormalizedBox,
    pub translated_text: String,
    pub original_text: Option<String>,
    pub kind: RegionKind,
    pub confidence: Option<f64>,
}

/// Page position captured when the scan was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Capture {
    pub scroll_offset: f64,
    pub viewport_height: f64,
}

impl Capture {
    pub fn new(scroll_offset: f64, viewport_height: f64) -> Self {
        Self {
            scroll_offset,
            viewport_height,
        }
    }

    pub fn absolute_y(&self, normalized_box: &NormalizedBox) -> f64 {
        self.scroll_offset + normalized_box.top_fraction() * self.viewport_height
    }
}

/// A translated speech bubble placed on the page. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextRegion {
    pub id: RegionId,
    pub normalized_box: NormalizedBox,
    pub translated_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
    pub kind: RegionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub absolute_y: f64,
}

impl TextRegion {
    pub fn place(raw: RawRegion, capture: &Capture) -> Self {
        let absolute_y = capture.absolute_y(&raw.normalized_box);
        Self {
            id: RegionId::next(),
            normalized_box: raw.normalized_box,
            translated_text: raw.translated_text,
            original_text: raw.original_text,
            kind: raw.kind,
            confidence: raw.confidence,
            absolute_y,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(y_min: f64) -> RawRegion {
        RawRegion {
            normalized_box: NormalizedBox::new(y_min, 100.0, y_min + 100.0, 900.0),
            translated_text: "Hello".to_string(),
            original_text: None,
            kind: RegionKind::Speech,
            confidence: None,
        }
    }

    #[test]
    fn place_computes_absolute_y_from_capture() {
        let capture = Capture::new(1200.0, 800.0);
        let region = TextRegion::place(raw(250.0), &capture);
        assert_eq!(region.absolute_y, 1200.0 + 0.25 * 800.0);
    }

    #[test]
    fn ids_are_unique() {
        let capture = Capture::new(0.0, 800.0);
        let a = TextRegion::place(raw(0.0), &capture);
        let b = TextRegion::place(raw(0.0), &capture);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn box_coordinates_are_clamped() {
        let bbox = NormalizedBox::new(-5.0, 10.0, 1200.0, 999.5);
        assert_eq!(bbox.y_min, 0.0);
        assert_eq!(bbox.y_max, 1000.0);
        assert_eq!(bbox.x_max, 999.5);
    }

    #[test]
    fn inverted_boxes_are_kept_and_placed_by_y_min() {
        let bbox = NormalizedBox::from_array([600.0, 900.0, 200.0, 100.0]);
        assert_eq!(bbox, NormalizedBox::new(600.0, 900.0, 200.0, 100.0));
        assert!(bbox.y_min > bbox.y_max);

        let raw = RawRegion {
            normalized_box: bbox,
            ..raw(0.0)
        };
        let region = TextRegion::place(raw, &Capture::new(0.0, 1000.0));
        assert_eq!(region.absolute_y, 600.0);
    }

    #[test]
    fn unknown_kind_falls_back_to_speech() {
        assert_eq!(RegionKind::from_label("Thought"), RegionKind::Thought);
        assert_eq!(RegionKind::from_label("sfx"), RegionKind::Speech);
    }
}

use serde_json::{Map, Value};
use thiserror::Error;

use crate::regions::{NormalizedBox, RawRegion, RegionKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("provider returned an empty response")]
    Empty,
    #[error("response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("response must be a JSON object")]
    NotAnObject,
    #[error("response has no \"bubbles\" field")]
    MissingBubbles,
    #[error("\"bubbles\" must be an array")]
    BubblesNotArray,
    #[error("bubble {index} is invalid: {reason}")]
    InvalidEntry { index: usize, reason: String },
}

/// Removes a surrounding Markdown code fence (with or without an info string).
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed;
    }
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after_open = &trimmed[open + 3..];
    // The info string runs to the end of the opening line.
    let body = match after_open.find('\n') {
        Some(newline) => &after_open[newline + 1..],
        None => after_open.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = match body.rfind("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim()
}

/// Parses provider output into raw regions. `{"bubbles": []}` is a valid,
/// empty result; anything that breaks the schema is an error.
pub fn parse_regions(text: &str) -> Result<Vec<RawRegion>, ParseError> {
    let body = strip_code_fences(text);
    if body.is_empty() {
        return Err(ParseError::Empty);
    }
    let value: Value = serde_json::from_str(body)?;
    let object = value.as_object().ok_or(ParseError::NotAnObject)?;
    let bubbles = object.get("bubbles").ok_or(ParseError::MissingBubbles)?;
    let entries = bubbles.as_array().ok_or(ParseError::BubblesNotArray)?;

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| {
            parse_entry(entry).map_err(|reason| ParseError::InvalidEntry { index, reason })
        })
        .collect()
}

fn parse_entry(entry: &Value) -> Result<RawRegion, String> {
    let object = entry
        .as_object()
        .ok_or_else(|| "entry is not an object".to_string())?;
    let normalized_box = parse_box(object)?;
    let translated_text = object
        .get("translated_text")
        .ok_or_else(|| "missing translated_text".to_string())?
        .as_str()
        .ok_or_else(|| "translated_text is not a string".to_string())?
        .to_string();

    let original_text = optional_str(object, "original_text");
    let kind = optional_str(object, "type")
        .map(|label| RegionKind::from_label(&label))
        .unwrap_or_default();
    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite());

    Ok(RawRegion {
        normalized_box,
        translated_text,
        original_text,
        kind,
        confidence,
    })
}

fn parse_box(object: &Map<String, Value>) -> Result<NormalizedBox, String> {
    let values = object
        .get("box_2d")
        .ok_or_else(|| "missing box_2d".to_string())?
        .as_array()
        .ok_or_else(|| "box_2d is not an array".to_string())?;
    if values.len() != 4 {
        return Err(format!(
            "box_2d must have 4 numbers (got {})",
            values.len()
        ));
    }
    let mut coords = [0.0f64; 4];
    for (slot, value) in coords.iter_mut().zip(values) {
        *slot = value
            .as_f64()
            .filter(|number| number.is_finite())
            .ok_or_else(|| format!("box_2d contains a non-number: {}", value))?;
    }
    Ok(NormalizedBox::from_array(coords))
}

fn optional_str(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}

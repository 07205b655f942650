//! Pull structured objects out of the oracle's free-text replies.
//!
//! Models wrap JSON in prose or ` ```json ` fences despite being told not to.
//! [`extract_json_object`] scans for the first brace-balanced substring that
//! parses as a JSON object, skipping braces inside string literals. When no
//! such object exists the reply is rejected outright: a page with an
//! unreadable reply yields no candidates rather than a guessed region.
//!
//! Field parsing is lenient. Numbers may arrive as strings or carry a `%`
//! suffix, confidences may be given on a 0–100 scale, and positions may be
//! fractions instead of percentages. Individual elements with an unusable
//! box are dropped without failing the whole page.

use crate::error::ResponseParseError;
use crate::output::ReviewVerdict;
use crate::region::{BoundaryQuality, CandidateRegion, CompletenessSignals, NormalizedBox};
use serde_json::{Map, Value};
use tracing::debug;

const ELEMENT_LIST_KEYS: &[&str] = &["elements", "figures", "regions", "candidates"];
const POSITION_KEYS: &[&str] = &["position", "bbox", "box", "bounding_box"];

/// The first well-formed JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find('{') {
        let open = start + offset;
        if let Some(close) = matching_brace(bytes, open) {
            if let Ok(Value::Object(map)) = serde_json::from_str(&text[open..=close]) {
                return Some(map);
            }
        }
        start = open + 1;
    }
    None
}

/// Index of the `}` closing the `{` at `open`, ignoring braces in strings.
fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a detection reply into candidate regions for `page_number`.
///
/// `Ok(vec![])` is a valid "nothing on this page" answer; an `Err` means the
/// reply carried no usable structure.
pub fn parse_detection(
    text: &str,
    page_number: usize,
) -> Result<Vec<CandidateRegion>, ResponseParseError> {
    let obj = extract_json_object(text).ok_or(ResponseParseError::NoJsonObject)?;
    let list = ELEMENT_LIST_KEYS
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or(ResponseParseError::MissingField("elements"))?;
    let items = list
        .as_array()
        .ok_or_else(|| ResponseParseError::InvalidJson("'elements' is not an array".into()))?;

    let mut candidates = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(el) = item.as_object() else {
            debug!("Page {}: element {} is not an object, skipped", page_number, i);
            continue;
        };
        match parse_element(el, i, page_number) {
            Some(c) => candidates.push(c),
            None => debug!("Page {}: element {} has no usable box, skipped", page_number, i),
        }
    }
    Ok(candidates)
}

fn parse_element(el: &Map<String, Value>, index: usize, page_number: usize) -> Option<CandidateRegion> {
    let pos = POSITION_KEYS
        .iter()
        .find_map(|k| el.get(*k))
        .and_then(Value::as_object)?;
    let bbox = parse_position(pos)?;

    let element_id = el
        .get("id")
        .and_then(scalar_string)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| format!("element-{}", index + 1));

    let completeness = el.get("completeness").and_then(Value::as_object).map(|c| {
        CompletenessSignals {
            has_color: c.get("has_color").and_then(lenient_bool).unwrap_or(false),
            has_title: c.get("has_title").and_then(lenient_bool).unwrap_or(false),
            element_type: c.get("element_type").and_then(scalar_string),
        }
    });

    Some(CandidateRegion {
        page_number,
        element_id,
        element_type: el.get("type").and_then(scalar_string).unwrap_or_default(),
        title: el.get("title").and_then(scalar_string).unwrap_or_default(),
        description: el.get("description").and_then(scalar_string).unwrap_or_default(),
        bbox,
        confidence: el.get("confidence").and_then(lenient_f64).map(unit_scale).unwrap_or(0.0),
        matches_query: el.get("matches_query").and_then(lenient_bool).unwrap_or(false),
        boundary_quality: el
            .get("boundary_quality")
            .and_then(Value::as_str)
            .and_then(BoundaryQuality::parse),
        completeness,
    })
}

/// Percent box (0–100) to normalized box. When all four values are within
/// `[0, 1]` the oracle answered in fractions and no scaling is applied.
fn parse_position(pos: &Map<String, Value>) -> Option<NormalizedBox> {
    fn field(pos: &Map<String, Value>, names: &[&str]) -> Option<f64> {
        names.iter().find_map(|n| pos.get(*n)).and_then(lenient_f64)
    }
    let x = field(pos, &["x", "left"])?;
    let y = field(pos, &["y", "top"])?;
    let w = field(pos, &["width", "w"])?;
    let h = field(pos, &["height", "h"])?;

    let values = [x, y, w, h];
    if !values.iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
        return None;
    }
    let scale = if values.iter().all(|v| (0.0..=1.0).contains(v)) {
        1.0
    } else {
        100.0
    };
    Some(NormalizedBox::new(x / scale, y / scale, w / scale, h / scale))
}

/// Parse a review reply for a batch of `count` crops.
///
/// The index is returned as given; range checking against the batch is the
/// caller's job so it can fall back and record why.
pub fn parse_review(text: &str, count: usize) -> Result<ReviewVerdict, ResponseParseError> {
    let obj = extract_json_object(text).ok_or(ResponseParseError::NoJsonObject)?;

    let best = ["best_index", "best", "best_candidate"]
        .iter()
        .find_map(|k| obj.get(*k))
        .ok_or(ResponseParseError::MissingField("best_index"))?;
    let best_index = lenient_f64(best)
        .filter(|v| *v >= 0.0 && v.fract() == 0.0)
        .map(|v| v as usize)
        .ok_or_else(|| {
            ResponseParseError::InvalidJson(format!("best_index is not a non-negative integer: {best}"))
        })?;

    let per_candidate_scores = obj
        .get("scores")
        .or_else(|| obj.get("per_candidate_scores"))
        .and_then(Value::as_array)
        .map(|a| a.iter().take(count).map(review_score).collect())
        .unwrap_or_default();

    let rationale = ["rationale", "reason", "reasoning"]
        .iter()
        .find_map(|k| obj.get(*k))
        .and_then(scalar_string)
        .unwrap_or_default();

    Ok(ReviewVerdict {
        reviewed_count: count,
        per_candidate_scores,
        best_index,
        confidence: obj.get("confidence").and_then(lenient_f64).map(unit_scale).unwrap_or(0.0),
        rationale,
    })
}

/// One per-crop review score on the `[0, 10]` scale. Unreadable entries stay
/// in place as `None` so indices keep lining up with the batch.
fn review_score(v: &Value) -> Option<f64> {
    lenient_f64(v)
        .filter(|s| s.is_finite())
        .map(|s| s.clamp(0.0, 10.0))
}

/// Map a 0–100 value to 0–1 and clamp.
fn unit_scale(v: f64) -> f64 {
    let v = if v > 1.0 { v / 100.0 } else { v };
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn lenient_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

fn lenient_bool(v: &Value) -> Option<bool> {
    match v {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" => Some(true),
            "false" | "no" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        _ => None,
    }
}

fn scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DETECTION: &str = r#"Sure! Here is the analysis:
```json
{"elements": [
  {"id": "figure-2", "type": "figure", "title": "Figure 2: Results {main}",
   "description": "bar chart", "position": {"x": 10, "y": 20, "width": 60, "height": 30},
   "confidence": 0.92, "matches_query": true, "boundary_quality": "good",
   "completeness": {"has_color": true, "has_title": true, "element_type": "figure"}}
]}
```
Let me know if you need more."#;

    #[test]
    fn extracts_fenced_object() {
        let obj = extract_json_object(DETECTION).unwrap();
        assert!(obj.contains_key("elements"));
    }

    #[test]
    fn skips_brace_noise_before_object() {
        let obj = extract_json_object(r#"use {curly} braces: {"a": "}"}"#).unwrap();
        assert_eq!(obj["a"], "}");
    }

    #[test]
    fn no_object_is_an_error() {
        assert_eq!(parse_detection("I could not see any figure.", 1), Err(ResponseParseError::NoJsonObject));
        assert_eq!(parse_detection("{\"elements\": [", 1), Err(ResponseParseError::NoJsonObject));
        assert_eq!(parse_detection("{\"foo\": 1}", 1), Err(ResponseParseError::MissingField("elements")));
    }

    #[test]
    fn parses_percent_positions() {
        let c = parse_detection(DETECTION, 6).unwrap();
        assert_eq!(c.len(), 1);
        let r = &c[0];
        assert_eq!(r.page_number, 6);
        assert_eq!(r.element_id, "figure-2");
        assert!((r.bbox.x - 0.10).abs() < 1e-9);
        assert!((r.bbox.height - 0.30).abs() < 1e-9);
        assert!(r.matches_query);
        assert_eq!(r.boundary_quality, Some(BoundaryQuality::Good));
        assert!(r.completeness.as_ref().unwrap().has_color);
    }

    #[test]
    fn accepts_fractions_and_lenient_values() {
        let text = r#"{"figures": [{"position": {"x": "0.1", "y": 0.2, "width": 0.5, "height": "0.3"},
            "confidence": 85, "matches_query": "yes"}]}"#;
        let c = parse_detection(text, 1).unwrap();
        assert!((c[0].bbox.width - 0.5).abs() < 1e-9);
        assert!((c[0].confidence - 0.85).abs() < 1e-9);
        assert!(c[0].matches_query);
        assert_eq!(c[0].element_id, "element-1");
        assert_eq!(c[0].boundary_quality, None);
    }

    #[test]
    fn drops_unusable_boxes() {
        let text = r#"{"elements": [
            {"position": {"x": 10, "y": 10, "width": 0, "height": 20}},
            {"position": {"x": 10, "y": 10}},
            {"title": "no position"},
            {"position": {"x": 5, "y": 5, "width": 50, "height": 40}, "confidence": 0.7}
        ]}"#;
        let c = parse_detection(text, 2).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c[0].element_id, "element-4");
    }

    #[test]
    fn empty_element_list_is_valid() {
        assert!(parse_detection(r#"{"elements": []}"#, 1).unwrap().is_empty());
    }

    #[test]
    fn parses_review() {
        let v = parse_review(
            r#"Ranking: {"scores": [8, 5.5], "best_index": 0, "confidence": 0.85, "rationale": "complete caption"}"#,
            2,
        )
        .unwrap();
        assert_eq!(v.best_index, 0);
        assert_eq!(v.reviewed_count, 2);
        assert_eq!(v.per_candidate_scores, vec![Some(8.0), Some(5.5)]);
        assert_eq!(v.rationale, "complete caption");
    }

    #[test]
    fn review_scores_keep_batch_positions() {
        let v = parse_review(r#"{"scores": [8, "n/a", 6], "best_index": 1}"#, 3).unwrap();
        assert_eq!(v.per_candidate_scores, vec![Some(8.0), None, Some(6.0)]);
        assert_eq!(v.per_candidate_scores[v.best_index], None);

        let v = parse_review(r#"{"scores": [85, -2, 7.5, 9], "best_index": 0}"#, 3).unwrap();
        assert_eq!(v.per_candidate_scores, vec![Some(10.0), Some(0.0), Some(7.5)]);
    }

    #[test]
    fn review_requires_index() {
        assert_eq!(
            parse_review(r#"{"scores": [1, 2]}"#, 2),
            Err(ResponseParseError::MissingField("best_index"))
        );
        assert!(matches!(
            parse_review(r#"{"best_index": -1}"#, 2),
            Err(ResponseParseError::InvalidJson(_))
        ));
    }
}

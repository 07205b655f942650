//! Prompts for the detection and review oracle calls.
//!
//! Centralising every prompt here keeps wording changes out of the
//! retry-free call logic in [`crate::pipeline::llm`] and lets unit tests
//! inspect the JSON contract the parsers in [`crate::pipeline::response`]
//! rely on.

/// System prompt for per-page region detection.
pub const DETECTION_SYSTEM_PROMPT: &str = r#"You are an expert document layout analyst. You locate figures, charts, diagrams and tables on a rendered document page.

Rules:
1. BOUNDARIES
   - Include the complete visual: every axis, legend, label and data mark
   - Include the caption ("Figure N: ..." / "Table N: ...") when it is adjacent
   - Do NOT include running body text above or below the element
2. POSITION
   - Report each element's bounding box in PERCENT of the page (0-100)
   - x, y is the top-left corner; origin is the top-left of the page
3. SELF-ASSESSMENT
   - confidence: 0.0-1.0, how sure you are the box is right
   - boundary_quality: one of "excellent", "good", "fair", "poor"
   - completeness: has_color, has_title, element_type ("figure" or "table")
4. OUTPUT
   - Respond with ONE JSON object and nothing else:
{"elements": [{"id": "figure-1", "type": "figure", "title": "Figure 1: ...", "description": "...",
  "position": {"x": 10.0, "y": 20.0, "width": 60.0, "height": 30.0},
  "confidence": 0.9, "matches_query": true, "boundary_quality": "good",
  "completeness": {"has_color": true, "has_title": true, "element_type": "figure"}}]}
   - If the page has no visual elements respond with {"elements": []}"#;

/// Build the user message for a detection call.
pub fn detection_user_prompt(query: Option<&str>) -> String {
    match query {
        Some(q) => format!(
            "Find the visual elements on this page that match: \"{}\".\n\
             List every figure and table, and set matches_query=true only for \
             elements that are what the user is asking for.",
            q
        ),
        None => "List every figure, chart, diagram and table on this page. \
                 Set matches_query=true for each of them."
            .to_string(),
    }
}

/// System prompt for the second-opinion review call.
pub const REVIEW_SYSTEM_PROMPT: &str = r#"You review cropped images of figures and tables extracted from a document. Each image is a candidate answer to the user's request.

Score every candidate from 0 to 10 on:
  - crop quality: nothing cut off, little unrelated text
  - relevance: it is the element the user asked for
  - format: a standard academic figure (coloured visual with its adjacent caption) scores highest

Respond with ONE JSON object and nothing else:
{"scores": [8, 5], "best_index": 0, "confidence": 0.85, "rationale": "..."}
best_index is 0-based and refers to the order of the images."#;

/// Build the user message for a review call over `count` crops.
pub fn review_user_prompt(query: &str, count: usize) -> String {
    format!(
        "The user asked: \"{}\".\n{} candidate crops follow, in order (index 0 to {}). \
         Which one best answers the request?",
        query,
        count,
        count.saturating_sub(1)
    )
}

//! Intent extraction: does a question refer to a figure or table?
//!
//! Numbered references are tried in a fixed priority order: figure patterns
//! first, then table patterns, and the first match wins. Without a number,
//! a viewing verb next to an element noun ("show me the chart") still
//! counts as a described reference. A bare element noun in narrative text
//! ("as the figure suggests") sets `has_reference` but carries no
//! description, so downstream stages treat it as a generic query.

use crate::output::ReferenceIntent;
use crate::region::ElementKind;
use once_cell::sync::Lazy;
use regex::Regex;

static FIGURE_NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\bfig(?:ure)?s?\.?\s*(\d+)",
        r"(?:图片|图表|图)\s*(\d+)",
        r"第\s*(\d+)\s*个?\s*图",
        r"\b(?:chart|diagram|graph|plot)\s*#?\s*(\d+)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

static TABLE_NUMBER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\btables?\s*(\d+)",
        r"(?:表格|表)\s*(\d+)",
        r"第\s*(\d+)\s*个?\s*表",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

// IEEE-style "Table IV".
static TABLE_ROMAN_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\btable\s+([ivx]{1,6})\b").ok());

static ELEMENT_NOUN_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"\b(?:figs?|figures?|charts?|diagrams?|graphs?|plots?|tables?|images?|pictures?|illustrations?|flowcharts?|visuali[sz]ations?)\b",
    )
    .ok()
});

static VIEWING_VERB_PATTERN: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\b(?:show|display|view|extract|see|find|locate|crop|pull up|give me)\b").ok()
});

const ELEMENT_NOUNS_ZH: &[&str] = &[
    "图片", "图像", "图表", "示意图", "流程图", "结构图", "框图", "插图", "配图", "表格", "数据表",
    "统计表", "对比表", "图", "表",
];

const VIEWING_VERBS_ZH: &[&str] = &["显示", "展示", "查看", "看看", "看一下", "提取", "截取", "找", "给我"];

/// Parse a question into a [`ReferenceIntent`]. Pure and deterministic.
pub fn extract(question: &str) -> ReferenceIntent {
    let trimmed = question.trim();
    let lower = trimmed.to_lowercase();

    if let Some(n) = first_number(&FIGURE_NUMBER_PATTERNS, &lower) {
        return numbered(ElementKind::Figure, n, trimmed);
    }
    if let Some(n) = first_number(&TABLE_NUMBER_PATTERNS, &lower).or_else(|| roman_table(&lower)) {
        return numbered(ElementKind::Table, n, trimmed);
    }

    if !mentions_element(&lower) {
        return ReferenceIntent::default();
    }

    let free_text = has_viewing_verb(&lower).then(|| trimmed.to_string());
    ReferenceIntent {
        has_reference: true,
        number: None,
        kind: ElementKind::Unspecified,
        free_text,
    }
}

fn numbered(kind: ElementKind, number: u32, question: &str) -> ReferenceIntent {
    ReferenceIntent {
        has_reference: true,
        number: Some(number),
        kind,
        free_text: Some(question.to_string()),
    }
}

fn first_number(patterns: &[Regex], text: &str) -> Option<u32> {
    patterns.iter().find_map(|re| {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

fn roman_table(text: &str) -> Option<u32> {
    let re = TABLE_ROMAN_PATTERN.as_ref()?;
    let caps = re.captures(text)?;
    parse_roman(caps.get(1)?.as_str())
}

/// Parse a small lowercase roman numeral (i–xxxix).
fn parse_roman(s: &str) -> Option<u32> {
    let value = |c: char| match c {
        'i' => Some(1),
        'v' => Some(5),
        'x' => Some(10),
        _ => None,
    };
    let digits: Vec<u32> = s.chars().map(value).collect::<Option<_>>()?;
    let mut total = 0;
    for (i, d) in digits.iter().enumerate() {
        match digits.get(i + 1) {
            Some(next) if next > d => total -= *d as i32,
            _ => total += *d as i32,
        }
    }
    (total > 0).then_some(total as u32)
}

fn mentions_element(lower: &str) -> bool {
    ELEMENT_NOUN_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(lower))
        || ELEMENT_NOUNS_ZH.iter().any(|n| lower.contains(n))
}

fn has_viewing_verb(lower: &str) -> bool {
    VIEWING_VERB_PATTERN
        .as_ref()
        .is_some_and(|re| re.is_match(lower))
        || VIEWING_VERBS_ZH.iter().any(|v| lower.contains(v))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_figure() {
        let intent = extract("What does Figure 2 show?");
        assert!(intent.has_reference);
        assert_eq!(intent.number, Some(2));
        assert_eq!(intent.kind, ElementKind::Figure);
        assert_eq!(intent.free_text.as_deref(), Some("What does Figure 2 show?"));
    }

    #[test]
    fn abbreviated_figure() {
        let intent = extract("explain fig.3b please");
        assert_eq!(intent.number, Some(3));
        assert_eq!(intent.kind, ElementKind::Figure);
    }

    #[test]
    fn numbered_table() {
        let intent = extract("Show me Table 3");
        assert_eq!(intent.number, Some(3));
        assert_eq!(intent.kind, ElementKind::Table);
    }

    #[test]
    fn figure_patterns_take_priority_over_tables() {
        let intent = extract("Compare table 1 with figure 4");
        assert_eq!(intent.number, Some(4));
        assert_eq!(intent.kind, ElementKind::Figure);
    }

    #[test]
    fn roman_table_number() {
        let intent = extract("What is reported in Table IV?");
        assert_eq!(intent.number, Some(4));
        assert_eq!(intent.kind, ElementKind::Table);
        assert_eq!(parse_roman("ix"), Some(9));
        assert_eq!(parse_roman("xiv"), Some(14));
    }

    #[test]
    fn localized_references() {
        let fig = extract("请显示图3");
        assert_eq!((fig.number, fig.kind), (Some(3), ElementKind::Figure));

        let table = extract("表2的数据是什么");
        assert_eq!((table.number, table.kind), (Some(2), ElementKind::Table));

        let ordinal = extract("第3个表讲了什么");
        assert_eq!((ordinal.number, ordinal.kind), (Some(3), ElementKind::Table));

        let chart = extract("图表 1 的趋势");
        assert_eq!((chart.number, chart.kind), (Some(1), ElementKind::Figure));
    }

    #[test]
    fn viewing_verb_without_number() {
        let intent = extract("show me the chart");
        assert!(intent.has_reference);
        assert_eq!(intent.number, None);
        assert_eq!(intent.kind, ElementKind::Unspecified);
        assert_eq!(intent.free_text.as_deref(), Some("show me the chart"));
        assert!(intent.is_specific());
    }

    #[test]
    fn bare_mention_is_low_specificity() {
        let intent = extract("As the figure suggests, results improve over time.");
        assert!(intent.has_reference);
        assert_eq!(intent.number, None);
        assert_eq!(intent.free_text, None);
        assert!(!intent.is_specific());
    }

    #[test]
    fn no_reference() {
        assert_eq!(extract("What is the main conclusion?"), ReferenceIntent::default());
        assert!(!extract("How do I configure the server?").has_reference);
        assert!(!extract("").has_reference);
    }
}

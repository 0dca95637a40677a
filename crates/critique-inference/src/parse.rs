//! Model output parsing.
//!
//! Vision models wrap their JSON in prose, markdown fences, or `<think>`
//! blocks. Parsing strips those, decodes the first JSON object, and maps it
//! onto the rubric. Keys are matched loosely (`"Focus & Sharpness"` →
//! `focus`) and scores may arrive as numbers or numeric strings.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use critique_core::{
    Dimension, DimensionCritique, DimensionScores, Error, ProfileMetadata, Result,
    UpsertProfileRequest, SCORE_MAX, SCORE_MIN,
};

static THINK_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?(?:</think>|\z)").expect("think block regex"));

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced json regex")
});

const THINK_CLOSE: &str = "</think>";

/// Remove reasoning blocks, including an unclosed trailing one.
///
/// A bare `</think>` (opening tag consumed by the chat template) drops
/// everything before it.
pub fn strip_thinking(text: &str) -> String {
    let text = if !text.contains("<think>") {
        text.rfind(THINK_CLOSE)
            .map(|i| &text[i + THINK_CLOSE.len()..])
            .unwrap_or(text)
    } else {
        text
    };
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// The first JSON object in `text`: a fenced block if present, otherwise the
/// first balanced `{...}` span.
pub fn extract_json_object(text: &str) -> Option<&str> {
    if let Some(m) = FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        return Some(m.as_str());
    }

    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strip, extract, and decode the JSON object in a model response.
fn decode_object(raw: &str) -> std::result::Result<Map<String, Value>, String> {
    let cleaned = strip_thinking(raw);
    if cleaned.is_empty() {
        return Err("model returned no content".to_string());
    }
    let json = extract_json_object(&cleaned)
        .ok_or_else(|| "no JSON object in model output".to_string())?;
    match serde_json::from_str::<Value>(json) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("model output is not a JSON object".to_string()),
        Err(e) => Err(format!("invalid JSON in model output: {}", e)),
    }
}

/// A score as number, numeric string, or `"7/10"`; `null` means unassessed.
fn score_value(v: &Value) -> std::result::Result<Option<f64>, String> {
    match v {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("score {} is not representable", n)),
        Value::String(s) => {
            let head = s.split('/').next().unwrap_or("").trim();
            if head.is_empty() || head.eq_ignore_ascii_case("n/a") {
                return Ok(None);
            }
            head.parse::<f64>()
                .map(Some)
                .map_err(|_| format!("score '{}' is not a number", s))
        }
        other => Err(format!("score {} has the wrong type", other)),
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Per-dimension entries from `"dimensions"`, either an object keyed by
/// dimension or an array of objects carrying a `"dimension"` field.
fn dimension_entries(root: &Map<String, Value>) -> Vec<(Dimension, &Map<String, Value>)> {
    let mut entries = Vec::new();
    match root.get("dimensions") {
        Some(Value::Object(map)) => {
            for (key, entry) in map {
                if let (Some(dim), Some(obj)) = (Dimension::from_key(key), entry.as_object()) {
                    entries.push((dim, obj));
                }
            }
        }
        Some(Value::Array(items)) => {
            for obj in items.iter().filter_map(Value::as_object) {
                let dim = obj
                    .get("dimension")
                    .or_else(|| obj.get("name"))
                    .and_then(Value::as_str)
                    .and_then(Dimension::from_key);
                if let Some(dim) = dim {
                    entries.push((dim, obj));
                }
            }
        }
        _ => {}
    }
    entries
}

fn technique_tags(root: &Map<String, Value>) -> Vec<String> {
    match root.get("technique_tags").or_else(|| root.get("techniques")) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s.split(',').map(str::to_string).collect(),
        _ => Vec::new(),
    }
}

/// Parse pass-1 output into a profile for `(advisor_id, image_path)`.
///
/// Fails with [`Error::Extraction`] when nothing usable comes back: no JSON,
/// no scored dimension, or a score outside the rubric's range.
pub fn parse_extraction(
    raw: &str,
    advisor_id: &str,
    image_path: &str,
) -> Result<UpsertProfileRequest> {
    let root = decode_object(raw).map_err(Error::Extraction)?;

    let mut scores = DimensionScores::default();
    let mut comments = BTreeMap::new();

    if let Some(map) = root.get("scores").and_then(Value::as_object) {
        for (key, v) in map {
            if let Some(dim) = Dimension::from_key(key) {
                scores.set(dim, score_value(v).map_err(Error::Extraction)?);
            }
        }
    }
    if let Some(map) = root.get("comments").and_then(Value::as_object) {
        for (key, v) in map {
            if let (Some(dim), Some(text)) = (Dimension::from_key(key), non_empty_str(Some(v))) {
                comments.insert(dim, text);
            }
        }
    }
    for (dim, entry) in dimension_entries(&root) {
        if scores.get(dim).is_none() {
            if let Some(v) = entry.get("score") {
                scores.set(dim, score_value(v).map_err(Error::Extraction)?);
            }
        }
        if let Some(text) = non_empty_str(entry.get("comment")) {
            comments.entry(dim).or_insert(text);
        }
    }

    if scores.is_empty() {
        return Err(Error::Extraction(
            "model output carries no dimension scores".to_string(),
        ));
    }
    scores
        .validate()
        .map_err(|e| Error::Extraction(e.to_string()))?;

    let metadata = ProfileMetadata {
        title: non_empty_str(root.get("title")),
        date: non_empty_str(root.get("date")),
        location: non_empty_str(root.get("location")),
        significance: non_empty_str(root.get("significance")),
        technique_tags: Default::default(),
    }
    .with_tags(technique_tags(&root));

    Ok(UpsertProfileRequest {
        advisor_id: advisor_id.to_string(),
        image_path: image_path.to_string(),
        scores,
        comments,
        metadata,
        overall_grade: non_empty_str(root.get("overall_grade")),
        working_set: false,
    })
}

/// Pass-2 output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCritique {
    pub summary: String,
    pub overall_grade: Option<String>,
    /// One entry per dimension mentioned, in rubric order.
    pub dimensions: Vec<DimensionCritique>,
}

/// Parse pass-2 output.
///
/// Out-of-range scores are dropped rather than failing the pass; the
/// critique text is what matters here. Fails with [`Error::Analysis`] when
/// there is neither a summary nor any dimension commentary.
pub fn parse_critique(raw: &str) -> Result<ParsedCritique> {
    let root = decode_object(raw).map_err(Error::Analysis)?;

    let summary = non_empty_str(root.get("summary"))
        .or_else(|| non_empty_str(root.get("critique")))
        .unwrap_or_default();

    let mut by_dim: BTreeMap<Dimension, DimensionCritique> = BTreeMap::new();
    for (dim, entry) in dimension_entries(&root) {
        if by_dim.contains_key(&dim) {
            continue;
        }
        let score = entry
            .get("score")
            .and_then(|v| score_value(v).ok().flatten())
            .filter(|s| s.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(s));
        by_dim.insert(
            dim,
            DimensionCritique {
                dimension: dim,
                score,
                comment: non_empty_str(entry.get("comment"))
                    .or_else(|| non_empty_str(entry.get("feedback")))
                    .unwrap_or_default(),
                user_technique: non_empty_str(entry.get("user_technique")),
                reference_technique: non_empty_str(entry.get("reference_technique")),
                execution_gap: non_empty_str(entry.get("execution_gap")),
                recommendation: non_empty_str(entry.get("recommendation")),
            },
        );
    }

    if summary.is_empty() && by_dim.is_empty() {
        return Err(Error::Analysis(
            "model output carries neither a summary nor dimension critiques".to_string(),
        ));
    }

    Ok(ParsedCritique {
        summary,
        overall_grade: non_empty_str(root.get("overall_grade")),
        dimensions: by_dim.into_values().collect(),
    })
}

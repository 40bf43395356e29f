//! Structured record extraction from free-form model output.
//!
//! The generation service is asked for bare JSON but routinely wraps it in a
//! markdown fence or surrounds it with prose. Extraction is layered:
//!
//! 1. the interior of a fenced block labeled `json`,
//! 2. the span from the first `{` to the last `}`,
//!
//! and the first candidate that parses to a JSON object wins. An object
//! carrying none of the record's top-level keys (a refusal such as
//! `{"error": "..."}`) is rejected. Otherwise the object is validated field
//! by field; missing or mistyped fields get sentinel values instead of
//! failing the whole response.

use std::sync::LazyLock;

use fitcheck_models::{
    EncouragementAndTips, FormAnalysis, RepCountStatus, StructuredAnalysis, MAX_PERFORMANCE_SCORE,
};
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{AnalysisError, AnalysisResult};

static JSON_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```[ \t]*json[ \t]*\r?\n?(.*?)```").expect("valid fence pattern")
});

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*([-+]?\d+(?:\.\d+)?)").expect("valid number pattern")
});

/// Top-level keys of the analysis record.
const RECORD_KEYS: [&str; 6] = [
    "exercise_name",
    "repetitions",
    "calories_burned",
    "form_analysis",
    "performance_score",
    "encouragement_and_tips",
];

/// Which layer produced the parsed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionSource {
    FencedBlock,
    BraceSpan,
}

/// Extraction result with validation details.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub analysis: StructuredAnalysis,
    pub source: ExtractionSource,
    /// Dotted paths of fields that were missing or mistyped
    pub defaulted_fields: Vec<String>,
}

/// Parses generation service output into a [`StructuredAnalysis`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseExtractor;

impl ResponseExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a validated record, or fail with `MalformedResponse`.
    pub fn extract(&self, text: &str) -> AnalysisResult<StructuredAnalysis> {
        self.extract_detailed(text).map(|e| e.analysis)
    }

    /// Like [`extract`](Self::extract), also reporting the source layer and
    /// the defaulted fields.
    pub fn extract_detailed(&self, text: &str) -> AnalysisResult<Extraction> {
        let (object, source) = locate_object(text)?;
        if !RECORD_KEYS.iter().any(|key| object.contains_key(*key)) {
            return Err(AnalysisError::malformed_response(
                "response object has none of the analysis fields",
                text,
            ));
        }

        let mut defaulted = Vec::new();
        let analysis = validate(&object, &mut defaulted);

        if !defaulted.is_empty() {
            warn!(
                fields = ?defaulted,
                "Model response missing or mistyped fields; sentinel defaults applied"
            );
        }
        debug!(source = ?source, exercise = %analysis.exercise_name, "Extracted analysis");

        Ok(Extraction {
            analysis,
            source,
            defaulted_fields: defaulted,
        })
    }
}

fn locate_object(text: &str) -> AnalysisResult<(Map<String, Value>, ExtractionSource)> {
    let mut candidates = Vec::with_capacity(2);

    if let Some(interior) = JSON_FENCE.captures(text).and_then(|c| c.get(1)) {
        candidates.push((interior.as_str().trim(), ExtractionSource::FencedBlock));
    }
    if let Some(span) = brace_span(text) {
        candidates.push((span, ExtractionSource::BraceSpan));
    }

    if candidates.is_empty() {
        return Err(AnalysisError::malformed_response("no JSON object found", text));
    }

    let mut last_error = String::new();
    for (candidate, source) in candidates {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(object)) => return Ok((object, source)),
            Ok(other) => last_error = format!("expected a JSON object, found {}", type_name(&other)),
            Err(e) => last_error = e.to_string(),
        }
        debug!(source = ?source, error = %last_error, "Extraction candidate rejected");
    }

    Err(AnalysisError::malformed_response(
        format!("response is not valid JSON: {}", last_error),
        text,
    ))
}

/// Substring from the first `{` to the last `}`, inclusive.
fn brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn validate(root: &Map<String, Value>, defaulted: &mut Vec<String>) -> StructuredAnalysis {
    let empty = Map::new();

    let form = section(root, "form_analysis", defaulted).unwrap_or(&empty);
    let tips = section(root, "encouragement_and_tips", defaulted).unwrap_or(&empty);

    let repetitions = number(root, "repetitions", "", defaulted)
        .map(|n| n.max(0.0).round().min(u32::MAX as f64) as u32)
        .unwrap_or(0);
    let calories_burned = number(root, "calories_burned", "", defaulted)
        .map(|n| n.max(0.0))
        .unwrap_or(0.0);
    let performance_score = number(root, "performance_score", "", defaulted)
        .map(|n| n.clamp(0.0, MAX_PERFORMANCE_SCORE))
        .unwrap_or(0.0);

    StructuredAnalysis {
        exercise_name: text(root, "exercise_name", "", defaulted),
        repetitions,
        calories_burned,
        form_analysis: FormAnalysis {
            posture: text(form, "posture", "form_analysis.", defaulted),
            range_of_motion: text(form, "range_of_motion", "form_analysis.", defaulted),
            tempo: text(form, "tempo", "form_analysis.", defaulted),
            common_mistakes: string_list(form, "common_mistakes", "form_analysis.", defaulted),
        },
        performance_score,
        encouragement_and_tips: EncouragementAndTips {
            positive_feedback: string_list(
                tips,
                "positive_feedback",
                "encouragement_and_tips.",
                defaulted,
            ),
            improvement_tips: string_list(
                tips,
                "improvement_tips",
                "encouragement_and_tips.",
                defaulted,
            ),
            context: text(tips, "context", "encouragement_and_tips.", defaulted),
        },
        rep_count_status: RepCountStatus::Estimated,
    }
}

fn section<'a>(
    root: &'a Map<String, Value>,
    key: &str,
    defaulted: &mut Vec<String>,
) -> Option<&'a Map<String, Value>> {
    let object = root.get(key).and_then(Value::as_object);
    if object.is_none() {
        defaulted.push(key.to_string());
    }
    object
}

fn text(obj: &Map<String, Value>, key: &str, prefix: &str, defaulted: &mut Vec<String>) -> String {
    match obj.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            defaulted.push(format!("{}{}", prefix, key));
            String::new()
        }
    }
}

fn number(
    obj: &Map<String, Value>,
    key: &str,
    prefix: &str,
    defaulted: &mut Vec<String>,
) -> Option<f64> {
    let parsed = match obj.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => LEADING_NUMBER
            .captures(s)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        _ => None,
    };
    if parsed.is_none() {
        defaulted.push(format!("{}{}", prefix, key));
    }
    parsed
}

fn string_list(
    obj: &Map<String, Value>,
    key: &str,
    prefix: &str,
    defaulted: &mut Vec<String>,
) -> Vec<String> {
    match obj.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => {
            defaulted.push(format!("{}{}", prefix, key));
            Vec::new()
        }
    }
}

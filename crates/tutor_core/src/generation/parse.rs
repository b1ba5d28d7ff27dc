//! crates/tutor_core/src/generation/parse.rs
//!
//! Pulls JSON out of noisy model output and validates question items.
//!
//! Array grammar: the answer is the first balanced `[ ... ]` (brackets inside
//! JSON strings ignored) that contains a `{` and parses as a JSON array. If no
//! such slice exists, the span from the first `[` to the last `]` is tried.
//! Parse failures never escape: they yield `None` or an empty list.

use serde_json::{Map, Value};
use tracing::debug;

use crate::domain::{GeneratedQuestion, QuestionType};

pub const DEFAULT_EXPLANATION: &str = "Explication à compléter";

/// Byte offset of the bracket closing the one at `open`, honoring strings.
fn matching_close(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
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
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (b == b']').then_some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn parse_array(slice: &str) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    }
}

/// Finds the question array in a model response.
pub fn extract_json_array(text: &str) -> Option<Vec<Value>> {
    for (open, _) in text.match_indices('[') {
        let Some(close) = matching_close(text, open) else {
            continue;
        };
        let candidate = &text[open..=close];
        if !candidate.contains('{') {
            continue;
        }
        if let Some(items) = parse_array(candidate) {
            return Some(items);
        }
    }

    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end <= start {
        return None;
    }
    let items = parse_array(&text[start..=end]);
    if items.is_none() {
        debug!("No JSON array found in model response of {} chars", text.len());
    }
    items
}

/// The span from the first `{` to the last `}`, parsed as an object.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

//=========================================================================================
// Item Validation
//=========================================================================================

/// Strings, numbers and booleans are accepted where a string is expected.
fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!s.is_empty()).then_some(s)
}

fn string_list(value: Option<&Value>) -> Option<Vec<String>> {
    match value? {
        Value::Array(items) => Some(items.iter().filter_map(scalar_string).collect()),
        _ => None,
    }
}

fn points(value: Option<&Value>, question_type: QuestionType) -> u32 {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed
        .map(|p| p.clamp(1, u32::MAX as u64) as u32)
        .unwrap_or_else(|| question_type.default_points())
}

/// Maps a model's answer onto one of the options: exact text, then
/// case-insensitive text, then an option letter (`A`, `b)`, `C.`).
fn resolve_mcq_answer(answer: &str, options: &[String]) -> Option<String> {
    if options.iter().any(|o| o == answer) {
        return Some(answer.to_string());
    }
    let lowered = answer.to_lowercase();
    if let Some(option) = options.iter().find(|o| o.to_lowercase() == lowered) {
        return Some(option.clone());
    }
    let letter = lowered.trim_end_matches([')', '.', ':']).trim();
    let mut chars = letter.chars();
    match (chars.next(), chars.next()) {
        (Some(c @ 'a'..='z'), None) => options.get((c as u8 - b'a') as usize).cloned(),
        _ => None,
    }
}

/// Only a boolean answer is usable; anything else invalidates the item.
fn true_false_answer(value: &Value) -> Option<String> {
    let raw = scalar_string(value)?;
    match raw.to_lowercase().as_str() {
        "true" | "vrai" => Some("true".to_string()),
        "false" | "faux" => Some("false".to_string()),
        _ => None,
    }
}

/// Validates one item against the requested type. Returns `None` when the
/// item lacks text or a field its type requires.
pub fn validate_item(item: &Value, question_type: QuestionType) -> Option<GeneratedQuestion> {
    let object = item.as_object()?;
    let text = object.get("text").and_then(scalar_string)?;

    let mut question = GeneratedQuestion {
        text,
        question_type,
        options: None,
        correct_answer: None,
        expected_keywords: None,
        explanation: object
            .get("explanation")
            .and_then(scalar_string)
            .unwrap_or_else(|| DEFAULT_EXPLANATION.to_string()),
        points: points(object.get("points"), question_type),
        order_index: 0,
    };

    match question_type {
        QuestionType::Mcq => {
            let options = string_list(object.get("options")).filter(|o| !o.is_empty())?;
            let answer = object.get("correct_answer").and_then(scalar_string)?;
            question.correct_answer = Some(resolve_mcq_answer(&answer, &options)?);
            question.options = Some(options);
        }
        QuestionType::OpenEnded => {
            question.expected_keywords = Some(string_list(object.get("expected_keywords")).unwrap_or_default());
        }
        QuestionType::TrueFalse => {
            question.correct_answer = Some(object.get("correct_answer").and_then(true_false_answer)?);
        }
        QuestionType::FillBlank => {
            question.correct_answer = Some(object.get("correct_answer").and_then(scalar_string)?);
        }
    }

    Some(question)
}

/// Keeps the valid items in their original order.
pub fn validate_items(items: &[Value], question_type: QuestionType) -> Vec<GeneratedQuestion> {
    items
        .iter()
        .filter_map(|item| validate_item(item, question_type))
        .collect()
}

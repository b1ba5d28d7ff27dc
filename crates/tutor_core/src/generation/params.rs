//! crates/tutor_core/src/generation/params.rs
//!
//! Two-tier extraction of generation parameters from a teacher's free-form
//! instruction: a constrained model call first, then keyword heuristics. The
//! result is always complete and clamped.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::{info, warn};

use super::parse::extract_json_object;
use super::prompts::{extraction_user_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::domain::{Difficulty, ExtractedParameters, QuestionType, DEFAULT_SUBJECT};
use crate::llm::LanguageModelClient;

pub const MIN_QUESTIONS: usize = 1;
pub const MAX_QUESTIONS: usize = 20;
pub const DEFAULT_QUESTION_COUNT: usize = 5;

static FIRST_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d+)\b").expect("valid regex"));

static SUBJECT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\b(?:basé uniquement sur|basé seulement sur|basé exclusivement sur|uniquement sur|seulement sur|exclusivement sur)\s+(.+?)(?:$|,|\.|!|\?)",
        r"\b(?:sur|à propos de|basé sur|concernant|relatif à)\s+(.+?)(?:$|,|\.|!|\?)",
        r"\b(?:thème|sujet|topic)\s*:\s*(.+?)(?:$|,|\.|!|\?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

const MCQ_KEYWORDS: &[&str] = &["qcm", "choix multiple", "multiple choice"];
const OPEN_KEYWORDS: &[&str] = &["ouverte", "open", "rédaction", "essay"];
const TRUE_FALSE_KEYWORDS: &[&str] = &["vrai", "faux", "true", "false", "vf"];
const FILL_BLANK_KEYWORDS: &[&str] = &["compléter", "completer", "fill", "blanc", "blank"];
const EASY_KEYWORDS: &[&str] = &["facile", "simple", "easy"];
const HARD_KEYWORDS: &[&str] = &["difficile", "dur", "complexe", "hard"];

/// Articles dropped from the front of an extracted subject, longest first.
const LEADING_ARTICLES: &[&str] = &["de la ", "les ", "la ", "le ", "l'", "l’", "des ", "du ", "une ", "un "];

pub fn clamp_count(count: usize) -> usize {
    count.clamp(MIN_QUESTIONS, MAX_QUESTIONS)
}

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| haystack.contains(k))
}

fn strip_leading_article(subject: &str) -> &str {
    let mut rest = subject.trim();
    if let Some(article) = LEADING_ARTICLES.iter().find(|a| rest.starts_with(**a)) {
        rest = rest[article.len()..].trim_start();
    }
    rest
}

/// Keyword-based extraction. Never fails.
pub fn heuristic_parameters(instruction: &str) -> ExtractedParameters {
    let lowered = instruction.to_lowercase();

    let count = FIRST_NUMBER
        .captures(instruction)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().parse::<usize>().unwrap_or(MAX_QUESTIONS))
        .map(clamp_count)
        .unwrap_or(DEFAULT_QUESTION_COUNT);

    let question_type = if contains_any(&lowered, MCQ_KEYWORDS) {
        QuestionType::Mcq
    } else if contains_any(&lowered, OPEN_KEYWORDS) {
        QuestionType::OpenEnded
    } else if contains_any(&lowered, TRUE_FALSE_KEYWORDS) {
        QuestionType::TrueFalse
    } else if contains_any(&lowered, FILL_BLANK_KEYWORDS) {
        QuestionType::FillBlank
    } else {
        QuestionType::Mcq
    };

    let subject = SUBJECT_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(&lowered))
        .and_then(|c| c.get(1))
        .map(|m| strip_leading_article(m.as_str()).trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

    let difficulty = if contains_any(&lowered, EASY_KEYWORDS) {
        Difficulty::Easy
    } else if contains_any(&lowered, HARD_KEYWORDS) {
        Difficulty::Hard
    } else {
        Difficulty::Medium
    };

    ExtractedParameters {
        count,
        question_type,
        subject,
        difficulty,
    }
}

fn field<'a>(map: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| map.get(*k))
}

fn count_field(value: Option<&Value>) -> usize {
    let count = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .map(|c| c as usize)
            .or_else(|| n.as_i64().map(|_| MIN_QUESTIONS))
            .or_else(|| n.as_f64().map(|f| f.max(0.0).round() as usize)),
        Some(Value::String(s)) => s.trim().parse::<usize>().ok(),
        _ => None,
    };
    clamp_count(count.unwrap_or(DEFAULT_QUESTION_COUNT))
}

/// Reads the model's extraction reply. `None` when no JSON object is present;
/// otherwise missing or unknown fields fall back to defaults.
pub fn parse_extraction_reply(reply: &str) -> Option<ExtractedParameters> {
    let map = extract_json_object(reply)?;

    let question_type = field(&map, &["type", "question_type"])
        .and_then(Value::as_str)
        .and_then(QuestionType::from_alias)
        .unwrap_or(QuestionType::Mcq);

    let subject = field(&map, &["subject", "sujet"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SUBJECT)
        .to_string();

    let difficulty = field(&map, &["difficulty", "difficulte", "difficulté"])
        .and_then(Value::as_str)
        .and_then(Difficulty::from_alias)
        .unwrap_or_default();

    Some(ExtractedParameters {
        count: count_field(field(&map, &["count", "nombre"])),
        question_type,
        subject,
        difficulty,
    })
}

#[derive(Clone)]
pub struct ParameterExtractor {
    llm: LanguageModelClient,
}

impl ParameterExtractor {
    pub fn new(llm: LanguageModelClient) -> Self {
        Self { llm }
    }

    pub async fn extract(&self, instruction: &str) -> ExtractedParameters {
        let prompt = extraction_user_prompt(instruction);
        match self.llm.try_complete(&prompt, &[], Some(EXTRACTION_SYSTEM_PROMPT)).await {
            Ok(reply) => {
                if let Some(params) = parse_extraction_reply(&reply) {
                    info!("Extracted parameters from model: {:?}", params);
                    return params;
                }
                warn!("Parameter extraction reply held no JSON object, using keywords");
            }
            Err(e) => warn!("Parameter extraction call failed, using keywords: {}", e),
        }
        let params = heuristic_parameters(instruction);
        info!("Keyword-extracted parameters: {:?}", params);
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_reads_count_type_and_subject() {
        let params = heuristic_parameters("2 QCM sur les boucles FOR");
        assert_eq!(
            params,
            ExtractedParameters {
                count: 2,
                question_type: QuestionType::Mcq,
                subject: "boucles for".to_string(),
                difficulty: Difficulty::Medium,
            }
        );
    }

    #[test]
    fn heuristic_defaults_and_clamps() {
        let params = heuristic_parameters("Des questions variées");
        assert_eq!(params.count, DEFAULT_QUESTION_COUNT);
        assert_eq!(params.question_type, QuestionType::Mcq);
        assert_eq!(params.subject, DEFAULT_SUBJECT);

        assert_eq!(heuristic_parameters("50 questions").count, MAX_QUESTIONS);
        assert_eq!(heuristic_parameters("0 question").count, MIN_QUESTIONS);
        assert_eq!(
            heuristic_parameters("99999999999999999999999 questions").count,
            MAX_QUESTIONS
        );
    }

    #[test]
    fn heuristic_subject_patterns() {
        assert_eq!(
            heuristic_parameters("3 questions ouvertes difficiles uniquement sur la récursivité.").subject,
            "récursivité"
        );
        assert_eq!(
            heuristic_parameters("Thème: pointeurs en C, 4 questions").subject,
            "pointeurs en c"
        );
        assert_eq!(
            heuristic_parameters("Exercice à propos de l'héritage").subject,
            "héritage"
        );
    }

    #[test]
    fn heuristic_type_and_difficulty_keywords() {
        let tf = heuristic_parameters("4 vrai ou faux faciles");
        assert_eq!(tf.question_type, QuestionType::TrueFalse);
        assert_eq!(tf.difficulty, Difficulty::Easy);

        let open = heuristic_parameters("questions ouvertes complexes");
        assert_eq!(open.question_type, QuestionType::OpenEnded);
        assert_eq!(open.difficulty, Difficulty::Hard);

        let fill = heuristic_parameters("phrases à compléter");
        assert_eq!(fill.question_type, QuestionType::FillBlank);
    }

    #[test]
    fn reply_accepts_french_keys_and_aliases() {
        let reply = r#"Voici: {"nombre": 30, "type": "QCM", "sujet": "boucles FOR", "difficulte": "difficile"}"#;
        let params = parse_extraction_reply(reply).unwrap();
        assert_eq!(params.count, MAX_QUESTIONS);
        assert_eq!(params.question_type, QuestionType::Mcq);
        assert_eq!(params.subject, "boucles FOR");
        assert_eq!(params.difficulty, Difficulty::Hard);
    }

    #[test]
    fn reply_fills_missing_fields() {
        let params = parse_extraction_reply(r#"{"count": "3"}"#).unwrap();
        assert_eq!(params.count, 3);
        assert_eq!(params.question_type, QuestionType::Mcq);
        assert_eq!(params.subject, DEFAULT_SUBJECT);
        assert_eq!(params.difficulty, Difficulty::Medium);

        let negative = parse_extraction_reply(r#"{"count": -4, "type": "vf"}"#).unwrap();
        assert_eq!(negative.count, MIN_QUESTIONS);
        assert_eq!(negative.question_type, QuestionType::TrueFalse);

        assert!(parse_extraction_reply("pas de json").is_none());
    }
}

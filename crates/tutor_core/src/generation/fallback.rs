//! crates/tutor_core/src/generation/fallback.rs
//!
//! Deterministic placeholder questions used when every generation attempt
//! failed. Each one is flagged for teacher review.

use crate::domain::{GeneratedQuestion, QuestionType};

/// Prefix marking a question that needs manual attention.
pub const REVIEW_FLAG: &str = "[À RÉVISER]";

pub fn is_flagged(question: &GeneratedQuestion) -> bool {
    question.text.starts_with(REVIEW_FLAG)
}

fn placeholder(index: usize, question_type: QuestionType) -> GeneratedQuestion {
    let number = index + 1;
    let mut question = GeneratedQuestion {
        text: String::new(),
        question_type,
        options: None,
        correct_answer: None,
        expected_keywords: None,
        explanation: String::new(),
        points: question_type.default_points(),
        order_index: index,
    };

    match question_type {
        QuestionType::Mcq => {
            question.text = format!(
                "{REVIEW_FLAG} Question {number}: Veuillez reformuler cette question basée sur le contenu du cours."
            );
            question.options = Some(
                ["Option A", "Option B", "Option C", "Option D"]
                    .iter()
                    .map(|o| o.to_string())
                    .collect(),
            );
            question.correct_answer = Some("Option A".to_string());
            question.explanation = "Cette question doit être reformulée par l'enseignant.".to_string();
        }
        QuestionType::OpenEnded => {
            question.text = format!(
                "{REVIEW_FLAG} Question {number}: Analysez et expliquez un concept important du cours."
            );
            question.expected_keywords = Some(
                ["concept", "analyse", "explication"]
                    .iter()
                    .map(|k| k.to_string())
                    .collect(),
            );
            question.explanation = "Cette question doit être adaptée par l'enseignant.".to_string();
        }
        QuestionType::TrueFalse => {
            question.text = format!("{REVIEW_FLAG} Affirmation {number}: à compléter par l'enseignant.");
            question.correct_answer = Some("true".to_string());
            question.explanation = "Cette question doit être complétée par l'enseignant.".to_string();
        }
        QuestionType::FillBlank => {
            question.text = format!("{REVIEW_FLAG} Question {number}: Phrase avec un _____ à compléter.");
            question.correct_answer = Some("réponse".to_string());
            question.explanation = "Cette question doit être complétée par l'enseignant.".to_string();
        }
    }
    question
}

/// Exactly `count` placeholders of the requested type, in order.
pub fn fallback_questions(count: usize, question_type: QuestionType) -> Vec<GeneratedQuestion> {
    (0..count).map(|i| placeholder(i, question_type)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_the_requested_count_flagged() {
        for question_type in [
            QuestionType::Mcq,
            QuestionType::OpenEnded,
            QuestionType::TrueFalse,
            QuestionType::FillBlank,
        ] {
            let questions = fallback_questions(3, question_type);
            assert_eq!(questions.len(), 3);
            assert!(questions.iter().all(is_flagged));
            assert!(questions.iter().all(|q| q.question_type == question_type));
            let order: Vec<usize> = questions.iter().map(|q| q.order_index).collect();
            assert_eq!(order, vec![0, 1, 2]);
        }
    }

    #[test]
    fn fields_match_the_type() {
        let mcq = &fallback_questions(1, QuestionType::Mcq)[0];
        let options = mcq.options.as_ref().unwrap();
        assert!(options.contains(mcq.correct_answer.as_ref().unwrap()));
        assert!(mcq.expected_keywords.is_none());

        let open = &fallback_questions(1, QuestionType::OpenEnded)[0];
        assert_eq!(open.points, 2);
        assert!(open.correct_answer.is_none());
        assert_eq!(open.expected_keywords.as_ref().map(Vec::len), Some(3));

        let tf = &fallback_questions(1, QuestionType::TrueFalse)[0];
        assert_eq!(tf.correct_answer.as_deref(), Some("true"));
        assert_eq!(tf.points, 1);
    }
}

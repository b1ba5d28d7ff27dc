//! crates/tutor_core/src/feedback.rs
//!
//! Teacher-facing analysis of a student's activity in a section, and short
//! pedagogical feedback on a single answer. Both are one plain completion.

use std::sync::Arc;
use tracing::info;

use crate::domain::{ChatMessage, GeneratedQuestion, QuestionType, SubmissionSummary, User};
use crate::error::{CoreError, CoreResult};
use crate::llm::{is_degraded_message, LanguageModelClient};
use crate::ports::DatabaseService;

pub const ANALYSIS_SYSTEM_PROMPT: &str = "Vous êtes un tuteur bienveillant. Analysez les réponses de l'étudiant et identifiez ses lacunes principales.";

const FEEDBACK_SYSTEM_PROMPT: &str = "Tu es un tuteur pédagogique bienveillant.
Fournis un feedback constructif et encourageant pour aider l'étudiant à progresser.
Sois précis, pédagogique et positif dans ton approche.";

pub const CORRECT_FALLBACK: &str = "Excellente réponse ! Vous avez bien compris ce concept.";
pub const INCORRECT_FALLBACK: &str = "Ce n'est pas tout à fait correct. Revoyez ce concept et n'hésitez pas à poser des questions.";

/// One line block per submission, then the chat transcript.
pub fn analysis_prompt(submissions: &[SubmissionSummary], messages: &[ChatMessage]) -> String {
    let mut lines = Vec::new();
    for submission in submissions {
        lines.push(format!(
            "Exercice {} score {}/{}",
            submission.exercise_id, submission.score, submission.total_points
        ));
        for (question_id, answer) in &submission.answers {
            lines.push(format!("Q{}: {}", question_id, answer));
        }
    }
    for message in messages {
        let speaker = if message.is_assistant { "BOT" } else { "ETUDIANT" };
        lines.push(format!("[{}] {}", speaker, message.content));
    }
    lines.join("\n")
}

fn json_list(items: Option<&Vec<String>>) -> String {
    serde_json::to_string(items.map(Vec::as_slice).unwrap_or(&[])).unwrap_or_else(|_| "[]".to_string())
}

pub fn answer_prompt(question: &GeneratedQuestion, answer: &str, is_correct: bool) -> String {
    match question.question_type {
        QuestionType::OpenEnded => format!(
            "Question: {text}
Mots-clés attendus: {keywords}
Réponse de l'étudiant: {answer}

{explanation}

Fournis un feedback pédagogique (3-4 phrases) qui:
- Évalue la qualité de la réponse
- Identifie les points forts et les points à améliorer
- Suggère des pistes d'approfondissement
- Encourage l'étudiant",
            text = question.text,
            keywords = json_list(question.expected_keywords.as_ref()),
            explanation = question.explanation,
        ),
        _ => format!(
            "Question: {text}
Options: {options}
Réponse correcte: {correct}
Réponse de l'étudiant: {answer}
Correct: {verdict}

{explanation}

Fournis un feedback pédagogique bref (2-3 phrases) qui:
- Confirme si la réponse est correcte ou non
- Explique pourquoi de manière claire
- Encourage l'étudiant à continuer",
            text = question.text,
            options = json_list(question.options.as_ref()),
            correct = question.correct_answer.as_deref().unwrap_or(""),
            verdict = if is_correct { "Oui" } else { "Non" },
            explanation = question.explanation,
        ),
    }
}

#[derive(Clone)]
pub struct FeedbackComposer {
    db: Arc<dyn DatabaseService>,
    llm: LanguageModelClient,
}

impl FeedbackComposer {
    pub fn new(db: Arc<dyn DatabaseService>, llm: LanguageModelClient) -> Self {
        Self { db, llm }
    }

    /// Summarises a student's submissions and chat history in a section.
    /// Only the section's teacher may ask.
    pub async fn analyze_student(&self, user: &User, section_id: i64, student_id: i64) -> CoreResult<String> {
        let section = self.db.get_section(section_id).await?;
        if section.teacher_id != user.id {
            return Err(CoreError::NotAuthorized);
        }

        let submissions = self.db.list_student_submissions(section_id, student_id).await?;
        let messages = self.db.list_student_chat_messages(section_id, student_id).await?;
        info!(
            "Analyzing student {} in section {}: {} submissions, {} chat messages",
            student_id,
            section_id,
            submissions.len(),
            messages.len()
        );

        let prompt = analysis_prompt(&submissions, &messages);
        let analysis = self.llm.complete(&prompt, Some(ANALYSIS_SYSTEM_PROMPT)).await;
        Ok(analysis.trim().to_string())
    }

    pub async fn answer_feedback(&self, question: &GeneratedQuestion, answer: &str, is_correct: bool) -> String {
        let prompt = answer_prompt(question, answer, is_correct);
        let feedback = self.llm.complete(&prompt, Some(FEEDBACK_SYSTEM_PROMPT)).await;
        let feedback = feedback.trim();
        if feedback.is_empty() || is_degraded_message(feedback) {
            return if is_correct { CORRECT_FALLBACK } else { INCORRECT_FALLBACK }.to_string();
        }
        feedback.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn message(content: &str, is_assistant: bool) -> ChatMessage {
        ChatMessage {
            id: 1,
            session_id: 1,
            content: content.to_string(),
            is_assistant,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn analysis_prompt_lists_submissions_then_chat() {
        let submissions = vec![SubmissionSummary {
            exercise_id: 7,
            score: 3.0,
            total_points: 4,
            answers: vec![(11, "Option B".to_string()), (12, "true".to_string())],
        }];
        let messages = vec![message("C'est quoi une boucle ?", false), message("Une répétition.", true)];
        assert_eq!(
            analysis_prompt(&submissions, &messages),
            "Exercice 7 score 3/4\nQ11: Option B\nQ12: true\n[ETUDIANT] C'est quoi une boucle ?\n[BOT] Une répétition."
        );
    }

    #[test]
    fn answer_prompt_depends_on_question_type() {
        let mut question = GeneratedQuestion {
            text: "Que fait for ?".to_string(),
            question_type: QuestionType::Mcq,
            options: Some(vec!["Itère".to_string(), "Trie".to_string()]),
            correct_answer: Some("Itère".to_string()),
            expected_keywords: None,
            explanation: "for parcourt une séquence.".to_string(),
            points: 1,
            order_index: 0,
        };
        let mcq = answer_prompt(&question, "Trie", false);
        assert!(mcq.contains("Options: [\"Itère\",\"Trie\"]"));
        assert!(mcq.contains("Correct: Non"));

        question.question_type = QuestionType::OpenEnded;
        question.expected_keywords = Some(vec!["itération".to_string()]);
        let open = answer_prompt(&question, "Ça répète", true);
        assert!(open.contains("Mots-clés attendus: [\"itération\"]"));
        assert!(!open.contains("Réponse correcte"));
    }
}

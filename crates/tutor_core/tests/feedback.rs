mod common;

use common::*;
use tutor_core::domain::{GeneratedQuestion, QuestionType, SubmissionSummary};
use tutor_core::feedback::{ANALYSIS_SYSTEM_PROMPT, CORRECT_FALLBACK, INCORRECT_FALLBACK};
use tutor_core::ports::PortError;
use tutor_core::{ConversationEngine, CoreError, FeedbackComposer, LanguageModelClient};

fn question() -> GeneratedQuestion {
    GeneratedQuestion {
        text: "Que renvoie len([1, 2]) ?".to_string(),
        question_type: QuestionType::Mcq,
        options: Some(vec!["1".to_string(), "2".to_string()]),
        correct_answer: Some("2".to_string()),
        expected_keywords: None,
        explanation: "len compte les éléments.".to_string(),
        points: 1,
        order_index: 0,
    }
}

#[tokio::test]
async fn analysis_covers_submissions_and_chat() {
    let db = FakeDb::seeded();
    db.state.lock().unwrap().submissions.push((
        SECTION_ID,
        STUDENT_ID,
        SubmissionSummary {
            exercise_id: 4,
            score: 1.0,
            total_points: 2,
            answers: vec![(8, "1".to_string())],
        },
    ));

    let model = ScriptedModel::new();
    model.reply("oui").reply("Réponse.").reply("Titre").reply("  L'étudiant confond len et index.  ");

    let engine = ConversationEngine::new(db.clone(), None, LanguageModelClient::new(model.clone()));
    let session = engine.create_session(&student(), SECTION_ID).await.unwrap();
    engine.send_message(&student(), session.id, "Que fait len ?").await.unwrap();

    let composer = FeedbackComposer::new(db, LanguageModelClient::new(model.clone()));
    let analysis = composer.analyze_student(&teacher(), SECTION_ID, STUDENT_ID).await.unwrap();

    assert_eq!(analysis, "L'étudiant confond len et index.");
    let requests = model.requests();
    let prompt = &requests.last().unwrap().prompt;
    assert!(prompt.contains(ANALYSIS_SYSTEM_PROMPT));
    assert!(prompt.contains("Exercice 4 score 1/2\nQ8: 1"));
    assert!(prompt.contains("[ETUDIANT] Que fait len ?"));
    assert!(prompt.contains("[BOT] Réponse."));
}

#[tokio::test]
async fn only_the_section_teacher_may_analyze() {
    let composer = FeedbackComposer::new(FakeDb::seeded(), LanguageModelClient::new(ScriptedModel::new()));
    for user in [student(), admin()] {
        let err = composer.analyze_student(&user, SECTION_ID, STUDENT_ID).await.unwrap_err();
        assert!(matches!(err, CoreError::NotAuthorized));
    }
}

#[tokio::test]
async fn answer_feedback_uses_the_model_reply() {
    let model = ScriptedModel::new();
    model.reply(" Bravo, len renvoie bien 2. ");
    let composer = FeedbackComposer::new(FakeDb::seeded(), LanguageModelClient::new(model));

    let feedback = composer.answer_feedback(&question(), "2", true).await;
    assert_eq!(feedback, "Bravo, len renvoie bien 2.");
}

#[tokio::test]
async fn answer_feedback_falls_back_on_a_degraded_reply() {
    let model = ScriptedModel::new();
    model
        .fail(PortError::ReadTimeout("ollama".to_string()))
        .fail(PortError::Backend {
            status: 503,
            message: "busy".to_string(),
        });
    let composer = FeedbackComposer::new(FakeDb::seeded(), LanguageModelClient::new(model));

    assert_eq!(composer.answer_feedback(&question(), "2", true).await, CORRECT_FALLBACK);
    assert_eq!(composer.answer_feedback(&question(), "1", false).await, INCORRECT_FALLBACK);
}

//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::ApiError;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use tutor_core::domain::{
    AdvancedParams, ChatMessage, ChatSession, Difficulty, Document, DocumentStatus, ExtractedParameters,
    GeneratedQuestion, GenerationMode, GenerationRequest, QuestionType, SimpleParams,
};
use tutor_core::{CoreError, GenerationReport, User};
use utoipa::{OpenApi, ToSchema};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        process_document_handler,
        delete_document_handler,
        list_sessions_handler,
        create_session_handler,
        list_messages_handler,
        send_message_handler,
        crate::web::chat::stream_message_handler,
        delete_session_handler,
        generate_exercise_handler,
        analyze_student_handler,
        ollama_health_handler,
    ),
    components(
        schemas(
            DocumentResponse,
            SessionResponse,
            CreateSessionRequest,
            MessageResponse,
            SendMessageRequest,
            ExchangeResponse,
            GenerateExerciseRequest,
            QuestionResponse,
            ExtractedParametersResponse,
            ExerciseResponse,
            AnalysisResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "Course Tutor API", description = "Course documents, tutoring chat and exercise generation.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct DocumentResponse {
    id: i64,
    section_id: i64,
    original_filename: String,
    /// One of `uploaded`, `processing`, `processed`, `error`.
    status: String,
    is_vectorized: bool,
    vector_count: usize,
    processing_error: Option<String>,
}

impl From<Document> for DocumentResponse {
    fn from(document: Document) -> Self {
        let status = match document.status {
            DocumentStatus::Uploaded => "uploaded",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Processed => "processed",
            DocumentStatus::Error => "error",
        };
        Self {
            id: document.id,
            section_id: document.section_id,
            original_filename: document.original_filename,
            status: status.to_string(),
            is_vectorized: document.is_vectorized,
            vector_count: document.vector_count,
            processing_error: document.processing_error,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    id: i64,
    section_id: i64,
    title: Option<String>,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
    message_count: usize,
}

impl From<ChatSession> for SessionResponse {
    fn from(session: ChatSession) -> Self {
        Self {
            id: session.id,
            section_id: session.section_id,
            title: session.title,
            created_at: session.created_at,
            last_message_at: session.last_message_at,
            message_count: session.message_count,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    section_id: i64,
}

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    id: i64,
    session_id: i64,
    content: String,
    is_assistant: bool,
    created_at: DateTime<Utc>,
}

impl From<ChatMessage> for MessageResponse {
    fn from(message: ChatMessage) -> Self {
        Self {
            id: message.id,
            session_id: message.session_id,
            content: message.content,
            is_assistant: message.is_assistant,
            created_at: message.created_at,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Serialize, ToSchema)]
pub struct ExchangeResponse {
    user_message: MessageResponse,
    assistant_message: MessageResponse,
    /// True when the question was judged unrelated to the section.
    declined: bool,
}

/// Exactly one of the simple fields or `custom_prompt` is used, picked by `mode`.
#[derive(Deserialize, ToSchema)]
pub struct GenerateExerciseRequest {
    /// `simple` or `advanced`.
    mode: String,
    num_questions: Option<usize>,
    difficulty: Option<String>,
    question_type: Option<String>,
    custom_prompt: Option<String>,
    temp_content: Option<String>,
    document_filter: Option<Vec<i64>>,
}

impl GenerateExerciseRequest {
    fn into_domain(self, section_id: i64) -> Result<GenerationRequest, CoreError> {
        let invalid = |what: &str| CoreError::InvalidRequest(what.to_string());
        let mode = match self.mode.trim().to_lowercase().as_str() {
            "simple" => {
                let difficulty = match self.difficulty.as_deref() {
                    Some(raw) => Difficulty::from_alias(raw).ok_or_else(|| invalid("unknown difficulty"))?,
                    None => Difficulty::default(),
                };
                let question_type = self
                    .question_type
                    .as_deref()
                    .and_then(QuestionType::from_alias)
                    .ok_or_else(|| invalid("question_type is required in simple mode"))?;
                GenerationMode::Simple(SimpleParams {
                    num_questions: self
                        .num_questions
                        .ok_or_else(|| invalid("num_questions is required in simple mode"))?,
                    difficulty,
                    question_type,
                    document_filter: self.document_filter,
                })
            }
            "advanced" => GenerationMode::Advanced(AdvancedParams {
                custom_prompt: self
                    .custom_prompt
                    .ok_or_else(|| invalid("custom_prompt is required in advanced mode"))?,
                temp_content: self.temp_content,
                document_filter: self.document_filter,
            }),
            other => return Err(CoreError::InvalidRequest(format!("unknown mode '{}'", other))),
        };
        Ok(GenerationRequest { section_id, mode })
    }
}

#[derive(Serialize, ToSchema)]
pub struct QuestionResponse {
    text: String,
    question_type: String,
    options: Option<Vec<String>>,
    correct_answer: Option<String>,
    expected_keywords: Option<Vec<String>>,
    explanation: String,
    points: u32,
    order_index: usize,
}

impl From<GeneratedQuestion> for QuestionResponse {
    fn from(question: GeneratedQuestion) -> Self {
        Self {
            text: question.text,
            question_type: question.question_type.as_str().to_string(),
            options: question.options,
            correct_answer: question.correct_answer,
            expected_keywords: question.expected_keywords,
            explanation: question.explanation,
            points: question.points,
            order_index: question.order_index,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ExtractedParametersResponse {
    count: usize,
    question_type: String,
    subject: String,
    difficulty: String,
}

impl From<ExtractedParameters> for ExtractedParametersResponse {
    fn from(params: ExtractedParameters) -> Self {
        Self {
            count: params.count,
            question_type: params.question_type.as_str().to_string(),
            subject: params.subject,
            difficulty: params.difficulty.as_str().to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ExerciseResponse {
    exercise_id: i64,
    section_id: i64,
    status: String,
    /// True when the questions are placeholders awaiting teacher review.
    used_fallback: bool,
    source_documents: Vec<i64>,
    questions: Vec<QuestionResponse>,
    extracted_parameters: Option<ExtractedParametersResponse>,
}

impl From<GenerationReport> for ExerciseResponse {
    fn from(report: GenerationReport) -> Self {
        let exercise = report.exercise;
        Self {
            exercise_id: exercise.id,
            section_id: exercise.section_id,
            status: exercise.status.as_str().to_string(),
            used_fallback: report.used_fallback,
            source_documents: exercise.source_documents,
            questions: exercise.questions.into_iter().map(Into::into).collect(),
            extracted_parameters: report.extracted.map(Into::into),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct AnalysisResponse {
    student_id: i64,
    analysis: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    status: String,
    model: String,
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Extract, chunk and index an uploaded document.
#[utoipa::path(
    post,
    path = "/sections/{section_id}/documents/{document_id}/process",
    responses(
        (status = 200, description = "Processing finished; `status` tells whether it succeeded", body = DocumentResponse),
        (status = 403, description = "Not the section's teacher"),
        (status = 404, description = "Unknown section or document")
    ),
    params(
        ("section_id" = i64, Path, description = "The section owning the document."),
        ("document_id" = i64, Path, description = "The document to process."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn process_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path((section_id, document_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state
        .indexer
        .process_document(&user, section_id, document_id)
        .await?;
    Ok(Json(DocumentResponse::from(document)))
}

/// Delete a document, its indexed chunks and its stored file.
#[utoipa::path(
    delete,
    path = "/documents/{document_id}",
    responses(
        (status = 204, description = "Document deleted"),
        (status = 403, description = "Not the section's teacher"),
        (status = 404, description = "Unknown document")
    ),
    params(
        ("document_id" = i64, Path, description = "The document to delete."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn delete_document_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(document_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let document = state.indexer.delete_document(&user, document_id).await?;

    let path = if document.file_path.is_absolute() {
        document.file_path.clone()
    } else {
        state.config.upload_dir.join(&document.file_path)
    };
    match tokio::fs::remove_file(&path).await {
        Ok(()) => info!("Removed file {}", path.display()),
        Err(e) => warn!("Could not remove file {}: {}", path.display(), e),
    }
    Ok(StatusCode::NO_CONTENT)
}

/// List the requesting user's chat sessions, most recent first.
#[utoipa::path(
    get,
    path = "/chat/sessions",
    responses((status = 200, description = "The user's sessions", body = [SessionResponse])),
    params(("x-user-id" = i64, Header, description = "The requesting user."))
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state.conversation.list_sessions(&user).await?;
    Ok(Json(sessions.into_iter().map(SessionResponse::from).collect::<Vec<_>>()))
}

/// Open a chat session on a section.
#[utoipa::path(
    post,
    path = "/chat/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionResponse),
        (status = 404, description = "Unknown section")
    ),
    params(("x-user-id" = i64, Header, description = "The requesting user."))
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.conversation.create_session(&user, body.section_id).await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// The messages of one of the user's sessions, oldest first.
#[utoipa::path(
    get,
    path = "/chat/sessions/{session_id}/messages",
    responses(
        (status = 200, description = "The session's messages", body = [MessageResponse]),
        (status = 403, description = "Session owned by another user"),
        (status = 404, description = "Unknown session")
    ),
    params(
        ("session_id" = i64, Path, description = "The chat session."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn list_messages_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state.conversation.session_messages(&user, session_id).await?;
    Ok(Json(messages.into_iter().map(MessageResponse::from).collect::<Vec<_>>()))
}

/// Send a message and wait for the complete answer.
#[utoipa::path(
    post,
    path = "/chat/sessions/{session_id}/messages",
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "The stored exchange", body = ExchangeResponse),
        (status = 400, description = "Empty message"),
        (status = 403, description = "Session owned by another user"),
        (status = 404, description = "Unknown session")
    ),
    params(
        ("session_id" = i64, Path, description = "The chat session."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<i64>,
    Json(body): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let exchange = state.conversation.send_message(&user, session_id, &body.content).await?;
    Ok(Json(ExchangeResponse {
        user_message: exchange.user_message.into(),
        assistant_message: exchange.assistant_message.into(),
        declined: exchange.declined,
    }))
}

/// Delete one of the user's sessions with its messages.
#[utoipa::path(
    delete,
    path = "/chat/sessions/{session_id}",
    responses(
        (status = 204, description = "Session deleted"),
        (status = 403, description = "Session owned by another user"),
        (status = 404, description = "Unknown session")
    ),
    params(
        ("session_id" = i64, Path, description = "The chat session."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn delete_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(session_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.conversation.delete_session(&user, session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Generate an exercise for a section from its indexed content.
#[utoipa::path(
    post,
    path = "/sections/{section_id}/exercises/generate",
    request_body = GenerateExerciseRequest,
    responses(
        (status = 201, description = "Exercise stored as pending review", body = ExerciseResponse),
        (status = 400, description = "Invalid parameters or no content"),
        (status = 403, description = "Not the section's teacher"),
        (status = 409, description = "A generation is already running for the section")
    ),
    params(
        ("section_id" = i64, Path, description = "The section."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn generate_exercise_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path(section_id): Path<i64>,
    Json(body): Json<GenerateExerciseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let request = body.into_domain(section_id)?;
    let report = state.exercises.generate(&user, request).await?;
    Ok((StatusCode::CREATED, Json(ExerciseResponse::from(report))))
}

/// Ask the model for a pedagogical analysis of one student.
#[utoipa::path(
    post,
    path = "/sections/{section_id}/students/{student_id}/analyze",
    responses(
        (status = 200, description = "The analysis text", body = AnalysisResponse),
        (status = 403, description = "Not the section's teacher"),
        (status = 404, description = "Unknown section")
    ),
    params(
        ("section_id" = i64, Path, description = "The section."),
        ("student_id" = i64, Path, description = "The student to analyze."),
        ("x-user-id" = i64, Header, description = "The requesting user.")
    )
)]
pub async fn analyze_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<User>,
    Path((section_id, student_id)): Path<(i64, i64)>,
) -> Result<impl IntoResponse, ApiError> {
    let analysis = state.feedback.analyze_student(&user, section_id, student_id).await?;
    Ok(Json(AnalysisResponse { student_id, analysis }))
}

/// Report whether the generation backend is reachable with its model installed.
#[utoipa::path(
    get,
    path = "/ollama-health",
    responses((status = 200, description = "Backend health", body = HealthResponse))
)]
pub async fn ollama_health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = if state.llm.health_check().await {
        "healthy"
    } else {
        "unhealthy"
    };
    Json(HealthResponse {
        status: status.to_string(),
        model: state.llm.model_name().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> GenerateExerciseRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn simple_request_accepts_aliases() {
        let domain = request(serde_json::json!({
            "mode": "simple",
            "num_questions": 4,
            "difficulty": "facile",
            "question_type": "qcm",
            "document_filter": [2, 3]
        }))
        .into_domain(9)
        .unwrap();
        assert_eq!(domain.section_id, 9);
        match domain.mode {
            GenerationMode::Simple(params) => {
                assert_eq!(params.document_filter, Some(vec![2, 3]));
                assert_eq!(params.num_questions, 4);
                assert_eq!(params.difficulty, Difficulty::Easy);
                assert_eq!(params.question_type, QuestionType::Mcq);
            }
            GenerationMode::Advanced(_) => panic!("expected simple mode"),
        }
    }

    #[test]
    fn mode_fields_are_required() {
        let missing_type = request(serde_json::json!({ "mode": "simple", "num_questions": 3 }));
        assert!(matches!(missing_type.into_domain(1), Err(CoreError::InvalidRequest(_))));

        let missing_prompt = request(serde_json::json!({ "mode": "advanced" }));
        assert!(matches!(missing_prompt.into_domain(1), Err(CoreError::InvalidRequest(_))));

        let unknown = request(serde_json::json!({ "mode": "expert" }));
        assert!(matches!(unknown.into_domain(1), Err(CoreError::InvalidRequest(_))));
    }
}

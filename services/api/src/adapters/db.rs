//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `tutor_core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Raw column values (role spellings, status strings) are converted to domain
//! enums here, so nothing past this boundary compares strings.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::path::PathBuf;
use tracing::debug;
use tutor_core::domain::{
    ChatMessage, ChatSession, Document, DocumentProcessing, DocumentStatus, DocumentType, Exercise,
    ExerciseStatus, GeneratedQuestion, QuestionType, Role, Section, SubmissionSummary, User,
};
use tutor_core::ports::{DatabaseService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn fetch_exercise(&self, exercise_id: i64) -> PortResult<Exercise> {
        let record = sqlx::query_as::<_, ExerciseRecord>(
            "SELECT id, section_id, status, generation_params, source_documents, created_at
             FROM exercises WHERE id = $1",
        )
        .bind(exercise_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Exercise {}", exercise_id)))?;

        let questions = sqlx::query_as::<_, QuestionRecord>(
            "SELECT question_text, question_type, options, correct_answer, expected_keywords,
                    explanation, points, order_index
             FROM questions WHERE exercise_id = $1 ORDER BY order_index",
        )
        .bind(exercise_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(QuestionRecord::to_domain)
        .collect::<PortResult<Vec<_>>>()?;

        record.to_domain(questions)
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// `RowNotFound` becomes `NotFound` naming what was looked up.
fn db_error(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(format!("{} not found", what)),
        other => unexpected(other),
    }
}

fn invalid_column(column: &str, value: &str) -> PortError {
    PortError::Unexpected(format!("unknown {} value '{}'", column, value))
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    id: i64,
    full_name: String,
    email: String,
    role: String,
}
impl UserRecord {
    fn to_domain(self) -> PortResult<User> {
        let role = Role::normalize(&self.role).ok_or_else(|| invalid_column("role", &self.role))?;
        Ok(User {
            id: self.id,
            full_name: self.full_name,
            email: self.email,
            role,
        })
    }
}

#[derive(FromRow)]
struct SectionRecord {
    id: i64,
    name: String,
    description: Option<String>,
    teacher_id: i64,
    collection_name: Option<String>,
}
impl SectionRecord {
    fn to_domain(self) -> Section {
        Section {
            id: self.id,
            name: self.name,
            description: self.description,
            teacher_id: self.teacher_id,
            collection_name: self.collection_name,
        }
    }
}

const DOCUMENT_COLUMNS: &str = "id, section_id, original_filename, file_path, document_type, status,
    extracted_text, is_vectorized, vector_count, processing_error";

#[derive(FromRow)]
struct DocumentRecord {
    id: i64,
    section_id: i64,
    original_filename: String,
    file_path: String,
    document_type: String,
    status: String,
    extracted_text: Option<String>,
    is_vectorized: bool,
    vector_count: i32,
    processing_error: Option<String>,
}
impl DocumentRecord {
    fn to_domain(self) -> PortResult<Document> {
        let status = match self.status.as_str() {
            "uploaded" => DocumentStatus::Uploaded,
            "processing" => DocumentStatus::Processing,
            "processed" => DocumentStatus::Processed,
            "error" => DocumentStatus::Error,
            other => return Err(invalid_column("document status", other)),
        };
        Ok(Document {
            id: self.id,
            section_id: self.section_id,
            original_filename: self.original_filename,
            file_path: PathBuf::from(self.file_path),
            document_type: DocumentType::from_extension(&self.document_type),
            status,
            extracted_text: self.extracted_text,
            is_vectorized: self.is_vectorized,
            vector_count: self.vector_count.max(0) as usize,
            processing_error: self.processing_error,
        })
    }
}

const SESSION_COLUMNS: &str = "s.id, s.user_id, s.section_id, s.title, s.created_at, s.last_message_at,
    (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id) AS message_count";

#[derive(FromRow)]
struct SessionRecord {
    id: i64,
    user_id: i64,
    section_id: i64,
    title: Option<String>,
    created_at: DateTime<Utc>,
    last_message_at: Option<DateTime<Utc>>,
    message_count: i64,
}
impl SessionRecord {
    fn to_domain(self) -> ChatSession {
        ChatSession {
            id: self.id,
            user_id: self.user_id,
            section_id: self.section_id,
            title: self.title,
            created_at: self.created_at,
            last_message_at: self.last_message_at,
            message_count: self.message_count.max(0) as usize,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: i64,
    session_id: i64,
    content: String,
    is_assistant: bool,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> ChatMessage {
        ChatMessage {
            id: self.id,
            session_id: self.session_id,
            content: self.content,
            is_assistant: self.is_assistant,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ExerciseRecord {
    id: i64,
    section_id: i64,
    status: String,
    generation_params: Value,
    source_documents: Vec<i64>,
    created_at: DateTime<Utc>,
}
impl ExerciseRecord {
    fn to_domain(self, questions: Vec<GeneratedQuestion>) -> PortResult<Exercise> {
        Ok(Exercise {
            id: self.id,
            section_id: self.section_id,
            status: parse_exercise_status(&self.status)?,
            generation_params: self.generation_params,
            source_documents: self.source_documents,
            questions,
            created_at: self.created_at,
        })
    }
}

fn parse_exercise_status(raw: &str) -> PortResult<ExerciseStatus> {
    match raw {
        "generating" => Ok(ExerciseStatus::Generating),
        "pending" => Ok(ExerciseStatus::Pending),
        "validated" => Ok(ExerciseStatus::Validated),
        other => Err(invalid_column("exercise status", other)),
    }
}

#[derive(FromRow)]
struct QuestionRecord {
    question_text: String,
    question_type: String,
    options: Option<Json<Vec<String>>>,
    correct_answer: Option<String>,
    expected_keywords: Option<Json<Vec<String>>>,
    explanation: String,
    points: i32,
    order_index: i32,
}
impl QuestionRecord {
    fn to_domain(self) -> PortResult<GeneratedQuestion> {
        let question_type = QuestionType::from_alias(&self.question_type)
            .ok_or_else(|| invalid_column("question type", &self.question_type))?;
        Ok(GeneratedQuestion {
            text: self.question_text,
            question_type,
            options: self.options.map(|Json(o)| o),
            correct_answer: self.correct_answer,
            expected_keywords: self.expected_keywords.map(|Json(k)| k),
            explanation: self.explanation,
            points: self.points.max(1) as u32,
            order_index: self.order_index.max(0) as usize,
        })
    }
}

#[derive(Serialize, Deserialize)]
struct StoredAnswer {
    question_id: i64,
    #[serde(default)]
    answer: String,
}

#[derive(FromRow)]
struct SubmissionRecord {
    exercise_id: i64,
    score: f64,
    total_points: i32,
    answers: Json<Vec<StoredAnswer>>,
}
impl SubmissionRecord {
    fn to_domain(self) -> SubmissionSummary {
        SubmissionSummary {
            exercise_id: self.exercise_id,
            score: self.score,
            total_points: self.total_points.max(0) as u32,
            answers: self
                .answers
                .0
                .into_iter()
                .map(|a| (a.question_id, a.answer))
                .collect(),
        }
    }
}

async fn insert_question(
    tx: &mut Transaction<'_, Postgres>,
    exercise_id: i64,
    question: &GeneratedQuestion,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO questions (exercise_id, question_text, question_type, options, correct_answer,
                                expected_keywords, explanation, points, order_index)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(exercise_id)
    .bind(&question.text)
    .bind(question.question_type.as_str())
    .bind(question.options.as_ref().map(Json))
    .bind(&question.correct_answer)
    .bind(question.expected_keywords.as_ref().map(Json))
    .bind(&question.explanation)
    .bind(question.points.max(1) as i32)
    .bind(question.order_index as i32)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_user(&self, user_id: i64) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>("SELECT id, full_name, email, role FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error(e, format!("User {}", user_id)))?
            .to_domain()
    }

    async fn get_section(&self, section_id: i64) -> PortResult<Section> {
        let record = sqlx::query_as::<_, SectionRecord>(
            "SELECT id, name, description, teacher_id, collection_name FROM sections WHERE id = $1",
        )
        .bind(section_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Section {}", section_id)))?;
        Ok(record.to_domain())
    }

    async fn get_document(&self, document_id: i64) -> PortResult<Document> {
        sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Document {}", document_id)))?
        .to_domain()
    }

    async fn list_section_documents(&self, section_id: i64) -> PortResult<Vec<Document>> {
        sqlx::query_as::<_, DocumentRecord>(&format!(
            "SELECT {} FROM documents WHERE section_id = $1 ORDER BY id",
            DOCUMENT_COLUMNS
        ))
        .bind(section_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?
        .into_iter()
        .map(DocumentRecord::to_domain)
        .collect()
    }

    async fn update_document_processing(
        &self,
        document_id: i64,
        update: DocumentProcessing,
    ) -> PortResult<Document> {
        let result = match &update {
            DocumentProcessing::Started => {
                sqlx::query_as::<_, DocumentRecord>(&format!(
                    "UPDATE documents SET status = 'processing', processing_error = NULL
                     WHERE id = $1 RETURNING {}",
                    DOCUMENT_COLUMNS
                ))
                .bind(document_id)
                .fetch_one(&self.pool)
                .await
            }
            DocumentProcessing::Completed {
                extracted_text,
                vector_count,
                is_vectorized,
            } => {
                sqlx::query_as::<_, DocumentRecord>(&format!(
                    "UPDATE documents SET status = 'processed', extracted_text = $2, vector_count = $3,
                         is_vectorized = $4, processing_error = NULL, processed_at = NOW()
                     WHERE id = $1 RETURNING {}",
                    DOCUMENT_COLUMNS
                ))
                .bind(document_id)
                .bind(extracted_text)
                .bind(*vector_count as i32)
                .bind(*is_vectorized)
                .fetch_one(&self.pool)
                .await
            }
            DocumentProcessing::Failed { message } => {
                sqlx::query_as::<_, DocumentRecord>(&format!(
                    "UPDATE documents SET status = 'error', processing_error = $2, is_vectorized = FALSE
                     WHERE id = $1 RETURNING {}",
                    DOCUMENT_COLUMNS
                ))
                .bind(document_id)
                .bind(message)
                .fetch_one(&self.pool)
                .await
            }
        };
        result
            .map_err(|e| db_error(e, format!("Document {}", document_id)))?
            .to_domain()
    }

    async fn delete_document(&self, document_id: i64) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Document {} not found", document_id)));
        }
        Ok(())
    }

    async fn create_chat_session(&self, user_id: i64, section_id: i64) -> PortResult<ChatSession> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO chat_sessions (user_id, section_id) VALUES ($1, $2) RETURNING id",
        )
        .bind(user_id)
        .bind(section_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        debug!("Created chat session {} for user {}", id, user_id);
        self.get_chat_session(id).await
    }

    async fn get_chat_session(&self, session_id: i64) -> PortResult<ChatSession> {
        let record = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM chat_sessions s WHERE s.id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error(e, format!("Chat session {}", session_id)))?;
        Ok(record.to_domain())
    }

    async fn list_user_sessions(&self, user_id: i64) -> PortResult<Vec<ChatSession>> {
        let records = sqlx::query_as::<_, SessionRecord>(&format!(
            "SELECT {} FROM chat_sessions s WHERE s.user_id = $1
             ORDER BY COALESCE(s.last_message_at, s.created_at) DESC",
            SESSION_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(SessionRecord::to_domain).collect())
    }

    async fn delete_chat_session(&self, session_id: i64) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM chat_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Chat session {} not found", session_id)));
        }
        Ok(())
    }

    async fn list_session_messages(&self, session_id: i64) -> PortResult<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, session_id, content, is_assistant, created_at
             FROM chat_messages WHERE session_id = $1 ORDER BY created_at, id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(MessageRecord::to_domain).collect())
    }

    async fn count_session_messages(&self, session_id: i64) -> PortResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(count.max(0) as usize)
    }

    async fn save_user_message(&self, session_id: i64, content: &str) -> PortResult<ChatMessage> {
        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO chat_messages (session_id, content, is_assistant) VALUES ($1, $2, FALSE)
             RETURNING id, session_id, content, is_assistant, created_at",
        )
        .bind(session_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn complete_exchange(
        &self,
        session_id: i64,
        assistant_content: &str,
        title: Option<&str>,
    ) -> PortResult<ChatMessage> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let record = sqlx::query_as::<_, MessageRecord>(
            "INSERT INTO chat_messages (session_id, content, is_assistant) VALUES ($1, $2, TRUE)
             RETURNING id, session_id, content, is_assistant, created_at",
        )
        .bind(session_id)
        .bind(assistant_content)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        sqlx::query(
            "UPDATE chat_sessions SET last_message_at = NOW(), title = COALESCE($2, title)
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(title)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn create_exercise(&self, section_id: i64, generation_params: Value) -> PortResult<Exercise> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO exercises (section_id, status, generation_params)
             VALUES ($1, 'generating', $2) RETURNING id",
        )
        .bind(section_id)
        .bind(&generation_params)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        self.fetch_exercise(id).await
    }

    async fn finish_exercise(
        &self,
        exercise_id: i64,
        questions: &[GeneratedQuestion],
        source_documents: &[i64],
    ) -> PortResult<Exercise> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        sqlx::query("DELETE FROM questions WHERE exercise_id = $1")
            .bind(exercise_id)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        for question in questions {
            insert_question(&mut tx, exercise_id, question)
                .await
                .map_err(unexpected)?;
        }

        let result = sqlx::query(
            "UPDATE exercises SET status = 'pending', source_documents = $2 WHERE id = $1",
        )
        .bind(exercise_id)
        .bind(source_documents)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Exercise {} not found", exercise_id)));
        }

        tx.commit().await.map_err(unexpected)?;
        self.fetch_exercise(exercise_id).await
    }

    async fn set_exercise_status(&self, exercise_id: i64, status: ExerciseStatus) -> PortResult<()> {
        let result = sqlx::query("UPDATE exercises SET status = $2 WHERE id = $1")
            .bind(exercise_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Exercise {} not found", exercise_id)));
        }
        Ok(())
    }

    async fn list_student_submissions(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<SubmissionSummary>> {
        let records = sqlx::query_as::<_, SubmissionRecord>(
            "SELECT es.exercise_id, es.score, es.total_points, es.answers
             FROM exercise_submissions es
             JOIN exercises e ON e.id = es.exercise_id
             WHERE e.section_id = $1 AND es.student_id = $2
             ORDER BY es.submitted_at, es.id",
        )
        .bind(section_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(SubmissionRecord::to_domain).collect())
    }

    async fn list_student_chat_messages(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<ChatMessage>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT m.id, m.session_id, m.content, m.is_assistant, m.created_at
             FROM chat_messages m
             JOIN chat_sessions s ON s.id = m.session_id
             WHERE s.section_id = $1 AND s.user_id = $2
             ORDER BY m.created_at, m.id",
        )
        .bind(section_id)
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(MessageRecord::to_domain).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_record(status: &str, document_type: &str) -> DocumentRecord {
        DocumentRecord {
            id: 4,
            section_id: 10,
            original_filename: "cours.pdf".into(),
            file_path: "10/cours.pdf".into(),
            document_type: document_type.into(),
            status: status.into(),
            extracted_text: None,
            is_vectorized: false,
            vector_count: -1,
            processing_error: None,
        }
    }

    #[test]
    fn role_spellings_are_normalized() {
        let user = UserRecord {
            id: 1,
            full_name: "Marie Curie".into(),
            email: "marie@example.org".into(),
            role: "UserRole.TEACHER".into(),
        };
        assert_eq!(user.to_domain().unwrap().role, Role::Teacher);

        let unknown = UserRecord {
            id: 2,
            full_name: "X".into(),
            email: "x@example.org".into(),
            role: "guest".into(),
        };
        assert!(matches!(unknown.to_domain(), Err(PortError::Unexpected(_))));
    }

    #[test]
    fn document_columns_map_to_domain() {
        let document = document_record("processed", "pdf").to_domain().unwrap();
        assert_eq!(document.status, DocumentStatus::Processed);
        assert_eq!(document.document_type, DocumentType::Pdf);
        assert_eq!(document.vector_count, 0);
        assert_eq!(document.file_path, PathBuf::from("10/cours.pdf"));

        assert!(document_record("archived", "pdf").to_domain().is_err());
    }

    #[test]
    fn stored_questions_keep_their_type_fields() {
        let record = QuestionRecord {
            question_text: "Que renvoie len([1, 2])?".into(),
            question_type: "mcq".into(),
            options: Some(Json(vec!["1".into(), "2".into()])),
            correct_answer: Some("2".into()),
            expected_keywords: None,
            explanation: String::new(),
            points: 0,
            order_index: 3,
        };
        let question = record.to_domain().unwrap();
        assert_eq!(question.question_type, QuestionType::Mcq);
        assert_eq!(question.options.as_deref(), Some(&["1".to_string(), "2".to_string()][..]));
        assert_eq!(question.points, 1);
        assert_eq!(question.order_index, 3);
    }

    #[test]
    fn submission_answers_keep_their_order() {
        let record = SubmissionRecord {
            exercise_id: 7,
            score: 1.5,
            total_points: 3,
            answers: Json(vec![
                StoredAnswer {
                    question_id: 31,
                    answer: "range".into(),
                },
                StoredAnswer {
                    question_id: 30,
                    answer: "for".into(),
                },
            ]),
        };
        let summary = record.to_domain();
        assert_eq!(summary.answers, vec![(31, "range".to_string()), (30, "for".to_string())]);
        assert_eq!(summary.total_points, 3);
        assert_eq!(parse_exercise_status("pending").unwrap(), ExerciseStatus::Pending);
    }
}

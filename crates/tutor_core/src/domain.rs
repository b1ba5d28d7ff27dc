//! crates/tutor_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization backend;
//! serde derives exist only for the wire shapes the boundary exposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

//=========================================================================================
// Users and Sections
//=========================================================================================

/// The canonical role of a user. Raw role strings are normalized once, at the
/// persistence boundary, so the core never compares strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    /// Maps every spelling seen in stored data (`"teacher"`, `"TEACHER"`,
    /// `"UserRole.TEACHER"`, `"enseignant"`, ...) to one variant.
    pub fn normalize(raw: &str) -> Option<Self> {
        let lowered = raw.trim().to_lowercase();
        let name = lowered.rsplit('.').next().unwrap_or(&lowered);
        match name {
            "admin" | "administrator" | "administrateur" => Some(Self::Admin),
            "teacher" | "enseignant" | "professeur" => Some(Self::Teacher),
            "student" | "etudiant" | "étudiant" => Some(Self::Student),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
            Self::Student => "student",
        }
    }
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    pub role: Role,
}

/// A course section. Each section owns at most one vector collection, named at
/// creation time.
#[derive(Debug, Clone)]
pub struct Section {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub teacher_id: i64,
    pub collection_name: Option<String>,
}

impl Section {
    /// The lightweight context handed to the relevance gate.
    pub fn relevance_context(&self) -> String {
        format!(
            "Nom de la section: {}. Description: {}",
            self.name,
            self.description.as_deref().unwrap_or("")
        )
    }

    /// The query used to bias retrieval towards the section's overall topic.
    pub fn topic_query(&self) -> String {
        format!("{} {}", self.name, self.description.as_deref().unwrap_or(""))
    }
}

//=========================================================================================
// Documents and Chunks
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Pdf,
    Docx,
    Pptx,
    Txt,
    Md,
}

impl DocumentType {
    /// Unknown extensions are treated as plain text.
    pub fn from_extension(ext: &str) -> Self {
        match ext.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "docx" => Self::Docx,
            "pptx" => Self::Pptx,
            "md" => Self::Md,
            _ => Self::Txt,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Pptx => "pptx",
            Self::Txt => "txt",
            Self::Md => "md",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Error,
}

#[derive(Debug, Clone)]
pub struct Document {
    pub id: i64,
    pub section_id: i64,
    pub original_filename: String,
    pub file_path: PathBuf,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
    pub extracted_text: Option<String>,
    pub is_vectorized: bool,
    pub vector_count: usize,
    pub processing_error: Option<String>,
}

/// A state transition recorded while a document is processed.
#[derive(Debug, Clone)]
pub enum DocumentProcessing {
    Started,
    Completed {
        extracted_text: String,
        vector_count: usize,
        is_vectorized: bool,
    },
    Failed {
        message: String,
    },
}

/// Deterministic key of a document's `index`-th chunk, so a re-index can
/// replace by id set.
pub fn chunk_id(document_id: i64, index: usize) -> String {
    format!("{}_{}", document_id, index)
}

//=========================================================================================
// Chat
//=========================================================================================

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub id: i64,
    pub user_id: i64,
    pub section_id: i64,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub message_count: usize,
}

/// A single persisted chat message. Never mutated after creation.
#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub content: String,
    pub is_assistant: bool,
    pub created_at: DateTime<Utc>,
}

/// The user message and the assistant reply produced by one send.
#[derive(Debug, Clone)]
pub struct ConversationExchange {
    pub user_message: ChatMessage,
    pub assistant_message: ChatMessage,
    /// True when the relevance gate declined the question.
    pub declined: bool,
}

//=========================================================================================
// Exercises
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    Mcq,
    OpenEnded,
    TrueFalse,
    FillBlank,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcq => "mcq",
            Self::OpenEnded => "open_ended",
            Self::TrueFalse => "true_false",
            Self::FillBlank => "fill_blank",
        }
    }

    /// Accepts the canonical names plus the French and English aliases models
    /// tend to produce.
    pub fn from_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "mcq" | "qcm" | "choix_multiple" | "multiple_choice" => Some(Self::Mcq),
            "open_ended" | "ouverte" | "open" | "essay" => Some(Self::OpenEnded),
            "true_false" | "vrai_faux" | "vf" | "boolean" => Some(Self::TrueFalse),
            "fill_blank" | "completer" | "compléter" | "fill" | "blank" => Some(Self::FillBlank),
            _ => None,
        }
    }

    /// Points awarded when the model does not say otherwise.
    pub fn default_points(&self) -> u32 {
        match self {
            Self::OpenEnded => 2,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }

    pub fn from_alias(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "easy" | "facile" | "simple" => Some(Self::Easy),
            "medium" | "moyen" | "normal" => Some(Self::Medium),
            "hard" | "difficile" | "dur" | "complexe" => Some(Self::Hard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleParams {
    pub num_questions: usize,
    #[serde(default)]
    pub difficulty: Difficulty,
    pub question_type: QuestionType,
    #[serde(default)]
    pub document_filter: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedParams {
    pub custom_prompt: String,
    #[serde(default)]
    pub temp_content: Option<String>,
    #[serde(default)]
    pub document_filter: Option<Vec<i64>>,
}

/// Exactly one parameter set per request, enforced by the type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum GenerationMode {
    Simple(SimpleParams),
    Advanced(AdvancedParams),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub section_id: i64,
    #[serde(flatten)]
    pub mode: GenerationMode,
}

/// The subject used when an instruction names no specific topic.
pub const DEFAULT_SUBJECT: &str = "contenu du cours";

/// Parameters derived from a free-form teacher instruction. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractedParameters {
    pub count: usize,
    pub question_type: QuestionType,
    pub subject: String,
    pub difficulty: Difficulty,
}

impl ExtractedParameters {
    pub fn has_specific_subject(&self) -> bool {
        !self.subject.trim().is_empty() && self.subject != DEFAULT_SUBJECT
    }
}

/// A validated question. The optional fields present are exactly those the
/// question type requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub text: String,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_keywords: Option<Vec<String>>,
    pub explanation: String,
    pub points: u32,
    #[serde(skip)]
    pub order_index: usize,
}

/// Result of the generation pipeline: validated model output, or deterministic
/// placeholders flagged for teacher review.
#[derive(Debug, Clone, PartialEq)]
pub enum ExerciseGenerationOutcome {
    Generated(Vec<GeneratedQuestion>),
    Fallback(Vec<GeneratedQuestion>),
}

impl ExerciseGenerationOutcome {
    pub fn questions(&self) -> &[GeneratedQuestion] {
        match self {
            Self::Generated(q) | Self::Fallback(q) => q,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExerciseStatus {
    Generating,
    Pending,
    Validated,
}

impl ExerciseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Pending => "pending",
            Self::Validated => "validated",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Exercise {
    pub id: i64,
    pub section_id: i64,
    pub status: ExerciseStatus,
    pub generation_params: serde_json::Value,
    pub source_documents: Vec<i64>,
    pub questions: Vec<GeneratedQuestion>,
    pub created_at: DateTime<Utc>,
}

/// A student's graded submission, as read for the analysis prompt.
#[derive(Debug, Clone)]
pub struct SubmissionSummary {
    pub exercise_id: i64,
    pub score: f64,
    pub total_points: u32,
    /// `(question id, answer)` pairs in question order.
    pub answers: Vec<(i64, String)>,
}

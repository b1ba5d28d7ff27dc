//! crates/tutor_core/src/generation/service.rs
//!
//! The exercise-generation use case: validates the request, selects course
//! content, runs the structured generator and moves the exercise through
//! `Generating -> Pending`. An exercise is never left in `Generating`, even
//! when the caller stops polling mid-generation.

use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

use super::params::{ParameterExtractor, MAX_QUESTIONS, MIN_QUESTIONS};
use super::{GenerationConfig, GenerationJob, StructuredGenerator};
use crate::chunker::TextChunker;
use crate::domain::{
    AdvancedParams, Exercise, ExerciseGenerationOutcome, ExerciseStatus, ExtractedParameters,
    GenerationMode, GenerationRequest, Role, Section, SimpleParams, User,
};
use crate::error::{CoreError, CoreResult};
use crate::llm::LanguageModelClient;
use crate::ports::{DatabaseService, MetadataFilter, VectorIndex};
use crate::retrieval::retrieve_or_empty;

/// Chunks joined into the prompt in simple mode and for subject-filtered content.
const PROMPT_CHUNKS: usize = 10;
/// Chunks joined into the prompt in advanced mode without a subject match.
const ADVANCED_PROMPT_CHUNKS: usize = 15;
/// Chunks taken from each document when the vector index yields nothing.
const CHUNKS_PER_DOCUMENT: usize = 3;
/// Characters of temporary content recorded in the generation parameters.
const RECORDED_TEMP_CONTENT_CHARS: usize = 500;

/// The result handed back to the boundary.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub exercise: Exercise,
    /// True when the questions are review-flagged placeholders.
    pub used_fallback: bool,
    /// Parameters derived from the instruction, in advanced mode.
    pub extracted: Option<ExtractedParameters>,
}

#[derive(Debug, Clone)]
struct ContentChunk {
    text: String,
    document_id: Option<i64>,
}

struct Selection {
    outcome: ExerciseGenerationOutcome,
    source_documents: Vec<i64>,
    extracted: Option<ExtractedParameters>,
}

/// Releases a section's generation slot when dropped.
struct InFlightGuard {
    sections: Arc<Mutex<HashSet<i64>>>,
    section_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut sections = self.sections.lock().unwrap_or_else(|e| e.into_inner());
        sections.remove(&self.section_id);
    }
}

/// Moves an exercise back to `Pending` if the generation future is dropped
/// before it finishes, e.g. on client disconnect or timeout.
struct PendingOnDrop {
    db: Arc<dyn DatabaseService>,
    exercise_id: Option<i64>,
}

impl PendingOnDrop {
    fn new(db: Arc<dyn DatabaseService>, exercise_id: i64) -> Self {
        Self {
            db,
            exercise_id: Some(exercise_id),
        }
    }

    fn disarm(&mut self) {
        self.exercise_id = None;
    }
}

impl Drop for PendingOnDrop {
    fn drop(&mut self) {
        let Some(exercise_id) = self.exercise_id.take() else {
            return;
        };
        warn!("Generation of exercise {} was interrupted", exercise_id);
        let db = self.db.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = db.set_exercise_status(exercise_id, ExerciseStatus::Pending).await {
                        error!("Could not move exercise {} to pending: {}", exercise_id, e);
                    }
                });
            }
            Err(_) => error!("No runtime left to move exercise {} to pending", exercise_id),
        }
    }
}

pub struct ExerciseService {
    db: Arc<dyn DatabaseService>,
    index: Option<Arc<dyn VectorIndex>>,
    generator: StructuredGenerator,
    extractor: ParameterExtractor,
    chunker: TextChunker,
    in_flight: Arc<Mutex<HashSet<i64>>>,
}

fn validate(request: &GenerationRequest) -> CoreResult<()> {
    match &request.mode {
        GenerationMode::Simple(params) => {
            if !(MIN_QUESTIONS..=MAX_QUESTIONS).contains(&params.num_questions) {
                return Err(CoreError::InvalidRequest(format!(
                    "num_questions must be between {} and {}",
                    MIN_QUESTIONS, MAX_QUESTIONS
                )));
            }
        }
        GenerationMode::Advanced(params) => {
            if params.custom_prompt.trim().is_empty() {
                return Err(CoreError::InvalidRequest(
                    "custom_prompt must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}

/// What gets stored on the exercise to describe how it was produced.
fn recorded_params(request: &GenerationRequest) -> Value {
    match &request.mode {
        GenerationMode::Simple(p) => json!({
            "mode": "simple",
            "num_questions": p.num_questions,
            "difficulty": p.difficulty.as_str(),
            "question_type": p.question_type.as_str(),
            "document_filter": p.document_filter,
        }),
        GenerationMode::Advanced(p) => json!({
            "mode": "advanced",
            "custom_prompt": p.custom_prompt,
            "temp_content": p
                .temp_content
                .as_ref()
                .map(|t| t.chars().take(RECORDED_TEMP_CONTENT_CHARS).collect::<String>()),
            "document_filter": p.document_filter,
        }),
    }
}

fn join_texts<'a>(chunks: impl Iterator<Item = &'a ContentChunk>) -> String {
    chunks.map(|c| c.text.as_str()).collect::<Vec<_>>().join("\n\n")
}

fn source_documents<'a>(chunks: impl Iterator<Item = &'a ContentChunk>) -> Vec<i64> {
    let mut seen = HashSet::new();
    chunks
        .filter_map(|c| c.document_id)
        .filter(|id| seen.insert(*id))
        .collect()
}

impl ExerciseService {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        index: Option<Arc<dyn VectorIndex>>,
        llm: LanguageModelClient,
        config: GenerationConfig,
        chunker: TextChunker,
    ) -> Self {
        Self {
            db,
            index,
            extractor: ParameterExtractor::new(llm.clone()),
            generator: StructuredGenerator::new(llm, config),
            chunker,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn claim(&self, section_id: i64) -> CoreResult<InFlightGuard> {
        let mut sections = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !sections.insert(section_id) {
            return Err(CoreError::GenerationInProgress { section_id });
        }
        Ok(InFlightGuard {
            sections: self.in_flight.clone(),
            section_id,
        })
    }

    /// Generates an exercise for a section. Only the section's teacher (or an
    /// admin) may do so, and only one generation per section runs at a time.
    pub async fn generate(&self, user: &User, request: GenerationRequest) -> CoreResult<GenerationReport> {
        validate(&request)?;

        let section = self.db.get_section(request.section_id).await?;
        if section.teacher_id != user.id && user.role != Role::Admin {
            return Err(CoreError::NotAuthorized);
        }

        let _guard = self.claim(section.id)?;

        let exercise = self.db.create_exercise(section.id, recorded_params(&request)).await?;
        info!("Created exercise {} for section {}", exercise.id, section.id);
        let mut interrupted = PendingOnDrop::new(self.db.clone(), exercise.id);

        let selection = match self.run(&section, &request.mode).await {
            Ok(selection) => selection,
            Err(e) => {
                error!("Generation for exercise {} failed: {}", exercise.id, e);
                self.release_to_pending(exercise.id).await;
                interrupted.disarm();
                return Err(e);
            }
        };

        let used_fallback = selection.outcome.is_fallback();
        let exercise = match self
            .db
            .finish_exercise(exercise.id, selection.outcome.questions(), &selection.source_documents)
            .await
        {
            Ok(exercise) => exercise,
            Err(e) => {
                error!("Could not store questions of exercise {}: {}", exercise.id, e);
                self.release_to_pending(exercise.id).await;
                interrupted.disarm();
                return Err(e.into());
            }
        };
        interrupted.disarm();

        info!(
            "Exercise {} ready with {} questions (fallback: {})",
            exercise.id,
            exercise.questions.len(),
            used_fallback
        );
        Ok(GenerationReport {
            exercise,
            used_fallback,
            extracted: selection.extracted,
        })
    }

    async fn release_to_pending(&self, exercise_id: i64) {
        if let Err(e) = self.db.set_exercise_status(exercise_id, ExerciseStatus::Pending).await {
            error!("Could not move exercise {} to pending: {}", exercise_id, e);
        }
    }

    async fn run(&self, section: &Section, mode: &GenerationMode) -> CoreResult<Selection> {
        match mode {
            GenerationMode::Simple(params) => self.run_simple(section, params).await,
            GenerationMode::Advanced(params) => self.run_advanced(section, params).await,
        }
    }

    async fn run_simple(&self, section: &Section, params: &SimpleParams) -> CoreResult<Selection> {
        let wanted = params.num_questions * self.generator.config().simple_chunk_factor;
        let chunks = self
            .select_content(section, wanted, params.document_filter.as_deref())
            .await?;
        let used = &chunks[..chunks.len().min(PROMPT_CHUNKS)];
        let content = join_texts(used.iter());

        let job = GenerationJob {
            section_name: &section.name,
            content: &content,
            count: params.num_questions,
            question_type: params.question_type,
            difficulty: params.difficulty,
            subject: None,
        };
        Ok(Selection {
            outcome: self.generator.generate(&job).await,
            source_documents: source_documents(used.iter()),
            extracted: None,
        })
    }

    async fn run_advanced(&self, section: &Section, params: &AdvancedParams) -> CoreResult<Selection> {
        let extracted = self.extractor.extract(&params.custom_prompt).await;

        let temp_content = params
            .temp_content
            .as_deref()
            .filter(|t| !t.trim().is_empty());

        let (content, sources) = match temp_content {
            Some(temp) => {
                info!("Using {} chars of temporary content", temp.len());
                (temp.to_string(), Vec::new())
            }
            None => {
                let chunks = self
                    .select_content(
                        section,
                        self.generator.config().advanced_chunk_count,
                        params.document_filter.as_deref(),
                    )
                    .await?;
                let used = self.focus_on_subject(&chunks, &extracted);
                (join_texts(used.iter().copied()), source_documents(used.iter().copied()))
            }
        };

        let subject = extracted
            .has_specific_subject()
            .then_some(extracted.subject.as_str());
        let job = GenerationJob {
            section_name: &section.name,
            content: &content,
            count: extracted.count,
            question_type: extracted.question_type,
            difficulty: extracted.difficulty,
            subject,
        };
        let outcome = self.generator.generate(&job).await;
        Ok(Selection {
            outcome,
            source_documents: sources,
            extracted: Some(extracted),
        })
    }

    /// Chunks mentioning any subject keyword, or the leading chunks when the
    /// subject is generic or matches nothing.
    fn focus_on_subject<'a>(
        &self,
        chunks: &'a [ContentChunk],
        extracted: &ExtractedParameters,
    ) -> Vec<&'a ContentChunk> {
        if extracted.has_specific_subject() {
            let subject = extracted.subject.to_lowercase();
            let keywords: Vec<&str> = subject.split_whitespace().collect();
            let matching: Vec<&ContentChunk> = chunks
                .iter()
                .filter(|c| {
                    let text = c.text.to_lowercase();
                    keywords.iter().any(|k| text.contains(k))
                })
                .take(PROMPT_CHUNKS)
                .collect();
            if !matching.is_empty() {
                info!("{} chunks match subject '{}'", matching.len(), extracted.subject);
                return matching;
            }
            warn!("No chunk matches subject '{}', using all content", extracted.subject);
        }
        chunks.iter().take(ADVANCED_PROMPT_CHUNKS).collect()
    }

    /// Retrieval biased by the section topic, falling back to the documents'
    /// stored text. No content at all is a request error.
    async fn select_content(
        &self,
        section: &Section,
        k: usize,
        document_filter: Option<&[i64]>,
    ) -> CoreResult<Vec<ContentChunk>> {
        let document_filter = document_filter.filter(|ids| !ids.is_empty());
        let metadata_filter = document_filter.map(MetadataFilter::documents);

        let hits = retrieve_or_empty(
            self.index.as_ref(),
            section.collection_name.as_deref(),
            &section.topic_query(),
            k,
            metadata_filter.as_ref(),
        )
        .await;

        let chunks: Vec<ContentChunk> = if hits.is_empty() {
            warn!("No indexed content for section {}, reading documents directly", section.id);
            self.content_from_documents(section, document_filter).await?
        } else {
            hits.into_iter()
                .map(|hit| ContentChunk {
                    document_id: hit.document_id(),
                    text: hit.text,
                })
                .collect()
        };

        if chunks.is_empty() {
            return Err(CoreError::InvalidRequest(
                "No content found for exercise generation".to_string(),
            ));
        }
        info!("Selected {} content chunks for section {}", chunks.len(), section.id);
        Ok(chunks)
    }

    async fn content_from_documents(
        &self,
        section: &Section,
        document_filter: Option<&[i64]>,
    ) -> CoreResult<Vec<ContentChunk>> {
        let documents = self.db.list_section_documents(section.id).await?;
        Ok(documents
            .iter()
            .filter(|d| document_filter.map_or(true, |ids| ids.contains(&d.id)))
            .filter_map(|d| Some((d.id, d.extracted_text.as_deref().filter(|t| !t.trim().is_empty())?)))
            .flat_map(|(id, text)| {
                self.chunker
                    .chunk(text)
                    .into_iter()
                    .take(CHUNKS_PER_DOCUMENT)
                    .map(move |text| ContentChunk {
                        text,
                        document_id: Some(id),
                    })
            })
            .collect())
    }
}

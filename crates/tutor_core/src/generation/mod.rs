//! crates/tutor_core/src/generation/mod.rs
//!
//! Schema-constrained question generation. The `StructuredGenerator` owns the
//! bounded retry loop; `ExerciseService` wraps it with content selection,
//! parameter extraction and the exercise lifecycle.

pub mod fallback;
pub mod params;
pub mod parse;
pub mod prompts;
pub mod service;

use std::time::Duration;
use tracing::{info, warn};

use crate::domain::{Difficulty, ExerciseGenerationOutcome, QuestionType};
use crate::llm::LanguageModelClient;

pub use service::{ExerciseService, GenerationReport};

#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub max_attempts: usize,
    /// Fixed pause between failed attempts.
    pub backoff: Duration,
    /// Simple mode retrieves `num_questions * simple_chunk_factor` chunks.
    pub simple_chunk_factor: usize,
    pub advanced_chunk_count: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
            simple_chunk_factor: 3,
            advanced_chunk_count: 20,
        }
    }
}

/// One generation run: what to ask for and the content to base it on.
#[derive(Debug, Clone)]
pub struct GenerationJob<'a> {
    pub section_name: &'a str,
    pub content: &'a str,
    pub count: usize,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    /// When set, the prompt restricts questions to this subject.
    pub subject: Option<&'a str>,
}

impl GenerationJob<'_> {
    fn prompts(&self) -> (String, String) {
        let system = prompts::system_prompt(self.section_name, self.question_type, self.difficulty);
        let user = match self.subject {
            Some(subject) => prompts::user_prompt_with_subject(
                self.content,
                self.count,
                self.question_type,
                self.difficulty,
                subject,
            ),
            None => prompts::user_prompt(self.content, self.count, self.question_type, self.difficulty),
        };
        (system, user)
    }
}

#[derive(Clone)]
pub struct StructuredGenerator {
    llm: LanguageModelClient,
    config: GenerationConfig,
}

impl StructuredGenerator {
    pub fn new(llm: LanguageModelClient, config: GenerationConfig) -> Self {
        Self { llm, config }
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Always yields exactly `job.count` questions: the first attempt with
    /// enough valid items wins, otherwise placeholders are synthesized.
    pub async fn generate(&self, job: &GenerationJob<'_>) -> ExerciseGenerationOutcome {
        let (system, user) = job.prompts();

        for attempt in 1..=self.config.max_attempts {
            info!(
                "Generating {} {} questions, attempt {}/{}",
                job.count,
                job.question_type.as_str(),
                attempt,
                self.config.max_attempts
            );

            match self.llm.try_complete(&user, &[], Some(&system)).await {
                Ok(response) => {
                    let mut questions = parse::extract_json_array(&response)
                        .map(|items| parse::validate_items(&items, job.question_type))
                        .unwrap_or_default();

                    if questions.len() >= job.count {
                        questions.truncate(job.count);
                        for (i, question) in questions.iter_mut().enumerate() {
                            question.order_index = i;
                        }
                        info!("Attempt {} produced {} valid questions", attempt, job.count);
                        return ExerciseGenerationOutcome::Generated(questions);
                    }
                    warn!(
                        "Attempt {} produced {} valid questions out of {}",
                        attempt,
                        questions.len(),
                        job.count
                    );
                }
                Err(e) => warn!("Attempt {} failed: {}", attempt, e),
            }

            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.backoff).await;
            }
        }

        warn!(
            "All {} attempts failed, using {} placeholder questions",
            self.config.max_attempts, job.count
        );
        ExerciseGenerationOutcome::Fallback(fallback::fallback_questions(job.count, job.question_type))
    }
}

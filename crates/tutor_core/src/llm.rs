//! crates/tutor_core/src/llm.rs
//!
//! The `LanguageModelClient`: prompt assembly plus the degradation policy
//! applied on top of a `LanguageModel` backend.
//!
//! Conversational callers use [`LanguageModelClient::complete`], which always
//! returns a renderable string. Callers that need to react to failures (the
//! structured generator, title generation) use [`LanguageModelClient::try_complete`].

use futures::stream;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::ports::{CompletionRequest, LanguageModel, PortError, PortResult, TokenStream};

/// The instruction header used when the caller supplies no system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "Tu es un assistant éducatif pour l'UQAR. Réponds de manière pédagogique et précise. Si tu utilises des informations du contexte, cite tes sources.";

pub const MSG_UNHEALTHY: &str = "Désolé, le service de génération de texte n'est pas accessible. Veuillez vérifier la configuration.";
pub const MSG_MODEL_MISSING: &str = "Désolé, le modèle demandé n'est pas disponible actuellement.";
pub const MSG_BACKEND_ERROR: &str = "Désolé, le service de génération de texte a rencontré une erreur interne.";
pub const MSG_BACKEND_STATUS: &str = "Désolé, je ne peux pas répondre pour le moment. Veuillez réessayer plus tard.";
pub const MSG_READ_TIMEOUT: &str = "Désolé, la génération de réponse a pris trop de temps. Veuillez essayer une question plus courte.";
pub const MSG_CONNECT_TIMEOUT: &str = "Désolé, le service de génération de texte n'est pas accessible actuellement.";
pub const MSG_UNEXPECTED: &str = "Désolé, une erreur s'est produite lors de la génération de la réponse.";

const DEGRADED_MESSAGES: [&str; 7] = [
    MSG_UNHEALTHY,
    MSG_MODEL_MISSING,
    MSG_BACKEND_ERROR,
    MSG_BACKEND_STATUS,
    MSG_READ_TIMEOUT,
    MSG_CONNECT_TIMEOUT,
    MSG_UNEXPECTED,
];

/// The user-facing text substituted for a failed completion.
pub fn degraded_message(err: &PortError) -> &'static str {
    match err {
        PortError::Unavailable(_) => MSG_UNHEALTHY,
        PortError::NotFound(_) => MSG_MODEL_MISSING,
        PortError::Backend { status: 500, .. } => MSG_BACKEND_ERROR,
        PortError::Backend { .. } => MSG_BACKEND_STATUS,
        PortError::ReadTimeout(_) => MSG_READ_TIMEOUT,
        PortError::ConnectTimeout(_) => MSG_CONNECT_TIMEOUT,
        PortError::Unauthorized | PortError::Unexpected(_) => MSG_UNEXPECTED,
    }
}

/// Whether a completion is one of the degraded-service messages.
pub fn is_degraded_message(text: &str) -> bool {
    DEGRADED_MESSAGES.contains(&text.trim())
}

/// Assembles the full prompt: instruction header, numbered context snippets,
/// then the question. The order is fixed.
pub fn build_prompt(system_prompt: Option<&str>, context: &[String], user_prompt: &str) -> String {
    let system = system_prompt.unwrap_or(DEFAULT_SYSTEM_PROMPT);
    let mut prompt = format!("### Instruction:\n{}\n\n", system);

    if !context.is_empty() {
        prompt.push_str("### Contexte:\n");
        for (i, snippet) in context.iter().enumerate() {
            prompt.push_str(&format!("[{}] {}\n", i + 1, snippet));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("### Question:\n{}\n\n### Réponse:\n", user_prompt));
    prompt
}

#[derive(Clone)]
pub struct LanguageModelClient {
    backend: Arc<dyn LanguageModel>,
}

impl LanguageModelClient {
    pub fn new(backend: Arc<dyn LanguageModel>) -> Self {
        Self { backend }
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    /// Direct access for callers that shape the request themselves.
    pub fn backend(&self) -> &Arc<dyn LanguageModel> {
        &self.backend
    }

    pub async fn health_check(&self) -> bool {
        match self.backend.health_check().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Language model health check failed: {}", e);
                false
            }
        }
    }

    /// A single completion with the failure kept visible. An unhealthy backend
    /// short-circuits to `PortError::Unavailable` without a generation call.
    pub async fn try_complete(
        &self,
        prompt: &str,
        context: &[String],
        system_prompt: Option<&str>,
    ) -> PortResult<String> {
        if let Err(e) = self.backend.health_check().await {
            error!("Language model backend is not healthy: {}", e);
            return Err(match e {
                PortError::Unavailable(_) => e,
                other => PortError::Unavailable(other.to_string()),
            });
        }

        let request = CompletionRequest::new(build_prompt(system_prompt, context, prompt));
        debug!("Sending prompt of {} chars to {}", request.prompt.len(), self.model_name());
        self.backend.generate(&request).await
    }

    /// A single completion that never fails: errors become degraded messages.
    pub async fn complete(&self, prompt: &str, system_prompt: Option<&str>) -> String {
        self.complete_with_context(prompt, &[], system_prompt).await
    }

    pub async fn complete_with_context(
        &self,
        prompt: &str,
        context: &[String],
        system_prompt: Option<&str>,
    ) -> String {
        self.try_complete(prompt, context, system_prompt)
            .await
            .unwrap_or_else(|e| {
                error!("Completion failed, returning degraded message: {}", e);
                degraded_message(&e).to_string()
            })
    }

    /// Streams a completion. A stream that cannot be opened yields the degraded
    /// message as its only fragment; failures after that surface as `Err` items
    /// so the caller can refuse to persist a truncated answer.
    pub async fn complete_streaming(
        &self,
        prompt: &str,
        context: &[String],
        system_prompt: Option<&str>,
    ) -> TokenStream {
        let request = CompletionRequest::new(build_prompt(system_prompt, context, prompt));
        match self.backend.generate_stream(&request).await {
            Ok(tokens) => {
                info!("Streaming completion opened on {}", self.model_name());
                tokens
            }
            Err(e) => {
                error!("Failed to open completion stream: {}", e);
                Box::pin(stream::once(async move {
                    Ok(degraded_message(&e).to_string())
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_sections_are_in_fixed_order() {
        let prompt = build_prompt(
            Some("System."),
            &["first".to_string(), "second".to_string()],
            "Why?",
        );
        assert_eq!(
            prompt,
            "### Instruction:\nSystem.\n\n### Contexte:\n[1] first\n[2] second\n\n### Question:\nWhy?\n\n### Réponse:\n"
        );
    }

    #[test]
    fn prompt_without_context_uses_default_header() {
        let prompt = build_prompt(None, &[], "Hello");
        assert!(prompt.starts_with(&format!("### Instruction:\n{}", DEFAULT_SYSTEM_PROMPT)));
        assert!(!prompt.contains("### Contexte"));
        assert!(prompt.ends_with("### Question:\nHello\n\n### Réponse:\n"));
    }

    #[test]
    fn timeouts_map_to_distinct_messages() {
        let read = degraded_message(&PortError::ReadTimeout("ollama".into()));
        let connect = degraded_message(&PortError::ConnectTimeout("ollama".into()));
        assert_ne!(read, connect);
        assert!(is_degraded_message(read));
        assert!(is_degraded_message(connect));
        assert!(!is_degraded_message("La boucle for répète un bloc."));
    }

    #[test]
    fn backend_status_picks_message() {
        let internal = PortError::Backend {
            status: 500,
            message: String::new(),
        };
        let other = PortError::Backend {
            status: 503,
            message: String::new(),
        };
        assert_eq!(degraded_message(&internal), MSG_BACKEND_ERROR);
        assert_eq!(degraded_message(&other), MSG_BACKEND_STATUS);
        assert_eq!(
            degraded_message(&PortError::NotFound("model".into())),
            MSG_MODEL_MISSING
        );
    }
}

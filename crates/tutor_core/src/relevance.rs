//! crates/tutor_core/src/relevance.rs
//!
//! A cheap yes/no pre-check run before a full answer is generated. The gate
//! leans permissive: only an explicit "non" from the model blocks a question.

use std::sync::Arc;
use tracing::{error, info};

use crate::ports::{CompletionRequest, LanguageModel, SamplingOptions};

const RELEVANCE_SYSTEM_PROMPT: &str = "Tu es un système de filtrage pour questions éducatives. \
Ta tâche est de déterminer si une question est pertinente au contexte fourni. \
Réponds UNIQUEMENT par \"oui\" ou \"non\".\n\
- \"oui\" si la question est liée au contexte ou domaine fourni\n\
- \"non\" si la question est complètement hors sujet\n\
En cas de doute, réponds \"oui\".";

pub struct RelevanceGate {
    backend: Arc<dyn LanguageModel>,
}

impl RelevanceGate {
    pub fn new(backend: Arc<dyn LanguageModel>) -> Self {
        Self { backend }
    }

    fn request(query: &str, section_context: &str) -> CompletionRequest {
        CompletionRequest {
            prompt: format!(
                "Contexte: {}\n\nQuestion: {}\n\nCette question est-elle pertinente au contexte fourni? Réponds uniquement par oui ou non.",
                section_context, query
            ),
            system: Some(RELEVANCE_SYSTEM_PROMPT.to_string()),
            options: SamplingOptions {
                temperature: Some(0.1),
                num_predict: Some(10),
                top_p: Some(0.9),
                top_k: Some(40),
            },
        }
    }

    /// Returns `false` only when the reply contains "non". Transport failures
    /// count as relevant.
    pub async fn is_relevant(&self, query: &str, section_context: &str) -> bool {
        let request = Self::request(query, section_context);
        match self.backend.generate(&request).await {
            Ok(reply) => {
                let reply = reply.trim().to_lowercase();
                info!("Relevance check raw response: '{}'", reply);
                !reply.contains("non")
            }
            Err(e) => {
                error!("Relevance check failed, letting the question through: {}", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{PortError, PortResult, TokenStream};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: PortResult<String>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedModel {
        fn new(reply: PortResult<String>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn health_check(&self) -> PortResult<()> {
            Ok(())
        }

        async fn generate(&self, request: &CompletionRequest) -> PortResult<String> {
            self.seen.lock().unwrap().push(request.clone());
            self.reply.clone()
        }

        async fn generate_stream(&self, _request: &CompletionRequest) -> PortResult<TokenStream> {
            Err(PortError::Unexpected("not used".into()))
        }
    }

    async fn verdict(reply: PortResult<String>) -> bool {
        let gate = RelevanceGate::new(ScriptedModel::new(reply));
        gate.is_relevant("Qu'est-ce qu'une boucle?", "Nom de la section: Python").await
    }

    #[tokio::test]
    async fn explicit_no_blocks() {
        assert!(!verdict(Ok("Non.".to_string())).await);
        assert!(!verdict(Ok("  NON ".to_string())).await);
    }

    #[tokio::test]
    async fn anything_else_is_relevant() {
        assert!(verdict(Ok("oui".to_string())).await);
        assert!(verdict(Ok("Peut-être".to_string())).await);
        assert!(verdict(Ok(String::new())).await);
    }

    #[tokio::test]
    async fn transport_errors_are_permissive() {
        assert!(verdict(Err(PortError::ReadTimeout("ollama".into()))).await);
        assert!(verdict(Err(PortError::Unavailable("refused".into()))).await);
        assert!(verdict(Err(PortError::Backend {
            status: 500,
            message: "boom".into()
        }))
        .await);
    }

    #[tokio::test]
    async fn request_is_constrained() {
        let model = ScriptedModel::new(Ok("oui".to_string()));
        let gate = RelevanceGate::new(model.clone());
        gate.is_relevant("Q", "Nom de la section: Réseaux. Description: TCP").await;

        let seen = model.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].options.temperature, Some(0.1));
        assert_eq!(seen[0].options.num_predict, Some(10));
        assert!(seen[0].system.is_some());
        assert!(seen[0].prompt.starts_with("Contexte: Nom de la section: Réseaux"));
    }
}

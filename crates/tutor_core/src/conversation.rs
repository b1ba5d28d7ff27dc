//! crates/tutor_core/src/conversation.rs
//!
//! The retrieval-augmented chat engine. One message send walks
//! `Received -> ContextRetrieved -> RelevanceChecked -> Answered | Declined -> Persisted`.
//!
//! The user message is persisted before anything else runs. The assistant
//! message, the session's last activity and an optional title are written
//! together once the answer is complete; a streamed answer that is cut short
//! is never written.

use futures::{Stream, StreamExt};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::domain::{ChatMessage, ChatSession, ConversationExchange, Section, User};
use crate::error::{CoreError, CoreResult};
use crate::llm::LanguageModelClient;
use crate::ports::{DatabaseService, VectorIndex};
use crate::relevance::RelevanceGate;
use crate::retrieval::retrieve_or_empty;

/// Chunks of context retrieved per message.
pub const CONTEXT_TOP_K: usize = 3;

/// A title is derived while the session holds at most this many messages,
/// counting the reply being written.
pub const TITLE_MESSAGE_THRESHOLD: usize = 2;

pub const DECLINE_MESSAGE: &str = "Désolé, cette question ne semble pas liée au sujet de cette section.";

pub const DEFAULT_TITLE: &str = "Conversation";

const TITLE_MAX_WORDS: usize = 6;
const TITLE_MAX_CHARS: usize = 60;

const TITLE_SYSTEM_PROMPT: &str = "Tu es un générateur de titres. \
À partir de la question de l'utilisateur, réponds uniquement par un court titre de six mots maximum décrivant son sujet. \
N'ajoute pas de ponctuation et ne produis aucune phrase.";

/// Reduces a raw model reply to a session title: first line, first six
/// words, trailing sentence punctuation removed, at most 60 characters.
pub fn clean_title(raw: &str) -> String {
    let first_line = raw.trim().lines().next().unwrap_or("");
    let words: Vec<&str> = first_line.split_whitespace().take(TITLE_MAX_WORDS).collect();
    let joined = words.join(" ");
    let cleaned = joined.trim().trim_end_matches(['.', '?', '!']);
    if cleaned.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    cleaned.chars().take(TITLE_MAX_CHARS).collect()
}

/// Events emitted by a streamed send, in order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    UserMessage { id: i64, content: String },
    AssistantStart,
    AssistantChunk { content: String },
    AssistantMessage { id: i64, content: String, declined: bool },
    Error { message: String },
}

pub type ChatEventStream = Pin<Box<dyn Stream<Item = ChatEvent> + Send>>;

#[derive(Clone)]
pub struct ConversationEngine {
    db: Arc<dyn DatabaseService>,
    index: Option<Arc<dyn VectorIndex>>,
    llm: LanguageModelClient,
    gate: Arc<RelevanceGate>,
}

impl ConversationEngine {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        index: Option<Arc<dyn VectorIndex>>,
        llm: LanguageModelClient,
    ) -> Self {
        let gate = Arc::new(RelevanceGate::new(llm.backend().clone()));
        Self {
            db,
            index,
            llm,
            gate,
        }
    }

    //=====================================================================================
    // Sessions
    //=====================================================================================

    pub async fn create_session(&self, user: &User, section_id: i64) -> CoreResult<ChatSession> {
        let section = self.db.get_section(section_id).await?;
        let session = self.db.create_chat_session(user.id, section.id).await?;
        info!("Created chat session {} for user {} in section {}", session.id, user.id, section.id);
        Ok(session)
    }

    pub async fn list_sessions(&self, user: &User) -> CoreResult<Vec<ChatSession>> {
        Ok(self.db.list_user_sessions(user.id).await?)
    }

    async fn owned_session(&self, user: &User, session_id: i64) -> CoreResult<ChatSession> {
        let session = self.db.get_chat_session(session_id).await?;
        if session.user_id != user.id {
            warn!("User {} tried to access session {} of user {}", user.id, session_id, session.user_id);
            return Err(CoreError::NotAuthorized);
        }
        Ok(session)
    }

    pub async fn session_messages(&self, user: &User, session_id: i64) -> CoreResult<Vec<ChatMessage>> {
        let session = self.owned_session(user, session_id).await?;
        Ok(self.db.list_session_messages(session.id).await?)
    }

    pub async fn delete_session(&self, user: &User, session_id: i64) -> CoreResult<()> {
        let session = self.owned_session(user, session_id).await?;
        self.db.delete_chat_session(session.id).await?;
        info!("Deleted chat session {}", session.id);
        Ok(())
    }

    //=====================================================================================
    // Message Pipeline
    //=====================================================================================

    /// Ownership and section checks, then the user message is stored.
    async fn receive(
        &self,
        user: &User,
        session_id: i64,
        content: &str,
    ) -> CoreResult<(ChatSession, Section, ChatMessage)> {
        if content.trim().is_empty() {
            return Err(CoreError::InvalidRequest("message content is empty".to_string()));
        }
        let session = self.owned_session(user, session_id).await?;
        let section = self.db.get_section(session.section_id).await?;
        let user_message = self.db.save_user_message(session.id, content).await?;
        Ok((session, section, user_message))
    }

    async fn retrieve_context(&self, section: &Section, content: &str) -> Vec<String> {
        retrieve_or_empty(
            self.index.as_ref(),
            section.collection_name.as_deref(),
            content,
            CONTEXT_TOP_K,
            None,
        )
        .await
        .into_iter()
        .map(|hit| hit.text)
        .collect()
    }

    async fn is_relevant(&self, section: &Section, content: &str) -> bool {
        self.gate.is_relevant(content, &section.relevance_context()).await
    }

    /// Best effort: any failure leaves the title untouched.
    async fn title_for(&self, session: &ChatSession, question: &str) -> Option<String> {
        let count = match self.db.count_session_messages(session.id).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Could not count messages of session {}: {}", session.id, e);
                return None;
            }
        };
        if count + 1 > TITLE_MESSAGE_THRESHOLD {
            return None;
        }
        match self.llm.try_complete(question, &[], Some(TITLE_SYSTEM_PROMPT)).await {
            Ok(raw) => Some(clean_title(&raw)),
            Err(e) => {
                warn!("Title generation failed for session {}: {}", session.id, e);
                None
            }
        }
    }

    /// Sends a message and waits for the whole answer.
    pub async fn send_message(
        &self,
        user: &User,
        session_id: i64,
        content: &str,
    ) -> CoreResult<ConversationExchange> {
        let (session, section, user_message) = self.receive(user, session_id, content).await?;

        let context = self.retrieve_context(&section, content).await;

        if !self.is_relevant(&section, content).await {
            info!("Question declined as off-topic in session {}", session.id);
            let assistant_message = self.db.complete_exchange(session.id, DECLINE_MESSAGE, None).await?;
            return Ok(ConversationExchange {
                user_message,
                assistant_message,
                declined: true,
            });
        }

        let answer = self.llm.complete_with_context(content, &context, None).await;
        let title = self.title_for(&session, content).await;
        let assistant_message = self
            .db
            .complete_exchange(session.id, &answer, title.as_deref())
            .await?;

        info!(
            "Answered message {} in session {} ({} context chunks)",
            user_message.id,
            session.id,
            context.len()
        );
        Ok(ConversationExchange {
            user_message,
            assistant_message,
            declined: false,
        })
    }

    /// Sends a message and streams the answer as it is generated.
    ///
    /// Ownership is checked and the user message stored before the stream is
    /// returned. The assistant message is stored only after the model stream
    /// is drained without error; dropping the returned stream early, or a
    /// failure mid-stream, stores nothing.
    pub async fn send_message_streaming(
        &self,
        user: &User,
        session_id: i64,
        content: &str,
    ) -> CoreResult<ChatEventStream> {
        let (session, section, user_message) = self.receive(user, session_id, content).await?;
        let engine = self.clone();
        let content = content.to_string();

        let events = async_stream::stream! {
            yield ChatEvent::UserMessage {
                id: user_message.id,
                content: user_message.content.clone(),
            };

            let context = engine.retrieve_context(&section, &content).await;

            if !engine.is_relevant(&section, &content).await {
                info!("Question declined as off-topic in session {}", session.id);
                match engine.db.complete_exchange(session.id, DECLINE_MESSAGE, None).await {
                    Ok(message) => {
                        yield ChatEvent::AssistantMessage {
                            id: message.id,
                            content: message.content,
                            declined: true,
                        };
                    }
                    Err(e) => {
                        error!("Failed to store decline message: {}", e);
                        yield ChatEvent::Error { message: e.to_string() };
                    }
                }
                return;
            }

            yield ChatEvent::AssistantStart;

            let mut tokens = engine.llm.complete_streaming(&content, &context, None).await;
            let mut answer = String::new();
            while let Some(token) = tokens.next().await {
                match token {
                    Ok(fragment) => {
                        answer.push_str(&fragment);
                        yield ChatEvent::AssistantChunk { content: fragment };
                    }
                    Err(e) => {
                        error!("Answer stream failed in session {}: {}", session.id, e);
                        yield ChatEvent::Error { message: e.to_string() };
                        return;
                    }
                }
            }

            let title = engine.title_for(&session, &content).await;
            match engine.db.complete_exchange(session.id, &answer, title.as_deref()).await {
                Ok(message) => {
                    yield ChatEvent::AssistantMessage {
                        id: message.id,
                        content: message.content,
                        declined: false,
                    };
                }
                Err(e) => {
                    error!("Failed to store streamed answer: {}", e);
                    yield ChatEvent::Error { message: e.to_string() };
                }
            }
        };

        Ok(Box::pin(events))
    }
}

//! One conversational turn, end to end
//!
//! `generate_ai_response` only fails on empty input. Every downstream fault
//! (model, upload, tool) is absorbed into a degraded but valid reply, and
//! the reply is recorded in history either way.

use crate::compose::compose;
use crate::conversation::{ConversationId, ConversationStore};
use crate::intent::{self, Intent};
use crate::llm::LlmService;
use crate::prompt::{ImageAttachment, PromptAssembler, PromptPayload};
use crate::tools::{
    ConnectionState, ImageHost, ToolArguments, ToolCallResult, ToolFailureReason, ToolGateway,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{Mutex as TurnMutex, OwnedMutexGuard};

/// Reply when the model call fails
pub const MODEL_FAILURE_REPLY: &str =
    "Desculpe, não consegui processar sua solicitação no momento. Tente novamente mais tarde.";

/// Reply when the model answers with nothing
pub const EMPTY_REPLY_FALLBACK: &str =
    "Desculpe, não consegui gerar uma resposta desta vez. Pode reformular a pergunta?";

/// Name used in the technical section when an image turn has no better one
const IMAGE_FALLBACK_NAME: &str = "a planta da imagem";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("a prompt or an image must be provided")]
    InvalidInput,
}

/// Tool names used for each lookup intent
#[derive(Debug, Clone)]
pub struct ToolNames {
    pub search: String,
    pub identify: String,
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            search: "search_plants".to_string(),
            identify: "identify_plant".to_string(),
        }
    }
}

pub struct ConversationOrchestrator {
    store: Arc<ConversationStore>,
    assembler: PromptAssembler,
    llm: Arc<dyn LlmService>,
    tools: ToolGateway,
    images: Arc<dyn ImageHost>,
    tool_names: ToolNames,
    turn_locks: Mutex<HashMap<ConversationId, Arc<TurnMutex<()>>>>,
}

impl ConversationOrchestrator {
    pub fn new(
        store: Arc<ConversationStore>,
        llm: Arc<dyn LlmService>,
        tools: ToolGateway,
        images: Arc<dyn ImageHost>,
        tool_names: ToolNames,
    ) -> Self {
        Self {
            assembler: PromptAssembler::new(Arc::clone(&store)),
            store,
            llm,
            tools,
            images,
            tool_names,
            turn_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Produce the reply for one turn and record both sides in history.
    ///
    /// Turns for the same conversation run one at a time.
    pub async fn generate_ai_response(
        &self,
        prompt_text: &str,
        image: Option<ImageAttachment>,
        conversation_id: Option<&ConversationId>,
    ) -> Result<String, OrchestratorError> {
        if prompt_text.is_empty() && image.is_none() {
            return Err(OrchestratorError::InvalidInput);
        }

        let _turn = match conversation_id {
            Some(id) => Some(self.lock_turn(id).await),
            None => None,
        };
        let start = Instant::now();

        // Assemble before appending so the current turn is not in its own history
        let payload = self
            .assembler
            .build(conversation_id, prompt_text, image.as_ref());
        if let Some(id) = conversation_id {
            self.store.append(id, prompt_text, true);
        }

        let intent = intent::classify(prompt_text, image.is_some());
        let shape = intent::question_shape(prompt_text, image.is_some());

        let (model_text, lookup) = tokio::join!(
            self.ask_model(payload, conversation_id),
            self.lookup(intent, prompt_text, image.as_ref(), conversation_id),
        );

        let reply = match &lookup {
            Some((fallback_name, result)) => {
                compose(&model_text, intent, result, shape, fallback_name)
            }
            None => model_text,
        };

        if let Some(id) = conversation_id {
            self.store.append(id, reply.as_str(), false);
        }

        tracing::info!(
            conversation_id = conversation_id.map(ConversationId::as_str),
            intent = intent.as_str(),
            tool_ok = lookup.as_ref().map(|(_, r)| r.is_ok()),
            duration_ms = start.elapsed().as_millis(),
            "turn completed"
        );
        Ok(reply)
    }

    async fn ask_model(
        &self,
        payload: PromptPayload,
        conversation_id: Option<&ConversationId>,
    ) -> String {
        match self.llm.complete(&payload.into_request()).await {
            Ok(response) => {
                let text = response.text();
                if text.trim().is_empty() {
                    tracing::warn!(
                        conversation_id = conversation_id.map(ConversationId::as_str),
                        "model returned empty text"
                    );
                    EMPTY_REPLY_FALLBACK.to_string()
                } else {
                    text
                }
            }
            Err(e) => {
                tracing::warn!(
                    conversation_id = conversation_id.map(ConversationId::as_str),
                    kind = ?e.kind,
                    error = %e,
                    "model call failed, replying with apology"
                );
                MODEL_FAILURE_REPLY.to_string()
            }
        }
    }

    /// Consult the tool for this intent.
    ///
    /// `None` means no lookup happened, either because the intent needs none
    /// or because the image could not be uploaded. Otherwise returns the
    /// name to use when the tool record lacks one, plus the call result.
    async fn lookup(
        &self,
        intent: Intent,
        prompt_text: &str,
        image: Option<&ImageAttachment>,
        conversation_id: Option<&ConversationId>,
    ) -> Option<(String, ToolCallResult)> {
        match (intent, image) {
            (Intent::None, _) => None,
            (Intent::TextLookup, _) | (Intent::ImageLookup, None) => {
                let query = intent::plant_query(prompt_text);
                let mut args = ToolArguments::new();
                args.insert("query".to_string(), Value::String(query.clone()));
                let result = self.tools.call_tool(&self.tool_names.search, args).await;
                Some((query, result))
            }
            (Intent::ImageLookup, Some(image)) => {
                if self.tools.state() != ConnectionState::Connected {
                    // Upload only when a tool can receive the URL
                    return Some((
                        IMAGE_FALLBACK_NAME.to_string(),
                        ToolCallResult::Failed(ToolFailureReason::NotConnected),
                    ));
                }

                let url = match self
                    .images
                    .upload(image.bytes.clone(), &image.file_name, &image.mime_type)
                    .await
                {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::warn!(
                            conversation_id = conversation_id.map(ConversationId::as_str),
                            error = %e,
                            "image upload failed, skipping identification"
                        );
                        return None;
                    }
                };

                let mut args = ToolArguments::new();
                args.insert("image_url".to_string(), Value::String(url));
                args.insert(
                    "question".to_string(),
                    Value::String(prompt_text.trim().to_string()),
                );
                let result = self.tools.call_tool(&self.tool_names.identify, args).await;
                Some((IMAGE_FALLBACK_NAME.to_string(), result))
            }
        }
    }

    fn locks(&self) -> MutexGuard<'_, HashMap<ConversationId, Arc<TurnMutex<()>>>> {
        self.turn_locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn lock_turn(&self, id: &ConversationId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks().entry(id.clone()).or_default());
        lock.lock_owned().await
    }

    /// Evict idle conversations along with their unused turn locks
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let evicted = self.store.evict_idle(cutoff);
        let mut locks = self.locks();
        for id in &evicted {
            if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(id);
            }
        }
        evicted.len()
    }

    /// Number of per-conversation turn locks currently held in memory
    pub fn tracked_conversations(&self) -> usize {
        self.locks().len()
    }
}

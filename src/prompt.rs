//! Prompt assembly for the language model
//!
//! A prompt is an ordered list of parts: persona, prior history, the
//! current-turn instruction and, for image turns, the image itself.

use crate::conversation::{ConversationId, ConversationStore, Turn};
use crate::llm::{ContentBlock, GenerationParams, ImageSource, LlmRequest, SystemContent};
use base64::Engine;
use std::path::Path;
use std::sync::Arc;

pub const PERSONA: &str = "Você é uma assistente de IA útil e amigável chamada EVA 🌻. \
Responda sempre em português brasileiro com um tom casual e amigável. \
Você é especialista em agricultura urbana, agricultura familiar e agricultura orgânica. \
Você jamais recomenda o uso de agrotóxicos ou produtos químicos; sugira sempre soluções naturais. \
Use expressões típicas do Brasil quando apropriado. \
Se o usuário perguntar em outro idioma, ainda assim responda em português brasileiro. \
Você é especialmente habilidosa em fornecer informações sobre plantas, jardinagem e cultivo. \
Lembre-se do histórico da conversa para manter o contexto da interação. \
Se o usuário enviar uma imagem, responda somente a fotos de plantas; se a foto não for de uma planta, \
peça ao usuário para enviar somente fotos de cultivos. Se for uma planta, analise-a com cuidado \
e responda de acordo com a pergunta do usuário.";

const HISTORY_HEADER: &str = "Histórico da conversa anterior:";
const IMAGE_INSTRUCTION: &str =
    "Usuário: analise a imagem anexada e depois responda de acordo com a pergunta:";
const IMAGE_ONLY_INSTRUCTION: &str =
    "Usuário: analise a imagem anexada e identifique a planta que aparece nela.";

/// Extensions accepted for uploaded images, with their MIME types
const SUPPORTED_IMAGES: &[(&str, &str)] = &[
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("png", "image/png"),
    ("gif", "image/gif"),
];

/// MIME type for an image file name, judged by extension
pub fn image_mime_type(file_name: &str) -> Option<&'static str> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_lowercase();
    SUPPORTED_IMAGES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, mime)| *mime)
}

/// Image sent with the current turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub file_name: String,
}

impl ImageAttachment {
    /// `None` when the extension is not a supported image type
    pub fn from_upload(bytes: Vec<u8>, file_name: &str) -> Option<Self> {
        let mime_type = image_mime_type(file_name)?;
        Some(Self {
            bytes,
            mime_type: mime_type.to_string(),
            file_name: file_name.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptPart {
    Text(String),
    Image { data: Vec<u8>, mime_type: String },
}

/// Content handed to the model for one turn. Built fresh, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPayload {
    pub parts: Vec<PromptPart>,
}

impl PromptPayload {
    /// Concatenated text parts
    #[cfg(test)]
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                PromptPart::Text(text) => Some(text.as_str()),
                PromptPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Model request carrying the persona as system instruction as well
    pub fn into_request(self) -> LlmRequest {
        let content = self
            .parts
            .into_iter()
            .map(|part| match part {
                PromptPart::Text(text) => ContentBlock::text(text),
                PromptPart::Image { data, mime_type } => ContentBlock::Image {
                    source: ImageSource::Base64 {
                        media_type: mime_type,
                        data: base64::engine::general_purpose::STANDARD.encode(data),
                    },
                },
            })
            .collect();

        LlmRequest {
            system: vec![SystemContent::new(PERSONA)],
            content,
            generation: GenerationParams::default(),
        }
    }
}

/// Builds prompts from the stored history of a conversation
pub struct PromptAssembler {
    store: Arc<ConversationStore>,
}

impl PromptAssembler {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }

    /// Must run before the current turn is appended to the store
    pub fn build(
        &self,
        conversation_id: Option<&ConversationId>,
        current_text: &str,
        image: Option<&ImageAttachment>,
    ) -> PromptPayload {
        let history = conversation_id
            .map(|id| self.store.history(id))
            .unwrap_or_default();
        assemble(&history, current_text, image)
    }
}

/// Persona, then history, then the instruction, then the image
pub fn assemble(
    history: &[Turn],
    current_text: &str,
    image: Option<&ImageAttachment>,
) -> PromptPayload {
    let mut parts = vec![PromptPart::Text(PERSONA.to_string())];

    if !history.is_empty() {
        let lines: Vec<String> = history.iter().map(Turn::render).collect();
        parts.push(PromptPart::Text(format!(
            "{HISTORY_HEADER}\n{}",
            lines.join("\n")
        )));
    }

    let text = current_text.trim();
    let instruction = match image {
        None => format!("Usuário: {text}"),
        Some(_) if text.is_empty() => IMAGE_ONLY_INSTRUCTION.to_string(),
        Some(_) => format!("{IMAGE_INSTRUCTION} {text}"),
    };
    parts.push(PromptPart::Text(instruction));

    if let Some(image) = image {
        parts.push(PromptPart::Image {
            data: image.bytes.clone(),
            mime_type: image.mime_type.clone(),
        });
    }

    PromptPayload { parts }
}

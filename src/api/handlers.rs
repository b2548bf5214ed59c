//! HTTP request handlers

use super::types::{
    CreateConversationResponse, ErrorResponse, FieldErrors, GenerateRequest, GenerateResponse,
    HealthResponse, HistoryResponse, ValidationErrorResponse,
};
use super::AppState;
use crate::conversation::ConversationId;
use crate::orchestrator::OrchestratorError;
use crate::prompt::ImageAttachment;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, FromRequest, Multipart, Path, Request, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

const MAX_PROMPT_CHARS: usize = 2000;
const MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;
/// Room for the other form fields on top of a full-size image
const MAX_BODY_BYTES: usize = MAX_IMAGE_BYTES + 1024 * 1024;

const INVALID_BODY: &str = "Invalid request body";
const IMAGE_TYPE_ERROR: &str = "Apenas arquivos de imagem (jpg, jpeg, png, gif) são permitidos!";
const IMAGE_SIZE_ERROR: &str = "A imagem deve ter no máximo 10MB.";
const FORM_READ_ERROR: &str = "Falha ao ler o formulário enviado";

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat/conversation", post(create_conversation))
        .route("/api/chat/generate", post(generate))
        .route("/api/chat/history/:conversation_id", get(get_history))
        .route("/api/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

// ============================================================
// Conversations
// ============================================================

async fn create_conversation() -> Json<CreateConversationResponse> {
    let id = ConversationId::generate();
    tracing::debug!(conversation_id = %id, "conversation created");
    Json(CreateConversationResponse {
        conversation_id: id.to_string(),
    })
}

async fn get_history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<HistoryResponse>, AppError> {
    let id = conversation_id.parse::<ConversationId>().map_err(|e| {
        AppError::invalid(
            "Formato inválido de ID de conversa.",
            "conversationId",
            e.to_string(),
        )
    })?;
    Ok(Json(HistoryResponse {
        history: state.store.rendered_history(&id),
    }))
}

// ============================================================
// Generation
// ============================================================

struct GenerateForm {
    prompt: String,
    conversation_id: Option<ConversationId>,
    image: Option<ImageAttachment>,
}

/// Accepts the multipart form, or a JSON `{prompt, conversationId}` body for text-only turns
async fn generate(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<GenerateResponse>, AppError> {
    let form = if is_json(request.headers()) {
        let Json(body) = Json::<GenerateRequest>::from_request(request, &state)
            .await
            .map_err(json_rejection)?;
        read_generate_json(body)?
    } else {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(multipart_rejection)?;
        read_generate_form(multipart).await?
    };

    let text = state
        .orchestrator
        .generate_ai_response(&form.prompt, form.image, form.conversation_id.as_ref())
        .await
        .map_err(|e| match e {
            OrchestratorError::InvalidInput => {
                AppError::invalid(INVALID_BODY, "prompt", "Envie um texto ou uma imagem.")
            }
        })?;

    Ok(Json(GenerateResponse {
        text,
        conversation_id: form.conversation_id.map(|id| id.to_string()),
    }))
}

async fn read_generate_form(mut multipart: Multipart) -> Result<GenerateForm, AppError> {
    let mut prompt = String::new();
    let mut conversation_id = None;
    let mut image = None;
    let mut errors = FieldErrors::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = field.text().await.map_err(multipart_error)?,
            "conversationId" => {
                let raw = field.text().await.map_err(multipart_error)?;
                conversation_id = ConversationId::from_client(&raw);
            }
            "image" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                if file_name.is_empty() && bytes.is_empty() {
                    continue;
                }
                if bytes.len() > MAX_IMAGE_BYTES {
                    errors.insert("image", IMAGE_SIZE_ERROR.to_string());
                    continue;
                }
                match ImageAttachment::from_upload(bytes.to_vec(), &file_name) {
                    Some(attachment) => image = Some(attachment),
                    None => {
                        errors.insert("image", IMAGE_TYPE_ERROR.to_string());
                    }
                }
            }
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }

    check_prompt_length(&prompt, &mut errors);
    if !errors.is_empty() {
        return Err(AppError::BadRequest {
            message: INVALID_BODY.to_string(),
            errors,
        });
    }

    Ok(GenerateForm {
        prompt,
        conversation_id,
        image,
    })
}

fn read_generate_json(body: GenerateRequest) -> Result<GenerateForm, AppError> {
    let mut errors = FieldErrors::new();
    check_prompt_length(&body.prompt, &mut errors);
    if !errors.is_empty() {
        return Err(AppError::BadRequest {
            message: INVALID_BODY.to_string(),
            errors,
        });
    }

    Ok(GenerateForm {
        conversation_id: body
            .conversation_id
            .as_deref()
            .and_then(ConversationId::from_client),
        prompt: body.prompt,
        image: None,
    })
}

fn check_prompt_length(prompt: &str, errors: &mut FieldErrors) {
    if prompt.chars().count() > MAX_PROMPT_CHARS {
        errors.insert(
            "prompt",
            format!("O texto deve ter no máximo {MAX_PROMPT_CHARS} caracteres."),
        );
    }
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| {
            value
                .trim_start()
                .to_ascii_lowercase()
                .starts_with("application/json")
        })
}

fn json_rejection(rejection: JsonRejection) -> AppError {
    AppError::invalid(INVALID_BODY, "body", rejection.body_text())
}

fn multipart_rejection(rejection: MultipartRejection) -> AppError {
    AppError::Internal {
        message: FORM_READ_ERROR.to_string(),
        error: rejection.body_text(),
    }
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::invalid(INVALID_BODY, "image", IMAGE_SIZE_ERROR)
    } else {
        AppError::Internal {
            message: FORM_READ_ERROR.to_string(),
            error: e.body_text(),
        }
    }
}

// ============================================================
// Health
// ============================================================

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        tool_gateway: state.tools.state(),
        conversations: state.store.conversation_count(),
    })
}

// ============================================================
// Error Handling
// ============================================================

enum AppError {
    BadRequest { message: String, errors: FieldErrors },
    Internal { message: String, error: String },
}

impl AppError {
    fn invalid(message: &str, field: &'static str, problem: impl Into<String>) -> Self {
        let mut errors = FieldErrors::new();
        errors.insert(field, problem.into());
        AppError::BadRequest {
            message: message.to_string(),
            errors,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::BadRequest { message, errors } => (
                StatusCode::BAD_REQUEST,
                Json(ValidationErrorResponse { message, errors }),
            )
                .into_response(),
            AppError::Internal { message, error } => {
                tracing::warn!(message = %message, error = %error, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message, error }),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationStore;
    use crate::orchestrator::{ConversationOrchestrator, ToolNames, MODEL_FAILURE_REPLY};
    use crate::testing::{MockImageHost, MockLlm};
    use crate::tools::ToolGateway;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "eva-test-boundary";

    struct TestApp {
        router: Router,
        llm: Arc<MockLlm>,
        store: Arc<ConversationStore>,
    }

    fn app() -> TestApp {
        let store = Arc::new(ConversationStore::default());
        let llm = Arc::new(MockLlm::new());
        let tools = ToolGateway::disabled();
        let orchestrator = Arc::new(ConversationOrchestrator::new(
            store.clone(),
            llm.clone(),
            tools.clone(),
            Arc::new(MockImageHost::returning("https://img/1.png")),
            ToolNames::default(),
        ));
        let state = AppState {
            orchestrator,
            store: store.clone(),
            tools,
        };
        TestApp {
            router: create_router(state),
            llm,
            store,
        }
    }

    enum Part<'a> {
        Text(&'a str, &'a str),
        File(&'a str, &'a str, &'a [u8]),
    }

    fn multipart(parts: &[Part<'_>]) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::Text(name, value) => {
                    let disposition =
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n");
                    body.extend_from_slice(disposition.as_bytes());
                    body.extend_from_slice(value.as_bytes());
                    body.extend_from_slice(b"\r\n");
                }
                Part::File(name, file_name, bytes) => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\n\
                             Content-Type: application/octet-stream\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(bytes);
                    body.extend_from_slice(b"\r\n");
                }
            }
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/chat/generate")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_create_conversation_returns_fresh_ids() {
        let app = app();
        let request = || {
            Request::builder()
                .method("POST")
                .uri("/api/chat/conversation")
                .body(Body::empty())
                .unwrap()
        };
        let (status, first) = send(&app.router, request()).await;
        assert_eq!(status, StatusCode::OK);
        let (_, second) = send(&app.router, request()).await;
        assert!(first["conversationId"].as_str().unwrap().len() >= 5);
        assert_ne!(first["conversationId"], second["conversationId"]);
    }

    #[tokio::test]
    async fn test_generate_text_turn_and_history() {
        let app = app();
        app.llm.queue_text("Olá! Eu sou a EVA 🌻");

        let (status, body) = send(
            &app.router,
            multipart(&[Part::Text("prompt", "oi"), Part::Text("conversationId", "abc12")]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"text": "Olá! Eu sou a EVA 🌻", "conversationId": "abc12"}));

        let (status, body) = send(&app.router, get("/api/chat/history/abc12")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"history": ["Usuário: oi", "EVA: Olá! Eu sou a EVA 🌻"]}));
    }

    #[tokio::test]
    async fn test_generate_without_conversation_omits_id() {
        let app = app();
        app.llm.queue_text("Oi!");
        let (status, body) = send(&app.router, multipart(&[Part::Text("prompt", "oi")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"text": "Oi!"}));
        assert_eq!(app.store.conversation_count(), 0);
    }

    #[tokio::test]
    async fn test_generate_model_failure_is_still_200() {
        let app = app();
        app.llm.queue_error(crate::llm::LlmError::new(crate::llm::LlmErrorKind::Auth, "HTTP 403"));
        let (status, body) = send(&app.router, multipart(&[Part::Text("prompt", "oi")])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], MODEL_FAILURE_REPLY);
    }

    #[tokio::test]
    async fn test_generate_empty_input_is_400() {
        let app = app();
        let (status, body) = send(
            &app.router,
            multipart(&[Part::Text("prompt", ""), Part::Text("conversationId", "abc12")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], INVALID_BODY);
        assert!(body["errors"]["prompt"].is_string());
        assert!(app.store.history(&"abc12".parse().unwrap()).is_empty());
        assert!(app.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_generate_rejects_long_prompt() {
        let app = app();
        let long = "a".repeat(MAX_PROMPT_CHARS + 1);
        let (status, body) = send(&app.router, multipart(&[Part::Text("prompt", &long)])).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["prompt"].is_string());
    }

    #[tokio::test]
    async fn test_generate_rejects_non_image_file() {
        let app = app();
        let (status, body) = send(
            &app.router,
            multipart(&[Part::File("image", "notas.txt", b"hello")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"]["image"], IMAGE_TYPE_ERROR);
    }

    #[tokio::test]
    async fn test_generate_image_turn_sends_inline_image() {
        let app = app();
        app.llm.queue_text("É uma samambaia!");
        let (status, body) = send(
            &app.router,
            multipart(&[
                Part::Text("prompt", "Que planta é essa?"),
                Part::File("image", "folha.JPG", &[0xff, 0xd8, 0xff]),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["text"], "É uma samambaia!");

        let request = &app.llm.recorded_requests()[0];
        let has_jpeg = request.content.iter().any(|block| {
            matches!(
                block,
                crate::llm::ContentBlock::Image {
                    source: crate::llm::ImageSource::Base64 { media_type, .. }
                } if media_type == "image/jpeg"
            )
        });
        assert!(has_jpeg);
    }

    fn post_raw(content_type: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri("/api/chat/generate");
        if let Some(content_type) = content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_generate_accepts_json_body() {
        let app = app();
        app.llm.queue_text("Oi! Como posso ajudar?");
        let (status, body) = send(
            &app.router,
            post_raw(
                Some("application/json"),
                r#"{"prompt": "oi", "conversationId": "abc12"}"#,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"text": "Oi! Como posso ajudar?", "conversationId": "abc12"}));
        assert_eq!(app.store.history(&"abc12".parse().unwrap()).len(), 2);
    }

    #[tokio::test]
    async fn test_generate_json_body_is_validated() {
        let app = app();
        let (status, body) = send(&app.router, post_raw(Some("application/json"), "{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["prompt"].is_string());

        let long = format!(r#"{{"prompt": "{}"}}"#, "a".repeat(MAX_PROMPT_CHARS + 1));
        let (status, body) = send(&app.router, post_raw(Some("application/json"), &long)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["errors"]["prompt"].is_string());

        let (status, body) =
            send(&app.router, post_raw(Some("application/json"), "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], INVALID_BODY);
        assert!(body["errors"]["body"].is_string());
        assert!(app.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_generate_unreadable_form_is_json_500() {
        let app = app();
        for content_type in [None, Some("multipart/form-data"), Some("text/plain")] {
            let (status, body) = send(&app.router, post_raw(content_type, "oi")).await;
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{content_type:?}");
            assert_eq!(body["message"], FORM_READ_ERROR);
            assert!(body["error"].is_string());
        }
        assert!(app.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_generate_rejects_image_over_cap() {
        let app = app();
        let image = vec![0u8; MAX_IMAGE_BYTES + 1];
        let (status, body) = send(
            &app.router,
            multipart(&[
                Part::Text("prompt", "Que planta é essa?"),
                Part::File("image", "grande.png", &image),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"]["image"], IMAGE_SIZE_ERROR);
        assert!(app.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_generate_rejects_body_over_limit() {
        let app = app();
        let image = vec![0u8; MAX_BODY_BYTES + 1];
        let (status, body) = send(
            &app.router,
            multipart(&[Part::File("image", "enorme.png", &image)]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"]["image"], IMAGE_SIZE_ERROR);
        assert!(app.llm.recorded_requests().is_empty());
    }

    #[tokio::test]
    async fn test_history_rejects_short_id() {
        let app = app();
        let (status, body) = send(&app.router, get("/api/chat/history/abcd")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Formato inválido de ID de conversa.");

        let (status, body) = send(&app.router, get("/api/chat/history/unknown-id")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"history": []}));
    }

    #[tokio::test]
    async fn test_health_reports_gateway_state() {
        let app = app();
        let (status, body) = send(&app.router, get("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({"status": "ok", "toolGateway": "disconnected", "conversations": 0})
        );
    }
}

//! Browser-facing chat routes.
//!
//! - `GET  /`      chat page; resets the visitor's conversation
//! - `POST /chat`  text answer, `{message}` in, `{response, is_last_question}` out
//! - `POST /voice` recorded answer as multipart field `audio_data`
//!
//! Visitors are identified by the `leadline_session` cookie. A request without
//! a usable cookie starts a new session and the response sets the cookie.

use std::sync::Arc;

use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use leadline_agent::runtime::ChatRuntime;
use leadline_agent::session::SessionId;
use leadline_agent::speech::AudioClip;
use leadline_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::{error, warn};
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "leadline_session";
pub const AUDIO_FIELD: &str = "audio_data";
pub const NO_AUDIO_FILE: &str = "No audio file found";
const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

#[derive(Clone)]
pub struct ChatState {
    runtime: Arc<ChatRuntime>,
    templates: Arc<Tera>,
    public_base_url: Option<String>,
}

impl ChatState {
    pub fn new(
        runtime: Arc<ChatRuntime>,
        templates: Arc<Tera>,
        public_base_url: Option<String>,
    ) -> Self {
        Self { runtime, templates, public_base_url }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
    pub is_last_question: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceResponse {
    pub user_message: String,
    pub response: String,
    pub audio_url: Option<String>,
    pub is_last_question: bool,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

pub fn templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template("index.html", include_str!("../../../templates/index.html"))?;
    Ok(tera)
}

pub fn router(state: ChatState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/chat", post(chat))
        .route("/voice", post(voice).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)))
        .with_state(state)
}

struct Visitor {
    session: SessionId,
    set_cookie: Option<HeaderValue>,
}

impl Visitor {
    fn from_headers(headers: &HeaderMap) -> Self {
        let existing = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|raw| raw.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| SessionId::parse(value));

        match existing {
            Some(session) => Self { session, set_cookie: None },
            None => {
                let session = SessionId::generate();
                let cookie = format!("{SESSION_COOKIE}={session}; Path=/; HttpOnly; SameSite=Lax");
                Self { session, set_cookie: HeaderValue::from_str(&cookie).ok() }
            }
        }
    }

    fn respond(self, response: impl IntoResponse) -> Response {
        let mut response = response.into_response();
        if let Some(cookie) = self.set_cookie {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
        response
    }
}

fn error_response(error: InterfaceError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(
        event_name = "chat.request.failed",
        correlation_id = %error.correlation_id(),
        status = status.as_u16(),
        error = %error,
        "chat request failed"
    );
    let body = ErrorBody {
        error: error.user_message().to_string(),
        correlation_id: Some(error.correlation_id().to_string()),
    };
    (status, Json(body))
}

fn invalid_request(message: String) -> (StatusCode, Json<ErrorBody>) {
    error_response(
        ApplicationError::InvalidRequest(message).into_interface(Uuid::new_v4().to_string()),
    )
}

async fn index(State(state): State<ChatState>, headers: HeaderMap) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let greeting = state.runtime.start_session(&visitor.session).await;

    let mut context = Context::new();
    context.insert("company_name", state.runtime.company_name());
    context.insert("greeting", &greeting);

    match state.templates.render("index.html", &context) {
        Ok(html) => visitor.respond(Html(html)),
        Err(error) => {
            error!(
                event_name = "chat.page.render_failed",
                correlation_id = "page",
                error = ?error,
                "chat page template failed to render"
            );
            visitor.respond((
                StatusCode::INTERNAL_SERVER_ERROR,
                Html("<h1>Template Error</h1>".to_string()),
            ))
        }
    }
}

async fn chat(
    State(state): State<ChatState>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let Json(request) = match payload {
        Ok(payload) => payload,
        Err(rejection) => return visitor.respond(invalid_request(rejection.body_text())),
    };

    match state.runtime.handle_text(&visitor.session, &request.message).await {
        Ok(reply) => visitor.respond(Json(ChatResponse {
            response: reply.text,
            is_last_question: reply.is_complete,
        })),
        Err(error) => {
            visitor.respond(error_response(error.into_interface(Uuid::new_v4().to_string())))
        }
    }
}

async fn voice(
    State(state): State<ChatState>,
    headers: HeaderMap,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let visitor = Visitor::from_headers(&headers);
    let clip = match multipart {
        Ok(multipart) => read_audio_field(multipart).await,
        Err(rejection) => Err(rejection.body_text()),
    };
    let clip = match clip {
        Ok(Some(clip)) => clip,
        Ok(None) => {
            let body = ErrorBody { error: NO_AUDIO_FILE.to_string(), correlation_id: None };
            return visitor.respond((StatusCode::BAD_REQUEST, Json(body)));
        }
        Err(message) => return visitor.respond(invalid_request(message)),
    };

    match state.runtime.handle_voice(&visitor.session, clip).await {
        Ok(reply) => {
            let audio_url = reply.audio.as_ref().map(|audio| {
                audio_url(state.public_base_url.as_deref(), &headers, &audio.file_name)
            });
            visitor.respond(Json(VoiceResponse {
                user_message: reply.user_message,
                response: reply.text,
                audio_url,
                is_last_question: reply.is_complete,
            }))
        }
        Err(error) => {
            visitor.respond(error_response(error.into_interface(Uuid::new_v4().to_string())))
        }
    }
}

async fn read_audio_field(mut multipart: Multipart) -> Result<Option<AudioClip>, String> {
    while let Some(field) = multipart.next_field().await.map_err(|error| error.body_text())? {
        if field.name() != Some(AUDIO_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(|error| error.body_text())?;
        return Ok(Some(AudioClip::new(bytes.to_vec(), file_name, content_type)));
    }
    Ok(None)
}

/// Absolute when a public base URL or `Host` header is known, root-relative otherwise.
fn audio_url(public_base_url: Option<&str>, headers: &HeaderMap, file_name: &str) -> String {
    let base = match public_base_url {
        Some(base) => base.trim_end_matches('/').to_string(),
        None => headers
            .get(header::HOST)
            .and_then(|host| host.to_str().ok())
            .map(|host| format!("http://{host}"))
            .unwrap_or_default(),
    };
    format!("{base}/static/audio/{file_name}")
}

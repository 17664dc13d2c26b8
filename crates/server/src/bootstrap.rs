use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use leadline_agent::llm::{client_from_config, LlmError};
use leadline_agent::phraser::ResponsePhraser;
use leadline_agent::runtime::ChatRuntime;
use leadline_agent::speech::{
    AudioStore, DisabledSpeech, OpenAiSpeechClient, SpeechError, SpeechToText, TextToSpeech,
};
use leadline_core::audit::TracingAuditSink;
use leadline_core::config::{AppConfig, ConfigError, LoadOptions, SheetBackendKind};
use leadline_core::conversation::ConversationEngine;
use leadline_core::lead::LeadStore;
use leadline_db::{
    connect_with_config, migrations, DbPool, GoogleSheet, InMemorySheet, SheetError,
    SpreadsheetLeadStore, SqliteSheet,
};
use tera::Tera;
use thiserror::Error;
use tower_http::services::ServeDir;
use tracing::info;

use crate::{chat, health};

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<ChatRuntime>,
    pub db_pool: Option<DbPool>,
    pub templates: Arc<Tera>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("http client could not be built: {0}")]
    HttpClient(#[source] reqwest::Error),
    #[error("language model setup failed: {0}")]
    Llm(#[from] LlmError),
    #[error("speech setup failed: {0}")]
    Speech(#[from] SpeechError),
    #[error("sheets backend setup failed: {0}")]
    Sheets(#[source] SheetError),
    #[error("page templates failed to load: {0}")]
    Templates(#[from] tera::Error),
}

impl Application {
    /// Chat routes, health, and the synthesized audio directory on one router.
    pub fn router(&self) -> Router {
        let chat_state = chat::ChatState::new(
            Arc::clone(&self.runtime),
            Arc::clone(&self.templates),
            self.config.server.public_base_url.clone(),
        );
        let health_state =
            health::HealthState::new(Arc::clone(&self.runtime), self.db_pool.clone());

        chat::router(chat_state)
            .merge(health::router(health_state))
            .nest_service("/static/audio", ServeDir::new(self.runtime.audio_store().dir()))
    }
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        sheets_backend = ?config.sheets.backend,
        llm_provider = ?config.llm.provider,
        speech_enabled = config.speech.enabled,
        "starting application bootstrap"
    );

    let (store, db_pool) = lead_store(&config).await?;

    let llm_http = http_client(config.llm.timeout_secs)?;
    let llm = client_from_config(&config.llm, llm_http)?;
    let phraser = ResponsePhraser::new(
        llm,
        &config.agent.company_name,
        Duration::from_secs(config.llm.timeout_secs),
    );
    info!(
        event_name = "system.bootstrap.phraser_ready",
        correlation_id = "bootstrap",
        model_backed = phraser.has_model(),
        "response phraser configured"
    );

    let audio = AudioStore::new(config.speech.audio_dir.clone());
    tokio::fs::create_dir_all(audio.dir()).await.map_err(SpeechError::Io)?;

    let mut stt: Arc<dyn SpeechToText> = Arc::new(DisabledSpeech);
    let mut tts: Arc<dyn TextToSpeech> = Arc::new(DisabledSpeech);
    if config.speech.enabled {
        let speech_http = http_client(config.speech.timeout_secs)?;
        let speech = Arc::new(OpenAiSpeechClient::from_config(&config.speech, speech_http)?);
        stt = speech.clone();
        tts = speech;
    }

    let runtime = ChatRuntime::new(
        ConversationEngine::new(config.script.clone()),
        phraser,
        store,
        Arc::new(TracingAuditSink),
        config.agent.company_name.clone(),
    )
    .with_speech(stt, tts, audio)
    .with_session_idle_timeout(Duration::from_secs(config.agent.session_idle_secs));

    let templates = Arc::new(chat::templates()?);

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        questions = config.script.len(),
        "application bootstrap complete"
    );

    Ok(Application { config, runtime: Arc::new(runtime), db_pool, templates })
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, BootstrapError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(BootstrapError::HttpClient)
}

async fn lead_store(
    config: &AppConfig,
) -> Result<(Arc<dyn LeadStore>, Option<DbPool>), BootstrapError> {
    let header = config.script.header();
    let sheet_name = config.sheets.sheet_name.clone();

    match config.sheets.backend {
        SheetBackendKind::Sqlite => {
            let pool = connect_with_config(&config.database)
                .await
                .map_err(BootstrapError::DatabaseConnect)?;
            info!(
                event_name = "system.bootstrap.database_connected",
                correlation_id = "bootstrap",
                "database connection established"
            );

            migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
            info!(
                event_name = "system.bootstrap.migrations_applied",
                correlation_id = "bootstrap",
                "database migrations applied"
            );

            let sheet = SqliteSheet::new(pool.clone(), sheet_name);
            let store: Arc<dyn LeadStore> = Arc::new(SpreadsheetLeadStore::new(sheet, header));
            Ok((store, Some(pool)))
        }
        SheetBackendKind::Memory => {
            let sheet = InMemorySheet::new(sheet_name);
            let store: Arc<dyn LeadStore> = Arc::new(SpreadsheetLeadStore::new(sheet, header));
            Ok((store, None))
        }
        SheetBackendKind::Google => {
            let sheet =
                GoogleSheet::from_config(&config.sheets, http_client(config.sheets.timeout_secs)?)
                    .map_err(BootstrapError::Sheets)?;
            info!(
                event_name = "system.bootstrap.sheets_ready",
                correlation_id = "bootstrap",
                sheet_name = %sheet_name,
                service_account = config.sheets.access_token.is_none(),
                "google sheets backend configured"
            );
            let store: Arc<dyn LeadStore> = Arc::new(SpreadsheetLeadStore::new(sheet, header));
            Ok((store, None))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use leadline_core::config::{ConfigOverrides, LlmProvider, LoadOptions, SheetBackendKind};
    use leadline_db::SheetError;
    use tower::ServiceExt;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn options(audio_dir: &std::path::Path, overrides: ConfigOverrides) -> LoadOptions {
        LoadOptions {
            config_path: Some(audio_dir.join("absent.toml")),
            overrides: ConfigOverrides {
                llm_provider: Some(LlmProvider::Disabled),
                audio_dir: Some(audio_dir.join("audio")),
                ..overrides
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_with_sqlite_backend_migrates_and_exposes_pool() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                sheets_backend: Some(SheetBackendKind::Sqlite),
                ..ConfigOverrides::default()
            },
        ))
        .await
        .expect("bootstrap should succeed");

        let pool = app.db_pool.as_ref().expect("sqlite backend keeps a pool");
        let (tables,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sheet_row'",
        )
        .fetch_one(pool)
        .await
        .expect("query schema");
        assert_eq!(tables, 1);
        assert!(dir.path().join("audio").is_dir());
        assert_eq!(app.runtime.engine().script().len(), 4);

        pool.close().await;
    }

    #[tokio::test]
    async fn memory_backend_runs_without_database() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                sheets_backend: Some(SheetBackendKind::Memory),
                company_name: Some("Acme".to_string()),
                ..ConfigOverrides::default()
            },
        ))
        .await
        .expect("bootstrap should succeed");

        assert!(app.db_pool.is_none());
        assert!(app.runtime.greeting().contains("from Acme."));
    }

    #[tokio::test]
    async fn enabled_speech_without_api_key_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                sheets_backend: Some(SheetBackendKind::Memory),
                speech_enabled: Some(true),
                ..ConfigOverrides::default()
            },
        ))
        .await;

        let error = result.err().expect("missing speech key should fail");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("speech.api_key"));
    }

    #[tokio::test]
    async fn router_serves_health_and_synthesized_audio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                sheets_backend: Some(SheetBackendKind::Memory),
                ..ConfigOverrides::default()
            },
        ))
        .await
        .expect("bootstrap should succeed");
        tokio::fs::write(dir.path().join("audio").join("response_test.mp3"), b"mp3-bytes")
            .await
            .expect("write audio");
        let router = app.router();

        let audio = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/static/audio/response_test.mp3")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(audio.status(), StatusCode::OK);
        let bytes = to_bytes(audio.into_body(), usize::MAX).await.expect("body");
        assert_eq!(&bytes[..], b"mp3-bytes");

        let health = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(health.status(), StatusCode::OK);
        let bytes = to_bytes(health.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(payload["status"], "ready");
        assert_eq!(payload["sessions"], 0);
    }

    #[tokio::test]
    async fn google_backend_with_unreadable_key_file_fails_fast() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                sheets_backend: Some(SheetBackendKind::Google),
                sheets_spreadsheet_id: Some("sheet-123".to_string()),
                sheets_credentials_file: Some(dir.path().join("missing-credentials.json")),
                ..ConfigOverrides::default()
            },
        ))
        .await;

        let error = result.err().expect("missing key file should fail");
        assert!(matches!(error, BootstrapError::Sheets(SheetError::Credentials(_))));
        assert!(error.to_string().contains("missing-credentials.json"));
    }

    #[tokio::test]
    async fn session_table_uses_configured_idle_timeout() {
        let dir = tempfile::tempdir().expect("tempdir");
        let app = bootstrap(options(
            dir.path(),
            ConfigOverrides {
                sheets_backend: Some(SheetBackendKind::Memory),
                ..ConfigOverrides::default()
            },
        ))
        .await
        .expect("bootstrap should succeed");

        assert_eq!(
            app.runtime.sessions().idle_timeout(),
            Duration::from_secs(app.config.agent.session_idle_secs)
        );
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::script::{QuestionScript, ScriptError, ScriptQuestion};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub sheets: SheetsConfig,
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub script: QuestionScript,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SpeechConfig {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub transcription_model: String,
    pub speech_model: String,
    pub voice: String,
    pub language: String,
    pub audio_dir: PathBuf,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SheetsConfig {
    pub backend: SheetBackendKind,
    pub sheet_name: String,
    pub spreadsheet_id: Option<String>,
    pub access_token: Option<SecretString>,
    /// Service-account key file; used to mint access tokens when no static
    /// `access_token` is configured.
    pub credentials_file: Option<PathBuf>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    pub public_base_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub company_name: String,
    /// Sessions untouched for this long are dropped from the session table.
    pub session_idle_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    OpenAi,
    Ollama,
    Disabled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetBackendKind {
    Sqlite,
    Memory,
    Google,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: Option<String>,
    pub speech_enabled: Option<bool>,
    pub speech_api_key: Option<String>,
    pub speech_base_url: Option<String>,
    pub audio_dir: Option<PathBuf>,
    pub sheets_backend: Option<SheetBackendKind>,
    pub sheets_spreadsheet_id: Option<String>,
    pub sheets_access_token: Option<String>,
    pub sheets_credentials_file: Option<PathBuf>,
    pub sheets_base_url: Option<String>,
    pub server_port: Option<u16>,
    pub company_name: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid question script: {0}")]
    Script(#[from] ScriptError),
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadline.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: None,
                model: "gemini-2.5-pro".to_string(),
                timeout_secs: 30,
            },
            speech: SpeechConfig {
                enabled: false,
                api_key: None,
                base_url: "https://api.openai.com/v1".to_string(),
                transcription_model: "whisper-1".to_string(),
                speech_model: "tts-1".to_string(),
                voice: "alloy".to_string(),
                language: "en".to_string(),
                audio_dir: PathBuf::from("static/audio"),
                timeout_secs: 30,
            },
            sheets: SheetsConfig {
                backend: SheetBackendKind::Sqlite,
                sheet_name: "Leads".to_string(),
                spreadsheet_id: None,
                access_token: None,
                credentials_file: None,
                base_url: None,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 5000,
                graceful_shutdown_secs: 15,
                public_base_url: None,
            },
            agent: AgentConfig {
                company_name: "Innovate Inc.".to_string(),
                session_idle_secs: 1800,
            },
            script: QuestionScript::lead_qualification(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|openai|ollama|disabled)"
            ))),
        }
    }
}

impl std::str::FromStr for SheetBackendKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            "google" => Ok(Self::Google),
            other => Err(ConfigError::Validation(format!(
                "unsupported sheets backend `{other}` (expected sqlite|memory|google)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(speech) = patch.speech {
            if let Some(enabled) = speech.enabled {
                self.speech.enabled = enabled;
            }
            if let Some(speech_api_key_value) = speech.api_key {
                self.speech.api_key = Some(secret_value(speech_api_key_value));
            }
            if let Some(base_url) = speech.base_url {
                self.speech.base_url = base_url;
            }
            if let Some(transcription_model) = speech.transcription_model {
                self.speech.transcription_model = transcription_model;
            }
            if let Some(speech_model) = speech.speech_model {
                self.speech.speech_model = speech_model;
            }
            if let Some(voice) = speech.voice {
                self.speech.voice = voice;
            }
            if let Some(language) = speech.language {
                self.speech.language = language;
            }
            if let Some(audio_dir) = speech.audio_dir {
                self.speech.audio_dir = audio_dir;
            }
            if let Some(timeout_secs) = speech.timeout_secs {
                self.speech.timeout_secs = timeout_secs;
            }
        }

        if let Some(sheets) = patch.sheets {
            if let Some(backend) = sheets.backend {
                self.sheets.backend = backend;
            }
            if let Some(sheet_name) = sheets.sheet_name {
                self.sheets.sheet_name = sheet_name;
            }
            if let Some(spreadsheet_id) = sheets.spreadsheet_id {
                self.sheets.spreadsheet_id = Some(spreadsheet_id);
            }
            if let Some(access_token_value) = sheets.access_token {
                self.sheets.access_token = Some(secret_value(access_token_value));
            }
            if let Some(credentials_file) = sheets.credentials_file {
                self.sheets.credentials_file = Some(credentials_file);
            }
            if let Some(base_url) = sheets.base_url {
                self.sheets.base_url = Some(base_url);
            }
            if let Some(timeout_secs) = sheets.timeout_secs {
                self.sheets.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(public_base_url) = server.public_base_url {
                self.server.public_base_url = Some(public_base_url);
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(company_name) = agent.company_name {
                self.agent.company_name = company_name;
            }
            if let Some(session_idle_secs) = agent.session_idle_secs {
                self.agent.session_idle_secs = session_idle_secs;
            }
        }

        if let Some(script) = patch.script {
            self.script = QuestionScript::new(script.questions)?;
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let llm_api_key = read_env("LEADLINE_LLM_API_KEY").or_else(|| read_env("GEMINI_API_KEY"));
        if let Some(value) = llm_api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("LEADLINE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("LEADLINE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_SPEECH_ENABLED") {
            self.speech.enabled = parse_bool("LEADLINE_SPEECH_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_API_KEY") {
            self.speech.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_BASE_URL") {
            self.speech.base_url = value;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_TRANSCRIPTION_MODEL") {
            self.speech.transcription_model = value;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_SPEECH_MODEL") {
            self.speech.speech_model = value;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_VOICE") {
            self.speech.voice = value;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_LANGUAGE") {
            self.speech.language = value;
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_AUDIO_DIR") {
            self.speech.audio_dir = PathBuf::from(value);
        }
        if let Some(value) = read_env("LEADLINE_SPEECH_TIMEOUT_SECS") {
            self.speech.timeout_secs = parse_u64("LEADLINE_SPEECH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_SHEETS_BACKEND") {
            self.sheets.backend = value.parse()?;
        }
        if let Some(value) = read_env("LEADLINE_SHEETS_SHEET_NAME") {
            self.sheets.sheet_name = value;
        }
        if let Some(value) = read_env("LEADLINE_SHEETS_SPREADSHEET_ID") {
            self.sheets.spreadsheet_id = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_SHEETS_ACCESS_TOKEN") {
            self.sheets.access_token = Some(secret_value(value));
        }
        let credentials_file = read_env("LEADLINE_SHEETS_CREDENTIALS_FILE")
            .or_else(|| read_env("GOOGLE_APPLICATION_CREDENTIALS"));
        if let Some(value) = credentials_file {
            self.sheets.credentials_file = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("LEADLINE_SHEETS_BASE_URL") {
            self.sheets.base_url = Some(value);
        }
        if let Some(value) = read_env("LEADLINE_SHEETS_TIMEOUT_SECS") {
            self.sheets.timeout_secs = parse_u64("LEADLINE_SHEETS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_PORT") {
            self.server.port = parse_u16("LEADLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADLINE_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = Some(value);
        }

        if let Some(value) = read_env("LEADLINE_AGENT_COMPANY_NAME") {
            self.agent.company_name = value;
        }
        if let Some(value) = read_env("LEADLINE_AGENT_SESSION_IDLE_SECS") {
            self.agent.session_idle_secs = parse_u64("LEADLINE_AGENT_SESSION_IDLE_SECS", &value)?;
        }

        let log_level =
            read_env("LEADLINE_LOGGING_LEVEL").or_else(|| read_env("LEADLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADLINE_LOGGING_FORMAT").or_else(|| read_env("LEADLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_base_url) = overrides.llm_base_url {
            self.llm.base_url = Some(llm_base_url);
        }
        if let Some(speech_enabled) = overrides.speech_enabled {
            self.speech.enabled = speech_enabled;
        }
        if let Some(speech_api_key) = overrides.speech_api_key {
            self.speech.api_key = Some(secret_value(speech_api_key));
        }
        if let Some(speech_base_url) = overrides.speech_base_url {
            self.speech.base_url = speech_base_url;
        }
        if let Some(audio_dir) = overrides.audio_dir {
            self.speech.audio_dir = audio_dir;
        }
        if let Some(sheets_backend) = overrides.sheets_backend {
            self.sheets.backend = sheets_backend;
        }
        if let Some(spreadsheet_id) = overrides.sheets_spreadsheet_id {
            self.sheets.spreadsheet_id = Some(spreadsheet_id);
        }
        if let Some(access_token) = overrides.sheets_access_token {
            self.sheets.access_token = Some(secret_value(access_token));
        }
        if let Some(credentials_file) = overrides.sheets_credentials_file {
            self.sheets.credentials_file = Some(credentials_file);
        }
        if let Some(sheets_base_url) = overrides.sheets_base_url {
            self.sheets.base_url = Some(sheets_base_url);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
        if let Some(company_name) = overrides.company_name {
            self.agent.company_name = company_name;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_speech(&self.speech)?;
        validate_sheets(&self.sheets)?;
        validate_server(&self.server)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Gemini | LlmProvider::OpenAi => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for gemini/openai providers (set LEADLINE_LLM_API_KEY or GEMINI_API_KEY)"
                        .to_string(),
                ));
            }
            if llm.model.trim().is_empty() {
                return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
        LlmProvider::Disabled => {}
    }

    if let Some(base_url) = &llm.base_url {
        require_http_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_speech(speech: &SpeechConfig) -> Result<(), ConfigError> {
    if !speech.enabled {
        return Ok(());
    }

    let missing = speech
        .api_key
        .as_ref()
        .map(|value| value.expose_secret().trim().is_empty())
        .unwrap_or(true);
    if missing {
        return Err(ConfigError::Validation(
            "speech.api_key is required when speech.enabled is true".to_string(),
        ));
    }

    if speech.timeout_secs == 0 || speech.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "speech.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if speech.audio_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation("speech.audio_dir must not be empty".to_string()));
    }

    require_http_url("speech.base_url", &speech.base_url)
}

fn validate_sheets(sheets: &SheetsConfig) -> Result<(), ConfigError> {
    if sheets.sheet_name.trim().is_empty() {
        return Err(ConfigError::Validation("sheets.sheet_name must not be empty".to_string()));
    }

    if sheets.timeout_secs == 0 || sheets.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "sheets.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if sheets.backend == SheetBackendKind::Google {
        let missing_id =
            sheets.spreadsheet_id.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
        if missing_id {
            return Err(ConfigError::Validation(
                "sheets.spreadsheet_id is required for the google backend".to_string(),
            ));
        }
        let missing_token = sheets
            .access_token
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        let missing_credentials = sheets
            .credentials_file
            .as_ref()
            .map(|path| path.as_os_str().is_empty())
            .unwrap_or(true);
        if missing_token && missing_credentials {
            return Err(ConfigError::Validation(
                "sheets.credentials_file or sheets.access_token is required for the google backend"
                    .to_string(),
            ));
        }
    }

    if let Some(base_url) = &sheets.base_url {
        require_http_url("sheets.base_url", base_url)?;
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if let Some(public_base_url) = &server.public_base_url {
        require_http_url("server.public_base_url", public_base_url)?;
    }

    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.company_name.trim().is_empty() {
        return Err(ConfigError::Validation("agent.company_name must not be empty".to_string()));
    }
    if agent.session_idle_secs == 0 {
        return Err(ConfigError::Validation(
            "agent.session_idle_secs must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn require_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{field} must start with http:// or https://")))
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    speech: Option<SpeechPatch>,
    sheets: Option<SheetsPatch>,
    server: Option<ServerPatch>,
    agent: Option<AgentPatch>,
    script: Option<ScriptPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SpeechPatch {
    enabled: Option<bool>,
    api_key: Option<String>,
    base_url: Option<String>,
    transcription_model: Option<String>,
    speech_model: Option<String>,
    voice: Option<String>,
    language: Option<String>,
    audio_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SheetsPatch {
    backend: Option<SheetBackendKind>,
    sheet_name: Option<String>,
    spreadsheet_id: Option<String>,
    access_token: Option<String>,
    credentials_file: Option<PathBuf>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    public_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    company_name: Option<String>,
    session_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ScriptPatch {
    questions: Vec<ScriptQuestion>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

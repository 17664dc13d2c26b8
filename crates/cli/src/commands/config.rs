use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadline_core::config::{AppConfig, LoadOptions};
use secrecy::SecretString;
use toml::Value;

struct ConfigLine {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl ConfigLine {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    render(&config, config_file_path.as_deref(), config_file_doc.as_ref())
}

fn render(config: &AppConfig, file_path: Option<&Path>, file_doc: Option<&Value>) -> String {
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for line in effective_lines(config) {
        let source = field_source(line.key, line.env_keys, file_doc, file_path);
        lines.push(format!("- {} = {} (source: {source})", line.key, line.value));
    }

    let script_source = if file_doc.is_some_and(|doc| contains_path(doc, "script.questions")) {
        "file"
    } else {
        "default"
    };
    lines.push(format!(
        "- script.questions = [{}] (source: {script_source})",
        config.script.keys().collect::<Vec<_>>().join(", ")
    ));

    lines.join("\n")
}

fn effective_lines(config: &AppConfig) -> Vec<ConfigLine> {
    vec![
        ConfigLine::new("database.url", &config.database.url, &["LEADLINE_DATABASE_URL"]),
        ConfigLine::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["LEADLINE_DATABASE_MAX_CONNECTIONS"],
        ),
        ConfigLine::new(
            "llm.provider",
            format!("{:?}", config.llm.provider),
            &["LEADLINE_LLM_PROVIDER"],
        ),
        ConfigLine::new("llm.model", &config.llm.model, &["LEADLINE_LLM_MODEL"]),
        ConfigLine::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            &["LEADLINE_LLM_BASE_URL"],
        ),
        ConfigLine::new(
            "llm.api_key",
            redact(config.llm.api_key.as_ref()),
            &["LEADLINE_LLM_API_KEY", "GEMINI_API_KEY"],
        ),
        ConfigLine::new(
            "llm.timeout_secs",
            config.llm.timeout_secs.to_string(),
            &["LEADLINE_LLM_TIMEOUT_SECS"],
        ),
        ConfigLine::new(
            "speech.enabled",
            config.speech.enabled.to_string(),
            &["LEADLINE_SPEECH_ENABLED"],
        ),
        ConfigLine::new(
            "speech.api_key",
            redact(config.speech.api_key.as_ref()),
            &["LEADLINE_SPEECH_API_KEY"],
        ),
        ConfigLine::new("speech.base_url", &config.speech.base_url, &["LEADLINE_SPEECH_BASE_URL"]),
        ConfigLine::new(
            "speech.audio_dir",
            config.speech.audio_dir.display().to_string(),
            &["LEADLINE_SPEECH_AUDIO_DIR"],
        ),
        ConfigLine::new(
            "sheets.backend",
            format!("{:?}", config.sheets.backend),
            &["LEADLINE_SHEETS_BACKEND"],
        ),
        ConfigLine::new(
            "sheets.sheet_name",
            &config.sheets.sheet_name,
            &["LEADLINE_SHEETS_SHEET_NAME"],
        ),
        ConfigLine::new(
            "sheets.spreadsheet_id",
            config.sheets.spreadsheet_id.as_deref().unwrap_or("<unset>"),
            &["LEADLINE_SHEETS_SPREADSHEET_ID"],
        ),
        ConfigLine::new(
            "sheets.access_token",
            redact(config.sheets.access_token.as_ref()),
            &["LEADLINE_SHEETS_ACCESS_TOKEN"],
        ),
        ConfigLine::new(
            "sheets.credentials_file",
            config
                .sheets
                .credentials_file
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string()),
            &["LEADLINE_SHEETS_CREDENTIALS_FILE", "GOOGLE_APPLICATION_CREDENTIALS"],
        ),
        ConfigLine::new(
            "server.bind_address",
            &config.server.bind_address,
            &["LEADLINE_SERVER_BIND_ADDRESS"],
        ),
        ConfigLine::new("server.port", config.server.port.to_string(), &["LEADLINE_SERVER_PORT"]),
        ConfigLine::new(
            "server.public_base_url",
            config.server.public_base_url.as_deref().unwrap_or("<unset>"),
            &["LEADLINE_SERVER_PUBLIC_BASE_URL"],
        ),
        ConfigLine::new(
            "agent.company_name",
            &config.agent.company_name,
            &["LEADLINE_AGENT_COMPANY_NAME"],
        ),
        ConfigLine::new(
            "agent.session_idle_secs",
            config.agent.session_idle_secs.to_string(),
            &["LEADLINE_AGENT_SESSION_IDLE_SECS"],
        ),
        ConfigLine::new(
            "logging.level",
            &config.logging.level,
            &["LEADLINE_LOGGING_LEVEL", "LEADLINE_LOG_LEVEL"],
        ),
        ConfigLine::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LEADLINE_LOGGING_FORMAT", "LEADLINE_LOG_FORMAT"],
        ),
    ]
}

fn redact(secret: Option<&SecretString>) -> &'static str {
    if secret.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadline.toml"), PathBuf::from("config/leadline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use leadline_core::config::AppConfig;
    use toml::Value;

    use super::{contains_path, render};

    #[test]
    fn file_values_are_attributed_to_the_file() {
        let doc: Value = r#"
[agent]
company_name = "Acme"

[[script.questions]]
key = "name"
label = "Name"
prompt = "Who are you?"
"#
        .parse()
        .expect("toml");
        let config = AppConfig::default();

        let output = render(&config, Some(Path::new("leadline.toml")), Some(&doc));

        assert!(output.contains("- agent.company_name = Innovate Inc. (source: file (leadline.toml))"));
        assert!(output.contains("- sheets.sheet_name = Leads (source: default)"));
        assert!(output.contains("(source: file)"));
    }

    #[test]
    fn secrets_are_never_rendered() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("gemini-very-secret".to_string().into());

        let output = render(&config, None, None);

        assert!(output.contains("- llm.api_key = <redacted>"));
        assert!(output.contains("- sheets.access_token = <unset>"));
        assert!(!output.contains("gemini-very-secret"));
    }

    #[test]
    fn nested_paths_are_resolved() {
        let doc: Value = "[sheets]\nbackend = \"memory\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "sheets.backend"));
        assert!(!contains_path(&doc, "sheets.sheet_name"));
        assert!(!contains_path(&doc, "llm"));
    }
}

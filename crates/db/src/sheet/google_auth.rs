//! Bearer tokens for the Sheets API.
//!
//! A static `sheets.access_token` is used as-is. Otherwise the service-account
//! key file is used to sign an RS256 assertion, which is exchanged at the
//! key's token endpoint; the minted token is cached until shortly before it
//! expires.

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use leadline_core::config::SheetsConfig;
use reqwest::Client;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::SheetError;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);
/// Cached tokens closer than this to expiry are minted again.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
struct KeyFile {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME.as_secs()
}

/// Signing identity from a service-account JSON key.
#[derive(Clone)]
pub struct ServiceAccountKey {
    client_email: String,
    key_id: Option<String>,
    signing_key: EncodingKey,
    token_uri: String,
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("key_id", &self.key_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(raw: &str) -> Result<Self, SheetError> {
        let file: KeyFile = serde_json::from_str(raw).map_err(|error| {
            SheetError::Credentials(format!("service account key is not valid json: {error}"))
        })?;
        if let Some(kind) = file.kind.as_deref().filter(|kind| *kind != "service_account") {
            return Err(SheetError::Credentials(format!(
                "expected a `service_account` key, found `{kind}`"
            )));
        }
        let signing_key = EncodingKey::from_rsa_pem(file.private_key.as_bytes()).map_err(|error| {
            SheetError::Credentials(format!("service account private key is unusable: {error}"))
        })?;

        Ok(Self {
            client_email: file.client_email,
            key_id: file.private_key_id,
            signing_key,
            token_uri: file.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
        })
    }

    pub fn from_file(path: &Path) -> Result<Self, SheetError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            SheetError::Credentials(format!("could not read `{}`: {error}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }

    pub fn with_token_uri(mut self, token_uri: impl Into<String>) -> Self {
        self.token_uri = token_uri.into();
        self
    }

    fn assertion(&self, issued_at: u64) -> Result<String, SheetError> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME.as_secs(),
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        encode(&header, &claims, &self.signing_key).map_err(|error| {
            SheetError::Credentials(format!("could not sign token request: {error}"))
        })
    }
}

struct CachedToken {
    token: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.saturating_duration_since(now) > REFRESH_MARGIN
    }
}

#[derive(Clone)]
enum TokenSource {
    Static(SecretString),
    ServiceAccount {
        client: Client,
        key: Arc<ServiceAccountKey>,
        cache: Arc<RwLock<Option<CachedToken>>>,
    },
}

#[derive(Clone)]
pub struct GoogleAuth {
    source: TokenSource,
}

impl GoogleAuth {
    pub fn access_token(token: SecretString) -> Self {
        Self { source: TokenSource::Static(token) }
    }

    pub fn service_account(client: Client, key: ServiceAccountKey) -> Self {
        Self {
            source: TokenSource::ServiceAccount {
                client,
                key: Arc::new(key),
                cache: Arc::new(RwLock::new(None)),
            },
        }
    }

    /// A configured `access_token` overrides the key file.
    pub fn from_config(config: &SheetsConfig, client: Client) -> Result<Self, SheetError> {
        if let Some(token) = &config.access_token {
            return Ok(Self::access_token(token.clone()));
        }
        let path = config.credentials_file.as_deref().ok_or_else(|| {
            SheetError::Credentials(
                "sheets.credentials_file or sheets.access_token is required".to_string(),
            )
        })?;
        Ok(Self::service_account(client, ServiceAccountKey::from_file(path)?))
    }

    pub fn is_service_account(&self) -> bool {
        matches!(self.source, TokenSource::ServiceAccount { .. })
    }

    pub async fn bearer(&self) -> Result<SecretString, SheetError> {
        let (client, key, cache) = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount { client, key, cache } => (client, key, cache),
        };

        if let Some(cached) = cache.read().await.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.token.clone());
            }
        }

        let mut cache = cache.write().await;
        if let Some(cached) = cache.as_ref() {
            if cached.is_fresh(Instant::now()) {
                return Ok(cached.token.clone());
            }
        }
        let minted = exchange(client, key).await?;
        let token = minted.token.clone();
        *cache = Some(minted);
        Ok(token)
    }

    /// Drops a cached token the API has rejected so the next call mints anew.
    pub async fn invalidate(&self) {
        if let TokenSource::ServiceAccount { cache, .. } = &self.source {
            cache.write().await.take();
        }
    }
}

async fn exchange(client: &Client, key: &ServiceAccountKey) -> Result<CachedToken, SheetError> {
    let issued_at =
        SystemTime::now().duration_since(UNIX_EPOCH).map(|since| since.as_secs()).unwrap_or(0);
    let assertion = key.assertion(issued_at)?;
    let requested_at = Instant::now();

    let response = client
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        debug!(status = status.as_u16(), body = %body, "token exchange rejected");
        return Err(match status.as_u16() {
            400 | 401 | 403 => SheetError::Unauthorized(body),
            code => SheetError::Api { status: code, body },
        });
    }

    let token: TokenResponse =
        response.json().await.map_err(|error| SheetError::Decode(error.to_string()))?;
    info!(
        event_name = "sheets.token.minted",
        correlation_id = "sheets-auth",
        client_email = %key.client_email,
        expires_in_secs = token.expires_in,
        "service account access token minted"
    );

    Ok(CachedToken {
        token: SecretString::from(token.access_token),
        expires_at: requested_at + Duration::from_secs(token.expires_in),
    })
}

//! Credential and endpoint resolution.
//!
//! A submission authenticates with exactly one of:
//! - an API key, sent as the `key` query parameter, or
//! - an OAuth2 bearer token from the default credential chain.
//!
//! The default chain uses the first source that applies:
//! 1. the inline `credentials` option
//! 2. the `keyFilename` option
//! 3. the file named by `GOOGLE_APPLICATION_CREDENTIALS`
//! 4. the metadata server's default service account
//!
//! Credential files are either `service_account` keys (signed JWT bearer
//! grant) or `authorized_user` refresh tokens. Tokens are cached until shortly
//! before they expire.

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use errata_core::{
    env::{GCE_METADATA_HOST, GOOGLE_APPLICATION_CREDENTIALS},
    Clock, Configuration, Environment, ProjectIdLookup, ProjectLookupError,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::Url;

use crate::error::{DeliveryError, Result};

/// OAuth2 scope requested for submissions.
pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";

/// Token endpoint used when a credentials file names none.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Metadata server host used when `GCE_METADATA_HOST` is unset.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const DEFAULT_TOKEN_LIFETIME_SECONDS: i64 = 3600;

/// How one request is authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum RequestAuth {
    /// API key, sent as the `key` query parameter.
    ApiKey(String),
    /// OAuth2 access token, sent as a bearer `Authorization` header.
    Bearer(String),
    /// No credentials could be obtained; the request is sent as is.
    Anonymous,
}

impl fmt::Debug for RequestAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ApiKey(_) => f.write_str("ApiKey(<redacted>)"),
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Source of OAuth2 access tokens.
#[async_trait::async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// Returns a currently valid access token.
    async fn access_token(&self) -> Result<String>;
}

/// Picks the authentication for a submission.
///
/// An API key always wins and skips token acquisition entirely. Otherwise a
/// token is requested from `tokens`; failure to get one is logged and yields
/// [`RequestAuth::Anonymous`] so that the request fails at the HTTP layer.
pub async fn resolve_auth(config: &Configuration, tokens: &dyn TokenProvider) -> RequestAuth {
    if let Some(key) = config.key() {
        info!("API key provided; skipping OAuth2 token acquisition");
        return RequestAuth::ApiKey(key.to_string());
    }

    match tokens.access_token().await {
        Ok(token) => RequestAuth::Bearer(token),
        Err(e) => {
            tracing::error!(error = %e, "unable to obtain an access token; sending unauthenticated");
            RequestAuth::Anonymous
        },
    }
}

/// Builds the `events:report` URL for a project.
///
/// # Errors
///
/// Returns [`DeliveryError::ConfigurationError`] if `api_endpoint` is not a
/// valid base URL.
pub fn report_url(api_endpoint: &str, project_id: &str, auth: &RequestAuth) -> Result<Url> {
    let mut url = Url::parse(api_endpoint).map_err(|e| {
        DeliveryError::configuration(format!("invalid apiEndpoint {api_endpoint:?}: {e}"))
    })?;

    url.path_segments_mut()
        .map_err(|()| {
            DeliveryError::configuration(format!("apiEndpoint {api_endpoint:?} cannot be a base"))
        })?
        .pop_if_empty()
        .extend(["v1beta1", "projects", project_id, "events:report"]);

    if let RequestAuth::ApiKey(key) = auth {
        url.query_pairs_mut().append_pair("key", key);
    }

    Ok(url)
}

/// Contents of a credentials JSON file.
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsFile {
    /// A service account key.
    ServiceAccount(ServiceAccountKey),
    /// A user's refresh token, as written by `gcloud auth application-default login`.
    AuthorizedUser(AuthorizedUserKey),
}

impl fmt::Debug for CredentialsFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServiceAccount(key) => {
                f.debug_struct("ServiceAccount").field("client_email", &key.client_email).finish()
            },
            Self::AuthorizedUser(key) => {
                f.debug_struct("AuthorizedUser").field("client_id", &key.client_id).finish()
            },
        }
    }
}

impl CredentialsFile {
    /// Parses an inline credentials object.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::AuthResolution`] for unsupported or incomplete
    /// credentials.
    pub fn from_map(credentials: &Map<String, Value>) -> Result<Self> {
        serde_json::from_value(Value::Object(credentials.clone()))
            .map_err(|e| DeliveryError::auth(format!("invalid credentials object: {e}")))
    }

    /// Reads and parses a credentials file.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::AuthResolution`] if the file cannot be read or
    /// parsed.
    pub async fn load(path: &std::path::Path) -> Result<Self> {
        let contents = tokio::fs::read(path).await.map_err(|e| {
            DeliveryError::auth(format!("unable to read credentials file {}: {e}", path.display()))
        })?;
        serde_json::from_slice(&contents).map_err(|e| {
            DeliveryError::auth(format!("invalid credentials file {}: {e}", path.display()))
        })
    }

    /// Returns the project the credentials belong to, if recorded.
    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::ServiceAccount(key) => key.project_id.as_deref(),
            Self::AuthorizedUser(key) => key.quota_project_id.as_deref(),
        }
        .filter(|id| !id.is_empty())
    }
}

/// Service account key fields used for the JWT bearer grant.
#[derive(Clone, Deserialize, Serialize)]
pub struct ServiceAccountKey {
    /// Service account email, the assertion issuer.
    pub client_email: String,
    /// PEM-encoded RSA private key.
    pub private_key: String,
    /// Key id, sent as the JWT `kid`.
    #[serde(default)]
    pub private_key_id: Option<String>,
    /// Token endpoint.
    #[serde(default)]
    pub token_uri: Option<String>,
    /// Owning project.
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Authorized user fields used for the refresh-token grant.
#[derive(Clone, Deserialize, Serialize)]
pub struct AuthorizedUserKey {
    /// OAuth2 client id.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Project billed for quota.
    #[serde(default)]
    pub quota_project_id: Option<String>,
    /// Token endpoint.
    #[serde(default)]
    pub token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

/// Client for the compute metadata server.
#[derive(Debug, Clone)]
pub struct MetadataServer {
    http: reqwest::Client,
    base_url: String,
}

impl MetadataServer {
    /// Targets `GCE_METADATA_HOST`, or the default metadata host.
    pub fn from_env(env: &dyn Environment, http: reqwest::Client) -> Self {
        let host =
            env.non_empty(GCE_METADATA_HOST).unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self { http, base_url: format!("http://{host}/computeMetadata/v1") }
    }

    async fn get(&self, path: &str) -> std::result::Result<reqwest::Response, String> {
        let response = self
            .http
            .get(format!("{}/{path}", self.base_url))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| format!("metadata server unreachable: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("metadata server returned HTTP {}", response.status().as_u16()));
        }
        Ok(response)
    }

    async fn access_token(&self) -> Result<TokenResponse> {
        self.get("instance/service-accounts/default/token")
            .await
            .map_err(DeliveryError::auth)?
            .json()
            .await
            .map_err(|e| DeliveryError::auth(format!("invalid metadata token response: {e}")))
    }

    /// Reads the project id of the instance.
    ///
    /// # Errors
    ///
    /// Returns a [`ProjectLookupError`] if the metadata server is unreachable
    /// or answers with an error.
    pub async fn project_id(&self) -> std::result::Result<String, ProjectLookupError> {
        let response = self.get("project/project-id").await.map_err(ProjectLookupError::new)?;
        let text = response
            .text()
            .await
            .map_err(|e| ProjectLookupError::new(format!("invalid metadata response: {e}")))?;
        Ok(text.trim().to_string())
    }
}

#[async_trait::async_trait]
impl ProjectIdLookup for MetadataServer {
    async fn lookup_project_id(&self) -> std::result::Result<String, ProjectLookupError> {
        self.project_id().await
    }
}

/// The default OAuth2 credential chain.
pub struct DefaultCredentials {
    http: reqwest::Client,
    env: Arc<dyn Environment>,
    inline: Option<Map<String, Value>>,
    key_filename: Option<PathBuf>,
    metadata: MetadataServer,
    clock: Arc<dyn Clock>,
    cache: Mutex<Option<CachedToken>>,
}

impl fmt::Debug for DefaultCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultCredentials")
            .field("inline", &self.inline.is_some())
            .field("key_filename", &self.key_filename)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

enum CredentialSource {
    File(CredentialsFile),
    Metadata,
}

impl DefaultCredentials {
    /// Creates the credential chain for a configuration.
    pub fn new(config: &Configuration, http: reqwest::Client, clock: Arc<dyn Clock>) -> Self {
        let env = config.environment().clone();
        Self {
            metadata: MetadataServer::from_env(env.as_ref(), http.clone()),
            http,
            env,
            inline: config.credentials().cloned(),
            key_filename: config.key_filename().cloned(),
            clock,
            cache: Mutex::new(None),
        }
    }

    /// Returns the metadata server client used as the last resort.
    pub fn metadata(&self) -> &MetadataServer {
        &self.metadata
    }

    async fn source(&self) -> Result<CredentialSource> {
        if let Some(inline) = &self.inline {
            debug!("using credentials from configuration");
            return CredentialsFile::from_map(inline).map(CredentialSource::File);
        }
        if let Some(path) = &self.key_filename {
            debug!(path = %path.display(), "using credentials from keyFilename");
            return CredentialsFile::load(path).await.map(CredentialSource::File);
        }
        if let Some(path) = self.env.non_empty(GOOGLE_APPLICATION_CREDENTIALS) {
            debug!(path = %path, "using credentials from {GOOGLE_APPLICATION_CREDENTIALS}");
            return CredentialsFile::load(path.as_ref()).await.map(CredentialSource::File);
        }
        debug!("using metadata server credentials");
        Ok(CredentialSource::Metadata)
    }

    async fn fetch_token(&self) -> Result<TokenResponse> {
        match self.source().await? {
            CredentialSource::File(CredentialsFile::ServiceAccount(key)) => {
                self.service_account_token(&key).await
            },
            CredentialSource::File(CredentialsFile::AuthorizedUser(key)) => {
                self.refresh_token(&key).await
            },
            CredentialSource::Metadata => self.metadata.access_token().await,
        }
    }

    async fn service_account_token(&self, key: &ServiceAccountKey) -> Result<TokenResponse> {
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let issued_at = self.clock.now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: token_uri,
            iat: issued_at,
            exp: issued_at + ASSERTION_LIFETIME_SECONDS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = key.private_key_id.clone();
        let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| DeliveryError::auth(format!("invalid service account private key: {e}")))?;
        let assertion = jsonwebtoken::encode(&header, &claims, &signing_key)
            .map_err(|e| DeliveryError::auth(format!("failed to sign token assertion: {e}")))?;

        self.exchange(token_uri, &[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .await
    }

    async fn refresh_token(&self, key: &AuthorizedUserKey) -> Result<TokenResponse> {
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        self.exchange(
            token_uri,
            &[
                ("grant_type", "refresh_token"),
                ("client_id", key.client_id.as_str()),
                ("client_secret", key.client_secret.as_str()),
                ("refresh_token", key.refresh_token.as_str()),
            ],
        )
        .await
    }

    async fn exchange(&self, token_uri: &str, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let response = self
            .http
            .post(token_uri)
            .form(form)
            .send()
            .await
            .map_err(|e| DeliveryError::auth(format!("token endpoint unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| DeliveryError::auth(format!("invalid token response: {e}")))
    }
}

#[async_trait::async_trait]
impl TokenProvider for DefaultCredentials {
    async fn access_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let now = self.clock.now();
        let margin = chrono::Duration::from_std(TOKEN_REFRESH_MARGIN).unwrap_or_default();

        if let Some(cached) = cache.as_ref() {
            if cached.expires_at - margin > now {
                return Ok(cached.token.clone());
            }
        }

        let response = self.fetch_token().await?;
        let lifetime = response.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECONDS);
        debug!(expires_in = lifetime, "acquired access token");
        *cache = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: now + chrono::Duration::seconds(lifetime),
        });

        Ok(response.access_token)
    }
}

#[async_trait::async_trait]
impl ProjectIdLookup for DefaultCredentials {
    async fn lookup_project_id(&self) -> std::result::Result<String, ProjectLookupError> {
        if let Ok(CredentialSource::File(file)) = self.source().await {
            if let Some(project_id) = file.project_id() {
                return Ok(project_id.to_string());
            }
        }
        self.metadata.project_id().await
    }
}

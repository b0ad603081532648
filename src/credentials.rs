#![forbid(unsafe_code)]

//! OAuth2 access for the update phase.
//!
//! The token lives in a JSON file next to the binary's working directory. It
//! is refreshed in place when expired and written back before anything else
//! uses it, so the interactive consent flow only runs when there is no usable
//! refresh token.

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use url::Url;

use crate::security::{ensure_private_file, restrict_to_owner};

pub const YOUTUBE_SCOPE: &str = "https://www.googleapis.com/auth/youtube.force-ssl";
const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_REDIRECT_URI: &str = "http://localhost";
/// Tokens this close to expiry are refreshed up front.
const EXPIRY_MARGIN_SECS: i64 = 60;

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

/// The OAuth client registered in the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let file: ClientSecretsFile = serde_json::from_str(raw)?;
        file.installed
            .or(file.web)
            .ok_or_else(|| anyhow!("client secrets need an `installed` or `web` section"))
    }

    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }

    /// URL the user opens to grant access. Asks for offline access so the
    /// response carries a refresh token.
    pub fn consent_url(&self) -> Result<Url> {
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri()),
                ("response_type", "code"),
                ("scope", YOUTUBE_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .with_context(|| format!("building consent URL from {}", self.auth_uri))
    }
}

/// Token endpoint reply.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

fn default_expires_in() -> i64 {
    3600
}

/// Persisted credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl StoredToken {
    /// Refresh responses usually omit the refresh token; the previous one is
    /// kept in that case.
    pub fn from_response(
        response: TokenResponse,
        previous_refresh: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: now + Duration::seconds(response.expires_in.max(0)),
            scope: response.scope,
            token_type: response.token_type.unwrap_or_else(default_token_type),
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty()
            && self.expires_at - now > Duration::seconds(EXPIRY_MARGIN_SECS)
    }
}

/// The two grant types the update phase needs.
pub trait TokenEndpoint {
    fn refresh(&self, secrets: &ClientSecrets, refresh_token: &str) -> Result<TokenResponse>;
    fn exchange_code(&self, secrets: &ClientSecrets, code: &str) -> Result<TokenResponse>;
}

pub struct GoogleTokenEndpoint {
    agent: ureq::Agent,
}

impl Default for GoogleTokenEndpoint {
    fn default() -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(std::time::Duration::from_secs(30))
                .build(),
        }
    }
}

impl GoogleTokenEndpoint {
    fn post(&self, secrets: &ClientSecrets, form: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut fields = vec![
            ("client_id", secrets.client_id.as_str()),
            ("client_secret", secrets.client_secret.as_str()),
        ];
        fields.extend_from_slice(form);
        match self.agent.post(&secrets.token_uri).send_form(&fields) {
            Ok(response) => response.into_json().context("decoding token response"),
            Err(ureq::Error::Status(code, response)) => {
                let body = response
                    .into_string()
                    .unwrap_or_else(|_| "<body unavailable>".to_string());
                bail!("token endpoint returned {code}: {}", body.trim())
            }
            Err(err) => Err(err).context("calling token endpoint"),
        }
    }
}

impl TokenEndpoint for GoogleTokenEndpoint {
    fn refresh(&self, secrets: &ClientSecrets, refresh_token: &str) -> Result<TokenResponse> {
        self.post(
            secrets,
            &[
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
        )
    }

    fn exchange_code(&self, secrets: &ClientSecrets, code: &str) -> Result<TokenResponse> {
        self.post(
            secrets,
            &[
                ("code", code),
                ("redirect_uri", secrets.redirect_uri()),
                ("grant_type", "authorization_code"),
            ],
        )
    }
}

/// JSON file holding the [`StoredToken`].
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `None` when there is no file yet or when it cannot be decoded.
    pub fn load(&self) -> Result<Option<StoredToken>> {
        if !self.path.exists() {
            return Ok(None);
        }
        ensure_private_file(&self.path)?;
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Reading {}", self.path.display()))?;
        match serde_json::from_str(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(err) => {
                warn!(
                    "ignoring unreadable credentials in {}: {err}",
                    self.path.display()
                );
                Ok(None)
            }
        }
    }

    pub fn save(&self, token: &StoredToken) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| format!("Creating {}", parent.display()))?;
        }
        let payload = serde_json::to_vec_pretty(token).context("serializing credentials")?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, payload)
            .with_context(|| format!("Writing {}", tmp_path.display()))?;
        restrict_to_owner(&tmp_path)?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Replacing {}", self.path.display()))?;
        Ok(())
    }
}

/// Returns a usable access token, refreshing or re-authorizing as needed.
/// Any new token is persisted before it is returned.
pub fn authorize<E: TokenEndpoint + ?Sized>(
    store: &CredentialStore,
    secrets: &ClientSecrets,
    endpoint: &E,
    input: &mut dyn BufRead,
    now: DateTime<Utc>,
) -> Result<StoredToken> {
    if let Some(token) = store.load()? {
        if token.is_valid(now) {
            return Ok(token);
        }
        if let Some(refresh_token) = token.refresh_token.clone() {
            match endpoint.refresh(secrets, &refresh_token) {
                Ok(response) => {
                    let refreshed = StoredToken::from_response(response, Some(refresh_token), now);
                    store.save(&refreshed)?;
                    info!("Refreshed YouTube credentials in {}", store.path().display());
                    return Ok(refreshed);
                }
                Err(err) => warn!("token refresh failed, asking for consent again: {err:#}"),
            }
        }
    }

    let token = interactive_consent(secrets, endpoint, input, now)?;
    store.save(&token)?;
    info!("Saved YouTube credentials to {}", store.path().display());
    Ok(token)
}

fn interactive_consent<E: TokenEndpoint + ?Sized>(
    secrets: &ClientSecrets,
    endpoint: &E,
    input: &mut dyn BufRead,
    now: DateTime<Utc>,
) -> Result<StoredToken> {
    let url = secrets.consent_url()?;
    println!("Authorize access to your YouTube channel by opening:");
    println!("  {url}");
    print!("Paste the URL you were redirected to (or just the code): ");
    std::io::stdout().flush().ok();

    let mut line = String::new();
    input
        .read_line(&mut line)
        .context("reading authorization code")?;
    let code = extract_code(&line)?;
    let response = endpoint
        .exchange_code(secrets, &code)
        .context("exchanging authorization code")?;
    Ok(StoredToken::from_response(response, None, now))
}

/// Accepts either the full redirect URL or the bare authorization code.
pub fn extract_code(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        bail!("no authorization code provided");
    }
    let Ok(url) = Url::parse(trimmed) else {
        return Ok(trimmed.to_string());
    };
    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => bail!("authorization was denied: {value}"),
            _ => {}
        }
    }
    code.filter(|value| !value.is_empty())
        .ok_or_else(|| anyhow!("redirect URL does not contain a code parameter"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::io::Cursor;
    use tempfile::tempdir;

    const SECRETS: &str = r#"{
        "installed": {
            "client_id": "client-1.apps.googleusercontent.com",
            "client_secret": "shh",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    #[derive(Default)]
    struct FakeEndpoint {
        refreshes: RefCell<Vec<String>>,
        exchanges: RefCell<Vec<String>>,
        fail_refresh: bool,
    }

    impl TokenEndpoint for FakeEndpoint {
        fn refresh(&self, _secrets: &ClientSecrets, refresh_token: &str) -> Result<TokenResponse> {
            self.refreshes.borrow_mut().push(refresh_token.to_string());
            if self.fail_refresh {
                bail!("invalid_grant");
            }
            Ok(TokenResponse {
                access_token: "refreshed".into(),
                expires_in: 3600,
                refresh_token: None,
                scope: None,
                token_type: Some("Bearer".into()),
            })
        }

        fn exchange_code(&self, _secrets: &ClientSecrets, code: &str) -> Result<TokenResponse> {
            self.exchanges.borrow_mut().push(code.to_string());
            Ok(TokenResponse {
                access_token: "fresh".into(),
                expires_in: 3600,
                refresh_token: Some("new-refresh".into()),
                scope: Some(YOUTUBE_SCOPE.into()),
                token_type: None,
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
    }

    fn token(access: &str, expires_at: DateTime<Utc>) -> StoredToken {
        StoredToken {
            access_token: access.into(),
            refresh_token: Some("refresh-1".into()),
            expires_at,
            scope: None,
            token_type: "Bearer".into(),
        }
    }

    #[test]
    fn client_secrets_parse_installed_section() -> Result<()> {
        let secrets = ClientSecrets::parse(SECRETS)?;
        assert_eq!(secrets.client_id, "client-1.apps.googleusercontent.com");
        assert_eq!(secrets.token_uri, DEFAULT_TOKEN_URI);
        let url = secrets.consent_url()?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("scope".into(), YOUTUBE_SCOPE.into())));
        assert!(pairs.contains(&("access_type".into(), "offline".into())));
        assert!(pairs.contains(&("client_id".into(), secrets.client_id.clone())));
        Ok(())
    }

    #[test]
    fn client_secrets_require_known_section() {
        assert!(ClientSecrets::parse(r#"{"other": {}}"#).is_err());
    }

    #[test]
    fn stored_token_validity_has_margin() {
        assert!(token("a", now() + Duration::minutes(10)).is_valid(now()));
        assert!(!token("a", now() + Duration::seconds(30)).is_valid(now()));
        assert!(!token("", now() + Duration::minutes(10)).is_valid(now()));
    }

    #[test]
    fn store_roundtrip_is_private() -> Result<()> {
        let dir = tempdir()?;
        let store = CredentialStore::new(dir.path().join("nested").join("credentials.json"));
        assert!(store.load()?.is_none());
        let saved = token("abc", now());
        store.save(&saved)?;
        ensure_private_file(store.path())?;
        assert_eq!(store.load()?, Some(saved));
        Ok(())
    }

    #[test]
    fn authorize_reuses_valid_token() -> Result<()> {
        let dir = tempdir()?;
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&token("still-good", now() + Duration::hours(1)))?;
        let endpoint = FakeEndpoint::default();
        let secrets = ClientSecrets::parse(SECRETS)?;
        let result = authorize(&store, &secrets, &endpoint, &mut Cursor::new(""), now())?;
        assert_eq!(result.access_token, "still-good");
        assert!(endpoint.refreshes.borrow().is_empty());
        assert!(endpoint.exchanges.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn authorize_refreshes_and_persists_expired_token() -> Result<()> {
        let dir = tempdir()?;
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&token("stale", now() - Duration::hours(1)))?;
        let endpoint = FakeEndpoint::default();
        let secrets = ClientSecrets::parse(SECRETS)?;

        let result = authorize(&store, &secrets, &endpoint, &mut Cursor::new(""), now())?;
        assert_eq!(result.access_token, "refreshed");
        assert_eq!(result.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(*endpoint.refreshes.borrow(), vec!["refresh-1".to_string()]);

        let persisted = store.load()?.expect("token persisted");
        assert_eq!(persisted, result);
        Ok(())
    }

    #[test]
    fn authorize_falls_back_to_consent_without_usable_token() -> Result<()> {
        let dir = tempdir()?;
        let store = CredentialStore::new(dir.path().join("credentials.json"));
        store.save(&token("stale", now() - Duration::hours(1)))?;
        let endpoint = FakeEndpoint {
            fail_refresh: true,
            ..FakeEndpoint::default()
        };
        let secrets = ClientSecrets::parse(SECRETS)?;
        let mut input = Cursor::new("http://localhost/?code=4%2Fabc&scope=x\n");

        let result = authorize(&store, &secrets, &endpoint, &mut input, now())?;
        assert_eq!(result.access_token, "fresh");
        assert_eq!(result.refresh_token.as_deref(), Some("new-refresh"));
        assert_eq!(*endpoint.exchanges.borrow(), vec!["4/abc".to_string()]);
        assert_eq!(store.load()?.map(|t| t.access_token), Some("fresh".to_string()));
        Ok(())
    }

    #[test]
    fn extract_code_accepts_url_or_bare_code() -> Result<()> {
        assert_eq!(extract_code("  4/xyz \n")?, "4/xyz");
        assert_eq!(extract_code("http://localhost/?state=s&code=abc")?, "abc");
        assert!(extract_code("").is_err());
        assert!(extract_code("http://localhost/?error=access_denied").is_err());
        assert!(extract_code("http://localhost/?state=s").is_err());
        Ok(())
    }
}

//! Authentication for Google Drive
//!
//! Two ways to obtain an access token: the installed-application OAuth2
//! flow with token persistence, and a service account key signed into a
//! JWT bearer grant. Both sit behind [`Authenticator`] so the Drive client
//! never knows which one it talks through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{DriveupError, Result};

const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

/// Local port the authorization callback listens on when the redirect URI names none
pub const DEFAULT_CALLBACK_PORT: u16 = 8085;

/// How long the browser flow waits for Google to redirect back
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// Explicit port of an `http://host:port/...` URI
fn redirect_port(uri: &str) -> Option<u16> {
    let rest = uri.strip_prefix("http://")?;
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Give a portless loopback redirect URI the callback listener's port
///
/// Google accepts any port for loopback redirects, so `http://localhost`
/// from a client secrets file becomes `http://localhost:8085`. Other URIs
/// are returned unchanged.
pub fn with_callback_port(uri: &str) -> String {
    let Some(rest) = uri.strip_prefix("http://") else {
        return uri.to_string();
    };
    if redirect_port(uri).is_some() {
        return uri.to_string();
    }
    let (authority, path) = match rest.find('/') {
        Some(i) => rest.split_at(i),
        None => (rest, ""),
    };
    format!("http://{}:{}{}", authority, DEFAULT_CALLBACK_PORT, path)
}

/// Source of access tokens for Drive API calls
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// A bearer token valid for at least the next request
    async fn access_token(&self) -> Result<String>;
}

/// OAuth2 client credentials (from Google Cloud Console)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl Default for OAuthCredentials {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: format!("http://localhost:{}", DEFAULT_CALLBACK_PORT),
        }
    }
}

impl OAuthCredentials {
    /// Reject empty credentials and the sample file's "Enter ..." placeholders
    pub fn validate(&self) -> Result<()> {
        let unset = |v: &str| v.trim().is_empty() || v.starts_with("Enter");
        if unset(&self.client_id) || unset(&self.client_secret) {
            return Err(DriveupError::Config(
                "OAuth client ID and secret are not configured. \
                 Pass --client-secrets or fill in ~/.driveup/config.json"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Stored OAuth tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: i64,
    pub token_type: String,
}

impl StoredTokens {
    /// Still usable for at least five minutes
    fn is_fresh(&self, now: i64) -> bool {
        self.expires_at > now + 300
    }
}

/// Google OAuth token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: u64,
    token_type: String,
}

/// OAuth2 installed-application flow for Google Drive
pub struct OAuthManager {
    credentials: OAuthCredentials,
    tokens_path: PathBuf,
    client: reqwest::Client,
    callback_timeout: Duration,
}

impl OAuthManager {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";
    const REVOKE_URL: &'static str = "https://oauth2.googleapis.com/revoke";

    /// Create a new OAuthManager storing tokens in `~/.driveup/tokens.json`
    pub fn new(credentials: OAuthCredentials) -> Self {
        let tokens_path = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".driveup")
            .join("tokens.json");

        Self::with_tokens_path(credentials, tokens_path)
    }

    pub fn with_tokens_path(credentials: OAuthCredentials, tokens_path: impl Into<PathBuf>) -> Self {
        // The authorization request, the token exchange and the listener
        // must all agree on one redirect URI.
        let redirect_uri = with_callback_port(&credentials.redirect_uri);
        Self {
            credentials: OAuthCredentials {
                redirect_uri,
                ..credentials
            },
            tokens_path: tokens_path.into(),
            client: reqwest::Client::new(),
            callback_timeout: CALLBACK_TIMEOUT,
        }
    }

    #[cfg(test)]
    fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Load tokens from disk
    fn load_tokens(&self) -> Result<StoredTokens> {
        let content = fs::read_to_string(&self.tokens_path)?;
        let tokens: StoredTokens = serde_json::from_str(&content)?;
        Ok(tokens)
    }

    /// Save tokens to disk
    fn save_tokens(&self, tokens: &StoredTokens) -> Result<()> {
        if let Some(parent) = self.tokens_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(tokens)?;
        fs::write(&self.tokens_path, content)?;
        debug!("Saved tokens to {:?}", self.tokens_path);
        Ok(())
    }

    /// Run the browser authorization flow
    pub async fn authorize(&self) -> Result<StoredTokens> {
        let auth_url = self.authorization_url();

        println!("\nGoogle Drive authorization required\n");
        println!("Please open this URL in your browser:\n");
        println!("  {}\n", auth_url);

        if open::that(&auth_url).is_err() {
            println!("(Could not open browser automatically)");
        }

        let code = self.wait_for_callback().await?;
        info!("Authorization code received");

        let tokens = self.exchange_code(&code).await?;
        info!("Authenticated with Google Drive");

        Ok(tokens)
    }

    fn authorization_url(&self) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_uri),
            urlencoding::encode(DRIVE_SCOPE),
        )
    }

    /// Port of the loopback redirect URI
    pub(crate) fn callback_port(&self) -> u16 {
        redirect_port(&self.credentials.redirect_uri).unwrap_or(DEFAULT_CALLBACK_PORT)
    }

    /// Wait for the OAuth redirect on a local listener
    async fn wait_for_callback(&self) -> Result<String> {
        let port = self.callback_port();
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| DriveupError::Auth(format!("Failed to start callback server: {}", e)))?;

        println!("Waiting for authorization (listening on port {})...", port);

        tokio::time::timeout(self.callback_timeout, accept_callback(&listener))
            .await
            .map_err(|_| {
                DriveupError::Auth(format!(
                    "No authorization callback received within {} seconds",
                    self.callback_timeout.as_secs()
                ))
            })?
    }

    /// Exchange authorization code for tokens
    async fn exchange_code(&self, code: &str) -> Result<StoredTokens> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.credentials.redirect_uri.as_str()),
        ];
        let token_response = self.request_tokens(&form, "Token exchange").await?;

        let tokens = StoredTokens {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            expires_at: chrono::Utc::now().timestamp() + token_response.expires_in as i64,
            token_type: token_response.token_type,
        };

        self.save_tokens(&tokens)?;
        Ok(tokens)
    }

    /// Refresh an expired access token
    async fn refresh_token(&self, refresh_token: &str) -> Result<StoredTokens> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let token_response = self.request_tokens(&form, "Token refresh").await?;

        let tokens = StoredTokens {
            access_token: token_response.access_token,
            // Google omits the refresh token on refresh
            refresh_token: token_response
                .refresh_token
                .or_else(|| Some(refresh_token.to_string())),
            expires_at: chrono::Utc::now().timestamp() + token_response.expires_in as i64,
            token_type: token_response.token_type,
        };

        self.save_tokens(&tokens)?;
        Ok(tokens)
    }

    async fn request_tokens(&self, form: &[(&str, &str)], what: &str) -> Result<TokenResponse> {
        let response = self
            .client
            .post(Self::TOKEN_URL)
            .form(form)
            .send()
            .await
            .map_err(|e| DriveupError::Auth(format!("{} failed: {}", what, e)))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(DriveupError::Auth(format!("{} failed: {}", what, error)));
        }

        response
            .json()
            .await
            .map_err(|e| DriveupError::Auth(format!("Failed to parse token response: {}", e)))
    }

    /// Revoke tokens and clear stored credentials
    pub async fn logout(&self) -> Result<()> {
        if let Ok(tokens) = self.load_tokens() {
            let _ = self
                .client
                .post(Self::REVOKE_URL)
                .form(&[("token", tokens.access_token.as_str())])
                .send()
                .await;
        }

        if self.tokens_path.exists() {
            fs::remove_file(&self.tokens_path)?;
        }

        info!("Logged out and cleared stored tokens");
        Ok(())
    }

    /// Check if a usable or refreshable token is stored
    pub fn is_authenticated(&self) -> bool {
        match self.load_tokens() {
            Ok(tokens) => {
                tokens.expires_at > chrono::Utc::now().timestamp() || tokens.refresh_token.is_some()
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Authenticator for OAuthManager {
    async fn access_token(&self) -> Result<String> {
        if let Ok(tokens) = self.load_tokens() {
            if tokens.is_fresh(chrono::Utc::now().timestamp()) {
                debug!("Using cached access token");
                return Ok(tokens.access_token);
            }

            if let Some(refresh_token) = &tokens.refresh_token {
                info!("Refreshing access token...");
                match self.refresh_token(refresh_token).await {
                    Ok(new_tokens) => return Ok(new_tokens.access_token),
                    Err(e) => debug!("Refresh failed, re-authorizing: {}", e),
                }
            }
        }

        info!("Starting OAuth authorization flow...");
        let tokens = self.authorize().await?;
        Ok(tokens.access_token)
    }
}

/// Serve callback requests until one carries an authorization code
async fn accept_callback(listener: &TcpListener) -> Result<String> {
    loop {
        let (stream, _) = listener.accept().await?;
        let mut reader = BufReader::new(stream);
        let mut request_line = String::new();
        reader.read_line(&mut request_line).await?;
        let stream = reader.get_mut();

        if let Some(code) = parse_code_from_request(&request_line) {
            let response = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
                <html><body style='font-family: sans-serif; text-align: center; padding: 50px;'>\
                <h1>Authorization successful</h1>\
                <p>You can close this window and return to the terminal.</p>\
                </body></html>";
            stream.write_all(response.as_bytes()).await?;
            return Ok(code);
        }

        let response = "HTTP/1.1 400 Bad Request\r\n\r\nMissing authorization code";
        let _ = stream.write_all(response.as_bytes()).await;
    }
}

/// Parse the authorization code out of an HTTP request line
fn parse_code_from_request(request: &str) -> Option<String> {
    // GET /?code=xxx&scope=... HTTP/1.1
    let path = request.split_whitespace().nth(1)?;
    let query = path.split('?').nth(1)?;

    query.split('&').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key == "code" {
            urlencoding::decode(value).ok().map(|c| c.into_owned())
        } else {
            None
        }
    })
}

/// Service account key structure
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

/// Token response of the JWT bearer grant
#[derive(Debug, Deserialize)]
struct ServiceTokenResponse {
    access_token: String,
}

/// Access tokens from a service account key file
pub struct ServiceAccountAuthenticator {
    key_file: PathBuf,
    client: reqwest::Client,
}

impl ServiceAccountAuthenticator {
    pub fn new(key_file: impl AsRef<Path>) -> Self {
        Self {
            key_file: key_file.as_ref().to_path_buf(),
            client: reqwest::Client::new(),
        }
    }

    fn load_key(&self) -> Result<ServiceAccountKey> {
        let key_content = fs::read_to_string(&self.key_file)?;
        serde_json::from_str(&key_content).map_err(|e| {
            DriveupError::Auth(format!("Failed to parse service account key: {}", e))
        })
    }

    /// Build the RS256-signed assertion for `key`
    fn signed_assertion(key: &ServiceAccountKey, now: i64) -> Result<String> {
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": DRIVE_SCOPE,
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        let header = base64_url_encode(r#"{"alg":"RS256","typ":"JWT"}"#.as_bytes());
        let payload = base64_url_encode(claims.to_string().as_bytes());
        let signing_input = format!("{}.{}", header, payload);

        let signature = sign_rs256(&signing_input, &key.private_key)
            .map_err(|e| DriveupError::Auth(format!("Failed to sign JWT: {}", e)))?;

        Ok(format!("{}.{}", signing_input, signature))
    }
}

#[async_trait]
impl Authenticator for ServiceAccountAuthenticator {
    async fn access_token(&self) -> Result<String> {
        let key = self.load_key()?;
        let jwt = Self::signed_assertion(&key, chrono::Utc::now().timestamp())?;

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", jwt.as_str()),
            ])
            .send()
            .await
            .map_err(|e| DriveupError::Auth(format!("Failed to get access token: {}", e)))?;

        if !response.status().is_success() {
            let error = response.text().await.unwrap_or_default();
            return Err(DriveupError::Auth(format!("Token request failed: {}", error)));
        }

        let token: ServiceTokenResponse = response
            .json()
            .await
            .map_err(|e| DriveupError::Auth(format!("Failed to parse token response: {}", e)))?;

        debug!("Obtained service account token for {}", key.client_email);
        Ok(token.access_token)
    }
}

/// Base64 URL-safe encoding without padding
fn base64_url_encode(data: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, data)
}

/// Sign data with RS256 (RSA-SHA256)
fn sign_rs256(
    data: &str,
    private_key_pem: &str,
) -> std::result::Result<String, Box<dyn std::error::Error>> {
    use rsa::pkcs1v15::SigningKey;
    use rsa::signature::{SignatureEncoding, Signer};
    use rsa::{pkcs8::DecodePrivateKey, RsaPrivateKey};
    use sha2::Sha256;

    let private_key = RsaPrivateKey::from_pkcs8_pem(private_key_pem)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature = signing_key.sign(data.as_bytes());

    Ok(base64_url_encode(&signature.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn credentials() -> OAuthCredentials {
        OAuthCredentials {
            client_id: "id.apps.googleusercontent.com".to_string(),
            client_secret: "secret".to_string(),
            redirect_uri: "http://localhost:9004".to_string(),
        }
    }

    #[test]
    fn test_parse_code_from_request() {
        let request = "GET /?code=4/0AfJohXn...abc123&scope=https://www.googleapis.com/auth/drive HTTP/1.1";
        let code = parse_code_from_request(request);
        assert!(code.unwrap().starts_with("4/0AfJohXn"));
    }

    #[test]
    fn test_parse_code_missing() {
        assert!(parse_code_from_request("GET /favicon.ico HTTP/1.1").is_none());
        assert!(parse_code_from_request("GET /?error=access_denied HTTP/1.1").is_none());
        assert!(parse_code_from_request("").is_none());
    }

    #[test]
    fn test_callback_port_from_redirect_uri() {
        let oauth = OAuthManager::new(credentials());
        assert_eq!(oauth.callback_port(), 9004);

        let oauth = OAuthManager::new(OAuthCredentials {
            redirect_uri: "urn:ietf:wg:oauth:2.0:oob".to_string(),
            ..credentials()
        });
        assert_eq!(oauth.callback_port(), 8085);
    }

    #[test]
    fn test_portless_redirect_uri_uses_listener_port() {
        let oauth = OAuthManager::new(OAuthCredentials {
            redirect_uri: "http://localhost".to_string(),
            ..credentials()
        });

        assert_eq!(oauth.callback_port(), DEFAULT_CALLBACK_PORT);
        assert_eq!(oauth.credentials.redirect_uri, "http://localhost:8085");
        assert!(oauth
            .authorization_url()
            .contains(&*urlencoding::encode("http://localhost:8085")));
    }

    #[test]
    fn test_with_callback_port() {
        assert_eq!(with_callback_port("http://localhost"), "http://localhost:8085");
        assert_eq!(with_callback_port("http://127.0.0.1/cb"), "http://127.0.0.1:8085/cb");
        assert_eq!(with_callback_port("http://localhost:9000"), "http://localhost:9000");
        assert_eq!(
            with_callback_port("urn:ietf:wg:oauth:2.0:oob"),
            "urn:ietf:wg:oauth:2.0:oob"
        );
    }

    fn unused_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_callback_wait_gives_up_after_timeout() {
        let port = unused_port();
        let oauth = OAuthManager::new(OAuthCredentials {
            redirect_uri: format!("http://localhost:{}", port),
            ..credentials()
        })
        .with_callback_timeout(Duration::from_millis(100));

        let err = oauth.wait_for_callback().await.unwrap_err();
        assert!(matches!(err, DriveupError::Auth(ref msg) if msg.contains("No authorization callback")));
    }

    #[tokio::test]
    async fn test_callback_wait_returns_code() {
        let port = unused_port();
        let oauth = OAuthManager::new(OAuthCredentials {
            redirect_uri: format!("http://localhost:{}", port),
            ..credentials()
        })
        .with_callback_timeout(Duration::from_secs(10));

        let browser = tokio::spawn(async move {
            // Keep knocking until the listener is up.
            loop {
                if let Ok(mut stream) = tokio::net::TcpStream::connect(("127.0.0.1", port)).await {
                    stream
                        .write_all(b"GET /?code=abc123&scope=drive HTTP/1.1\r\n\r\n")
                        .await
                        .unwrap();
                    let mut response = String::new();
                    tokio::io::AsyncReadExt::read_to_string(&mut stream, &mut response)
                        .await
                        .unwrap();
                    return response;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        });

        let code = oauth.wait_for_callback().await.unwrap();
        assert_eq!(code, "abc123");
        assert!(browser.await.unwrap().starts_with("HTTP/1.1 200 OK"));
    }

    #[test]
    fn test_authorization_url_requests_drive_scope() {
        let url = OAuthManager::new(credentials()).authorization_url();
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=id.apps.googleusercontent.com"));
        assert!(url.contains(&*urlencoding::encode(DRIVE_SCOPE)));
        assert!(url.contains("access_type=offline"));
    }

    #[tokio::test]
    async fn test_fresh_cached_token_is_reused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let oauth = OAuthManager::with_tokens_path(credentials(), &path);

        oauth
            .save_tokens(&StoredTokens {
                access_token: "cached".to_string(),
                refresh_token: None,
                expires_at: chrono::Utc::now().timestamp() + 3600,
                token_type: "Bearer".to_string(),
            })
            .unwrap();

        assert!(oauth.is_authenticated());
        assert_eq!(oauth.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_logout_removes_token_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let oauth = OAuthManager::with_tokens_path(credentials(), &path);
        assert!(!oauth.is_authenticated());

        // No stored token: nothing to revoke, nothing to delete.
        oauth.logout().await.unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_token_freshness_margin() {
        let tokens = StoredTokens {
            access_token: String::new(),
            refresh_token: None,
            expires_at: 1_000,
            token_type: "Bearer".to_string(),
        };
        assert!(tokens.is_fresh(600));
        assert!(!tokens.is_fresh(700));
    }

    #[test]
    fn test_placeholder_credentials_are_invalid() {
        assert!(credentials().validate().is_ok());
        assert!(OAuthCredentials::default().validate().is_err());

        let placeholder = OAuthCredentials {
            client_id: "Enter Client ID".to_string(),
            ..credentials()
        };
        assert!(placeholder.validate().is_err());
    }

    #[test]
    fn test_service_account_key_parse_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("key.json");
        fs::write(&path, "{}").unwrap();

        let auth = ServiceAccountAuthenticator::new(&path);
        assert!(matches!(auth.load_key(), Err(DriveupError::Auth(_))));
    }
}

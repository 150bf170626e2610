//! Server configuration loaded from environment variables.
//!
//! All settings have development defaults so the server can start with zero
//! configuration locally.  Secrets are wrapped in [`Secret`] so they never
//! show up in `Debug` output or logs.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use portal_shared::constants::{DOWNLOAD_URL_TTL_MINUTES, MAX_UPLOAD_SIZE};

const DEV_SIGNING_KEY: &str = "dev-only-blob-signing-key";
const DEV_JWT_SECRET: &str = "dev-only-identity-secret";

/// A string that is redacted when debug-printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`, default `0.0.0.0:8080`.
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`, default `./data/portal.db`.
    pub database_path: PathBuf,

    /// Root directory of the blob store.
    /// Env: `BLOB_STORAGE_PATH`, default `./blobs`.
    pub blob_storage_path: PathBuf,

    /// Request body limit in bytes.
    /// Env: `MAX_UPLOAD_SIZE`, default 50 MiB.
    pub max_upload_size: usize,

    /// Externally visible base URL of this server, used to build file URLs.
    /// Env: `PUBLIC_BASE_URL`.
    pub public_base_url: String,

    /// Base URL of the frontend, used for links in emails.
    /// Env: `APP_BASE_URL`.
    pub app_base_url: String,

    /// HMAC key for signed file URLs.
    /// Env: `BLOB_SIGNING_KEY`.
    pub blob_signing_key: Secret,

    /// Lifetime of signed download URLs.
    /// Env: `DOWNLOAD_URL_TTL_SECS`, default 900.
    pub download_url_ttl_secs: i64,

    /// Whether `/upload` also returns a signed URL.
    /// Env: `SIGN_UPLOAD_URLS` (true/false), default `false`.
    pub sign_upload_urls: bool,

    // -- Payments --
    /// Env: `STRIPE_SECRET_KEY`.  Billing routes fail when unset.
    pub stripe_secret_key: Option<Secret>,
    /// Env: `STRIPE_WEBHOOK_SECRET`.  Webhooks are rejected when unset.
    pub stripe_webhook_secret: Option<Secret>,
    /// Env: `STRIPE_API_BASE`, default `https://api.stripe.com`.
    pub stripe_api_base: String,

    // -- Mail --
    /// Env: `MAIL_API_URL`.  When unset, mail is only logged.
    pub mail_api_url: Option<String>,
    /// Env: `MAIL_API_KEY`.
    pub mail_api_key: Option<Secret>,
    /// Env: `MAIL_SENDER`.
    pub mail_sender: String,
    /// Recipient of new-signup notifications.
    /// Env: `ADMIN_NOTIFY_EMAIL`.
    pub admin_notify_email: Option<String>,

    // -- Identity --
    /// HS256 key used to verify bearer tokens.
    /// Env: `IDENTITY_JWT_SECRET`.
    pub identity_jwt_secret: Secret,
    /// Env: `IDENTITY_ISSUER`.  Checked when set.
    pub identity_issuer: Option<String>,
    /// Env: `IDENTITY_AUDIENCE`.  Checked when set.
    pub identity_audience: Option<String>,
    /// Env: `IDENTITY_TENANT_ID`, `IDENTITY_CLIENT_ID`, `IDENTITY_CLIENT_SECRET`.
    /// All three are needed for directory deletes.
    pub identity_tenant_id: Option<String>,
    pub identity_client_id: Option<String>,
    pub identity_client_secret: Option<Secret>,

    /// Organization stamped on records created without one.
    /// Env: `DEFAULT_ORGANIZATION`.
    pub default_organization: String,

    /// Optional directory of frontend assets served as the fallback route.
    /// Env: `STATIC_DIR`.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], 8080).into(),
            database_path: PathBuf::from("./data/portal.db"),
            blob_storage_path: PathBuf::from("./blobs"),
            max_upload_size: MAX_UPLOAD_SIZE,
            public_base_url: "http://localhost:8080".to_string(),
            app_base_url: "http://localhost:8080".to_string(),
            blob_signing_key: Secret::new(DEV_SIGNING_KEY),
            download_url_ttl_secs: DOWNLOAD_URL_TTL_MINUTES * 60,
            sign_upload_urls: false,
            stripe_secret_key: None,
            stripe_webhook_secret: None,
            stripe_api_base: "https://api.stripe.com".to_string(),
            mail_api_url: None,
            mail_api_key: None,
            mail_sender: "noreply@tutorportal.local".to_string(),
            admin_notify_email: None,
            identity_jwt_secret: Secret::new(DEV_JWT_SECRET),
            identity_issuer: None,
            identity_audience: None,
            identity_tenant_id: None,
            identity_client_id: None,
            identity_client_secret: None,
            default_organization: "BrightStars-NorthLondon".to_string(),
            static_dir: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let non_empty = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = non_empty("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        if let Some(path) = non_empty("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty("BLOB_STORAGE_PATH") {
            config.blob_storage_path = PathBuf::from(path);
        }

        if let Some(val) = non_empty("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(url) = non_empty("PUBLIC_BASE_URL") {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = non_empty("APP_BASE_URL") {
            config.app_base_url = url.trim_end_matches('/').to_string();
        }

        match non_empty("BLOB_SIGNING_KEY") {
            Some(key) => config.blob_signing_key = Secret::new(key),
            None => tracing::warn!("BLOB_SIGNING_KEY not set, using development key"),
        }

        if let Some(val) = non_empty("DOWNLOAD_URL_TTL_SECS") {
            match val.parse::<i64>() {
                Ok(n) if n > 0 => config.download_url_ttl_secs = n,
                _ => tracing::warn!(value = %val, "Invalid DOWNLOAD_URL_TTL_SECS, using default"),
            }
        }

        if let Some(val) = non_empty("SIGN_UPLOAD_URLS") {
            config.sign_upload_urls = val != "false" && val != "0";
        }

        config.stripe_secret_key = non_empty("STRIPE_SECRET_KEY").map(Secret::new);
        config.stripe_webhook_secret = non_empty("STRIPE_WEBHOOK_SECRET").map(Secret::new);
        if let Some(base) = non_empty("STRIPE_API_BASE") {
            config.stripe_api_base = base.trim_end_matches('/').to_string();
        }

        config.mail_api_url = non_empty("MAIL_API_URL");
        config.mail_api_key = non_empty("MAIL_API_KEY").map(Secret::new);
        if let Some(sender) = non_empty("MAIL_SENDER") {
            config.mail_sender = sender;
        }
        config.admin_notify_email = non_empty("ADMIN_NOTIFY_EMAIL");

        match non_empty("IDENTITY_JWT_SECRET") {
            Some(secret) => config.identity_jwt_secret = Secret::new(secret),
            None => tracing::warn!("IDENTITY_JWT_SECRET not set, using development secret"),
        }
        config.identity_issuer = non_empty("IDENTITY_ISSUER");
        config.identity_audience = non_empty("IDENTITY_AUDIENCE");
        config.identity_tenant_id = non_empty("IDENTITY_TENANT_ID");
        config.identity_client_id = non_empty("IDENTITY_CLIENT_ID");
        config.identity_client_secret = non_empty("IDENTITY_CLIENT_SECRET").map(Secret::new);

        if let Some(org) = non_empty("DEFAULT_ORGANIZATION") {
            config.default_organization = org;
        }
        config.static_dir = non_empty("STATIC_DIR").map(PathBuf::from);

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

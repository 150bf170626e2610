//! # portal-server
//!
//! HTTP backend for the tutoring portal.
//!
//! This binary provides:
//! - **Accounts**: signup, admin approval and user management behind
//!   verified bearer tokens
//! - **Lessons and content** with optimistic concurrency on edits
//! - **Blob storage** for lesson files, with signed download links
//! - **Billing** through Stripe, mirrored locally from signed webhooks
//! - **Tutoring**: student progress, homework fan-out and parent invitations

mod api;
mod auth;
mod blob_store;
mod config;
mod directory;
mod error;
mod gate;
mod handlers;
mod mailer;
mod mirror;
mod payments;
mod webhook;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use portal_shared::constants::WEBHOOK_TOLERANCE_SECS;
use portal_store::Database;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::directory::{DisabledDirectory, GraphDirectory, IdentityDirectory};
use crate::mailer::{HttpMailer, LogMailer, Mailer};
use crate::payments::{DisabledPayments, PaymentGateway, StripeClient};
use crate::webhook::WebhookVerifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,portal_server=debug,portal_store=info")),
        )
        .init();

    info!("Starting portal server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    let blobs = BlobStore::new(
        config.blob_storage_path.clone(),
        config.max_upload_size,
        config.blob_signing_key.expose().as_bytes(),
        &config.public_base_url,
    )
    .await?;

    // -----------------------------------------------------------------------
    // 4. Outbound clients (each falls back to an inert implementation)
    // -----------------------------------------------------------------------
    let http = reqwest::Client::builder()
        .user_agent(concat!("portal-server/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let mailer: Arc<dyn Mailer> = match &config.mail_api_url {
        Some(url) => Arc::new(HttpMailer::new(
            http.clone(),
            url.clone(),
            config.mail_api_key.clone(),
            config.mail_sender.clone(),
        )),
        None => {
            warn!("MAIL_API_URL not set; outgoing mail will only be logged");
            Arc::new(LogMailer)
        }
    };

    let payments: Arc<dyn PaymentGateway> = match &config.stripe_secret_key {
        Some(key) => Arc::new(StripeClient::new(
            http.clone(),
            config.stripe_api_base.clone(),
            key.clone(),
        )),
        None => {
            warn!("STRIPE_SECRET_KEY not set; billing routes are disabled");
            Arc::new(DisabledPayments)
        }
    };

    let directory: Arc<dyn IdentityDirectory> = match (
        &config.identity_tenant_id,
        &config.identity_client_id,
        &config.identity_client_secret,
    ) {
        (Some(tenant), Some(client_id), Some(secret)) => Arc::new(GraphDirectory::new(
            http.clone(),
            tenant.clone(),
            client_id.clone(),
            secret.clone(),
        )),
        _ => {
            info!("Identity directory credentials not set; account deletes stay local");
            Arc::new(DisabledDirectory)
        }
    };

    let auth = TokenVerifier::new(
        config.identity_jwt_secret.expose().as_bytes(),
        config.identity_issuer.as_deref(),
        config.identity_audience.as_deref(),
    );

    let webhooks = match &config.stripe_webhook_secret {
        Some(secret) => Some(Arc::new(WebhookVerifier::new(
            secret.expose().as_bytes(),
            WEBHOOK_TOLERANCE_SECS,
        ))),
        None => {
            warn!("STRIPE_WEBHOOK_SECRET not set; webhooks will be rejected");
            None
        }
    };

    let http_addr = config.http_addr;
    let app_state = AppState {
        db: Arc::new(Mutex::new(db)),
        blobs: Arc::new(blobs),
        mailer,
        payments,
        directory,
        auth: Arc::new(auth),
        webhooks,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}

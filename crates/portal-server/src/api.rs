use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use portal_store::Database;

use crate::auth::TokenVerifier;
use crate::blob_store::BlobStore;
use crate::config::ServerConfig;
use crate::directory::IdentityDirectory;
use crate::handlers::{billing, bulk, content, files, invitations, lessons, progress, tutor, users};
use crate::mailer::Mailer;
use crate::payments::PaymentGateway;
use crate::webhook::WebhookVerifier;

/// Shared clients, constructed once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub blobs: Arc<BlobStore>,
    pub mailer: Arc<dyn Mailer>,
    pub payments: Arc<dyn PaymentGateway>,
    pub directory: Arc<dyn IdentityDirectory>,
    pub auth: Arc<TokenVerifier>,
    /// `None` when no webhook secret is configured.
    pub webhooks: Option<Arc<WebhookVerifier>>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/health", get(health_check))
        // Accounts
        .route(
            "/checkuserstatus",
            get(users::check_user_status).post(users::check_user_status),
        )
        .route("/onusersignup", post(users::on_user_signup))
        .route("/getpendingusers", post(users::get_pending_users))
        .route("/approveuser", post(users::approve_user))
        .route("/check-admin-status", post(users::check_admin_status))
        .route("/user-management", post(users::user_management))
        // Content
        .route(
            "/lessons",
            get(lessons::lessons)
                .post(lessons::lessons)
                .put(lessons::lessons)
                .delete(lessons::lessons),
        )
        .route("/get-content", get(content::get_content))
        .route("/trackview", post(content::track_view))
        .route("/upload", post(files::upload))
        .route("/bulk-upload", post(bulk::bulk_upload))
        .route("/download", post(files::download))
        .route("/files/*path", get(files::serve_file))
        // Billing
        .route("/stripe-create-customer", post(billing::create_customer))
        .route("/stripe-create-subscription", post(billing::create_subscription))
        .route("/stripe-get-subscription", post(billing::get_subscription))
        .route("/stripe-cancel-subscription", post(billing::cancel_subscription))
        .route(
            "/stripe-update-payment-method",
            post(billing::update_payment_method),
        )
        .route("/stripe-webhook", post(billing::stripe_webhook))
        // Students, tutors, parents
        .route("/student-progress", post(progress::student_progress))
        .route("/tutor-management", post(tutor::tutor_management))
        .route("/student-invitations", post(invitations::student_invitations));

    if let Some(dir) = &state.config.static_dir {
        info!(dir = %dir.display(), "Serving static assets");
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(DefaultBodyLimit::max(state.config.max_upload_size))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Start the HTTP server.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

//! Single-file upload, signed download links and the signed blob read.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use portal_shared::constants::LESSON_CONTAINER;
use portal_store::{Database, StoreError, StoredFile};

use crate::api::AppState;
use crate::auth::Principal;
use crate::blob_store::sanitize_file_name;
use crate::error::ApiError;
use crate::handlers::{required, ApiJson};

/// `POST /upload`: multipart field `file`, admin only.
pub async fn upload(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    principal.require_admin()?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let data = field.bytes().await?;
        upload = Some((original, content_type, data));
        break;
    }
    let Some((original, content_type, data)) = upload else {
        return Err(ApiError::Validation("No file provided".to_string()));
    };

    let now = Utc::now();
    let name = format!("{}_{}", now.timestamp_millis(), sanitize_file_name(&original));
    let blob = state.blobs.put(LESSON_CONTAINER, &name, &data).await?;

    state.db.lock().await.insert_file(&StoredFile {
        path: blob.path.clone(),
        container: LESSON_CONTAINER.to_string(),
        original_name: original,
        content_type,
        size: blob.size as i64,
        blake3_hash: blob.blake3_hash,
        uploaded_by: Some(principal.email.clone()),
        created_date: now,
    })?;
    info!(path = %blob.path, size = blob.size, by = %principal.email, "file uploaded");

    let mut body = json!({
        "success": true,
        "url": state.blobs.reference_url(&blob.path),
        "fileName": name,
    });
    if state.config.sign_upload_urls {
        body["signedUrl"] = json!(state.blobs.signed_url(
            &blob.path,
            state.config.download_url_ttl_secs,
            now.timestamp(),
        ));
    }
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRequest {
    file_name: Option<String>,
}

/// `POST /download`: a short-lived read link for admins and subscribers.
pub async fn download(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<DownloadRequest>,
) -> Result<Json<Value>, ApiError> {
    let file_name = required(req.file_name.as_deref(), "File name is required")?;

    if !principal.is_admin() {
        let subscribed = state
            .db
            .lock()
            .await
            .find_user(&principal.email)?
            .is_some_and(|u| u.subscription.has_subscription);
        if !subscribed {
            return Err(ApiError::Forbidden("Active subscription required".to_string()));
        }
    }

    let path = format!("{LESSON_CONTAINER}/{file_name}");
    if !state.blobs.exists(&path).await? {
        return Err(ApiError::NotFound("File not found".to_string()));
    }

    let ttl = state.config.download_url_ttl_secs;
    let url = state.blobs.signed_url(&path, ttl, Utc::now().timestamp());
    info!(path = %path, by = %principal.email, "download link issued");
    Ok(Json(json!({
        "success": true,
        "downloadUrl": url,
        "expiresIn": ttl / 60,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SignedQuery {
    expires: Option<i64>,
    sig: Option<String>,
}

/// Recorded MIME type of a stored blob, or `application/octet-stream`.
fn content_type_of(db: &Database, path: &str) -> String {
    match db.get_file(path) {
        Ok(file) => file.content_type,
        Err(StoreError::NotFound) => None,
        Err(e) => {
            warn!(path, error = %e, "file metadata lookup failed");
            None
        }
    }
    .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// `GET /files/*path?expires=&sig=`
pub async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedQuery>,
) -> Result<Response, ApiError> {
    let (Some(expires), Some(sig)) = (query.expires, query.sig.as_deref()) else {
        return Err(ApiError::Forbidden("Invalid or expired link".to_string()));
    };
    state
        .blobs
        .verify_signature(&path, expires, sig, Utc::now().timestamp())?;

    let data = state.blobs.get(&path).await?;
    let content_type = content_type_of(&*state.db.lock().await, &path);

    Ok(([(header::CONTENT_TYPE, content_type)], data).into_response())
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::{multipart, TestApp};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use portal_shared::types::Role;
    use portal_store::{Database, MirrorPatch, StoredFile};
    use serde_json::json;

    use super::content_type_of;

    async fn upload(app: &TestApp, token: &str, name: &str, data: &[u8]) -> (StatusCode, serde_json::Value) {
        let (content_type, body) = multipart(&[("file", name, "application/pdf", data)]);
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body))
            .unwrap();
        app.request(request).await
    }

    fn path_and_query(url: &str) -> String {
        let parsed = reqwest::Url::parse(url).unwrap();
        format!("{}?{}", parsed.path(), parsed.query().unwrap_or_default())
    }

    #[tokio::test]
    async fn upload_requires_admin_and_stores_metadata() {
        let app = TestApp::new().await;
        let student = app.token("s@x.com", &["student"]);
        let (status, _) = upload(&app, &student, "sheet.pdf", b"%PDF").await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let admin = app.token("boss@x.com", &["admin"]);
        let (status, body) = upload(&app, &admin, "sheet.pdf", b"%PDF").await;
        assert_eq!(status, StatusCode::OK);
        let name = body["fileName"].as_str().unwrap();
        assert!(name.ends_with("_sheet.pdf"));
        assert!(body["url"].as_str().unwrap().contains("/files/lesson-files/"));

        let stored = app
            .state
            .db
            .lock()
            .await
            .get_file(&format!("lesson-files/{name}"))
            .unwrap();
        assert_eq!(stored.original_name, "sheet.pdf");
        assert_eq!(stored.content_type.as_deref(), Some("application/pdf"));
        assert_eq!(stored.uploaded_by.as_deref(), Some("boss@x.com"));
    }

    #[tokio::test]
    async fn download_link_round_trip() {
        let app = TestApp::new().await;
        let admin = app.token("boss@x.com", &["admin"]);
        let (_, uploaded) = upload(&app, &admin, "notes.pdf", b"lesson bytes").await;
        let file_name = uploaded["fileName"].as_str().unwrap().to_string();

        // No subscription yet.
        app.seed_user("s@x.com", &[Role::Student]).await;
        let student = app.token("s@x.com", &["student"]);
        let (status, body) = app.post("/download", &student, json!({"fileName": file_name})).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Active subscription required");

        let patch = MirrorPatch {
            has_subscription: Some(true),
            ..MirrorPatch::default()
        };
        app.state
            .db
            .lock()
            .await
            .patch_subscription_mirror("s@x.com", &patch, chrono::Utc::now())
            .unwrap();

        let (status, body) = app.post("/download", &student, json!({"fileName": file_name})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expiresIn"], 15);

        let link = path_and_query(body["downloadUrl"].as_str().unwrap());
        let response = {
            let request = Request::builder().uri(&link).body(Body::empty()).unwrap();
            app.request(request).await
        };
        assert_eq!(response.0, StatusCode::OK);
        assert_eq!(response.1, json!("lesson bytes"));

        let tampered = link.replace("sig=", "sig=A");
        let (status, _) = app.get(&tampered, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app.get(&link.split('?').next().unwrap().to_string(), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn download_of_missing_file_is_not_found() {
        let app = TestApp::new().await;
        let admin = app.token("boss@x.com", &["admin"]);
        let (status, body) = app.post("/download", &admin, json!({"fileName": "nope.pdf"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "File not found");
    }

    #[test]
    fn content_type_falls_back_when_metadata_is_unavailable() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(content_type_of(&db, "lesson-files/a.pdf"), "application/octet-stream");

        db.insert_file(&StoredFile {
            path: "lesson-files/a.pdf".into(),
            container: "lesson-files".into(),
            original_name: "a.pdf".into(),
            content_type: Some("application/pdf".into()),
            size: 4,
            blake3_hash: "00".into(),
            uploaded_by: None,
            created_date: chrono::Utc::now(),
        })
        .unwrap();
        assert_eq!(content_type_of(&db, "lesson-files/a.pdf"), "application/pdf");

        db.conn().execute_batch("DROP TABLE files").unwrap();
        assert_eq!(content_type_of(&db, "lesson-files/a.pdf"), "application/octet-stream");
    }
}

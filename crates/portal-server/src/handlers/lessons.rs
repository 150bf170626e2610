//! `/lessons`: one handler for get/create/update/delete.

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use portal_shared::types::ContentType;
use portal_store::{Lesson, LessonFilter};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::{check_expected_version, required};

/// Lesson fields a client may set.  Absent fields keep their value on update.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonInput {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "type")]
    content_type: Option<String>,
    year_group: Option<String>,
    week: Option<i64>,
    subject: Option<String>,
    category: Option<String>,
    resource_type: Option<String>,
    file_url: Option<String>,
    content: Option<Value>,
    tags: Option<Vec<String>>,
    metadata: Option<Value>,
    published: Option<bool>,
    visible: Option<bool>,
    version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LessonRequest {
    action: Option<String>,
    #[serde(default)]
    lesson: LessonInput,
}

impl LessonInput {
    fn apply(self, lesson: &mut Lesson) -> Result<(), ApiError> {
        if let Some(title) = self.title {
            lesson.title = title;
        }
        if let Some(description) = self.description {
            lesson.description = Some(description);
        }
        if let Some(ty) = self.content_type {
            lesson.content_type = ContentType::parse(&ty)
                .ok_or_else(|| ApiError::Validation(format!("Invalid content type: {ty}")))?;
        }
        if let Some(year) = self.year_group {
            lesson.year_group = Some(year);
        }
        if let Some(week) = self.week {
            lesson.week = Some(week);
        }
        if let Some(subject) = self.subject {
            lesson.subject = Some(subject);
        }
        if let Some(category) = self.category {
            lesson.category = Some(category);
        }
        if let Some(rt) = self.resource_type {
            lesson.resource_type = Some(rt);
        }
        if let Some(url) = self.file_url {
            lesson.file_url = Some(url);
        }
        if let Some(content) = self.content {
            lesson.content = content;
        }
        if let Some(tags) = self.tags {
            lesson.tags = tags;
        }
        if let Some(metadata) = self.metadata {
            lesson.metadata = metadata;
        }
        if let Some(published) = self.published {
            lesson.published = published;
        }
        if let Some(visible) = self.visible {
            lesson.visible = visible;
        }
        Ok(())
    }
}

/// An empty lesson owned by `created_by`, ready for [`LessonInput::apply`].
pub(crate) fn blank_lesson(id: String, created_by: &str) -> Lesson {
    let now = Utc::now();
    Lesson {
        id,
        title: String::new(),
        description: None,
        content_type: ContentType::default(),
        year_group: None,
        week: None,
        subject: None,
        category: None,
        resource_type: None,
        source_file: None,
        file_url: None,
        original_file_name: None,
        file_type: None,
        file_size: None,
        content: json!({}),
        tags: Vec::new(),
        metadata: json!({}),
        published: true,
        visible: true,
        created_by: Some(created_by.to_string()),
        created_date: now,
        updated_by: None,
        updated_date: Some(now),
        version: 1,
    }
}

pub async fn lessons(
    State(state): State<AppState>,
    method: Method,
    principal: Principal,
    body: Option<Json<LessonRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let req = body.map(|Json(r)| r).unwrap_or_default();
    let action = req.action.as_deref().unwrap_or(match method {
        Method::POST => "create",
        Method::PUT => "update",
        Method::DELETE => "delete",
        _ => "get",
    });

    match action {
        "get" => {
            let filter = LessonFilter {
                published_only: !principal.is_admin(),
                ..LessonFilter::default()
            };
            let lessons = state.db.lock().await.list_lessons(&filter)?;
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "lessons": lessons })),
            ))
        }
        "create" => {
            principal.require_admin()?;
            let input = req.lesson;
            required(input.title.as_deref(), "Lesson title is required")?;

            let id = input
                .id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let mut lesson = blank_lesson(id, &principal.email);
            input.apply(&mut lesson)?;

            state.db.lock().await.insert_lesson(&lesson)?;
            info!(id = %lesson.id, by = %principal.email, "lesson created");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "success": true, "lesson": lesson })),
            ))
        }
        "update" => {
            principal.require_admin()?;
            let input = req.lesson;
            let id = required(input.id.as_deref(), "Lesson ID is required")?;

            let db = state.db.lock().await;
            let mut lesson = db.get_lesson(&id).map_err(|e| match e {
                portal_store::StoreError::NotFound => ApiError::NotFound("Lesson not found".to_string()),
                other => other.into(),
            })?;
            check_expected_version(input.version, lesson.version)?;
            input.apply(&mut lesson)?;
            lesson.updated_by = Some(principal.email.clone());
            lesson.updated_date = Some(Utc::now());

            let updated = db.update_lesson(&lesson)?;
            info!(id = %id, by = %principal.email, "lesson updated");
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "lesson": updated })),
            ))
        }
        "delete" => {
            principal.require_admin()?;
            let id = required(req.lesson.id.as_deref(), "Lesson ID is required")?;
            if !state.db.lock().await.delete_lesson(&id)? {
                return Err(ApiError::NotFound("Lesson not found".to_string()));
            }
            info!(id = %id, by = %principal.email, "lesson deleted");
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "message": "Lesson deleted successfully" })),
            ))
        }
        other => Err(ApiError::Validation(format!("Invalid action: {other}"))),
    }
}

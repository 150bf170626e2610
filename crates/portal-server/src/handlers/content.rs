//! Content browsing and view tracking.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use portal_shared::constants::DEFAULT_CONTENT_LIMIT;
use portal_shared::types::ContentType;
use portal_store::{Lesson, LessonFilter, ViewEvent};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::ApiJson;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentQuery {
    #[serde(rename = "type")]
    content_type: Option<String>,
    year_group: Option<String>,
    subject: Option<String>,
    category: Option<String>,
    limit: Option<usize>,
}

/// `None` for absent, empty or `all`.
fn filter_value(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "all")
        .map(str::to_string)
}

fn summarize(items: &[Lesson]) -> Value {
    let count_type = |ty: ContentType| items.iter().filter(|l| l.content_type == ty).count();
    let count_year = |yg: &str| items.iter().filter(|l| l.year_group.as_deref() == Some(yg)).count();
    let count_subject = |s: &str| items.iter().filter(|l| l.subject.as_deref() == Some(s)).count();
    let other = items
        .iter()
        .filter(|l| !matches!(l.subject.as_deref(), Some("maths" | "english" | "general")))
        .count();

    json!({
        "total": items.len(),
        "yearPlan": count_type(ContentType::YearPlan),
        "lessonMaterials": count_type(ContentType::LessonMaterial),
        "extraResources": count_type(ContentType::ExtraResource),
        "byYearGroup": {
            "year4": count_year("year4"),
            "year5": count_year("year5"),
        },
        "bySubject": {
            "maths": count_subject("maths"),
            "english": count_subject("english"),
            "general": count_subject("general"),
            "other": other,
        },
    })
}

/// `GET /get-content`
pub async fn get_content(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<ContentQuery>,
) -> Result<Json<Value>, ApiError> {
    let content_type = match filter_value(&query.content_type) {
        Some(ty) => Some(
            ContentType::parse(&ty)
                .ok_or_else(|| ApiError::Validation(format!("Invalid content type: {ty}")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(DEFAULT_CONTENT_LIMIT);

    let filter = LessonFilter {
        content_type,
        year_group: filter_value(&query.year_group),
        subject: filter_value(&query.subject),
        category: filter_value(&query.category),
        published_only: !principal.is_admin(),
        visible_only: true,
        limit: Some(limit),
    };
    let items = state.db.lock().await.list_lessons(&filter)?;

    let of_type = |ty: ContentType| -> Vec<&Lesson> {
        items.iter().filter(|l| l.content_type == ty).collect()
    };

    Ok(Json(json!({
        "success": true,
        "content": {
            "yearPlan": of_type(ContentType::YearPlan),
            "lessonMaterials": of_type(ContentType::LessonMaterial),
            "extraResources": of_type(ContentType::ExtraResource),
            "all": items,
        },
        "summary": summarize(&items),
        "query": {
            "type": query.content_type.as_deref().unwrap_or("all"),
            "yearGroup": query.year_group.as_deref().unwrap_or("all"),
            "subject": query.subject.as_deref().unwrap_or("all"),
            "category": query.category.as_deref().unwrap_or("all"),
            "limit": limit,
        },
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackRequest {
    event_type: Option<String>,
    user_id: Option<String>,
    timestamp: Option<String>,
    lesson_id: Option<String>,
    lesson_title: Option<String>,
    lesson_category: Option<String>,
    session_id: Option<String>,
    view_duration: Option<f64>,
    message: Option<String>,
}

/// First hop of `x-forwarded-for`, else `x-real-ip`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .or_else(|| header("x-real-ip"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `POST /trackview`
pub async fn track_view(
    State(state): State<AppState>,
    principal: Principal,
    headers: HeaderMap,
    ApiJson(req): ApiJson<TrackRequest>,
) -> Result<Json<Value>, ApiError> {
    let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
    if !(present(&req.event_type) && present(&req.user_id) && present(&req.timestamp)) {
        return Err(ApiError::Validation(
            "Missing required fields: eventType, userId, timestamp".to_string(),
        ));
    }
    let timestamp = req.timestamp.unwrap_or_default();

    let event = ViewEvent {
        user_id: req.user_id.unwrap_or_default(),
        event_type: req.event_type.unwrap_or_default(),
        lesson_id: req.lesson_id,
        lesson_title: req.lesson_title,
        category: req.lesson_category,
        session_id: req.session_id,
        view_duration: req.view_duration,
        message: req.message,
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        client_ip: client_ip(&headers),
        client_timestamp: timestamp.clone(),
        created_date: Utc::now(),
    };

    let row_id = state.db.lock().await.insert_view_event(&event)?;
    tracing::debug!(
        user = %event.user_id,
        event = %event.event_type,
        lesson = ?event.lesson_id,
        caller = %principal.email,
        "view tracked"
    );

    Ok(Json(json!({
        "success": true,
        "message": "Event tracked successfully",
        "eventId": format!("{timestamp}_{row_id}"),
    })))
}

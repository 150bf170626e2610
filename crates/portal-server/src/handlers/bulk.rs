//! `/bulk-upload`: year-plan spreadsheets, batches of lesson files and
//! extra resources.  Each file is processed on its own; a failure is
//! reported in that file's result and the rest of the batch continues.

use std::collections::HashMap;
use std::io::Cursor;

use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;
use calamine::{Data, Reader, Xlsx};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{info, warn};

use portal_shared::classify::{
    clean_title, estimated_duration, extension, format_file_size, lesson_kind, resource_kind,
    split_list, usage_instructions,
};
use portal_shared::constants::LESSON_CONTAINER;
use portal_shared::types::ContentType;
use portal_store::{Lesson, StoredFile};

use crate::api::AppState;
use crate::auth::Principal;
use crate::blob_store::{sanitize_file_name, StoredBlob};
use crate::error::ApiError;
use crate::handlers::lessons::blank_lesson;
use crate::handlers::required;

struct UploadedFile {
    field: String,
    name: String,
    mime: String,
    data: Bytes,
}

/// One spreadsheet row that carried both a week and a topic.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlanRow {
    pub index: usize,
    pub week: String,
    pub topic: String,
    pub description: Option<String>,
    pub subject: Option<String>,
    pub objectives: Vec<String>,
    pub activities: Vec<String>,
    pub resources: Vec<String>,
    pub homework: String,
    pub assessment: String,
    pub notes: String,
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) if f.fract() == 0.0 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt.as_f64().to_string(),
        Data::Error(_) | Data::Empty => String::new(),
    }
}

/// Rows keyed by the header row.  Rows without `Week` or `Topic` are skipped.
pub(crate) fn rows_to_plan(rows: &[Vec<String>]) -> Vec<PlanRow> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let columns: HashMap<&str, usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim(), i))
        .collect();

    body.iter()
        .enumerate()
        .filter_map(|(index, row)| {
            let cell = |name: &str| {
                columns
                    .get(name)
                    .and_then(|&i| row.get(i))
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            let week = cell("Week")?;
            let topic = cell("Topic")?;
            Some(PlanRow {
                index,
                week,
                topic,
                description: cell("Description"),
                subject: cell("Subject"),
                objectives: cell("Objectives").map(|c| split_list(&c)).unwrap_or_default(),
                activities: cell("Activities").map(|c| split_list(&c)).unwrap_or_default(),
                resources: cell("Resources").map(|c| split_list(&c)).unwrap_or_default(),
                homework: cell("Homework").unwrap_or_default(),
                assessment: cell("Assessment").unwrap_or_default(),
                notes: cell("Notes").unwrap_or_default(),
            })
        })
        .collect()
}

fn read_first_sheet(data: &[u8]) -> Result<Vec<Vec<String>>, ApiError> {
    let mut workbook = Xlsx::new(Cursor::new(data))
        .map_err(|e| ApiError::Validation(format!("Unreadable spreadsheet: {e}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ApiError::Validation("Spreadsheet has no worksheets".to_string()))?
        .map_err(|e| ApiError::Validation(format!("Unreadable worksheet: {e}")))?;
    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn failure(kind: &str, file_name: &str, error: &ApiError) -> Value {
    json!({
        "success": false,
        "type": kind,
        "fileName": file_name,
        "error": error.to_string(),
    })
}

struct Batch<'a> {
    state: &'a AppState,
    year_group: &'a str,
    uploaded_by: &'a str,
}

impl Batch<'_> {
    async fn store(&self, name: &str, file: &UploadedFile) -> Result<StoredBlob, ApiError> {
        let blob = self.state.blobs.put(LESSON_CONTAINER, name, &file.data).await?;
        self.state.db.lock().await.insert_file(&StoredFile {
            path: blob.path.clone(),
            container: LESSON_CONTAINER.to_string(),
            original_name: file.name.clone(),
            content_type: Some(file.mime.clone()).filter(|m| !m.is_empty()),
            size: blob.size as i64,
            blake3_hash: blob.blake3_hash.clone(),
            uploaded_by: Some(self.uploaded_by.to_string()),
            created_date: Utc::now(),
        })?;
        Ok(blob)
    }

    fn upload_metadata(&self) -> Value {
        json!({
            "uploadDate": Utc::now(),
            "uploadedBy": self.uploaded_by,
            "processed": true,
            "approved": true,
            "downloadCount": 0,
            "viewCount": 0,
        })
    }

    fn mime_tag(file: &UploadedFile) -> String {
        file.mime
            .split_once('/')
            .map(|(_, sub)| sub.to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "document".to_string())
    }

    async fn year_plan(&self, file: &UploadedFile) -> Result<(Value, Vec<Lesson>), ApiError> {
        if extension(&file.name) != "xlsx" {
            return Err(ApiError::Validation("Year plan must be an .xlsx file".to_string()));
        }
        let ts = Utc::now().timestamp_millis();
        let name = format!(
            "year-plans/{}/{ts}_{}",
            self.year_group,
            sanitize_file_name(&file.name)
        );
        let blob = self.store(&name, file).await?;
        let file_url = self.state.blobs.reference_url(&blob.path);

        let rows = read_first_sheet(&file.data)?;
        let plan = rows_to_plan(&rows);
        let yg = self.year_group;

        let mut lessons = Vec::new();
        let mut errors = 0;
        for row in &plan {
            let mut lesson = blank_lesson(format!("{yg}-week-{}-{ts}-{}", row.week, row.index), self.uploaded_by);
            let subject = row.subject.clone().unwrap_or_else(|| "Mixed".to_string());
            lesson.title = format!("Week {}: {}", row.week, row.topic);
            lesson.description = Some(
                row.description
                    .clone()
                    .unwrap_or_else(|| format!("Year plan content for {yg} Week {}", row.week)),
            );
            lesson.content_type = ContentType::YearPlan;
            lesson.year_group = Some(yg.to_string());
            lesson.week = Some(row.week.parse().unwrap_or(row.index as i64 + 1));
            lesson.subject = Some(subject.clone());
            lesson.category = Some("planning".to_string());
            lesson.source_file = Some(blob.path.clone());
            lesson.file_url = Some(file_url.clone());
            lesson.content = json!({
                "topic": row.topic,
                "objectives": row.objectives,
                "activities": row.activities,
                "resources": row.resources,
                "homework": row.homework,
                "assessment": row.assessment,
                "notes": row.notes,
            });
            lesson.tags = vec![
                "year-plan".to_string(),
                yg.to_string(),
                row.subject.clone().unwrap_or_else(|| "mixed".to_string()),
            ];

            match self.state.db.lock().await.insert_lesson(&lesson) {
                Ok(()) => lessons.push(lesson),
                Err(e) => {
                    warn!(week = %row.week, error = %e, "failed to create year plan lesson");
                    errors += 1;
                }
            }
        }
        info!(year_group = yg, created = lessons.len(), errors, "year plan processed");

        let result = json!({
            "success": true,
            "type": "year-plan",
            "fileName": blob.path,
            "fileUrl": file_url,
            "lessonsCreated": lessons.len(),
            "lessonsError": errors,
            "totalRows": rows.len().saturating_sub(1),
            "lessons": lessons,
        });
        Ok((result, lessons))
    }

    async fn lesson_file(&self, file: &UploadedFile, index: usize) -> Result<(Value, Lesson), ApiError> {
        let kind = lesson_kind(&file.name);
        let (subject, category) = (kind.subject, kind.category);
        let yg = self.year_group;
        let ts = Utc::now().timestamp_millis();

        let name = format!(
            "lessons/{yg}/{subject}/{category}/{ts}_{}",
            sanitize_file_name(&file.name)
        );
        let blob = self.store(&name, file).await?;
        let file_url = self.state.blobs.reference_url(&blob.path);

        let mut lesson = blank_lesson(format!("{yg}-{subject}-{category}-{ts}-{index}"), self.uploaded_by);
        lesson.title = clean_title(&file.name);
        lesson.description = Some(format!("{} material for {yg} {subject}", capitalize(category)));
        lesson.content_type = ContentType::LessonMaterial;
        lesson.year_group = Some(yg.to_string());
        lesson.subject = Some(subject.to_string());
        lesson.category = Some(category.to_string());
        lesson.file_url = Some(file_url.clone());
        lesson.source_file = Some(blob.path.clone());
        lesson.original_file_name = Some(file.name.clone());
        lesson.file_type = Some(file.mime.clone());
        lesson.file_size = Some(blob.size as i64);
        lesson.content = json!({
            "description": format!("Uploaded {category} for {subject}"),
            "instructions": format!("This is a {category} file for {yg} students studying {subject}."),
            "difficulty": if yg == "year5" { "intermediate" } else { "beginner" },
            "estimatedDuration": estimated_duration(category),
            "fileSizeFormatted": format_file_size(blob.size as u64),
            "fileExtension": extension(&file.name),
        });
        lesson.tags = vec![
            subject.to_string(),
            category.to_string(),
            yg.to_string(),
            Self::mime_tag(file),
        ];
        lesson.metadata = self.upload_metadata();

        self.state.db.lock().await.insert_lesson(&lesson)?;
        info!(id = %lesson.id, path = %blob.path, "lesson file processed");

        let result = json!({
            "success": true,
            "type": "lesson-material",
            "fileName": blob.path,
            "fileUrl": file_url,
            "subject": subject,
            "category": category,
            "lesson": lesson,
        });
        Ok((result, lesson))
    }

    async fn resource_file(&self, file: &UploadedFile, index: usize) -> Result<(Value, Lesson), ApiError> {
        let kind = resource_kind(&file.name, &file.mime);
        let (rtype, category) = (kind.resource_type, kind.category);
        let yg = self.year_group;
        let ts = Utc::now().timestamp_millis();

        let name = format!("resources/{yg}/{rtype}/{ts}_{}", sanitize_file_name(&file.name));
        let blob = self.store(&name, file).await?;
        let file_url = self.state.blobs.reference_url(&blob.path);

        let mut resource = blank_lesson(format!("{yg}-resource-{rtype}-{ts}-{index}"), self.uploaded_by);
        resource.title = clean_title(&file.name);
        resource.description = Some(format!("{} resource for {yg}", capitalize(rtype)));
        resource.content_type = ContentType::ExtraResource;
        resource.year_group = Some(yg.to_string());
        resource.subject = Some("general".to_string());
        resource.category = Some(category.to_string());
        resource.resource_type = Some(rtype.to_string());
        resource.file_url = Some(file_url.clone());
        resource.source_file = Some(blob.path.clone());
        resource.original_file_name = Some(file.name.clone());
        resource.file_type = Some(file.mime.clone());
        resource.file_size = Some(blob.size as i64);
        resource.content = json!({
            "description": format!("Uploaded {rtype} resource"),
            "instructions": format!("This {rtype} resource is available for {yg} students."),
            "usage": usage_instructions(rtype),
            "accessibility": "Available for download by enrolled students",
            "fileSizeFormatted": format_file_size(blob.size as u64),
            "fileExtension": extension(&file.name),
        });
        resource.tags = vec![
            rtype.to_string(),
            category.to_string(),
            yg.to_string(),
            "extra-resource".to_string(),
            Self::mime_tag(file),
        ];
        let mut metadata = self.upload_metadata();
        metadata["rating"] = Value::Null;
        metadata["featured"] = json!(false);
        resource.metadata = metadata;

        self.state.db.lock().await.insert_lesson(&resource)?;
        info!(id = %resource.id, path = %blob.path, "resource processed");

        let result = json!({
            "success": true,
            "type": "extra-resource",
            "resourceType": rtype,
            "fileName": blob.path,
            "fileUrl": file_url,
            "fileType": file.mime,
            "fileSize": blob.size,
            "resource": resource,
        });
        Ok((result, resource))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// `POST /bulk-upload`
pub async fn bulk_upload(
    State(state): State<AppState>,
    principal: Principal,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    principal.require_admin()?;

    let mut fields: HashMap<String, String> = HashMap::new();
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) => {
                let mime = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await?;
                files.push(UploadedFile {
                    field: name,
                    name: file_name,
                    mime,
                    data,
                });
            }
            None => {
                let value = field.text().await?;
                fields.insert(name, value);
            }
        }
    }

    let content_type = fields.get("contentType").map(String::as_str).unwrap_or_default();
    let year_group = required(fields.get("yearGroup").map(String::as_str), "Year group is required")?;
    let batch = Batch {
        state: &state,
        year_group: &year_group,
        uploaded_by: &principal.email,
    };

    let mut results = Vec::new();
    let mut created = 0usize;
    match content_type {
        "year-plan" => {
            let plan = files.iter().find(|f| f.field == "planFile");
            let Some(plan) = plan else {
                return Err(ApiError::Validation("No year plan file provided".to_string()));
            };
            match batch.year_plan(plan).await {
                Ok((result, lessons)) => {
                    created += lessons.len();
                    results.push(result);
                }
                Err(e) => results.push(failure("year-plan", &plan.name, &e)),
            }
        }
        "bulk-lessons" => {
            for (index, file) in files.iter().filter(|f| f.field.starts_with("lesson-")).enumerate() {
                match batch.lesson_file(file, index).await {
                    Ok((result, _)) => {
                        created += 1;
                        results.push(result);
                    }
                    Err(e) => {
                        warn!(file = %file.name, error = %e, "lesson file failed");
                        results.push(failure("lesson-material", &file.name, &e));
                    }
                }
            }
        }
        "resources" => {
            for (index, file) in files.iter().filter(|f| f.field.starts_with("resource-")).enumerate() {
                match batch.resource_file(file, index).await {
                    Ok((result, _)) => {
                        created += 1;
                        results.push(result);
                    }
                    Err(e) => {
                        warn!(file = %file.name, error = %e, "resource file failed");
                        results.push(failure("extra-resource", &file.name, &e));
                    }
                }
            }
        }
        other => {
            return Err(ApiError::Validation(format!("Invalid content type: {other}")));
        }
    }

    info!(
        content_type,
        year_group = %year_group,
        items = results.len(),
        created,
        by = %principal.email,
        "bulk upload finished"
    );
    Ok(Json(json!({
        "success": true,
        "message": format!("Successfully processed {} items", results.len()),
        "results": results,
        "lessonsCreated": created,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::{multipart, TestApp};
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use portal_store::LessonFilter;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn plan_rows_need_week_and_topic() {
        let plan = rows_to_plan(&rows(&[
            &["Week", "Topic", "Subject", "Objectives", "Notes"],
            &["1", "Place value", "maths", "Read numbers; Order numbers;", ""],
            &["", "Orphan topic", "", "", ""],
            &["3", "Poetry", "", "", "Bring a book"],
        ]));
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].week, "1");
        assert_eq!(plan[0].objectives, vec!["Read numbers", "Order numbers"]);
        assert_eq!(plan[0].subject.as_deref(), Some("maths"));
        assert_eq!(plan[1].index, 2);
        assert_eq!(plan[1].subject, None);
        assert_eq!(plan[1].notes, "Bring a book");
        assert!(rows_to_plan(&[]).is_empty());
    }

    #[test]
    fn numeric_cells_render_without_fraction() {
        assert_eq!(cell_text(&Data::Float(4.0)), "4");
        assert_eq!(cell_text(&Data::Float(2.5)), "2.5");
        assert_eq!(cell_text(&Data::Empty), "");
    }

    async fn send(app: &TestApp, token: &str, parts: &[(&str, &str, &str, &[u8])]) -> (StatusCode, Value) {
        let (content_type, body) = multipart(parts);
        let request = Request::builder()
            .method("POST")
            .uri("/bulk-upload")
            .header(header::CONTENT_TYPE, content_type)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::from(body))
            .unwrap();
        app.request(request).await
    }

    #[tokio::test]
    async fn bulk_lessons_classify_and_continue_past_failures() {
        let app = TestApp::new().await;
        let admin = app.token("boss@x.com", &["admin"]);
        let (status, body) = send(
            &app,
            &admin,
            &[
                ("contentType", "", "", b"bulk-lessons"),
                ("yearGroup", "", "", b"year4"),
                ("lesson-0", "Maths_Worksheet_1.pdf", "application/pdf", b"pdf bytes"),
                ("lesson-1", "empty.pdf", "application/pdf", b""),
                ("lesson-2", "english-homework.docx", "application/msword", b"doc bytes"),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Successfully processed 3 items");
        assert_eq!(body["lessonsCreated"], 2);
        assert_eq!(body["results"][0]["subject"], "maths");
        assert_eq!(body["results"][0]["category"], "worksheet");
        assert_eq!(body["results"][1]["success"], false);
        assert_eq!(body["results"][2]["category"], "homework");

        let lessons = app
            .state
            .db
            .lock()
            .await
            .list_lessons(&LessonFilter::default())
            .unwrap();
        assert_eq!(lessons.len(), 2);
        let sheet = lessons.iter().find(|l| l.subject.as_deref() == Some("maths")).unwrap();
        assert_eq!(sheet.title, "Maths Worksheet 1");
        assert_eq!(sheet.content_type, ContentType::LessonMaterial);
        assert_eq!(sheet.created_by.as_deref(), Some("boss@x.com"));
        assert!(sheet.source_file.as_deref().unwrap().starts_with("lesson-files/lessons/year4/maths/worksheet/"));
    }

    #[tokio::test]
    async fn resources_and_rejections() {
        let app = TestApp::new().await;
        let admin = app.token("boss@x.com", &["admin"]);
        let (_, body) = send(
            &app,
            &admin,
            &[
                ("contentType", "", "", b"resources"),
                ("yearGroup", "", "", b"year5"),
                ("resource-0", "intro-video.mp4", "video/mp4", b"mp4"),
            ],
        )
        .await;
        assert_eq!(body["results"][0]["resourceType"], "video");
        assert_eq!(body["results"][0]["resource"]["type"], "extra-resource");

        let (status, body) = send(
            &app,
            &admin,
            &[("contentType", "", "", b"podcasts"), ("yearGroup", "", "", b"year5")],
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid content type: podcasts");

        let (status, _) = send(&app, &admin, &[("contentType", "", "", b"resources")]).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let tutor = app.token("t@x.com", &["tutor"]);
        let (status, _) = send(&app, &tutor, &[("contentType", "", "", b"resources")]).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn unreadable_year_plan_is_a_failed_result() {
        let app = TestApp::new().await;
        let admin = app.token("boss@x.com", &["admin"]);
        let (status, body) = send(
            &app,
            &admin,
            &[
                ("contentType", "", "", b"year-plan"),
                ("yearGroup", "", "", b"year4"),
                ("planFile", "plan.xlsx", "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet", b"not a zip"),
            ],
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["success"], false);
        assert_eq!(body["lessonsCreated"], 0);
    }
}

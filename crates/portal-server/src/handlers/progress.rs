//! `/student-progress`: progress records, homework submissions and the
//! parent dashboard.  Every action runs the consent gate first.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;
use uuid::Uuid;

use portal_shared::constants::PARENT_DASHBOARD_RECENT;
use portal_shared::metrics;
use portal_shared::types::AssignmentStatus;
use portal_store::{ProgressRecord, StoreError};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::gate::{verify_student_access, Access, ActingRole};
use crate::handlers::{parse_date, ApiJson};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRequest {
    action: Option<String>,
    student_id: Option<String>,
    progress_data: Option<Value>,
    #[serde(default)]
    is_parent: bool,
    #[serde(default)]
    is_teacher: bool,
}

/// Known record fields; anything else lands in `details`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressInput {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    score: Option<f64>,
    status: Option<String>,
    due_date: Option<String>,
    assignment_id: Option<String>,
    #[serde(flatten)]
    details: Map<String, Value>,
}

impl ProgressInput {
    fn from_request(data: Option<Value>) -> Result<Self, ApiError> {
        match data {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ApiError::Validation(format!("Invalid progressData: {e}"))),
        }
    }

    fn into_record(self, student_id: &str, default_kind: &str, created_by: &str) -> Result<ProgressRecord, ApiError> {
        let due_date = self.due_date.as_deref().map(parse_date).transpose()?;
        Ok(ProgressRecord {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            kind: self.kind.unwrap_or_else(|| default_kind.to_string()),
            title: self.title,
            score: self.score,
            status: self.status,
            due_date,
            submitted_date: None,
            completed_date: None,
            assignment_id: self.assignment_id,
            details: Value::Object(self.details),
            data_processing_consent: true,
            created_by: Some(created_by.to_string()),
            created_date: Utc::now(),
        })
    }
}

type Reply = (StatusCode, Json<Value>);

pub async fn student_progress(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<ProgressRequest>,
) -> Result<Reply, ApiError> {
    let acting = if req.is_teacher {
        ActingRole::Teacher
    } else if req.is_parent {
        ActingRole::Parent
    } else {
        ActingRole::Own
    };
    let target = req
        .student_id
        .as_deref()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty());

    let caller = state.db.lock().await.find_user(&principal.email)?;
    let access = verify_student_access(&principal, caller.as_ref(), target.as_deref(), acting)?;
    let student = target.unwrap_or_else(|| principal.email.clone());

    match req.action.as_deref().unwrap_or_default() {
        "get-progress" => {
            let records = state.db.lock().await.list_progress(&student)?;
            let metrics = metrics::calculate(&records);
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "progress": records, "metrics": metrics })),
            ))
        }
        "update-progress" => {
            if access != Access::Teacher {
                return Err(ApiError::Forbidden("Teacher access required".to_string()));
            }
            let record = ProgressInput::from_request(req.progress_data)?
                .into_record(&student, "progress", &principal.email)?;
            state.db.lock().await.insert_progress(&record)?;
            info!(student = %student, by = %principal.email, kind = %record.kind, "progress recorded");
            Ok((
                StatusCode::CREATED,
                Json(json!({ "success": true, "progress": record })),
            ))
        }
        "get-homework" => {
            let db = state.db.lock().await;
            let homework = db.list_homework_progress(&student)?;
            let assignments = db.list_assignments_for_student(&student, None)?;
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "homework": homework, "assignments": assignments })),
            ))
        }
        "submit-homework" => submit_homework(&state, &principal, &student, req.progress_data).await,
        "get-parent-dashboard" => {
            if access != Access::Parent {
                return Err(ApiError::Forbidden("Parent access required".to_string()));
            }
            let children = caller.map(|u| u.children).unwrap_or_default();
            if children.is_empty() {
                return Ok((
                    StatusCode::OK,
                    Json(json!({
                        "success": true,
                        "children": [],
                        "message": "No children found for this parent account",
                    })),
                ));
            }

            let db = state.db.lock().await;
            let mut data = Vec::with_capacity(children.len());
            for child in &children {
                let records = db.list_progress(child)?;
                let metrics = metrics::calculate(&records);
                let recent: Vec<_> = records.into_iter().take(PARENT_DASHBOARD_RECENT).collect();
                data.push(json!({ "studentId": child, "progress": recent, "metrics": metrics }));
            }
            Ok((StatusCode::OK, Json(json!({ "success": true, "children": data }))))
        }
        other => Err(ApiError::Validation(format!("Invalid action: {other}"))),
    }
}

/// Record a submission and, when it names an assignment, move that
/// assignment to `submitted`.
async fn submit_homework(
    state: &AppState,
    principal: &Principal,
    student: &str,
    data: Option<Value>,
) -> Result<Reply, ApiError> {
    let mut record = ProgressInput::from_request(data)?.into_record(student, "homework_submission", &principal.email)?;
    let now = Utc::now();
    record.status = Some(AssignmentStatus::Submitted.as_str().to_string());
    record.submitted_date = Some(now);

    let db = state.db.lock().await;
    let assignment = match record.assignment_id.as_deref() {
        Some(id) => {
            let mut assignment = db.get_assignment(id).map_err(|e| match e {
                StoreError::NotFound => ApiError::NotFound("Assignment not found".to_string()),
                other => other.into(),
            })?;
            if !assignment.student_email.eq_ignore_ascii_case(student) {
                return Err(ApiError::Forbidden(
                    "Assignment belongs to another student".to_string(),
                ));
            }
            if !assignment.status.can_advance_to(AssignmentStatus::Submitted) {
                return Err(ApiError::Validation(format!(
                    "Assignment is already {}",
                    assignment.status.as_str()
                )));
            }
            assignment.status = AssignmentStatus::Submitted;
            assignment.submitted_date = Some(now);
            Some(db.update_assignment(&assignment)?)
        }
        None => None,
    };

    db.insert_progress(&record)?;
    info!(student, assignment = ?record.assignment_id, "homework submitted");

    let mut body = json!({ "success": true, "submission": record });
    if let Some(assignment) = assignment {
        body["assignment"] = json!(assignment);
    }
    Ok((StatusCode::CREATED, Json(body)))
}

#[cfg(test)]
mod tests {
    use crate::api::test_support::TestApp;
    use axum::http::StatusCode;
    use chrono::{Duration, Utc};
    use portal_shared::types::{AssignmentStatus, Role};
    use portal_store::{HomeworkAssignment, User};
    use serde_json::json;

    const ACTIONS: [&str; 5] = [
        "get-progress",
        "update-progress",
        "get-homework",
        "submit-homework",
        "get-parent-dashboard",
    ];

    #[tokio::test]
    async fn consent_is_required_for_every_action() {
        let app = TestApp::new().await;
        let mut user = User::new("t@x.com", Utc::now());
        user.roles = vec![Role::Tutor, Role::Parent];
        user.children = vec!["kid@x.com".to_string()];
        app.state.db.lock().await.insert_user(&user).unwrap();
        let token = app.token("t@x.com", &["tutor", "parent"]);

        for action in ACTIONS {
            for (is_teacher, is_parent) in [(false, false), (true, false), (false, true)] {
                let (status, body) = app
                    .post(
                        "/student-progress",
                        &token,
                        json!({"action": action, "studentId": "kid@x.com",
                               "isTeacher": is_teacher, "isParent": is_parent}),
                    )
                    .await;
                assert_eq!(status, StatusCode::FORBIDDEN, "{action}");
                assert_eq!(body["reason"], "GDPR consent required for data processing");
            }
        }
    }

    #[tokio::test]
    async fn unknown_caller_is_denied() {
        let app = TestApp::new().await;
        let token = app.token("ghost@x.com", &["student"]);
        let (status, body) = app
            .post("/student-progress", &token, json!({"action": "get-progress"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "User not found");
    }

    #[tokio::test]
    async fn teacher_records_and_student_reads() {
        let app = TestApp::new().await;
        app.seed_user("t@x.com", &[Role::Tutor]).await;
        app.seed_user("s@x.com", &[Role::Student]).await;
        let tutor = app.token("t@x.com", &["tutor"]);
        let student = app.token("s@x.com", &["student"]);

        for score in [60.0, 70.0, 90.0] {
            let (status, body) = app
                .post(
                    "/student-progress",
                    &tutor,
                    json!({"action": "update-progress", "studentId": "s@x.com", "isTeacher": true,
                           "progressData": {"type": "assignment", "status": "completed",
                                            "score": score, "topic": "fractions"}}),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["progress"]["details"]["topic"], "fractions");
            assert_eq!(body["progress"]["createdBy"], "t@x.com");
        }

        let (status, body) = app
            .post("/student-progress", &student, json!({"action": "get-progress"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["progress"].as_array().unwrap().len(), 3);
        assert_eq!(body["metrics"]["totalAssignments"], 3);
        assert_eq!(body["metrics"]["completedAssignments"], 3);

        let (status, body) = app
            .post(
                "/student-progress",
                &student,
                json!({"action": "update-progress", "progressData": {"score": 100}}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Teacher access required");

        let (status, body) = app
            .post(
                "/student-progress",
                &student,
                json!({"action": "get-progress", "studentId": "other@x.com"}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "Insufficient permissions");
    }

    #[tokio::test]
    async fn parent_dashboard_is_scoped_to_children() {
        let app = TestApp::new().await;
        let mut parent = app.seed_user("p@x.com", &[Role::Parent]).await;
        parent.children = vec!["kid@x.com".to_string()];
        app.state.db.lock().await.update_user(&parent).unwrap();
        let token = app.token("p@x.com", &["parent"]);

        let (status, body) = app
            .post("/student-progress", &token, json!({"action": "get-parent-dashboard", "isParent": true}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["children"][0]["studentId"], "kid@x.com");

        let (status, body) = app
            .post(
                "/student-progress",
                &token,
                json!({"action": "get-progress", "studentId": "stranger@x.com", "isParent": true}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "Parent can only access own children data");

        let (status, body) = app
            .post("/student-progress", &token, json!({"action": "get-parent-dashboard"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Parent access required");
    }

    #[tokio::test]
    async fn submission_advances_assignment() {
        let app = TestApp::new().await;
        app.seed_user("s@x.com", &[Role::Student]).await;
        let now = Utc::now();
        let assignment = HomeworkAssignment {
            id: "hw_1".into(),
            homework_id: "h1".into(),
            student_email: "s@x.com".into(),
            tutor_email: "t@x.com".into(),
            assigned_date: now,
            due_date: now + Duration::days(7),
            status: AssignmentStatus::Assigned,
            notes: String::new(),
            submitted_date: None,
            completed_date: None,
            grade: None,
            feedback: None,
            version: 1,
        };
        app.state.db.lock().await.insert_assignment(&assignment).unwrap();
        let token = app.token("s@x.com", &["student"]);

        let (status, body) = app
            .post(
                "/student-progress",
                &token,
                json!({"action": "submit-homework", "progressData": {"assignmentId": "hw_1", "answer": "42"}}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["submission"]["type"], "homework_submission");
        assert_eq!(body["submission"]["status"], "submitted");
        assert_eq!(body["assignment"]["status"], "submitted");

        let (_, homework) = app
            .post("/student-progress", &token, json!({"action": "get-homework"}))
            .await;
        assert_eq!(homework["assignments"][0]["status"], "submitted");
    }
}

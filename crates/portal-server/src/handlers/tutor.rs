//! `/tutor-management`: a tutor's roster and homework assignments.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{Duration, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;

use portal_shared::constants::{DEFAULT_DUE_DAYS, RECENT_LOGIN_DAYS};
use portal_shared::types::{AssignmentStatus, Role, UserStatus};
use portal_store::{Database, Homework, HomeworkAssignment, Profile, StoreError, User};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::gate::verify_tutor;
use crate::handlers::{check_expected_version, parse_date, required, required_email, ApiJson};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutorRequest {
    action: Option<String>,
    student_data: Option<StudentData>,
    target_user: Option<TargetUser>,
    homework_data: Option<HomeworkData>,
    student_email: Option<String>,
    assignment_data: Option<AssignmentData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StudentData {
    email: Option<String>,
    student_email: Option<String>,
    name: Option<String>,
    year_group: Option<String>,
    organization: Option<String>,
    parent_email: Option<String>,
    date_of_birth: Option<String>,
    emergency_contact: Option<String>,
    is_active: Option<bool>,
    version: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetUser {
    email: Option<String>,
    assigned_tutor: Option<String>,
    organization: Option<String>,
    year_group: Option<String>,
    parent_email: Option<String>,
    date_of_birth: Option<String>,
    emergency_contact: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HomeworkData {
    #[serde(default)]
    homework_ids: Vec<String>,
    #[serde(default)]
    student_emails: Vec<String>,
    due_date: Option<String>,
    notes: Option<String>,
    title: Option<String>,
    subject: Option<String>,
    week: Option<i64>,
    description: Option<String>,
    lesson_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentData {
    assignment_id: Option<String>,
    grade: Option<String>,
    feedback: Option<String>,
    version: Option<i64>,
}

type Reply = (StatusCode, Json<Value>);

fn ok(body: Value) -> Result<Reply, ApiError> {
    Ok((StatusCode::OK, Json(body)))
}

fn created(body: Value) -> Result<Reply, ApiError> {
    Ok((StatusCode::CREATED, Json(body)))
}

fn student_summary(user: &User) -> Value {
    json!({
        "email": user.email,
        "name": user.name,
        "yearGroup": user.year_group,
        "enrollmentDate": user.enrollment_date,
        "isActive": user.is_active,
        "parentContactEmail": user.profile.parent_contact_email,
        "lastLoginDate": user.last_login_date,
    })
}

/// The tutor's students: the tutor record's roster, or users assigned to
/// the tutor when no record exists yet.
fn roster(db: &Database, tutor: &str) -> Result<Vec<User>, ApiError> {
    match db.find_tutor(tutor)? {
        Some(record) => {
            let mut students = Vec::with_capacity(record.students.len());
            for email in &record.students {
                if let Some(user) = db.find_user(email)? {
                    students.push(user);
                }
            }
            Ok(students)
        }
        None => Ok(db.list_users_assigned_to(tutor)?),
    }
}

/// Load a student the tutor is assigned to.
fn assigned_student(db: &Database, tutor: &str, email: &str) -> Result<User, ApiError> {
    match db.find_user(email)? {
        Some(user) if user.assigned_tutor.as_deref() == Some(tutor) => Ok(user),
        _ => Err(ApiError::Forbidden("Access denied to this student".to_string())),
    }
}

/// Load an assignment set by `tutor`.
fn owned_assignment(db: &Database, tutor: &str, id: &str, action: &str) -> Result<HomeworkAssignment, ApiError> {
    let assignment = db.get_assignment(id).map_err(|e| match e {
        StoreError::NotFound => ApiError::NotFound("Assignment not found".to_string()),
        other => other.into(),
    })?;
    if assignment.tutor_email != tutor {
        return Err(ApiError::Forbidden(format!("You can only {action} your own assignments")));
    }
    Ok(assignment)
}

/// `hw_<millis>_<9 base-36 chars>`
fn assignment_id(now_millis: i64) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("hw_{now_millis}_{suffix}")
}

pub async fn tutor_management(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<TutorRequest>,
) -> Result<Reply, ApiError> {
    let db = state.db.lock().await;
    let caller = db.find_user(&principal.email)?;
    verify_tutor(&principal, caller.as_ref())?;

    let tutor = principal.email.as_str();
    let now = Utc::now();

    match req.action.as_deref().unwrap_or_default() {
        "get-students" => {
            let students: Vec<Value> = roster(&db, tutor)?.iter().map(student_summary).collect();
            ok(json!({ "success": true, "totalStudents": students.len(), "students": students }))
        }
        "add-student" => {
            let data = req
                .student_data
                .ok_or_else(|| ApiError::Validation("Student data required".to_string()))?;
            let email = required_email(data.email.as_deref(), "Student email is required")?;
            if db.find_user(&email)?.is_some() {
                return Err(ApiError::Conflict("Student already exists".to_string()));
            }

            let organization = data
                .organization
                .clone()
                .unwrap_or_else(|| state.config.default_organization.clone());
            let mut student = User::new(&email, now);
            student.name = data.name;
            student.roles = vec![Role::Student];
            student.status = UserStatus::Approved;
            student.processed_by = Some(tutor.to_string());
            student.processed_date = Some(now);
            student.assigned_tutor = Some(tutor.to_string());
            student.organization = Some(organization.clone());
            student.year_group = data.year_group;
            student.enrollment_date = Some(now);
            student.profile = Profile {
                parent_contact_email: data.parent_email,
                date_of_birth: data.date_of_birth,
                emergency_contact: data.emergency_contact,
                phone: None,
            };

            db.insert_user(&student)?;
            db.link_student(tutor, &email, Some(organization), now)?;
            info!(tutor, student = %email, "student added");
            created(json!({
                "success": true,
                "student": student,
                "message": "Student added successfully",
            }))
        }
        "update-student" => {
            let data = req.student_data.unwrap_or_default();
            let email = required_email(
                data.email.as_deref().or(data.student_email.as_deref()),
                "Student email is required",
            )?;
            let mut student = assigned_student(&db, tutor, &email)?;
            check_expected_version(data.version, student.version)?;

            if let Some(name) = data.name {
                student.name = Some(name);
            }
            if let Some(year) = data.year_group {
                student.year_group = Some(year);
            }
            if let Some(active) = data.is_active {
                student.is_active = active;
            }
            if let Some(parent) = data.parent_email {
                student.profile.parent_contact_email = Some(parent);
            }
            if let Some(dob) = data.date_of_birth {
                student.profile.date_of_birth = Some(dob);
            }
            if let Some(contact) = data.emergency_contact {
                student.profile.emergency_contact = Some(contact);
            }
            student.updated_date = Some(now);

            let updated = db.update_user(&student)?;
            info!(tutor, student = %email, "student updated");
            ok(json!({
                "success": true,
                "student": updated,
                "message": "Student updated successfully",
            }))
        }
        "remove-student" => {
            let data = req.student_data.unwrap_or_default();
            let email = required_email(
                data.student_email.as_deref().or(data.email.as_deref()),
                "Student email is required",
            )?;
            let mut student = assigned_student(&db, tutor, &email)?;

            db.unlink_student(tutor, &email, now)?;
            student.is_active = false;
            student.assigned_tutor = None;
            student.deactivated_date = Some(now);
            student.deactivated_by = Some(tutor.to_string());
            db.update_user(&student)?;
            info!(tutor, student = %email, "student removed");
            ok(json!({ "success": true, "message": "Student removed successfully" }))
        }
        "get-dashboard" => {
            let students = roster(&db, tutor)?;
            let week_ago = now - Duration::days(RECENT_LOGIN_DAYS);
            let in_year = |yg: &str| students.iter().filter(|s| s.year_group.as_deref() == Some(yg)).count();
            let metrics = json!({
                "totalStudents": students.len(),
                "activeStudents": students.iter().filter(|s| s.is_active).count(),
                "year4Students": in_year("year4"),
                "year5Students": in_year("year5"),
                "recentLogins": students
                    .iter()
                    .filter(|s| s.last_login_date.is_some_and(|d| d > week_ago))
                    .count(),
            });
            let summaries: Vec<Value> = students.iter().map(student_summary).collect();
            ok(json!({ "success": true, "students": summaries, "metrics": metrics }))
        }
        "migrate-user" => {
            let target = req.target_user.unwrap_or_default();
            let email = required_email(target.email.as_deref(), "Target user email is required")?;
            let mut user = db
                .find_user(&email)?
                .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

            let mut roles = Vec::new();
            if user.has_role(Role::Admin) {
                roles.push(Role::Admin);
            }
            if user.is_admin {
                roles.push(Role::Tutor);
            }
            if !user.children.is_empty() {
                roles.push(Role::Parent);
            }
            if !user.is_admin {
                roles.push(Role::Student);
            }
            user.roles = roles;
            user.assigned_tutor = target
                .assigned_tutor
                .map(|t| t.trim().to_ascii_lowercase())
                .filter(|t| !t.is_empty());
            user.organization = Some(
                target
                    .organization
                    .unwrap_or_else(|| state.config.default_organization.clone()),
            );
            user.year_group = target
                .year_group
                .or(user.year_group.take())
                .or_else(|| (!user.is_admin).then(|| "year5".to_string()));
            user.enrollment_date = Some(user.created_date);
            user.profile = Profile {
                parent_contact_email: target.parent_email,
                date_of_birth: target.date_of_birth,
                emergency_contact: target.emergency_contact,
                phone: user.profile.phone.take(),
            };
            user.migrated_date = Some(now);
            user.migrated_by = Some(tutor.to_string());
            user.updated_date = Some(now);

            let updated = db.update_user(&user)?;
            info!(by = tutor, user = %email, roles = ?updated.roles, "user migrated");
            ok(json!({ "success": true, "user": updated, "message": "User migrated successfully" }))
        }
        "get-available-homework" => {
            let homework = db.list_homework()?;
            ok(json!({ "success": true, "homework": homework }))
        }
        "create-homework" => {
            let data = req.homework_data.unwrap_or_default();
            let title = required(data.title.as_deref(), "Homework title is required")?;
            let homework = Homework {
                id: Uuid::new_v4().to_string(),
                title,
                subject: data.subject,
                week: data.week,
                description: data.description,
                lesson_id: data.lesson_id,
                created_by: Some(tutor.to_string()),
                created_date: now,
            };
            db.insert_homework(&homework)?;
            info!(tutor, id = %homework.id, "homework item created");
            created(json!({ "success": true, "homework": homework }))
        }
        "assign-homework" => {
            let data = req.homework_data.unwrap_or_default();
            let students: Vec<String> = data
                .student_emails
                .iter()
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
            if data.homework_ids.is_empty() || students.is_empty() {
                return Err(ApiError::Validation(
                    "Homework IDs and student emails required".to_string(),
                ));
            }
            let due_date = match data.due_date.as_deref() {
                Some(raw) => parse_date(raw)?,
                None => now + Duration::days(DEFAULT_DUE_DAYS),
            };
            let notes = data.notes.unwrap_or_default();

            let mut assignments = Vec::new();
            let mut failed = 0usize;
            for homework_id in &data.homework_ids {
                for student in &students {
                    let assignment = HomeworkAssignment {
                        id: assignment_id(Utc::now().timestamp_millis()),
                        homework_id: homework_id.clone(),
                        student_email: student.clone(),
                        tutor_email: tutor.to_string(),
                        assigned_date: now,
                        due_date,
                        status: AssignmentStatus::Assigned,
                        notes: notes.clone(),
                        submitted_date: None,
                        completed_date: None,
                        grade: None,
                        feedback: None,
                        version: 1,
                    };
                    match db.insert_assignment(&assignment) {
                        Ok(()) => assignments.push(assignment),
                        Err(e) => {
                            warn!(tutor, homework = %homework_id, student = %student, error = %e, "assignment insert failed");
                            failed += 1;
                        }
                    }
                }
            }

            info!(tutor, created = assignments.len(), failed, "homework assigned");
            created(json!({
                "success": true,
                "assignments": assignments,
                "failed": failed,
                "message": format!(
                    "Successfully assigned {} homework items to {} students",
                    data.homework_ids.len(),
                    students.len()
                ),
            }))
        }
        "get-student-homework" => {
            let student = required_email(req.student_email.as_deref(), "Student email is required")?;
            let assignments = db.list_assignments_for_student(&student, Some(tutor))?;
            let mut detailed = Vec::with_capacity(assignments.len());
            for assignment in assignments {
                let homework = db.find_homework(&assignment.homework_id)?;
                let mut entry = json!(assignment);
                entry["homework"] = json!(homework);
                detailed.push(entry);
            }
            ok(json!({ "success": true, "assignments": detailed }))
        }
        "remove-homework-assignment" => {
            let data = req.assignment_data.unwrap_or_default();
            let id = required(data.assignment_id.as_deref(), "Assignment ID required")?;
            owned_assignment(&db, tutor, &id, "remove")?;
            db.delete_assignment(&id)?;
            info!(tutor, assignment = %id, "homework assignment removed");
            ok(json!({ "success": true, "message": "Homework assignment removed successfully" }))
        }
        "grade-homework" => {
            let data = req.assignment_data.unwrap_or_default();
            let id = required(data.assignment_id.as_deref(), "Assignment ID required")?;
            let mut assignment = owned_assignment(&db, tutor, &id, "grade")?;
            check_expected_version(data.version, assignment.version)?;
            if !assignment.status.can_advance_to(AssignmentStatus::Completed) {
                return Err(ApiError::Validation(format!(
                    "Cannot grade an assignment that is {}",
                    assignment.status.as_str()
                )));
            }

            assignment.status = AssignmentStatus::Completed;
            assignment.grade = data.grade;
            assignment.feedback = data.feedback;
            assignment.completed_date = Some(now);
            let updated = db.update_assignment(&assignment)?;
            info!(tutor, assignment = %id, "homework graded");
            ok(json!({
                "success": true,
                "assignment": updated,
                "message": "Homework graded successfully",
            }))
        }
        other => Err(ApiError::Validation(format!("Invalid action: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;

    async fn tutor_app() -> (TestApp, String) {
        let app = TestApp::new().await;
        app.seed_user("t@x.com", &[Role::Tutor]).await;
        let token = app.token("t@x.com", &["tutor"]);
        (app, token)
    }

    #[test]
    fn assignment_ids_have_expected_shape() {
        let id = assignment_id(1_700_000_000_000);
        let suffix = id.strip_prefix("hw_1700000000000_").unwrap();
        assert_eq!(suffix.len(), 9);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[tokio::test]
    async fn non_tutors_are_denied() {
        let app = TestApp::new().await;
        app.seed_user("s@x.com", &[Role::Student]).await;
        let token = app.token("s@x.com", &["tutor"]);
        let (status, body) = app
            .post("/tutor-management", &token, json!({"action": "get-students"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["reason"], "User does not have tutor permissions");

        app.seed_user("t@x.com", &[Role::Tutor]).await;
        let token = app.token("t@x.com", &["student"]);
        let (_, body) = app
            .post("/tutor-management", &token, json!({"action": "get-students"}))
            .await;
        assert_eq!(body["reason"], "Tutor role not present in token");
    }

    #[tokio::test]
    async fn fan_out_creates_one_assignment_per_pair() {
        let (app, token) = tutor_app().await;
        let before = Utc::now();
        let (status, body) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "assign-homework", "homeworkData": {
                    "homeworkIds": ["h1", "h2"], "studentEmails": ["s1@x.com", "s2@x.com"]
                }}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["message"], "Successfully assigned 2 homework items to 2 students");

        let assignments = body["assignments"].as_array().unwrap();
        assert_eq!(assignments.len(), 4);
        let mut pairs: Vec<(String, String)> = assignments
            .iter()
            .map(|a| {
                assert_eq!(a["status"], "assigned");
                assert_eq!(a["tutorEmail"], "t@x.com");
                let due: chrono::DateTime<Utc> = a["dueDate"].as_str().unwrap().parse().unwrap();
                let offset = due - before;
                assert!(offset >= Duration::days(7) && offset < Duration::days(7) + Duration::minutes(1));
                (
                    a["homeworkId"].as_str().unwrap().to_string(),
                    a["studentEmail"].as_str().unwrap().to_string(),
                )
            })
            .collect();
        pairs.sort();
        let expected: Vec<(String, String)> = [("h1", "s1@x.com"), ("h1", "s2@x.com"), ("h2", "s1@x.com"), ("h2", "s2@x.com")]
            .iter()
            .map(|(h, s)| (h.to_string(), s.to_string()))
            .collect();
        assert_eq!(pairs, expected);

        // Only the assigning tutor may delete, one record at a time.
        app.seed_user("other@x.com", &[Role::Tutor]).await;
        let other = app.token("other@x.com", &["tutor"]);
        let first = assignments[0]["id"].as_str().unwrap();
        let (status, body) = app
            .post(
                "/tutor-management",
                &other,
                json!({"action": "remove-homework-assignment", "assignmentData": {"assignmentId": first}}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "You can only remove your own assignments");

        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "remove-homework-assignment", "assignmentData": {"assignmentId": first}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let db = app.state.db.lock().await;
        let remaining = db.list_assignments_for_student("s1@x.com", None).unwrap().len()
            + db.list_assignments_for_student("s2@x.com", None).unwrap().len();
        assert_eq!(remaining, 3);
    }

    #[tokio::test]
    async fn explicit_due_date_and_validation() {
        let (app, token) = tutor_app().await;
        let (status, body) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "assign-homework", "homeworkData": {
                    "homeworkIds": ["h1"], "studentEmails": ["s1@x.com"], "dueDate": "2030-01-15", "notes": "p. 12"
                }}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["assignments"][0]["dueDate"], "2030-01-15T00:00:00Z");
        assert_eq!(body["assignments"][0]["notes"], "p. 12");

        let (status, body) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "assign-homework", "homeworkData": {"homeworkIds": [], "studentEmails": ["s1@x.com"]}}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Homework IDs and student emails required");
    }

    #[tokio::test]
    async fn roster_lifecycle() {
        let (app, token) = tutor_app().await;
        let (status, body) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "add-student", "studentData": {
                    "email": "Kid@X.com", "name": "Kid", "yearGroup": "year4", "parentEmail": "p@x.com"
                }}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["student"]["assignedTutor"], "t@x.com");
        assert_eq!(body["student"]["organization"], "BrightStars-NorthLondon");

        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "add-student", "studentData": {"email": "kid@x.com"}}),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, dashboard) = app
            .post("/tutor-management", &token, json!({"action": "get-dashboard"}))
            .await;
        assert_eq!(dashboard["metrics"]["totalStudents"], 1);
        assert_eq!(dashboard["metrics"]["year4Students"], 1);
        assert_eq!(dashboard["students"][0]["parentContactEmail"], "p@x.com");

        let (status, body) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "update-student", "studentData": {"email": "kid@x.com", "yearGroup": "year5", "version": 1}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["student"]["yearGroup"], "year5");

        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "update-student", "studentData": {"email": "kid@x.com", "name": "Late", "version": 1}}),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        app.seed_user("other@x.com", &[Role::Tutor]).await;
        let other = app.token("other@x.com", &["tutor"]);
        let (status, body) = app
            .post(
                "/tutor-management",
                &other,
                json!({"action": "remove-student", "studentData": {"studentEmail": "kid@x.com"}}),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "Access denied to this student");

        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "remove-student", "studentData": {"studentEmail": "kid@x.com"}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let kid = app.state.db.lock().await.get_user("kid@x.com").unwrap();
        assert!(!kid.is_active);
        assert_eq!(kid.deactivated_by.as_deref(), Some("t@x.com"));

        let (_, students) = app
            .post("/tutor-management", &token, json!({"action": "get-students"}))
            .await;
        assert_eq!(students["totalStudents"], 0);
    }

    #[tokio::test]
    async fn catalog_grading_and_migration() {
        let (app, token) = tutor_app().await;
        let (status, created) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "create-homework", "homeworkData": {"title": "Long division", "subject": "maths", "week": 3}}),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let homework_id = created["homework"]["id"].as_str().unwrap().to_string();

        let (_, catalog) = app
            .post("/tutor-management", &token, json!({"action": "get-available-homework"}))
            .await;
        assert_eq!(catalog["homework"][0]["title"], "Long division");

        let (_, assigned) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "assign-homework", "homeworkData": {"homeworkIds": [homework_id], "studentEmails": ["s@x.com"]}}),
            )
            .await;
        let assignment_id = assigned["assignments"][0]["id"].as_str().unwrap().to_string();

        let (_, listed) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "get-student-homework", "studentEmail": "s@x.com"}),
            )
            .await;
        assert_eq!(listed["assignments"][0]["homework"]["title"], "Long division");

        let (status, graded) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "grade-homework", "assignmentData": {"assignmentId": assignment_id, "grade": "A", "feedback": "Neat"}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(graded["assignment"]["status"], "completed");
        assert_eq!(graded["assignment"]["grade"], "A");

        let mut legacy = User::new("legacy@x.com", Utc::now());
        legacy.is_admin = true;
        app.state.db.lock().await.insert_user(&legacy).unwrap();
        let (status, migrated) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "migrate-user", "targetUser": {"email": "legacy@x.com"}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(migrated["user"]["roles"], json!(["tutor"]));
        assert_eq!(migrated["user"]["migratedBy"], "t@x.com");

        app.state
            .db
            .lock()
            .await
            .insert_user(&User::new("pupil@x.com", Utc::now()))
            .unwrap();
        let (status, migrated) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "migrate-user", "targetUser": {"email": "pupil@x.com", "assignedTutor": " T@X.com "}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(migrated["user"]["assignedTutor"], "t@x.com");
        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "update-student", "studentData": {"email": "pupil@x.com", "name": "Pip"}}),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = app
            .post(
                "/tutor-management",
                &token,
                json!({"action": "migrate-user", "targetUser": {"email": "ghost@x.com"}}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

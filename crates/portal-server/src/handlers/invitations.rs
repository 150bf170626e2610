//! `/student-invitations`: parent invitation tokens.
//!
//! Sending, listing and resending need a signed-in tutor (or an admin
//! acting for one). Validating and accepting are public: the token itself
//! is the credential.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use portal_shared::invite::{self, InviteError};
use portal_shared::types::InvitationStatus;
use portal_store::{Invitation, ParentDetails, StoreError, StudentInfo};

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::{required, required_email, ApiJson};
use crate::mailer::{send_best_effort, templates};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationRequest {
    action: Option<String>,
    tutor_email: Option<String>,
    token: Option<String>,
    invitation_id: Option<String>,
    invitation_data: Option<InvitationData>,
    #[serde(default)]
    parent_details: ParentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InvitationData {
    student_email: Option<String>,
    parent_email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    year_group: Option<String>,
    start_date: Option<String>,
}

type Reply = (StatusCode, Json<Value>);

/// The tutor an authenticated caller acts as: themselves, or any named
/// tutor when the caller is an admin.
fn acting_tutor(principal: Option<&Principal>, named: Option<&str>) -> Result<String, ApiError> {
    let principal =
        principal.ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
    let named = named
        .map(|n| n.trim().to_ascii_lowercase())
        .filter(|n| !n.is_empty());
    match named {
        Some(tutor) if tutor != principal.email => {
            principal.require_admin()?;
            Ok(tutor)
        }
        _ => {
            if !principal.is_staff() {
                return Err(ApiError::Forbidden("Tutor access required".to_string()));
            }
            Ok(principal.email.clone())
        }
    }
}

/// Everything but the token.
fn invitation_view(inv: &Invitation, now: DateTime<Utc>) -> Value {
    json!({
        "id": inv.id,
        "studentEmail": inv.student_email,
        "parentEmail": inv.parent_email,
        "studentInfo": inv.student_info,
        "status": inv.status.as_str(),
        "createdDate": inv.created_date,
        "sentDate": inv.sent_date,
        "expiryDate": inv.expiry_date,
        "acceptedDate": inv.accepted_date,
        "emailSent": inv.email_sent,
        "remindersSent": inv.reminders_sent,
        "expired": invite::is_expired(inv.expiry_date, now),
    })
}

async fn email_invitation(state: &AppState, inv: &Invitation) -> bool {
    let link = format!("{}/register?token={}", state.config.app_base_url, inv.token);
    let first_name = inv.student_info.first_name.as_deref().unwrap_or("your child");
    let message = templates::invitation(
        &inv.parent_email,
        first_name,
        &inv.tutor_email,
        &link,
        inv.expiry_date,
    );
    send_best_effort(state.mailer.as_ref(), &message).await
}

/// Look a token up and check it can still be redeemed.
fn redeemable(inv: Option<Invitation>, now: DateTime<Utc>) -> Result<Invitation, ApiError> {
    let inv = inv.ok_or(InviteError::NotFound)?;
    invite::check_redeemable(inv.status, inv.expiry_date, now)?;
    Ok(inv)
}

pub async fn student_invitations(
    State(state): State<AppState>,
    principal: Option<Principal>,
    ApiJson(req): ApiJson<InvitationRequest>,
) -> Result<Reply, ApiError> {
    let now = Utc::now();
    match req.action.as_deref().unwrap_or_default() {
        "send-invitation" => {
            let tutor = acting_tutor(principal.as_ref(), req.tutor_email.as_deref())?;
            let data = req
                .invitation_data
                .ok_or_else(|| ApiError::Validation("Invitation data required".to_string()))?;
            let student_email = required_email(data.student_email.as_deref(), "Student email is required")?;
            let parent_email = required_email(data.parent_email.as_deref(), "Parent email is required")?;

            let mut inv = Invitation {
                id: invite::generate_invitation_id(now),
                token: invite::generate_token(),
                tutor_email: tutor.clone(),
                student_email,
                parent_email,
                student_info: StudentInfo {
                    first_name: data.first_name,
                    last_name: data.last_name,
                    year_group: data.year_group,
                    start_date: Some(data.start_date.unwrap_or_else(|| now.to_rfc3339())),
                },
                status: InvitationStatus::Pending,
                created_date: now,
                sent_date: None,
                expiry_date: invite::expiry_from(now),
                accepted_date: None,
                email_sent: false,
                reminders_sent: 0,
                version: 1,
            };
            {
                let db = state.db.lock().await;
                if db.find_tutor(&tutor)?.is_none() {
                    return Err(ApiError::NotFound("Tutor not found".to_string()));
                }
                db.insert_invitation(&inv)?;
            }
            info!(id = %inv.id, tutor = %tutor, parent = %inv.parent_email, "invitation created");

            let email_sent = email_invitation(&state, &inv).await;
            if email_sent {
                inv.email_sent = true;
                inv.sent_date = Some(Utc::now());
                match state.db.lock().await.update_invitation(&inv) {
                    Ok(updated) => inv = updated,
                    Err(e) => warn!(id = %inv.id, error = %e, "could not mark invitation sent"),
                }
            }

            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "success": true,
                    "invitation": {
                        "id": inv.id,
                        "studentEmail": inv.student_email,
                        "parentEmail": inv.parent_email,
                        "status": inv.status.as_str(),
                        "sentDate": inv.sent_date,
                        "expiryDate": inv.expiry_date,
                    },
                    "emailSent": email_sent,
                    "message": "Invitation sent successfully",
                })),
            ))
        }
        "get-invitations" => {
            let tutor = acting_tutor(principal.as_ref(), req.tutor_email.as_deref())?;
            let invitations: Vec<Value> = state
                .db
                .lock()
                .await
                .list_invitations_for_tutor(&tutor)?
                .iter()
                .map(|inv| invitation_view(inv, now))
                .collect();
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "totalInvitations": invitations.len(),
                    "invitations": invitations,
                })),
            ))
        }
        "validate-token" => {
            let token = required(req.token.as_deref(), "Token required")?;
            let inv = redeemable(state.db.lock().await.find_invitation_by_token(&token)?, now)?;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "valid": true,
                    "invitation": {
                        "id": inv.id,
                        "studentInfo": inv.student_info,
                        "parentEmail": inv.parent_email,
                        "tutorEmail": inv.tutor_email,
                        "expiryDate": inv.expiry_date,
                    },
                })),
            ))
        }
        "process-invitation" => {
            let token = required(req.token.as_deref(), "Invitation token required")?;
            let mut db = state.db.lock().await;
            let inv = redeemable(db.find_invitation_by_token(&token)?, now)?;
            let organization = db
                .find_tutor(&inv.tutor_email)?
                .and_then(|t| t.organization)
                .unwrap_or_else(|| state.config.default_organization.clone());

            let parent = db
                .accept_invitation(&inv, &req.parent_details, Some(organization), now)
                .map_err(|e| match e {
                    StoreError::Conflict => {
                        ApiError::Conflict(InviteError::AlreadyAccepted.to_string())
                    }
                    other => other.into(),
                })?;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "parentUser": {
                        "email": parent.email,
                        "name": parent.name,
                        "children": parent.children,
                    },
                    "message": "Invitation accepted successfully",
                })),
            ))
        }
        "resend-invitation" => {
            let principal =
                principal.ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?;
            let id = required(req.invitation_id.as_deref(), "Invitation ID required")?;
            let mut inv = state.db.lock().await.get_invitation(&id).map_err(|e| match e {
                StoreError::NotFound => ApiError::NotFound("Invitation not found".to_string()),
                other => other.into(),
            })?;
            if inv.status == InvitationStatus::Accepted {
                return Err(InviteError::AlreadyAccepted.into());
            }
            if inv.tutor_email != principal.email && !principal.is_admin() {
                return Err(ApiError::Forbidden(
                    "You can only resend your own invitations".to_string(),
                ));
            }

            inv.expiry_date = invite::expiry_from(now);
            inv.reminders_sent += 1;
            let email_sent = email_invitation(&state, &inv).await;
            if email_sent {
                inv.email_sent = true;
                inv.sent_date = Some(Utc::now());
            }
            let inv = state.db.lock().await.update_invitation(&inv)?;
            info!(id = %inv.id, reminders = inv.reminders_sent, email_sent, "invitation resent");

            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "emailSent": email_sent,
                    "expiryDate": inv.expiry_date,
                    "message": "Invitation resent successfully",
                })),
            ))
        }
        other => Err(ApiError::Validation(format!("Invalid action: {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::TestApp;
    use chrono::Duration;
    use portal_shared::types::Role;
    use portal_store::Tutor;

    async fn app_with_tutor() -> (TestApp, String) {
        let app = TestApp::new().await;
        app.seed_user("t@x.com", &[Role::Tutor]).await;
        app.state
            .db
            .lock()
            .await
            .insert_tutor(&Tutor::new("t@x.com", Some("North".to_string()), Utc::now()))
            .unwrap();
        let token = app.token("t@x.com", &["tutor"]);
        (app, token)
    }

    async fn send(app: &TestApp, token: &str) -> (StatusCode, Value) {
        app.post(
            "/student-invitations",
            token,
            json!({"action": "send-invitation", "invitationData": {
                "studentEmail": "kid@x.com", "parentEmail": "Mum@X.com", "firstName": "Ada", "yearGroup": "year4"
            }}),
        )
        .await
    }

    async fn stored_token(app: &TestApp, id: &str) -> String {
        app.state.db.lock().await.get_invitation(id).unwrap().token
    }

    #[tokio::test]
    async fn send_requires_a_tutor_record() {
        let app = TestApp::new().await;
        let token = app.token("t@x.com", &["tutor"]);
        let (status, body) = send(&app, &token).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Tutor not found");

        let student = app.token("s@x.com", &["student"]);
        let (status, _) = send(&app, &student).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn send_marks_sent_and_emails_the_parent() {
        let (app, token) = app_with_tutor().await;
        let (status, body) = send(&app, &token).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["emailSent"], true);
        assert_eq!(body["invitation"]["parentEmail"], "mum@x.com");
        assert!(body["invitation"].get("token").is_none());
        assert_eq!(
            app.mailer.subjects(),
            vec!["Invitation to join Ada's learning portal".to_string()]
        );

        let id = body["invitation"]["id"].as_str().unwrap();
        let stored = app.state.db.lock().await.get_invitation(id).unwrap();
        assert!(stored.email_sent);
        assert!(stored.sent_date.is_some());
        assert_eq!(stored.token.len(), 64);

        let (_, listed) = app
            .post("/student-invitations", &token, json!({"action": "get-invitations"}))
            .await;
        assert_eq!(listed["totalInvitations"], 1);
        assert_eq!(listed["invitations"][0]["expired"], false);
        assert!(listed["invitations"][0].get("token").is_none());
    }

    #[tokio::test]
    async fn validate_hides_the_token() {
        let (app, token) = app_with_tutor().await;
        let (_, sent) = send(&app, &token).await;
        let secret = stored_token(&app, sent["invitation"]["id"].as_str().unwrap()).await;

        let (status, body) = app
            .send_json("POST", "/student-invitations", None, json!({"action": "validate-token", "token": secret}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["invitation"]["tutorEmail"], "t@x.com");
        assert!(!body.to_string().contains(&secret));

        let (status, body) = app
            .send_json("POST", "/student-invitations", None, json!({"action": "validate-token", "token": "nope"}))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Invalid invitation token");
    }

    #[tokio::test]
    async fn expired_tokens_are_rejected() {
        let (app, token) = app_with_tutor().await;
        let (_, sent) = send(&app, &token).await;
        let id = sent["invitation"]["id"].as_str().unwrap();
        let secret = {
            let db = app.state.db.lock().await;
            let mut inv = db.get_invitation(id).unwrap();
            inv.expiry_date = Utc::now() - Duration::seconds(1);
            db.update_invitation(&inv).unwrap();
            inv.token
        };

        for action in ["validate-token", "process-invitation"] {
            let (status, body) = app
                .send_json("POST", "/student-invitations", None, json!({"action": action, "token": secret}))
                .await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(body["error"], "Invitation has expired");
        }
    }

    #[tokio::test]
    async fn accepting_twice_succeeds_once() {
        let (app, token) = app_with_tutor().await;
        let (_, sent) = send(&app, &token).await;
        let id = sent["invitation"]["id"].as_str().unwrap().to_string();
        let secret = stored_token(&app, &id).await;
        let stale = app.state.db.lock().await.get_invitation(&id).unwrap();

        let accept = json!({"action": "process-invitation", "token": secret, "parentDetails": {"name": "Mum"}});
        let (first, second) = tokio::join!(
            app.send_json("POST", "/student-invitations", None, accept.clone()),
            app.send_json("POST", "/student-invitations", None, accept.clone()),
        );
        let mut statuses = vec![first.0, second.0];
        statuses.sort();
        assert_eq!(statuses, vec![StatusCode::OK, StatusCode::BAD_REQUEST]);
        let rejected = if first.0 == StatusCode::OK { second.1 } else { first.1 };
        assert_eq!(rejected["error"], "Invitation already accepted");

        let mut db = app.state.db.lock().await;
        let parent = db.get_user("mum@x.com").unwrap();
        assert!(parent.has_role(Role::Parent));
        assert_eq!(parent.children, vec!["kid@x.com".to_string()]);
        assert_eq!(parent.organization.as_deref(), Some("North"));
        assert!(parent.consent.data_processing);

        // A racer holding the pre-acceptance version loses the swap.
        let raced = db.accept_invitation(&stale, &ParentDetails::default(), None, Utc::now());
        assert!(matches!(raced, Err(StoreError::Conflict)));
    }

    #[tokio::test]
    async fn resend_extends_expiry_for_the_owner_only() {
        let (app, token) = app_with_tutor().await;
        let (_, sent) = send(&app, &token).await;
        let id = sent["invitation"]["id"].as_str().unwrap().to_string();

        let other = app.token("other@x.com", &["tutor"]);
        let (status, _) = app
            .post("/student-invitations", &other, json!({"action": "resend-invitation", "invitationId": id}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .post("/student-invitations", &token, json!({"action": "resend-invitation", "invitationId": id}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["emailSent"], true);
        let stored = app.state.db.lock().await.get_invitation(&id).unwrap();
        assert_eq!(stored.reminders_sent, 1);
        assert_eq!(app.mailer.subjects().len(), 2);

        let secret = stored.token.clone();
        app.send_json("POST", "/student-invitations", None, json!({"action": "process-invitation", "token": secret}))
            .await;
        let (status, body) = app
            .post("/student-invitations", &token, json!({"action": "resend-invitation", "invitationId": id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invitation already accepted");
    }
}

//! Signup, approval and admin user management.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use portal_shared::types::{Role, UserStatus};
use portal_store::User;

use crate::api::AppState;
use crate::auth::Principal;
use crate::error::ApiError;
use crate::handlers::{check_expected_version, required_email, ApiJson};
use crate::mailer::{send_best_effort, templates};

#[derive(Debug, Default, Deserialize)]
pub struct EmailQuery {
    email: Option<String>,
    name: Option<String>,
}

fn status_response(user: &User) -> Value {
    let approved = user.status == UserStatus::Approved;
    let mut body = json!({
        "email": user.email,
        "status": user.status,
        "isApproved": approved,
        "hasSubscription": user.subscription.has_subscription,
    });
    if approved {
        if let Some(date) = user.processed_date {
            body["approvedDate"] = json!(date);
        }
    }
    body
}

/// `GET|POST /checkuserstatus`: report approval state, creating a pending
/// record on first contact.
pub async fn check_user_status(
    State(state): State<AppState>,
    principal: Principal,
    Query(query): Query<EmailQuery>,
    body: Option<Json<EmailQuery>>,
) -> Result<Json<Value>, ApiError> {
    let requested = body
        .and_then(|Json(b)| b.email)
        .or(query.email)
        .unwrap_or_else(|| principal.email.clone());
    let email = required_email(Some(&requested), "Email is required")?;
    principal.require_self_or_admin(&email)?;

    let now = Utc::now();
    let db = state.db.lock().await;
    let (user, _) = db.ensure_pending_user(&email, None, now)?;
    if email == principal.email {
        db.touch_last_login(&email, now)?;
    }
    Ok(Json(status_response(&user)))
}

/// `POST /onusersignup`
pub async fn on_user_signup(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<EmailQuery>,
) -> Result<Json<Value>, ApiError> {
    let email = required_email(
        Some(req.email.as_deref().unwrap_or(&principal.email)),
        "Email is required",
    )?;
    principal.require_self_or_admin(&email)?;
    let name = req.name.as_deref().map(str::trim).filter(|n| !n.is_empty());

    let now = Utc::now();
    let created = {
        let db = state.db.lock().await;
        db.ensure_pending_user(&email, name, now)?.1
    };
    if !created {
        return Ok(Json(json!({
            "success": true,
            "message": "User already registered",
        })));
    }

    match &state.config.admin_notify_email {
        Some(admin) => {
            let message = templates::new_signup(admin, &email, name, now, &state.config.app_base_url);
            send_best_effort(state.mailer.as_ref(), &message).await;
        }
        None => warn!(email = %email, "ADMIN_NOTIFY_EMAIL not set, signup notification skipped"),
    }

    Ok(Json(json!({
        "success": true,
        "message": "User registered successfully. Pending admin approval.",
    })))
}

/// `POST /getpendingusers`
pub async fn get_pending_users(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Value>, ApiError> {
    principal.require_admin()?;
    let users = state.db.lock().await.list_users(Some(UserStatus::Pending))?;

    let users: Vec<Value> = users
        .iter()
        .map(|u| {
            json!({
                "email": u.email,
                "signupDate": u.signup_date.unwrap_or(u.created_date),
                "status": u.status,
                "name": u.name.as_deref().unwrap_or("N/A"),
            })
        })
        .collect();
    Ok(Json(json!({ "users": users })))
}

#[derive(Debug, Deserialize)]
pub struct ApproveRequest {
    email: Option<String>,
    action: Option<String>,
}

/// `POST /approveuser`
pub async fn approve_user(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<ApproveRequest>,
) -> Result<Json<Value>, ApiError> {
    principal.require_admin()?;

    let missing = || ApiError::Validation("Email and action are required".to_string());
    let email = required_email(req.email.as_deref(), "Email and action are required")?;
    let action = req.action.as_deref().map(str::trim).ok_or_else(missing)?;
    let status = match action {
        "approve" => UserStatus::Approved,
        "reject" => UserStatus::Rejected,
        "" => return Err(missing()),
        other => return Err(ApiError::Validation(format!("Invalid action: {other}"))),
    };

    let now = Utc::now();
    {
        let db = state.db.lock().await;
        let mut user = db
            .find_user(&email)?
            .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
        user.status = status;
        user.processed_date = Some(now);
        user.processed_by = Some(principal.email.clone());
        user.updated_date = Some(now);
        db.update_user(&user)?;
    }
    info!(email = %email, action, by = %principal.email, "user processed");

    let message = match status {
        UserStatus::Approved => templates::approved(&email, &state.config.app_base_url),
        _ => templates::rejected(&email),
    };
    send_best_effort(state.mailer.as_ref(), &message).await;

    Ok(Json(json!({
        "success": true,
        "message": format!("User {action}d successfully"),
        "email": email,
    })))
}

/// `POST /check-admin-status`: admin indicator from the stored record.
pub async fn check_admin_status(
    State(state): State<AppState>,
    principal: Principal,
    body: Option<Json<EmailQuery>>,
) -> Result<Json<Value>, ApiError> {
    let requested = body
        .and_then(|Json(b)| b.email)
        .unwrap_or_else(|| principal.email.clone());
    let email = required_email(Some(&requested), "Email is required")?;
    principal.require_self_or_admin(&email)?;

    let user = state.db.lock().await.find_user(&email)?;
    let (is_admin, roles) = match &user {
        Some(u) => (
            u.is_admin_account() || u.has_role(Role::Tutor),
            u.roles.clone(),
        ),
        None => (false, Vec::new()),
    };
    Ok(Json(json!({
        "email": email,
        "isAdmin": is_admin,
        "roles": roles,
    })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdates {
    name: Option<String>,
    phone: Option<String>,
    organization: Option<String>,
    roles: Option<Vec<String>>,
    status: Option<String>,
    year_group: Option<String>,
    is_active: Option<bool>,
    is_admin: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserManagementRequest {
    #[serde(default)]
    action: String,
    email: Option<String>,
    status: Option<String>,
    #[serde(default)]
    updates: UserUpdates,
    version: Option<i64>,
    limit: Option<usize>,
}

const ACTIVITY_LIMIT: usize = 50;

fn user_summary(u: &User) -> Value {
    json!({
        "email": u.email,
        "name": u.name,
        "phone": u.phone,
        "organization": u.organization,
        "status": u.status,
        "createdDate": u.created_date,
        "roles": u.roles,
        "version": u.version,
    })
}

fn parse_status(value: &str) -> Result<UserStatus, ApiError> {
    UserStatus::parse(value).ok_or_else(|| ApiError::Validation(format!("Invalid status: {value}")))
}

/// `POST /user-management`
pub async fn user_management(
    State(state): State<AppState>,
    principal: Principal,
    ApiJson(req): ApiJson<UserManagementRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    principal.require_admin()?;

    match req.action.as_str() {
        "get-pending-users" => {
            let db = state.db.lock().await;
            let pending = db.list_users(Some(UserStatus::Pending))?;
            let total = db.list_users(None)?.len();
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "users": pending.iter().map(user_summary).collect::<Vec<_>>(),
                    "stats": { "pending": pending.len(), "total": total },
                })),
            ))
        }
        "list-users" => {
            let status = req.status.as_deref().map(parse_status).transpose()?;
            let users = state.db.lock().await.list_users(status)?;
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "users": users.iter().map(user_summary).collect::<Vec<_>>(),
                    "total": users.len(),
                })),
            ))
        }
        "update-user" => {
            let email = required_email(req.email.as_deref(), "Email is required")?;
            let updates = req.updates;
            let db = state.db.lock().await;
            let mut user = db
                .find_user(&email)?
                .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
            check_expected_version(req.version, user.version)?;

            if let Some(name) = updates.name {
                user.name = Some(name);
            }
            if let Some(phone) = updates.phone {
                user.phone = Some(phone);
            }
            if let Some(org) = updates.organization {
                user.organization = Some(org);
            }
            if let Some(roles) = updates.roles {
                let mut parsed = Vec::new();
                for r in &roles {
                    let role = Role::parse(r)
                        .ok_or_else(|| ApiError::Validation(format!("Invalid role: {r}")))?;
                    if !parsed.contains(&role) {
                        parsed.push(role);
                    }
                }
                user.roles = parsed;
            }
            if let Some(status) = updates.status {
                user.status = parse_status(&status)?;
            }
            if let Some(year) = updates.year_group {
                user.year_group = Some(year);
            }
            if let Some(active) = updates.is_active {
                user.is_active = active;
            }
            if let Some(admin) = updates.is_admin {
                user.is_admin = admin;
            }
            user.updated_date = Some(Utc::now());

            let updated = db.update_user(&user)?;
            info!(email = %email, by = %principal.email, "user updated");
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "user": updated })),
            ))
        }
        "delete-user" => {
            let email = required_email(req.email.as_deref(), "Email is required")?;
            let deleted = state.db.lock().await.delete_user(&email)?;
            if !deleted {
                return Err(ApiError::NotFound("User not found".to_string()));
            }

            let identity_deleted = match state.directory.delete_user(&email).await {
                Ok(found) => found,
                Err(e) => {
                    warn!(email = %email, error = %e, "identity directory delete failed");
                    false
                }
            };
            info!(email = %email, by = %principal.email, identity_deleted, "user deleted");
            Ok((
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "message": "User deleted successfully",
                    "identityDeleted": identity_deleted,
                })),
            ))
        }
        "user-activity" => {
            let email = required_email(req.email.as_deref(), "Email is required")?;
            let limit = req.limit.unwrap_or(ACTIVITY_LIMIT).min(ACTIVITY_LIMIT * 10);
            let events = state.db.lock().await.list_view_events_for_user(&email, limit)?;
            Ok((
                StatusCode::OK,
                Json(json!({ "success": true, "total": events.len(), "events": events })),
            ))
        }
        other => Err(ApiError::Validation(format!("Invalid action: {other}"))),
    }
}

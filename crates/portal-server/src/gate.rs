//! Permission and consent checks for student data.
//!
//! Both gates are pure functions over the verified principal and the
//! caller's stored user record, so they read nothing and write nothing.

use portal_shared::types::Role;
use portal_store::User;

use crate::auth::Principal;
use crate::error::ApiError;

/// The role a caller asks to act as.  Must be backed by a token claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingRole {
    Teacher,
    Parent,
    Own,
}

/// What the gate granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Full access to any student.
    Teacher,
    /// Access to the caller's children.
    Parent,
    /// Access to the caller's own records.
    Own,
}

pub fn verify_student_access(
    principal: &Principal,
    stored: Option<&User>,
    target: Option<&str>,
    acting: ActingRole,
) -> Result<Access, ApiError> {
    let Some(user) = stored else {
        return Err(ApiError::access_denied("User not found"));
    };
    if !user.consent.data_processing {
        return Err(ApiError::access_denied(
            "GDPR consent required for data processing",
        ));
    }

    match acting {
        ActingRole::Teacher => {
            let corroborated = user.is_admin_account() || user.has_role(Role::Tutor);
            if principal.is_staff() && corroborated {
                return Ok(Access::Teacher);
            }
        }
        ActingRole::Parent => {
            if !principal.has_role(Role::Parent) {
                return Err(ApiError::access_denied("Parent role not present in token"));
            }
            return match target {
                None => Ok(Access::Parent),
                Some(student) if user.children.iter().any(|c| c.eq_ignore_ascii_case(student)) => {
                    Ok(Access::Parent)
                }
                Some(_) => Err(ApiError::access_denied(
                    "Parent can only access own children data",
                )),
            };
        }
        ActingRole::Own => {}
    }

    match target {
        None => Ok(Access::Own),
        Some(student) if student.eq_ignore_ascii_case(&principal.email) => Ok(Access::Own),
        Some(_) => Err(ApiError::access_denied("Insufficient permissions")),
    }
}

/// Gate for the tutor-management API.
pub fn verify_tutor(principal: &Principal, stored: Option<&User>) -> Result<(), ApiError> {
    let Some(user) = stored else {
        return Err(ApiError::access_denied("User not found"));
    };
    if !(user.has_role(Role::Tutor) || user.is_admin) {
        return Err(ApiError::access_denied(
            "User does not have tutor permissions",
        ));
    }
    if !principal.is_staff() {
        return Err(ApiError::access_denied("Tutor role not present in token"));
    }
    Ok(())
}

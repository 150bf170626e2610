//! Parent invitation records, looked up by id or by secret token.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use portal_shared::types::{Consent, InvitationStatus, Role};

use crate::codec::{get_bool, get_enum, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{duplicate, not_found, Result};
use crate::models::{Invitation, ParentDetails, Profile, User};
use crate::users::{row_to_user, write_user, INSERT_USER, UPDATE_USER, USER_COLUMNS};

const INVITATION_COLUMNS: &str = "id, token, tutor_email, student_email, parent_email, \
     student_info, status, created_date, sent_date, expiry_date, accepted_date, email_sent, \
     reminders_sent, version";

impl Database {
    pub fn insert_invitation(&self, inv: &Invitation) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO invitations (id, token, tutor_email, student_email, parent_email,
                     student_info, status, created_date, sent_date, expiry_date, accepted_date,
                     email_sent, reminders_sent, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    inv.id,
                    inv.token,
                    inv.tutor_email,
                    inv.student_email,
                    inv.parent_email,
                    to_json(&inv.student_info)?,
                    inv.status.as_str(),
                    ts(&inv.created_date),
                    opt_ts(&inv.sent_date),
                    ts(&inv.expiry_date),
                    opt_ts(&inv.accepted_date),
                    inv.email_sent,
                    inv.reminders_sent,
                    inv.version,
                ],
            )
            .map_err(duplicate(&inv.id))?;
        Ok(())
    }

    pub fn get_invitation(&self, id: &str) -> Result<Invitation> {
        self.conn()
            .query_row(
                &format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = ?1"),
                params![id],
                row_to_invitation,
            )
            .map_err(not_found)
    }

    pub fn find_invitation_by_token(&self, token: &str) -> Result<Option<Invitation>> {
        let inv = self
            .conn()
            .query_row(
                &format!("SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = ?1"),
                params![token],
                row_to_invitation,
            )
            .optional()?;
        Ok(inv)
    }

    /// A tutor's invitations, newest first.
    pub fn list_invitations_for_tutor(&self, tutor_email: &str) -> Result<Vec<Invitation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations
             WHERE tutor_email = ?1
             ORDER BY created_date DESC"
        ))?;
        let rows = stmt.query_map(params![tutor_email], row_to_invitation)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Versioned write-back of the mutable invitation fields.
    pub fn update_invitation(&self, inv: &Invitation) -> Result<Invitation> {
        let affected = self.conn().execute(
            "UPDATE invitations SET status = ?2, sent_date = ?3, expiry_date = ?4,
                    accepted_date = ?5, email_sent = ?6, reminders_sent = ?7,
                    version = version + 1
             WHERE id = ?1 AND version = ?8",
            params![
                inv.id,
                inv.status.as_str(),
                opt_ts(&inv.sent_date),
                ts(&inv.expiry_date),
                opt_ts(&inv.accepted_date),
                inv.email_sent,
                inv.reminders_sent,
                inv.version,
            ],
        )?;
        Database::check_versioned(self.conn(), affected, "invitations", "id", &inv.id)?;
        let mut updated = inv.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Accept a pending invitation and upsert the parent account atomically.
    ///
    /// The invitation moves `pending -> accepted` only if it is still at
    /// `inv.version`; a concurrent acceptance makes this fail with
    /// `Conflict` and nothing is written.  Returns the stored parent user.
    pub fn accept_invitation(
        &mut self,
        inv: &Invitation,
        details: &ParentDetails,
        organization: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let tx = self.conn_mut().transaction()?;

        let affected = tx.execute(
            "UPDATE invitations SET status = ?2, accepted_date = ?3, version = version + 1
             WHERE id = ?1 AND version = ?4 AND status = ?5",
            params![
                inv.id,
                InvitationStatus::Accepted.as_str(),
                ts(&now),
                inv.version,
                InvitationStatus::Pending.as_str(),
            ],
        )?;
        Database::check_versioned(&tx, affected, "invitations", "id", &inv.id)?;

        let existing = tx
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![inv.parent_email],
                row_to_user,
            )
            .optional()?;

        let parent = match existing {
            Some(mut parent) => {
                parent.grant_role(Role::Parent);
                if !parent.children.contains(&inv.student_email) {
                    parent.children.push(inv.student_email.clone());
                }
                parent.updated_date = Some(now);
                let affected = write_user(&tx, UPDATE_USER, &parent)?;
                Database::check_versioned(&tx, affected, "users", "email", &parent.email)?;
                parent.version += 1;
                parent
            }
            None => {
                let mut parent = User::new(&inv.parent_email, now);
                parent.name = Some(details.name.clone().unwrap_or_else(|| "Parent".to_string()));
                parent.phone = details.phone.clone();
                parent.roles = vec![Role::Parent];
                parent.children = vec![inv.student_email.clone()];
                parent.organization = organization;
                parent.consent = Consent::granted();
                parent.profile = Profile {
                    phone: details.phone.clone(),
                    emergency_contact: details.emergency_contact.clone(),
                    ..Profile::default()
                };
                parent.signup_date = Some(now);
                write_user(&tx, INSERT_USER, &parent)?;
                parent
            }
        };

        tx.commit()?;
        tracing::info!(invitation = %inv.id, parent = %parent.email, "invitation accepted");
        Ok(parent)
    }
}

fn row_to_invitation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invitation> {
    Ok(Invitation {
        id: row.get("id")?,
        token: row.get("token")?,
        tutor_email: row.get("tutor_email")?,
        student_email: row.get("student_email")?,
        parent_email: row.get("parent_email")?,
        student_info: get_json(row, "student_info")?,
        status: get_enum(row, "status", InvitationStatus::parse)?,
        created_date: get_ts(row, "created_date")?,
        sent_date: get_opt_ts(row, "sent_date")?,
        expiry_date: get_ts(row, "expiry_date")?,
        accepted_date: get_opt_ts(row, "accepted_date")?,
        email_sent: get_bool(row, "email_sent")?,
        reminders_sent: row.get("reminders_sent")?,
        version: row.get("version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentInfo;
    use crate::StoreError;
    use chrono::Duration;
    use portal_shared::types::UserStatus;

    fn invitation(id: &str, token: &str) -> Invitation {
        let now = Utc::now();
        Invitation {
            id: id.to_string(),
            token: token.to_string(),
            tutor_email: "t@x.com".into(),
            student_email: "kid@x.com".into(),
            parent_email: "mum@x.com".into(),
            student_info: StudentInfo {
                first_name: Some("Kid".into()),
                ..Default::default()
            },
            status: InvitationStatus::Pending,
            created_date: now,
            sent_date: None,
            expiry_date: now + Duration::days(7),
            accepted_date: None,
            email_sent: false,
            reminders_sent: 0,
            version: 1,
        }
    }

    #[test]
    fn lookup_by_token() {
        let db = Database::open_in_memory().unwrap();
        db.insert_invitation(&invitation("inv_1", "tok1")).unwrap();

        let found = db.find_invitation_by_token("tok1").unwrap().unwrap();
        assert_eq!(found.id, "inv_1");
        assert!(db.find_invitation_by_token("nope").unwrap().is_none());
        assert_eq!(db.list_invitations_for_tutor("t@x.com").unwrap().len(), 1);
    }

    #[test]
    fn accept_creates_parent_with_consent() {
        let mut db = Database::open_in_memory().unwrap();
        let inv = invitation("inv_1", "tok1");
        db.insert_invitation(&inv).unwrap();

        let details = ParentDetails {
            name: Some("Mum".into()),
            ..Default::default()
        };
        let parent = db.accept_invitation(&inv, &details, None, Utc::now()).unwrap();
        assert_eq!(parent.children, vec!["kid@x.com"]);
        assert!(parent.has_role(Role::Parent));
        assert!(parent.consent.data_processing);
        assert_eq!(parent.status, UserStatus::Pending);

        let stored = db.get_invitation("inv_1").unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);
        assert!(stored.accepted_date.is_some());
    }

    #[test]
    fn accept_merges_into_existing_user() {
        let mut db = Database::open_in_memory().unwrap();
        let mut existing = User::new("mum@x.com", Utc::now());
        existing.roles = vec![Role::Tutor];
        existing.children = vec!["older@x.com".into()];
        db.insert_user(&existing).unwrap();

        let inv = invitation("inv_1", "tok1");
        db.insert_invitation(&inv).unwrap();
        let parent = db
            .accept_invitation(&inv, &ParentDetails::default(), None, Utc::now())
            .unwrap();
        assert_eq!(parent.roles, vec![Role::Tutor, Role::Parent]);
        assert_eq!(parent.children, vec!["older@x.com", "kid@x.com"]);
        assert_eq!(db.get_user("mum@x.com").unwrap().version, 2);
    }

    #[test]
    fn second_acceptance_conflicts_and_writes_nothing() {
        let mut db = Database::open_in_memory().unwrap();
        let inv = invitation("inv_1", "tok1");
        db.insert_invitation(&inv).unwrap();

        db.accept_invitation(&inv, &ParentDetails::default(), None, Utc::now())
            .unwrap();
        let again = db.accept_invitation(&inv, &ParentDetails::default(), None, Utc::now());
        assert!(matches!(again, Err(StoreError::Conflict)));

        let parent = db.get_user("mum@x.com").unwrap();
        assert_eq!(parent.children, vec!["kid@x.com"]);
        assert_eq!(parent.version, 1);
    }

    #[test]
    fn update_invitation_bumps_version() {
        let db = Database::open_in_memory().unwrap();
        let mut inv = invitation("inv_1", "tok1");
        db.insert_invitation(&inv).unwrap();

        inv.email_sent = true;
        inv.reminders_sent = 1;
        let updated = db.update_invitation(&inv).unwrap();
        assert_eq!(updated.version, 2);
        assert!(matches!(db.update_invitation(&inv), Err(StoreError::Conflict)));
        assert!(db.get_invitation("inv_1").unwrap().email_sent);
    }
}

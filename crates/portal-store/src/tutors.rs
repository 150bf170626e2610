//! CRUD operations for [`Tutor`] records.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::codec::{get_bool, get_json, get_opt_ts, get_ts, opt_ts, to_json, ts};
use crate::database::Database;
use crate::error::{duplicate, not_found, Result, StoreError};
use crate::models::Tutor;

const TUTOR_COLUMNS: &str = "email, name, organization, students, permissions, preferences, \
     is_active, created_date, updated_date, version";

impl Database {
    pub fn insert_tutor(&self, tutor: &Tutor) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tutors (email, name, organization, students, permissions,
                                     preferences, is_active, created_date, updated_date, version)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    tutor.email,
                    tutor.name,
                    tutor.organization,
                    to_json(&tutor.students)?,
                    to_json(&tutor.permissions)?,
                    to_json(&tutor.preferences)?,
                    tutor.is_active,
                    ts(&tutor.created_date),
                    opt_ts(&tutor.updated_date),
                    tutor.version,
                ],
            )
            .map_err(duplicate(&tutor.email))?;
        Ok(())
    }

    pub fn get_tutor(&self, email: &str) -> Result<Tutor> {
        self.conn()
            .query_row(
                &format!("SELECT {TUTOR_COLUMNS} FROM tutors WHERE email = ?1"),
                params![email],
                row_to_tutor,
            )
            .map_err(not_found)
    }

    pub fn find_tutor(&self, email: &str) -> Result<Option<Tutor>> {
        match self.get_tutor(email) {
            Ok(t) => Ok(Some(t)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Versioned write-back; returns the record with its new version.
    pub fn update_tutor(&self, tutor: &Tutor) -> Result<Tutor> {
        let affected = self.conn().execute(
            "UPDATE tutors SET name = ?2, organization = ?3, students = ?4, permissions = ?5,
                    preferences = ?6, is_active = ?7, updated_date = ?8, version = version + 1
             WHERE email = ?1 AND version = ?9",
            params![
                tutor.email,
                tutor.name,
                tutor.organization,
                to_json(&tutor.students)?,
                to_json(&tutor.permissions)?,
                to_json(&tutor.preferences)?,
                tutor.is_active,
                opt_ts(&tutor.updated_date),
                tutor.version,
            ],
        )?;
        Database::check_versioned(self.conn(), affected, "tutors", "email", &tutor.email)?;
        let mut updated = tutor.clone();
        updated.version += 1;
        Ok(updated)
    }

    /// Add `student_email` to the tutor's roster, creating the tutor record
    /// on first use.
    pub fn link_student(
        &self,
        tutor_email: &str,
        student_email: &str,
        organization: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Tutor> {
        let Some(mut tutor) = self.find_tutor(tutor_email)? else {
            let mut tutor = Tutor::new(tutor_email, organization, now);
            tutor.students.push(student_email.to_string());
            self.insert_tutor(&tutor)?;
            tracing::info!(tutor = tutor_email, "created tutor record");
            return Ok(tutor);
        };

        if tutor.students.iter().any(|s| s == student_email) {
            return Ok(tutor);
        }
        tutor.students.push(student_email.to_string());
        tutor.updated_date = Some(now);
        self.update_tutor(&tutor)
    }

    /// Remove `student_email` from the tutor's roster.  Missing tutor records
    /// are not an error.
    pub fn unlink_student(
        &self,
        tutor_email: &str,
        student_email: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(mut tutor) = self.find_tutor(tutor_email)? else {
            return Ok(());
        };
        let before = tutor.students.len();
        tutor.students.retain(|s| s != student_email);
        if tutor.students.len() != before {
            tutor.updated_date = Some(now);
            self.update_tutor(&tutor)?;
        }
        Ok(())
    }
}

fn row_to_tutor(row: &rusqlite::Row<'_>) -> rusqlite::Result<Tutor> {
    Ok(Tutor {
        email: row.get("email")?,
        name: row.get("name")?,
        organization: row.get("organization")?,
        students: get_json(row, "students")?,
        permissions: get_json(row, "permissions")?,
        preferences: get_json(row, "preferences")?,
        is_active: get_bool(row, "is_active")?,
        created_date: get_ts(row, "created_date")?,
        updated_date: get_opt_ts(row, "updated_date")?,
        version: row.get("version")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_creates_tutor_lazily_and_dedupes() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();

        assert!(db.find_tutor("t@x.com").unwrap().is_none());
        let t = db.link_student("t@x.com", "s1@x.com", None, now).unwrap();
        assert_eq!(t.students, vec!["s1@x.com"]);
        assert_eq!(t.permissions.len(), 5);

        db.link_student("t@x.com", "s1@x.com", None, now).unwrap();
        let t = db.link_student("t@x.com", "s2@x.com", None, now).unwrap();
        assert_eq!(t.students, vec!["s1@x.com", "s2@x.com"]);
        assert_eq!(t.version, 2);

        db.unlink_student("t@x.com", "s1@x.com", now).unwrap();
        assert_eq!(db.get_tutor("t@x.com").unwrap().students, vec!["s2@x.com"]);
        db.unlink_student("nobody@x.com", "s1@x.com", now).unwrap();
    }

    #[test]
    fn stale_tutor_write_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let t = db.link_student("t@x.com", "s1@x.com", None, now).unwrap();
        db.update_tutor(&t).unwrap();
        assert!(matches!(db.update_tutor(&t), Err(StoreError::Conflict)));
    }
}
